//! Spot instance request lifecycle tracking
//!
//! Requests created on earlier ticks are rediscovered through their
//! `launched-for-asg` tag and advanced or finalized. Finalization is durable:
//! tagging `autospotting-complete=true` on the request itself is the commit
//! marker that makes every transition safe to repeat.

use crate::asg::AsgView;
use crate::catalog::InstanceState;
use crate::cloud::{Ec2Ops, Tag};
use crate::error::{Result, SpotctlError};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Tag linking a spot request to the ASG it was created for.
pub const LAUNCHED_FOR_ASG_TAG: &str = "launched-for-asg";
/// Commit marker: a request carrying this tag is never reprocessed.
pub const COMPLETE_TAG: &str = "autospotting-complete";

/// Status code reported on a fulfilled request.
pub const FULFILLED_STATUS: &str = "fulfilled";

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Lifecycle state of a spot instance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SirState {
    Open,
    Active,
    Cancelled,
    Closed,
    Failed,
}

impl SirState {
    pub fn parse(value: &str) -> Self {
        match value {
            "open" => SirState::Open,
            "active" => SirState::Active,
            "cancelled" => SirState::Cancelled,
            "closed" => SirState::Closed,
            _ => SirState::Failed,
        }
    }
}

/// One spot instance request as observed from the API.
#[derive(Debug, Clone)]
pub struct SpotRequest {
    pub id: String,
    pub state: SirState,
    pub status_code: Option<String>,
    pub instance_id: Option<String>,
    pub tags: Vec<Tag>,
}

impl SpotRequest {
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// Whether the commit marker is already set.
    pub fn is_complete(&self) -> bool {
        self.tag_value(COMPLETE_TAG) == Some("true")
    }

    pub fn is_fulfilled(&self) -> bool {
        self.status_code.as_deref() == Some(FULFILLED_STATUS)
    }
}

/// What the tracker decided about one ASG's outstanding requests.
#[derive(Debug)]
pub enum TrackerOutcome {
    /// Nothing outstanding; the controller may look for a new victim.
    NonePending,
    /// A fulfilled request whose instance must be swapped into the group.
    Matched(SpotRequest),
    /// An outstanding request needs more time; abort this tick and resume
    /// on the next one.
    WaitForNextTick,
}

enum Disposition {
    Matched(SpotRequest),
    TryNext,
    Wait,
}

pub struct SirTracker<'a> {
    ec2: &'a dyn Ec2Ops,
    wait_timeout: Duration,
}

impl<'a> SirTracker<'a> {
    pub fn new(ec2: &'a dyn Ec2Ops, wait_timeout: Duration) -> Self {
        Self { ec2, wait_timeout }
    }

    /// Discover this ASG's outstanding requests and advance them. At most
    /// one request matches per tick; the rest are deferred.
    pub async fn resume(&self, asg: &AsgView) -> Result<TrackerOutcome> {
        let pending = self.find_pending(asg.name()).await?;
        if pending.is_empty() {
            return Ok(TrackerOutcome::NonePending);
        }
        info!(
            asg = %asg.name(),
            pending = pending.len(),
            "Resuming outstanding spot requests"
        );

        for sir in pending {
            match self.dispatch(sir, asg).await? {
                Disposition::Matched(sir) => return Ok(TrackerOutcome::Matched(sir)),
                Disposition::TryNext => continue,
                Disposition::Wait => return Ok(TrackerOutcome::WaitForNextTick),
            }
        }
        Ok(TrackerOutcome::NonePending)
    }

    /// All requests previously created for this ASG that still need work:
    /// completed ones and cancelled ones that never got an instance are
    /// filtered out.
    pub async fn find_pending(&self, asg_name: &str) -> Result<Vec<SpotRequest>> {
        let requests = self
            .ec2
            .describe_spot_requests_tagged(LAUNCHED_FOR_ASG_TAG, asg_name)
            .await?;
        Ok(requests
            .into_iter()
            .filter(|sir| !sir.is_complete())
            .filter(|sir| !(sir.state == SirState::Cancelled && sir.instance_id.is_none()))
            .collect())
    }

    async fn dispatch(&self, sir: SpotRequest, asg: &AsgView) -> Result<Disposition> {
        debug!(request = %sir.id, state = ?sir.state, "Dispatching spot request");
        match sir.state {
            SirState::Open => self.process_open(sir, asg).await,
            SirState::Active => self.process_active(sir, asg).await,
            SirState::Cancelled => self.process_cancelled(sir, asg).await,
            SirState::Closed | SirState::Failed => {
                self.tag_complete(&sir.id).await?;
                Ok(Disposition::TryNext)
            }
        }
    }

    /// An open request blocks the tick for a bounded time waiting for
    /// fulfilment. A timeout is not an error: the request stays open and is
    /// the recovery mechanism for the next tick.
    async fn process_open(&self, sir: SpotRequest, asg: &AsgView) -> Result<Disposition> {
        match self.wait_until_fulfilled(&sir.id).await {
            Ok(refreshed) => {
                if let Some(instance_id) = refreshed.instance_id.clone() {
                    return self.process_instance_id(refreshed, &instance_id, asg).await;
                }
                match refreshed.state {
                    SirState::Cancelled | SirState::Closed | SirState::Failed => {
                        self.tag_complete(&refreshed.id).await?;
                        Ok(Disposition::TryNext)
                    }
                    _ => Ok(Disposition::Wait),
                }
            }
            Err(e) => {
                warn!(request = %sir.id, "Spot request not fulfilled yet: {}", e);
                Ok(Disposition::Wait)
            }
        }
    }

    async fn process_active(&self, sir: SpotRequest, asg: &AsgView) -> Result<Disposition> {
        if sir.is_fulfilled() {
            if let Some(instance_id) = sir.instance_id.clone() {
                return self.process_instance_id(sir, &instance_id, asg).await;
            }
        }
        // Active but not usable (marked-for-stop and friends): nothing to
        // attach, close it out.
        self.tag_complete(&sir.id).await?;
        Ok(Disposition::TryNext)
    }

    /// A cancelled request may still own a usable instance.
    async fn process_cancelled(&self, sir: SpotRequest, asg: &AsgView) -> Result<Disposition> {
        let instance_id = match sir.instance_id.clone() {
            Some(id) => id,
            None => {
                self.tag_complete(&sir.id).await?;
                return Ok(Disposition::TryNext);
            }
        };

        if asg.instances.contains(&instance_id) {
            self.tag_complete(&sir.id).await?;
            return Ok(Disposition::TryNext);
        }

        match self.ec2.describe_instance(&instance_id).await? {
            Some(instance) if instance.state == InstanceState::Running => {
                info!(
                    request = %sir.id,
                    instance = %instance_id,
                    "Cancelled request left a running instance, reusing it"
                );
                Ok(Disposition::Matched(sir))
            }
            Some(instance)
                if matches!(
                    instance.state,
                    InstanceState::Terminated | InstanceState::ShuttingDown
                ) =>
            {
                self.tag_complete(&sir.id).await?;
                Ok(Disposition::TryNext)
            }
            None => {
                self.tag_complete(&sir.id).await?;
                Ok(Disposition::TryNext)
            }
            Some(_) => Ok(Disposition::Wait),
        }
    }

    /// A fulfilled request with an instance: already attached means done,
    /// running but unattached means swap, anything else waits.
    async fn process_instance_id(
        &self,
        sir: SpotRequest,
        instance_id: &str,
        asg: &AsgView,
    ) -> Result<Disposition> {
        if asg.instances.contains(instance_id) {
            debug!(
                request = %sir.id,
                instance = %instance_id,
                "Instance already attached to the group"
            );
            self.tag_complete(&sir.id).await?;
            return Ok(Disposition::TryNext);
        }

        match self.ec2.describe_instance(instance_id).await? {
            Some(instance) if instance.state == InstanceState::Running => {
                Ok(Disposition::Matched(sir))
            }
            _ => match self.wait_until_instance_running(instance_id).await {
                Ok(()) => Ok(Disposition::Matched(sir)),
                Err(e) => {
                    warn!(
                        request = %sir.id,
                        instance = %instance_id,
                        "Spot instance not running yet: {}", e
                    );
                    Ok(Disposition::Wait)
                }
            },
        }
    }

    /// Reconcile outstanding requests while the group is not replacing:
    /// open bids are withdrawn, terminal requests get the commit marker.
    /// A fulfilled request whose instance is still usable is left pending
    /// for a tick where the floor allows the swap again.
    pub async fn finalize_idle(&self, asg: &AsgView) -> Result<()> {
        for sir in self.find_pending(asg.name()).await? {
            match sir.state {
                SirState::Open => self.cancel_and_complete(&sir.id).await?,
                SirState::Closed | SirState::Failed => self.tag_complete(&sir.id).await?,
                SirState::Active if !sir.is_fulfilled() => self.tag_complete(&sir.id).await?,
                SirState::Active | SirState::Cancelled => {
                    let instance_id = match sir.instance_id.clone() {
                        Some(id) => id,
                        None => {
                            self.tag_complete(&sir.id).await?;
                            continue;
                        }
                    };
                    if asg.instances.contains(&instance_id) {
                        self.tag_complete(&sir.id).await?;
                        continue;
                    }
                    match self.ec2.describe_instance(&instance_id).await? {
                        Some(instance)
                            if matches!(
                                instance.state,
                                InstanceState::Terminated | InstanceState::ShuttingDown
                            ) =>
                        {
                            self.tag_complete(&sir.id).await?;
                        }
                        None => self.tag_complete(&sir.id).await?,
                        Some(_) => {
                            debug!(
                                request = %sir.id,
                                instance = %instance_id,
                                "Deferring fulfilled request until the floor allows a swap"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Set the commit marker on a request.
    pub async fn tag_complete(&self, request_id: &str) -> Result<()> {
        info!(request = %request_id, "Tagging spot request complete");
        self.ec2
            .create_tags(request_id, &[Tag::new(COMPLETE_TAG, "true")])
            .await
    }

    /// Cancel a bid the group no longer needs and commit it in one step.
    pub async fn cancel_and_complete(&self, request_id: &str) -> Result<()> {
        info!(request = %request_id, "Cancelling spot request");
        self.ec2.cancel_spot_request(request_id).await?;
        self.tag_complete(request_id).await
    }

    /// Poll until the request leaves the open state or reports fulfilment,
    /// bounded by the configured wait deadline.
    async fn wait_until_fulfilled(&self, request_id: &str) -> Result<SpotRequest> {
        let wait = timeout(self.wait_timeout, async {
            loop {
                let sir = self.ec2.describe_spot_request(request_id).await?;
                if sir.state != SirState::Open || sir.is_fulfilled() {
                    return Ok(sir);
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await;

        match wait {
            Ok(result) => result,
            Err(_) => Err(SpotctlError::WaitDeadline(request_id.to_string())),
        }
    }

    /// Poll until the instance is running, bounded by the wait deadline.
    async fn wait_until_instance_running(&self, instance_id: &str) -> Result<()> {
        let wait = timeout(self.wait_timeout, async {
            loop {
                if let Some(instance) = self.ec2.describe_instance(instance_id).await? {
                    if instance.state == InstanceState::Running {
                        return Ok(());
                    }
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await;

        match wait {
            Ok(result) => result,
            Err(_) => Err(SpotctlError::WaitDeadline(instance_id.to_string())),
        }
    }
}
