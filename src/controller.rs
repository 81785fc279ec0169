//! Per-ASG replacement controller
//!
//! Runs once per ASG per tick and performs at most one action: place a new
//! spot bid, or swap a fulfilled spot instance in for an on-demand victim.
//! Everything else is deferred to a later tick; the durable tags on spot
//! requests carry the state across ticks.

use crate::asg::AsgView;
use crate::cloud::{AsgOps, Ec2Ops, LaunchSpec, Tag};
use crate::compat;
use crate::error::{Result, SpotctlError};
use crate::sir::{SirTracker, TrackerOutcome, LAUNCHED_FOR_ASG_TAG};
use crate::typeinfo::TypeInfoTable;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// The one action (or none) a controller run performed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TickAction {
    PlacedSpotRequest {
        request_id: String,
        instance_type: String,
        bid_price: f64,
    },
    AttachedSpot {
        spot_instance_id: String,
        replaced_instance_id: String,
    },
    NoAction,
}

pub struct ReplacementController<'a> {
    ec2: &'a dyn Ec2Ops,
    asg_ops: &'a dyn AsgOps,
    types: &'a TypeInfoTable,
    sir_wait_timeout: Duration,
}

impl<'a> ReplacementController<'a> {
    pub fn new(
        ec2: &'a dyn Ec2Ops,
        asg_ops: &'a dyn AsgOps,
        types: &'a TypeInfoTable,
        sir_wait_timeout: Duration,
    ) -> Self {
        Self {
            ec2,
            asg_ops,
            types,
            sir_wait_timeout,
        }
    }

    /// One controller run for one ASG.
    pub async fn run(&self, asg: &AsgView) -> Result<TickAction> {
        let tracker = SirTracker::new(self.ec2, self.sir_wait_timeout);
        let need_replace = asg.need_replace_on_demand_instances();

        if !need_replace {
            // Open bids the group no longer wants filled are withdrawn and
            // terminal requests get their commit marker; a fulfilled request
            // keeps its instance and is deferred until the floor allows the
            // swap again.
            tracker.finalize_idle(asg).await?;
            info!(asg = %asg.name(), "No on-demand instances need replacing");
            return Ok(TickAction::NoAction);
        }

        match tracker.resume(asg).await? {
            TrackerOutcome::Matched(sir) => {
                let spot_id = sir
                    .instance_id
                    .clone()
                    .ok_or_else(|| SpotctlError::SpotRequestIncomplete(sir.id.clone()))?;
                let victim_id = self.swap(asg, &spot_id).await?;
                tracker.tag_complete(&sir.id).await?;
                Ok(TickAction::AttachedSpot {
                    spot_instance_id: spot_id,
                    replaced_instance_id: victim_id,
                })
            }
            TrackerOutcome::WaitForNextTick => {
                info!(asg = %asg.name(), "Outstanding spot request needs more time");
                Ok(TickAction::NoAction)
            }
            TrackerOutcome::NonePending => self.place_bid(asg).await,
        }
    }

    /// Pick a victim, price a compatible spot type and place the bid. The
    /// rest of the lifecycle resumes on a later tick.
    async fn place_bid(&self, asg: &AsgView) -> Result<TickAction> {
        let victim = match asg.victim_on_demand(None) {
            Some(v) => v,
            None => {
                return Err(SpotctlError::InstanceNotFound(format!(
                    "no running on-demand instance in {}",
                    asg.name()
                )))
            }
        };

        let candidate = match compat::cheapest_spot_candidate(
            victim,
            &victim.availability_zone,
            self.types,
            &asg.config,
        ) {
            Some(c) => c,
            None => {
                info!(
                    asg = %asg.name(),
                    instance_type = %victim.instance_type,
                    az = %victim.availability_zone,
                    "No compatible spot candidate below on-demand price"
                );
                return Ok(TickAction::NoAction);
            }
        };

        let on_demand_price = victim
            .type_info
            .as_ref()
            .map(|t| t.pricing.on_demand)
            .unwrap_or(victim.price);
        let bid_price = compat::get_price_to_bid(
            asg.config.bidding_policy,
            on_demand_price,
            candidate.spot_price,
            asg.config.spot_price_buffer_pct,
        );

        let spec = LaunchSpec {
            instance_type: candidate.instance_type.clone(),
            availability_zone: candidate.availability_zone.clone(),
            launch_configuration_name: asg.summary.launch_configuration_name.clone(),
            product_description: asg.config.spot_product_description.clone(),
        };
        let request_id = self.ec2.request_spot_instance(bid_price, &spec).await?;

        let mut tags = vec![Tag::new(LAUNCHED_FOR_ASG_TAG, asg.name())];
        tags.extend(asg.propagated_tags());
        self.ec2.create_tags(&request_id, &tags).await?;

        info!(
            asg = %asg.name(),
            request = %request_id,
            instance_type = %candidate.instance_type,
            az = %candidate.availability_zone,
            bid = bid_price,
            "Placed spot request"
        );
        Ok(TickAction::PlacedSpotRequest {
            request_id,
            instance_type: candidate.instance_type,
            bid_price,
        })
    }

    /// Swap a running spot instance in for an on-demand victim: detach the
    /// victim without substitution, terminate it, attach the spot instance.
    /// The group's max size is raised by one for the duration when it is
    /// already full. Returns the victim's id.
    async fn swap(&self, asg: &AsgView, spot_id: &str) -> Result<String> {
        let spot = self
            .ec2
            .describe_instance(spot_id)
            .await?
            .ok_or_else(|| SpotctlError::InstanceNotFound(format!("spot instance {}", spot_id)))?;

        let victim = asg
            .victim_on_demand(Some(&spot.availability_zone))
            .ok_or_else(|| {
                SpotctlError::InstanceNotFound(format!(
                    "no on-demand instance to replace in {}",
                    asg.name()
                ))
            })?
            .clone();

        info!(
            asg = %asg.name(),
            spot = %spot_id,
            victim = %victim.id,
            az = %spot.availability_zone,
            "Swapping on-demand instance for spot"
        );

        if let Err(e) = self.ec2.create_tags(spot_id, &asg.propagated_tags()).await {
            warn!(instance = %spot_id, "Failed to propagate tags: {}", e);
        }

        let name = asg.name();
        let max_size = asg.summary.max_size;
        let raised = asg.instances.len() as i64 >= max_size;
        if raised {
            self.asg_ops.set_max_size(name, max_size + 1).await?;
        }

        if let Err(e) = self.asg_ops.detach_instance(name, &victim.id, true).await {
            // Nothing happened to the group yet; put the max size back and
            // let the next tick retry from scratch.
            if raised {
                if let Err(restore) = self.asg_ops.set_max_size(name, max_size).await {
                    warn!(asg = %name, "Failed to restore max size: {}", restore);
                }
            }
            return Err(e);
        }

        if let Err(e) = self.ec2.terminate_instance(&victim.id).await {
            // The victim is already detached; it will be reaped separately.
            warn!(instance = %victim.id, "Failed to terminate victim: {}", e);
        }

        let attach_result = self.asg_ops.attach_instance(name, spot_id).await;

        if raised {
            if let Err(e) = self.asg_ops.set_max_size(name, max_size).await {
                warn!(asg = %name, "Failed to restore max size: {}", e);
            }
        }

        attach_result?;
        Ok(victim.id)
    }
}
