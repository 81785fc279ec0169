//! Per-ASG view of the world
//!
//! Rebuilt from the API on every tick: the group's reported membership is
//! intersected with the region catalog and the effective config resolved
//! from defaults and tags. Everything the replacement controller needs to
//! decide on one group lives here.

use crate::catalog::{Instance, InstanceCatalog, Lifecycle};
use crate::cloud::{AsgSummary, Tag};
use crate::conf::{self, EffectiveConfig};
use crate::config::Defaults;
use tracing::debug;

/// Reserved tag prefix never propagated to launched instances.
const RESERVED_TAG_PREFIX: &str = "aws:";

/// Tag always placed on launched spot instances so they can be traced back
/// to the recipe they were cloned from.
pub const LAUNCH_CONFIGURATION_TAG: &str = "LaunchConfigurationName";

#[derive(Debug, Clone)]
pub struct AsgView {
    pub summary: AsgSummary,
    pub instances: InstanceCatalog,
    pub config: EffectiveConfig,
}

impl AsgView {
    /// Build the view for one group from the region catalog and defaults.
    pub fn build(summary: AsgSummary, region_catalog: &InstanceCatalog, defaults: &Defaults) -> Self {
        let instances = region_catalog.subset(&summary.instance_ids);
        let (_, running_total) = instances.running_count(Lifecycle::OnDemand, None);
        let config = conf::resolve(defaults, &summary, running_total);
        debug!(
            asg = %summary.name,
            members = instances.len(),
            min_on_demand = config.min_on_demand,
            "Built ASG view"
        );
        Self {
            summary,
            instances,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.summary.name
    }

    /// Tags copied onto every instance and spot request this controller
    /// launches for the group: the launch configuration marker, plus each
    /// group tag flagged for launch propagation whose key is not reserved.
    pub fn propagated_tags(&self) -> Vec<Tag> {
        let mut tags = Vec::new();
        if let Some(lc) = &self.summary.launch_configuration_name {
            tags.push(Tag::new(LAUNCH_CONFIGURATION_TAG, lc.clone()));
        }
        for tag in &self.summary.tags {
            if tag.propagate_at_launch && !tag.key.starts_with(RESERVED_TAG_PREFIX) {
                tags.push(Tag::new(tag.key.clone(), tag.value.clone()));
            }
        }
        tags
    }

    /// Running on-demand victim, preferring the given AZ.
    pub fn victim_on_demand(&self, preferred_az: Option<&str>) -> Option<&Instance> {
        if let Some(az) = preferred_az {
            if let Some(instance) = self.instances.running_in_az(Lifecycle::OnDemand, az) {
                return Some(instance);
            }
        }
        self.instances.any_running(Lifecycle::OnDemand)
    }

    /// Whether one more on-demand instance can be replaced this tick:
    /// there must be a running on-demand instance, removing it must keep the
    /// group at or above its on-demand floor, and the group must not be
    /// below its desired capacity (a swap never shrinks the group, but while
    /// the group is still scaling up we stay out of the way).
    pub fn need_replace_on_demand_instances(&self) -> bool {
        let (on_demand_running, total_running) =
            self.instances.running_count(Lifecycle::OnDemand, None);

        if on_demand_running == 0 {
            debug!(asg = %self.name(), "No running on-demand instances");
            return false;
        }
        if on_demand_running - 1 < self.config.min_on_demand {
            debug!(
                asg = %self.name(),
                running = on_demand_running,
                floor = self.config.min_on_demand,
                "On-demand floor reached"
            );
            return false;
        }
        if total_running < self.summary.desired_capacity {
            debug!(
                asg = %self.name(),
                running = total_running,
                desired = self.summary.desired_capacity,
                "Group below desired capacity, skipping"
            );
            return false;
        }
        true
    }
}
