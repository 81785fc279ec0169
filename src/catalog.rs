//! Region instance catalog
//!
//! A per-tick snapshot of every instance in a region, decorated with type
//! metadata and an effective hourly price. The catalog is built once per
//! region and then read-only; ASG views borrow subsets of it by membership.

use crate::cloud::Tag;
use crate::typeinfo::{TypeInfo, TypeInfoTable};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Billing lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    OnDemand,
    Spot,
}

impl Lifecycle {
    /// The API only reports a lifecycle for spot (and scheduled) instances;
    /// absence means on-demand.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("spot") => Lifecycle::Spot,
            _ => Lifecycle::OnDemand,
        }
    }
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Terminated,
    Unknown,
}

impl InstanceState {
    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "shutting-down" => InstanceState::ShuttingDown,
            "stopping" => InstanceState::Stopping,
            "stopped" => InstanceState::Stopped,
            "terminated" => InstanceState::Terminated,
            _ => InstanceState::Unknown,
        }
    }
}

/// One instance as observed from the API, never mutated locally.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub instance_type: String,
    pub availability_zone: String,
    pub lifecycle: Lifecycle,
    pub state: InstanceState,
    pub tags: Vec<Tag>,
    pub launch_time: Option<DateTime<Utc>>,
    /// Effective hourly price: the spot price in this instance's AZ for spot
    /// instances, the on-demand list price otherwise. Zero when unknown.
    pub price: f64,
    pub type_info: Option<TypeInfo>,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    pub fn is_spot(&self) -> bool {
        self.lifecycle == Lifecycle::Spot
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Mapping of instance id to instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceCatalog {
    instances: HashMap<String, Instance>,
}

impl InstanceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from raw API instances, attaching type metadata and
    /// computing each instance's effective price.
    pub fn decorate(raw: Vec<Instance>, types: &TypeInfoTable) -> Self {
        let mut catalog = Self::new();
        for mut instance in raw {
            if let Some(info) = types.get(&instance.instance_type) {
                instance.price = match instance.lifecycle {
                    Lifecycle::Spot => info
                        .spot_price_in(&instance.availability_zone)
                        .unwrap_or(0.0),
                    Lifecycle::OnDemand => info.pricing.on_demand,
                };
                instance.type_info = Some(info.clone());
            }
            catalog.insert(instance);
        }
        catalog
    }

    pub fn insert(&mut self, instance: Instance) {
        self.instances.insert(instance.id.clone(), instance);
    }

    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Intersect with an ASG's reported membership. Ids missing from the
    /// catalog are skipped; those instances are still being born.
    pub fn subset(&self, ids: &[String]) -> InstanceCatalog {
        let mut out = Self::new();
        for id in ids {
            if let Some(instance) = self.instances.get(id) {
                out.insert(instance.clone());
            }
        }
        out
    }

    /// Count running instances with the given lifecycle, optionally limited
    /// to one AZ. Returns `(matching, total_running)`.
    pub fn running_count(&self, lifecycle: Lifecycle, az: Option<&str>) -> (i64, i64) {
        let mut matching = 0;
        let mut total = 0;
        for instance in self.instances.values() {
            if !instance.is_running() {
                continue;
            }
            total += 1;
            if instance.lifecycle == lifecycle
                && az.map_or(true, |az| instance.availability_zone == az)
            {
                matching += 1;
            }
        }
        (matching, total)
    }

    /// First running instance with the given lifecycle in the given AZ.
    pub fn running_in_az(&self, lifecycle: Lifecycle, az: &str) -> Option<&Instance> {
        self.instances
            .values()
            .find(|i| i.is_running() && i.lifecycle == lifecycle && i.availability_zone == az)
    }

    /// Any running instance with the given lifecycle.
    pub fn any_running(&self, lifecycle: Lifecycle) -> Option<&Instance> {
        self.instances
            .values()
            .find(|i| i.is_running() && i.lifecycle == lifecycle)
    }
}
