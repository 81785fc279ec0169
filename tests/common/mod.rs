//! Shared test fixtures: in-memory fakes of the cloud capability traits
//! and builders for instances, groups and type tables.

#![allow(dead_code)]

use async_trait::async_trait;
use spotctl::catalog::{Instance, InstanceCatalog, InstanceState, Lifecycle};
use spotctl::cloud::{AsgOps, AsgSummary, AsgTag, Ec2Ops, LaunchSpec, Tag};
use spotctl::config::Defaults;
use spotctl::error::{Result, SpotctlError};
use spotctl::sir::{SirState, SpotRequest};
use spotctl::typeinfo::{NetworkTier, Pricing, TypeInfo, TypeInfoTable, Virtualization};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// In-memory EC2 fake. State mutates the way the real API would: spot
/// requests accumulate tags, terminated instances change state.
#[derive(Default)]
pub struct FakeEc2 {
    pub instances: Mutex<HashMap<String, Instance>>,
    pub spot_requests: Mutex<Vec<SpotRequest>>,
    pub created_tags: Mutex<Vec<(String, Vec<Tag>)>>,
    pub terminated: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
    pub launch_specs: Mutex<Vec<(f64, LaunchSpec)>>,
    next_request_id: Mutex<u32>,
}

impl FakeEc2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&self, instance: Instance) {
        self.instances
            .lock()
            .unwrap()
            .insert(instance.id.clone(), instance);
    }

    pub fn add_spot_request(&self, sir: SpotRequest) {
        self.spot_requests.lock().unwrap().push(sir);
    }

    /// Flip a request to active/fulfilled with the given instance.
    pub fn fulfil_request(&self, request_id: &str, instance_id: &str) {
        let mut requests = self.spot_requests.lock().unwrap();
        let sir = requests
            .iter_mut()
            .find(|s| s.id == request_id)
            .expect("unknown spot request");
        sir.state = SirState::Active;
        sir.status_code = Some("fulfilled".to_string());
        sir.instance_id = Some(instance_id.to_string());
    }

    pub fn request_ids(&self) -> Vec<String> {
        self.spot_requests
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn request(&self, request_id: &str) -> SpotRequest {
        self.spot_requests
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == request_id)
            .expect("unknown spot request")
            .clone()
    }

    pub fn all_instances(&self) -> Vec<Instance> {
        self.instances.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl Ec2Ops for FakeEc2 {
    async fn describe_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.all_instances())
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        Ok(self.instances.lock().unwrap().get(instance_id).cloned())
    }

    async fn describe_spot_requests_tagged(
        &self,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Vec<SpotRequest>> {
        Ok(self
            .spot_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.tag_value(tag_key) == Some(tag_value))
            .cloned()
            .collect())
    }

    async fn describe_spot_request(&self, request_id: &str) -> Result<SpotRequest> {
        self.spot_requests
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == request_id)
            .cloned()
            .ok_or_else(|| SpotctlError::ec2("DescribeSpotInstanceRequests", "not found"))
    }

    async fn request_spot_instance(&self, bid_price: f64, spec: &LaunchSpec) -> Result<String> {
        let mut next = self.next_request_id.lock().unwrap();
        *next += 1;
        let id = format!("sir-{:08}", *next);
        self.launch_specs
            .lock()
            .unwrap()
            .push((bid_price, spec.clone()));
        self.spot_requests.lock().unwrap().push(SpotRequest {
            id: id.clone(),
            state: SirState::Open,
            status_code: Some("pending-evaluation".to_string()),
            instance_id: None,
            tags: Vec::new(),
        });
        Ok(id)
    }

    async fn cancel_spot_request(&self, request_id: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(request_id.to_string());
        let mut requests = self.spot_requests.lock().unwrap();
        if let Some(sir) = requests.iter_mut().find(|s| s.id == request_id) {
            sir.state = SirState::Cancelled;
        }
        Ok(())
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()> {
        self.created_tags
            .lock()
            .unwrap()
            .push((resource_id.to_string(), tags.to_vec()));

        let mut requests = self.spot_requests.lock().unwrap();
        if let Some(sir) = requests.iter_mut().find(|s| s.id == resource_id) {
            for tag in tags {
                sir.tags.retain(|t| t.key != tag.key);
                sir.tags.push(tag.clone());
            }
        }
        drop(requests);

        let mut instances = self.instances.lock().unwrap();
        if let Some(instance) = instances.get_mut(resource_id) {
            for tag in tags {
                instance.tags.retain(|t| t.key != tag.key);
                instance.tags.push(tag.clone());
            }
        }
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        self.terminated.lock().unwrap().push(instance_id.to_string());
        if let Some(instance) = self.instances.lock().unwrap().get_mut(instance_id) {
            instance.state = InstanceState::Terminated;
        }
        Ok(())
    }
}

/// In-memory AutoScaling fake with configurable detach failure.
#[derive(Default)]
pub struct FakeAsg {
    pub groups: Mutex<Vec<AsgSummary>>,
    pub detached: Mutex<Vec<(String, String, bool)>>,
    pub attached: Mutex<Vec<(String, String)>>,
    pub max_size_updates: Mutex<Vec<(String, i64)>>,
    pub fail_detach: Mutex<bool>,
}

impl FakeAsg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&self, group: AsgSummary) {
        self.groups.lock().unwrap().push(group);
    }

    pub fn group(&self, name: &str) -> AsgSummary {
        self.groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.name == name)
            .expect("unknown group")
            .clone()
    }
}

#[async_trait]
impl AsgOps for FakeAsg {
    async fn describe_groups(&self) -> Result<Vec<AsgSummary>> {
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn detach_instance(
        &self,
        asg_name: &str,
        instance_id: &str,
        decrement_capacity: bool,
    ) -> Result<()> {
        if *self.fail_detach.lock().unwrap() {
            return Err(SpotctlError::autoscaling("DetachInstances", "detach refused"));
        }
        self.detached.lock().unwrap().push((
            asg_name.to_string(),
            instance_id.to_string(),
            decrement_capacity,
        ));
        let mut groups = self.groups.lock().unwrap();
        if let Some(group) = groups.iter_mut().find(|g| g.name == asg_name) {
            group.instance_ids.retain(|id| id != instance_id);
            if decrement_capacity {
                group.desired_capacity -= 1;
            }
        }
        Ok(())
    }

    async fn attach_instance(&self, asg_name: &str, instance_id: &str) -> Result<()> {
        self.attached
            .lock()
            .unwrap()
            .push((asg_name.to_string(), instance_id.to_string()));
        let mut groups = self.groups.lock().unwrap();
        if let Some(group) = groups.iter_mut().find(|g| g.name == asg_name) {
            group.instance_ids.push(instance_id.to_string());
            group.desired_capacity += 1;
        }
        Ok(())
    }

    async fn set_max_size(&self, asg_name: &str, max_size: i64) -> Result<()> {
        self.max_size_updates
            .lock()
            .unwrap()
            .push((asg_name.to_string(), max_size));
        let mut groups = self.groups.lock().unwrap();
        if let Some(group) = groups.iter_mut().find(|g| g.name == asg_name) {
            group.max_size = max_size;
        }
        Ok(())
    }
}

pub fn instance(id: &str, ty: &str, az: &str, lifecycle: Lifecycle, state: InstanceState) -> Instance {
    Instance {
        id: id.to_string(),
        instance_type: ty.to_string(),
        availability_zone: az.to_string(),
        lifecycle,
        state,
        tags: Vec::new(),
        launch_time: None,
        price: 0.0,
        type_info: None,
    }
}

pub fn running_on_demand(id: &str, ty: &str, az: &str) -> Instance {
    instance(id, ty, az, Lifecycle::OnDemand, InstanceState::Running)
}

pub fn running_spot(id: &str, ty: &str, az: &str) -> Instance {
    instance(id, ty, az, Lifecycle::Spot, InstanceState::Running)
}

pub fn type_info(ty: &str, vcpu: i64, memory_gib: f64, on_demand: f64) -> TypeInfo {
    TypeInfo {
        instance_type: ty.to_string(),
        vcpu,
        memory_gib,
        instance_storage_gib: 0.0,
        gpu_count: 0,
        virtualization: Virtualization::Hvm,
        ebs_only: true,
        network: NetworkTier::Moderate,
        pricing: Pricing {
            on_demand,
            spot: HashMap::new(),
        },
    }
}

pub fn with_spot_price(mut info: TypeInfo, az: &str, price: f64) -> TypeInfo {
    info.pricing.spot.insert(az.to_string(), price);
    info
}

pub fn table(types: Vec<TypeInfo>) -> TypeInfoTable {
    let mut out = TypeInfoTable::new();
    for t in types {
        out.insert(t);
    }
    out
}

pub fn asg_tag(key: &str, value: &str) -> AsgTag {
    AsgTag {
        key: key.to_string(),
        value: value.to_string(),
        propagate_at_launch: false,
    }
}

pub fn group(
    name: &str,
    max_size: i64,
    desired: i64,
    instance_ids: Vec<&str>,
    tags: Vec<AsgTag>,
) -> AsgSummary {
    AsgSummary {
        name: name.to_string(),
        min_size: 0,
        max_size,
        desired_capacity: desired,
        availability_zones: vec!["us-east-1a".to_string(), "us-east-1b".to_string()],
        launch_configuration_name: Some(format!("{}-lc", name)),
        instance_ids: instance_ids.into_iter().map(str::to_string).collect(),
        tags,
    }
}

/// Defaults with a wait deadline short enough for timeout tests.
pub fn test_defaults() -> Defaults {
    Defaults {
        sir_wait_timeout: Duration::from_millis(50),
        ..Defaults::default()
    }
}

/// Rebuild an ASG view from the fakes' current state, the way a fresh tick
/// would observe it.
pub fn rebuild_view(
    ec2: &FakeEc2,
    asg: &FakeAsg,
    group_name: &str,
    types: &TypeInfoTable,
    defaults: &Defaults,
) -> spotctl::asg::AsgView {
    let catalog = InstanceCatalog::decorate(ec2.all_instances(), types);
    spotctl::asg::AsgView::build(asg.group(group_name), &catalog, defaults)
}
