//! Capability interfaces over the cloud control plane
//!
//! The controller core speaks these narrow traits instead of SDK clients.
//! Production wires them to EC2 and AutoScaling in `aws`; tests inject
//! in-memory fakes. Clients behind the traits are shared read-only across
//! the ASG tasks of a region.

use crate::catalog::Instance;
use crate::error::Result;
use crate::sir::SpotRequest;
use async_trait::async_trait;

/// A plain key/value tag on an EC2 resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A tag on an Auto Scaling group, with its launch propagation flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsgTag {
    pub key: String,
    pub value: String,
    pub propagate_at_launch: bool,
}

/// One Auto Scaling group as reported by the API.
#[derive(Debug, Clone)]
pub struct AsgSummary {
    pub name: String,
    pub min_size: i64,
    pub max_size: i64,
    pub desired_capacity: i64,
    pub availability_zones: Vec<String>,
    pub launch_configuration_name: Option<String>,
    pub instance_ids: Vec<String>,
    pub tags: Vec<AsgTag>,
}

impl AsgSummary {
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// What gets launched when a spot bid is fulfilled. The full launch recipe
/// (image, user-data, security groups) is cloned from the group's launch
/// configuration by the requester implementation.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub instance_type: String,
    pub availability_zone: String,
    pub launch_configuration_name: Option<String>,
    pub product_description: String,
}

/// EC2-side capabilities the controller needs.
#[async_trait]
pub trait Ec2Ops: Send + Sync {
    /// All instances in the region, for the catalog.
    async fn describe_instances(&self) -> Result<Vec<Instance>>;

    /// A single instance by id, or None if it no longer exists.
    async fn describe_instance(&self, instance_id: &str) -> Result<Option<Instance>>;

    /// All spot requests carrying the given tag.
    async fn describe_spot_requests_tagged(
        &self,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Vec<SpotRequest>>;

    /// Refresh one spot request.
    async fn describe_spot_request(&self, request_id: &str) -> Result<SpotRequest>;

    /// Place a spot bid; returns the new request id.
    async fn request_spot_instance(&self, bid_price: f64, spec: &LaunchSpec) -> Result<String>;

    /// Cancel an outstanding spot request.
    async fn cancel_spot_request(&self, request_id: &str) -> Result<()>;

    /// Create tags on an instance or spot request.
    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()>;

    /// Terminate an instance.
    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;
}

/// AutoScaling-side capabilities the controller needs.
#[async_trait]
pub trait AsgOps: Send + Sync {
    /// All groups in the region, with tags and membership.
    async fn describe_groups(&self) -> Result<Vec<AsgSummary>>;

    /// Detach an instance. With `decrement_capacity` the group will not
    /// launch a substitute for it.
    async fn detach_instance(
        &self,
        asg_name: &str,
        instance_id: &str,
        decrement_capacity: bool,
    ) -> Result<()>;

    /// Attach a running instance to the group.
    async fn attach_instance(&self, asg_name: &str, instance_id: &str) -> Result<()>;

    /// Update the group's maximum size.
    async fn set_max_size(&self, asg_name: &str, max_size: i64) -> Result<()>;
}
