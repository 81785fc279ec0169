//! AWS-backed implementations of the cloud capability traits
//!
//! All SDK types are converted to domain structs at this boundary so the
//! controller core never sees an SDK shape. Conversion follows the same
//! pattern as the instance scans elsewhere in the codebase: missing optional
//! fields degrade to defaults, never to panics.

use crate::catalog::{Instance, InstanceState, Lifecycle};
use crate::cloud::{AsgOps, AsgSummary, AsgTag, Ec2Ops, LaunchSpec, Tag};
use crate::error::{Result, SpotctlError};
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use crate::sir::{SirState, SpotRequest};
use crate::typeinfo::{
    NetworkTier, Pricing, StaticPriceOracle, TypeInfo, TypeInfoTable, Virtualization,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{
    Filter, InstanceType, RequestSpotLaunchSpecification, SpotPlacement,
    Tag as Ec2Tag, VirtualizationType,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Build region-scoped clients from the ambient credential chain.
pub async fn connect(region: &str) -> (AwsEc2, AwsAutoScaling) {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;
    (
        AwsEc2 {
            client: aws_sdk_ec2::Client::new(&config),
        },
        AwsAutoScaling {
            client: aws_sdk_autoscaling::Client::new(&config),
        },
    )
}

pub struct AwsEc2 {
    client: aws_sdk_ec2::Client,
}

pub struct AwsAutoScaling {
    client: aws_sdk_autoscaling::Client,
}

fn convert_instance(instance: &aws_sdk_ec2::types::Instance) -> Instance {
    let tags = instance
        .tags()
        .iter()
        .filter_map(|t| {
            t.key()
                .zip(t.value())
                .map(|(k, v)| Tag::new(k.to_string(), v.to_string()))
        })
        .collect();

    Instance {
        id: instance.instance_id().unwrap_or_default().to_string(),
        instance_type: instance
            .instance_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        availability_zone: instance
            .placement()
            .and_then(|p| p.availability_zone())
            .unwrap_or_default()
            .to_string(),
        lifecycle: Lifecycle::parse(instance.instance_lifecycle().map(|l| l.as_str())),
        state: InstanceState::parse(
            instance
                .state()
                .and_then(|s| s.name())
                .map(|n| n.as_str())
                .unwrap_or("unknown"),
        ),
        tags,
        launch_time: instance
            .launch_time()
            .and_then(|lt| DateTime::<Utc>::from_timestamp(lt.secs(), 0)),
        price: 0.0,
        type_info: None,
    }
}

fn convert_spot_request(sir: &aws_sdk_ec2::types::SpotInstanceRequest) -> SpotRequest {
    SpotRequest {
        id: sir.spot_instance_request_id().unwrap_or_default().to_string(),
        state: SirState::parse(sir.state().map(|s| s.as_str()).unwrap_or("failed")),
        status_code: sir.status().and_then(|s| s.code()).map(str::to_string),
        instance_id: sir.instance_id().map(str::to_string),
        tags: sir
            .tags()
            .iter()
            .filter_map(|t| {
                t.key()
                    .zip(t.value())
                    .map(|(k, v)| Tag::new(k.to_string(), v.to_string()))
            })
            .collect(),
    }
}

impl AwsEc2 {
    /// The region-wide scan is the most throttle-prone call of a tick, so
    /// it gets the cloud API retry policy.
    async fn describe_instances_once(&self) -> Result<Vec<Instance>> {
        let mut out = Vec::new();
        let mut pages = self
            .client
            .describe_instances()
            .into_paginator()
            .items()
            .send();
        while let Some(reservation) = pages.next().await {
            let reservation =
                reservation.map_err(|e| SpotctlError::ec2("DescribeInstances", e))?;
            for instance in reservation.instances() {
                out.push(convert_instance(instance));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Ec2Ops for AwsEc2 {
    async fn describe_instances(&self) -> Result<Vec<Instance>> {
        ExponentialBackoffPolicy::for_cloud_api()
            .execute_with_retry(|| self.describe_instances_once())
            .await
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        let response = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await;
        match response {
            Ok(output) => Ok(output
                .reservations()
                .iter()
                .flat_map(|r| r.instances())
                .find(|i| i.instance_id() == Some(instance_id))
                .map(convert_instance)),
            Err(e) => {
                let service_err = e.into_service_error();
                // A terminated-and-expired instance id is reported as an
                // error, not an empty result.
                if service_err
                    .code()
                    .map_or(false, |c| c.starts_with("InvalidInstanceID"))
                {
                    return Ok(None);
                }
                Err(SpotctlError::ec2("DescribeInstances", service_err))
            }
        }
    }

    async fn describe_spot_requests_tagged(
        &self,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Vec<SpotRequest>> {
        let output = self
            .client
            .describe_spot_instance_requests()
            .filters(
                Filter::builder()
                    .name(format!("tag:{}", tag_key))
                    .values(tag_value)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| SpotctlError::ec2("DescribeSpotInstanceRequests", e))?;
        Ok(output
            .spot_instance_requests()
            .iter()
            .map(convert_spot_request)
            .collect())
    }

    async fn describe_spot_request(&self, request_id: &str) -> Result<SpotRequest> {
        let output = self
            .client
            .describe_spot_instance_requests()
            .spot_instance_request_ids(request_id)
            .send()
            .await
            .map_err(|e| SpotctlError::ec2("DescribeSpotInstanceRequests", e))?;
        output
            .spot_instance_requests()
            .first()
            .map(convert_spot_request)
            .ok_or_else(|| {
                SpotctlError::ec2(
                    "DescribeSpotInstanceRequests",
                    format!("spot request {} not found", request_id),
                )
            })
    }

    async fn request_spot_instance(&self, bid_price: f64, spec: &LaunchSpec) -> Result<String> {
        // Image, user-data and security groups come from the group's launch
        // configuration, resolved by the cloning collaborator upstream of
        // this call; only type and placement are decided here.
        let launch_spec = RequestSpotLaunchSpecification::builder()
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .placement(
                SpotPlacement::builder()
                    .availability_zone(&spec.availability_zone)
                    .build(),
            )
            .build();

        let output = self
            .client
            .request_spot_instances()
            .spot_price(format!("{:.6}", bid_price))
            .instance_count(1)
            .launch_specification(launch_spec)
            .send()
            .await
            .map_err(|e| SpotctlError::ec2("RequestSpotInstances", e))?;

        output
            .spot_instance_requests()
            .first()
            .and_then(|sir| sir.spot_instance_request_id())
            .map(str::to_string)
            .ok_or_else(|| {
                SpotctlError::ec2("RequestSpotInstances", "no spot request id in response")
            })
    }

    async fn cancel_spot_request(&self, request_id: &str) -> Result<()> {
        self.client
            .cancel_spot_instance_requests()
            .spot_instance_request_ids(request_id)
            .send()
            .await
            .map_err(|e| SpotctlError::ec2("CancelSpotInstanceRequests", e))?;
        Ok(())
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut request = self.client.create_tags().resources(resource_id);
        for tag in tags {
            request = request.tags(Ec2Tag::builder().key(&tag.key).value(&tag.value).build());
        }
        request
            .send()
            .await
            .map_err(|e| SpotctlError::ec2("CreateTags", e))?;
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        self.client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| SpotctlError::ec2("TerminateInstances", e))?;
        Ok(())
    }
}

impl AwsEc2 {
    /// Load the hardware side of the type table from the API.
    pub async fn load_type_table(&self) -> Result<TypeInfoTable> {
        let mut table = TypeInfoTable::new();
        let mut pages = self
            .client
            .describe_instance_types()
            .into_paginator()
            .items()
            .send();
        while let Some(item) = pages.next().await {
            let info = item.map_err(|e| SpotctlError::ec2("DescribeInstanceTypes", e))?;

            let instance_type = match info.instance_type() {
                Some(t) => t.as_str().to_string(),
                None => continue,
            };
            let virtualization = if info
                .supported_virtualization_types()
                .contains(&VirtualizationType::Hvm)
            {
                Virtualization::Hvm
            } else {
                Virtualization::Pv
            };
            let gpu_count = info
                .gpu_info()
                .map(|g| g.gpus().iter().filter_map(|gpu| gpu.count()).sum::<i32>())
                .unwrap_or(0) as i64;

            table.insert(TypeInfo {
                instance_type,
                vcpu: info
                    .v_cpu_info()
                    .and_then(|v| v.default_v_cpus())
                    .unwrap_or(0) as i64,
                memory_gib: info
                    .memory_info()
                    .and_then(|m| m.size_in_mib())
                    .map(|mib| mib as f64 / 1024.0)
                    .unwrap_or(0.0),
                instance_storage_gib: info
                    .instance_storage_info()
                    .and_then(|s| s.total_size_in_gb())
                    .unwrap_or(0) as f64,
                gpu_count,
                virtualization,
                ebs_only: !info.instance_storage_supported().unwrap_or(false),
                network: NetworkTier::parse(
                    info.network_info()
                        .and_then(|n| n.network_performance())
                        .unwrap_or(""),
                ),
                pricing: Pricing::default(),
            });
        }
        debug!(types = table.len(), "Loaded instance type table");
        Ok(table)
    }

    /// Build a price oracle from current spot price history plus the
    /// built-in on-demand list price table.
    pub async fn build_price_oracle(
        &self,
        product_description: &str,
    ) -> Result<StaticPriceOracle> {
        let mut oracle = StaticPriceOracle::new().with_builtin_on_demand();

        let mut latest: HashMap<(String, String), f64> = HashMap::new();
        let mut pages = self
            .client
            .describe_spot_price_history()
            .product_descriptions(product_description)
            .start_time(aws_sdk_ec2::primitives::DateTime::from(
                std::time::SystemTime::now(),
            ))
            .into_paginator()
            .items()
            .send();
        while let Some(item) = pages.next().await {
            let price = item.map_err(|e| SpotctlError::ec2("DescribeSpotPriceHistory", e))?;
            let (ty, az, value) = match (
                price.instance_type(),
                price.availability_zone(),
                price.spot_price().and_then(|p| p.parse::<f64>().ok()),
            ) {
                (Some(t), Some(a), Some(v)) => (t.as_str().to_string(), a.to_string(), v),
                _ => continue,
            };
            // History is returned newest first; keep the first price seen
            // per (type, AZ).
            latest.entry((ty, az)).or_insert(value);
        }

        for ((ty, az), price) in latest {
            oracle.set_spot(&ty, &az, price);
        }
        Ok(oracle)
    }
}

fn convert_group(group: &aws_sdk_autoscaling::types::AutoScalingGroup) -> AsgSummary {
    AsgSummary {
        name: group.auto_scaling_group_name().unwrap_or_default().to_string(),
        min_size: group.min_size().unwrap_or(0) as i64,
        max_size: group.max_size().unwrap_or(0) as i64,
        desired_capacity: group.desired_capacity().unwrap_or(0) as i64,
        availability_zones: group.availability_zones().to_vec(),
        launch_configuration_name: group.launch_configuration_name().map(str::to_string),
        instance_ids: group
            .instances()
            .iter()
            .filter_map(|i| i.instance_id())
            .map(str::to_string)
            .collect(),
        tags: group
            .tags()
            .iter()
            .filter_map(|t| {
                t.key().zip(t.value()).map(|(k, v)| AsgTag {
                    key: k.to_string(),
                    value: v.to_string(),
                    propagate_at_launch: t.propagate_at_launch().unwrap_or(false),
                })
            })
            .collect(),
    }
}

impl AwsAutoScaling {
    async fn describe_groups_once(&self) -> Result<Vec<AsgSummary>> {
        let mut out = Vec::new();
        let mut pages = self
            .client
            .describe_auto_scaling_groups()
            .into_paginator()
            .items()
            .send();
        while let Some(group) = pages.next().await {
            let group = group
                .map_err(|e| SpotctlError::autoscaling("DescribeAutoScalingGroups", e))?;
            out.push(convert_group(&group));
        }
        Ok(out)
    }
}

#[async_trait]
impl AsgOps for AwsAutoScaling {
    async fn describe_groups(&self) -> Result<Vec<AsgSummary>> {
        ExponentialBackoffPolicy::for_cloud_api()
            .execute_with_retry(|| self.describe_groups_once())
            .await
    }

    async fn detach_instance(
        &self,
        asg_name: &str,
        instance_id: &str,
        decrement_capacity: bool,
    ) -> Result<()> {
        self.client
            .detach_instances()
            .auto_scaling_group_name(asg_name)
            .instance_ids(instance_id)
            .should_decrement_desired_capacity(decrement_capacity)
            .send()
            .await
            .map_err(|e| SpotctlError::autoscaling("DetachInstances", e))?;
        Ok(())
    }

    async fn attach_instance(&self, asg_name: &str, instance_id: &str) -> Result<()> {
        self.client
            .attach_instances()
            .auto_scaling_group_name(asg_name)
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| SpotctlError::autoscaling("AttachInstances", e))?;
        Ok(())
    }

    async fn set_max_size(&self, asg_name: &str, max_size: i64) -> Result<()> {
        if max_size < 0 || max_size > i32::MAX as i64 {
            warn!(asg = %asg_name, "Refusing out-of-range max size {}", max_size);
            return Err(SpotctlError::Validation {
                field: "max_size".to_string(),
                reason: format!("{} out of range", max_size),
            });
        }
        self.client
            .update_auto_scaling_group()
            .auto_scaling_group_name(asg_name)
            .max_size(max_size as i32)
            .send()
            .await
            .map_err(|e| SpotctlError::autoscaling("UpdateAutoScalingGroup", e))?;
        Ok(())
    }
}
