//! Per-region tick worker
//!
//! Builds the region's instance catalog once, discovers the opted-in ASGs
//! and processes each one as an independent task. Work within one ASG is
//! strictly sequential; ASGs run in parallel. Per-ASG errors are collected
//! into the tick report, never propagated out of the region.

use crate::asg::AsgView;
use crate::catalog::InstanceCatalog;
use crate::cloud::{AsgOps, AsgSummary, Ec2Ops};
use crate::config::{Defaults, TagFilter};
use crate::controller::{ReplacementController, TickAction};
use crate::error::{Result, SpotctlError};
use crate::typeinfo::TypeInfoTable;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of processing one ASG.
#[derive(Debug, Clone, Serialize)]
pub struct AsgResult {
    pub asg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<TickAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one region tick, printed as JSON by the driver.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub region: String,
    pub started_at: DateTime<Utc>,
    pub asgs_processed: usize,
    pub errors: usize,
    pub results: Vec<AsgResult>,
}

/// An ASG is opted in when it matches every configured tag filter.
pub fn matches_tag_filters(asg: &AsgSummary, filters: &[TagFilter]) -> bool {
    filters
        .iter()
        .all(|f| asg.tag_value(&f.key) == Some(f.value.as_str()))
}

pub struct RegionWorker {
    pub region: String,
    pub ec2: Arc<dyn Ec2Ops>,
    pub asg_ops: Arc<dyn AsgOps>,
    pub types: Arc<TypeInfoTable>,
    pub defaults: Arc<Defaults>,
}

impl RegionWorker {
    /// One tick over the region. Fails only when the region-wide scans
    /// fail; per-ASG problems land in the report.
    pub async fn run_tick(&self) -> Result<TickReport> {
        let started_at = Utc::now();

        let raw_instances = self.ec2.describe_instances().await?;
        let catalog = Arc::new(InstanceCatalog::decorate(raw_instances, &self.types));
        info!(
            region = %self.region,
            instances = catalog.len(),
            "Built region instance catalog"
        );

        let groups = self.asg_ops.describe_groups().await?;
        let enabled: Vec<AsgSummary> = groups
            .into_iter()
            .filter(|g| matches_tag_filters(g, &self.defaults.tag_filters))
            .collect();
        info!(
            region = %self.region,
            enabled = enabled.len(),
            "Discovered opted-in Auto Scaling groups"
        );

        let mut handles = Vec::with_capacity(enabled.len());
        for summary in enabled {
            let ec2 = Arc::clone(&self.ec2);
            let asg_ops = Arc::clone(&self.asg_ops);
            let types = Arc::clone(&self.types);
            let defaults = Arc::clone(&self.defaults);
            let catalog = Arc::clone(&catalog);

            handles.push(tokio::spawn(async move {
                let name = summary.name.clone();
                let view = AsgView::build(summary, &catalog, &defaults);
                let controller = ReplacementController::new(
                    ec2.as_ref(),
                    asg_ops.as_ref(),
                    &types,
                    defaults.sir_wait_timeout,
                );
                let outcome =
                    tokio::time::timeout(defaults.asg_timeout, controller.run(&view)).await;
                match outcome {
                    Ok(result) => (name, result),
                    Err(_) => (name.clone(), Err(SpotctlError::DeadlineExceeded(name))),
                }
            }));
        }

        let mut results = Vec::new();
        let mut errors = 0;
        for handle in handles {
            match handle.await {
                Ok((asg, Ok(action))) => {
                    results.push(AsgResult {
                        asg,
                        action: Some(action),
                        error: None,
                    });
                }
                Ok((asg, Err(e))) => {
                    warn!(region = %self.region, asg = %asg, "ASG processing failed: {}", e);
                    errors += 1;
                    results.push(AsgResult {
                        asg,
                        action: None,
                        error: Some(e.to_string()),
                    });
                }
                Err(e) => {
                    error!(region = %self.region, "ASG task panicked: {}", e);
                    errors += 1;
                    results.push(AsgResult {
                        asg: "<unknown>".to_string(),
                        action: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(TickReport {
            region: self.region.clone(),
            started_at,
            asgs_processed: results.len(),
            errors,
            results,
        })
    }
}
