use anyhow::Result;
use clap::Parser;
use spotctl::aws;
use spotctl::config::{Cli, Defaults};
use spotctl::error::{ConfigError, SpotctlError};
use spotctl::exit_codes::{codes, exit_code_for_error};
use spotctl::region::{RegionWorker, TickReport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Suppress INFO by default; --verbose turns on debug logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if cli.regions.is_empty() {
        let err = SpotctlError::Config(ConfigError::NoRegions);
        error!("{}", err);
        std::process::exit(exit_code_for_error(&err));
    }

    let defaults = Arc::new(Defaults::from_cli(&cli));

    // One worker per region; regions run in parallel and report
    // independently.
    let mut handles = Vec::with_capacity(cli.regions.len());
    for region in cli.regions.clone() {
        let defaults = Arc::clone(&defaults);
        handles.push(tokio::spawn(async move {
            run_region(region, defaults).await
        }));
    }

    // Per-ASG errors stay inside the reports, but a region that fails to
    // initialize at all (unknown region, missing credentials) makes the
    // invocation exit non-zero.
    let mut reports: Vec<TickReport> = Vec::new();
    let mut failure_code: Option<i32> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err((region, e))) => {
                error!(region = %region, "Region tick failed: {}", e);
                failure_code.get_or_insert(exit_code_for_error(&e));
            }
            Err(e) => {
                error!("Region task panicked: {}", e);
                failure_code.get_or_insert(codes::SYSTEM_ERROR);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    info!(regions = reports.len(), "Tick finished");
    std::process::exit(failure_code.unwrap_or(codes::SUCCESS));
}

async fn run_region(
    region: String,
    defaults: Arc<Defaults>,
) -> std::result::Result<TickReport, (String, SpotctlError)> {
    let (ec2, asg_ops) = aws::connect(&region).await;

    let oracle = ec2
        .build_price_oracle(&defaults.spot_product_description)
        .await
        .map_err(|e| (region.clone(), e))?;
    let types = ec2
        .load_type_table()
        .await
        .map_err(|e| (region.clone(), e))?;

    let azs = oracle.spot_azs();
    let types = Arc::new(types.with_pricing(&oracle, &azs));

    let worker = RegionWorker {
        region: region.clone(),
        ec2: Arc::new(ec2),
        asg_ops: Arc::new(asg_ops),
        types,
        defaults,
    };
    worker.run_tick().await.map_err(|e| (region, e))
}
