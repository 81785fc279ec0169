//! Process-level defaults from CLI flags and environment variables.
//!
//! Every knob has both a flag and an environment variable so the binary can
//! run unchanged as a CLI, a cron job, or a Lambda-style scheduled task.
//! Per-ASG overrides layered on top of these defaults live in `conf`.

use clap::Parser;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Default opt-in marker: an ASG must carry this tag to be processed.
pub const DEFAULT_TAG_FILTERS: &str = "spot-enabled=true";

/// Fallback minimum on-demand count when nothing valid is configured.
pub const DEFAULT_MIN_ON_DEMAND: i64 = 0;

#[derive(Parser, Debug, Clone)]
#[command(name = "spotctl")]
#[command(about = "Replace on-demand instances in Auto Scaling Groups with cheaper spot instances", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Regions to process (comma separated)
    #[arg(long, env = "REGIONS", value_delimiter = ',')]
    pub regions: Vec<String>,

    /// Opt-in tag filters, comma separated key=value pairs; an ASG must match all of them
    #[arg(long, env = "TAG_FILTERS", default_value = DEFAULT_TAG_FILTERS)]
    pub tag_filters: String,

    /// Default minimum number of on-demand instances to keep per ASG (0 = unset)
    #[arg(long, env = "MIN_ON_DEMAND_NUMBER", default_value_t = 0)]
    pub min_on_demand_number: i64,

    /// Default minimum percentage of on-demand instances to keep per ASG (0 = unset)
    #[arg(long, env = "MIN_ON_DEMAND_PERCENTAGE", default_value_t = 0.0)]
    pub min_on_demand_percentage: f64,

    /// Multiplier applied to on-demand prices before comparing against spot
    #[arg(long, env = "ON_DEMAND_PRICE_MULTIPLIER", default_value_t = 1.0)]
    pub on_demand_price_multiplier: f64,

    /// Spot product description used when requesting spot instances
    #[arg(long, env = "SPOT_PRODUCT_DESCRIPTION", default_value = "Linux/UNIX (Amazon VPC)")]
    pub spot_product_description: String,

    /// Percentage added on top of the current spot price for aggressive bids
    #[arg(long, env = "SPOT_PRICE_BUFFER_PERCENTAGE", default_value_t = 10.0)]
    pub spot_price_buffer_percentage: f64,

    /// Bidding policy: normal (bid on-demand price) or aggressive (spot + buffer)
    #[arg(long, env = "BIDDING_POLICY", default_value = "normal")]
    pub bidding_policy: String,

    /// Default allow-list of instance type globs (comma or space separated)
    #[arg(long, env = "ALLOWED_INSTANCE_TYPES", default_value = "")]
    pub allowed_instance_types: String,

    /// Default deny-list of instance type globs (comma or space separated)
    #[arg(long, env = "DISALLOWED_INSTANCE_TYPES", default_value = "")]
    pub disallowed_instance_types: String,

    /// Upper bound on waiting for a spot request to fulfil within one tick
    #[arg(long, env = "SIR_WAIT_TIMEOUT_SECS", default_value_t = 30)]
    pub sir_wait_timeout_secs: u64,

    /// Overall deadline for processing a single ASG
    #[arg(long, env = "ASG_TIMEOUT_SECS", default_value_t = 240)]
    pub asg_timeout_secs: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Strategy for choosing the bid price on a spot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BiddingPolicy {
    /// Bid the on-demand price; the instance is never outbid below list price.
    Normal,
    /// Bid the current spot price plus the configured buffer, capped at
    /// the on-demand price.
    Aggressive,
}

impl BiddingPolicy {
    /// Parse a policy name; anything unrecognized is rejected so callers can
    /// fall back to their own default.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(BiddingPolicy::Normal),
            "aggressive" => Some(BiddingPolicy::Aggressive),
            _ => None,
        }
    }
}

/// One `key=value` pair an ASG must carry to be opted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

/// Parse the `TAG_FILTERS` string into pairs. Malformed entries are dropped
/// with a warning; an empty result falls back to the default opt-in marker.
pub fn parse_tag_filters(raw: &str) -> Vec<TagFilter> {
    let mut filters: Vec<TagFilter> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                filters.push(TagFilter {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                });
            }
            _ => warn!("Ignoring malformed tag filter entry: {:?}", entry),
        }
    }
    if filters.is_empty() {
        filters.push(TagFilter {
            key: "spot-enabled".to_string(),
            value: "true".to_string(),
        });
    }
    filters
}

/// Split an instance type list on commas or whitespace, dropping empty
/// tokens. Used for both process defaults and ASG tag values.
pub fn split_type_tokens(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolved process defaults, shared read-only by every region worker.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub min_on_demand_number: i64,
    pub min_on_demand_percentage: f64,
    pub on_demand_price_multiplier: f64,
    pub spot_product_description: String,
    pub spot_price_buffer_percentage: f64,
    pub bidding_policy: BiddingPolicy,
    pub allowed_instance_types: Vec<String>,
    pub disallowed_instance_types: Vec<String>,
    pub tag_filters: Vec<TagFilter>,
    pub sir_wait_timeout: Duration,
    pub asg_timeout: Duration,
}

impl Defaults {
    pub fn from_cli(cli: &Cli) -> Self {
        let bidding_policy = BiddingPolicy::parse(&cli.bidding_policy).unwrap_or_else(|| {
            warn!(
                "Unknown bidding policy {:?}, falling back to normal",
                cli.bidding_policy
            );
            BiddingPolicy::Normal
        });

        let spot_price_buffer_percentage = if cli.spot_price_buffer_percentage < 0.0 {
            warn!(
                "Negative spot price buffer {} ignored",
                cli.spot_price_buffer_percentage
            );
            0.0
        } else {
            cli.spot_price_buffer_percentage
        };

        let on_demand_price_multiplier = if cli.on_demand_price_multiplier <= 0.0 {
            warn!(
                "Non-positive on-demand price multiplier {} ignored",
                cli.on_demand_price_multiplier
            );
            1.0
        } else {
            cli.on_demand_price_multiplier
        };

        Self {
            min_on_demand_number: cli.min_on_demand_number,
            min_on_demand_percentage: cli.min_on_demand_percentage,
            on_demand_price_multiplier,
            spot_product_description: cli.spot_product_description.clone(),
            spot_price_buffer_percentage,
            bidding_policy,
            allowed_instance_types: split_type_tokens(&cli.allowed_instance_types),
            disallowed_instance_types: split_type_tokens(&cli.disallowed_instance_types),
            tag_filters: parse_tag_filters(&cli.tag_filters),
            sir_wait_timeout: Duration::from_secs(cli.sir_wait_timeout_secs),
            asg_timeout: Duration::from_secs(cli.asg_timeout_secs),
        }
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            min_on_demand_number: 0,
            min_on_demand_percentage: 0.0,
            on_demand_price_multiplier: 1.0,
            spot_product_description: "Linux/UNIX (Amazon VPC)".to_string(),
            spot_price_buffer_percentage: 10.0,
            bidding_policy: BiddingPolicy::Normal,
            allowed_instance_types: Vec::new(),
            disallowed_instance_types: Vec::new(),
            tag_filters: parse_tag_filters(DEFAULT_TAG_FILTERS),
            sir_wait_timeout: Duration::from_secs(30),
            asg_timeout: Duration::from_secs(240),
        }
    }
}
