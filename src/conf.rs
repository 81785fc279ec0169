//! Per-ASG effective configuration
//!
//! Three layered sources, each later layer overriding the earlier ones when
//! its value is valid: process defaults, region defaults, ASG tags. Invalid
//! tag values are logged and ignored, never fatal. Resolution is a pure
//! function of its inputs so repeated ticks produce identical configs.

use crate::cloud::AsgSummary;
use crate::config::{split_type_tokens, BiddingPolicy, Defaults, DEFAULT_MIN_ON_DEMAND};
use tracing::{debug, warn};

pub const MIN_ON_DEMAND_NUMBER_TAG: &str = "autospotting_min_on_demand_number";
pub const MIN_ON_DEMAND_PERCENTAGE_TAG: &str = "autospotting_min_on_demand_percentage";
pub const ALLOWED_INSTANCE_TYPES_TAG: &str = "autospotting_allowed_instance_types";
pub const DISALLOWED_INSTANCE_TYPES_TAG: &str = "autospotting_disallowed_instance_types";
pub const BIDDING_POLICY_TAG: &str = "autospotting_bidding_policy";
pub const SPOT_PRICE_BUFFER_PERCENTAGE_TAG: &str = "autospotting_spot_price_buffer_percentage";
pub const ON_DEMAND_PRICE_MULTIPLIER_TAG: &str = "autospotting_on_demand_price_multiplier";

/// Allow-list token that expands to the pattern instance's own type.
pub const CURRENT_TYPE_TOKEN: &str = "current";

/// Fully resolved configuration for one ASG, for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub min_on_demand: i64,
    /// False when neither tags nor defaults supplied a valid floor and the
    /// built-in zero is in effect.
    pub min_on_demand_configured: bool,
    pub bidding_policy: BiddingPolicy,
    pub spot_price_buffer_pct: f64,
    pub allowed_types: Vec<String>,
    pub disallowed_types: Vec<String>,
    pub on_demand_price_multiplier: f64,
    pub spot_product_description: String,
}

/// Resolve the effective config for one ASG. `running_total` is the number
/// of running instances the group currently has, used to convert a
/// percentage floor into a count.
pub fn resolve(defaults: &Defaults, asg: &AsgSummary, running_total: i64) -> EffectiveConfig {
    let (min_on_demand, min_on_demand_configured) =
        resolve_min_on_demand(defaults, asg, running_total);

    let bidding_policy = match asg.tag_value(BIDDING_POLICY_TAG) {
        Some(raw) => BiddingPolicy::parse(raw).unwrap_or_else(|| {
            warn!(
                asg = %asg.name,
                "Ignoring unknown bidding policy {:?} from tag", raw
            );
            defaults.bidding_policy
        }),
        None => defaults.bidding_policy,
    };

    let spot_price_buffer_pct = match asg.tag_value(SPOT_PRICE_BUFFER_PERCENTAGE_TAG) {
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) if v >= 0.0 => v,
            _ => {
                warn!(
                    asg = %asg.name,
                    "Ignoring invalid spot price buffer {:?} from tag", raw
                );
                defaults.spot_price_buffer_percentage
            }
        },
        None => defaults.spot_price_buffer_percentage,
    };

    let on_demand_price_multiplier = match asg.tag_value(ON_DEMAND_PRICE_MULTIPLIER_TAG) {
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) if v > 0.0 => v,
            _ => {
                warn!(
                    asg = %asg.name,
                    "Ignoring invalid on-demand price multiplier {:?} from tag", raw
                );
                defaults.on_demand_price_multiplier
            }
        },
        None => defaults.on_demand_price_multiplier,
    };

    let allowed_types = match asg.tag_value(ALLOWED_INSTANCE_TYPES_TAG) {
        Some(raw) => split_type_tokens(raw),
        None => defaults.allowed_instance_types.clone(),
    };
    let disallowed_types = match asg.tag_value(DISALLOWED_INSTANCE_TYPES_TAG) {
        Some(raw) => split_type_tokens(raw),
        None => defaults.disallowed_instance_types.clone(),
    };

    EffectiveConfig {
        min_on_demand,
        min_on_demand_configured,
        bidding_policy,
        spot_price_buffer_pct,
        allowed_types,
        disallowed_types,
        on_demand_price_multiplier,
        spot_product_description: defaults.spot_product_description.clone(),
    }
}

/// Precedence for the on-demand floor: a valid count tag wins, then a valid
/// percentage tag (converted with floor), then the region defaults with the
/// same count-over-percentage ordering, then the built-in zero.
fn resolve_min_on_demand(
    defaults: &Defaults,
    asg: &AsgSummary,
    running_total: i64,
) -> (i64, bool) {
    if let Some(raw) = asg.tag_value(MIN_ON_DEMAND_NUMBER_TAG) {
        match raw.parse::<i64>() {
            Ok(n) if n >= 0 && n <= asg.max_size => {
                debug!(asg = %asg.name, "Minimum on-demand count {} from tag", n);
                return (n, true);
            }
            _ => warn!(
                asg = %asg.name,
                "Ignoring invalid on-demand count {:?} from tag", raw
            ),
        }
    }

    if let Some(raw) = asg.tag_value(MIN_ON_DEMAND_PERCENTAGE_TAG) {
        match raw.parse::<f64>() {
            Ok(pct) if (0.0..=100.0).contains(&pct) => {
                let n = percentage_floor(running_total, pct);
                debug!(
                    asg = %asg.name,
                    "Minimum on-demand count {} from {}% tag", n, pct
                );
                return (n, true);
            }
            _ => warn!(
                asg = %asg.name,
                "Ignoring invalid on-demand percentage {:?} from tag", raw
            ),
        }
    }

    // Region defaults: zero means unset there, unlike an explicit tag. An
    // invalid count default falls through to the percentage default, the
    // same as for tags.
    if defaults.min_on_demand_number != 0 {
        if defaults.min_on_demand_number > 0 && defaults.min_on_demand_number <= asg.max_size {
            return (defaults.min_on_demand_number, true);
        }
        warn!(
            asg = %asg.name,
            "Invalid default on-demand count {} for a group of max size {}",
            defaults.min_on_demand_number,
            asg.max_size
        );
    }

    if defaults.min_on_demand_percentage > 0.0 && defaults.min_on_demand_percentage <= 100.0 {
        return (
            percentage_floor(running_total, defaults.min_on_demand_percentage),
            true,
        );
    }

    (DEFAULT_MIN_ON_DEMAND, false)
}

/// Floor conversion of a percentage of the current group size.
fn percentage_floor(total: i64, pct: f64) -> i64 {
    ((total as f64) * pct / 100.0).floor() as i64
}
