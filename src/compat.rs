//! Instance type compatibility and scoring
//!
//! Given the on-demand instance being replaced (the pattern), produce the
//! spot types that can stand in for it: at least as capable on every axis,
//! allowed by the group's type globs, offered in the pattern's AZ, and
//! priced strictly below on-demand after the configured buffer.

use crate::catalog::Instance;
use crate::conf::{EffectiveConfig, CURRENT_TYPE_TOKEN};
use crate::config::BiddingPolicy;
use crate::typeinfo::{TypeInfo, TypeInfoTable};
use glob::Pattern;
use tracing::debug;

/// Candidate memory may fall short of the pattern's by this fraction;
/// families report marginally different GiB figures for the same size.
const MEMORY_TOLERANCE: f64 = 0.01;

/// One viable `(type, AZ)` replacement, with its current spot price.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub instance_type: String,
    pub availability_zone: String,
    pub spot_price: f64,
}

/// Expand the allow-list for a pattern type: the `current` token means
/// exactly the pattern's own type.
pub fn expand_allowed(allowed: &[String], pattern_type: &str) -> Vec<String> {
    allowed
        .iter()
        .map(|t| {
            if t == CURRENT_TYPE_TOKEN {
                pattern_type.to_string()
            } else {
                t.clone()
            }
        })
        .collect()
}

fn matches_any(patterns: &[String], instance_type: &str) -> bool {
    patterns.iter().any(|p| {
        Pattern::new(p)
            .map(|pat| pat.matches(instance_type))
            .unwrap_or(false)
    })
}

/// Capability dominance: the candidate must match or exceed the pattern on
/// every axis.
fn dominates(pattern: &TypeInfo, candidate: &TypeInfo) -> bool {
    if candidate.virtualization != pattern.virtualization {
        return false;
    }
    if candidate.vcpu < pattern.vcpu {
        return false;
    }
    if candidate.memory_gib < pattern.memory_gib * (1.0 - MEMORY_TOLERANCE) {
        return false;
    }
    if candidate.gpu_count < pattern.gpu_count {
        return false;
    }
    // Instance storage only matters when the pattern actually has local
    // disks it could be using.
    if !pattern.ebs_only
        && pattern.instance_storage_gib > 0.0
        && candidate.instance_storage_gib < pattern.instance_storage_gib
    {
        return false;
    }
    if candidate.network < pattern.network {
        return false;
    }
    true
}

/// How much capability a candidate leaves unused relative to the pattern;
/// used to break price ties in favour of the closest match.
fn capability_surplus(pattern: &TypeInfo, candidate: &TypeInfo) -> f64 {
    (candidate.vcpu - pattern.vcpu) as f64 + (candidate.memory_gib - pattern.memory_gib)
}

/// All compatible spot candidates for replacing `pattern_instance` in `az`,
/// cheapest first. Price ties break on the closer capability vector, then
/// on the type name.
pub fn spot_candidates(
    pattern_instance: &Instance,
    az: &str,
    table: &TypeInfoTable,
    config: &EffectiveConfig,
) -> Vec<Candidate> {
    let pattern = match &pattern_instance.type_info {
        Some(info) => info,
        None => {
            debug!(
                instance = %pattern_instance.id,
                "No type metadata for pattern instance"
            );
            return Vec::new();
        }
    };

    let on_demand_ceiling = pattern.pricing.on_demand * config.on_demand_price_multiplier;
    if on_demand_ceiling <= 0.0 {
        debug!(instance_type = %pattern.instance_type, "No on-demand price for pattern type");
        return Vec::new();
    }

    let allowed = expand_allowed(&config.allowed_types, &pattern.instance_type);
    let buffer = 1.0 + config.spot_price_buffer_pct / 100.0;

    let mut candidates: Vec<(Candidate, f64)> = Vec::new();
    for info in table.iter() {
        if !allowed.is_empty() && !matches_any(&allowed, &info.instance_type) {
            continue;
        }
        if matches_any(&config.disallowed_types, &info.instance_type) {
            continue;
        }
        if !dominates(pattern, info) {
            continue;
        }
        let spot_price = match info.spot_price_in(az) {
            Some(p) => p,
            None => continue,
        };
        if spot_price * buffer >= on_demand_ceiling {
            continue;
        }
        candidates.push((
            Candidate {
                instance_type: info.instance_type.clone(),
                availability_zone: az.to_string(),
                spot_price,
            },
            capability_surplus(pattern, info),
        ));
    }

    candidates.sort_by(|(a, sa), (b, sb)| {
        a.spot_price
            .partial_cmp(&b.spot_price)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(sa.partial_cmp(sb).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.instance_type.cmp(&b.instance_type))
    });

    candidates.into_iter().map(|(c, _)| c).collect()
}

/// The cheapest compatible candidate, if any.
pub fn cheapest_spot_candidate(
    pattern_instance: &Instance,
    az: &str,
    table: &TypeInfoTable,
    config: &EffectiveConfig,
) -> Option<Candidate> {
    spot_candidates(pattern_instance, az, table, config)
        .into_iter()
        .next()
}

/// The price to bid for a spot instance. A `normal` bid is the on-demand
/// price; an `aggressive` bid follows the spot market plus the buffer.
/// Bids never exceed the on-demand price.
pub fn get_price_to_bid(
    policy: BiddingPolicy,
    on_demand_price: f64,
    spot_price: f64,
    buffer_pct: f64,
) -> f64 {
    match policy {
        BiddingPolicy::Normal => on_demand_price,
        BiddingPolicy::Aggressive => {
            let buffered = spot_price * (1.0 + buffer_pct / 100.0);
            buffered.min(on_demand_price)
        }
    }
}
