//! Effective config resolution from layered defaults and ASG tags.

mod common;

use common::{asg_tag, group};
use spotctl::conf::{
    self, ALLOWED_INSTANCE_TYPES_TAG, BIDDING_POLICY_TAG, MIN_ON_DEMAND_NUMBER_TAG,
    MIN_ON_DEMAND_PERCENTAGE_TAG, ON_DEMAND_PRICE_MULTIPLIER_TAG,
    SPOT_PRICE_BUFFER_PERCENTAGE_TAG,
};
use spotctl::config::{BiddingPolicy, Defaults};

fn resolve_min(tags: Vec<(&str, &str)>, max_size: i64, running: i64) -> (i64, bool) {
    let asg = group(
        "asg-test",
        max_size,
        running,
        Vec::new(),
        tags.into_iter().map(|(k, v)| asg_tag(k, v)).collect(),
    );
    let cfg = conf::resolve(&Defaults::default(), &asg, running);
    (cfg.min_on_demand, cfg.min_on_demand_configured)
}

#[test]
fn no_tags_means_not_configured() {
    assert_eq!(resolve_min(vec![], 10, 3), (0, false));
}

#[test]
fn percentage_not_a_number_is_ignored() {
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_PERCENTAGE_TAG, "text")], 10, 3),
        (0, false)
    );
}

#[test]
fn percentage_out_of_range_is_ignored() {
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_PERCENTAGE_TAG, "142.2")], 10, 3),
        (0, false)
    );
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_PERCENTAGE_TAG, "-22")], 10, 3),
        (0, false)
    );
}

#[test]
fn percentage_zero_is_an_explicit_zero() {
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_PERCENTAGE_TAG, "0")], 10, 1),
        (0, true)
    );
}

#[test]
fn percentage_converts_with_floor() {
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_PERCENTAGE_TAG, "75.0")], 10, 3),
        (2, true)
    );
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_PERCENTAGE_TAG, "75.0")], 10, 4),
        (3, true)
    );
    // 33% of 3 is 0.99 and floors to zero
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_PERCENTAGE_TAG, "33.0")], 10, 3),
        (0, true)
    );
}

#[test]
fn percentage_hundred_keeps_every_instance() {
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_PERCENTAGE_TAG, "100.0")], 10, 3),
        (3, true)
    );
}

#[test]
fn count_not_an_integer_is_ignored() {
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_NUMBER_TAG, "text")], 10, 3),
        (0, false)
    );
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_NUMBER_TAG, "2.5")], 10, 3),
        (0, false)
    );
}

#[test]
fn count_out_of_range_is_ignored() {
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_NUMBER_TAG, "-7")], 10, 3),
        (0, false)
    );
    // Larger than the group can ever be
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_NUMBER_TAG, "50")], 10, 3),
        (0, false)
    );
}

#[test]
fn count_valid_is_used() {
    assert_eq!(
        resolve_min(vec![(MIN_ON_DEMAND_NUMBER_TAG, "1")], 10, 3),
        (1, true)
    );
}

#[test]
fn count_beats_percentage() {
    assert_eq!(
        resolve_min(
            vec![
                (MIN_ON_DEMAND_PERCENTAGE_TAG, "75"),
                (MIN_ON_DEMAND_NUMBER_TAG, "2"),
            ],
            10,
            4
        ),
        (2, true)
    );
}

#[test]
fn invalid_count_falls_back_to_percentage() {
    assert_eq!(
        resolve_min(
            vec![
                (MIN_ON_DEMAND_PERCENTAGE_TAG, "75"),
                (MIN_ON_DEMAND_NUMBER_TAG, "-2"),
            ],
            10,
            4
        ),
        (3, true)
    );
}

#[test]
fn both_invalid_falls_back_to_default() {
    assert_eq!(
        resolve_min(
            vec![
                (MIN_ON_DEMAND_PERCENTAGE_TAG, "-75"),
                (MIN_ON_DEMAND_NUMBER_TAG, "200"),
            ],
            10,
            3
        ),
        (0, false)
    );
}

#[test]
fn region_default_count_applies_without_tags() {
    let defaults = Defaults {
        min_on_demand_number: 1,
        ..Defaults::default()
    };
    let asg = group("asg-test", 10, 3, Vec::new(), Vec::new());
    let cfg = conf::resolve(&defaults, &asg, 3);
    assert_eq!(cfg.min_on_demand, 1);
    assert!(cfg.min_on_demand_configured);
}

#[test]
fn region_default_percentage_applies_without_tags() {
    let defaults = Defaults {
        min_on_demand_percentage: 75.0,
        ..Defaults::default()
    };
    let asg = group("asg-test", 10, 4, Vec::new(), Vec::new());
    let cfg = conf::resolve(&defaults, &asg, 4);
    assert_eq!(cfg.min_on_demand, 3);
    assert!(cfg.min_on_demand_configured);
}

#[test]
fn region_default_count_exceeding_max_size_is_invalid() {
    let defaults = Defaults {
        min_on_demand_number: 50,
        ..Defaults::default()
    };
    let asg = group("asg-test", 10, 3, Vec::new(), Vec::new());
    let cfg = conf::resolve(&defaults, &asg, 3);
    assert_eq!(cfg.min_on_demand, 0);
    assert!(!cfg.min_on_demand_configured);
}

#[test]
fn invalid_region_default_count_falls_back_to_percentage_default() {
    let defaults = Defaults {
        min_on_demand_number: 50,
        min_on_demand_percentage: 75.0,
        ..Defaults::default()
    };
    let asg = group("asg-test", 10, 4, Vec::new(), Vec::new());
    let cfg = conf::resolve(&defaults, &asg, 4);
    assert_eq!(cfg.min_on_demand, 3);
    assert!(cfg.min_on_demand_configured);
}

#[test]
fn tag_beats_region_default() {
    let defaults = Defaults {
        min_on_demand_number: 1,
        ..Defaults::default()
    };
    let asg = group(
        "asg-test",
        10,
        4,
        Vec::new(),
        vec![asg_tag(MIN_ON_DEMAND_NUMBER_TAG, "3")],
    );
    let cfg = conf::resolve(&defaults, &asg, 4);
    assert_eq!(cfg.min_on_demand, 3);
}

#[test]
fn bidding_policy_tag_overrides_default() {
    let asg = group(
        "asg-test",
        10,
        2,
        Vec::new(),
        vec![asg_tag(BIDDING_POLICY_TAG, "aggressive")],
    );
    let cfg = conf::resolve(&Defaults::default(), &asg, 2);
    assert_eq!(cfg.bidding_policy, BiddingPolicy::Aggressive);
}

#[test]
fn unknown_bidding_policy_keeps_default() {
    let asg = group(
        "asg-test",
        10,
        2,
        Vec::new(),
        vec![asg_tag(BIDDING_POLICY_TAG, "autospotting")],
    );
    let cfg = conf::resolve(&Defaults::default(), &asg, 2);
    assert_eq!(cfg.bidding_policy, BiddingPolicy::Normal);
}

#[test]
fn spot_price_buffer_tag_overrides_default() {
    let asg = group(
        "asg-test",
        10,
        2,
        Vec::new(),
        vec![asg_tag(SPOT_PRICE_BUFFER_PERCENTAGE_TAG, "15.0")],
    );
    let cfg = conf::resolve(&Defaults::default(), &asg, 2);
    assert_eq!(cfg.spot_price_buffer_pct, 15.0);
}

#[test]
fn negative_spot_price_buffer_keeps_default() {
    let asg = group(
        "asg-test",
        10,
        2,
        Vec::new(),
        vec![asg_tag(SPOT_PRICE_BUFFER_PERCENTAGE_TAG, "-50.0")],
    );
    let cfg = conf::resolve(&Defaults::default(), &asg, 2);
    assert_eq!(cfg.spot_price_buffer_pct, 10.0);
}

#[test]
fn unparseable_spot_price_buffer_keeps_default() {
    let asg = group(
        "asg-test",
        10,
        2,
        Vec::new(),
        vec![asg_tag(SPOT_PRICE_BUFFER_PERCENTAGE_TAG, "TEST")],
    );
    let cfg = conf::resolve(&Defaults::default(), &asg, 2);
    assert_eq!(cfg.spot_price_buffer_pct, 10.0);
}

#[test]
fn price_multiplier_tag_must_be_positive() {
    let asg = group(
        "asg-test",
        10,
        2,
        Vec::new(),
        vec![asg_tag(ON_DEMAND_PRICE_MULTIPLIER_TAG, "0.8")],
    );
    let cfg = conf::resolve(&Defaults::default(), &asg, 2);
    assert_eq!(cfg.on_demand_price_multiplier, 0.8);

    let asg = group(
        "asg-test",
        10,
        2,
        Vec::new(),
        vec![asg_tag(ON_DEMAND_PRICE_MULTIPLIER_TAG, "-1.0")],
    );
    let cfg = conf::resolve(&Defaults::default(), &asg, 2);
    assert_eq!(cfg.on_demand_price_multiplier, 1.0);
}

#[test]
fn allowed_types_tag_beats_default_list() {
    let defaults = Defaults {
        allowed_instance_types: vec!["c2.xlarge".to_string()],
        ..Defaults::default()
    };
    let asg = group(
        "asg-test",
        10,
        2,
        Vec::new(),
        vec![asg_tag(ALLOWED_INSTANCE_TYPES_TAG, "c4.4xlarge")],
    );
    let cfg = conf::resolve(&defaults, &asg, 2);
    assert_eq!(cfg.allowed_types, vec!["c4.4xlarge"]);
}

#[test]
fn allowed_types_default_applies_without_tag() {
    let defaults = Defaults {
        allowed_instance_types: vec!["c2.xlarge".to_string()],
        ..Defaults::default()
    };
    let asg = group("asg-test", 10, 2, Vec::new(), Vec::new());
    let cfg = conf::resolve(&defaults, &asg, 2);
    assert_eq!(cfg.allowed_types, vec!["c2.xlarge"]);
}

#[test]
fn allowed_types_tag_splits_on_comma_and_whitespace() {
    let asg = group(
        "asg-test",
        10,
        2,
        Vec::new(),
        vec![asg_tag(
            ALLOWED_INSTANCE_TYPES_TAG,
            ",,c2.xlarge  t2.medium,c3.small,,",
        )],
    );
    let cfg = conf::resolve(&Defaults::default(), &asg, 2);
    assert_eq!(cfg.allowed_types, vec!["c2.xlarge", "t2.medium", "c3.small"]);
}

#[test]
fn resolution_is_a_pure_function() {
    let asg = group(
        "asg-test",
        10,
        4,
        Vec::new(),
        vec![
            asg_tag(MIN_ON_DEMAND_PERCENTAGE_TAG, "75"),
            asg_tag(BIDDING_POLICY_TAG, "aggressive"),
        ],
    );
    let defaults = Defaults::default();
    let first = conf::resolve(&defaults, &asg, 4);
    let second = conf::resolve(&defaults, &asg, 4);
    assert_eq!(first, second);
}
