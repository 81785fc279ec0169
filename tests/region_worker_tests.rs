//! Region worker: opt-in filtering, parallel ASG processing and error
//! accumulation in the tick report.

mod common;

use common::{asg_tag, group, running_on_demand, table, test_defaults, type_info, with_spot_price, FakeAsg, FakeEc2};
use spotctl::region::RegionWorker;
use std::sync::Arc;

#[tokio::test]
async fn only_opted_in_groups_are_processed() {
    let ec2 = Arc::new(FakeEc2::new());
    let asg = Arc::new(FakeAsg::new());

    ec2.add_instance(running_on_demand("i-a", "m5.large", "us-east-1a"));
    ec2.add_instance(running_on_demand("i-b", "m5.large", "us-east-1a"));

    asg.add_group(group(
        "asg-enabled",
        4,
        1,
        vec!["i-a"],
        vec![asg_tag("spot-enabled", "true")],
    ));
    asg.add_group(group("asg-ignored", 4, 1, vec!["i-b"], Vec::new()));

    let worker = RegionWorker {
        region: "us-east-1".to_string(),
        ec2: ec2.clone(),
        asg_ops: asg.clone(),
        types: Arc::new(table(vec![with_spot_price(
            type_info("m5.large", 2, 8.0, 0.096),
            "us-east-1a",
            0.031,
        )])),
        defaults: Arc::new(test_defaults()),
    };

    let report = worker.run_tick().await.unwrap();
    assert_eq!(report.region, "us-east-1");
    assert_eq!(report.asgs_processed, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(report.results[0].asg, "asg-enabled");

    // Only the enabled group placed a bid
    assert_eq!(ec2.request_ids().len(), 1);
}

#[tokio::test]
async fn per_asg_errors_land_in_the_report() {
    let ec2 = Arc::new(FakeEc2::new());
    let asg = Arc::new(FakeAsg::new());

    // A fulfilled request whose swap will fail at detach
    ec2.add_instance(running_on_demand("i-od", "m5.large", "us-east-1a"));
    ec2.add_instance(common::running_spot("i-spot", "m4.large", "us-east-1a"));
    asg.add_group(group(
        "asg-broken",
        4,
        1,
        vec!["i-od"],
        vec![asg_tag("spot-enabled", "true")],
    ));
    *asg.fail_detach.lock().unwrap() = true;
    ec2.add_spot_request(spotctl::sir::SpotRequest {
        id: "sir-1".to_string(),
        state: spotctl::sir::SirState::Active,
        status_code: Some("fulfilled".to_string()),
        instance_id: Some("i-spot".to_string()),
        tags: vec![spotctl::cloud::Tag::new(
            spotctl::sir::LAUNCHED_FOR_ASG_TAG,
            "asg-broken",
        )],
    });

    let worker = RegionWorker {
        region: "us-east-1".to_string(),
        ec2: ec2.clone(),
        asg_ops: asg.clone(),
        types: Arc::new(table(vec![
            with_spot_price(type_info("m5.large", 2, 8.0, 0.096), "us-east-1a", 0.031),
            with_spot_price(type_info("m4.large", 2, 8.0, 0.1), "us-east-1a", 0.028),
        ])),
        defaults: Arc::new(test_defaults()),
    };

    let report = worker.run_tick().await.unwrap();
    assert_eq!(report.asgs_processed, 1);
    assert_eq!(report.errors, 1);
    assert!(report.results[0].error.as_deref().unwrap().contains("DetachInstances"));
}

#[tokio::test]
async fn empty_region_produces_an_empty_report() {
    let worker = RegionWorker {
        region: "eu-west-1".to_string(),
        ec2: Arc::new(FakeEc2::new()),
        asg_ops: Arc::new(FakeAsg::new()),
        types: Arc::new(table(Vec::new())),
        defaults: Arc::new(test_defaults()),
    };

    let report = worker.run_tick().await.unwrap();
    assert_eq!(report.asgs_processed, 0);
    assert_eq!(report.errors, 0);
    assert!(report.results.is_empty());
}
