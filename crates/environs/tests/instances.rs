//! Instance control against an eventually consistent compute API:
//! partial listings, not-found races during termination, and group
//! reconciliation across repeated starts.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use stratus_environs::ec2::{
    Ec2Environ, Ec2Provider, IpPermission, PermSet, ProviderConfig, SecurityGroupReconciler,
};
use stratus_environs::testing::{ComputeCall, ComputeOp, FakeCompute, FakeConnector, FakeImageSelector};
use stratus_environs::{Environ, Instance, InstanceId, StateInfo};
use tokio::time::Instant;

fn open(connector: &Arc<FakeConnector>) -> Ec2Environ {
    stratus_log::init_test();
    Ec2Provider::new(connector.clone(), Arc::new(FakeImageSelector::default()))
        .open_ec2("prod", ProviderConfig::default())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_terminate_nothing_makes_no_calls() {
    let connector = Arc::new(FakeConnector::default());
    let environ = open(&connector);

    environ.terminate_instances(&[]).await.unwrap();
    environ.stop_instances(&[]).await.unwrap();

    assert!(connector.compute().calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_terminate_real_and_already_gone_ids_succeeds() {
    let connector = Arc::new(FakeConnector::default());
    let compute = connector.compute();
    let environ = open(&connector);
    let real = compute.add_instance(&["stratus-prod"]);
    let gone = InstanceId::from("i-gone");

    environ
        .terminate_instances(&[real.clone(), gone.clone()])
        .await
        .unwrap();

    assert_eq!(compute.terminated(), vec![real.clone()]);
    let calls = compute.calls();
    let tail = calls[calls.len() - 2..].to_vec();
    assert_eq!(
        tail,
        vec![
            ComputeCall::TerminateInstances(vec![real]),
            ComputeCall::TerminateInstances(vec![gone]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_bulk_terminate_retries_within_the_short_budget() {
    let connector = Arc::new(FakeConnector::default());
    let compute = connector.compute();
    let environ = open(&connector);
    let real = compute.add_instance(&["stratus-prod"]);

    let started = Instant::now();
    environ
        .terminate_instances(&[real, InstanceId::from("i-gone")])
        .await
        .unwrap();

    // Bulk attempts every 200ms for 5s, then one call per id.
    let elapsed = started.elapsed();
    assert!(elapsed <= Duration::from_secs(5), "took {elapsed:?}");
    assert!(compute.count(ComputeOp::TerminateInstances) > 10);
}

#[tokio::test(start_paused = true)]
async fn test_list_returns_found_instances_when_one_never_appears() {
    let connector = Arc::new(FakeConnector::default());
    let compute = connector.compute();
    let environ = open(&connector);
    let a = compute.add_instance(&["stratus-prod"]);
    let b = compute.add_instance(&["stratus-prod"]);
    let ids = vec![a.clone(), InstanceId::from("i-never"), b.clone()];

    let started = Instant::now();
    let lookup = environ.instances(&ids).await.unwrap();

    assert!(started.elapsed() <= Duration::from_secs(5));
    let slots: Vec<Option<InstanceId>> = lookup
        .slots()
        .iter()
        .map(|slot| slot.as_ref().map(|i| i.id().clone()))
        .collect();
    assert_eq!(slots, vec![Some(a), None, Some(b)]);
    assert!(lookup.error().is_some_and(|e| e.is_missing_instances()));
}

#[tokio::test(start_paused = true)]
async fn test_list_ignores_instances_outside_the_environment() {
    let connector = Arc::new(FakeConnector::default());
    let compute = connector.compute();
    let environ = open(&connector);
    let foreign = compute.add_instance(&["stratus-staging"]);

    let err = environ.instances(&[foreign]).await.unwrap_err();

    assert!(err.is_missing_instances());
}

#[tokio::test(start_paused = true)]
async fn test_list_keeps_request_order_with_duplicates() {
    let connector = Arc::new(FakeConnector::default());
    let compute = connector.compute();
    let environ = open(&connector);
    let a = compute.add_instance(&["stratus-prod"]);
    let b = compute.add_instance(&["stratus-prod"]);

    let lookup = environ
        .list_instances(&[b.clone(), a.clone(), b.clone()])
        .await
        .unwrap();

    let found: Vec<InstanceId> = lookup.found().map(|i| i.id().clone()).collect();
    assert_eq!(found, vec![b.clone(), a, b]);
    assert!(lookup.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_starts_do_not_churn_group_rules() {
    let connector = Arc::new(FakeConnector::default());
    let compute = connector.compute();
    let environ = open(&connector);

    environ.start_instance(0, &StateInfo::default()).await.unwrap();
    environ.start_instance(1, &StateInfo::default()).await.unwrap();

    // Only the first start authorizes the environment rules.
    assert_eq!(compute.count(ComputeOp::AuthorizeSecurityGroup), 1);
    assert_eq!(compute.count(ComputeOp::RevokeSecurityGroup), 0);
    assert_eq!(
        compute.group_permissions("stratus-prod"),
        Some(PermSet::from_permissions(&[
            IpPermission::tcp(22, 22, "0.0.0.0/0"),
            IpPermission::tcp(2181, 2181, "0.0.0.0/0"),
        ]))
    );
}

#[tokio::test(start_paused = true)]
async fn test_start_repairs_a_drifted_environment_group() {
    let connector = Arc::new(FakeConnector::default());
    let compute = connector.compute();
    compute.add_group(
        "stratus-prod",
        "created by hand",
        &[
            IpPermission::tcp(22, 22, "0.0.0.0/0"),
            IpPermission::tcp(3306, 3306, "0.0.0.0/0"),
        ],
    );
    let environ = open(&connector);

    environ.start_instance(0, &StateInfo::default()).await.unwrap();

    assert_eq!(
        compute.group_permissions("stratus-prod"),
        Some(PermSet::from_permissions(&[
            IpPermission::tcp(22, 22, "0.0.0.0/0"),
            IpPermission::tcp(2181, 2181, "0.0.0.0/0"),
        ]))
    );
}

#[tokio::test]
async fn test_reconciler_converges_from_any_rule_set() {
    let compute = Arc::new(FakeCompute::new());
    let groups = SecurityGroupReconciler::new(compute.clone());
    let tcp = |port| IpPermission::tcp(port, port, "10.0.0.0/8");

    let states: [&[IpPermission]; 4] = [
        &[],
        &[tcp(22)],
        &[tcp(22), tcp(80), tcp(443)],
        &[tcp(8080)],
    ];
    for desired in states {
        groups.ensure_group("stratus-ci", desired).await.unwrap();
        assert_eq!(
            compute.group_permissions("stratus-ci"),
            Some(PermSet::from_permissions(desired))
        );

        let before = compute.calls().len();
        groups.ensure_group("stratus-ci", desired).await.unwrap();
        let repeat = compute.calls()[before..].to_vec();
        assert!(
            repeat
                .iter()
                .all(|c| !matches!(c.op(), ComputeOp::AuthorizeSecurityGroup | ComputeOp::RevokeSecurityGroup)),
            "repeat call changed rules: {repeat:?}"
        );
    }
}
