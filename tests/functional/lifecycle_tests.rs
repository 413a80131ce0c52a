//! Multi-pass lifecycles with status carried between passes.

use etcdadm_operator::controller::EtcdClusterState;
use etcdadm_operator::controller::state_machine::{ReadinessTransition, determine_transition};

use crate::mock_state::*;

#[tokio::test]
async fn test_cluster_comes_up_member_by_member() {
    let reconciler = reconciler(Vec::new());
    let mut cluster = etcd_cluster(3);
    let mut states = Vec::new();

    // No machines yet.
    states.push(run_pass(&reconciler, &mut cluster).await.state());

    // Two machines created, one still waiting for an address.
    reconciler.inventory().set_machines(vec![
        MemberBuilder::new("prod-etcd-1").internal_ip("10.0.0.1").build(),
        MemberBuilder::new("prod-etcd-2").build(),
    ]);
    states.push(run_pass(&reconciler, &mut cluster).await.state());

    // All three created, the second still without an address.
    reconciler.inventory().set_machines(vec![
        MemberBuilder::new("prod-etcd-1").internal_ip("10.0.0.1").build(),
        MemberBuilder::new("prod-etcd-2").build(),
        MemberBuilder::new("prod-etcd-3").internal_ip("10.0.0.3").build(),
    ]);
    states.push(run_pass(&reconciler, &mut cluster).await.state());

    // Every member reports an address; the third is not serving yet.
    reconciler.inventory().set_machines(three_members());
    reconciler
        .health()
        .set("https://10.0.0.3:2379", MemberHealth::Status(503));
    states.push(run_pass(&reconciler, &mut cluster).await.state());
    assert!(!cluster.status.as_ref().unwrap().ready);

    // The third member comes up.
    reconciler
        .health()
        .set("https://10.0.0.3:2379", MemberHealth::Healthy);
    let was_ready = cluster.status.as_ref().unwrap().ready;
    states.push(run_pass(&reconciler, &mut cluster).await.state());

    assert_eq!(
        states,
        vec![
            Some(EtcdClusterState::Provisioning),
            Some(EtcdClusterState::Provisioning),
            Some(EtcdClusterState::AwaitingAddresses),
            Some(EtcdClusterState::ProbingHealth),
            Some(EtcdClusterState::Ready),
        ]
    );

    let status = cluster.status.unwrap();
    assert!(status.ready);
    assert_eq!(
        determine_transition(was_ready, status.ready),
        ReadinessTransition::BecameReady
    );
}

#[tokio::test]
async fn test_failed_probe_does_not_clear_readiness() {
    let reconciler = reconciler(three_members());
    let mut cluster = etcd_cluster(3);

    run_pass(&reconciler, &mut cluster).await.result.unwrap();
    let ready_status = cluster.status.clone().unwrap();
    assert!(ready_status.ready);

    reconciler
        .health()
        .set("https://10.0.0.1:2379", MemberHealth::Status(500));
    let update = run_pass(&reconciler, &mut cluster).await;

    assert!(update.result.is_err());
    assert_eq!(update.state(), Some(EtcdClusterState::ProbingHealth));
    assert_eq!(cluster.status.unwrap(), ready_status);
}

#[tokio::test]
async fn test_scale_down_drops_back_to_provisioning() {
    let reconciler = reconciler(three_members());
    let mut cluster = etcd_cluster(3);
    run_pass(&reconciler, &mut cluster).await.result.unwrap();

    let mut members = three_members();
    members.pop();
    reconciler.inventory().set_machines(members);
    let update = run_pass(&reconciler, &mut cluster).await;

    assert_eq!(update.state(), Some(EtcdClusterState::Provisioning));
    let status = cluster.status.unwrap();
    assert_eq!(status.ready_replicas, 2);
    // Readiness and endpoint only move forward on a successful probe pass.
    assert!(status.ready);
    assert_eq!(
        status.endpoint,
        "https://10.0.0.1:2379,https://10.0.0.2:2379,https://10.0.0.3:2379"
    );
}

#[tokio::test]
async fn test_replacement_member_updates_endpoint() {
    let reconciler = reconciler(three_members());
    let mut cluster = etcd_cluster(3);
    run_pass(&reconciler, &mut cluster).await.result.unwrap();

    let mut members = three_members();
    members[0] = MemberBuilder::new("prod-etcd-4").internal_ip("10.0.0.4").build();
    reconciler.inventory().set_machines(members);
    run_pass(&reconciler, &mut cluster).await.result.unwrap();

    assert_eq!(
        cluster.status.unwrap().endpoint,
        "https://10.0.0.4:2379,https://10.0.0.2:2379,https://10.0.0.3:2379"
    );
}

#[tokio::test]
async fn test_repeated_ready_passes_are_stable() {
    let reconciler = reconciler(three_members());
    let mut cluster = etcd_cluster(3);

    run_pass(&reconciler, &mut cluster).await.result.unwrap();
    let first = cluster.status.clone();
    run_pass(&reconciler, &mut cluster).await.result.unwrap();

    // An unchanged status means the controller skips the patch.
    assert_eq!(cluster.status, first);
    assert_eq!(reconciler.health().probed().len(), 6);
}
