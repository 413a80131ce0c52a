//! Single-pass scenarios against a prepared fleet.

use tokio_util::sync::CancellationToken;

use etcdadm_operator::client::EtcdHealthError;
use etcdadm_operator::controller::{Error, EtcdClusterState, PassOutcome};
use etcdadm_operator::crd::EtcdadmClusterStatus;

use crate::mock_state::*;

const SELECTOR: &str = "cluster.x-k8s.io/cluster-name=prod,cluster.x-k8s.io/etcd-cluster";
const THREE_ENDPOINTS: &str = "https://10.0.0.1:2379,https://10.0.0.2:2379,https://10.0.0.3:2379";

#[tokio::test]
async fn test_three_healthy_members_become_ready() {
    let reconciler = reconciler(three_members());
    let mut cluster = etcd_cluster(3);

    let update = run_pass(&reconciler, &mut cluster).await;

    assert_eq!(
        update.result.unwrap(),
        PassOutcome::Ready {
            endpoint: THREE_ENDPOINTS.to_string()
        }
    );
    let status = cluster.status.unwrap();
    assert!(status.ready);
    assert_eq!(status.endpoint, THREE_ENDPOINTS);
    assert_eq!(status.ready_replicas, 3);
    assert_eq!(status.selector, SELECTOR);
    assert_eq!(reconciler.inventory().selectors(), vec![SELECTOR]);
    assert_eq!(
        reconciler.health().probed(),
        vec![
            "https://10.0.0.1:2379",
            "https://10.0.0.2:2379",
            "https://10.0.0.3:2379"
        ]
    );
    assert!(reconciler.health().forgotten().is_empty());
}

#[tokio::test]
async fn test_not_ready_member_fails_the_pass() {
    let reconciler = reconciler(three_members());
    reconciler
        .health()
        .set("https://10.0.0.2:2379", MemberHealth::Status(503));
    let mut cluster = etcd_cluster(3);

    let update = run_pass(&reconciler, &mut cluster).await;

    let err = update.result.unwrap_err();
    assert!(matches!(
        err,
        Error::HealthCheck(EtcdHealthError::NotReady { status: 503, .. })
    ));
    assert!(err.to_string().contains("etcd member not ready, retry"));
    assert!(err.is_retryable());

    let status = cluster.status.unwrap();
    assert!(!status.ready);
    assert!(status.endpoint.is_empty());
    assert_eq!(status.ready_replicas, 3);

    // Probing stops at the first failing member.
    assert_eq!(
        reconciler.health().probed(),
        vec!["https://10.0.0.1:2379", "https://10.0.0.2:2379"]
    );
}

#[tokio::test]
async fn test_unhealthy_payload_is_reported() {
    let reconciler = reconciler(three_members());
    reconciler.health().set(
        "https://10.0.0.3:2379",
        MemberHealth::Body(r#"{"health":"false"}"#.to_string()),
    );
    let mut cluster = etcd_cluster(3);

    let err = run_pass(&reconciler, &mut cluster).await.result.unwrap_err();
    match err {
        Error::HealthCheck(EtcdHealthError::Unhealthy {
            health, payload, ..
        }) => {
            assert_eq!(health, "false");
            assert_eq!(payload, r#"{"health":"false"}"#);
        }
        other => panic!("expected unhealthy member, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_payload_is_distinct_from_unhealthy() {
    let reconciler = reconciler(three_members());
    reconciler
        .health()
        .set("https://10.0.0.1:2379", MemberHealth::Body("not-json".to_string()));
    let mut cluster = etcd_cluster(3);

    let err = run_pass(&reconciler, &mut cluster).await.result.unwrap_err();
    assert!(matches!(
        err,
        Error::HealthCheck(EtcdHealthError::MalformedResponse { .. })
    ));
    assert!(!err.to_string().contains("failed healthcheck"));
}

#[tokio::test]
async fn test_deleting_cluster_counts_but_does_not_probe() {
    let reconciler = reconciler(three_members());
    let mut cluster = deleting(etcd_cluster(3));

    let update = run_pass(&reconciler, &mut cluster).await;

    assert_eq!(update.state(), Some(EtcdClusterState::Deleting));
    assert_eq!(update.result.unwrap(), PassOutcome::Deleting);
    let status = cluster.status.unwrap();
    assert_eq!(status.ready_replicas, 3);
    assert_eq!(status.selector, SELECTOR);
    assert!(!status.ready);
    assert!(reconciler.health().probed().is_empty());
    assert_eq!(reconciler.health().forgotten(), vec!["default/prod"]);
}

#[tokio::test]
async fn test_too_few_members_is_provisioning() {
    let mut members = three_members();
    members.pop();
    let reconciler = reconciler(members);
    let mut cluster = etcd_cluster(3);

    let update = run_pass(&reconciler, &mut cluster).await;

    assert_eq!(
        update.result.unwrap(),
        PassOutcome::Provisioning {
            ready_replicas: 2,
            desired_replicas: 3
        }
    );
    assert_eq!(cluster.status.unwrap().ready_replicas, 2);
    assert!(reconciler.health().probed().is_empty());
}

#[tokio::test]
async fn test_too_many_members_is_provisioning() {
    let mut members = three_members();
    members.push(MemberBuilder::new("prod-etcd-4").internal_ip("10.0.0.4").build());
    let reconciler = reconciler(members);
    let mut cluster = etcd_cluster(3);

    let update = run_pass(&reconciler, &mut cluster).await;
    assert_eq!(update.state(), Some(EtcdClusterState::Provisioning));
    assert_eq!(cluster.status.unwrap().ready_replicas, 4);
}

#[tokio::test]
async fn test_member_without_address_blocks_probing() {
    let mut members = three_members();
    members[1] = MemberBuilder::new("prod-etcd-2").build();
    let reconciler = reconciler(members);
    let mut cluster = etcd_cluster(3);

    let update = run_pass(&reconciler, &mut cluster).await;

    assert_eq!(
        update.result.unwrap(),
        PassOutcome::AwaitingAddresses {
            machine: "prod-etcd-2".to_string()
        }
    );
    assert!(reconciler.health().probed().is_empty());
}

#[tokio::test]
async fn test_external_addresses_used_only_without_internal() {
    let reconciler = reconciler(vec![
        MemberBuilder::new("prod-etcd-1")
            .external_ip("1.2.3.4")
            .internal_ip("10.0.0.1")
            .build(),
        MemberBuilder::new("prod-etcd-2").external_ip("1.2.3.5").build(),
    ]);
    let mut cluster = etcd_cluster(2);

    run_pass(&reconciler, &mut cluster).await.result.unwrap();
    assert_eq!(
        cluster.status.unwrap().endpoint,
        "https://10.0.0.1:2379,https://1.2.3.5:2379"
    );
}

#[tokio::test]
async fn test_duplicate_addresses_are_probed_twice() {
    let reconciler = reconciler(vec![
        MemberBuilder::new("prod-etcd-1")
            .internal_ip("10.0.0.1")
            .internal_ip("10.0.0.1")
            .build(),
    ]);
    let mut cluster = etcd_cluster(1);

    run_pass(&reconciler, &mut cluster).await.result.unwrap();
    assert_eq!(
        cluster.status.unwrap().endpoint,
        "https://10.0.0.1:2379,https://10.0.0.1:2379"
    );
    assert_eq!(reconciler.health().probed().len(), 2);
}

#[tokio::test]
async fn test_foreign_machines_are_ignored() {
    let mut members = three_members();
    members.push(
        MemberBuilder::new("other-etcd-1")
            .owned_by("other-etcd")
            .internal_ip("10.0.1.1")
            .build(),
    );
    members.push(
        MemberBuilder::new("staging-etcd-1")
            .in_cluster("staging")
            .internal_ip("10.0.2.1")
            .build(),
    );
    let reconciler = reconciler(members);
    let mut cluster = etcd_cluster(3);

    run_pass(&reconciler, &mut cluster).await.result.unwrap();
    let status = cluster.status.unwrap();
    assert_eq!(status.ready_replicas, 3);
    assert_eq!(status.endpoint, THREE_ENDPOINTS);
}

#[tokio::test]
async fn test_deleting_members_are_counted() {
    let mut members = three_members();
    members[2] = MemberBuilder::new("prod-etcd-3")
        .internal_ip("10.0.0.3")
        .deleting()
        .build();
    let reconciler = reconciler(members);
    let mut cluster = etcd_cluster(3);

    run_pass(&reconciler, &mut cluster).await.result.unwrap();
    assert_eq!(cluster.status.unwrap().ready_replicas, 3);
}

#[tokio::test]
async fn test_listing_failure_keeps_previous_counts() {
    let reconciler = reconciler(three_members());
    reconciler.inventory().fail_listing(true);
    let mut cluster = etcd_cluster(3);
    cluster.status = Some(EtcdadmClusterStatus {
        ready_replicas: 2,
        ..Default::default()
    });

    let update = run_pass(&reconciler, &mut cluster).await;
    assert_eq!(update.state(), None);

    let err = update.result.unwrap_err();
    assert!(err
        .to_string()
        .starts_with("error filtering machines for etcd cluster"));
    assert!(err.is_retryable());

    let status = cluster.status.unwrap();
    assert_eq!(status.ready_replicas, 2);
    assert_eq!(status.selector, SELECTOR);
}

#[tokio::test]
async fn test_cancelled_pass_surfaces_cancellation() {
    let reconciler = reconciler(three_members());
    let cluster = etcd_cluster(3);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let update = reconciler.update_status(&cluster, CLUSTER, &cancel).await;

    assert!(matches!(update.result, Err(Error::Cancelled)));
    assert!(reconciler.health().probed().is_empty());
}

#[tokio::test]
async fn test_unset_replicas_defaults_to_one() {
    let reconciler = reconciler(vec![
        MemberBuilder::new("prod-etcd-1").internal_ip("10.0.0.1").build(),
    ]);
    let mut cluster = etcd_cluster(1);
    cluster.spec.replicas = None;

    let update = run_pass(&reconciler, &mut cluster).await;
    assert_eq!(update.state(), Some(EtcdClusterState::Ready));
}
