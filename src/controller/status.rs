//! Status pass for EtcdadmCluster.
//!
//! One pass runs these stages in order and stops at the first one that
//! cannot make progress:
//!
//! 1. compute the membership selector and record it
//! 2. list owned members and record their count
//! 3. stop if the cluster is being deleted
//! 4. stop unless the member count equals the desired replicas
//! 5. aggregate member endpoints, stopping if a member has no address
//! 6. probe every endpoint
//! 7. mark the cluster ready and record the endpoints
//!
//! The status produced by stages 1 and 2 is kept even when a later stage
//! fails. A failed probe leaves `ready` and `endpoint` as they were.

use std::future::Future;
use std::ops::ControlFlow;

use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::endpoints::{EndpointAggregation, aggregate_endpoints};
use super::error::{Error, Result};
use super::state_machine::EtcdClusterState;
use crate::client::{CertificateSource, HealthClientCache};
use crate::collections::{
    InventoryError, MachineInventory, Machines, etcd_plane_selector_for_cluster,
    get_filtered_machines_for_cluster,
};
use crate::crd::{
    CLUSTER_API_GROUP, CLUSTER_NAME_LABEL, ETCD_CLIENT_PORT, EtcdadmCluster, EtcdadmClusterStatus,
};

/// Probes the members of one cluster.
pub trait MemberHealthChecker: Send + Sync {
    /// Probe each endpoint of a comma separated list, failing on the first
    /// unhealthy member.
    fn check_endpoints(
        &self,
        namespace: &str,
        cluster_name: &str,
        endpoints: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Release whatever is held for a cluster that is going away.
    fn forget_cluster(&self, namespace: &str, cluster_name: &str) -> impl Future<Output = ()> + Send;
}

impl<S: CertificateSource> MemberHealthChecker for HealthClientCache<S> {
    async fn check_endpoints(
        &self,
        namespace: &str,
        cluster_name: &str,
        endpoints: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let client = self.get_or_init(namespace, cluster_name, cancel).await?;
        client.check_endpoints(endpoints, cancel).await?;
        Ok(())
    }

    async fn forget_cluster(&self, namespace: &str, cluster_name: &str) {
        self.forget(namespace, cluster_name).await;
    }
}

/// How a pass that did not fail came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The cluster is being deleted; members were counted but not probed.
    Deleting,
    /// Owned member count differs from the desired replicas.
    Provisioning {
        ready_replicas: i32,
        desired_replicas: i32,
    },
    /// A member has not reported an address yet.
    AwaitingAddresses { machine: String },
    /// Every member answered its health probe.
    Ready { endpoint: String },
}

impl PassOutcome {
    pub fn state(&self) -> EtcdClusterState {
        match self {
            PassOutcome::Deleting => EtcdClusterState::Deleting,
            PassOutcome::Provisioning { .. } => EtcdClusterState::Provisioning,
            PassOutcome::AwaitingAddresses { .. } => EtcdClusterState::AwaitingAddresses,
            PassOutcome::Ready { .. } => EtcdClusterState::Ready,
        }
    }
}

/// Status computed by a pass together with how the pass ended.
#[derive(Debug)]
pub struct StatusUpdate {
    pub status: EtcdadmClusterStatus,
    pub result: Result<PassOutcome>,
}

impl StatusUpdate {
    /// Derived lifecycle state, if the pass got far enough to know it.
    pub fn state(&self) -> Option<EtcdClusterState> {
        match &self.result {
            Ok(outcome) => Some(outcome.state()),
            Err(Error::HealthCheck(_) | Error::HealthClient(_)) => {
                Some(EtcdClusterState::ProbingHealth)
            }
            Err(_) => None,
        }
    }
}

/// Computes EtcdadmCluster status from the fleet and member health.
pub struct StatusReconciler<I, H> {
    inventory: I,
    health: H,
    port: u16,
}

impl<I: MachineInventory, H: MemberHealthChecker> StatusReconciler<I, H> {
    pub fn new(inventory: I, health: H) -> Self {
        Self {
            inventory,
            health,
            port: ETCD_CLIENT_PORT,
        }
    }

    /// Override the etcd client port used to build member URLs.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn health(&self) -> &H {
        &self.health
    }

    /// Run one status pass for `cluster`, owned by the cluster-api cluster
    /// `cluster_name`.
    pub async fn update_status(
        &self,
        cluster: &EtcdadmCluster,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> StatusUpdate {
        let mut status = cluster.status.clone().unwrap_or_default();
        let result = self.run_pass(cluster, cluster_name, &mut status, cancel).await;
        StatusUpdate { status, result }
    }

    async fn run_pass(
        &self,
        cluster: &EtcdadmCluster,
        cluster_name: &str,
        status: &mut EtcdadmClusterStatus,
        cancel: &CancellationToken,
    ) -> Result<PassOutcome> {
        let namespace = cluster
            .namespace()
            .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;

        let selector = etcd_plane_selector_for_cluster(cluster_name).map_err(InventoryError::from)?;
        status.selector = selector.to_string();

        let machines = self
            .owned_machines(cluster, &namespace, cluster_name, cancel)
            .await?;
        status.ready_replicas = i32::try_from(machines.len()).unwrap_or(i32::MAX);
        debug!(
            name = %cluster.name_any(),
            machines = ?machines.names(),
            "Owned etcd machines"
        );

        if cluster.meta().deletion_timestamp.is_some() {
            self.health.forget_cluster(&namespace, cluster_name).await;
            return Ok(PassOutcome::Deleting);
        }

        if let ControlFlow::Break(outcome) =
            check_member_count(status.ready_replicas, cluster.spec.desired_replicas())
        {
            return Ok(outcome);
        }

        let endpoints = match build_endpoints(&machines, self.port) {
            ControlFlow::Continue(endpoints) => endpoints,
            ControlFlow::Break(outcome) => return Ok(outcome),
        };

        self.health
            .check_endpoints(&namespace, cluster_name, &endpoints, cancel)
            .await?;

        info!(name = %cluster.name_any(), endpoint = %endpoints, "etcd cluster is ready");
        status.ready = true;
        status.endpoint.clone_from(&endpoints);
        Ok(PassOutcome::Ready {
            endpoint: endpoints,
        })
    }

    async fn owned_machines(
        &self,
        cluster: &EtcdadmCluster,
        namespace: &str,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Machines> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            machines = get_filtered_machines_for_cluster(
                &self.inventory,
                namespace,
                cluster_name,
                cluster,
            ) => Ok(machines?),
        }
    }
}

/// Continue only when the owned member count equals the desired replicas.
pub fn check_member_count(ready_replicas: i32, desired_replicas: i32) -> ControlFlow<PassOutcome> {
    if ready_replicas == desired_replicas {
        ControlFlow::Continue(())
    } else {
        ControlFlow::Break(PassOutcome::Provisioning {
            ready_replicas,
            desired_replicas,
        })
    }
}

/// Continue with the endpoint list once every member has an address.
pub fn build_endpoints(machines: &Machines, port: u16) -> ControlFlow<PassOutcome, String> {
    match aggregate_endpoints(machines, port) {
        EndpointAggregation::Endpoints(endpoints) => ControlFlow::Continue(endpoints),
        EndpointAggregation::MissingAddresses { machine } => {
            debug!(machine = %machine, "Waiting for machine to report an address");
            ControlFlow::Break(PassOutcome::AwaitingAddresses { machine })
        }
    }
}

/// Name of the cluster-api Cluster this EtcdadmCluster belongs to.
///
/// Prefers the owner reference set by cluster-api and falls back to the
/// cluster-name label. Returns `None` until either is present.
pub fn resolve_cluster_name(cluster: &EtcdadmCluster) -> Option<String> {
    let from_owner = cluster
        .owner_references()
        .iter()
        .find(|r| {
            let group = r
                .api_version
                .split_once('/')
                .map(|(g, _)| g)
                .unwrap_or_default();
            r.kind == "Cluster" && group == CLUSTER_API_GROUP
        })
        .map(|r| r.name.clone());

    from_owner
        .or_else(|| cluster.labels().get(CLUSTER_NAME_LABEL).cloned())
        .filter(|name| !name.is_empty())
}
