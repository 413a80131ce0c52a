//! Mock infrastructure for simulating a machine fleet and etcd members.
//!
//! `MockFleet` stands in for the Kubernetes machine inventory and
//! `ScriptedHealth` for the etcd members behind their `/health` endpoints.
//! Both record what the status pass asked of them so tests can check that
//! no probe was sent when none should be.

use std::collections::HashMap;
use std::sync::Mutex;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use k8s_openapi::chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use etcdadm_operator::client::EtcdHealthError;
use etcdadm_operator::collections::{InventoryError, MachineInventory, Selector};
use etcdadm_operator::controller::{
    MemberHealthChecker, Result, StatusReconciler, StatusUpdate,
};
use etcdadm_operator::crd::{
    CLUSTER_NAME_LABEL, ETCD_CLUSTER_LABEL, EtcdadmCluster, EtcdadmClusterSpec, Machine,
    MachineAddress, MachineAddressType, MachineSpec, MachineStatus,
};

/// Namespace every fixture lives in.
pub const NAMESPACE: &str = "default";

/// Name of the cluster-api cluster owning the fixtures.
pub const CLUSTER: &str = "prod";

/// Name of the EtcdadmCluster under test.
pub const ETCD_CLUSTER: &str = "prod-etcd";

/// In-memory fleet inventory.
#[derive(Default)]
pub struct MockFleet {
    machines: Mutex<Vec<Machine>>,
    fail_listing: Mutex<bool>,
    selectors: Mutex<Vec<String>>,
}

impl MockFleet {
    pub fn new(machines: Vec<Machine>) -> Self {
        Self {
            machines: Mutex::new(machines),
            ..Default::default()
        }
    }

    /// Replace the fleet contents.
    pub fn set_machines(&self, machines: Vec<Machine>) {
        *self.machines.lock().unwrap() = machines;
    }

    /// Make every following listing fail.
    pub fn fail_listing(&self, fail: bool) {
        *self.fail_listing.lock().unwrap() = fail;
    }

    /// Selectors the fleet was queried with.
    pub fn selectors(&self) -> Vec<String> {
        self.selectors.lock().unwrap().clone()
    }
}

impl MachineInventory for MockFleet {
    async fn list_machines(
        &self,
        _namespace: &str,
        selector: &Selector,
    ) -> std::result::Result<Vec<Machine>, InventoryError> {
        self.selectors.lock().unwrap().push(selector.to_string());
        if *self.fail_listing.lock().unwrap() {
            return Err(InventoryError::Timeout(std::time::Duration::from_secs(10)));
        }
        Ok(self.machines.lock().unwrap().clone())
    }
}

/// Scripted answer of one member's `/health` endpoint.
#[derive(Clone, Debug)]
pub enum MemberHealth {
    /// `200 {"health":"true"}`
    Healthy,
    /// Non-200 status
    Status(u16),
    /// `200` with a body reporting something other than `"true"`
    Body(String),
}

/// Scripted member health, keyed by endpoint URL.
///
/// Endpoints are probed in order and the first failure stops the batch, as
/// the real client does. Unknown endpoints are healthy.
#[derive(Default)]
pub struct ScriptedHealth {
    script: Mutex<HashMap<String, MemberHealth>>,
    probed: Mutex<Vec<String>>,
    forgotten: Mutex<Vec<String>>,
}

impl ScriptedHealth {
    pub fn set(&self, endpoint: &str, health: MemberHealth) {
        self.script
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), health);
    }

    /// Every endpoint probed so far, in order.
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    /// Clusters released so far, as `namespace/cluster`.
    pub fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().unwrap().clone()
    }

    fn answer(&self, endpoint: &str) -> std::result::Result<(), EtcdHealthError> {
        self.probed.lock().unwrap().push(endpoint.to_string());
        let health = self
            .script
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or(MemberHealth::Healthy);
        match health {
            MemberHealth::Healthy => Ok(()),
            MemberHealth::Status(status) => Err(EtcdHealthError::NotReady {
                endpoint: endpoint.to_string(),
                status,
            }),
            MemberHealth::Body(body) => {
                etcdadm_operator::client::parse_health_response(endpoint, body.as_bytes())
            }
        }
    }
}

impl MemberHealthChecker for ScriptedHealth {
    async fn check_endpoints(
        &self,
        _namespace: &str,
        _cluster_name: &str,
        endpoints: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for endpoint in endpoints.split(',') {
            if cancel.is_cancelled() {
                return Err(EtcdHealthError::Cancelled.into());
            }
            self.answer(endpoint)?;
        }
        Ok(())
    }

    async fn forget_cluster(&self, namespace: &str, cluster_name: &str) {
        self.forgotten
            .lock()
            .unwrap()
            .push(format!("{namespace}/{cluster_name}"));
    }
}

/// Status reconciler wired to mocks.
pub type MockReconciler = StatusReconciler<MockFleet, ScriptedHealth>;

pub fn reconciler(machines: Vec<Machine>) -> MockReconciler {
    StatusReconciler::new(MockFleet::new(machines), ScriptedHealth::default())
}

/// An EtcdadmCluster owned by [`CLUSTER`] with the given desired replicas.
pub fn etcd_cluster(replicas: i32) -> EtcdadmCluster {
    let mut cluster = EtcdadmCluster::new(
        ETCD_CLUSTER,
        EtcdadmClusterSpec {
            replicas: Some(replicas),
            version: "3.4.16".to_string(),
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "cluster.x-k8s.io/v1alpha4".to_string(),
        kind: "Cluster".to_string(),
        name: CLUSTER.to_string(),
        uid: "cluster-uid".to_string(),
        controller: None,
        block_owner_deletion: None,
    }]);
    cluster
}

/// Mark a fixture as being deleted.
pub fn deleting<K: kube::Resource>(mut obj: K) -> K {
    obj.meta_mut().deletion_timestamp = Some(Time(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    obj
}

/// Builder for member machines.
pub struct MemberBuilder {
    machine: Machine,
}

impl MemberBuilder {
    /// An etcd member of [`CLUSTER`] owned by [`ETCD_CLUSTER`], without addresses.
    pub fn new(name: &str) -> Self {
        let mut machine = Machine::new(
            name,
            MachineSpec {
                cluster_name: CLUSTER.to_string(),
                ..Default::default()
            },
        );
        machine.metadata.namespace = Some(NAMESPACE.to_string());
        machine.metadata.labels = Some(
            [
                (CLUSTER_NAME_LABEL.to_string(), CLUSTER.to_string()),
                (ETCD_CLUSTER_LABEL.to_string(), String::new()),
            ]
            .into(),
        );
        machine.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "etcdcluster.cluster.x-k8s.io/v1alpha4".to_string(),
            kind: "EtcdadmCluster".to_string(),
            name: ETCD_CLUSTER.to_string(),
            uid: "etcd-uid".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);
        machine.status = Some(MachineStatus::default());
        Self { machine }
    }

    pub fn address(mut self, address_type: MachineAddressType, address: &str) -> Self {
        if let Some(status) = self.machine.status.as_mut() {
            status
                .addresses
                .push(MachineAddress::new(address_type, address));
        }
        self
    }

    pub fn internal_ip(self, address: &str) -> Self {
        self.address(MachineAddressType::InternalIP, address)
    }

    pub fn external_ip(self, address: &str) -> Self {
        self.address(MachineAddressType::ExternalIP, address)
    }

    /// Owned by a different EtcdadmCluster.
    pub fn owned_by(mut self, owner: &str) -> Self {
        if let Some(refs) = self.machine.metadata.owner_references.as_mut() {
            for r in refs.iter_mut() {
                r.name = owner.to_string();
            }
        }
        self
    }

    /// Labelled for a different cluster-api cluster.
    pub fn in_cluster(mut self, cluster: &str) -> Self {
        if let Some(labels) = self.machine.metadata.labels.as_mut() {
            labels.insert(CLUSTER_NAME_LABEL.to_string(), cluster.to_string());
        }
        self
    }

    pub fn deleting(self) -> Self {
        Self {
            machine: deleting(self.machine),
        }
    }

    pub fn build(self) -> Machine {
        self.machine
    }
}

/// Three members with internal addresses 10.0.0.1..=3.
pub fn three_members() -> Vec<Machine> {
    (1..=3)
        .map(|i| {
            MemberBuilder::new(&format!("{ETCD_CLUSTER}-{i}"))
                .internal_ip(&format!("10.0.0.{i}"))
                .build()
        })
        .collect()
}

/// Run one pass and carry the produced status into `cluster`, as the
/// controller does by patching it.
pub async fn run_pass(reconciler: &MockReconciler, cluster: &mut EtcdadmCluster) -> StatusUpdate {
    let update = reconciler
        .update_status(cluster, CLUSTER, &CancellationToken::new())
        .await;
    cluster.status = Some(update.status.clone());
    update
}
