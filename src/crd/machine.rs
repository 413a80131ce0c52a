//! Typed subset of the cluster-api `Machine` resource.
//!
//! Only the fields the etcd status reconciler reads are modelled. Machines
//! are created, bootstrapped and deleted by cluster-api; this operator never
//! writes them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the name of the cluster-api `Cluster` a machine belongs to.
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label marking a machine as an etcd member. Only its presence matters.
pub const ETCD_CLUSTER_LABEL: &str = "cluster.x-k8s.io/etcd-cluster";

/// API group shared by cluster-api core types.
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// Condition set by the machine health check controller.
pub const MACHINE_HEALTH_CHECK_SUCCEEDED_CONDITION: &str = "HealthCheckSucceeded";

/// Condition set when the owner controller is expected to remediate the machine.
pub const MACHINE_OWNER_REMEDIATED_CONDITION: &str = "OwnerRemediated";

/// Summary readiness condition.
pub const READY_CONDITION: &str = "Ready";

/// Machine is the cluster-api representation of one provisioned node.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "Machine",
    plural = "machines",
    status = "MachineStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the cluster this machine belongs to.
    #[serde(default)]
    pub cluster_name: String,

    /// Failure domain the machine was placed in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,

    /// Kubernetes version the machine was bootstrapped with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Provider-specific identifier of the underlying instance.
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Observed state of a machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Addresses reported by the infrastructure provider once the node boots.
    #[serde(default)]
    pub addresses: Vec<MachineAddress>,

    /// Conditions reported on the machine.
    #[serde(default)]
    pub conditions: Vec<MachineCondition>,

    /// Lifecycle phase as reported by cluster-api.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// A single network address of a machine.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct MachineAddress {
    /// Kind of address.
    #[serde(rename = "type")]
    pub address_type: MachineAddressType,
    /// The address itself (IP or DNS name).
    pub address: String,
}

impl MachineAddress {
    /// Create a new address entry.
    pub fn new(address_type: MachineAddressType, address: impl Into<String>) -> Self {
        Self {
            address_type,
            address: address.into(),
        }
    }
}

/// Address kinds reported by infrastructure providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum MachineAddressType {
    Hostname,
    ExternalIP,
    InternalIP,
    ExternalDNS,
    InternalDNS,
}

impl MachineAddressType {
    /// True for addresses on the cluster-internal network.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            MachineAddressType::InternalIP | MachineAddressType::InternalDNS
        )
    }

    /// True for externally reachable addresses.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            MachineAddressType::ExternalIP | MachineAddressType::ExternalDNS
        )
    }
}

impl std::fmt::Display for MachineAddressType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineAddressType::Hostname => write!(f, "Hostname"),
            MachineAddressType::ExternalIP => write!(f, "ExternalIP"),
            MachineAddressType::InternalIP => write!(f, "InternalIP"),
            MachineAddressType::ExternalDNS => write!(f, "ExternalDNS"),
            MachineAddressType::InternalDNS => write!(f, "InternalDNS"),
        }
    }
}

/// cluster-api condition as it appears on a machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineCondition {
    /// Condition type.
    pub r#type: String,
    /// "True", "False" or "Unknown".
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MachineCondition {
    /// Create a condition with the given type and boolean status.
    pub fn new(condition_type: &str, status: bool) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: None,
            message: None,
        }
    }
}

impl Machine {
    /// Addresses reported so far (empty until the node has booted).
    pub fn addresses(&self) -> &[MachineAddress] {
        self.status
            .as_ref()
            .map(|s| s.addresses.as_slice())
            .unwrap_or_default()
    }

    /// Look up a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&MachineCondition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.r#type == condition_type)
    }

    /// True if the condition is present with status "True".
    pub fn is_condition_true(&self, condition_type: &str) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == "True")
    }

    /// True if the condition is present with status "False".
    pub fn is_condition_false(&self, condition_type: &str) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == "False")
    }
}
