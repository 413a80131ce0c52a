//! EtcdadmCluster Custom Resource Definition.
//!
//! Declares the desired size of an etcd cluster whose members run on
//! cluster-api machines, and records the observed membership and readiness
//! computed by the status reconciler.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type recorded once the etcd CA and peer certificates exist.
pub const ETCD_CERTS_GENERATED_CONDITION: &str = "EtcdCertsGenerated";

/// Client port every etcd member listens on.
pub const ETCD_CLIENT_PORT: u16 = 2379;

/// EtcdadmCluster is a custom resource describing one logical etcd cluster.
///
/// Example:
/// ```yaml
/// apiVersion: etcdcluster.cluster.x-k8s.io/v1alpha4
/// kind: EtcdadmCluster
/// metadata:
///   name: prod-etcd
///   labels:
///     cluster.x-k8s.io/cluster-name: prod
/// spec:
///   replicas: 3
///   version: "3.4.16"
///   infrastructureTemplate:
///     apiVersion: infrastructure.cluster.x-k8s.io/v1alpha4
///     kind: AWSMachineTemplate
///     name: prod-etcd
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "etcdcluster.cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "EtcdadmCluster",
    plural = "etcdadmclusters",
    shortname = "ec",
    status = "EtcdadmClusterStatus",
    namespaced,
    scale(
        spec_replicas_path = ".spec.replicas",
        status_replicas_path = ".status.replicas",
        label_selector_path = ".status.selector"
    ),
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Members", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Endpoint", "type":"string", "jsonPath":".status.endpoint", "priority":1}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdadmClusterSpec {
    /// Desired number of etcd members. Defaults to 1 when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// etcd version to run on new members.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Infrastructure provider template used to create member machines.
    pub infrastructure_template: ObjectReference,

    /// Bootstrap configuration handed to etcdadm on each machine.
    /// Opaque to this operator.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub etcdadm_config_spec: serde_json::Value,
}

impl EtcdadmClusterSpec {
    /// Desired member count, applying the default of 1 for an unset field.
    pub fn desired_replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }
}

fn preserve_unknown_fields(_: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schema.into()
}

/// Observed state of an EtcdadmCluster.
///
/// Every field is owned by the status reconciler. `replicas` and `selector`
/// are refreshed on each pass; the rest only move forward on a fully
/// successful pass.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdadmClusterStatus {
    /// Number of machines owned by this cluster whose labels match the selector.
    #[serde(rename = "replicas", default)]
    pub ready_replicas: i32,

    /// Address of the machine that initialized the cluster.
    #[serde(default)]
    pub init_machine_address: String,

    /// True once the first member has been bootstrapped.
    #[serde(default)]
    pub initialized: bool,

    /// True once all members have been created.
    #[serde(default)]
    pub creation_complete: bool,

    /// Comma-separated client URLs of all healthy members.
    #[serde(default)]
    pub endpoint: String,

    /// True once the desired member count is reached and every member
    /// answered its health check in the same pass.
    #[serde(default)]
    pub ready: bool,

    /// Serialized label selector used by the scale subresource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
}
