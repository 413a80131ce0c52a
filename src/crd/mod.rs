//! Custom Resource Definitions (CRDs) used by etcdadm-operator.
//!
//! - `EtcdadmCluster`: desired size and observed readiness of one etcd cluster
//! - `Machine`: the cluster-api machines hosting etcd members (read only)

mod etcdadm_cluster;
mod machine;

pub use etcdadm_cluster::*;
pub use machine::*;
