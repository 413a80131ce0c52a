//! Controller module for etcdadm-operator.
//!
//! Contains the reconciliation loop, the status pass and its stages, the
//! derived cluster state, endpoint aggregation, and error handling.

pub mod context;
pub mod endpoints;
pub mod error;
pub mod reconciler;
pub mod state_machine;
pub mod status;

pub use endpoints::{EndpointAggregation, aggregate_endpoints, member_urls};
pub use error::{Error, Result};
pub use state_machine::EtcdClusterState;
pub use status::{
    MemberHealthChecker, PassOutcome, StatusReconciler, StatusUpdate, resolve_cluster_name,
};
