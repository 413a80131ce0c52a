//! Derived lifecycle state of an EtcdadmCluster.
//!
//! The state is never persisted. Each status pass computes it from what it
//! observed, and it drives requeue intervals, metrics and events:
//!
//! Provisioning → AwaitingAddresses → ProbingHealth → Ready
//!
//! A failed probe leaves the cluster in ProbingHealth. Deleting is entered
//! from any state once the resource has a deletion timestamp.

use std::fmt;
use std::time::Duration;

/// Lifecycle state derived from one status pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EtcdClusterState {
    /// Fewer (or more) owned members than desired.
    Provisioning,
    /// Member count matches but some member has no address yet.
    AwaitingAddresses,
    /// Endpoints are known; health not confirmed this pass.
    ProbingHealth,
    /// Every member passed its health probe in this pass.
    Ready,
    /// The resource is being torn down; no probing.
    Deleting,
}

impl EtcdClusterState {
    /// All states, for resetting per-state gauges.
    pub const ALL: [EtcdClusterState; 5] = [
        EtcdClusterState::Provisioning,
        EtcdClusterState::AwaitingAddresses,
        EtcdClusterState::ProbingHealth,
        EtcdClusterState::Ready,
        EtcdClusterState::Deleting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EtcdClusterState::Provisioning => "Provisioning",
            EtcdClusterState::AwaitingAddresses => "AwaitingAddresses",
            EtcdClusterState::ProbingHealth => "ProbingHealth",
            EtcdClusterState::Ready => "Ready",
            EtcdClusterState::Deleting => "Deleting",
        }
    }

    /// Requeue interval after a pass that ended in this state.
    pub fn requeue_after(&self) -> Duration {
        match self {
            EtcdClusterState::Ready => Duration::from_secs(60),
            EtcdClusterState::Deleting => Duration::from_secs(30),
            _ => Duration::from_secs(10),
        }
    }
}

impl fmt::Display for EtcdClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Readiness change observed between two passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessTransition {
    /// `status.ready` went from false to true.
    BecameReady,
    /// Nothing changed.
    Unchanged,
}

/// Compare the persisted readiness flag before and after a pass.
///
/// A pass never clears `ready`, so there is no transition back.
pub fn determine_transition(was_ready: bool, is_ready: bool) -> ReadinessTransition {
    if !was_ready && is_ready {
        ReadinessTransition::BecameReady
    } else {
        ReadinessTransition::Unchanged
    }
}
