//! Shared context for the controller.
//!
//! Holds the Kubernetes client, the event reporter, the status reconciler
//! with its per-cluster health clients, and the shutdown token every pass
//! observes.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tokio_util::sync::CancellationToken;

use super::status::StatusReconciler;
use crate::client::{HealthCheckConfig, HealthClientCache, SecretCertificateSource};
use crate::collections::KubeMachineInventory;
use crate::crd::EtcdadmCluster;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "etcdadm-operator";

/// Status reconciler backed by the Kubernetes API.
pub type KubeStatusReconciler =
    StatusReconciler<KubeMachineInventory, HealthClientCache<SecretCertificateSource>>;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Computes status from machines and member health
    pub status: Arc<KubeStatusReconciler>,
    /// Cancelled when the operator shuts down
    pub cancel: CancellationToken,
}

impl Context {
    /// Create a new context with the default health check configuration
    pub fn new(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_config(client, health_state, cancel, HealthCheckConfig::default())
    }

    pub fn with_config(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        cancel: CancellationToken,
        config: HealthCheckConfig,
    ) -> Self {
        let inventory = KubeMachineInventory::new(client.clone(), config.collaborator_timeout);
        let certs = SecretCertificateSource::new(client.clone(), config.collaborator_timeout);
        let port = config.port;
        let status = StatusReconciler::new(inventory, HealthClientCache::new(certs, config))
            .with_port(port);

        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            status: Arc::new(status),
            cancel,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a cluster
    pub async fn publish_normal_event(
        &self,
        resource: &EtcdadmCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a cluster
    pub async fn publish_warning_event(
        &self,
        resource: &EtcdadmCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }

    async fn publish(
        &self,
        resource: &EtcdadmCluster,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
