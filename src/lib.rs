//! etcdadm-operator library crate
//!
//! This module exports the controller, CRD definitions, machine collections
//! and the etcd health-check client.

pub mod client;
pub mod collections;
pub mod controller;
pub mod crd;
pub mod health;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use controller::{context::Context, reconciler::reconcile};
use crd::{EtcdadmCluster, Machine};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Run the EtcdadmCluster controller (cluster-wide).
///
/// If health_state is provided, metrics will be recorded for reconciliations.
/// Cancelling `cancel` aborts in-flight network calls of running passes.
pub async fn run_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    cancel: CancellationToken,
) {
    run_controller_scoped(client, health_state, cancel, None).await
}

/// Run the EtcdadmCluster controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    cancel: CancellationToken,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!(
        "Starting controller for EtcdadmCluster resources (scope: {})",
        scope_msg
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let metrics_state = health_state.clone();
    let ctx = Arc::new(Context::new(client.clone(), health_state, cancel));

    let clusters: Api<EtcdadmCluster> = scoped_api(client.clone(), namespace);
    let machines: Api<Machine> = scoped_api(client.clone(), namespace);

    let watcher_config = default_watcher_config();
    let (reader, cluster_stream) = create_filtered_stream(clusters, watcher_config.clone());

    // Machines are watched in full: address and condition changes live in
    // their status and must trigger a pass for the owning cluster.
    Controller::for_stream(cluster_stream, reader)
        .owns(machines, watcher_config)
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| {
            let health_state = metrics_state.clone();
            async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!("Reconciled: {}", obj.name);
                    }
                    Err(e) => {
                        // ObjectNotFound/NotFound errors are expected after deletion when
                        // related watch events trigger reconciliation for a deleted object.
                        let deleted = match &e {
                            kube::runtime::controller::Error::ObjectNotFound(obj_ref) => {
                                Some(obj_ref)
                            }
                            kube::runtime::controller::Error::ReconcilerFailed(err, obj_ref)
                                if err.is_not_found() =>
                            {
                                Some(obj_ref)
                            }
                            _ => None,
                        };
                        match deleted {
                            Some(obj_ref) => {
                                debug!("Object no longer exists (likely deleted): {:?}", e);
                                if let Some(state) = &health_state {
                                    let namespace = obj_ref.namespace.as_deref().unwrap_or("default");
                                    state.metrics.forget_cluster(namespace, &obj_ref.name);
                                }
                            }
                            None => error!("Reconciliation error: {:?}", e),
                        }
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
