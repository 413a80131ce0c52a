//! Reconciliation loop for EtcdadmCluster.
//!
//! Each pass resolves the owning cluster-api cluster, runs the status pass,
//! persists whatever status it produced, and turns the outcome into events,
//! metrics and a requeue interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::{
    controller::{
        context::{Context, FIELD_MANAGER},
        error::Error,
        state_machine::{ReadinessTransition, determine_transition},
        status::{PassOutcome, StatusUpdate, resolve_cluster_name},
    },
    crd::{EtcdadmCluster, EtcdadmClusterStatus},
};

/// Requeue interval while the owning cluster is not yet linked.
const AWAIT_OWNER_REQUEUE: Duration = Duration::from_secs(10);

/// Reconcile an EtcdadmCluster
///
/// Status fields computed before a failure are persisted before the error is
/// returned, so the member count and selector are always current.
pub async fn reconcile(obj: Arc<EtcdadmCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling EtcdadmCluster");

    let Some(cluster_name) = resolve_cluster_name(&obj) else {
        info!(name = %name, "Waiting for cluster controller to set owner reference");
        return Ok(Action::requeue(AWAIT_OWNER_REQUEUE));
    };

    let previous = obj.status.clone().unwrap_or_default();
    let update = ctx
        .status
        .update_status(&obj, &cluster_name, &ctx.cancel)
        .await;

    if update.status != previous {
        let api: Api<EtcdadmCluster> = Api::namespaced(ctx.client.clone(), &namespace);
        patch_status(&api, &name, &update.status).await?;
    }

    publish_events(&obj, &ctx, &previous, &update).await;
    record_metrics(&ctx, &namespace, &name, &obj, &update, start_time);

    let state = update.state();
    let outcome = update.result?;
    debug!(name = %name, state = ?state, outcome = ?outcome, "Status pass complete");

    Ok(Action::requeue(outcome.state().requeue_after()))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<EtcdadmCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        if let Some(ref health_state) = ctx.health_state {
            health_state.metrics.forget_cluster(&namespace, &name);
        }
        return Action::await_change();
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if matches!(error, Error::Cancelled) {
        debug!(name = %name, "Reconciliation cancelled by shutdown");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

async fn publish_events(
    obj: &EtcdadmCluster,
    ctx: &Context,
    previous: &EtcdadmClusterStatus,
    update: &StatusUpdate,
) {
    if determine_transition(previous.ready, update.status.ready)
        == ReadinessTransition::BecameReady
    {
        ctx.publish_normal_event(
            obj,
            "EtcdReady",
            "HealthCheck",
            Some(format!(
                "All {} etcd members are healthy",
                update.status.ready_replicas
            )),
        )
        .await;
    }

    if let Err(e) = &update.result {
        if e.is_health_check_failure() {
            ctx.publish_warning_event(obj, "HealthCheckFailed", "HealthCheck", Some(e.to_string()))
                .await;
        }
    }
}

fn record_metrics(
    ctx: &Context,
    namespace: &str,
    name: &str,
    obj: &EtcdadmCluster,
    update: &StatusUpdate,
    start_time: Instant,
) {
    let Some(ref health_state) = ctx.health_state else {
        return;
    };
    let metrics = &health_state.metrics;

    metrics.record_reconcile(namespace, name, start_time.elapsed().as_secs_f64());
    if update.result.is_ok() {
        health_state.mark_reconciled();
    }
    metrics.set_cluster_replicas(
        namespace,
        name,
        i64::from(obj.spec.desired_replicas()),
        i64::from(update.status.ready_replicas),
    );
    if let Some(state) = update.state() {
        metrics.set_cluster_state(namespace, name, state.as_str());
    }
    match &update.result {
        Ok(PassOutcome::Ready { .. }) => metrics.record_member_probe("success"),
        Err(Error::HealthCheck(e)) => metrics.record_member_probe(e.reason()),
        _ => {}
    }
}

/// Update the status of an EtcdadmCluster
async fn patch_status(
    api: &Api<EtcdadmCluster>,
    name: &str,
    status: &EtcdadmClusterStatus,
) -> Result<(), Error> {
    let patch = serde_json::json!({
        "status": status
    });

    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}
