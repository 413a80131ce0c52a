//! Composable machine predicates.
//!
//! A [`MachineFilter`] is a boolean function over an optional machine. A
//! missing machine (`None`) never matches, whatever the filter, including the
//! `and`/`or`/`not` combinators. Filters are cheap to clone and can be shared
//! across tasks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use k8s_openapi::chrono::{DateTime, Utc};
use kube::{Resource, ResourceExt};

use super::selector::{self, Selector, SelectorError};
use crate::crd::{
    MACHINE_HEALTH_CHECK_SUCCEEDED_CONDITION, MACHINE_OWNER_REMEDIATED_CONDITION, Machine,
    READY_CONDITION,
};

type Predicate = dyn Fn(&Machine) -> bool + Send + Sync;

/// A named predicate over machines.
#[derive(Clone)]
pub struct MachineFilter {
    name: String,
    predicate: Arc<Predicate>,
}

impl MachineFilter {
    /// Wrap a predicate. `name` is only used for `Debug` output.
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&Machine) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Evaluate the filter. Always false for `None`.
    pub fn matches(&self, machine: Option<&Machine>) -> bool {
        machine.is_some_and(|m| (self.predicate)(m))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for MachineFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineFilter")
            .field("name", &self.name)
            .finish()
    }
}

/// True if every filter matches. With no filters, matches any machine.
pub fn and(filters: impl IntoIterator<Item = MachineFilter>) -> MachineFilter {
    let filters: Vec<MachineFilter> = filters.into_iter().collect();
    let name = format!("And({})", join_names(&filters));
    MachineFilter::new(name, move |m| filters.iter().all(|f| f.matches(Some(m))))
}

/// True if any filter matches. With no filters, matches nothing.
pub fn or(filters: impl IntoIterator<Item = MachineFilter>) -> MachineFilter {
    let filters: Vec<MachineFilter> = filters.into_iter().collect();
    let name = format!("Or({})", join_names(&filters));
    MachineFilter::new(name, move |m| filters.iter().any(|f| f.matches(Some(m))))
}

/// Negation of `filter` for a present machine.
pub fn not(filter: MachineFilter) -> MachineFilter {
    let name = format!("Not({})", filter.name);
    MachineFilter::new(name, move |m| !filter.matches(Some(m)))
}

fn join_names(filters: &[MachineFilter]) -> String {
    filters
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Machine has an owner reference marked as controller.
pub fn has_controller_ref() -> MachineFilter {
    MachineFilter::new("HasControllerRef", |m| {
        m.owner_references()
            .iter()
            .any(|r| r.controller.unwrap_or(false))
    })
}

/// Machine has an owner reference to `owner`, compared by API group, kind and
/// name. The version in the reference's `apiVersion` is ignored.
pub fn owned_by<K>(owner: &K) -> MachineFilter
where
    K: Resource<DynamicType = ()>,
{
    let group = K::group(&()).to_string();
    let kind = K::kind(&()).to_string();
    let name = owner.meta().name.clone().unwrap_or_default();

    MachineFilter::new(format!("OwnedBy({kind}/{name})"), move |m| {
        m.owner_references().iter().any(|r| {
            let ref_group = r
                .api_version
                .split_once('/')
                .map(|(g, _)| g)
                .unwrap_or_default();
            ref_group == group && r.kind == kind && r.name == name
        })
    })
}

/// Machine is not being deleted.
pub fn is_active() -> MachineFilter {
    MachineFilter::new("IsActive", |m| m.metadata.deletion_timestamp.is_none())
}

/// Machine is being deleted.
pub fn has_deletion_timestamp() -> MachineFilter {
    MachineFilter::new("HasDeletionTimestamp", |m| {
        m.metadata.deletion_timestamp.is_some()
    })
}

/// Machine has been flagged for remediation by its owner: both the health
/// check and owner remediated conditions are present and false.
pub fn has_unhealthy_condition() -> MachineFilter {
    MachineFilter::new("HasUnhealthyCondition", |m| {
        m.is_condition_false(MACHINE_HEALTH_CHECK_SUCCEEDED_CONDITION)
            && m.is_condition_false(MACHINE_OWNER_REMEDIATED_CONDITION)
    })
}

/// Machine's `Ready` condition is true.
pub fn is_ready() -> MachineFilter {
    MachineFilter::new("IsReady", |m| m.is_condition_true(READY_CONDITION))
}

/// Machine was created before `rollout_after`, and `rollout_after` has already
/// passed at `reconciliation_time`. Both comparisons are strict. Without a
/// rollout boundary or a creation timestamp nothing matches.
pub fn should_rollout_after(
    reconciliation_time: DateTime<Utc>,
    rollout_after: Option<DateTime<Utc>>,
) -> MachineFilter {
    MachineFilter::new("ShouldRolloutAfter", move |m| {
        let (Some(rollout_after), Some(created)) =
            (rollout_after, m.metadata.creation_timestamp.as_ref())
        else {
            return false;
        };
        created.0 < rollout_after && rollout_after < reconciliation_time
    })
}

/// Machine carries an annotation with the given key.
pub fn has_annotation_key(key: impl Into<String>) -> MachineFilter {
    let key = key.into();
    MachineFilter::new(format!("HasAnnotationKey({key})"), move |m| {
        m.metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(&key))
    })
}

/// Machine's failure domain equals one of `domains`. A `None` entry matches
/// only machines without a failure domain.
pub fn in_failure_domains(domains: impl IntoIterator<Item = Option<String>>) -> MachineFilter {
    let domains: Vec<Option<String>> = domains.into_iter().collect();
    MachineFilter::new("InFailureDomains", move |m| {
        domains.iter().any(|d| *d == m.spec.failure_domain)
    })
}

/// Machine's labels satisfy `selector`.
pub fn matching_selector(selector: Selector) -> MachineFilter {
    let name = format!("MatchingSelector({selector})");
    let empty = BTreeMap::new();
    MachineFilter::new(name, move |m| {
        selector.matches(m.metadata.labels.as_ref().unwrap_or(&empty))
    })
}

/// Machine is an etcd member of the named cluster.
pub fn etcd_cluster_machines(cluster_name: &str) -> Result<MachineFilter, SelectorError> {
    let selector = selector::etcd_plane_selector_for_cluster(cluster_name)?;
    Ok(matching_selector(selector))
}
