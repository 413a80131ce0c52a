//! Machine collections and the fleet inventory they are listed from.

use std::future::Future;
use std::time::Duration;

use kube::api::{Api, ListParams};
use kube::{Client, Resource, ResourceExt};
use thiserror::Error;
use tracing::{debug, instrument};

use super::filters::{self, MachineFilter};
use super::selector::{self, Selector, SelectorError};
use crate::crd::Machine;

/// Errors raised while listing machines from the fleet inventory.
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid membership selector: {0}")]
    Selector(#[from] SelectorError),

    #[error("listing machines timed out after {0:?}")]
    Timeout(Duration),
}

impl InventoryError {
    /// Listing failures are transient; a bad selector is not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, InventoryError::Selector(_))
    }
}

/// An owned set of machines with cluster-api style filtering helpers.
#[derive(Clone, Debug, Default)]
pub struct Machines {
    items: Vec<Machine>,
}

impl Machines {
    pub fn new(items: Vec<Machine>) -> Self {
        Self { items }
    }

    /// Keep only machines matching `filter`.
    pub fn filter(self, filter: &MachineFilter) -> Self {
        Self {
            items: self
                .items
                .into_iter()
                .filter(|m| filter.matches(Some(m)))
                .collect(),
        }
    }

    /// True if any machine matches `filter`.
    pub fn any(&self, filter: &MachineFilter) -> bool {
        self.items.iter().any(|m| filter.matches(Some(m)))
    }

    /// Machine names in collection order.
    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|m| m.name_any()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Machine> {
        self.items.iter()
    }

    /// Machines ordered oldest first; ties and missing timestamps fall back to name.
    pub fn sorted_by_creation_timestamp(&self) -> Vec<&Machine> {
        let mut sorted: Vec<&Machine> = self.items.iter().collect();
        sorted.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.name_any().cmp(&b.name_any()))
        });
        sorted
    }

    pub fn into_vec(self) -> Vec<Machine> {
        self.items
    }
}

impl FromIterator<Machine> for Machines {
    fn from_iter<I: IntoIterator<Item = Machine>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for Machines {
    type Item = Machine;
    type IntoIter = std::vec::IntoIter<Machine>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Machines {
    type Item = &'a Machine;
    type IntoIter = std::slice::Iter<'a, Machine>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Source of machine records for a namespace.
pub trait MachineInventory: Send + Sync {
    /// List machines in `namespace` whose labels match `selector`.
    fn list_machines(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<Machine>, InventoryError>> + Send;
}

/// Inventory backed by the Kubernetes API. The selector is applied
/// server-side.
#[derive(Clone)]
pub struct KubeMachineInventory {
    client: Client,
    timeout: Duration,
}

impl KubeMachineInventory {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl MachineInventory for KubeMachineInventory {
    #[instrument(skip(self, selector), fields(selector = %selector))]
    async fn list_machines(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Machine>, InventoryError> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&selector.to_string());

        let list = tokio::time::timeout(self.timeout, api.list(&params))
            .await
            .map_err(|_| InventoryError::Timeout(self.timeout))??;
        debug!(count = list.items.len(), "Listed machines");
        Ok(list.items)
    }
}

/// Etcd member machines of `cluster_name` that are owned by `owner`.
///
/// Lists by the etcd plane selector, then re-applies the selector and the
/// ownership check locally so inventories that ignore the selector still
/// produce the right set. Deleting machines are kept.
pub async fn get_filtered_machines_for_cluster<I, K>(
    inventory: &I,
    namespace: &str,
    cluster_name: &str,
    owner: &K,
) -> Result<Machines, InventoryError>
where
    I: MachineInventory,
    K: Resource<DynamicType = ()>,
{
    let selector = selector::etcd_plane_selector_for_cluster(cluster_name)?;
    let listed = inventory.list_machines(namespace, &selector).await?;

    let membership = filters::and([
        filters::matching_selector(selector),
        filters::owned_by(owner),
    ]);
    Ok(Machines::new(listed).filter(&membership))
}
