//! Per-cluster health client store.
//!
//! Each cluster gets one [`EtcdHealthClient`], built the first time it is
//! needed from the cluster's certificates and reused until the cluster is
//! forgotten. A failed build leaves nothing behind, so the next pass starts
//! over. Concurrent passes for the same cluster share a single build.
//!
//! Entries are dropped when a pass observes the cluster being deleted. A
//! cluster removed without such a pass keeps its entry, and a cluster
//! recreated under the same name with a new CA then reuses the stale client
//! until the operator restarts.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::certs::{CertificateError, CertificateSource, TlsCertData};
use super::etcd_client::{EtcdHealthClient, EtcdHealthError, HealthCheckConfig};

/// Errors raised while building a cluster's health client.
#[derive(Error, Debug)]
pub enum HealthClientError {
    #[error("error getting etcd CA cert for healthcheck: {0}")]
    CaCert(#[source] CertificateError),

    #[error("error getting client cert for healthcheck: {0}")]
    ClientCert(#[source] CertificateError),

    #[error("error building etcd health client: {0}")]
    Build(#[source] EtcdHealthError),

    #[error("health client construction cancelled")]
    Cancelled,
}

type ClientCell = Arc<OnceCell<EtcdHealthClient>>;

/// Lazily built health clients keyed by `namespace/cluster`.
pub struct HealthClientCache<S> {
    source: S,
    config: HealthCheckConfig,
    clients: Mutex<HashMap<String, ClientCell>>,
}

impl<S: CertificateSource> HealthClientCache<S> {
    pub fn new(source: S, config: HealthCheckConfig) -> Self {
        Self {
            source,
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Return the cluster's client, building it on first use.
    ///
    /// An existing client is returned as is; certificates are not re-read, so
    /// a rotated CA is only picked up after [`forget`](Self::forget).
    #[instrument(skip(self, cancel))]
    pub async fn get_or_init(
        &self,
        namespace: &str,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> Result<EtcdHealthClient, HealthClientError> {
        let cell = self.cell(namespace, cluster_name).await;

        let client = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HealthClientError::Cancelled),
            client = cell.get_or_try_init(|| self.build(namespace, cluster_name)) => client?,
        };
        Ok(client.clone())
    }

    /// True if a client has been built for the cluster.
    pub async fn contains(&self, namespace: &str, cluster_name: &str) -> bool {
        self.clients
            .lock()
            .await
            .get(&cache_key(namespace, cluster_name))
            .is_some_and(|cell| cell.initialized())
    }

    /// Drop the cluster's client. The next pass builds a fresh one.
    pub async fn forget(&self, namespace: &str, cluster_name: &str) -> bool {
        let removed = self
            .clients
            .lock()
            .await
            .remove(&cache_key(namespace, cluster_name))
            .is_some();
        if removed {
            debug!(namespace = %namespace, cluster = %cluster_name, "Dropped etcd health client");
        }
        removed
    }

    /// Number of clusters with an entry, built or not.
    pub async fn cluster_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    async fn cell(&self, namespace: &str, cluster_name: &str) -> ClientCell {
        let mut clients = self.clients.lock().await;
        clients
            .entry(cache_key(namespace, cluster_name))
            .or_default()
            .clone()
    }

    async fn build(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<EtcdHealthClient, HealthClientError> {
        debug!("Building etcd health client");
        let ca_cert_pem = self
            .source
            .ca_cert(namespace, cluster_name)
            .await
            .map_err(HealthClientError::CaCert)?;
        let client = self
            .source
            .client_cert(namespace, cluster_name)
            .await
            .map_err(HealthClientError::ClientCert)?;

        let certs = TlsCertData {
            ca_cert_pem,
            client,
        };
        let client =
            EtcdHealthClient::new(&certs, self.config.clone()).map_err(HealthClientError::Build)?;
        info!(namespace = %namespace, cluster = %cluster_name, "Built etcd health client");
        Ok(client)
    }
}

fn cache_key(namespace: &str, cluster_name: &str) -> String {
    format!("{namespace}/{cluster_name}")
}
