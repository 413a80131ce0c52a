//! Certificates used to authenticate against etcd members.
//!
//! The etcd CA and the apiserver client pair are written to Secrets by the
//! etcdadm bootstrap provider. This module only reads them.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use thiserror::Error;
use tracing::{debug, instrument};

/// Key holding a PEM certificate in a TLS Secret.
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Key holding a PEM private key in a TLS Secret.
pub const TLS_KEY_KEY: &str = "tls.key";

/// Errors raised while fetching certificates.
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("secret {secret} has no {key} entry")]
    MissingKey { secret: String, key: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("certificate retrieval timed out after {0:?}")]
    Timeout(Duration),
}

/// TLS client certificate and key, both PEM encoded.
#[derive(Clone)]
pub struct ClientCertPair {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for ClientCertPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCertPair")
            .field("cert_pem", &format!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Everything needed to build a mutually authenticated client.
#[derive(Clone, Debug)]
pub struct TlsCertData {
    /// CA certificate(s) trusted for member server certificates, PEM.
    pub ca_cert_pem: Vec<u8>,
    /// Client certificate and key presented to members.
    pub client: ClientCertPair,
}

/// Source of the etcd CA and client certificate for a cluster.
pub trait CertificateSource: Send + Sync {
    /// PEM encoded CA certificate of the cluster's etcd.
    fn ca_cert(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> impl Future<Output = Result<Vec<u8>, CertificateError>> + Send;

    /// Client certificate and key accepted by the cluster's etcd members.
    fn client_cert(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> impl Future<Output = Result<ClientCertPair, CertificateError>> + Send;
}

/// Name of the Secret holding the etcd CA.
pub fn etcd_ca_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-etcd")
}

/// Name of the Secret holding the apiserver's etcd client pair.
pub fn etcd_client_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-apiserver-etcd-client")
}

/// Reads certificates from Secrets in the cluster's namespace.
#[derive(Clone)]
pub struct SecretCertificateSource {
    client: Client,
    timeout: Duration,
}

impl SecretCertificateSource {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, ByteString>, CertificateError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = tokio::time::timeout(self.timeout, api.get_opt(name))
            .await
            .map_err(|_| CertificateError::Timeout(self.timeout))??
            .ok_or_else(|| CertificateError::SecretNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        debug!(secret = %name, "Read certificate secret");
        Ok(secret.data.unwrap_or_default())
    }
}

fn take_key(
    data: &mut BTreeMap<String, ByteString>,
    secret: &str,
    key: &str,
) -> Result<Vec<u8>, CertificateError> {
    data.remove(key)
        .map(|b| b.0)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| CertificateError::MissingKey {
            secret: secret.to_string(),
            key: key.to_string(),
        })
}

impl CertificateSource for SecretCertificateSource {
    #[instrument(skip(self))]
    async fn ca_cert(&self, namespace: &str, cluster_name: &str) -> Result<Vec<u8>, CertificateError> {
        let name = etcd_ca_secret_name(cluster_name);
        let mut data = self.secret_data(namespace, &name).await?;
        take_key(&mut data, &name, TLS_CERT_KEY)
    }

    #[instrument(skip(self))]
    async fn client_cert(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<ClientCertPair, CertificateError> {
        let name = etcd_client_secret_name(cluster_name);
        let mut data = self.secret_data(namespace, &name).await?;
        Ok(ClientCertPair {
            cert_pem: take_key(&mut data, &name, TLS_CERT_KEY)?,
            key_pem: take_key(&mut data, &name, TLS_KEY_KEY)?,
        })
    }
}
