//! Mutually authenticated health probes against etcd members.
//!
//! A member is healthy when `GET <endpoint>/health` answers `200` with a JSON
//! body whose `health` field is the string `"true"`. Two probe flavours are
//! offered: [`EtcdHealthClient::probe_member`] dials the member's port first
//! so a node that is not listening yet fails fast, and
//! [`EtcdHealthClient::check_endpoints`] walks a comma separated endpoint list
//! without the dial and without reusing connections.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{StatusCode, Url, header};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::certs::TlsCertData;
use crate::crd::ETCD_CLIENT_PORT;

/// Errors raised by health probes.
#[derive(Error, Debug)]
pub enum EtcdHealthError {
    #[error("etcd endpoint port is not open: {endpoint}")]
    PortNotOpen { endpoint: String },

    #[error("invalid etcd endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("error checking etcd member health at {endpoint}: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("etcd member not ready, retry: {endpoint} returned HTTP {status}")]
    NotReady { endpoint: String, status: u16 },

    #[error("etcd member failed healthcheck: {endpoint} /health returned {health:?} (payload {payload:?})")]
    Unhealthy {
        endpoint: String,
        health: String,
        payload: String,
    },

    #[error("malformed health response from {endpoint}: {source}")]
    MalformedResponse {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("health check of {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("health check cancelled")]
    Cancelled,
}

impl EtcdHealthError {
    /// Probe failures clear up as members come up; configuration problems do not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EtcdHealthError::InvalidEndpoint { .. }
                | EtcdHealthError::Tls(_)
                | EtcdHealthError::Cancelled
        )
    }

    /// Short label used for metrics and events.
    pub fn reason(&self) -> &'static str {
        match self {
            EtcdHealthError::PortNotOpen { .. } => "port_not_open",
            EtcdHealthError::InvalidEndpoint { .. } => "invalid_endpoint",
            EtcdHealthError::Request { .. } => "request_error",
            EtcdHealthError::NotReady { .. } => "not_ready",
            EtcdHealthError::Unhealthy { .. } => "unhealthy",
            EtcdHealthError::MalformedResponse { .. } => "malformed_response",
            EtcdHealthError::Tls(_) => "tls_error",
            EtcdHealthError::Timeout { .. } => "timeout",
            EtcdHealthError::Cancelled => "cancelled",
        }
    }
}

/// Tunables for health probes and the calls that precede them.
#[derive(Clone, Debug)]
pub struct HealthCheckConfig {
    /// Client port of etcd members.
    pub port: u16,
    /// Path of the health endpoint.
    pub health_path: String,
    /// Deadline for the pre-flight TCP dial.
    pub dial_timeout: Duration,
    /// Deadline for one health request including the body.
    pub request_timeout: Duration,
    /// Deadline for fleet listing and certificate retrieval.
    pub collaborator_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            port: ETCD_CLIENT_PORT,
            health_path: "/health".to_string(),
            dial_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            collaborator_timeout: Duration::from_secs(10),
        }
    }
}

impl HealthCheckConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }
}

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(default)]
    health: String,
}

/// Interpret a `/health` body.
///
/// Malformed JSON and a well formed body reporting anything but `"true"` are
/// kept apart so logs can tell a broken member from an unhealthy one.
pub fn parse_health_response(endpoint: &str, body: &[u8]) -> Result<(), EtcdHealthError> {
    let parsed: HealthResponse =
        serde_json::from_slice(body).map_err(|source| EtcdHealthError::MalformedResponse {
            endpoint: endpoint.to_string(),
            source,
        })?;

    if parsed.health == "true" {
        Ok(())
    } else {
        Err(EtcdHealthError::Unhealthy {
            endpoint: endpoint.to_string(),
            health: parsed.health,
            payload: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

/// Build a rustls client configuration trusting `ca_cert_pem` and presenting
/// the client pair.
pub fn build_tls_config(certs: &TlsCertData) -> Result<ClientConfig, EtcdHealthError> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut certs.ca_cert_pem.as_slice()) {
        let cert = cert
            .map_err(|e| EtcdHealthError::Tls(format!("Failed to parse CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| EtcdHealthError::Tls(format!("Failed to add CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(EtcdHealthError::Tls(
            "CA bundle contains no certificates".to_string(),
        ));
    }

    let chain: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut certs.client.cert_pem.as_slice())
            .collect::<Result<_, _>>()
            .map_err(|e| EtcdHealthError::Tls(format!("Failed to parse client certificate: {e}")))?;
    if chain.is_empty() {
        return Err(EtcdHealthError::Tls(
            "client certificate PEM contains no certificates".to_string(),
        ));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut certs.client.key_pem.as_slice())
        .map_err(|e| EtcdHealthError::Tls(format!("Failed to parse client key: {e}")))?
        .ok_or_else(|| EtcdHealthError::Tls("client key PEM contains no private key".to_string()))?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| EtcdHealthError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| EtcdHealthError::Tls(format!("Invalid client certificate: {e}")))
}

/// Run `fut` under a deadline, aborting early on cancellation.
async fn with_deadline<T>(
    endpoint: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, EtcdHealthError>>,
) -> Result<T, EtcdHealthError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EtcdHealthError::Cancelled),
        res = tokio::time::timeout(timeout, fut) => res.map_err(|_| EtcdHealthError::Timeout {
            endpoint: endpoint.to_string(),
            timeout,
        })?,
    }
}

/// HTTP client probing etcd members of one cluster.
#[derive(Clone, Debug)]
pub struct EtcdHealthClient {
    http: reqwest::Client,
    config: HealthCheckConfig,
}

impl EtcdHealthClient {
    /// Build a client that trusts the cluster CA and authenticates with the
    /// client pair.
    pub fn new(certs: &TlsCertData, config: HealthCheckConfig) -> Result<Self, EtcdHealthError> {
        let tls = build_tls_config(certs)?;
        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(config.dial_timeout)
            .build()
            .map_err(|e| EtcdHealthError::Tls(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Wrap an existing HTTP client.
    pub fn with_http_client(http: reqwest::Client, config: HealthCheckConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Base URL of a member reachable at `address`.
    pub fn member_url(&self, address: &str) -> String {
        format!("https://{}:{}", address, self.config.port)
    }

    /// Probe one member, dialling its port before sending the request.
    #[instrument(skip(self, cancel))]
    pub async fn probe_member(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<(), EtcdHealthError> {
        let url = self.health_url(endpoint)?;
        self.ensure_port_open(endpoint, &url, cancel).await?;
        self.get_health(endpoint, url, false, cancel).await
    }

    /// Probe every endpoint of a comma separated list in order, stopping at
    /// the first failure. Connections are closed after each probe.
    #[instrument(skip(self, cancel))]
    pub async fn check_endpoints(
        &self,
        endpoints: &str,
        cancel: &CancellationToken,
    ) -> Result<(), EtcdHealthError> {
        for endpoint in endpoints.split(',') {
            let url = self.health_url(endpoint)?;
            self.get_health(endpoint, url, true, cancel).await?;
            debug!(endpoint = %endpoint, "etcd member healthy");
        }
        Ok(())
    }

    fn health_url(&self, endpoint: &str) -> Result<Url, EtcdHealthError> {
        let invalid = |reason: String| EtcdHealthError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };
        if endpoint.trim().is_empty() {
            return Err(invalid("empty endpoint".to_string()));
        }
        let raw = format!("{}{}", endpoint.trim_end_matches('/'), self.config.health_path);
        let url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }

    async fn ensure_port_open(
        &self,
        endpoint: &str,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<(), EtcdHealthError> {
        let host = url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port_or_known_default().unwrap_or(self.config.port);
        let port_not_open = || EtcdHealthError::PortNotOpen {
            endpoint: endpoint.to_string(),
        };

        let dial = async {
            TcpStream::connect((host.as_str(), port))
                .await
                .map(drop)
                .map_err(|e| {
                    debug!(endpoint = %endpoint, error = %e, "Dial failed");
                    port_not_open()
                })
        };
        match with_deadline(endpoint, self.config.dial_timeout, cancel, dial).await {
            Err(EtcdHealthError::Timeout { .. }) => Err(port_not_open()),
            other => other,
        }
    }

    async fn get_health(
        &self,
        endpoint: &str,
        url: Url,
        close_connection: bool,
        cancel: &CancellationToken,
    ) -> Result<(), EtcdHealthError> {
        let request_error = |source| EtcdHealthError::Request {
            endpoint: endpoint.to_string(),
            source,
        };

        let fetch = async {
            let mut request = self.http.get(url);
            if close_connection {
                request = request.header(header::CONNECTION, "close");
            }
            let response = request.send().await.map_err(request_error)?;
            let status = response.status();
            let body = response.bytes().await.map_err(request_error)?;
            Ok::<_, EtcdHealthError>((status, body))
        };
        let (status, body) =
            with_deadline(endpoint, self.config.request_timeout, cancel, fetch).await?;

        if status != StatusCode::OK {
            warn!(endpoint = %endpoint, status = status.as_u16(), "etcd member not ready");
            return Err(EtcdHealthError::NotReady {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        parse_health_response(endpoint, &body)
    }
}
