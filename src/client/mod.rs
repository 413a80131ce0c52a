//! etcd member health client.
//!
//! Probes etcd members over mutually authenticated HTTPS and keeps one
//! client per cluster.
//!
//! ## Architecture
//!
//! - `certs`: Where the etcd CA and the client certificate pair come from
//! - `etcd_client`: The mTLS HTTP client, both probe variants and `/health` parsing
//! - `client_cache`: Race-free lazy construction of one client per cluster
//!
//! ## Example
//!
//! ```rust,ignore
//! use etcdadm_operator::client::{HealthClientCache, HealthCheckConfig, SecretCertificateSource};
//!
//! let source = SecretCertificateSource::new(kube_client, Duration::from_secs(10));
//! let cache = HealthClientCache::new(source, HealthCheckConfig::default());
//! let client = cache.get_or_init("default", "prod", &cancel).await?;
//! client.check_endpoints("https://10.0.0.1:2379,https://10.0.0.2:2379", &cancel).await?;
//! ```

pub mod certs;
pub mod client_cache;
pub mod etcd_client;

pub use certs::{
    CertificateError, CertificateSource, ClientCertPair, SecretCertificateSource, TlsCertData,
};
pub use client_cache::{HealthClientCache, HealthClientError};
pub use etcd_client::{
    EtcdHealthClient, EtcdHealthError, HealthCheckConfig, build_tls_config, parse_health_response,
};
