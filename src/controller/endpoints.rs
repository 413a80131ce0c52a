//! Client endpoint aggregation for etcd members.
//!
//! Each member contributes `https://<address>:<port>` for every internal
//! address it reports. Only a member without any internal address falls back
//! to its external addresses. Duplicate addresses produce duplicate URLs.

use kube::ResourceExt;

use crate::collections::Machines;
use crate::crd::Machine;

/// Result of aggregating the endpoints of an owned member set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAggregation {
    /// Comma separated member URLs in member order.
    Endpoints(String),
    /// A member has not reported any address yet, so no endpoint list is
    /// produced for the cluster.
    MissingAddresses { machine: String },
}

/// Client URLs of one member, internal addresses first-and-only.
pub fn member_urls(machine: &Machine, port: u16) -> Vec<String> {
    let addresses = machine.addresses();
    let url = |address: &str| format!("https://{address}:{port}");

    let internal: Vec<String> = addresses
        .iter()
        .filter(|a| a.address_type.is_internal())
        .map(|a| url(&a.address))
        .collect();
    if !internal.is_empty() {
        return internal;
    }

    addresses
        .iter()
        .filter(|a| a.address_type.is_external())
        .map(|a| url(&a.address))
        .collect()
}

/// Build the comma separated endpoint list of all members.
pub fn aggregate_endpoints(machines: &Machines, port: u16) -> EndpointAggregation {
    let mut urls = Vec::new();
    for machine in machines {
        if machine.addresses().is_empty() {
            return EndpointAggregation::MissingAddresses {
                machine: machine.name_any(),
            };
        }
        urls.extend(member_urls(machine, port));
    }
    EndpointAggregation::Endpoints(urls.join(","))
}
