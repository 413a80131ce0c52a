// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for etcdadm-operator.
//!
//! Uses proptest to generate random inputs and verify invariants of the
//! machine predicates, the membership selector and endpoint aggregation.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use etcdadm_operator::collections::{Machines, Selector, etcd_plane_selector_for_cluster, filters};
use etcdadm_operator::controller::{EndpointAggregation, aggregate_endpoints, member_urls};
use etcdadm_operator::crd::{
    CLUSTER_NAME_LABEL, ETCD_CLUSTER_LABEL, Machine, MachineAddress, MachineAddressType,
    MachineSpec, MachineStatus,
};

/// Strategy for valid label values usable as cluster names.
fn cluster_name() -> impl Strategy<Value = String> {
    "[a-z0-9]([a-z0-9-]{0,30}[a-z0-9])?"
}

/// Strategy for address types.
fn address_type() -> impl Strategy<Value = MachineAddressType> {
    prop_oneof![
        Just(MachineAddressType::InternalIP),
        Just(MachineAddressType::InternalDNS),
        Just(MachineAddressType::ExternalIP),
        Just(MachineAddressType::ExternalDNS),
        Just(MachineAddressType::Hostname),
    ]
}

/// Strategy for machine addresses.
fn address() -> impl Strategy<Value = MachineAddress> {
    (address_type(), 1u8..=254, 1u8..=254)
        .prop_map(|(t, a, b)| MachineAddress::new(t, format!("10.{a}.{b}.1")))
}

/// Strategy for timestamps within a few days of the epoch offset.
fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (1_700_000_000i64..1_700_500_000).prop_map(|s| Utc.timestamp_opt(s, 0).unwrap())
}

fn machine_with(addresses: Vec<MachineAddress>) -> Machine {
    let mut m = Machine::new("m", MachineSpec::default());
    m.status = Some(MachineStatus {
        addresses,
        ..Default::default()
    });
    m
}

proptest! {
    /// Property: the membership selector survives a string round trip and
    /// matches exactly the label sets carrying both membership labels.
    #[test]
    fn selector_round_trip(name in cluster_name(), has_cluster in any::<bool>(), has_role in any::<bool>(), role_value in "[a-z]{0,8}") {
        let selector = etcd_plane_selector_for_cluster(&name).unwrap();
        let parsed: Selector = selector.to_string().parse().unwrap();
        prop_assert_eq!(&parsed, &selector);

        let mut labels = BTreeMap::new();
        labels.insert("unrelated".to_string(), "x".to_string());
        if has_cluster {
            labels.insert(CLUSTER_NAME_LABEL.to_string(), name.clone());
        }
        if has_role {
            labels.insert(ETCD_CLUSTER_LABEL.to_string(), role_value);
        }
        prop_assert_eq!(parsed.matches(&labels), has_cluster && has_role);
    }

    /// Property: rollout selection holds only for creation < rollout < now.
    #[test]
    fn rollout_after_strict(created in timestamp(), rollout in timestamp(), now in timestamp()) {
        let mut m = Machine::new("m", MachineSpec::default());
        m.metadata.creation_timestamp = Some(Time(created));
        let expected = created < rollout && rollout < now;
        prop_assert_eq!(
            filters::should_rollout_after(now, Some(rollout)).matches(Some(&m)),
            expected
        );
    }

    /// Property: Not inverts any predicate on a present machine and every
    /// predicate rejects an absent one.
    #[test]
    fn not_inverts(deleting in any::<bool>(), ts in timestamp()) {
        let mut m = Machine::new("m", MachineSpec::default());
        if deleting {
            m.metadata.deletion_timestamp = Some(Time(ts));
        }
        let active = filters::is_active();
        prop_assert_eq!(filters::not(filters::is_active()).matches(Some(&m)), !active.matches(Some(&m)));
        prop_assert!(!filters::not(filters::is_active()).matches(None));
        prop_assert!(!active.matches(None));
    }

    /// Property: a member's URLs come from its internal addresses when it has
    /// any, from its external addresses otherwise, never from hostnames.
    #[test]
    fn member_urls_prefer_internal(addresses in proptest::collection::vec(address(), 0..6)) {
        let has_internal = addresses.iter().any(|a| a.address_type.is_internal());
        let expected: Vec<String> = addresses
            .iter()
            .filter(|a| {
                if has_internal {
                    a.address_type.is_internal()
                } else {
                    a.address_type.is_external()
                }
            })
            .map(|a| format!("https://{}:2379", a.address))
            .collect();

        prop_assert_eq!(member_urls(&machine_with(addresses), 2379), expected);
    }

    /// Property: aggregation either blocks on an address-less member or
    /// yields the concatenation of every member's URLs in order.
    #[test]
    fn aggregation_concatenates_members(
        members in proptest::collection::vec(proptest::collection::vec(address(), 0..4), 0..5)
    ) {
        let machines: Machines = members.iter().cloned().map(machine_with).collect();
        let result = aggregate_endpoints(&machines, 2379);

        if members.iter().any(|a| a.is_empty()) {
            let is_missing = matches!(result, EndpointAggregation::MissingAddresses { .. });
            prop_assert!(is_missing);
        } else {
            let expected: Vec<String> = machines
                .iter()
                .flat_map(|m| member_urls(m, 2379))
                .collect();
            prop_assert_eq!(result, EndpointAggregation::Endpoints(expected.join(",")));
        }
    }
}
