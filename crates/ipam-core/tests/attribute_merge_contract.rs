//! Contract Test: Extensible Attribute Ownership
//!
//! Constraints verified:
//! - Attributes added remotely by other tools survive every apply
//! - Externally added attributes never appear in tracked state
//! - Redeclaring an external key makes it locally owned
//! - Removing a locally owned key removes it remotely
//! - Re-applying an unchanged declaration writes nothing
//!
//! If this test fails, the reconciler is discarding data it does not own.

mod common;

use common::*;
use ipam_core::attrs::{self, INTERNAL_ID_ATTR};
use ipam_core::state::MemoryStateStore;
use ipam_core::traits::StateStore;
use ipam_core::{DeclaredRecord, ReconcileEvent};

fn declared() -> DeclaredRecord {
    DeclaredRecord::new("a.example.com")
        .with_address("2000::1")
        .with_ext_attr("Location", "NY")
}

#[tokio::test]
async fn external_attribute_survives_unchanged_apply() {
    let ipam = SimulatedIpam::new();
    let store = MemoryStateStore::new();
    let (reconciler, _rx) = reconciler(&ipam, &store);

    let state = reconciler.apply("a", &declared()).await.unwrap();
    ipam.set_ext_attr(&state.reference, "Site", "X");

    let state = reconciler.apply("a", &declared()).await.unwrap();

    let remote = ipam.record(&state.reference).unwrap();
    assert_eq!(remote.ext_attrs.get("Site").map(String::as_str), Some("X"));
    assert_eq!(remote.ext_attrs.get("Location").map(String::as_str), Some("NY"));
    assert_eq!(state.ext_attrs, attrs(&[("Location", "NY")]));
    assert_eq!(ipam.update_count(), 0, "unchanged declaration must not write");

    let refreshed = reconciler.refresh(&state).await.unwrap();
    assert!(!refreshed.ext_attrs.contains_key("Site"));
    assert!(!refreshed.ext_attrs.contains_key(INTERNAL_ID_ATTR));
}

#[tokio::test]
async fn removed_local_attribute_is_removed_remotely() {
    let ipam = SimulatedIpam::new();
    let store = MemoryStateStore::new();
    let (reconciler, _rx) = reconciler(&ipam, &store);

    let with_site = declared().with_ext_attr("Site", "HQ");
    let state = reconciler.apply("a", &with_site).await.unwrap();
    ipam.set_ext_attr(&state.reference, "Owner", "ops");

    let state = reconciler.apply("a", &declared()).await.unwrap();

    let remote = ipam.record(&state.reference).unwrap();
    assert!(!remote.ext_attrs.contains_key("Site"));
    assert_eq!(remote.ext_attrs.get("Owner").map(String::as_str), Some("ops"));
    assert_eq!(
        store.get_record("a").await.unwrap().unwrap().ext_attrs,
        attrs(&[("Location", "NY")])
    );
}

#[tokio::test]
async fn redeclared_external_attribute_becomes_locally_owned() {
    let ipam = SimulatedIpam::new();
    let store = MemoryStateStore::new();
    let (reconciler, _rx) = reconciler(&ipam, &store);

    let state = reconciler.apply("a", &declared()).await.unwrap();
    ipam.set_ext_attr(&state.reference, "Site", "Blr");

    // Declaring the key with the value it already has adopts it
    let adopted = declared().with_ext_attr("Site", "Blr");
    let state = reconciler.apply("a", &adopted).await.unwrap();
    assert_eq!(state.ext_attrs.get("Site").map(String::as_str), Some("Blr"));
    assert_eq!(ipam.update_count(), 0);

    // Now that it is owned, dropping it deletes it
    let state = reconciler.apply("a", &declared()).await.unwrap();
    let remote = ipam.record(&state.reference).unwrap();
    assert!(!remote.ext_attrs.contains_key("Site"));
}

#[tokio::test]
async fn declared_value_overrides_remote_change() {
    let ipam = SimulatedIpam::new();
    let store = MemoryStateStore::new();
    let (reconciler, mut rx) = reconciler(&ipam, &store);

    let state = reconciler.apply("a", &declared()).await.unwrap();
    ipam.set_ext_attr(&state.reference, "Location", "Boston");
    drain(&mut rx);

    let state = reconciler.apply("a", &declared()).await.unwrap();

    let remote = ipam.record(&state.reference).unwrap();
    assert_eq!(remote.ext_attrs.get("Location").map(String::as_str), Some("NY"));

    let events = drain(&mut rx);
    assert!(events.contains(&ReconcileEvent::Drifted {
        fqdn: "a.example.com".to_string(),
        keys: vec!["Location".to_string()],
    }));
}

#[tokio::test]
async fn correlation_id_is_stamped_and_kept() {
    let ipam = SimulatedIpam::new();
    let store = MemoryStateStore::new();
    let (reconciler, _rx) = reconciler(&ipam, &store);

    // A declared value for the reserved key is ignored
    let spoofed = declared().with_ext_attr(INTERNAL_ID_ATTR, "spoofed");
    let state = reconciler.apply("a", &spoofed).await.unwrap();

    let remote = ipam.record(&state.reference).unwrap();
    assert_eq!(
        remote.ext_attrs.get(INTERNAL_ID_ATTR),
        Some(&state.internal_id)
    );
    assert!(!state.ext_attrs.contains_key(INTERNAL_ID_ATTR));
}

#[test]
fn merge_is_idempotent_and_non_destructive() {
    let samples = [
        (attrs(&[("Location", "NY")]), attrs(&[("Site", "X")])),
        (attrs(&[]), attrs(&[("Site", "X"), ("Owner", "ops")])),
        (attrs(&[("Site", "Y")]), attrs(&[("Site", "X"), ("Owner", "ops")])),
        (attrs(&[("A", "1"), ("B", "2")]), attrs(&[])),
    ];

    for (declared, remote) in samples {
        let empty = attrs(&[]);
        let first = attrs::merge(&declared, &remote, &empty).write_set;
        let second = attrs::merge(&declared, &first, &declared).write_set;
        assert_eq!(first, second);

        for key in remote.keys().filter(|k| !declared.contains_key(*k)) {
            assert!(first.contains_key(key), "{} was discarded", key);
        }
    }
}
