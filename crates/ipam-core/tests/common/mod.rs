//! Test doubles and common utilities for contract tests
//!
//! `SimulatedIpam` is an in-memory stand-in for the remote IPAM service. Clones
//! share the same records and counters, so a test can hand one clone to the
//! reconciler and keep another to inspect calls and mutate records
//! out-of-band, the way another tool would.

#![allow(dead_code)]

use ipam_core::attrs::ExtAttrs;
use ipam_core::config::ReconcilerSettings;
use ipam_core::error::{Error, Result};
use ipam_core::resolve::FilterParams;
use ipam_core::state::MemoryStateStore;
use ipam_core::traits::{RecordGateway, RecordKind, RecordPayload, RemoteRecord, TtlSetting};
use ipam_core::{ReconcileEvent, Reconciler};
use ipnet::Ipv6Net;
use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct Counters {
    get: AtomicUsize,
    search: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
    allocate: AtomicUsize,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, RemoteRecord>,
    networks: Vec<(String, Ipv6Net)>,
    next_id: usize,
    failures_left: usize,
    allocate_outside: bool,
}

impl Inner {
    fn new_reference(&mut self, fqdn: &str, view: &str) -> String {
        self.next_id += 1;
        format!("record:aaaa/ZG5z{:04}:{}/{}", self.next_id, fqdn, view)
    }
}

/// In-memory IPAM service with call counters
#[derive(Clone, Default)]
pub struct SimulatedIpam {
    inner: Arc<Mutex<Inner>>,
    counters: Arc<Counters>,
}

impl SimulatedIpam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an allocatable network
    pub fn with_network(self, network_view: &str, cidr: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .networks
            .push((network_view.to_string(), cidr.parse().unwrap()));
        self
    }

    /// Insert a record as some other tool would, returning its reference
    pub fn insert_record(&self, fqdn: &str, address: &str, view: &str, ext_attrs: &[(&str, &str)]) -> String {
        let mut inner = self.inner.lock().unwrap();
        let reference = inner.new_reference(fqdn, view);
        let record = RemoteRecord {
            reference: reference.clone(),
            fqdn: fqdn.to_string(),
            ipv6_addr: address.parse().unwrap(),
            dns_view: view.to_string(),
            ttl: TtlSetting::Inherit,
            comment: None,
            ext_attrs: ext_attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        inner.records.insert(reference.clone(), record);
        reference
    }

    /// Set an attribute out-of-band
    pub fn set_ext_attr(&self, reference: &str, name: &str, value: &str) {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.records.get_mut(reference).expect("record exists");
        record.ext_attrs.insert(name.to_string(), value.to_string());
    }

    /// Delete a record out-of-band
    pub fn remove_record(&self, reference: &str) {
        self.inner.lock().unwrap().records.remove(reference);
    }

    /// Move a record to a new reference, leaving the old one stale
    pub fn rekey(&self, reference: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        let mut record = inner.records.remove(reference).expect("record exists");
        let new_reference = inner.new_reference(&record.fqdn, &record.dns_view);
        record.reference = new_reference.clone();
        inner.records.insert(new_reference.clone(), record);
        new_reference
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().unwrap().failures_left = count;
    }

    /// Make allocation hand out an address outside the requested network
    pub fn allocate_outside(&self) {
        self.inner.lock().unwrap().allocate_outside = true;
    }

    pub fn record(&self, reference: &str) -> Option<RemoteRecord> {
        self.inner.lock().unwrap().records.get(reference).cloned()
    }

    pub fn records(&self) -> Vec<RemoteRecord> {
        self.inner.lock().unwrap().records.values().cloned().collect()
    }

    pub fn find(&self, fqdn: &str) -> Option<RemoteRecord> {
        self.records().into_iter().find(|r| r.fqdn == fqdn)
    }

    pub fn get_count(&self) -> usize {
        self.counters.get.load(Ordering::SeqCst)
    }

    pub fn search_count(&self) -> usize {
        self.counters.search.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.counters.create.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.counters.update.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.counters.delete.load(Ordering::SeqCst)
    }

    pub fn allocate_count(&self) -> usize {
        self.counters.allocate.load(Ordering::SeqCst)
    }

    /// Total number of gateway calls of any kind
    pub fn call_count(&self) -> usize {
        self.get_count()
            + self.search_count()
            + self.create_count()
            + self.update_count()
            + self.delete_count()
            + self.allocate_count()
    }

    fn enter(&self, counter: &AtomicUsize) -> Result<std::sync::MutexGuard<'_, Inner>> {
        counter.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if inner.failures_left > 0 {
            inner.failures_left -= 1;
            return Err(Error::transient("simulated connection reset"));
        }
        Ok(inner)
    }
}

#[async_trait::async_trait]
impl RecordGateway for SimulatedIpam {
    async fn search_by_alt_id(
        &self,
        _kind: RecordKind,
        reference: &str,
        internal_id: &str,
        attr_name: &str,
    ) -> Result<RemoteRecord> {
        let inner = self.enter(&self.counters.search)?;
        if let Some(record) = inner.records.get(reference) {
            return Ok(record.clone());
        }
        inner
            .records
            .values()
            .find(|r| r.ext_attrs.get(attr_name).map(String::as_str) == Some(internal_id))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no record with {}={}", attr_name, internal_id)))
    }

    async fn get_by_ref(&self, reference: &str) -> Result<RemoteRecord> {
        let inner = self.enter(&self.counters.get)?;
        inner
            .records
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::not_found(reference.to_string()))
    }

    async fn search_by_filter(
        &self,
        _kind: RecordKind,
        filter: &FilterParams,
        dns_view: &str,
    ) -> Result<Vec<RemoteRecord>> {
        let inner = self.enter(&self.counters.search)?;
        Ok(inner
            .records
            .values()
            .filter(|r| r.dns_view == dns_view && filter.matches(r))
            .cloned()
            .collect())
    }

    async fn create(&self, payload: &RecordPayload) -> Result<RemoteRecord> {
        let mut inner = self.enter(&self.counters.create)?;
        let view = payload.dns_view.clone().unwrap_or_else(|| "default".to_string());
        let reference = inner.new_reference(&payload.fqdn, &view);
        let record = RemoteRecord {
            reference: reference.clone(),
            fqdn: payload.fqdn.clone(),
            ipv6_addr: payload.ipv6_addr,
            dns_view: view,
            ttl: payload.ttl,
            comment: payload.comment.clone(),
            ext_attrs: payload.ext_attrs.clone(),
        };
        inner.records.insert(reference, record.clone());
        Ok(record)
    }

    async fn update(&self, payload: &RecordPayload, reference: &str) -> Result<RemoteRecord> {
        let mut inner = self.enter(&self.counters.update)?;
        let mut record = inner
            .records
            .remove(reference)
            .ok_or_else(|| Error::not_found(reference.to_string()))?;

        // The service re-keys a record when its name changes
        if record.fqdn != payload.fqdn {
            record.reference = inner.new_reference(&payload.fqdn, &record.dns_view);
        }
        record.fqdn = payload.fqdn.clone();
        record.ipv6_addr = payload.ipv6_addr;
        record.ttl = payload.ttl;
        record.comment = payload.comment.clone();
        record.ext_attrs = payload.ext_attrs.clone();

        inner.records.insert(record.reference.clone(), record.clone());
        Ok(record)
    }

    async fn delete(&self, reference: &str) -> Result<()> {
        let mut inner = self.enter(&self.counters.delete)?;
        inner.records.remove(reference);
        Ok(())
    }

    async fn allocate_next_address(&self, network_view: &str, cidr: &Ipv6Net) -> Result<Ipv6Addr> {
        let inner = self.enter(&self.counters.allocate)?;

        if !inner
            .networks
            .iter()
            .any(|(view, net)| view == network_view && net == cidr)
        {
            return Err(Error::not_found(format!("network {} in view {}", cidr, network_view)));
        }

        if inner.allocate_outside {
            return Ok("3fff::1".parse().unwrap());
        }

        let base = u128::from(cidr.network());
        let span = (1u128 << (128 - u32::from(cidr.prefix_len()))) - 1;
        (1..=span)
            .map(|offset| Ipv6Addr::from(base + offset))
            .find(|address| inner.records.values().all(|r| r.ipv6_addr != *address))
            .ok_or_else(|| Error::exhausted(network_view, cidr.to_string()))
    }

    fn gateway_name(&self) -> &'static str {
        "simulated"
    }
}

/// Build a reconciler over shared handles of `ipam` and `store`
pub fn reconciler(ipam: &SimulatedIpam, store: &MemoryStateStore) -> (Reconciler, mpsc::Receiver<ReconcileEvent>) {
    Reconciler::new(
        Box::new(ipam.clone()),
        Box::new(store.clone()),
        &ReconcilerSettings::default(),
    )
    .expect("reconciler construction succeeds")
}

/// Collect every event emitted so far
pub fn drain(rx: &mut mpsc::Receiver<ReconcileEvent>) -> Vec<ReconcileEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn attrs(pairs: &[(&str, &str)]) -> ExtAttrs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
