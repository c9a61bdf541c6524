// # Record Gateway Trait
//
// Defines the interface to the remote IPAM/DNS service that owns the records.
//
// ## Implementations
//
// - Infoblox WAPI: `ipam-gateway-wapi` crate
// - Test doubles: `crates/ipam-core/tests/common`
//
// ## Usage
//
// ```rust,ignore
// use ipam_core::traits::{RecordGateway, RecordKind};
// use ipam_core::attrs::INTERNAL_ID_ATTR;
//
// async fn find(gateway: &dyn RecordGateway) -> ipam_core::Result<()> {
//     let record = gateway
//         .search_by_alt_id(RecordKind::Aaaa, "", "3f0c…", INTERNAL_ID_ATTR)
//         .await?;
//     println!("{} -> {}", record.fqdn, record.ipv6_addr);
//     Ok(())
// }
// ```

use async_trait::async_trait;
use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

use crate::attrs::ExtAttrs;
use crate::resolve::FilterParams;

/// Remote object type handled by a gateway call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// IPv6 host address record
    Aaaa,
}

impl RecordKind {
    /// DNS type name
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Aaaa => "AAAA",
        }
    }
}

/// TTL placement of a record
///
/// `Inherit` clears the record's TTL flag so the zone default applies.
/// `Explicit` pins the value, zero included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum TtlSetting {
    /// Use the zone default
    #[default]
    Inherit,
    /// Record-level TTL in seconds
    Explicit(u32),
}

impl TtlSetting {
    /// Build from the declared `use_ttl` / `ttl` pair
    ///
    /// With no explicit flag, declaring a TTL enables it.
    pub fn from_declared(ttl: Option<u32>, use_ttl: Option<bool>) -> Self {
        if use_ttl.unwrap_or(ttl.is_some()) {
            TtlSetting::Explicit(ttl.unwrap_or(0))
        } else {
            TtlSetting::Inherit
        }
    }

    /// Value of the remote TTL flag
    pub fn use_ttl(&self) -> bool {
        matches!(self, TtlSetting::Explicit(_))
    }

    /// Record-level TTL, if pinned
    pub fn ttl(&self) -> Option<u32> {
        match self {
            TtlSetting::Inherit => None,
            TtlSetting::Explicit(ttl) => Some(*ttl),
        }
    }
}

/// A record as stored by the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    /// Opaque remote reference
    pub reference: String,
    /// Fully-qualified domain name
    pub fqdn: String,
    /// Concrete address
    pub ipv6_addr: Ipv6Addr,
    /// DNS view the record lives in
    pub dns_view: String,
    /// TTL placement
    pub ttl: TtlSetting,
    /// Free-text comment
    pub comment: Option<String>,
    /// Every extensible attribute on the object, whoever set it
    pub ext_attrs: ExtAttrs,
}

/// Body of a create or update call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPayload {
    /// Fully-qualified domain name
    pub fqdn: String,
    /// Address to store
    pub ipv6_addr: Ipv6Addr,
    /// DNS view; only sent on create since the view is immutable
    pub dns_view: Option<String>,
    /// TTL placement
    pub ttl: TtlSetting,
    /// Comment; `None` clears it
    pub comment: Option<String>,
    /// Complete attribute set to store (replaces the remote set)
    pub ext_attrs: ExtAttrs,
}

impl RecordPayload {
    /// Whether writing this payload would leave `remote` unchanged
    pub fn is_satisfied_by(&self, remote: &RemoteRecord) -> bool {
        self.fqdn == remote.fqdn
            && self.ipv6_addr == remote.ipv6_addr
            && self.ttl == remote.ttl
            && self.comment == remote.comment
            && self.ext_attrs == remote.ext_attrs
            && self
                .dns_view
                .as_ref()
                .is_none_or(|view| view == &remote.dns_view)
    }
}

/// Trait for remote record gateway implementations
///
/// # Trust Level: Untrusted
///
/// Gateways perform the network calls and nothing else.
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoint only
/// - ✅ Parse service-specific responses
/// - ✅ Return success or failure (the orchestrator handles retry)
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off (transient failures surface as `Error::TransientGateway`)
/// - ❌ Access the state store (owned by `Reconciler`)
/// - ❌ Merge extensible attributes (owned by `Reconciler`)
/// - ❌ Decide whether a write is needed (owned by `Reconciler`)
/// - ❌ Spawn tasks or threads
///
/// # Thread Safety
///
/// Implementations must be usable across async tasks; the orchestrator may
/// reconcile several records concurrently through one gateway.
#[async_trait]
pub trait RecordGateway: Send + Sync {
    /// Find a record by reference, falling back to its correlation attribute
    ///
    /// An empty `reference` skips the primary lookup.
    ///
    /// # Returns
    ///
    /// - `Ok(RemoteRecord)`: the object
    /// - `Err(Error::NotFound)`: neither lookup matched
    async fn search_by_alt_id(
        &self,
        kind: RecordKind,
        reference: &str,
        internal_id: &str,
        attr_name: &str,
    ) -> Result<RemoteRecord, crate::Error>;

    /// Fetch a record by its remote reference
    async fn get_by_ref(&self, reference: &str) -> Result<RemoteRecord, crate::Error>;

    /// List the records of `kind` in `dns_view` that satisfy `filter`
    ///
    /// Returns every match; an empty vector is not an error.
    async fn search_by_filter(
        &self,
        kind: RecordKind,
        filter: &FilterParams,
        dns_view: &str,
    ) -> Result<Vec<RemoteRecord>, crate::Error>;

    /// Create a record
    async fn create(&self, payload: &RecordPayload) -> Result<RemoteRecord, crate::Error>;

    /// Overwrite the record at `reference`
    ///
    /// The remote service may hand back a new reference.
    async fn update(
        &self,
        payload: &RecordPayload,
        reference: &str,
    ) -> Result<RemoteRecord, crate::Error>;

    /// Delete the record at `reference`
    ///
    /// Deleting an absent record succeeds.
    async fn delete(&self, reference: &str) -> Result<(), crate::Error>;

    /// Ask the service for the next free address in `cidr`
    ///
    /// # Returns
    ///
    /// - `Ok(Ipv6Addr)`: a free address
    /// - `Err(Error::AllocationExhausted)`: the network is full
    /// - `Err(Error::NotFound)`: no such network in `network_view`
    async fn allocate_next_address(
        &self,
        network_view: &str,
        cidr: &Ipv6Net,
    ) -> Result<Ipv6Addr, crate::Error>;

    /// Gateway name (for logging/debugging)
    fn gateway_name(&self) -> &'static str;
}

/// Helper trait for constructing gateways from configuration
pub trait RecordGatewayFactory: Send + Sync {
    /// Create a RecordGateway instance from configuration
    fn create(
        &self,
        config: &crate::config::GatewayConfig,
    ) -> Result<Box<dyn RecordGateway>, crate::Error>;
}
