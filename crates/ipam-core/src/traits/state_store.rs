// # State Store Trait
//
// Defines the interface for persisting each record's tracked state.
//
// ## Purpose
//
// The remote object alone cannot tell which extensible attributes were
// declared locally. The state store remembers, per record key:
// - The remote reference and the correlation identifier
// - The locally-owned extensible attributes (never the external ones)
// - The creation-time views and the addressing mode with its CIDR or filter
//
// ## Implementations
//
// - Memory: `MemoryStateStore`
// - File-based: `FileStateStore` (JSON, atomic writes, backup recovery)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use crate::attrs::ExtAttrs;
use crate::resolve::AddressingKind;
use crate::traits::record_gateway::TtlSetting;

/// Tracked state of one reconciled record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordState {
    /// Opaque remote reference
    pub reference: String,
    /// Stable local identity, also stored on the remote object
    pub internal_id: String,
    /// Fully-qualified domain name
    pub fqdn: String,
    /// Concrete address on the remote object
    pub ipv6_addr: Ipv6Addr,
    /// Addressing mode the record was declared with
    pub mode: AddressingKind,
    /// CIDR the address was allocated from (CIDR mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    /// Filter the record was adopted with (filter mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_params: Option<BTreeMap<String, String>>,
    /// DNS view recorded at creation
    pub dns_view: String,
    /// Network view recorded at creation
    pub network_view: String,
    /// TTL placement
    pub ttl: TtlSetting,
    /// Free-text comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Locally-owned extensible attributes
    #[serde(default)]
    pub ext_attrs: ExtAttrs,
    /// Timestamp of the last remote write
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// Trait for state store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage (files, databases, etc.)
/// - ✅ Implement locking for thread safety
/// - ✅ Cache state in memory (with explicit flush)
///
/// ## Forbidden Capabilities
/// - ❌ Call the remote gateway (owned by `Reconciler`)
/// - ❌ Interpret or merge the stored attributes (owned by `Reconciler`)
/// - ❌ Spawn background tasks
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the tracked state for a record key
    ///
    /// # Returns
    ///
    /// - `Ok(Some(RecordState))`: The tracked state
    /// - `Ok(None)`: Record is not tracked
    /// - `Err(Error)`: Storage error
    async fn get_record(&self, key: &str) -> Result<Option<RecordState>, crate::Error>;

    /// Create or replace the tracked state for a record key
    async fn set_record(&self, key: &str, record: &RecordState) -> Result<(), crate::Error>;

    /// Forget a record key
    ///
    /// Forgetting an unknown key succeeds.
    async fn delete_record(&self, key: &str) -> Result<(), crate::Error>;

    /// List all tracked record keys
    async fn list_records(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing state stores from configuration
#[async_trait]
pub trait StateStoreFactory: Send + Sync {
    /// Create a StateStore instance from configuration
    async fn create(&self, config: &serde_json::Value) -> Result<Box<dyn StateStore>, crate::Error>;
}
