//! Configuration types for the IPAM reconciliation system
//!
//! This module defines all configuration structures used throughout the crate,
//! including the declared-record surface consumed by the reconciler.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

use crate::attrs::ExtAttrs;
use crate::resolve::text_map;
use crate::traits::TtlSetting;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Remote gateway configuration
    pub gateway: GatewayConfig,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Declared records
    #[serde(default)]
    pub records: Vec<RecordConfig>,

    /// Optional reconciler settings
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
}

impl IpamConfig {
    /// Create a configuration for `gateway` with defaults elsewhere
    pub fn new(gateway: GatewayConfig) -> Self {
        Self {
            gateway,
            state_store: StateStoreConfig::default(),
            records: Vec::new(),
            reconciler: ReconcilerSettings::default(),
        }
    }

    /// Validate the configuration
    ///
    /// Record keys must be non-empty and unique. Declared record contents are
    /// validated by the reconciler, not here.
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.gateway.validate()?;
        self.reconciler.validate()?;

        let mut seen = HashSet::new();
        for record in &self.records {
            if record.name.trim().is_empty() {
                return Err(crate::Error::config("Record name cannot be empty"));
            }
            if !seen.insert(record.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate record name: {}",
                    record.name
                )));
            }
        }

        Ok(())
    }
}

/// Remote gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayConfig {
    /// Infoblox WAPI
    Wapi {
        /// Base URL of the grid master, e.g. `https://gm.example.com`
        url: String,
        /// API user
        username: String,
        /// API password
        password: String,
        /// WAPI version
        #[serde(default = "default_wapi_version")]
        wapi_version: String,
        /// Log writes instead of performing them
        #[serde(default)]
        dry_run: bool,
    },

    /// Custom gateway
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl GatewayConfig {
    /// Validate the gateway configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            GatewayConfig::Wapi {
                url,
                username,
                password,
                wapi_version,
                ..
            } => {
                if url.is_empty() {
                    return Err(crate::Error::config("WAPI URL cannot be empty"));
                }
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "WAPI URL must use HTTP or HTTPS scheme. Got: {}",
                        url
                    )));
                }
                if username.is_empty() || password.is_empty() {
                    return Err(crate::Error::config("WAPI username and password are required"));
                }
                if wapi_version.is_empty() {
                    return Err(crate::Error::config("WAPI version cannot be empty"));
                }
                Ok(())
            }
            GatewayConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom gateway factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom gateway config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the gateway type name
    pub fn type_name(&self) -> &str {
        match self {
            GatewayConfig::Wapi { .. } => "wapi",
            GatewayConfig::Custom { factory, .. } => factory,
        }
    }
}

fn default_wapi_version() -> String {
    "2.12".to_string()
}

/// State store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    #[default]
    Memory,

    /// Custom state store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StateStoreConfig {
    /// Get the state store type name
    pub fn type_name(&self) -> &str {
        match self {
            StateStoreConfig::File { .. } => "file",
            StateStoreConfig::Memory => "memory",
            StateStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// A declared record together with its tracking key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Key the record's tracked state is stored under
    pub name: String,

    /// Declared fields
    #[serde(flatten)]
    pub record: DeclaredRecord,
}

impl RecordConfig {
    /// Create a record configuration
    pub fn new(name: impl Into<String>, record: DeclaredRecord) -> Self {
        Self {
            name: name.into(),
            record,
        }
    }
}

/// Declared fields of an IPv6 host record
///
/// Exactly one of `ipv6_addr`, `cidr` and `filter_params` must be set. Empty
/// strings and empty maps count as unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredRecord {
    /// Fully-qualified domain name
    pub fqdn: String,

    /// Fixed address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_addr: Option<String>,

    /// Network to allocate the next free address from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,

    /// Predicate selecting an existing record to adopt
    #[serde(
        default,
        deserialize_with = "optional_scalar_map",
        skip_serializing_if = "Option::is_none"
    )]
    pub filter_params: Option<BTreeMap<String, String>>,

    /// Network view used for CIDR allocation
    #[serde(default = "default_view")]
    pub network_view: String,

    /// DNS view the record lives in
    #[serde(default = "default_view")]
    pub dns_view: String,

    /// Record-level TTL in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,

    /// Whether the record-level TTL applies; defaults to "a TTL was declared"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_ttl: Option<bool>,

    /// Free-text comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Locally-owned extensible attributes
    #[serde(default, deserialize_with = "scalar_map")]
    pub ext_attrs: ExtAttrs,

    /// Correlation identifier; generated on create when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<String>,

    /// Remote reference of an object to import
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl DeclaredRecord {
    /// Create a declaration with only the FQDN set
    pub fn new(fqdn: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            ipv6_addr: None,
            cidr: None,
            filter_params: None,
            network_view: default_view(),
            dns_view: default_view(),
            ttl: None,
            use_ttl: None,
            comment: None,
            ext_attrs: ExtAttrs::new(),
            internal_id: None,
            reference: None,
        }
    }

    /// Set a fixed address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.ipv6_addr = Some(address.into());
        self
    }

    /// Allocate from a network
    pub fn with_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = Some(cidr.into());
        self
    }

    /// Adopt the record matching a filter
    pub fn with_filter<K, V>(mut self, filter: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.filter_params = Some(
            filter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set the network view
    pub fn with_network_view(mut self, view: impl Into<String>) -> Self {
        self.network_view = view.into();
        self
    }

    /// Set the DNS view
    pub fn with_dns_view(mut self, view: impl Into<String>) -> Self {
        self.dns_view = view.into();
        self
    }

    /// Set the record-level TTL
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the TTL flag explicitly
    pub fn with_use_ttl(mut self, use_ttl: bool) -> Self {
        self.use_ttl = Some(use_ttl);
        self
    }

    /// Set the comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Declare an extensible attribute
    pub fn with_ext_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.ext_attrs.insert(name.into(), value.into());
        self
    }

    /// Set the correlation identifier
    pub fn with_internal_id(mut self, internal_id: impl Into<String>) -> Self {
        self.internal_id = Some(internal_id.into());
        self
    }

    /// TTL placement derived from `ttl` and `use_ttl`
    pub fn ttl_setting(&self) -> TtlSetting {
        TtlSetting::from_declared(self.ttl, self.use_ttl)
    }

    /// Comment with empty text treated as unset
    pub fn comment(&self) -> Option<String> {
        self.comment.clone().filter(|c| !c.is_empty())
    }
}

/// Flat map whose number and boolean values are kept as text
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let object = Map::<String, Value>::deserialize(deserializer)?;
    text_map(&object).map_err(|key| {
        serde::de::Error::custom(format!(
            "value of '{}' must be a string, number or boolean",
            key
        ))
    })
}

fn optional_scalar_map<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Map<String, Value>>::deserialize(deserializer)? {
        Some(object) => text_map(&object).map(Some).map_err(|key| {
            serde::de::Error::custom(format!(
                "value of '{}' must be a string, number or boolean",
                key
            ))
        }),
        None => Ok(None),
    }
}

fn default_view() -> String {
    "default".to_string()
}

/// Reconciler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Capacity of the reconcile event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Destroy tracked records that are no longer declared
    #[serde(default = "default_prune")]
    pub prune: bool,
}

impl ReconcilerSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            prune: default_prune(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_prune() -> bool {
    true
}
