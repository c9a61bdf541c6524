//! Plugin-based gateway registry
//!
//! The registry maps configuration type names to gateway and state store
//! factories, so wiring never needs a hardcoded if-else chain.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ipam_core::registry::GatewayRegistry;
//!
//! let registry = GatewayRegistry::new();
//! ipam_gateway_wapi::register(&registry);
//!
//! let gateway = registry.create_gateway(&config.gateway)?;
//! let store = registry.create_state_store(&config.state_store).await?;
//! ```
//!
//! ## Registration
//!
//! Gateway crates expose a `register` function:
//!
//! ```rust,ignore
//! pub fn register(registry: &GatewayRegistry) {
//!     registry.register_gateway("wapi", Box::new(WapiFactory));
//! }
//! ```
//!
//! The built-in `memory` and `file` state stores are registered by
//! [`GatewayRegistry::new`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{GatewayConfig, StateStoreConfig};
use crate::error::{Error, Result};
use crate::state::{FileStateStoreFactory, MemoryStateStoreFactory};
use crate::traits::{RecordGateway, RecordGatewayFactory, StateStore, StateStoreFactory};

type GatewayFactories = HashMap<String, Box<dyn RecordGatewayFactory>>;
type StateStoreFactories = HashMap<String, Arc<dyn StateStoreFactory>>;

/// Registry for plugin-based gateway and state store creation
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent lookups, exclusive
/// registration.
pub struct GatewayRegistry {
    gateways: RwLock<GatewayFactories>,
    state_stores: RwLock<StateStoreFactories>,
}

impl GatewayRegistry {
    /// Create a registry with the built-in state stores registered
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_state_store("memory", Box::new(MemoryStateStoreFactory));
        registry.register_state_store("file", Box::new(FileStateStoreFactory));
        registry
    }

    /// Create a registry with nothing registered
    pub fn empty() -> Self {
        Self {
            gateways: RwLock::new(HashMap::new()),
            state_stores: RwLock::new(HashMap::new()),
        }
    }

    // A poisoned lock only means a registering thread panicked; the map itself
    // is still usable.
    fn gateways(&self) -> RwLockReadGuard<'_, GatewayFactories> {
        self.gateways.read().unwrap_or_else(|e| e.into_inner())
    }

    fn gateways_mut(&self) -> RwLockWriteGuard<'_, GatewayFactories> {
        self.gateways.write().unwrap_or_else(|e| e.into_inner())
    }

    fn state_stores(&self) -> RwLockReadGuard<'_, StateStoreFactories> {
        self.state_stores.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a gateway factory
    ///
    /// # Parameters
    ///
    /// - `name`: Gateway type name as used in `GatewayConfig` (e.g., "wapi")
    /// - `factory`: Factory object for creating gateway instances
    pub fn register_gateway(&self, name: impl Into<String>, factory: Box<dyn RecordGatewayFactory>) {
        self.gateways_mut().insert(name.into(), factory);
    }

    /// Register a state store factory
    pub fn register_state_store(&self, name: impl Into<String>, factory: Box<dyn StateStoreFactory>) {
        self.state_stores
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), Arc::from(factory));
    }

    /// Create a gateway from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn RecordGateway>)`: Created gateway instance
    /// - `Err(Error::Config)`: If the gateway type is not registered
    pub fn create_gateway(&self, config: &GatewayConfig) -> Result<Box<dyn RecordGateway>> {
        let gateway_type = config.type_name();
        let gateways = self.gateways();

        let factory = gateways
            .get(gateway_type)
            .ok_or_else(|| Error::config(format!("Unknown gateway type: {}", gateway_type)))?;

        factory.create(config)
    }

    /// Create a state store from configuration
    ///
    /// The factory receives the configuration serialized as JSON; for
    /// `Custom` stores that is the inner `config` value.
    pub async fn create_state_store(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>> {
        let store_type = config.type_name();

        let factory = self
            .state_stores()
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown state store type: {}", store_type)))?;

        let config_json = match config {
            StateStoreConfig::Custom { config, .. } => config.clone(),
            other => serde_json::to_value(other)?,
        };

        factory.create(&config_json).await
    }

    /// List all registered gateway types
    pub fn list_gateways(&self) -> Vec<String> {
        self.gateways().keys().cloned().collect()
    }

    /// List all registered state store types
    pub fn list_state_stores(&self) -> Vec<String> {
        self.state_stores().keys().cloned().collect()
    }

    /// Check if a gateway type is registered
    pub fn has_gateway(&self, name: &str) -> bool {
        self.gateways().contains_key(name)
    }

    /// Check if a state store type is registered
    pub fn has_state_store(&self, name: &str) -> bool {
        self.state_stores().contains_key(name)
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnavailableFactory;

    impl RecordGatewayFactory for UnavailableFactory {
        fn create(&self, _config: &GatewayConfig) -> Result<Box<dyn RecordGateway>> {
            Err(Error::gateway("unavailable", "not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = GatewayRegistry::new();
        assert!(!registry.has_gateway("wapi"));

        registry.register_gateway("wapi", Box::new(UnavailableFactory));
        assert!(registry.has_gateway("wapi"));
        assert!(registry.list_gateways().contains(&"wapi".to_string()));
    }

    #[test]
    fn test_unknown_gateway_is_config_error() {
        let registry = GatewayRegistry::empty();
        let config = GatewayConfig::Custom {
            factory: "nope".to_string(),
            config: serde_json::json!({}),
        };

        assert!(matches!(registry.create_gateway(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_builtin_state_stores() {
        let registry = GatewayRegistry::new();
        assert!(registry.has_state_store("memory"));
        assert!(registry.has_state_store("file"));

        let store = registry.create_state_store(&StateStoreConfig::Memory).await.unwrap();
        assert!(store.list_records().await.unwrap().is_empty());

        let empty = GatewayRegistry::empty();
        assert!(empty.create_state_store(&StateStoreConfig::Memory).await.is_err());
    }
}
