// # ipam-core
//
// Core library for reconciling declared IPv6 host records against a remote
// IPAM/DNS service.
//
// ## Architecture Overview
//
// - **attrs**: Extensible attribute merging (externally added keys survive)
// - **resolve**: Address resolution (fixed, CIDR allocation, filter discovery)
// - **Reconciler**: Validate / create / read / update / delete of one record,
//   plus full reconciliation passes over tracked state
// - **RecordGateway**: Trait for the remote service (see `ipam-gateway-wapi`)
// - **StateStore**: Trait for tracked state, with memory and file stores
// - **GatewayRegistry**: Plugin-based registry for gateways and state stores
//
// ## Design Principles
//
// 1. **Never discard external data**: attributes the declaration does not own
//    are written back unchanged
// 2. **No internal retry**: transient gateway failures surface as retryable errors
// 3. **Library-First**: the daemon is a thin shell over `Reconciler`

pub mod attrs;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod resolve;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{DeclaredRecord, GatewayConfig, IpamConfig, RecordConfig, StateStoreConfig};
pub use error::{Error, Result, ValidationError};
pub use reconciler::{PassSummary, ReconcileEvent, Reconciler};
pub use registry::GatewayRegistry;
pub use resolve::{AddressResolver, AddressingMode, FilterParams};
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{RecordGateway, RecordState, RemoteRecord, StateStore};
