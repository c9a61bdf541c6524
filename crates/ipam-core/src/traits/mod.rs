//! Core traits for the IPAM reconciliation system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`RecordGateway`]: Read and write records on the remote IPAM service
//! - [`StateStore`]: Persistent tracked state per record

pub mod record_gateway;
pub mod state_store;

pub use record_gateway::{
    RecordGateway, RecordGatewayFactory, RecordKind, RecordPayload, RemoteRecord, TtlSetting,
};
pub use state_store::{RecordState, StateStore, StateStoreFactory};
