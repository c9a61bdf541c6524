//! Address resolution
//!
//! A declared record names its address in exactly one of three ways. After
//! validation that choice is an [`AddressingMode`], and [`AddressResolver`]
//! turns it into something the reconciler can write:
//!
//! | Mode | Remote calls | Outcome |
//! |------|--------------|---------|
//! | `Fixed` | none | the literal address |
//! | `Cidr` | `allocate_next_address` | a fresh address inside the CIDR |
//! | `Filter` | `search_by_filter` | exactly one existing record to adopt |

mod filter;

pub use filter::{FilterField, FilterParams, FilterTarget, FilterTerm, scalar_text, text_map};

use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::traits::{RecordGateway, RecordKind, RemoteRecord};

/// Validated addressing input of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressingMode {
    /// Statically pinned address
    Fixed(Ipv6Addr),
    /// Next free address from a network
    Cidr {
        /// Network view holding the network
        network_view: String,
        /// Network to allocate from
        cidr: Ipv6Net,
    },
    /// Existing record matched by a predicate
    Filter(FilterParams),
}

impl AddressingMode {
    /// Discriminant, as persisted in tracked state
    pub fn kind(&self) -> AddressingKind {
        match self {
            AddressingMode::Fixed(_) => AddressingKind::Fixed,
            AddressingMode::Cidr { .. } => AddressingKind::Cidr,
            AddressingMode::Filter(_) => AddressingKind::Filter,
        }
    }
}

/// Which addressing input a record was created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingKind {
    /// `ipv6_addr`
    Fixed,
    /// `cidr`
    Cidr,
    /// `filter_params`
    Filter,
}

/// What a resolved addressing mode asks the reconciler to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Write a record holding this address
    Address(Ipv6Addr),
    /// Take over this existing record
    Adopt(RemoteRecord),
}

/// Resolves an [`AddressingMode`] against a gateway
pub struct AddressResolver<'a> {
    gateway: &'a dyn RecordGateway,
}

impl<'a> AddressResolver<'a> {
    /// Create a resolver that issues its calls through `gateway`
    pub fn new(gateway: &'a dyn RecordGateway) -> Self {
        Self { gateway }
    }

    /// Resolve `mode` for a record living in `dns_view`
    ///
    /// # Errors
    ///
    /// - `AllocationExhausted`: the CIDR has no free address
    /// - `NotFound` / `AmbiguousMatch`: the filter matched zero / several records
    /// - `Gateway`: the service allocated an address outside the CIDR
    pub async fn resolve(&self, mode: &AddressingMode, dns_view: &str) -> Result<Resolution> {
        match mode {
            AddressingMode::Fixed(address) => Ok(Resolution::Address(*address)),
            AddressingMode::Cidr { network_view, cidr } => self
                .allocate(network_view, cidr)
                .await
                .map(Resolution::Address),
            AddressingMode::Filter(filter) => {
                self.discover(filter, dns_view).await.map(Resolution::Adopt)
            }
        }
    }

    /// Allocate the next free address in `cidr`
    pub async fn allocate(&self, network_view: &str, cidr: &Ipv6Net) -> Result<Ipv6Addr> {
        let address = self
            .gateway
            .allocate_next_address(network_view, cidr)
            .await?;

        if !cidr.contains(&address) {
            return Err(Error::gateway(
                self.gateway.gateway_name(),
                format!("allocated address {} is outside the requested network {}", address, cidr),
            ));
        }

        info!("Allocated {} from {} (network view '{}')", address, cidr, network_view);
        Ok(address)
    }

    /// Find the single record matching `filter`
    pub async fn discover(&self, filter: &FilterParams, dns_view: &str) -> Result<RemoteRecord> {
        let mut matches = self
            .gateway
            .search_by_filter(RecordKind::Aaaa, filter, dns_view)
            .await?;

        debug!("Filter {} matched {} record(s) in view '{}'", filter, matches.len(), dns_view);

        match matches.len() {
            0 => Err(Error::not_found(format!(
                "no record in view '{}' matches filter {}",
                dns_view, filter
            ))),
            1 => Ok(matches.remove(0)),
            count => Err(Error::ambiguous(count, filter.to_string())),
        }
    }
}
