//! Declaration validation
//!
//! Turns the three optional addressing fields of a [`DeclaredRecord`] into one
//! [`AddressingMode`]. Against an existing record, the creation-time views and
//! the fixed-vs-CIDR choice are checked first.

use ipnet::Ipv6Net;
use std::net::Ipv6Addr;

use crate::config::DeclaredRecord;
use crate::error::ValidationError;
use crate::resolve::{AddressingKind, AddressingMode, FilterParams};
use crate::traits::RecordState;

/// Validate a declaration, optionally against the record it would update
///
/// No remote call is made. See [`ValidationError`] for the failure messages.
pub fn validate(
    declared: &DeclaredRecord,
    current: Option<&RecordState>,
) -> Result<AddressingMode, ValidationError> {
    if declared.fqdn.trim().is_empty() {
        return Err(ValidationError::EmptyFqdn);
    }

    let address = non_empty(&declared.ipv6_addr);
    let cidr = non_empty(&declared.cidr);
    let filter = declared.filter_params.as_ref().filter(|f| !f.is_empty());

    if let Some(current) = current {
        check_view("dns_view", &current.dns_view, &declared.dns_view)?;
        check_view("network_view", &current.network_view, &declared.network_view)?;

        let switches = match current.mode {
            AddressingKind::Fixed => cidr.is_some(),
            AddressingKind::Cidr => address.is_some(),
            AddressingKind::Filter => false,
        };
        if switches {
            return Err(ValidationError::AddressingModeSwitch);
        }
    }

    match (address, cidr, filter) {
        (None, None, None) => Err(ValidationError::AddressingRequired),
        (Some(address), None, None) => address
            .parse::<Ipv6Addr>()
            .map(AddressingMode::Fixed)
            .map_err(|_| ValidationError::InvalidAddress(address.to_string())),
        (None, Some(cidr), None) => {
            let net = cidr
                .parse::<Ipv6Net>()
                .map_err(|_| ValidationError::InvalidCidr(cidr.to_string()))?;
            Ok(AddressingMode::Cidr {
                network_view: declared.network_view.clone(),
                cidr: net.trunc(),
            })
        }
        (None, None, Some(filter)) => {
            let filter = FilterParams::parse(filter)?;
            // Searches are always scoped to dns_view
            if let Some(view) = filter.view()
                && view != declared.dns_view
            {
                return Err(ValidationError::FilterViewConflict {
                    filter_view: view.to_string(),
                    dns_view: declared.dns_view.clone(),
                });
            }
            Ok(AddressingMode::Filter(filter))
        }
        _ => Err(ValidationError::AddressingConflict),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn check_view(field: &'static str, previous: &str, requested: &str) -> Result<(), ValidationError> {
    if previous == requested {
        Ok(())
    } else {
        Err(ValidationError::ViewChange {
            field,
            previous: previous.to_string(),
            requested: requested.to_string(),
        })
    }
}
