//! Two-stage remote lookup
//!
//! A remote reference can go stale (the service may re-key an object after a
//! rename, or the object may be recreated by someone else). The correlation
//! identifier stored as a reserved attribute survives that, so a lookup walks:
//!
//! ```text
//! Unknown ──ref ok──────────────▶ ReferenceValid
//!    │
//!    └─ref missing/404─▶ ReferenceStaleLookupBySecondary ──found──▶ ReferenceValid
//!                               │
//!                               └─none──▶ NotFound
//! ```

use tracing::{debug, warn};

use crate::attrs::INTERNAL_ID_ATTR;
use crate::error::{Error, Result};
use crate::traits::{RecordGateway, RecordKind, RemoteRecord};

/// States of the lookup
#[derive(Debug)]
pub enum LookupState {
    /// Nothing tried yet
    Unknown,
    /// Object found
    ReferenceValid(RemoteRecord),
    /// Reference missing or stale; searching by correlation identifier
    ReferenceStaleLookupBySecondary,
    /// Neither lookup matched
    NotFound,
}

/// Successful lookup
#[derive(Debug, Clone)]
pub struct Lookup {
    /// The remote object
    pub record: RemoteRecord,
    /// True when the object was found through the correlation identifier
    pub recovered: bool,
}

/// Find a record by reference, falling back to its correlation identifier
///
/// Errors other than "not found" from the primary lookup are propagated
/// without trying the fallback.
pub async fn lookup(
    gateway: &dyn RecordGateway,
    reference: &str,
    internal_id: &str,
) -> Result<Lookup> {
    let mut state = LookupState::Unknown;
    let mut recovered = false;

    loop {
        state = match state {
            LookupState::Unknown if reference.is_empty() => {
                LookupState::ReferenceStaleLookupBySecondary
            }
            LookupState::Unknown => match gateway.get_by_ref(reference).await {
                Ok(record) => LookupState::ReferenceValid(record),
                Err(e) if e.is_not_found() => {
                    warn!("Reference {} is stale, searching by correlation id", reference);
                    LookupState::ReferenceStaleLookupBySecondary
                }
                Err(e) => return Err(e),
            },
            LookupState::ReferenceStaleLookupBySecondary if internal_id.is_empty() => {
                LookupState::NotFound
            }
            LookupState::ReferenceStaleLookupBySecondary => {
                recovered = true;
                match gateway
                    .search_by_alt_id(RecordKind::Aaaa, "", internal_id, INTERNAL_ID_ATTR)
                    .await
                {
                    Ok(record) => LookupState::ReferenceValid(record),
                    Err(e) if e.is_not_found() => LookupState::NotFound,
                    Err(e) => return Err(e),
                }
            }
            LookupState::ReferenceValid(record) => {
                debug!("Found {} at {}", record.fqdn, record.reference);
                return Ok(Lookup { record, recovered });
            }
            LookupState::NotFound => {
                return Err(Error::not_found(format!(
                    "no {} record with reference '{}' or correlation id '{}'",
                    RecordKind::Aaaa.as_str(),
                    reference,
                    internal_id
                )));
            }
        };
    }
}
