//! Record reconciler
//!
//! The reconciler drives a declared record to the remote service and keeps its
//! tracked state:
//! - Validating the declaration (against tracked state on update)
//! - Resolving the address through [`AddressResolver`]
//! - Merging extensible attributes before every write
//! - Recovering stale references through the correlation identifier
//! - Persisting tracked state after successful writes
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!  DeclaredRecord ───▶ │  Reconciler  │ ───▶ ReconcileEvent
//!                      └──────────────┘
//!                             │
//!         ┌───────────────────┼────────────────────┐
//!         ▼                   ▼                    ▼
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────────┐
//! │  StateStore  │   │ AddressResolver │   │ attrs::merge │
//! │ (tracked)    │   │ RecordGateway   │   │              │
//! └──────────────┘   └─────────────────┘   └──────────────┘
//! ```
//!
//! ## Update plans
//!
//! | Change | Plan |
//! |--------|------|
//! | fields only, same CIDR, same filter | write in place |
//! | new CIDR, filter → CIDR | delete, allocate, recreate |
//! | new filter, fixed/CIDR → filter | discover, release the old object, adopt |

mod lookup;
mod validate;

pub use lookup::{Lookup, LookupState, lookup};
pub use validate::validate;

use chrono::Utc;
use ipnet::Ipv6Net;
use std::collections::HashSet;
use std::net::Ipv6Addr;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::attrs::{self, ExtAttrs, INTERNAL_ID_ATTR};
use crate::config::{DeclaredRecord, RecordConfig, ReconcilerSettings};
use crate::error::{Error, Result, ValidationError};
use crate::resolve::{AddressResolver, AddressingKind, AddressingMode, FilterParams, Resolution};
use crate::traits::{RecordGateway, RecordPayload, RecordState, RemoteRecord, StateStore};

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// A new remote record was created
    Created {
        fqdn: String,
        ipv6_addr: Ipv6Addr,
        reference: String,
    },

    /// An existing remote record was taken over
    Adopted { fqdn: String, reference: String },

    /// A tracked record was rewritten in place
    Updated { fqdn: String, ipv6_addr: Ipv6Addr },

    /// A tracked record was deleted and created again with a new allocation
    Recreated {
        fqdn: String,
        previous_addr: Ipv6Addr,
        ipv6_addr: Ipv6Addr,
    },

    /// A remote record was deleted
    Deleted { reference: String },

    /// Locally-owned attributes were changed on the remote object by someone else
    Drifted { fqdn: String, keys: Vec<String> },

    /// A stale reference was replaced through the correlation identifier
    ReferenceRecovered {
        fqdn: String,
        previous: String,
        current: String,
    },

    /// Reconciling a record failed
    Failed {
        key: String,
        error: String,
        retryable: bool,
    },
}

/// Outcome of one [`Reconciler::reconcile_all`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Declared records applied successfully
    pub applied: usize,
    /// Undeclared tracked records destroyed
    pub destroyed: usize,
    /// Records that failed
    pub failed: usize,
}

impl PassSummary {
    /// Whether every record in the pass succeeded
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// How an update reaches the declared state
#[derive(Debug, PartialEq, Eq)]
enum UpdatePlan<'a> {
    /// Write the existing object; `None` keeps its address
    InPlace(Option<Ipv6Addr>),
    /// Delete the object and create it again from a fresh allocation
    Reallocate {
        network_view: &'a str,
        cidr: &'a Ipv6Net,
    },
    /// Find the record matching a new filter and adopt it
    Readopt(&'a FilterParams),
}

fn plan<'a>(current: &RecordState, mode: &'a AddressingMode) -> UpdatePlan<'a> {
    match mode {
        AddressingMode::Fixed(address) => UpdatePlan::InPlace(Some(*address)),
        AddressingMode::Cidr { network_view, cidr } => {
            let same = current.mode == AddressingKind::Cidr
                && current
                    .cidr
                    .as_deref()
                    .and_then(|c| c.parse::<Ipv6Net>().ok())
                    .is_some_and(|c| c.trunc() == *cidr);
            if same {
                UpdatePlan::InPlace(None)
            } else {
                UpdatePlan::Reallocate { network_view, cidr }
            }
        }
        AddressingMode::Filter(filter) => {
            if current.mode == AddressingKind::Filter
                && current.filter_params.as_ref() == Some(filter.raw())
            {
                UpdatePlan::InPlace(None)
            } else {
                UpdatePlan::Readopt(filter)
            }
        }
    }
}

/// Record reconciler
///
/// Owns the gateway and the state store. Operations on one record run one
/// remote call at a time; nothing is retried internally.
///
/// ## Lifecycle
///
/// 1. Create with [`Reconciler::new()`]
/// 2. Call [`Reconciler::apply()`] / [`Reconciler::destroy()`] per record, or
///    [`Reconciler::reconcile_all()`] for a full pass
/// 3. Drain the event receiver for monitoring
pub struct Reconciler {
    /// Remote service
    gateway: Box<dyn RecordGateway>,

    /// Tracked state per record key
    state_store: Box<dyn StateStore>,

    /// Destroy tracked records that are no longer declared
    prune: bool,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver)
    pub fn new(
        gateway: Box<dyn RecordGateway>,
        state_store: Box<dyn StateStore>,
        settings: &ReconcilerSettings,
    ) -> Result<(Self, mpsc::Receiver<ReconcileEvent>)> {
        settings.validate()?;

        let (tx, rx) = mpsc::channel(settings.event_channel_capacity);

        let reconciler = Self {
            gateway,
            state_store,
            prune: settings.prune,
            event_tx: tx,
        };

        Ok((reconciler, rx))
    }

    /// Validate a declaration, optionally against its tracked state
    pub fn validate(
        &self,
        declared: &DeclaredRecord,
        current: Option<&RecordState>,
    ) -> std::result::Result<AddressingMode, ValidationError> {
        validate(declared, current)
    }

    /// Create the remote record for a declaration
    ///
    /// When the declaration carries a correlation id or reference that already
    /// resolves to a remote object, that object is adopted and updated instead
    /// of creating a duplicate.
    pub async fn create(&self, declared: &DeclaredRecord) -> Result<RecordState> {
        let mode = validate(declared, None)?;
        self.create_inner(declared, mode)
            .await
            .map_err(|e| e.in_operation("create", &declared.fqdn))
    }

    async fn create_inner(&self, declared: &DeclaredRecord, mode: AddressingMode) -> Result<RecordState> {
        let declared_id = declared.internal_id.as_deref().filter(|id| !id.is_empty());
        let declared_ref = declared.reference.as_deref().filter(|r| !r.is_empty());

        let import = if declared_id.is_some() || declared_ref.is_some() {
            match lookup(
                self.gateway.as_ref(),
                declared_ref.unwrap_or_default(),
                declared_id.unwrap_or_default(),
            )
            .await
            {
                Ok(found) => Some(found.record),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let internal_id = declared_id
            .map(str::to_string)
            .or_else(|| {
                import
                    .as_ref()
                    .and_then(|r| r.ext_attrs.get(INTERNAL_ID_ATTR).cloned())
            })
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.create_validated(declared, &mode, internal_id, import).await
    }

    async fn create_validated(
        &self,
        declared: &DeclaredRecord,
        mode: &AddressingMode,
        internal_id: String,
        import: Option<RemoteRecord>,
    ) -> Result<RecordState> {
        if let Some(existing) = import {
            return self.adopt(declared, mode, existing, internal_id).await;
        }

        let resolver = AddressResolver::new(self.gateway.as_ref());
        let address = match resolver.resolve(mode, &declared.dns_view).await? {
            Resolution::Adopt(existing) => {
                return self.adopt(declared, mode, existing, internal_id).await;
            }
            Resolution::Address(address) => address,
        };

        let merged = attrs::merge(&declared.ext_attrs, &ExtAttrs::new(), &ExtAttrs::new());
        let payload = RecordPayload {
            fqdn: declared.fqdn.clone(),
            ipv6_addr: address,
            dns_view: Some(declared.dns_view.clone()),
            ttl: declared.ttl_setting(),
            comment: declared.comment(),
            ext_attrs: attrs::with_internal_id(merged.write_set, &internal_id),
        };

        let created = self.gateway.create(&payload).await?;
        info!(
            "Created {} -> {} ({})",
            created.fqdn, created.ipv6_addr, created.reference
        );
        self.emit_event(ReconcileEvent::Created {
            fqdn: created.fqdn.clone(),
            ipv6_addr: created.ipv6_addr,
            reference: created.reference.clone(),
        });

        Ok(tracked(&created, declared, mode, internal_id, merged.local_view))
    }

    /// Take over an existing remote record
    ///
    /// Attributes already on the object are treated as externally owned.
    async fn adopt(
        &self,
        declared: &DeclaredRecord,
        mode: &AddressingMode,
        existing: RemoteRecord,
        internal_id: String,
    ) -> Result<RecordState> {
        if existing.dns_view != declared.dns_view {
            return Err(ValidationError::ViewChange {
                field: "dns_view",
                previous: existing.dns_view.clone(),
                requested: declared.dns_view.clone(),
            }
            .into());
        }

        let address = match mode {
            AddressingMode::Fixed(address) => *address,
            AddressingMode::Cidr { network_view, cidr } if !cidr.contains(&existing.ipv6_addr) => {
                AddressResolver::new(self.gateway.as_ref())
                    .allocate(network_view, cidr)
                    .await?
            }
            _ => existing.ipv6_addr,
        };

        let merged = attrs::merge(&declared.ext_attrs, &existing.ext_attrs, &ExtAttrs::new());
        let payload = RecordPayload {
            fqdn: declared.fqdn.clone(),
            ipv6_addr: address,
            dns_view: None,
            ttl: declared.ttl_setting(),
            comment: declared.comment(),
            ext_attrs: attrs::with_internal_id(merged.write_set, &internal_id),
        };

        let adopted = if payload.is_satisfied_by(&existing) {
            debug!("Adopted record {} already matches", existing.reference);
            existing
        } else {
            self.gateway.update(&payload, &existing.reference).await?
        };

        info!("Adopted {} ({})", adopted.fqdn, adopted.reference);
        self.emit_event(ReconcileEvent::Adopted {
            fqdn: adopted.fqdn.clone(),
            reference: adopted.reference.clone(),
        });

        Ok(tracked(&adopted, declared, mode, internal_id, merged.local_view))
    }

    /// Look a record up by reference, falling back to its correlation id
    ///
    /// # Errors
    ///
    /// `NotFound` when neither lookup matches.
    pub async fn read(&self, reference: &str, internal_id: &str) -> Result<Lookup> {
        lookup(self.gateway.as_ref(), reference, internal_id)
            .await
            .map_err(|e| e.in_operation("read", reference))
    }

    /// Re-read a tracked record from the remote service
    ///
    /// Attributes added remotely by other tools are left out of the returned
    /// state. A reference recovered through the correlation id replaces the
    /// stale one.
    pub async fn refresh(&self, current: &RecordState) -> Result<RecordState> {
        let found = self.read(&current.reference, &current.internal_id).await?;
        let remote = self.observe(current, found);

        Ok(RecordState {
            reference: remote.reference.clone(),
            fqdn: remote.fqdn.clone(),
            ipv6_addr: remote.ipv6_addr,
            ttl: remote.ttl,
            comment: remote.comment.clone(),
            ext_attrs: attrs::local_view(&remote.ext_attrs, &current.ext_attrs),
            ..current.clone()
        })
    }

    /// Report recovered references and drifted attributes of a lookup
    fn observe(&self, current: &RecordState, found: Lookup) -> RemoteRecord {
        let remote = found.record;

        if found.recovered && remote.reference != current.reference {
            warn!(
                "Recovered {} through correlation id: {} -> {}",
                current.fqdn, current.reference, remote.reference
            );
            self.emit_event(ReconcileEvent::ReferenceRecovered {
                fqdn: current.fqdn.clone(),
                previous: current.reference.clone(),
                current: remote.reference.clone(),
            });
        }

        let drifted = attrs::drifted_keys(&remote.ext_attrs, &current.ext_attrs);
        if !drifted.is_empty() {
            warn!("Attributes of {} changed remotely: {:?}", current.fqdn, drifted);
            self.emit_event(ReconcileEvent::Drifted {
                fqdn: current.fqdn.clone(),
                keys: drifted,
            });
        }

        remote
    }

    /// Bring a tracked record in line with its declaration
    ///
    /// # Errors
    ///
    /// - `Validation`: view change or fixed/CIDR switch
    /// - `NotFound`: the tracked object is gone
    pub async fn update(&self, current: &RecordState, declared: &DeclaredRecord) -> Result<RecordState> {
        let mode = validate(declared, Some(current))?;

        let result = async {
            let found = lookup(self.gateway.as_ref(), &current.reference, &current.internal_id).await?;
            let remote = self.observe(current, found);
            self.update_from(current, remote, declared, &mode).await
        }
        .await;

        result.map_err(|e| e.in_operation("update", &declared.fqdn))
    }

    async fn update_from(
        &self,
        current: &RecordState,
        remote: RemoteRecord,
        declared: &DeclaredRecord,
        mode: &AddressingMode,
    ) -> Result<RecordState> {
        match plan(current, mode) {
            UpdatePlan::InPlace(address) => self.write_in_place(current, remote, declared, mode, address).await,
            UpdatePlan::Reallocate { network_view, cidr } => {
                let merged = attrs::merge(&declared.ext_attrs, &remote.ext_attrs, &current.ext_attrs);

                // The old object goes first so two records never claim the name.
                self.gateway.delete(&remote.reference).await?;
                debug!("Released {} before reallocation", remote.reference);

                let address = AddressResolver::new(self.gateway.as_ref())
                    .allocate(network_view, cidr)
                    .await?;

                let payload = RecordPayload {
                    fqdn: declared.fqdn.clone(),
                    ipv6_addr: address,
                    dns_view: Some(current.dns_view.clone()),
                    ttl: declared.ttl_setting(),
                    comment: declared.comment(),
                    ext_attrs: attrs::with_internal_id(merged.write_set, &current.internal_id),
                };
                let created = self.gateway.create(&payload).await?;

                info!(
                    "Recreated {}: {} -> {}",
                    created.fqdn, remote.ipv6_addr, created.ipv6_addr
                );
                self.emit_event(ReconcileEvent::Recreated {
                    fqdn: created.fqdn.clone(),
                    previous_addr: remote.ipv6_addr,
                    ipv6_addr: created.ipv6_addr,
                });

                Ok(tracked(
                    &created,
                    declared,
                    mode,
                    current.internal_id.clone(),
                    merged.local_view,
                ))
            }
            UpdatePlan::Readopt(filter) => {
                let target = AddressResolver::new(self.gateway.as_ref())
                    .discover(filter, &declared.dns_view)
                    .await?;

                if target.reference == remote.reference {
                    return self.write_in_place(current, remote, declared, mode, None).await;
                }

                info!(
                    "Filter for {} now matches {}, releasing {}",
                    declared.fqdn, target.reference, remote.reference
                );
                self.delete(&remote.reference).await?;
                self.adopt(declared, mode, target, current.internal_id.clone()).await
            }
        }
    }

    async fn write_in_place(
        &self,
        current: &RecordState,
        remote: RemoteRecord,
        declared: &DeclaredRecord,
        mode: &AddressingMode,
        address: Option<Ipv6Addr>,
    ) -> Result<RecordState> {
        let merged = attrs::merge(&declared.ext_attrs, &remote.ext_attrs, &current.ext_attrs);
        let payload = RecordPayload {
            fqdn: declared.fqdn.clone(),
            ipv6_addr: address.unwrap_or(remote.ipv6_addr),
            dns_view: None,
            ttl: declared.ttl_setting(),
            comment: declared.comment(),
            ext_attrs: attrs::with_internal_id(merged.write_set, &current.internal_id),
        };

        if payload.is_satisfied_by(&remote) {
            debug!("Record {} is up to date", remote.fqdn);
            let mut state = tracked(
                &remote,
                declared,
                mode,
                current.internal_id.clone(),
                merged.local_view,
            );
            state.last_updated = current.last_updated;
            return Ok(state);
        }

        let updated = self.gateway.update(&payload, &remote.reference).await?;
        info!("Updated {} -> {}", updated.fqdn, updated.ipv6_addr);
        self.emit_event(ReconcileEvent::Updated {
            fqdn: updated.fqdn.clone(),
            ipv6_addr: updated.ipv6_addr,
        });

        Ok(tracked(
            &updated,
            declared,
            mode,
            current.internal_id.clone(),
            merged.local_view,
        ))
    }

    /// Delete a remote record
    ///
    /// A record that is already absent counts as deleted.
    pub async fn delete(&self, reference: &str) -> Result<()> {
        if reference.is_empty() {
            return Ok(());
        }

        match self.gateway.delete(reference).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Record {} already absent", reference);
            }
            Err(e) => return Err(e.in_operation("delete", reference)),
        }

        info!("Deleted {}", reference);
        self.emit_event(ReconcileEvent::Deleted {
            reference: reference.to_string(),
        });
        Ok(())
    }

    /// Create or update the record tracked under `key` and persist its state
    ///
    /// A tracked record that no longer exists remotely is created again with
    /// the same correlation id.
    pub async fn apply(&self, key: &str, declared: &DeclaredRecord) -> Result<RecordState> {
        let state = match self.state_store.get_record(key).await? {
            None => self.create(declared).await?,
            Some(current) => self.apply_tracked(&current, declared).await?,
        };

        self.state_store.set_record(key, &state).await?;
        Ok(state)
    }

    async fn apply_tracked(&self, current: &RecordState, declared: &DeclaredRecord) -> Result<RecordState> {
        let mode = validate(declared, Some(current))?;

        let result = async {
            match lookup(self.gateway.as_ref(), &current.reference, &current.internal_id).await {
                Ok(found) => {
                    let remote = self.observe(current, found);
                    self.update_from(current, remote, declared, &mode).await
                }
                Err(e) if e.is_not_found() => {
                    warn!("Record {} vanished remotely, recreating", current.fqdn);
                    self.create_validated(declared, &mode, current.internal_id.clone(), None)
                        .await
                }
                Err(e) => Err(e),
            }
        }
        .await;

        result.map_err(|e| e.in_operation("apply", &declared.fqdn))
    }

    /// Delete the record tracked under `key` and forget it
    pub async fn destroy(&self, key: &str) -> Result<()> {
        let Some(current) = self.state_store.get_record(key).await? else {
            debug!("Record {} is not tracked, nothing to destroy", key);
            return Ok(());
        };

        match lookup(self.gateway.as_ref(), &current.reference, &current.internal_id).await {
            Ok(found) => self.delete(&found.record.reference).await?,
            Err(e) if e.is_not_found() => {
                debug!("Record {} already absent", current.fqdn);
            }
            Err(e) => return Err(e.in_operation("delete", &current.fqdn)),
        }

        self.state_store.delete_record(key).await?;
        Ok(())
    }

    /// Run one reconciliation pass
    ///
    /// Every declared record is applied; with pruning enabled, tracked records
    /// that are no longer declared are destroyed. A failing record does not
    /// stop the pass.
    pub async fn reconcile_all(&self, records: &[RecordConfig]) -> Result<PassSummary> {
        let mut summary = PassSummary::default();
        let mut declared = HashSet::new();

        for record in records {
            declared.insert(record.name.as_str());

            match self.apply(&record.name, &record.record).await {
                Ok(state) => {
                    debug!("Reconciled {} -> {}", record.name, state.ipv6_addr);
                    summary.applied += 1;
                }
                Err(e) => {
                    error!("Failed to reconcile {}: {}", record.name, e);
                    self.record_failure(&record.name, &e);
                    summary.failed += 1;
                }
            }
        }

        if self.prune {
            for key in self.state_store.list_records().await? {
                if declared.contains(key.as_str()) {
                    continue;
                }

                match self.destroy(&key).await {
                    Ok(()) => {
                        info!("Pruned undeclared record {}", key);
                        summary.destroyed += 1;
                    }
                    Err(e) => {
                        error!("Failed to prune {}: {}", key, e);
                        self.record_failure(&key, &e);
                        summary.failed += 1;
                    }
                }
            }
        }

        self.state_store.flush().await?;
        info!(
            "Pass complete: {} applied, {} destroyed, {} failed",
            summary.applied, summary.destroyed, summary.failed
        );

        Ok(summary)
    }

    fn record_failure(&self, key: &str, error: &Error) {
        self.emit_event(ReconcileEvent::Failed {
            key: key.to_string(),
            error: error.to_string(),
            retryable: error.is_retryable(),
        });
    }

    /// Emit a reconcile event
    fn emit_event(&self, event: ReconcileEvent) {
        if self.event_tx.try_send(event).is_err() {
            // Dropped rather than buffered without bound.
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Tracked state after a successful write
fn tracked(
    remote: &RemoteRecord,
    declared: &DeclaredRecord,
    mode: &AddressingMode,
    internal_id: String,
    ext_attrs: ExtAttrs,
) -> RecordState {
    RecordState {
        reference: remote.reference.clone(),
        internal_id,
        fqdn: remote.fqdn.clone(),
        ipv6_addr: remote.ipv6_addr,
        mode: mode.kind(),
        cidr: match mode {
            AddressingMode::Cidr { cidr, .. } => Some(cidr.to_string()),
            _ => None,
        },
        filter_params: match mode {
            AddressingMode::Filter(filter) => Some(filter.raw().clone()),
            _ => None,
        },
        dns_view: declared.dns_view.clone(),
        network_view: declared.network_view.clone(),
        ttl: remote.ttl,
        comment: remote.comment.clone(),
        ext_attrs,
        last_updated: Utc::now(),
    }
}
