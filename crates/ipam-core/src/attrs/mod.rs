// # Extensible Attribute Merging
//
// Extensible attributes on a remote record are edited by more than one tool.
// The merge rules below decide, on every write, which keys the local
// declaration owns and which belong to someone else.
//
// ## Ownership
//
// A key is **locally owned** when it appears in the previous local
// declaration. Every other key found on the remote object is **externally
// owned** and is carried through untouched.
//
// ```text
//   previous declared   { Location }
//   declared            { Location, Owner }
//   remote              { Location, Site }        <- Site added by another tool
//   ------------------------------------------------
//   write set           { Location, Owner, Site }
//   local view          { Location, Owner }
// ```
//
// The correlation-id attribute is reserved: it is stamped by the reconciler on
// every write and never shows up in the local view.

use std::collections::BTreeMap;

/// Extensible attribute set (name -> value), ordered for stable output
pub type ExtAttrs = BTreeMap<String, String>;

/// Name of the reserved attribute holding a record's correlation identifier
pub const INTERNAL_ID_ATTR: &str = "IPAM Internal ID";

/// Result of merging declared attributes with a remote attribute set
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Attribute set to send on the next write
    pub write_set: ExtAttrs,
    /// Locally-owned attributes, as reported back to the configuration surface
    pub local_view: ExtAttrs,
}

/// Merge declared attributes with the attributes currently on the remote object
///
/// # Parameters
///
/// - `declared`: attributes in the current declaration
/// - `remote`: attributes on the remote object right now
/// - `previous`: attributes in the last applied declaration
///
/// # Guarantee
///
/// A remote key that is not in `previous` survives unless `declared` redeclares
/// it, in which case it becomes locally owned with the declared value.
pub fn merge(declared: &ExtAttrs, remote: &ExtAttrs, previous: &ExtAttrs) -> MergeOutcome {
    let mut write_set: ExtAttrs = remote
        .iter()
        .filter(|(key, _)| !previous.contains_key(*key) || key.as_str() == INTERNAL_ID_ATTR)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (key, value) in declared {
        if key == INTERNAL_ID_ATTR {
            continue;
        }
        write_set.insert(key.clone(), value.clone());
    }

    MergeOutcome {
        write_set,
        local_view: strip_reserved(declared),
    }
}

/// Restrict a remote attribute set to the keys the local declaration owns
///
/// Used on read: externally added keys never show up as configuration drift.
pub fn local_view(remote: &ExtAttrs, previous: &ExtAttrs) -> ExtAttrs {
    remote
        .iter()
        .filter(|(key, _)| previous.contains_key(*key) && key.as_str() != INTERNAL_ID_ATTR)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Locally-owned keys whose remote value no longer matches the declaration
///
/// A key removed remotely is reported as drifted as well.
pub fn drifted_keys(remote: &ExtAttrs, previous: &ExtAttrs) -> Vec<String> {
    previous
        .iter()
        .filter(|(key, value)| key.as_str() != INTERNAL_ID_ATTR && remote.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Stamp the correlation identifier onto a write set
pub fn with_internal_id(mut write_set: ExtAttrs, internal_id: &str) -> ExtAttrs {
    write_set.insert(INTERNAL_ID_ATTR.to_string(), internal_id.to_string());
    write_set
}

fn strip_reserved(attrs: &ExtAttrs) -> ExtAttrs {
    let mut attrs = attrs.clone();
    attrs.remove(INTERNAL_ID_ATTR);
    attrs
}
