//! Filter predicates for discovering existing records
//!
//! A filter is a flat map. Plain keys name a core record field; a key starting
//! with `*` names an extensible attribute:
//!
//! ```json
//! { "*Site": "Blr", "comment": "provisioned by dhcp" }
//! ```

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv6Addr;

use crate::error::{Error, ValidationError};
use crate::traits::RemoteRecord;

/// Core record field a filter term can select on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    /// Record FQDN
    Name,
    /// Record address
    Ipv6Addr,
    /// Record comment
    Comment,
    /// DNS view
    View,
}

impl FilterField {
    fn parse(key: &str) -> Option<Self> {
        match key {
            "name" | "fqdn" => Some(FilterField::Name),
            "ipv6addr" | "ipv6_addr" => Some(FilterField::Ipv6Addr),
            "comment" => Some(FilterField::Comment),
            "view" | "dns_view" => Some(FilterField::View),
            _ => None,
        }
    }

    /// Field name as understood by the remote service
    pub fn wire_name(&self) -> &'static str {
        match self {
            FilterField::Name => "name",
            FilterField::Ipv6Addr => "ipv6addr",
            FilterField::Comment => "comment",
            FilterField::View => "view",
        }
    }
}

/// What one filter term looks at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterTarget {
    /// A core record field
    Field(FilterField),
    /// An extensible attribute, by name
    ExtAttr(String),
}

/// One `target == value` condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTerm {
    /// Selected field or attribute
    pub target: FilterTarget,
    /// Required value
    pub value: String,
}

impl FilterTerm {
    /// Query-string key for this term (`*` prefix for attributes)
    pub fn query_key(&self) -> String {
        match &self.target {
            FilterTarget::Field(field) => field.wire_name().to_string(),
            FilterTarget::ExtAttr(name) => format!("{}{}", FilterParams::EXT_ATTR_MARKER, name),
        }
    }

    fn matches(&self, record: &RemoteRecord) -> bool {
        match &self.target {
            FilterTarget::Field(FilterField::Name) => {
                record.fqdn.trim_end_matches('.').eq_ignore_ascii_case(self.value.trim_end_matches('.'))
            }
            FilterTarget::Field(FilterField::Ipv6Addr) => match self.value.parse::<Ipv6Addr>() {
                Ok(address) => record.ipv6_addr == address,
                Err(_) => false,
            },
            FilterTarget::Field(FilterField::Comment) => {
                record.comment.as_deref() == Some(self.value.as_str())
            }
            FilterTarget::Field(FilterField::View) => record.dns_view == self.value,
            FilterTarget::ExtAttr(name) => record.ext_attrs.get(name) == Some(&self.value),
        }
    }
}

/// Conjunction of filter terms, as declared in `filter_params`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParams {
    terms: Vec<FilterTerm>,
    raw: BTreeMap<String, String>,
}

impl FilterParams {
    /// Key prefix selecting an extensible attribute instead of a core field
    pub const EXT_ATTR_MARKER: char = '*';

    /// Parse a declared filter map
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for an empty map, an empty attribute name or an
    /// unknown core field.
    pub fn parse(raw: &BTreeMap<String, String>) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::InvalidFilter(String::new()));
        }

        let terms = raw
            .iter()
            .map(|(key, value)| {
                let target = match key.strip_prefix(Self::EXT_ATTR_MARKER) {
                    Some("") => return Err(ValidationError::InvalidFilter(key.clone())),
                    Some(name) => FilterTarget::ExtAttr(name.to_string()),
                    None => FilterField::parse(key)
                        .map(FilterTarget::Field)
                        .ok_or_else(|| ValidationError::InvalidFilter(key.clone()))?,
                };
                Ok(FilterTerm {
                    target,
                    value: value.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            terms,
            raw: raw.clone(),
        })
    }

    /// Parse a JSON-encoded filter object
    ///
    /// Number and boolean values are accepted and compared as text.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(json)?;
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::InvalidFilter(json.to_string()))?;

        let raw = text_map(object).map_err(ValidationError::InvalidFilter)?;
        Ok(Self::parse(&raw)?)
    }

    /// The filter as declared
    pub fn raw(&self) -> &BTreeMap<String, String> {
        &self.raw
    }

    /// Parsed terms
    pub fn terms(&self) -> &[FilterTerm] {
        &self.terms
    }

    /// Value of a `view` term, if the filter has one
    pub fn view(&self) -> Option<&str> {
        self.terms.iter().find_map(|term| match term.target {
            FilterTarget::Field(FilterField::View) => Some(term.value.as_str()),
            _ => None,
        })
    }

    /// Terms as query-string pairs for the remote service
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.terms
            .iter()
            .map(|term| (term.query_key(), term.value.clone()))
            .collect()
    }

    /// Whether `record` satisfies every term
    pub fn matches(&self, record: &RemoteRecord) -> bool {
        self.terms.iter().all(|term| term.matches(record))
    }
}

/// Text form of a scalar JSON value
///
/// Strings are taken as-is; numbers and booleans use their JSON spelling.
/// Null, arrays and objects have no text form.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Flatten a JSON object of scalars into a text map
///
/// Fails with the first key whose value is not a scalar.
pub fn text_map(object: &Map<String, Value>) -> Result<BTreeMap<String, String>, String> {
    object
        .iter()
        .map(|(key, value)| {
            scalar_text(value)
                .map(|text| (key.clone(), text))
                .ok_or_else(|| key.clone())
        })
        .collect()
}

impl fmt::Display for FilterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.raw) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.raw),
        }
    }
}
