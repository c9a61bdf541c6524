//! Error types for the IPAM reconciliation system
//!
//! This module defines all error types used throughout the crate.
//!
//! [`ValidationError`] carries the fixed messages surfaced verbatim to the
//! configuration layer. It is never wrapped in [`Error::Operation`], so the
//! message a caller matches on is exactly the one produced here.

use thiserror::Error;

/// Result type alias for IPAM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Rejections of declared input
///
/// Never retried. The `Display` text of the first four variants is part of the
/// public contract and must not change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// None of the addressing inputs is set
    #[error("any one of 'ipv6_addr', 'cidr' and 'filter_params' values is required")]
    AddressingRequired,

    /// More than one addressing input is set
    #[error("only one of 'ipv6_addr', 'cidr' and 'filter_params' values is allowed to be defined")]
    AddressingConflict,

    /// An update tries to switch between a fixed address and a CIDR allocation
    #[error("only one of 'ipv6_addr' and 'cidr' values is allowed to update")]
    AddressingModeSwitch,

    /// DNS view or network view differs from the value recorded at creation
    #[error("view update not allowed: '{field}' cannot be changed from '{previous}' to '{requested}'")]
    ViewChange {
        /// Either `dns_view` or `network_view`
        field: &'static str,
        /// Value recorded at creation
        previous: String,
        /// Newly declared value
        requested: String,
    },

    /// The FQDN is empty
    #[error("'fqdn' must not be empty")]
    EmptyFqdn,

    /// The declared address is not an IPv6 address
    #[error("'ipv6_addr' value '{0}' is not a valid IPv6 address")]
    InvalidAddress(String),

    /// The declared CIDR is not an IPv6 prefix
    #[error("'cidr' value '{0}' is not a valid IPv6 network prefix")]
    InvalidCidr(String),

    /// A filter key is empty or names an unsupported field
    #[error("'filter_params' key '{0}' is not supported")]
    InvalidFilter(String),

    /// A `view` filter term names a different view than `dns_view`
    #[error("'filter_params' view '{filter_view}' conflicts with 'dns_view' '{dns_view}'")]
    FilterViewConflict {
        /// Value of the `view` filter term
        filter_view: String,
        /// Declared DNS view
        dns_view: String,
    },
}

/// Core error type for the IPAM system
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or conflicting declared input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Remote object is absent
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A filter query matched more than one remote object
    #[error("filter {filter} matched {count} records, expected exactly one")]
    AmbiguousMatch {
        /// Number of matching objects
        count: usize,
        /// Rendered filter predicate
        filter: String,
    },

    /// No address left in the requested network
    #[error("no available IPv6 address in network {cidr} (network view '{network_view}')")]
    AllocationExhausted {
        /// Network view searched
        network_view: String,
        /// Network searched
        cidr: String,
    },

    /// Network or service failure; the caller may retry
    #[error("Transient gateway error: {0}")]
    TransientGateway(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Gateway-specific error
    #[error("Gateway error ({gateway}): {message}")]
    Gateway {
        /// Gateway name
        gateway: String,
        /// Error message
        message: String,
    },

    /// A failure annotated with the record and operation it happened in
    #[error("{operation} of record '{record}' failed: {source}")]
    Operation {
        /// Operation being performed
        operation: &'static str,
        /// Record identity (fqdn or state key)
        record: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an ambiguous-match error
    pub fn ambiguous(count: usize, filter: impl Into<String>) -> Self {
        Self::AmbiguousMatch {
            count,
            filter: filter.into(),
        }
    }

    /// Create an allocation-exhausted error
    pub fn exhausted(network_view: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self::AllocationExhausted {
            network_view: network_view.into(),
            cidr: cidr.into(),
        }
    }

    /// Create a transient (retryable) gateway error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientGateway(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a gateway-specific error
    pub fn gateway(gateway: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Gateway {
            gateway: gateway.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Attach the operation and record identity to an error
    ///
    /// Validation errors are returned unchanged.
    pub fn in_operation(self, operation: &'static str, record: impl Into<String>) -> Self {
        match self {
            Self::Validation(_) | Self::Operation { .. } => self,
            other => Self::Operation {
                operation,
                record: record.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through operation context
    pub fn root(&self) -> &Error {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the remote object was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_))
    }

    /// Whether the orchestrator may retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Self::TransientGateway(_) | Self::Io(_))
    }

    /// Whether this is a rejection of declared input
    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
