//! Error taxonomy shared across the server.

use thiserror::Error;

/// Errors surfaced by the zone store, record handlers and transports.
#[derive(Debug, Clone, Error)]
pub enum DnsError {
    /// Malformed FQDN, bad RDATA or an out-of-range numeric field.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Zone, record or key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// CNAME-versus-other-type collision or duplicate key.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Signing or key parsing failed.
    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    /// Timeout, connection refused or TSIG rejection.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The storage backend failed.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// Operation is not supported for this record type.
    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DnsError {
    /// True when the error is caller-side (maps to a 4xx at the API layer).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DnsError::InvalidInput(_)
                | DnsError::NotFound(_)
                | DnsError::Conflict(_)
                | DnsError::NotSupported(_)
        )
    }
}
