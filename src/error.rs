//! Error taxonomy for the connector pipeline
//!
//! Store, config and CLI plumbing use `anyhow` directly. Anything that crosses
//! the per-rule boundary is classified into a `ConnectorError` so the tick loop
//! can decide whether to retry, skip or exclude.

use thiserror::Error;

/// Errors surfaced by chain access, decoding, rule parsing and persistence.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// RPC endpoint unreachable, returned an error, or timed out.
    /// Retried on the next scheduled tick.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Malformed or unexpected payload (event log shape, hex field, ABI value).
    #[error("decode error: {0}")]
    Decode(String),

    /// Unknown contract, token or network metadata.
    #[error("not found: {0}")]
    NotFound(String),

    /// A rule or config entry is missing a required property or is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Persistence failure.
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl ConnectorError {
    /// Whether the failure is transient and worth retrying on a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectorError::Connectivity(_))
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ConnectorError::Decode(e.to_string())
        } else {
            // Timeouts, refused connections and HTTP status errors all end up here
            ConnectorError::Connectivity(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::Decode(e.to_string())
    }
}
