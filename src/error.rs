//! Error types for the tally ledger.

use thiserror::Error;

/// Main error type for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Snapshot store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Malformed snapshot at {key}: {reason}")]
    MalformedSnapshot { key: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid snapshot file format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Snapshot directory is locked by another process")]
    Locked,

    #[error("Outbound sink closed")]
    SinkClosed,
}

impl LedgerError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_) | LedgerError::Io(_))
    }

    /// Whether the stored bytes themselves are damaged. Callers treat such
    /// snapshots as absent.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LedgerError::ChecksumMismatch { .. }
                | LedgerError::InvalidFormat(_)
                | LedgerError::MalformedSnapshot { .. }
        )
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(e: toml::de::Error) -> Self {
        LedgerError::Configuration(e.to_string())
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
