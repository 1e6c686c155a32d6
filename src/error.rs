// Error types for the charge ledger

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{service} API error ({status}): {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("Missing configuration: {0} must be set")]
    MissingConfig(&'static str),

    #[error("Invalid configuration for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    #[error("Malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },
}

impl LedgerError {
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        LedgerError::MalformedRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
