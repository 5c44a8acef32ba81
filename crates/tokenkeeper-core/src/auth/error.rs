use std::io;

use thiserror::Error;

/// Failures of the token file.
///
/// Read-side kinds never reach callers of `TokenStore::load`; they only
/// decide how loudly the fallback to an empty record is logged.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Token file does not exist")]
    Missing,

    #[error("Token file is empty")]
    Empty,

    #[error("Failed to read token file: {0}")]
    Read(#[source] io::Error),

    #[error("Token file is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid timestamp in field {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("Failed to write token file: {0}")]
    Write(#[source] io::Error),
}

impl StoreError {
    /// Absent storage is the normal first-run state, not a fault.
    pub fn is_absent(&self) -> bool {
        matches!(self, StoreError::Missing | StoreError::Empty)
    }
}
