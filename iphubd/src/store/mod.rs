pub mod db;
pub mod hash;

use std::time::Duration;
use thiserror::Error;

/// Failures acquiring, reading, or committing against the device table.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored record for '{hostname}' is corrupt: {reason}")]
    Corrupt { hostname: String, reason: String },

    #[error("timed out after {0:?} waiting for the registry store")]
    Timeout(Duration),

    #[error("registry store is not running")]
    Unavailable,
}

pub type StoreResult<T> = Result<T, StoreError>;
