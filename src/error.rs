//! Errors surfaced by the engine facade.

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Lock contention outlasted the retry budget. The whole event may be
    /// handed in again.
    #[error("Concurrency conflict in {operation} after {attempts} attempts: {source}")]
    ConcurrencyConflict {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: StorageError,
    },
}

impl EngineError {
    /// Whether the caller may re-submit the event.
    ///
    /// Only lock contention qualifies. Corrupt rows, duplicate postings,
    /// unknown accounts and configuration errors fail the same way on every
    /// attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Storage(err) => err.is_contention(),
            EngineError::ConcurrencyConflict { .. } => true,
            EngineError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
