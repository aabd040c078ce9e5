//! Storage error types for logstate-storage.
//!
//! [`StorageError`] covers every failure mode of the storage layer:
//! serialization, the SQLite backend, missing models, fingerprint mismatches
//! and graphs that cannot be rebuilt from stored rows.

use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A model with the given ID was not found.
    #[error("model not found: {0}")]
    ModelNotFound(i64),

    /// Stored data does not match its recorded fingerprint, or cannot be
    /// represented in the store.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },

    /// Failed to reconstruct a Graph from stored data.
    #[error("reconstruction error: {reason}")]
    ReconstructionError { reason: String },
}
