//! Checkpoint storage for logstate models.
//!
//! Provides the [`ModelStore`] trait defining the storage contract, plus the
//! [`InMemoryStore`] and [`SqliteStore`] backends.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: ModelId, ModelSummary storage-layer types
//! - [`traits`]: ModelStore trait definition
//! - [`convert`]: Graph decompose/recompose functions
//! - [`hash`]: blake3 structural fingerprints
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: migration setup for the SQLite backend
//! - [`sqlite`]: SqliteStore implementation

pub mod convert;
pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use convert::{decompose, recompose, DecomposedModel};
pub use error::StorageError;
pub use hash::fingerprint;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::ModelStore;
pub use types::{ModelId, ModelSummary};
