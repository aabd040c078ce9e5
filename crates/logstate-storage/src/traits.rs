//! The [`ModelStore`] trait defining the storage contract for log models.
//!
//! Backends persist whole graphs: a model is created empty, overwritten by
//! `save_model` at each checkpoint and rebuilt in full by `load_model`.
//! [`InMemoryStore`](crate::memory::InMemoryStore) and
//! [`SqliteStore`](crate::sqlite::SqliteStore) are interchangeable.

use logstate_core::Graph;

use crate::error::StorageError;
use crate::types::{ModelId, ModelSummary};

/// The storage contract for log models.
///
/// Synchronous: callers hold the graph exclusively while saving.
pub trait ModelStore {
    /// Creates a new empty model with the given name.
    fn create_model(&mut self, name: &str) -> Result<ModelId, StorageError>;

    /// Overwrites the stored graph of a model.
    fn save_model(&mut self, id: ModelId, graph: &Graph) -> Result<(), StorageError>;

    /// Rebuilds a model's graph, verifying its fingerprint.
    ///
    /// State handles, retired slots and intern table order are restored
    /// exactly as saved.
    fn load_model(&self, id: ModelId) -> Result<Graph, StorageError>;

    /// Deletes a model and all its rows.
    fn delete_model(&mut self, id: ModelId) -> Result<(), StorageError>;

    /// Lists all stored models in ascending ID order.
    fn list_models(&self) -> Result<Vec<ModelSummary>, StorageError>;
}
