//! In-memory implementation of [`ModelStore`].
//!
//! [`InMemoryStore`] keeps decomposed models in a HashMap with the same
//! semantics as the SQLite backend, including fingerprint verification on
//! load. Used by tests and one-shot CLI runs that don't need persistence.

use std::collections::HashMap;

use logstate_core::Graph;
use tracing::debug;

use crate::convert::{decompose, recompose, DecomposedModel};
use crate::error::StorageError;
use crate::hash::fingerprint;
use crate::traits::ModelStore;
use crate::types::{ModelId, ModelSummary};

/// Data stored for a single model.
#[derive(Debug, Clone)]
struct StoredModel {
    name: String,
    decomposed: DecomposedModel,
    fingerprint: blake3::Hash,
}

impl StoredModel {
    fn new(name: &str) -> Self {
        let empty = Graph::new();
        StoredModel {
            name: name.to_string(),
            decomposed: decompose(&empty),
            fingerprint: fingerprint(&empty),
        }
    }
}

/// In-memory implementation of [`ModelStore`].
#[derive(Debug)]
pub struct InMemoryStore {
    models: HashMap<ModelId, StoredModel>,
    next_model_id: i64,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        InMemoryStore {
            models: HashMap::new(),
            next_model_id: 1,
        }
    }

    fn get_stored(&self, id: ModelId) -> Result<&StoredModel, StorageError> {
        self.models.get(&id).ok_or(StorageError::ModelNotFound(id.0))
    }

    fn get_stored_mut(&mut self, id: ModelId) -> Result<&mut StoredModel, StorageError> {
        self.models
            .get_mut(&id)
            .ok_or(StorageError::ModelNotFound(id.0))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelStore for InMemoryStore {
    fn create_model(&mut self, name: &str) -> Result<ModelId, StorageError> {
        let id = ModelId(self.next_model_id);
        self.next_model_id += 1;
        self.models.insert(id, StoredModel::new(name));
        debug!(model = %id, name, "created model");
        Ok(id)
    }

    fn save_model(&mut self, id: ModelId, graph: &Graph) -> Result<(), StorageError> {
        let stored = self.get_stored_mut(id)?;
        stored.decomposed = decompose(graph);
        stored.fingerprint = fingerprint(graph);
        debug!(model = %id, states = graph.size(), "saved model");
        Ok(())
    }

    fn load_model(&self, id: ModelId) -> Result<Graph, StorageError> {
        let stored = self.get_stored(id)?;
        let graph = recompose(stored.decomposed.clone())?;
        let actual = fingerprint(&graph);
        if actual != stored.fingerprint {
            return Err(StorageError::IntegrityError {
                reason: format!(
                    "{id} fingerprint mismatch: stored {}, computed {}",
                    stored.fingerprint.to_hex(),
                    actual.to_hex()
                ),
            });
        }
        Ok(graph)
    }

    fn delete_model(&mut self, id: ModelId) -> Result<(), StorageError> {
        self.models
            .remove(&id)
            .ok_or(StorageError::ModelNotFound(id.0))?;
        Ok(())
    }

    fn list_models(&self) -> Result<Vec<ModelSummary>, StorageError> {
        let mut summaries: Vec<ModelSummary> = self
            .models
            .iter()
            .map(|(&id, stored)| ModelSummary {
                id,
                name: stored.name.clone(),
                states: stored.decomposed.live_states(),
                fingerprint: stored.fingerprint.to_hex().to_string(),
            })
            .collect();
        summaries.sort_by_key(|s| s.id);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use logstate_core::{EdgeProperties, State};

    use super::*;

    #[test]
    fn create_then_load_empty() {
        let mut store = InMemoryStore::new();
        let id = store.create_model("empty").unwrap();
        let graph = store.load_model(id).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.start(), None);
    }

    #[test]
    fn ids_are_sequential() {
        let mut store = InMemoryStore::new();
        assert_eq!(store.create_model("a").unwrap(), ModelId(1));
        assert_eq!(store.create_model("b").unwrap(), ModelId(2));
    }

    #[test]
    fn missing_model_errors() {
        let mut store = InMemoryStore::new();
        assert!(matches!(
            store.load_model(ModelId(7)),
            Err(StorageError::ModelNotFound(7))
        ));
        assert!(matches!(
            store.save_model(ModelId(7), &Graph::new()),
            Err(StorageError::ModelNotFound(7))
        ));
        assert!(matches!(
            store.delete_model(ModelId(7)),
            Err(StorageError::ModelNotFound(7))
        ));
    }

    #[test]
    fn tampered_rows_fail_integrity_check() {
        let mut store = InMemoryStore::new();
        let id = store.create_model("m").unwrap();
        let (mut graph, root) = Graph::with_start(State::root()).unwrap();
        let a = graph.add_state(State::new(["A"])).unwrap();
        graph.add_edge(root, a, EdgeProperties::new(3));
        store.save_model(id, &graph).unwrap();

        store.models.get_mut(&id).unwrap().decomposed.edges[0].2 = EdgeProperties::new(4);
        assert!(matches!(
            store.load_model(id),
            Err(StorageError::IntegrityError { .. })
        ));
    }

    #[test]
    fn list_reports_state_counts() {
        let mut store = InMemoryStore::new();
        let first = store.create_model("first").unwrap();
        store.create_model("second").unwrap();
        let (graph, _) = Graph::with_start(State::root()).unwrap();
        store.save_model(first, &graph).unwrap();

        let list = store.list_models().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "first");
        assert_eq!(list[0].states, 1);
        assert_eq!(list[1].states, 0);
    }
}
