//! SQLite implementation of [`ModelStore`].
//!
//! [`SqliteStore`] persists models as rows (one per interned template set,
//! state slot and edge) in a WAL-mode database with foreign keys and
//! automatic schema migrations. Every write runs in a single transaction, so
//! a checkpoint is either fully replaced or untouched.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use logstate_core::{EdgeProperties, Graph, PropsId, Slot, StateId, StateNode};

use crate::convert::{decompose, recompose, DecomposedModel};
use crate::error::StorageError;
use crate::hash::fingerprint;
use crate::traits::ModelStore;
use crate::types::{ModelId, ModelSummary};

/// SQLite-backed implementation of [`ModelStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn assert_model_exists(&self, id: ModelId) -> Result<(), StorageError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM models WHERE id = ?1)",
            params![id.0],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StorageError::ModelNotFound(id.0));
        }
        Ok(())
    }

    /// Replaces all rows of a model within one transaction.
    fn save_decomposed(
        &mut self,
        model_id: i64,
        decomposed: &DecomposedModel,
        hash: &blake3::Hash,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM edges WHERE model_id = ?1", params![model_id])?;
        tx.execute("DELETE FROM states WHERE model_id = ?1", params![model_id])?;
        tx.execute("DELETE FROM properties WHERE model_id = ?1", params![model_id])?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO properties (model_id, props_id, templates) VALUES (?1, ?2, ?3)",
            )?;
            for (props_id, templates) in &decomposed.properties {
                let json = serde_json::to_string(templates)?;
                stmt.execute(params![model_id, props_id.0, json])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO states (model_id, state_id, props_id, is_terminal, retired_into)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (state_id, slot) in &decomposed.states {
                let (props_id, is_terminal, retired_into) = match slot {
                    Slot::Live(node) => (Some(node.props.0), node.is_terminal, None),
                    Slot::Retired { into } => (None, false, Some(into.0)),
                };
                stmt.execute(params![model_id, state_id.0, props_id, is_terminal, retired_into])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO edges (model_id, source, target, passes) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (source, target, props) in &decomposed.edges {
                let passes = i64::try_from(props.passes).map_err(|_| StorageError::IntegrityError {
                    reason: format!(
                        "pass count {} of edge {source} -> {target} overflows",
                        props.passes
                    ),
                })?;
                stmt.execute(params![model_id, source.0, target.0, passes])?;
            }
        }

        tx.execute(
            "UPDATE models SET start_state = ?1, fingerprint = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![decomposed.start.map(|s| s.0), hash.to_hex().as_str(), model_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Reads all rows of a model. Returns the decomposition and the stored
    /// fingerprint.
    fn load_decomposed(&self, model_id: i64) -> Result<(DecomposedModel, String), StorageError> {
        let header: Option<(Option<u32>, String)> = self
            .conn
            .query_row(
                "SELECT start_state, fingerprint FROM models WHERE id = ?1",
                params![model_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (start, stored_hash) = header.ok_or(StorageError::ModelNotFound(model_id))?;

        let properties = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT props_id, templates FROM properties WHERE model_id = ?1 ORDER BY props_id",
            )?;
            let rows = stmt.query_map(params![model_id], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut properties = Vec::new();
            for row in rows {
                let (props_id, json) = row?;
                let templates: Vec<String> = serde_json::from_str(&json)?;
                properties.push((PropsId(props_id), templates));
            }
            properties
        };

        let states = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT state_id, props_id, is_terminal, retired_into FROM states
                 WHERE model_id = ?1 ORDER BY state_id",
            )?;
            let rows = stmt.query_map(params![model_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, Option<u32>>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<u32>>(3)?,
                ))
            })?;
            let mut states = Vec::new();
            for row in rows {
                let (state_id, props_id, is_terminal, retired_into) = row?;
                let slot = match (props_id, retired_into) {
                    (Some(props), None) => Slot::Live(StateNode {
                        props: PropsId(props),
                        is_terminal,
                    }),
                    (None, Some(into)) => Slot::Retired {
                        into: StateId(into),
                    },
                    _ => {
                        return Err(StorageError::ReconstructionError {
                            reason: format!("state {state_id} is neither live nor retired"),
                        })
                    }
                };
                states.push((StateId(state_id), slot));
            }
            states
        };

        let edges = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT source, target, passes FROM edges WHERE model_id = ?1
                 ORDER BY source, target",
            )?;
            let rows = stmt.query_map(params![model_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            let mut edges = Vec::new();
            for row in rows {
                let (source, target, passes) = row?;
                let passes = u64::try_from(passes)
                    .ok()
                    .filter(|&p| p >= 1)
                    .ok_or_else(|| StorageError::ReconstructionError {
                        reason: format!(
                            "edge {source} -> {target} has invalid pass count {passes}"
                        ),
                    })?;
                edges.push((StateId(source), StateId(target), EdgeProperties::new(passes)));
            }
            edges
        };

        Ok((
            DecomposedModel {
                properties,
                states,
                edges,
                start: start.map(StateId),
            },
            stored_hash,
        ))
    }
}

impl ModelStore for SqliteStore {
    fn create_model(&mut self, name: &str) -> Result<ModelId, StorageError> {
        let empty = fingerprint(&Graph::new());
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO models (name, fingerprint) VALUES (?1, ?2)",
            params![name, empty.to_hex().as_str()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        debug!(model = id, name, "created model");
        Ok(ModelId(id))
    }

    fn save_model(&mut self, id: ModelId, graph: &Graph) -> Result<(), StorageError> {
        self.assert_model_exists(id)?;
        let decomposed = decompose(graph);
        let hash = fingerprint(graph);
        self.save_decomposed(id.0, &decomposed, &hash)?;
        debug!(model = id.0, states = graph.size(), edges = graph.edge_count(), "saved model");
        Ok(())
    }

    fn load_model(&self, id: ModelId) -> Result<Graph, StorageError> {
        let (decomposed, stored_hash) = self.load_decomposed(id.0)?;
        let graph = recompose(decomposed)?;
        let actual = fingerprint(&graph);
        if actual.to_hex().as_str() != stored_hash {
            return Err(StorageError::IntegrityError {
                reason: format!(
                    "{id} fingerprint mismatch: stored {stored_hash}, computed {}",
                    actual.to_hex()
                ),
            });
        }
        debug!(model = id.0, states = graph.size(), "loaded model");
        Ok(graph)
    }

    fn delete_model(&mut self, id: ModelId) -> Result<(), StorageError> {
        self.assert_model_exists(id)?;
        let tx = self.conn.transaction()?;
        // Child rows go through ON DELETE CASCADE.
        tx.execute("DELETE FROM models WHERE id = ?1", params![id.0])?;
        tx.commit()?;
        Ok(())
    }

    fn list_models(&self) -> Result<Vec<ModelSummary>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT m.id, m.name, m.fingerprint,
                    (SELECT COUNT(*) FROM states s
                      WHERE s.model_id = m.id AND s.props_id IS NOT NULL)
             FROM models m ORDER BY m.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ModelSummary {
                id: ModelId(row.get(0)?),
                name: row.get(1)?,
                fingerprint: row.get(2)?,
                states: row.get::<_, i64>(3)? as usize,
            })
        })?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use logstate_core::State;

    use super::*;

    fn sample() -> Graph {
        let (mut graph, root) = Graph::with_start(State::root()).unwrap();
        let a = graph.add_state(State::new(["A"])).unwrap();
        let b = graph.add_state(State::new(["B"])).unwrap();
        let end = graph.add_state(State::end()).unwrap();
        graph.add_edge(root, a, EdgeProperties::new(2));
        graph.add_edge(a, b, EdgeProperties::default());
        graph.add_edge(b, end, EdgeProperties::default());
        graph.merge_states(a, b).unwrap();
        graph
    }

    #[test]
    fn save_and_load_in_memory() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_model("sample").unwrap();
        let graph = sample();
        store.save_model(id, &graph).unwrap();

        let loaded = store.load_model(id).unwrap();
        assert_eq!(fingerprint(&loaded), fingerprint(&graph));
        assert_eq!(loaded.slot_count(), graph.slot_count());
        assert!(matches!(
            loaded.node(StateId(2)),
            Err(logstate_core::CoreError::StateRetired { .. })
        ));
    }

    #[test]
    fn save_overwrites_previous_rows() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_model("sample").unwrap();
        store.save_model(id, &sample()).unwrap();
        let (small, _) = Graph::with_start(State::root()).unwrap();
        store.save_model(id, &small).unwrap();

        let loaded = store.load_model(id).unwrap();
        assert_eq!(loaded.size(), 1);
        assert_eq!(loaded.edge_count(), 0);
    }

    #[test]
    fn tampered_pass_count_fails_integrity_check() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_model("sample").unwrap();
        store.save_model(id, &sample()).unwrap();
        store
            .conn
            .execute("UPDATE edges SET passes = passes + 1 WHERE model_id = ?1", params![id.0])
            .unwrap();

        assert!(matches!(
            store.load_model(id),
            Err(StorageError::IntegrityError { .. })
        ));
    }

    #[test]
    fn delete_cascades() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_model("sample").unwrap();
        store.save_model(id, &sample()).unwrap();
        store.delete_model(id).unwrap();

        let rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM states", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
        assert!(matches!(
            store.load_model(id),
            Err(StorageError::ModelNotFound(_))
        ));
    }
}
