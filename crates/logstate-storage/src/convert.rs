//! Decompose/recompose conversions between a Graph and flat storage rows.
//!
//! [`decompose`] flattens a [`Graph`] into a [`DecomposedModel`]: the intern
//! table in handle order, every slot (retired ones included), the edge list
//! and the start state. [`recompose`] rebuilds the graph and re-validates
//! every structural invariant, so a corrupted store surfaces as
//! [`StorageError::ReconstructionError`] rather than a broken graph.

use logstate_core::{
    EdgeProperties, Graph, PropertyTable, PropsId, Slot, SparseAdjacencyIndex, StateId,
    StateProperties,
};

use crate::error::StorageError;

/// All components of a Graph broken into flat vectors for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedModel {
    /// Interned template sets: (PropsId, templates), ascending
    pub properties: Vec<(PropsId, Vec<String>)>,
    /// Every slot: (StateId, Slot), ascending
    pub states: Vec<(StateId, Slot)>,
    /// Edges: (source, target, properties)
    pub edges: Vec<(StateId, StateId, EdgeProperties)>,
    /// Designated start state
    pub start: Option<StateId>,
}

impl DecomposedModel {
    /// Number of live states.
    pub fn live_states(&self) -> usize {
        self.states
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .count()
    }
}

/// Decomposes a Graph into flat vectors suitable for storage.
///
/// Edge payloads that fail to decode are stored as a single pass; a graph
/// built through the public API never holds one.
pub fn decompose(graph: &Graph) -> DecomposedModel {
    let properties = graph
        .properties()
        .iter()
        .map(|(id, props)| (id, props.templates().to_vec()))
        .collect();

    let states = graph.slots().map(|(id, slot)| (id, *slot)).collect();

    let edges = graph
        .edges()
        .iter()
        .map(|(source, target, payload)| {
            (
                StateId(source),
                StateId(target),
                EdgeProperties::parse(payload).unwrap_or_default(),
            )
        })
        .collect();

    DecomposedModel {
        properties,
        states,
        edges,
        start: graph.start(),
    }
}

/// Rebuilds a Graph from a DecomposedModel.
///
/// Rows may arrive in any order. Intern handles must be dense from 0.
pub fn recompose(decomposed: DecomposedModel) -> Result<Graph, StorageError> {
    let DecomposedModel {
        mut properties,
        states,
        edges,
        start,
    } = decomposed;

    properties.sort_by_key(|(id, _)| *id);
    let mut entries = Vec::with_capacity(properties.len());
    for (expected, (id, templates)) in properties.into_iter().enumerate() {
        if id.0 as usize != expected {
            return Err(StorageError::ReconstructionError {
                reason: format!("intern table has a gap before PropsId({})", id.0),
            });
        }
        entries.push(StateProperties::new(templates.into_iter().collect()));
    }
    let table = PropertyTable::try_from(entries).map_err(|e| StorageError::ReconstructionError {
        reason: e.to_string(),
    })?;

    let mut index = SparseAdjacencyIndex::new();
    for (source, target, props) in edges {
        if index.set(source.0, target.0, &props.to_string()).is_some() {
            return Err(StorageError::ReconstructionError {
                reason: format!("duplicate edge {source} -> {target}"),
            });
        }
    }

    Graph::from_parts(states, table, index, start).map_err(|e| {
        StorageError::ReconstructionError {
            reason: e.to_string(),
        }
    })
}
