//! Graph: the state arena, intern table and adjacency index of a log model.
//!
//! [`Graph`] owns every state it creates. States live in a dense slot vector
//! addressed by [`StateId`]; a state's identity is its slot, not its content,
//! so two states with the same templates are still distinct nodes. Merging
//! retires one slot for good: later use of the retired handle is a checked
//! [`CoreError::StateRetired`] instead of silent aliasing.
//!
//! Edges live in a [`SparseAdjacencyIndex`] keyed by slot index, with an
//! [`EdgeProperties`] payload. The graph never holds an edge whose endpoints
//! are not live.
//!
//! # Concurrency
//!
//! All mutation takes `&mut self`, so the borrow checker gives the exclusive
//! access a merge needs; hosts sharing a graph across threads wrap the whole
//! graph in one lock. Trace matching takes `&self`.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::edge::EdgeProperties;
use crate::error::CoreError;
use crate::id::{PropsId, StateId};
use crate::sparse::SparseAdjacencyIndex;
use crate::state::{PropertyTable, State, StateProperties};

/// Per-state data kept in a live slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNode {
    /// Interned template set
    pub props: PropsId,
    /// Whether a trace may end here
    pub is_terminal: bool,
}

/// One entry of the state arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    /// A state that is part of the graph.
    Live(StateNode),
    /// A state absorbed by a merge. `into` is the state that absorbed it.
    Retired { into: StateId },
}

/// A behavioural model of log output: states, transitions and pass counts.
///
/// Deserializing runs [`Graph::validate`], so a decoded graph upholds the same
/// invariants as one built through the mutation API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawGraph")]
pub struct Graph {
    /// State arena indexed by StateId.0
    slots: Vec<Slot>,
    /// Interned template sets shared by equivalent states
    properties: PropertyTable,
    /// Transitions keyed by slot index
    edges: SparseAdjacencyIndex,
    /// Designated start state
    start: Option<StateId>,
}

/// Unchecked wire form of [`Graph`].
#[derive(Deserialize)]
struct RawGraph {
    slots: Vec<Slot>,
    properties: PropertyTable,
    edges: SparseAdjacencyIndex,
    start: Option<StateId>,
}

impl TryFrom<RawGraph> for Graph {
    type Error = CoreError;

    fn try_from(raw: RawGraph) -> Result<Self, Self::Error> {
        let graph = Graph {
            slots: raw.slots,
            properties: raw.properties,
            edges: raw.edges,
            start: raw.start,
        };
        graph.validate()?;
        Ok(graph)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph without a start state.
    pub fn new() -> Self {
        Graph {
            slots: Vec::new(),
            properties: PropertyTable::new(),
            edges: SparseAdjacencyIndex::new(),
            start: None,
        }
    }

    /// Creates a graph holding a single state, which becomes the start state.
    pub fn with_start(state: State) -> Result<(Self, StateId), CoreError> {
        let mut graph = Graph::new();
        let id = graph.add_state(state)?;
        graph.start = Some(id);
        Ok((graph, id))
    }

    /// Reconstructs a graph from stored parts, validating every invariant the
    /// builder methods would otherwise maintain.
    ///
    /// `slots` must contain every handle from 0 up to its length exactly once.
    pub fn from_parts(
        slots: Vec<(StateId, Slot)>,
        properties: PropertyTable,
        edges: SparseAdjacencyIndex,
        start: Option<StateId>,
    ) -> Result<Self, CoreError> {
        let mut dense: Vec<Option<Slot>> = vec![None; slots.len()];
        for (id, slot) in slots {
            let entry = dense
                .get_mut(id.index())
                .ok_or_else(|| CoreError::GraphInconsistency {
                    reason: format!("state handle {id} leaves a gap in the arena"),
                })?;
            if entry.is_some() {
                return Err(CoreError::StateAlreadyExists { id });
            }
            *entry = Some(slot);
        }
        // n distinct handles below n fill every entry.
        let slots: Vec<Slot> = dense.into_iter().flatten().collect();

        let graph = Graph {
            slots,
            properties,
            edges,
            start,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Checks all structural invariants.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (i, slot) in self.slots.iter().enumerate() {
            match slot {
                Slot::Live(node) => {
                    if self.properties.get(node.props).is_none() {
                        return Err(CoreError::GraphInconsistency {
                            reason: format!(
                                "state {i} references unknown properties {}",
                                node.props
                            ),
                        });
                    }
                }
                Slot::Retired { into } => {
                    if into.index() >= self.slots.len() || into.index() == i {
                        return Err(CoreError::GraphInconsistency {
                            reason: format!("state {i} retired into invalid handle {into}"),
                        });
                    }
                }
            }
        }
        for (source, destination, payload) in self.edges.iter() {
            for endpoint in [source, destination] {
                if !self.contains(StateId(endpoint)) {
                    return Err(CoreError::GraphInconsistency {
                        reason: format!(
                            "edge {source}->{destination} touches dead state {endpoint}"
                        ),
                    });
                }
            }
            EdgeProperties::parse(payload)?;
        }
        if let Some(start) = self.start {
            self.node(start)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    /// Returns the start state, if one is designated.
    pub fn start(&self) -> Option<StateId> {
        self.start
    }

    /// Designates `id` as the start state.
    pub fn set_start(&mut self, id: StateId) -> Result<(), CoreError> {
        self.node(id)?;
        self.start = Some(id);
        Ok(())
    }

    /// Returns the intern table.
    pub fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    /// Returns the adjacency index.
    pub fn edges(&self) -> &SparseAdjacencyIndex {
        &self.edges
    }

    /// Iterates over all slots, live and retired, in handle order.
    pub fn slots(&self) -> impl Iterator<Item = (StateId, &Slot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (StateId(i as u32), slot))
    }

    /// Iterates over live state handles in ascending order.
    pub fn state_ids(&self) -> impl Iterator<Item = StateId> + '_ {
        self.slots().filter_map(|(id, slot)| match slot {
            Slot::Live(_) => Some(id),
            Slot::Retired { .. } => None,
        })
    }

    /// Number of live states.
    pub fn size(&self) -> usize {
        self.state_ids().count()
    }

    /// Number of live states.
    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of allocated handles, live or retired.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` if `id` is a live state of this graph.
    pub fn contains(&self, id: StateId) -> bool {
        matches!(self.slots.get(id.index()), Some(Slot::Live(_)))
    }

    /// Looks up a live state.
    pub fn node(&self, id: StateId) -> Result<&StateNode, CoreError> {
        match self.slots.get(id.index()) {
            Some(Slot::Live(node)) => Ok(node),
            Some(Slot::Retired { into }) => Err(CoreError::StateRetired { id, into: *into }),
            None => Err(CoreError::StateNotFound { id }),
        }
    }

    fn node_mut(&mut self, id: StateId) -> Result<&mut StateNode, CoreError> {
        match self.slots.get_mut(id.index()) {
            Some(Slot::Live(node)) => Ok(node),
            Some(Slot::Retired { into }) => Err(CoreError::StateRetired { id, into: *into }),
            None => Err(CoreError::StateNotFound { id }),
        }
    }

    /// Returns the interned properties of a live state.
    pub fn state_properties(&self, id: StateId) -> Result<&StateProperties, CoreError> {
        let node = self.node(id)?;
        self.properties
            .get(node.props)
            .ok_or_else(|| CoreError::GraphInconsistency {
                reason: format!("state {id} references unknown properties {}", node.props),
            })
    }

    /// Returns the template list of a live state.
    pub fn templates(&self, id: StateId) -> Result<&[String], CoreError> {
        Ok(self.state_properties(id)?.templates())
    }

    /// Returns a detached copy of a live state.
    pub fn state(&self, id: StateId) -> Result<State, CoreError> {
        let node = self.node(id)?;
        let templates = self.templates(id)?;
        Ok(State::new(templates.iter().cloned()).with_terminal(node.is_terminal))
    }

    pub fn is_terminal(&self, id: StateId) -> Result<bool, CoreError> {
        Ok(self.node(id)?.is_terminal)
    }

    pub fn set_terminal(&mut self, id: StateId, is_terminal: bool) -> Result<(), CoreError> {
        self.node_mut(id)?.is_terminal = is_terminal;
        Ok(())
    }

    /// Equivalence by interned handle: O(1).
    pub fn is_equivalent(&self, a: StateId, b: StateId) -> Result<bool, CoreError> {
        Ok(self.node(a)?.props == self.node(b)?.props)
    }

    /// Returns `true` if the two states share any template.
    pub fn is_equivalent_weak(&self, a: StateId, b: StateId) -> Result<bool, CoreError> {
        let other = self.state_properties(b)?;
        Ok(self
            .templates(a)?
            .iter()
            .any(|template| other.contains(template)))
    }

    /// Live states whose template set contains `template`, ascending.
    pub fn states_with_template(&self, template: &str) -> Vec<StateId> {
        self.state_ids()
            .filter(|&id| {
                self.state_properties(id)
                    .is_ok_and(|props| props.contains(template))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // State and edge mutation
    // -----------------------------------------------------------------------

    /// Adds a state, returning its new handle.
    ///
    /// The state is moved in, so a state value can only ever occupy one slot.
    /// Errors if the template list is empty.
    pub fn add_state(&mut self, state: State) -> Result<StateId, CoreError> {
        let (templates, is_terminal) = state.into_parts();
        if templates.is_empty() {
            return Err(CoreError::InvalidState {
                reason: "a state must represent at least one template".into(),
            });
        }
        let id = StateId(self.slots.len() as u32);
        let props = self.properties.intern(templates);
        self.slots.push(Slot::Live(StateNode { props, is_terminal }));
        trace!(state = %id, props = %props, "added state");
        Ok(id)
    }

    /// Adds an edge. Returns `false` if either endpoint is not live or the
    /// edge already exists.
    pub fn add_edge(&mut self, start: StateId, end: StateId, props: EdgeProperties) -> bool {
        if !self.contains(start) || !self.contains(end) {
            return false;
        }
        if self.edges.contains(start.0, end.0) {
            return false;
        }
        self.edges.set(start.0, end.0, &props.to_string());
        true
    }

    /// Adds `passes` traversals to an existing edge. Returns `false` if the
    /// edge does not exist or its payload is not a pass count, in which case
    /// the payload is left untouched.
    pub fn update_edge(&mut self, start: StateId, end: StateId, passes: u64) -> bool {
        if !self.contains(start) || !self.contains(end) {
            return false;
        }
        let current = match self.edges.get(start.0, end.0).map(EdgeProperties::parse) {
            Ok(Ok(props)) => props,
            Ok(Err(_)) | Err(_) => return false,
        };
        let updated = EdgeProperties::new(current.passes.saturating_add(passes));
        self.edges.set(start.0, end.0, &updated.to_string());
        true
    }

    /// Returns the properties of the edge `start -> end`.
    pub fn edge(&self, start: StateId, end: StateId) -> Result<EdgeProperties, CoreError> {
        self.node(start)?;
        self.node(end)?;
        let payload = self
            .edges
            .get(start.0, end.0)
            .map_err(|_| CoreError::EdgeNotFound { start, end })?;
        EdgeProperties::parse(payload)
    }

    // -----------------------------------------------------------------------
    // Adjacency queries
    // -----------------------------------------------------------------------

    /// Successors of a state, ascending. Errors if the state is not live; a
    /// live state without successors yields an empty list.
    pub fn get_outgoing_states(&self, id: StateId) -> Result<Vec<StateId>, CoreError> {
        self.node(id)?;
        Ok(self
            .edges
            .children_of(id.0)
            .into_iter()
            .map(|(destination, _)| StateId(destination))
            .collect())
    }

    /// Successors of a state, excluding a self-loop.
    pub fn get_outgoing_states_not_self(&self, id: StateId) -> Result<Vec<StateId>, CoreError> {
        let mut outgoing = self.get_outgoing_states(id)?;
        outgoing.retain(|&next| next != id);
        Ok(outgoing)
    }

    /// Predecessors of a state, ascending.
    pub fn get_incoming_states(&self, id: StateId) -> Result<Vec<StateId>, CoreError> {
        self.node(id)?;
        Ok(self.edges.parents_of(id.0).into_iter().map(StateId).collect())
    }

    /// Successors together with the properties of the connecting edge.
    pub fn get_outgoing_props(
        &self,
        id: StateId,
    ) -> Result<Vec<(StateId, EdgeProperties)>, CoreError> {
        self.node(id)?;
        self.edges
            .children_of(id.0)
            .into_iter()
            .map(|(destination, payload)| {
                Ok((StateId(destination), EdgeProperties::parse(payload)?))
            })
            .collect()
    }

    /// Returns `true` if any successor of `id` is terminal.
    pub fn has_terminal_successor(&self, id: StateId) -> bool {
        self.edges
            .children_of(id.0)
            .into_iter()
            .any(|(destination, _)| {
                matches!(
                    self.slots.get(destination as usize),
                    Some(Slot::Live(StateNode { is_terminal: true, .. }))
                )
            })
    }

    // -----------------------------------------------------------------------
    // Merging
    // -----------------------------------------------------------------------

    /// Merges `absorb` into `keep`.
    ///
    /// `keep` gains the templates of `absorb` it lacks (appended after its
    /// own), becomes terminal if `absorb` was, inherits every incoming and
    /// outgoing edge of `absorb`, and replaces it as start state if needed.
    /// When a redirected edge collides with an existing one the pass counts
    /// are summed. `absorb` is retired: any later use of its handle fails with
    /// [`CoreError::StateRetired`].
    ///
    /// All preconditions are checked before the graph is touched.
    pub fn merge_states(&mut self, keep: StateId, absorb: StateId) -> Result<(), CoreError> {
        if keep == absorb {
            return Err(CoreError::InvalidMerge {
                reason: format!("cannot merge state {keep} with itself"),
            });
        }
        let keep_node = *self.node(keep)?;
        let absorb_node = *self.node(absorb)?;

        let templates = {
            let keep_props = self.state_properties(keep)?;
            let absorb_props = self.state_properties(absorb)?;
            keep_props.union(absorb_props)
        };

        // Nothing below can fail.
        let props = self.properties.intern(templates);
        let is_terminal = keep_node.is_terminal || absorb_node.is_terminal;
        self.slots[keep.index()] = Slot::Live(StateNode { props, is_terminal });

        let redirected_in =
            self.edges
                .rewrite_destination_with(absorb.0, keep.0, EdgeProperties::merge_payloads);
        let redirected_out =
            self.edges
                .rewrite_source_with(absorb.0, keep.0, EdgeProperties::merge_payloads);

        if self.start == Some(absorb) {
            self.start = Some(keep);
        }
        self.slots[absorb.index()] = Slot::Retired { into: keep };

        debug!(
            keep = %keep,
            absorb = %absorb,
            redirected_in,
            redirected_out,
            "merged states"
        );

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    /// Merges `absorb` into `keep` and returns the surviving handle.
    pub fn full_merge_states(
        &mut self,
        keep: StateId,
        absorb: StateId,
    ) -> Result<StateId, CoreError> {
        self.merge_states(keep, absorb)?;
        Ok(keep)
    }

    /// Merges `id` with its non-self successors and returns the survivor.
    ///
    /// `which` selects successors by position in the ascending successor
    /// list; `None` merges all of them. Positions are validated before any
    /// merge happens.
    pub fn merge_with_children(
        &mut self,
        id: StateId,
        which: Option<&[usize]>,
    ) -> Result<StateId, CoreError> {
        let outgoing = self.get_outgoing_states_not_self(id)?;
        let targets: Vec<StateId> = match which {
            None => outgoing,
            Some(positions) => {
                let mut selected = Vec::with_capacity(positions.len());
                for &pos in positions {
                    let child = *outgoing.get(pos).ok_or_else(|| CoreError::InvalidMerge {
                        reason: format!(
                            "state {id} has {} successors, position {pos} is out of range",
                            outgoing.len()
                        ),
                    })?;
                    if !selected.contains(&child) {
                        selected.push(child);
                    }
                }
                selected
            }
        };
        for child in targets {
            self.merge_states(id, child)?;
        }
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Debug consistency assertion
    // -----------------------------------------------------------------------

    /// Verifies that no edge touches a retired state.
    ///
    /// Only called in debug builds (via `cfg(debug_assertions)`).
    #[cfg(debug_assertions)]
    fn assert_consistency(&self) {
        for (source, destination, _) in self.edges.iter() {
            assert!(
                self.contains(StateId(source)),
                "edge {}->{} has a dead source",
                source,
                destination
            );
            assert!(
                self.contains(StateId(destination)),
                "edge {}->{} has a dead destination",
                source,
                destination
            );
        }
        if let Some(start) = self.start {
            assert!(self.contains(start), "start state {:?} is not live", start);
        }
    }
}
