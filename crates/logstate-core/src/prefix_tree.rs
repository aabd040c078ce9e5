//! PrefixTreeGraph: a trie over traces, the starting point of generalization.
//!
//! The tree wraps a [`Graph`] whose start state is a synthetic root
//! (`[""]` by default). Each trace extends the tree from the root, reusing
//! existing children whose templates match and branching where they don't.
//! Trees built independently are combined with [`PrefixTreeGraph::merge`].

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::edge::EdgeProperties;
use crate::error::CoreError;
use crate::factory::IngestConfig;
use crate::graph::Graph;
use crate::id::StateId;
use crate::state::State;

/// A graph with a distinguished root, grown one trace at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixTreeGraph {
    graph: Graph,
    root: StateId,
}

impl PrefixTreeGraph {
    /// Creates a tree holding only `root`.
    pub fn new(root: State) -> Result<Self, CoreError> {
        let (graph, root) = Graph::with_start(root)?;
        Ok(PrefixTreeGraph { graph, root })
    }

    /// Creates a tree with the synthetic `[""]` root.
    pub fn with_empty_root() -> Self {
        PrefixTreeGraph::new(State::root()).expect("the synthetic root has one template")
    }

    /// Wraps an existing graph, using its start state as root.
    pub fn from_graph(graph: Graph) -> Result<Self, CoreError> {
        let root = graph.start().ok_or_else(|| CoreError::InvalidTree {
            reason: "graph has no start state".into(),
        })?;
        Ok(PrefixTreeGraph { graph, root })
    }

    pub fn get_root(&self) -> StateId {
        self.root
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn size(&self) -> usize {
        self.graph.size()
    }

    /// Inserts `child` below `parent` with a single-pass edge.
    pub fn add_child(&mut self, child: State, parent: StateId) -> Result<StateId, CoreError> {
        self.graph.node(parent)?;
        let id = self.graph.add_state(child)?;
        self.graph.add_edge(parent, id, EdgeProperties::default());
        Ok(id)
    }

    /// Children of a state, excluding a self-loop.
    pub fn get_children(&self, id: StateId) -> Result<Vec<StateId>, CoreError> {
        self.graph.get_outgoing_states_not_self(id)
    }

    /// Parent of a state; `None` for the root.
    pub fn get_parent(&self, id: StateId) -> Result<Option<StateId>, CoreError> {
        Ok(self
            .graph
            .get_incoming_states(id)?
            .into_iter()
            .find(|&parent| parent != id))
    }

    /// Non-self child of `parent` whose template list equals `templates`.
    fn find_child(
        &self,
        parent: StateId,
        templates: &[String],
    ) -> Result<Option<StateId>, CoreError> {
        for child in self.graph.get_outgoing_states_not_self(parent)? {
            if self.graph.templates(child)? == templates {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Follows the child matching `state`, adding it if absent. An existing
    /// edge gains a pass.
    fn step(&mut self, parent: StateId, state: State) -> Result<StateId, CoreError> {
        match self.find_child(parent, state.templates())? {
            Some(child) => {
                self.graph.update_edge(parent, child, 1);
                if state.is_terminal() {
                    self.graph.set_terminal(child, true)?;
                }
                Ok(child)
            }
            None => self.add_child(state, parent),
        }
    }

    /// Extends the tree with one trace of template ids.
    ///
    /// The last state of the trace becomes terminal, or, with
    /// `config.end_state`, gains a terminal `<end>` child so the trace is
    /// accepted by trace matching. Returns the last state visited. An empty
    /// trace leaves the tree untouched.
    pub fn insert_trace<S: AsRef<str>>(
        &mut self,
        templates: &[S],
        config: &IngestConfig,
    ) -> Result<StateId, CoreError> {
        if templates.is_empty() {
            debug!("skipping empty trace");
            return Ok(self.root);
        }
        let mut current = self.root;
        for template in templates {
            current = self.step(current, State::new([template.as_ref()]))?;
        }
        if config.end_state {
            current = self.step(current, State::end())?;
        } else {
            self.graph.set_terminal(current, true)?;
        }
        Ok(current)
    }

    /// Merges `other` into this tree.
    ///
    /// Both trees are walked together from their roots. A child of `other`
    /// with the same template list as a child of the corresponding node here
    /// is followed (its edge passes and terminal flag carry over); any other
    /// child is copied in with its whole subtree. Returns where every state
    /// of `other` ended up.
    ///
    /// Fails with [`CoreError::InvalidTree`] before touching either tree if
    /// the roots carry different templates.
    pub fn merge(
        &mut self,
        other: &PrefixTreeGraph,
    ) -> Result<HashMap<StateId, StateId>, CoreError> {
        let mine = self.graph.templates(self.root)?;
        let theirs = other.graph.templates(other.root)?;
        if mine != theirs {
            return Err(CoreError::InvalidTree {
                reason: format!("root templates differ: {mine:?} vs {theirs:?}"),
            });
        }

        let before = self.size();
        let mut mapping = HashMap::from([(other.root, self.root)]);
        let mut visited = HashSet::new();
        let mut stack = vec![(self.root, other.root)];

        while let Some((mine, theirs)) = stack.pop() {
            if !visited.insert(theirs) {
                continue;
            }
            if other.graph.is_terminal(theirs)? {
                self.graph.set_terminal(mine, true)?;
            }
            for (child, props) in other.graph.get_outgoing_props(theirs)? {
                if child == theirs {
                    if !self.graph.add_edge(mine, mine, props) {
                        self.graph.update_edge(mine, mine, props.passes);
                    }
                    continue;
                }
                match self.find_child(mine, other.graph.templates(child)?)? {
                    Some(existing) => {
                        self.graph.update_edge(mine, existing, props.passes);
                        mapping.insert(child, existing);
                        stack.push((existing, child));
                    }
                    None => {
                        let copied = self.splice(&other.graph, child, &mut mapping)?;
                        self.graph.add_edge(mine, copied, props);
                    }
                }
            }
        }

        debug!(before, after = self.size(), "merged prefix trees");
        Ok(mapping)
    }

    /// Copies the subgraph reachable from `from` in `source` into this tree
    /// and returns the copy of `from`.
    fn splice(
        &mut self,
        source: &Graph,
        from: StateId,
        mapping: &mut HashMap<StateId, StateId>,
    ) -> Result<StateId, CoreError> {
        let head = self.graph.add_state(source.state(from)?)?;
        mapping.insert(from, head);

        let mut stack = vec![from];
        while let Some(original) = stack.pop() {
            let copy = mapping[&original];
            for (child, props) in source.get_outgoing_props(original)? {
                let child_copy = match mapping.get(&child) {
                    Some(&known) => known,
                    None => {
                        let added = self.graph.add_state(source.state(child)?)?;
                        mapping.insert(child, added);
                        stack.push(child);
                        added
                    }
                };
                self.graph.add_edge(copy, child_copy, props);
            }
        }
        Ok(head)
    }

    /// Merges every state with any direct child carrying the same templates,
    /// turning runs of a repeated template into a self-loop. Returns the
    /// number of merges.
    pub fn remove_trivial_loops(&mut self) -> Result<usize, CoreError> {
        let mut merges = 0;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.root]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            while let Some(twin) = self.equivalent_child(id)? {
                self.graph.merge_states(id, twin)?;
                merges += 1;
            }
            queue.extend(self.get_children(id)?);
        }

        if merges > 0 {
            info!(merges, states = self.size(), "collapsed trivial loops");
        }
        Ok(merges)
    }

    fn equivalent_child(&self, id: StateId) -> Result<Option<StateId>, CoreError> {
        for child in self.get_children(id)? {
            if self.graph.is_equivalent(id, child)? {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }
}

impl Default for PrefixTreeGraph {
    fn default() -> Self {
        Self::with_empty_root()
    }
}

impl From<PrefixTreeGraph> for Graph {
    fn from(tree: PrefixTreeGraph) -> Self {
        tree.graph
    }
}
