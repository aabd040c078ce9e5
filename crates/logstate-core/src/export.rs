//! Read-only exports of a graph for external tooling.
//!
//! [`Graph::adjacency_list`] is the edge list handed to clustering;
//! [`Graph::to_petgraph`] produces a `StableGraph` whose node indices equal
//! the graph's state handles, for analysis and visualisation outside the
//! engine.

use petgraph::stable_graph::{NodeIndex, StableGraph};
use serde::{Deserialize, Serialize};

use crate::edge::EdgeProperties;
use crate::graph::{Graph, Slot};
use crate::id::StateId;

/// Node weight of an exported graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    pub templates: Vec<String>,
    pub is_terminal: bool,
}

impl Graph {
    /// All edges as `(source, destination)` pairs in ascending order.
    pub fn adjacency_list(&self, remove_self_loops: bool) -> Vec<(StateId, StateId)> {
        let mut pairs: Vec<(StateId, StateId)> = self
            .edges()
            .iter()
            .filter(|(source, destination, _)| !remove_self_loops || source != destination)
            .map(|(source, destination, _)| (StateId(source), StateId(destination)))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Exports the graph to petgraph.
    ///
    /// Retired slots are added as placeholders and removed once the edges are
    /// in, so `NodeIndex::new(id.index())` addresses state `id`. Payloads
    /// that fail to decode export as a single pass.
    pub fn to_petgraph(&self) -> StableGraph<StateSummary, EdgeProperties> {
        let mut graph = StableGraph::with_capacity(self.slot_count(), self.edge_count());
        let mut retired = Vec::new();

        for (id, slot) in self.slots() {
            let summary = match slot {
                Slot::Live(_) => StateSummary {
                    templates: self
                        .templates(id)
                        .map(|t| t.to_vec())
                        .unwrap_or_default(),
                    is_terminal: self.is_terminal(id).unwrap_or(false),
                },
                Slot::Retired { .. } => {
                    retired.push(id);
                    StateSummary::default()
                }
            };
            graph.add_node(summary);
        }

        for (source, destination, payload) in self.edges().iter() {
            graph.add_edge(
                NodeIndex::new(source as usize),
                NodeIndex::new(destination as usize),
                EdgeProperties::parse(payload).unwrap_or_default(),
            );
        }

        for id in retired {
            graph.remove_node(NodeIndex::from(id));
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use petgraph::visit::EdgeRef;

    use super::*;
    use crate::state::State;

    fn sample() -> (Graph, [StateId; 3]) {
        let (mut g, root) = Graph::with_start(State::root()).unwrap();
        let a = g.add_state(State::new(["A"])).unwrap();
        let b = g.add_state(State::terminal(["B"])).unwrap();
        g.add_edge(root, a, EdgeProperties::new(4));
        g.add_edge(a, a, EdgeProperties::default());
        g.add_edge(a, b, EdgeProperties::default());
        (g, [root, a, b])
    }

    #[test]
    fn adjacency_list_optionally_drops_self_loops() {
        let (g, [root, a, b]) = sample();
        assert_eq!(g.adjacency_list(false), vec![(root, a), (a, a), (a, b)]);
        assert_eq!(g.adjacency_list(true), vec![(root, a), (a, b)]);
    }

    #[test]
    fn petgraph_indices_match_handles_after_merge() {
        let (mut g, [root, a, b]) = sample();
        let c = g.add_state(State::new(["C"])).unwrap();
        g.add_edge(b, c, EdgeProperties::default());
        g.merge_states(a, b).unwrap();

        let pg = g.to_petgraph();
        assert_eq!(pg.node_count(), 3);
        assert!(pg.node_weight(NodeIndex::from(b)).is_none());
        assert_eq!(pg[NodeIndex::from(c)].templates, vec!["C".to_string()]);
        assert!(pg[NodeIndex::from(a)].is_terminal);

        let root_edges: Vec<_> = pg.edges(NodeIndex::from(root)).collect();
        assert_eq!(root_edges.len(), 1);
        assert_eq!(root_edges[0].weight().passes, 4);
        assert_eq!(root_edges[0].target(), NodeIndex::from(a));
    }
}
