//! Model factory: from raw traces to a prefix tree, and from a prefix tree to
//! a generalized model.
//!
//! Ingestion resolves every line of every trace to a template id, builds one
//! tree per trace and folds them together with [`PrefixTreeGraph::merge`].
//! Generalization replays an externally computed merge order (a dendrogram)
//! through [`Graph::merge_states`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::graph::Graph;
use crate::id::StateId;
use crate::matching::TemplateResolver;
use crate::prefix_tree::PrefixTreeGraph;

/// Options controlling how traces become a prefix tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Terminate every trace with a terminal `<end>` state instead of
    /// flagging its last state terminal. Required for ingested traces to be
    /// accepted by trace matching.
    pub end_state: bool,
    /// Collapse repeated consecutive templates into self-loops once all
    /// traces are merged.
    pub collapse_trivial_loops: bool,
}

/// Builds a single-trace prefix tree. `index` only labels errors.
pub fn tree_from_trace<L, R>(
    index: usize,
    trace: &[L],
    resolver: &R,
    config: &IngestConfig,
) -> Result<PrefixTreeGraph, CoreError>
where
    L: AsRef<str>,
    R: TemplateResolver + ?Sized,
{
    let mut templates = Vec::with_capacity(trace.len());
    for (line, raw) in trace.iter().enumerate() {
        let template = resolver
            .resolve(raw.as_ref())
            .ok_or(CoreError::UnresolvableLine { trace: index, line })?;
        templates.push(template);
    }
    let mut tree = PrefixTreeGraph::with_empty_root();
    tree.insert_trace(&templates, config)?;
    Ok(tree)
}

/// Builds a prefix tree over all `traces`.
///
/// Each trace is turned into its own tree first, then merged into the
/// result, so the outcome does not depend on how the traces were batched.
pub fn build_prefix_tree<I, T, L, R>(
    traces: I,
    resolver: &R,
    config: &IngestConfig,
) -> Result<PrefixTreeGraph, CoreError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[L]>,
    L: AsRef<str>,
    R: TemplateResolver + ?Sized,
{
    let mut tree = PrefixTreeGraph::with_empty_root();
    let mut count = 0;
    for (index, trace) in traces.into_iter().enumerate() {
        let single = tree_from_trace(index, trace.as_ref(), resolver, config)?;
        tree.merge(&single)?;
        count += 1;
    }
    if config.collapse_trivial_loops {
        tree.remove_trivial_loops()?;
    }
    info!(traces = count, states = tree.size(), "built prefix tree");
    Ok(tree)
}

/// Applies a merge order to `graph`. Returns the number of merges.
///
/// Each pair is `(keep, absorb)`. A reference below the slot count `n` is a
/// state handle, as emitted by [`Graph::adjacency_list`], and must name a live
/// state; reference `n + k` is the cluster produced by the `k`-th pair. Every
/// cluster may be consumed once. The whole order is validated before the
/// first merge.
pub fn apply_dendrogram(graph: &mut Graph, pairs: &[(usize, usize)]) -> Result<usize, CoreError> {
    let n = graph.slot_count();

    let mut consumed: HashSet<usize> = HashSet::with_capacity(pairs.len() * 2);
    for (k, &(keep, absorb)) in pairs.iter().enumerate() {
        if keep == absorb {
            return Err(CoreError::InvalidDendrogram {
                reason: format!("pair {k} merges cluster {keep} with itself"),
            });
        }
        for reference in [keep, absorb] {
            if reference >= n + k {
                return Err(CoreError::InvalidDendrogram {
                    reason: format!(
                        "pair {k} references cluster {reference}, only {} exist",
                        n + k
                    ),
                });
            }
            if reference < n && !graph.contains(leaf(reference)) {
                return Err(CoreError::InvalidDendrogram {
                    reason: format!("pair {k} references state {reference}, which is not live"),
                });
            }
            if !consumed.insert(reference) {
                return Err(CoreError::InvalidDendrogram {
                    reason: format!("pair {k} reuses cluster {reference}"),
                });
            }
        }
    }

    let mut clusters: HashMap<usize, StateId> = HashMap::with_capacity(pairs.len());
    let resolve = |clusters: &HashMap<usize, StateId>, reference: usize| {
        if reference < n {
            leaf(reference)
        } else {
            clusters[&reference]
        }
    };
    for (k, &(keep, absorb)) in pairs.iter().enumerate() {
        let keep_id = resolve(&clusters, keep);
        let absorb_id = resolve(&clusters, absorb);
        graph.merge_states(keep_id, absorb_id)?;
        clusters.insert(n + k, keep_id);
    }

    debug!(merges = pairs.len(), states = graph.size(), "applied dendrogram");
    Ok(pairs.len())
}

/// Leaf reference to state handle. Callers bound `reference` by the slot
/// count, which fits a `u32` handle.
fn leaf(reference: usize) -> StateId {
    StateId(reference as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{ExactResolver, TemplateTable};
    use crate::state::State;

    #[test]
    fn unresolvable_line_names_trace_and_line() {
        let table: TemplateTable = [("ok", "T")].into_iter().collect();
        let traces = vec![vec!["ok"], vec!["ok", "bad"]];
        let result = build_prefix_tree(&traces, &table, &IngestConfig::default());
        assert_eq!(
            result.err(),
            Some(CoreError::UnresolvableLine { trace: 1, line: 1 })
        );
    }

    #[test]
    fn build_merges_all_traces() {
        let traces = vec![vec!["A", "B"], vec!["A", "C"], vec!["A", "B"]];
        let tree = build_prefix_tree(&traces, &ExactResolver, &IngestConfig::default()).unwrap();
        // root, A, B, C
        assert_eq!(tree.size(), 4);
        let a = tree.get_children(tree.get_root()).unwrap()[0];
        assert_eq!(tree.graph().edge(tree.get_root(), a).unwrap().passes, 3);
    }

    #[test]
    fn build_with_loop_collapsing() {
        let traces = vec![vec!["A", "A", "A", "B"]];
        let config = IngestConfig {
            collapse_trivial_loops: true,
            ..IngestConfig::default()
        };
        let tree = build_prefix_tree(&traces, &ExactResolver, &config).unwrap();
        assert_eq!(tree.size(), 3);
    }

    #[test]
    fn dendrogram_refers_to_earlier_clusters() {
        let mut graph = Graph::new();
        for t in ["A", "B", "C", "D"] {
            graph.add_state(State::new([t])).unwrap();
        }
        // 4 = {0,1}, 5 = {2,3}, 6 = {4,5}
        let merges = apply_dendrogram(&mut graph, &[(0, 1), (2, 3), (4, 5)]).unwrap();
        assert_eq!(merges, 3);
        assert_eq!(graph.size(), 1);
        assert_eq!(graph.templates(StateId(0)).unwrap(), ["A", "B", "C", "D"]);
    }

    #[test]
    fn dendrogram_is_validated_before_merging() {
        let mut graph = Graph::new();
        for t in ["A", "B", "C"] {
            graph.add_state(State::new([t])).unwrap();
        }
        let result = apply_dendrogram(&mut graph, &[(0, 1), (3, 7)]);
        assert!(matches!(result, Err(CoreError::InvalidDendrogram { .. })));
        assert_eq!(graph.size(), 3);

        let result = apply_dendrogram(&mut graph, &[(0, 1), (1, 2)]);
        assert!(matches!(result, Err(CoreError::InvalidDendrogram { .. })));
        assert_eq!(graph.size(), 3);
    }

    #[test]
    fn dendrogram_leaves_are_handles_after_loop_collapse() {
        let traces = vec![vec!["A", "A", "B", "C"]];
        let config = IngestConfig {
            collapse_trivial_loops: true,
            ..IngestConfig::default()
        };
        let mut graph = build_prefix_tree(&traces, &ExactResolver, &config)
            .unwrap()
            .into_graph();
        // root(0) A(1) [A(2) retired into 1] B(3) C(4)
        let edges = graph.adjacency_list(true);
        assert_eq!(
            edges,
            vec![
                (StateId(0), StateId(1)),
                (StateId(1), StateId(3)),
                (StateId(3), StateId(4)),
            ]
        );

        let (b, c) = edges[2];
        apply_dendrogram(&mut graph, &[(b.index(), c.index())]).unwrap();
        assert_eq!(graph.templates(b).unwrap(), ["B", "C"]);
        assert_eq!(graph.templates(StateId(1)).unwrap(), ["A"]);
        assert!(!graph.contains(c));
    }

    #[test]
    fn dendrogram_rejects_retired_leaf() {
        let traces = vec![vec!["A", "A", "B"]];
        let config = IngestConfig {
            collapse_trivial_loops: true,
            ..IngestConfig::default()
        };
        let mut graph = build_prefix_tree(&traces, &ExactResolver, &config)
            .unwrap()
            .into_graph();
        assert!(!graph.contains(StateId(2)));

        let result = apply_dendrogram(&mut graph, &[(1, 3), (2, 4)]);
        assert!(matches!(result, Err(CoreError::InvalidDendrogram { .. })));
        assert_eq!(graph.size(), 3);
    }

    #[test]
    fn dendrogram_cluster_numbering_starts_at_slot_count() {
        let mut graph = Graph::new();
        for t in ["A", "B", "C", "D"] {
            graph.add_state(State::new([t])).unwrap();
        }
        graph.merge_states(StateId(0), StateId(1)).unwrap();
        // Slots 0..4, so the first pair's cluster is 4.
        apply_dendrogram(&mut graph, &[(2, 3), (0, 4)]).unwrap();
        assert_eq!(graph.size(), 1);
        assert_eq!(graph.templates(StateId(0)).unwrap(), ["A", "B", "C", "D"]);
    }
}
