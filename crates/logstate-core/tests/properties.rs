//! Property tests for the graph engine.
//!
//! Covers:
//! - SparseAdjacencyIndex agreeing with a map model under arbitrary writes
//! - Prefix-collision safety for multi-digit indices
//! - merge_states invariants on random graphs
//! - Serialization round-trips preserving identity and structure
//! - Prefix-tree ingestion size and exact-trace acceptance

use std::collections::{BTreeMap, BTreeSet, HashSet};

use proptest::prelude::*;

use logstate_core::{
    build_prefix_tree, seeded_rng, EdgeProperties, ExactResolver, Graph, IngestConfig,
    MatchOptions, SparseAdjacencyIndex, State, StateId, DEFAULT_SEED,
};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn template() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["A", "B", "C", "D", "E"]).prop_map(String::from)
}

/// States as (templates, terminal) plus raw edge endpoints.
fn graph_parts() -> impl Strategy<Value = (Vec<(Vec<String>, bool)>, Vec<(usize, usize)>)> {
    (
        prop::collection::vec((prop::collection::vec(template(), 1..3), any::<bool>()), 2..12),
        prop::collection::vec((0usize..12, 0usize..12), 0..40),
    )
}

fn build_graph(states: &[(Vec<String>, bool)], edges: &[(usize, usize)]) -> (Graph, Vec<StateId>) {
    let mut graph = Graph::new();
    let ids: Vec<StateId> = states
        .iter()
        .map(|(templates, terminal)| {
            graph
                .add_state(State::new(templates.clone()).with_terminal(*terminal))
                .unwrap()
        })
        .collect();
    graph.set_start(ids[0]).unwrap();
    for &(s, e) in edges {
        graph.add_edge(ids[s % ids.len()], ids[e % ids.len()], EdgeProperties::default());
    }
    (graph, ids)
}

proptest! {
    // -----------------------------------------------------------------------
    // Adjacency index
    // -----------------------------------------------------------------------

    #[test]
    fn index_matches_map_model(
        writes in prop::collection::vec((0u32..130, 0u32..130, 1u64..1000), 0..80)
    ) {
        let mut index = SparseAdjacencyIndex::new();
        let mut model: BTreeMap<(u32, u32), String> = BTreeMap::new();
        for (src, dst, value) in &writes {
            index.set(*src, *dst, &value.to_string());
            model.insert((*src, *dst), value.to_string());
        }

        prop_assert_eq!(index.len(), model.len());
        let sources: BTreeSet<u32> = writes.iter().map(|(s, _, _)| *s).collect();
        for src in sources {
            let expected: Vec<(u32, String)> = model
                .range((src, 0)..=(src, u32::MAX))
                .map(|((_, dst), payload)| (*dst, payload.clone()))
                .collect();
            let actual: Vec<(u32, String)> = index
                .children_of(src)
                .into_iter()
                .map(|(dst, payload)| (dst, payload.to_string()))
                .collect();
            prop_assert_eq!(actual, expected);
        }
        for src in 0..130 {
            for dst in [0, 1, 12, 99, 129] {
                prop_assert_eq!(index.contains(src, dst), index.get(src, dst).is_ok());
            }
        }
    }

    #[test]
    fn parents_match_map_model(
        writes in prop::collection::vec((0u32..40, 0u32..40), 0..60)
    ) {
        let mut index = SparseAdjacencyIndex::new();
        for (src, dst) in &writes {
            index.set(*src, *dst, "1");
        }
        for dst in 0..40 {
            let expected: BTreeSet<u32> = writes
                .iter()
                .filter(|(_, d)| *d == dst)
                .map(|(s, _)| *s)
                .collect();
            let actual: Vec<u32> = index.parents_of(dst);
            prop_assert_eq!(actual, expected.into_iter().collect::<Vec<_>>());
        }
    }

    #[test]
    fn children_never_leak_across_digit_prefixes(
        digits in prop::collection::vec(
            prop::sample::select(vec![1u32, 11, 12, 111, 112, 121]),
            1..20
        ),
        dst in 0u32..50
    ) {
        let mut index = SparseAdjacencyIndex::new();
        for src in &digits {
            index.set(*src, dst, "1");
        }
        for src in [1u32, 11, 12, 111, 112, 121] {
            let children = index.children_of(src);
            if digits.contains(&src) {
                prop_assert_eq!(children.len(), 1);
            } else {
                prop_assert!(children.is_empty());
            }
        }
    }

    // -----------------------------------------------------------------------
    // merge_states
    // -----------------------------------------------------------------------

    #[test]
    fn merge_states_invariants(
        (states, edges) in graph_parts(),
        keep_pick in any::<prop::sample::Index>(),
        absorb_pick in any::<prop::sample::Index>(),
    ) {
        let (mut graph, ids) = build_graph(&states, &edges);
        let keep = ids[keep_pick.index(ids.len())];
        let absorb = ids[absorb_pick.index(ids.len())];
        prop_assume!(keep != absorb);

        let size_before = graph.size();
        let keep_templates = graph.templates(keep).unwrap().to_vec();
        let absorb_templates = graph.templates(absorb).unwrap().to_vec();
        let either_terminal =
            graph.is_terminal(keep).unwrap() || graph.is_terminal(absorb).unwrap();
        let old_edges = graph.adjacency_list(false);

        graph.merge_states(keep, absorb).unwrap();

        // (1) absorb is gone
        prop_assert!(!graph.contains(absorb));
        prop_assert!(graph.node(absorb).is_err());
        // (2) every edge incident to absorb now references keep
        let redirect = |id: StateId| if id == absorb { keep } else { id };
        let expected: BTreeSet<(StateId, StateId)> =
            old_edges.iter().map(|&(s, e)| (redirect(s), redirect(e))).collect();
        let actual: BTreeSet<(StateId, StateId)> =
            graph.adjacency_list(false).into_iter().collect();
        prop_assert_eq!(actual, expected);
        // (3) templates are a superset of the union
        let merged: HashSet<&String> = graph.templates(keep).unwrap().iter().collect();
        for t in keep_templates.iter().chain(absorb_templates.iter()) {
            prop_assert!(merged.contains(t));
        }
        prop_assert_eq!(
            &graph.templates(keep).unwrap()[..keep_templates.len()],
            &keep_templates[..]
        );
        // (4) terminal flag is the union
        prop_assert_eq!(graph.is_terminal(keep).unwrap(), either_terminal);
        // (5) size shrinks by one
        prop_assert_eq!(graph.size(), size_before - 1);
        graph.validate().unwrap();
    }

    #[test]
    fn merge_states_preserves_total_passes(
        (states, edges) in graph_parts(),
    ) {
        let (mut graph, ids) = build_graph(&states, &edges);
        let total = |g: &Graph| -> u64 {
            g.adjacency_list(false)
                .into_iter()
                .map(|(s, e)| g.edge(s, e).unwrap().passes)
                .sum()
        };
        let before = total(&graph);
        graph.merge_states(ids[0], ids[1]).unwrap();
        prop_assert_eq!(total(&graph), before);
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    #[test]
    fn serde_roundtrip_preserves_structure(
        (states, edges) in graph_parts(),
        merges in prop::collection::vec((0usize..12, 0usize..12), 0..4),
    ) {
        let (mut graph, ids) = build_graph(&states, &edges);
        for (a, b) in merges {
            let (a, b) = (ids[a % ids.len()], ids[b % ids.len()]);
            if a != b && graph.contains(a) && graph.contains(b) {
                graph.merge_states(a, b).unwrap();
            }
        }

        let json = serde_json::to_string(&graph).unwrap();
        let back: Graph = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();

        prop_assert_eq!(back.size(), graph.size());
        prop_assert_eq!(back.start(), graph.start());
        prop_assert_eq!(back.properties().len(), graph.properties().len());
        prop_assert_eq!(back.adjacency_list(false), graph.adjacency_list(false));
        for id in graph.state_ids() {
            prop_assert!(back.state(id).unwrap().is_equivalent(&graph.state(id).unwrap()));
            prop_assert_eq!(back.is_terminal(id).unwrap(), graph.is_terminal(id).unwrap());
        }
    }

    // -----------------------------------------------------------------------
    // Prefix tree ingestion
    // -----------------------------------------------------------------------

    #[test]
    fn distinct_trace_yields_n_plus_one_states(n in 1usize..40) {
        let trace: Vec<String> = (0..n).map(|i| format!("T{i}")).collect();
        let tree = build_prefix_tree([&trace], &ExactResolver, &IngestConfig::default()).unwrap();
        prop_assert_eq!(tree.size(), n + 1);
    }

    #[test]
    fn ingested_traces_are_accepted(
        traces in prop::collection::vec(prop::collection::vec(template(), 1..8), 1..6)
    ) {
        let config = IngestConfig { end_state: true, ..IngestConfig::default() };
        let tree = build_prefix_tree(&traces, &ExactResolver, &config).unwrap();
        let graph = tree.graph();
        let mut rng = seeded_rng(DEFAULT_SEED);

        for trace in &traces {
            let outcome =
                graph.match_trace(trace, &ExactResolver, &mut rng, &MatchOptions::first());
            prop_assert!(outcome.is_match(), "trace {:?} rejected: {:?}", trace, outcome);
            let path = outcome.path().unwrap();
            prop_assert_eq!(path.len(), trace.len());

            // No ambiguity in a prefix tree: random mode agrees with first.
            let random =
                graph.match_trace(trace, &ExactResolver, &mut rng, &MatchOptions::default());
            prop_assert_eq!(random.path(), Some(path));

            let all = graph.match_trace_all(trace, &ExactResolver, None);
            prop_assert_eq!(all.paths.len(), 1);
        }
    }
}
