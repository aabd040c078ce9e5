//! Deterministic structural fingerprints for graphs using blake3.
//!
//! A fingerprint covers what a checkpoint must reproduce: the start state,
//! every live state with its templates and terminal flag, and every edge with
//! its pass count. It is stored next to each saved model and recomputed on
//! load to detect tampering or partial writes.
//!
//! # Determinism
//!
//! - States are visited in ascending handle order
//! - Edges are sorted numerically before hashing
//! - Template lists are encoded with `serde_json::to_vec`
//!
//! Intern handles and retired slots do not contribute, so two graphs that
//! only differ in bookkeeping hash the same.

use logstate_core::{Graph, StateId};

/// Computes the structural fingerprint of `graph`.
pub fn fingerprint(graph: &Graph) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();

    match graph.start() {
        Some(start) => {
            hasher.update(&[1]);
            hasher.update(&start.0.to_le_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }

    for id in graph.state_ids() {
        hash_state(&mut hasher, graph, id);
    }

    for (source, target) in graph.adjacency_list(false) {
        let passes = graph.edge(source, target).map(|e| e.passes).unwrap_or(0);
        hasher.update(b"e");
        hasher.update(&source.0.to_le_bytes());
        hasher.update(&target.0.to_le_bytes());
        hasher.update(&passes.to_le_bytes());
    }

    hasher.finalize()
}

fn hash_state(hasher: &mut blake3::Hasher, graph: &Graph, id: StateId) {
    let templates = graph.templates(id).unwrap_or_default();
    let bytes =
        serde_json::to_vec(templates).expect("template list serialization should never fail");
    let terminal = graph.is_terminal(id).unwrap_or(false);

    hasher.update(b"s");
    hasher.update(&id.0.to_le_bytes());
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(&bytes);
    hasher.update(&[terminal as u8]);
}
