pub mod id;
pub mod error;
pub mod sparse;
pub mod edge;
pub mod state;
pub mod graph;
pub mod matching;
pub mod prefix_tree;
pub mod factory;
pub mod export;

// Re-export commonly used types
pub use id::{StateId, PropsId};
pub use error::CoreError;
pub use sparse::SparseAdjacencyIndex;
pub use edge::EdgeProperties;
pub use state::{PropertyTable, State, StateProperties};
pub use graph::{Graph, Slot, StateNode};
pub use matching::{
    seeded_rng, AllMatches, DEFAULT_SEED, ExactResolver, MatchMode, MatchOptions, MatchOutcome,
    RejectReason, Rejection, TemplateResolver, TemplateTable,
};
pub use prefix_tree::PrefixTreeGraph;
pub use factory::{apply_dendrogram, build_prefix_tree, tree_from_trace, IngestConfig};
pub use export::StateSummary;
