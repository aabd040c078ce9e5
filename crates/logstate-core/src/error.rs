//! Core error types for logstate-core.
//!
//! Uses `thiserror` for structured, matchable variants covering the
//! structural failure modes of the graph engine. Trace rejection is not an
//! error: it is reported through [`MatchOutcome`](crate::matching::MatchOutcome).

use crate::id::StateId;
use thiserror::Error;

/// Core errors produced by the logstate-core crate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A state handle is already occupied.
    #[error("state already exists: StateId({id})", id = id.0)]
    StateAlreadyExists { id: StateId },

    /// A state handle was never allocated by this graph.
    #[error("state not found: StateId({id})", id = id.0)]
    StateNotFound { id: StateId },

    /// A state handle was retired by a merge and must not be used again.
    #[error(
        "state retired: StateId({id}) was merged into StateId({into})",
        id = id.0,
        into = into.0
    )]
    StateRetired { id: StateId, into: StateId },

    /// No edge exists between the two states.
    #[error("edge not found: StateId({start}) -> StateId({end})", start = start.0, end = end.0)]
    EdgeNotFound { start: StateId, end: StateId },

    /// A (source, destination) key is absent from the adjacency index.
    #[error("index key not found: ({src}, {dst})")]
    IndexKeyNotFound { src: u32, dst: u32 },

    /// A state could not be constructed (e.g. empty template list).
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// A merge request was rejected before any mutation happened.
    #[error("invalid merge: {reason}")]
    InvalidMerge { reason: String },

    /// Two prefix trees cannot be combined.
    #[error("invalid tree: {reason}")]
    InvalidTree { reason: String },

    /// A merge order references a cluster that does not exist yet.
    #[error("invalid dendrogram: {reason}")]
    InvalidDendrogram { reason: String },

    /// A trace line has no template during ingestion.
    #[error("unresolvable line {line} in trace {trace}")]
    UnresolvableLine { trace: usize, line: usize },

    /// A stored entry could not be decoded.
    #[error("malformed entry: '{entry}'")]
    MalformedEntry { entry: String },

    /// A structural invariant was violated by reconstructed data.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },
}
