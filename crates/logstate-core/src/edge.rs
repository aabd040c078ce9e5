//! Edge payload stored in the adjacency index.
//!
//! An edge has no identity of its own: it is the `(source, destination)` key
//! in the [`SparseAdjacencyIndex`](crate::sparse::SparseAdjacencyIndex) plus
//! an [`EdgeProperties`] payload rendered as the decimal pass count.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Properties attached to a transition between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeProperties {
    /// Number of observed traversals. Always at least 1.
    pub passes: u64,
}

impl EdgeProperties {
    /// Creates edge properties with the given pass count (clamped to 1).
    pub fn new(passes: u64) -> Self {
        EdgeProperties {
            passes: passes.max(1),
        }
    }

    /// Decodes a payload written by [`Display`](fmt::Display).
    pub fn parse(payload: &str) -> Result<Self, CoreError> {
        payload.parse()
    }

    /// Combines two payloads of colliding edges by summing their passes.
    ///
    /// Falls back to `incoming` if either payload is not a pass count.
    pub fn merge_payloads(existing: &str, incoming: &str) -> String {
        match (Self::parse(existing), Self::parse(incoming)) {
            (Ok(a), Ok(b)) => EdgeProperties::new(a.passes.saturating_add(b.passes)).to_string(),
            _ => incoming.to_string(),
        }
    }
}

impl Default for EdgeProperties {
    fn default() -> Self {
        EdgeProperties { passes: 1 }
    }
}

impl fmt::Display for EdgeProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.passes)
    }
}

impl FromStr for EdgeProperties {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<u64>() {
            Ok(passes) if passes >= 1 => Ok(EdgeProperties { passes }),
            _ => Err(CoreError::MalformedEntry {
                entry: s.to_string(),
            }),
        }
    }
}
