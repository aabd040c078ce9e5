//! Stable handle newtypes for graph entities.
//!
//! Both handles are distinct newtype wrappers over `u32`, so a `StateId`
//! cannot be passed where a `PropsId` is expected. A `StateId` is the dense
//! slot index of a state inside its [`Graph`](crate::graph::Graph); handles
//! are never reused, so a handle retired by a merge stays retired.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Stable state handle. Maps 1:1 to a petgraph `NodeIndex<u32>` on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(pub u32);

/// Handle of an interned template set inside a
/// [`PropertyTable`](crate::state::PropertyTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropsId(pub u32);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StateId {
    /// Position of this handle in the graph's slot vector.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<NodeIndex<u32>> for StateId {
    fn from(idx: NodeIndex<u32>) -> Self {
        StateId(idx.index() as u32)
    }
}

impl From<StateId> for NodeIndex<u32> {
    fn from(id: StateId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(42);
        let id = StateId::from(idx);
        assert_eq!(id.0, 42);

        let back: NodeIndex<u32> = id.into();
        assert_eq!(back.index(), 42);
    }

    #[test]
    fn display_prints_inner_value() {
        assert_eq!(format!("{}", StateId(7)), "7");
        assert_eq!(format!("{}", PropsId(99)), "99");
    }

    #[test]
    fn state_ids_order_numerically() {
        let mut ids = vec![StateId(12), StateId(2), StateId(1)];
        ids.sort();
        assert_eq!(ids, vec![StateId(1), StateId(2), StateId(12)]);
    }

    #[test]
    fn serde_roundtrip() {
        let id = StateId(42);
        let json = serde_json::to_string(&id).unwrap();
        let back: StateId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
