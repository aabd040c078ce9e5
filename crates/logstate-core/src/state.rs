//! States and their interned template sets.
//!
//! A [`State`] is the value a caller hands to a graph: an ordered,
//! duplicate-free list of template ids plus a terminal flag. Once inserted,
//! the graph keeps only a [`PropsId`] pointing into its [`PropertyTable`],
//! so structurally identical states share one [`StateProperties`] entry and
//! equivalence is a handle comparison.
//!
//! Interning is keyed by a blake3 hash of the canonical JSON encoding of the
//! ordered template list.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::id::PropsId;

/// Template list storage. Most states represent a single template.
pub type Templates = SmallVec<[String; 1]>;

/// Template id carried by the synthetic root of a prefix tree.
pub const ROOT_TEMPLATE: &str = "";

/// Template id carried by the terminal end-of-trace state.
pub const END_TEMPLATE: &str = "<end>";

fn dedup_in_order<I, S>(templates: I) -> Templates
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out = Templates::new();
    for template in templates {
        let template = template.into();
        if !out.contains(&template) {
            out.push(template);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A state to be inserted into a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    templates: Templates,
    is_terminal: bool,
}

impl State {
    /// Creates a non-terminal state. Duplicate templates collapse, keeping
    /// first-occurrence order.
    pub fn new<I, S>(templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        State {
            templates: dedup_in_order(templates),
            is_terminal: false,
        }
    }

    /// Creates a terminal state.
    pub fn terminal<I, S>(templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        State::new(templates).with_terminal(true)
    }

    /// The synthetic prefix-tree root (`[""]`).
    pub fn root() -> Self {
        State::new([ROOT_TEMPLATE])
    }

    /// The terminal end-of-trace marker.
    pub fn end() -> Self {
        State::terminal([END_TEMPLATE])
    }

    /// Sets the terminal flag.
    #[must_use]
    pub fn with_terminal(mut self, is_terminal: bool) -> Self {
        self.is_terminal = is_terminal;
        self
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    /// Two states are equivalent iff their template lists match exactly.
    pub fn is_equivalent(&self, other: &State) -> bool {
        self.templates == other.templates
    }

    /// Two states are weakly equivalent iff they share any template.
    pub fn is_equivalent_weak(&self, other: &State) -> bool {
        self.templates.iter().any(|t| other.templates.contains(t))
    }

    pub(crate) fn into_parts(self) -> (Templates, bool) {
        (self.templates, self.is_terminal)
    }
}

// ---------------------------------------------------------------------------
// StateProperties
// ---------------------------------------------------------------------------

/// Canonical, shareable template set of one or more states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateProperties {
    templates: Templates,
}

impl StateProperties {
    pub fn new(templates: Templates) -> Self {
        StateProperties { templates }
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn contains(&self, template: &str) -> bool {
        self.templates.iter().any(|t| t == template)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Content hash used as the interning key.
    ///
    /// Deterministic: the same ordered template list always produces the
    /// same hash.
    pub fn content_hash(&self) -> blake3::Hash {
        let bytes = serde_json::to_vec(self.templates.as_slice())
            .expect("a list of strings always serializes");
        blake3::hash(&bytes)
    }

    /// Template list of `self` followed by the templates of `other` not
    /// already present.
    pub fn union(&self, other: &StateProperties) -> Templates {
        dedup_in_order(self.templates.iter().chain(other.templates.iter()).cloned())
    }
}

// ---------------------------------------------------------------------------
// PropertyTable
// ---------------------------------------------------------------------------

/// Graph-owned intern table of template sets.
///
/// Entries are never removed; an entry orphaned by a merge stays addressable
/// so that `PropsId`s remain stable across checkpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<StateProperties>", into = "Vec<StateProperties>")]
pub struct PropertyTable {
    /// Entries indexed by PropsId.0
    entries: Vec<StateProperties>,
    /// Content hash -> handle
    by_hash: HashMap<blake3::Hash, PropsId>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `templates`, registering it if unseen.
    pub fn intern(&mut self, templates: Templates) -> PropsId {
        let props = StateProperties::new(templates);
        let hash = props.content_hash();
        if let Some(&id) = self.by_hash.get(&hash) {
            debug_assert_eq!(self.entries[id.0 as usize], props, "blake3 collision");
            return id;
        }
        let id = PropsId(self.entries.len() as u32);
        self.entries.push(props);
        self.by_hash.insert(hash, id);
        id
    }

    /// Looks up an interned entry.
    pub fn get(&self, id: PropsId) -> Option<&StateProperties> {
        self.entries.get(id.0 as usize)
    }

    /// Finds the handle of an already-interned template list.
    pub fn lookup(&self, templates: &[String]) -> Option<PropsId> {
        let props = StateProperties::new(templates.iter().cloned().collect());
        self.by_hash.get(&props.content_hash()).copied()
    }

    /// Number of interned entries (including orphaned ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(PropsId, entry)` pairs in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (PropsId, &StateProperties)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, props)| (PropsId(i as u32), props))
    }
}

impl TryFrom<Vec<StateProperties>> for PropertyTable {
    type Error = CoreError;

    /// Rebuilds the hash index. Rejects duplicate entries, which would break
    /// equivalence-by-handle.
    fn try_from(entries: Vec<StateProperties>) -> Result<Self, Self::Error> {
        let mut by_hash = HashMap::with_capacity(entries.len());
        for (i, props) in entries.iter().enumerate() {
            if props.is_empty() {
                return Err(CoreError::GraphInconsistency {
                    reason: format!("interned entry {i} has no templates"),
                });
            }
            if by_hash.insert(props.content_hash(), PropsId(i as u32)).is_some() {
                return Err(CoreError::GraphInconsistency {
                    reason: format!("duplicate interned entry {:?}", props.templates()),
                });
            }
        }
        Ok(PropertyTable { entries, by_hash })
    }
}

impl From<PropertyTable> for Vec<StateProperties> {
    fn from(table: PropertyTable) -> Self {
        table.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_dedups_in_order() {
        let state = State::new(["b", "a", "b", "c"]);
        assert_eq!(state.templates(), ["b", "a", "c"]);
        assert!(!state.is_terminal());
    }

    #[test]
    fn equivalence_is_exact_list_match() {
        let a = State::new(["x", "y"]);
        let b = State::new(["x", "y"]).with_terminal(true);
        let c = State::new(["y"]);
        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&c));
    }

    #[test]
    fn weak_equivalence_is_intersection() {
        let a = State::new(["x", "y"]);
        let c = State::new(["y", "z"]);
        let d = State::new(["q"]);
        assert!(a.is_equivalent_weak(&c));
        assert!(!a.is_equivalent_weak(&d));
    }

    #[test]
    fn root_and_end_markers() {
        assert_eq!(State::root().templates(), [""]);
        assert!(State::end().is_terminal());
    }

    #[test]
    fn intern_shares_identical_lists() {
        let mut table = PropertyTable::new();
        let a = table.intern(State::new(["a"]).into_parts().0);
        let b = table.intern(State::new(["a"]).into_parts().0);
        let c = table.intern(State::new(["a", "b"]).into_parts().0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(&["a".to_string(), "b".to_string()]), Some(c));
        assert_eq!(table.lookup(&["zzz".to_string()]), None);
    }

    #[test]
    fn union_keeps_left_order() {
        let left = StateProperties::new(State::new(["b", "a"]).into_parts().0);
        let right = StateProperties::new(State::new(["c", "a"]).into_parts().0);
        assert_eq!(left.union(&right).as_slice(), ["b", "a", "c"]);
    }

    #[test]
    fn table_serde_roundtrip_rebuilds_index() {
        let mut table = PropertyTable::new();
        let a = table.intern(State::new(["a"]).into_parts().0);
        let json = serde_json::to_string(&table).unwrap();
        let mut back: PropertyTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.intern(State::new(["a"]).into_parts().0), a);
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn table_rejects_duplicates_on_reload() {
        let json = r#"[{"templates":["a"]},{"templates":["a"]}]"#;
        let result: Result<PropertyTable, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
