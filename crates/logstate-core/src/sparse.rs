//! Sorted sparse adjacency index backing all edge storage.
//!
//! Every edge is one token `"{source}.{destination}.{payload}"` kept in a
//! single lexicographically sorted vector. Indices are rendered as decimal
//! digits only, so the separator can never occur inside them: a prefix search
//! on `"1."` can not match the entries of source `12`.
//!
//! All tokens sharing a prefix are contiguous in sorted order, which turns a
//! children lookup into one binary search plus a forward scan. Parent lookups
//! use a second sorted vector of `"{destination}.{source}"` keys that is kept
//! in step with the forward entries on every insert, removal and rewrite.
//!
//! Payloads are opaque strings. Rewrites never merge payloads on their own;
//! callers that want to combine colliding payloads use the `*_with` variants.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Separator between the fields of a token.
const SEPARATOR: char = '.';

/// Sorted associative store from `(source, destination)` to a payload string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SparseAdjacencyIndex {
    /// Forward tokens `source.destination.payload`, sorted.
    entries: Vec<String>,
    /// Reverse keys `destination.source`, sorted.
    reverse: Vec<String>,
}

fn pair_prefix(source: u32, destination: u32) -> String {
    format!("{source}{SEPARATOR}{destination}{SEPARATOR}")
}

fn single_prefix(index: u32) -> String {
    format!("{index}{SEPARATOR}")
}

fn reverse_key(source: u32, destination: u32) -> String {
    format!("{destination}{SEPARATOR}{source}")
}

/// First position whose entry is not less than `prefix`. Entries starting
/// with `prefix` (if any) begin here.
fn lower_bound(list: &[String], prefix: &str) -> usize {
    list.partition_point(|entry| entry.as_str() < prefix)
}

/// Splits a token into its source, destination and payload.
fn decode(entry: &str) -> Option<(u32, u32, &str)> {
    let mut parts = entry.splitn(3, SEPARATOR);
    let source = parts.next()?.parse().ok()?;
    let destination = parts.next()?.parse().ok()?;
    let payload = parts.next()?;
    Some((source, destination, payload))
}

/// Decodes a token written by this index.
///
/// Tokens only enter the index through `set`, which renders both indices in
/// canonical decimal form, so decoding cannot fail.
fn split(entry: &str) -> (u32, u32, &str) {
    decode(entry).expect("index tokens are encoded by SparseAdjacencyIndex::set")
}

impl SparseAdjacencyIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored edges.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no edge is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, source: u32, destination: u32) -> Option<usize> {
        let prefix = pair_prefix(source, destination);
        let idx = lower_bound(&self.entries, &prefix);
        self.entries
            .get(idx)
            .filter(|entry| entry.starts_with(&prefix))
            .map(|_| idx)
    }

    /// Inserts or overwrites the payload for `(source, destination)`.
    ///
    /// Returns the previous payload if the pair already existed.
    pub fn set(&mut self, source: u32, destination: u32, payload: &str) -> Option<String> {
        let token = format!("{source}{SEPARATOR}{destination}{SEPARATOR}{payload}");
        match self.find(source, destination) {
            Some(idx) => {
                let old = std::mem::replace(&mut self.entries[idx], token);
                Some(split(&old).2.to_string())
            }
            None => {
                let idx = lower_bound(&self.entries, &token);
                self.entries.insert(idx, token);

                let key = reverse_key(source, destination);
                if let Err(pos) = self.reverse.binary_search(&key) {
                    self.reverse.insert(pos, key);
                }
                None
            }
        }
    }

    /// Returns the payload stored for `(source, destination)`.
    pub fn get(&self, source: u32, destination: u32) -> Result<&str, CoreError> {
        self.find(source, destination)
            .map(|idx| split(&self.entries[idx]).2)
            .ok_or(CoreError::IndexKeyNotFound {
                src: source,
                dst: destination,
            })
    }

    /// Returns `true` if an entry exists for `(source, destination)`.
    pub fn contains(&self, source: u32, destination: u32) -> bool {
        self.find(source, destination).is_some()
    }

    /// Removes the entry for `(source, destination)`, returning its payload.
    pub(crate) fn remove(&mut self, source: u32, destination: u32) -> Option<String> {
        let idx = self.find(source, destination)?;
        let old = self.entries.remove(idx);

        let key = reverse_key(source, destination);
        if let Ok(pos) = self.reverse.binary_search(&key) {
            self.reverse.remove(pos);
        }
        Some(split(&old).2.to_string())
    }

    /// All `(destination, payload)` pairs whose source is `source`, sorted by
    /// destination.
    pub fn children_of(&self, source: u32) -> Vec<(u32, &str)> {
        let prefix = single_prefix(source);
        let start = lower_bound(&self.entries, &prefix);
        let mut children: Vec<(u32, &str)> = self.entries[start..]
            .iter()
            .take_while(|entry| entry.starts_with(&prefix))
            .map(|entry| {
                let (_, destination, payload) = split(entry);
                (destination, payload)
            })
            .collect();
        children.sort_unstable_by_key(|(destination, _)| *destination);
        children
    }

    /// All sources with an edge into `destination`, sorted.
    pub fn parents_of(&self, destination: u32) -> Vec<u32> {
        let prefix = single_prefix(destination);
        let start = lower_bound(&self.reverse, &prefix);
        let mut parents: Vec<u32> = self.reverse[start..]
            .iter()
            .take_while(|key| key.starts_with(&prefix))
            .filter_map(|key| key[prefix.len()..].parse().ok())
            .collect();
        parents.sort_unstable();
        parents
    }

    /// Iterates over all `(source, destination, payload)` triples in token
    /// order (lexicographic, not numeric).
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, &str)> + '_ {
        self.entries.iter().map(|entry| split(entry))
    }

    /// Moves every edge leaving `old` so that it leaves `new` instead.
    ///
    /// When the moved pair collides with an existing entry the moved payload
    /// wins. Returns the number of moved edges.
    pub fn rewrite_source(&mut self, old: u32, new: u32) -> usize {
        self.rewrite_source_with(old, new, |_, incoming| incoming.to_string())
    }

    /// Like [`rewrite_source`](Self::rewrite_source), resolving collisions
    /// with `combine(existing, incoming)`.
    pub fn rewrite_source_with<F>(&mut self, old: u32, new: u32, mut combine: F) -> usize
    where
        F: FnMut(&str, &str) -> String,
    {
        if old == new {
            return 0;
        }
        let moved: Vec<(u32, String)> = self
            .children_of(old)
            .into_iter()
            .map(|(destination, payload)| (destination, payload.to_string()))
            .collect();
        for (destination, _) in &moved {
            self.remove(old, *destination);
        }

        let count = moved.len();
        for (destination, payload) in moved {
            let payload = match self.get(new, destination) {
                Ok(existing) => combine(existing, &payload),
                Err(_) => payload,
            };
            self.set(new, destination, &payload);
        }
        count
    }

    /// Moves every edge entering `old` so that it enters `new` instead.
    ///
    /// When the moved pair collides with an existing entry the moved payload
    /// wins. Returns the number of moved edges.
    pub fn rewrite_destination(&mut self, old: u32, new: u32) -> usize {
        self.rewrite_destination_with(old, new, |_, incoming| incoming.to_string())
    }

    /// Like [`rewrite_destination`](Self::rewrite_destination), resolving
    /// collisions with `combine(existing, incoming)`.
    pub fn rewrite_destination_with<F>(&mut self, old: u32, new: u32, mut combine: F) -> usize
    where
        F: FnMut(&str, &str) -> String,
    {
        if old == new {
            return 0;
        }
        let sources = self.parents_of(old);
        let moved: Vec<(u32, String)> = sources
            .into_iter()
            .filter_map(|source| self.remove(source, old).map(|payload| (source, payload)))
            .collect();

        let count = moved.len();
        for (source, payload) in moved {
            let payload = match self.get(source, new) {
                Ok(existing) => combine(existing, &payload),
                Err(_) => payload,
            };
            self.set(source, new, &payload);
        }
        count
    }
}

impl TryFrom<Vec<String>> for SparseAdjacencyIndex {
    type Error = CoreError;

    fn try_from(tokens: Vec<String>) -> Result<Self, Self::Error> {
        let mut index = SparseAdjacencyIndex::new();
        for token in tokens {
            let (source, destination, payload) =
                decode(&token).ok_or_else(|| CoreError::MalformedEntry {
                    entry: token.clone(),
                })?;
            index.set(source, destination, payload);
        }
        Ok(index)
    }
}

impl From<SparseAdjacencyIndex> for Vec<String> {
    fn from(index: SparseAdjacencyIndex) -> Self {
        index.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get() {
        let mut index = SparseAdjacencyIndex::new();
        assert_eq!(index.set(0, 1, "1"), None);
        assert_eq!(index.get(0, 1).unwrap(), "1");
        assert!(index.contains(0, 1));
        assert!(!index.contains(1, 0));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn set_overwrites_existing_pair() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(3, 4, "1");
        assert_eq!(index.set(3, 4, "7"), Some("1".to_string()));
        assert_eq!(index.get(3, 4).unwrap(), "7");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn get_missing_is_not_found() {
        let index = SparseAdjacencyIndex::new();
        assert_eq!(
            index.get(5, 6),
            Err(CoreError::IndexKeyNotFound { src: 5, dst: 6 })
        );
    }

    #[test]
    fn children_do_not_leak_across_longer_indices() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(1, 2, "a");
        index.set(12, 3, "b");
        index.set(13, 1, "c");
        index.set(1, 10, "d");
        index.set(111, 1, "e");

        let children = index.children_of(1);
        assert_eq!(children, vec![(2, "a"), (10, "d")]);
        assert_eq!(index.children_of(12), vec![(3, "b")]);
        assert!(index.children_of(2).is_empty());
    }

    #[test]
    fn pair_lookup_does_not_match_longer_destination() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(1, 23, "x");
        assert!(!index.contains(1, 2));
        assert!(index.contains(1, 23));
    }

    #[test]
    fn parents_are_sorted_and_exact() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(12, 1, "1");
        index.set(2, 1, "1");
        index.set(3, 11, "1");
        index.set(4, 10, "1");

        assert_eq!(index.parents_of(1), vec![2, 12]);
        assert_eq!(index.parents_of(11), vec![3]);
        assert!(index.parents_of(5).is_empty());
    }

    #[test]
    fn payload_may_contain_separator() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(1, 2, "a.b.c");
        assert_eq!(index.get(1, 2).unwrap(), "a.b.c");
        assert_eq!(index.children_of(1), vec![(2, "a.b.c")]);
    }

    #[test]
    fn rewrite_source_moves_children() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(2, 3, "1");
        index.set(2, 4, "2");
        index.set(1, 5, "3");

        assert_eq!(index.rewrite_source(2, 1), 2);
        assert!(index.children_of(2).is_empty());
        assert_eq!(index.children_of(1), vec![(3, "1"), (4, "2"), (5, "3")]);
        assert_eq!(index.parents_of(3), vec![1]);
    }

    #[test]
    fn rewrite_destination_moves_parents() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(0, 2, "1");
        index.set(1, 2, "4");

        assert_eq!(index.rewrite_destination(2, 3), 2);
        assert!(index.parents_of(2).is_empty());
        assert_eq!(index.parents_of(3), vec![0, 1]);
        assert_eq!(index.get(1, 3).unwrap(), "4");
    }

    #[test]
    fn rewrite_collision_later_write_wins() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(0, 1, "5");
        index.set(0, 2, "9");

        index.rewrite_destination(2, 1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(0, 1).unwrap(), "9");
    }

    #[test]
    fn rewrite_collision_with_combine() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(0, 1, "5");
        index.set(0, 2, "9");

        index.rewrite_destination_with(2, 1, |existing, incoming| {
            let sum: u64 = existing.parse::<u64>().unwrap() + incoming.parse::<u64>().unwrap();
            sum.to_string()
        });
        assert_eq!(index.get(0, 1).unwrap(), "14");
    }

    #[test]
    fn rewrite_self_loop_through_both_passes() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(4, 4, "1");

        index.rewrite_destination(4, 1);
        index.rewrite_source(4, 1);
        assert_eq!(index.children_of(1), vec![(1, "1")]);
        assert_eq!(index.parents_of(1), vec![1]);
        assert!(!index.contains(4, 4));
    }

    #[test]
    fn serde_roundtrip_rebuilds_reverse_keys() {
        let mut index = SparseAdjacencyIndex::new();
        index.set(10, 1, "2");
        index.set(1, 10, "3");

        let json = serde_json::to_string(&index).unwrap();
        let back: SparseAdjacencyIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back, index);
        assert_eq!(back.parents_of(10), vec![1]);
    }

    #[test]
    fn deserialize_rejects_malformed_token() {
        let result: Result<SparseAdjacencyIndex, _> = serde_json::from_str(r#"["1-2-3"]"#);
        assert!(result.is_err());
    }
}
