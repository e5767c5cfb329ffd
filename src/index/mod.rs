//! In-memory index
//!
//! Maps a raw binary key to the location of its newest record. One instance
//! serves all String keys; List, Hash, Set and ZSet keep one instance per
//! container key, created on first write.
//!
//! ## Data Structure Choice
//! `BTreeMap<Vec<u8>, IndexNode>`:
//! - ordered keys give lexicographic full and prefix scans
//! - `insert`/`remove` hand back the previous node, which is exactly what the
//!   discard tracker needs to learn how many bytes became obsolete

pub mod skiplist;

pub use skiplist::{SkipList, SortedSet};

use std::collections::BTreeMap;

/// Where a record's encoded bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueLocation {
    pub segment_id: u32,
    pub offset: i64,
    /// Encoded size of the whole record.
    pub size: i32,
}

/// Index payload.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexNode {
    pub location: ValueLocation,
    /// Present only when the engine caches values in memory.
    pub value: Option<Vec<u8>>,
    pub expires_at: i64,
}

impl IndexNode {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }

    /// Whether this node points at exactly `location`'s record.
    pub fn points_at(&self, location: &ValueLocation) -> bool {
        self.location.segment_id == location.segment_id && self.location.offset == location.offset
    }
}

/// Ordered, prefix-searchable map from key to [`IndexNode`].
#[derive(Debug, Default, Clone)]
pub struct Index {
    tree: BTreeMap<Vec<u8>, IndexNode>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the previous node if there was one.
    pub fn put(&mut self, key: Vec<u8>, node: IndexNode) -> Option<IndexNode> {
        self.tree.insert(key, node)
    }

    pub fn get(&self, key: &[u8]) -> Option<&IndexNode> {
        self.tree.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut IndexNode> {
        self.tree.get_mut(key)
    }

    /// Remove; returns the node that was removed.
    pub fn delete(&mut self, key: &[u8]) -> Option<IndexNode> {
        self.tree.remove(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.tree.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// All entries in lexicographic key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &IndexNode)> {
        self.tree.iter().map(|(k, v)| (k.as_slice(), v))
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn prefix_iter<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a IndexNode)> + 'a {
        self.tree
            .range::<[u8], _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_slice(), v))
    }

    pub fn clear(&mut self) {
        self.tree.clear();
    }
}
