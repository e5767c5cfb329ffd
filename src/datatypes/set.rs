//! Set operations
//!
//! Records are keyed by the set key with the member as value. The per-set
//! index is keyed by the member's 128-bit content hash, so membership checks
//! and set algebra never touch the log.

use std::collections::HashMap;

use crate::datatypes::with_container;
use crate::encoding::member_hash;
use crate::index::Index;
use crate::logfile::LogEntry;
use crate::{DataType, Engine, Result, StorageError};

#[derive(Clone, Copy)]
enum SetOp {
    Diff,
    Union,
    Inter,
}

impl Engine {
    /// Add members; returns how many were not present.
    pub fn sadd<K: AsRef<[u8]>>(&self, key: &[u8], members: &[K]) -> Result<usize> {
        if members.is_empty() {
            return Err(StorageError::WrongNumberOfArgs);
        }
        let mut sets = self.write_guard(&self.sets)?;
        with_container(&mut sets, key, |tree| {
            let mut added = 0;
            for member in members {
                if self.add_member(tree, key, member.as_ref())? {
                    added += 1;
                }
            }
            Ok(added)
        })
    }

    /// Remove and return up to `count` members.
    ///
    /// Members are taken in index order (ascending member hash), not sampled
    /// uniformly at random.
    pub fn spop(&self, key: &[u8], count: usize) -> Result<Vec<Vec<u8>>> {
        let mut sets = self.write_guard(&self.sets)?;
        let tree = match sets.get_mut(key) {
            Some(tree) => tree,
            None => return Ok(Vec::new()),
        };

        let mut picked = Vec::with_capacity(count.min(tree.len()));
        for (_, node) in tree.iter() {
            if picked.len() == count {
                break;
            }
            if let Some(member) = self.read_value(DataType::Set, node)? {
                picked.push(member);
            }
        }
        for member in &picked {
            self.remove_member(tree, key, member)?;
        }
        Ok(picked)
    }

    /// Remove members; returns how many were present.
    pub fn srem<K: AsRef<[u8]>>(&self, key: &[u8], members: &[K]) -> Result<usize> {
        if members.is_empty() {
            return Err(StorageError::WrongNumberOfArgs);
        }
        let mut sets = self.write_guard(&self.sets)?;
        let tree = match sets.get_mut(key) {
            Some(tree) => tree,
            None => return Ok(0),
        };
        let mut removed = 0;
        for member in members {
            if self.remove_member(tree, key, member.as_ref())? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let sets = self.read_guard(&self.sets)?;
        Ok(sets
            .get(key)
            .map_or(false, |tree| tree.contains(&member_hash(member))))
    }

    pub fn smismember<K: AsRef<[u8]>>(&self, key: &[u8], members: &[K]) -> Result<Vec<bool>> {
        if members.is_empty() {
            return Err(StorageError::WrongNumberOfArgs);
        }
        let sets = self.read_guard(&self.sets)?;
        let tree = sets.get(key);
        Ok(members
            .iter()
            .map(|m| tree.map_or(false, |t| t.contains(&member_hash(m.as_ref()))))
            .collect())
    }

    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let sets = self.read_guard(&self.sets)?;
        self.members_of(&sets, key)
    }

    pub fn scard(&self, key: &[u8]) -> Result<usize> {
        let sets = self.read_guard(&self.sets)?;
        Ok(sets.get(key).map_or(0, |tree| tree.len()))
    }

    /// Members of the first set that are in none of the others.
    pub fn sdiff<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Vec<u8>>> {
        let sets = self.read_guard(&self.sets)?;
        self.combine(&sets, keys, SetOp::Diff)
    }

    pub fn sunion<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Vec<u8>>> {
        let sets = self.read_guard(&self.sets)?;
        self.combine(&sets, keys, SetOp::Union)
    }

    pub fn sinter<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Vec<u8>>> {
        let sets = self.read_guard(&self.sets)?;
        self.combine(&sets, keys, SetOp::Inter)
    }

    /// `sdiff` stored into `dst`, replacing it; returns the new cardinality.
    pub fn sdiffstore<K: AsRef<[u8]>>(&self, dst: &[u8], keys: &[K]) -> Result<usize> {
        self.combine_store(dst, keys, SetOp::Diff)
    }

    pub fn sunionstore<K: AsRef<[u8]>>(&self, dst: &[u8], keys: &[K]) -> Result<usize> {
        self.combine_store(dst, keys, SetOp::Union)
    }

    pub fn sinterstore<K: AsRef<[u8]>>(&self, dst: &[u8], keys: &[K]) -> Result<usize> {
        self.combine_store(dst, keys, SetOp::Inter)
    }

    fn combine_store<K: AsRef<[u8]>>(&self, dst: &[u8], keys: &[K], op: SetOp) -> Result<usize> {
        let mut sets = self.write_guard(&self.sets)?;
        let result = self.combine(&sets, keys, op)?;

        let existing = self.members_of(&sets, dst)?;
        with_container(&mut sets, dst, |tree| {
            for member in &existing {
                self.remove_member(tree, dst, member)?;
            }
            for member in &result {
                self.add_member(tree, dst, member)?;
            }
            Ok(result.len())
        })
    }

    fn combine<K: AsRef<[u8]>>(&self, sets: &HashMap<Vec<u8>, Index>, keys: &[K], op: SetOp) -> Result<Vec<Vec<u8>>> {
        let (first, rest) = keys.split_first().ok_or(StorageError::WrongNumberOfArgs)?;
        let others: Vec<Option<&Index>> = rest.iter().map(|k| sets.get(k.as_ref())).collect();

        let mut out = Vec::new();
        match op {
            SetOp::Diff | SetOp::Inter => {
                let base = match sets.get(first.as_ref()) {
                    Some(tree) => tree,
                    None => return Ok(out),
                };
                for (hash, node) in base.iter() {
                    let keep = match op {
                        SetOp::Diff => others.iter().all(|t| t.map_or(true, |t| !t.contains(hash))),
                        _ => others.iter().all(|t| t.map_or(false, |t| t.contains(hash))),
                    };
                    if keep {
                        if let Some(member) = self.read_value(DataType::Set, node)? {
                            out.push(member);
                        }
                    }
                }
            }
            SetOp::Union => {
                let mut seen = std::collections::HashSet::new();
                let all = std::iter::once(sets.get(first.as_ref())).chain(others.iter().copied());
                for tree in all.flatten() {
                    for (hash, node) in tree.iter() {
                        if !seen.insert(hash.to_vec()) {
                            continue;
                        }
                        if let Some(member) = self.read_value(DataType::Set, node)? {
                            out.push(member);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn members_of(&self, sets: &HashMap<Vec<u8>, Index>, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let tree = match sets.get(key) {
            Some(tree) => tree,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::with_capacity(tree.len());
        for (_, node) in tree.iter() {
            if let Some(member) = self.read_value(DataType::Set, node)? {
                out.push(member);
            }
        }
        Ok(out)
    }

    fn add_member(&self, tree: &mut Index, key: &[u8], member: &[u8]) -> Result<bool> {
        let hash = member_hash(member);
        if tree.contains(&hash) {
            return Ok(false);
        }
        let entry = LogEntry::put(key.to_vec(), member.to_vec());
        let loc = self.write_log_entry(&entry, DataType::Set)?;
        tree.put(hash, self.make_node(loc, member, 0));
        Ok(true)
    }

    fn remove_member(&self, tree: &mut Index, key: &[u8], member: &[u8]) -> Result<bool> {
        let hash = member_hash(member);
        if !tree.contains(&hash) {
            return Ok(false);
        }
        let entry = LogEntry::delete(key.to_vec(), member.to_vec());
        let loc = self.write_log_entry(&entry, DataType::Set)?;
        let old = tree.delete(&hash);
        self.discard_node(DataType::Set, old);
        self.discard_location(DataType::Set, loc);
        Ok(true)
    }
}
