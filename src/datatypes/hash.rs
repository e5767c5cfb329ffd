//! Hash operations
//!
//! Every field is its own record keyed by `encode_key(key, field)`; the
//! per-hash index is keyed by the bare field, so `hkeys`/`hgetall` come back
//! in field order.

use std::collections::HashMap;

use crate::datatypes::{pairs, parse_int, with_container};
use crate::encoding::encode_key;
use crate::index::Index;
use crate::logfile::LogEntry;
use crate::{DataType, Engine, Result, StorageError};

impl Engine {
    /// Set fields from a flat `[f1, v1, f2, v2, ...]` list; returns how many
    /// fields did not exist before.
    pub fn hset<K: AsRef<[u8]>>(&self, key: &[u8], args: &[K]) -> Result<usize> {
        let pairs = pairs(args)?;
        let mut hashes = self.write_guard(&self.hashes)?;
        with_container(&mut hashes, key, |tree| {
            let mut added = 0;
            for (field, value) in pairs {
                if self.put_field(tree, key, field, value)? {
                    added += 1;
                }
            }
            Ok(added)
        })
    }

    /// Set `field` only if it does not exist yet.
    pub fn hsetnx(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        let mut hashes = self.write_guard(&self.hashes)?;
        if hashes.get(key).map_or(false, |tree| tree.contains(field)) {
            return Ok(false);
        }
        with_container(&mut hashes, key, |tree| self.put_field(tree, key, field, value))?;
        Ok(true)
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        let hashes = self.read_guard(&self.hashes)?;
        let value = self.field_value(&hashes, key, field)?;
        self.note_read(value.is_some());
        Ok(value)
    }

    pub fn hmget<K: AsRef<[u8]>>(&self, key: &[u8], fields: &[K]) -> Result<Vec<Option<Vec<u8>>>> {
        if fields.is_empty() {
            return Err(StorageError::WrongNumberOfArgs);
        }
        let hashes = self.read_guard(&self.hashes)?;
        fields
            .iter()
            .map(|field| self.field_value(&hashes, key, field.as_ref()))
            .collect()
    }

    /// Remove fields; returns how many existed.
    pub fn hdel<K: AsRef<[u8]>>(&self, key: &[u8], fields: &[K]) -> Result<usize> {
        if fields.is_empty() {
            return Err(StorageError::WrongNumberOfArgs);
        }
        let mut hashes = self.write_guard(&self.hashes)?;
        let tree = match hashes.get_mut(key) {
            Some(tree) => tree,
            None => return Ok(0),
        };

        let mut removed = 0;
        for field in fields {
            let field = field.as_ref();
            if !tree.contains(field) {
                continue;
            }
            let entry = LogEntry::delete(encode_key(key, field), Vec::new());
            let loc = self.write_log_entry(&entry, DataType::Hash)?;
            let old = tree.delete(field);
            self.discard_node(DataType::Hash, old);
            self.discard_location(DataType::Hash, loc);
            removed += 1;
        }

        Ok(removed)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        let hashes = self.read_guard(&self.hashes)?;
        Ok(hashes.get(key).map_or(false, |tree| tree.contains(field)))
    }

    pub fn hlen(&self, key: &[u8]) -> Result<usize> {
        let hashes = self.read_guard(&self.hashes)?;
        Ok(hashes.get(key).map_or(0, |tree| tree.len()))
    }

    pub fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let hashes = self.read_guard(&self.hashes)?;
        Ok(hashes
            .get(key)
            .map(|tree| tree.iter().map(|(field, _)| field.to_vec()).collect())
            .unwrap_or_default())
    }

    pub fn hvals(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(_, value)| value).collect())
    }

    /// Every `(field, value)` pair in field order.
    pub fn hgetall(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.hscan(key, b"", 0)
    }

    pub fn hstrlen(&self, key: &[u8], field: &[u8]) -> Result<usize> {
        Ok(self.hget(key, field)?.map_or(0, |v| v.len()))
    }

    /// Up to `count` pairs whose field starts with `prefix`; zero means no limit.
    pub fn hscan(&self, key: &[u8], prefix: &[u8], count: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let hashes = self.read_guard(&self.hashes)?;
        let tree = match hashes.get(key) {
            Some(tree) => tree,
            None => return Ok(Vec::new()),
        };

        let limit = if count == 0 { usize::MAX } else { count };
        let mut out = Vec::new();
        for (field, node) in tree.prefix_iter(prefix) {
            if out.len() >= limit {
                break;
            }
            if let Some(value) = self.read_value(DataType::Hash, node)? {
                out.push((field.to_vec(), value));
            }
        }
        Ok(out)
    }

    /// Add `delta` to the integer stored at `field`.
    pub fn hincrby(&self, key: &[u8], field: &[u8], delta: i64) -> Result<i64> {
        let mut hashes = self.write_guard(&self.hashes)?;
        let current = self.field_value(&hashes, key, field)?;
        let n = parse_int(current.as_deref())?;
        let next = n.checked_add(delta).ok_or(StorageError::IntegerOverflow)?;

        with_container(&mut hashes, key, |tree| {
            self.put_field(tree, key, field, next.to_string().as_bytes())
        })?;
        Ok(next)
    }

    /// Random fields. A positive `count` returns distinct fields (at most the
    /// hash size); a negative one returns `|count|` picks that may repeat.
    /// Values are included when `with_values` is set.
    pub fn hrandfield(
        &self,
        key: &[u8],
        count: i64,
        with_values: bool,
    ) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        let all = self.hgetall(key)?;
        if all.is_empty() || count == 0 {
            return Ok(Vec::new());
        }

        let picks: Vec<usize> = if count > 0 {
            let mut order: Vec<usize> = (0..all.len()).collect();
            fastrand::shuffle(&mut order);
            order.truncate(count as usize);
            order
        } else {
            (0..count.unsigned_abs())
                .map(|_| fastrand::usize(..all.len()))
                .collect()
        };

        Ok(picks
            .into_iter()
            .map(|i| {
                let (field, value) = &all[i];
                (field.clone(), with_values.then(|| value.clone()))
            })
            .collect())
    }

    fn field_value(&self, hashes: &HashMap<Vec<u8>, Index>, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        match hashes.get(key).and_then(|tree| tree.get(field)) {
            Some(node) => self.read_value(DataType::Hash, node),
            None => Ok(None),
        }
    }

    /// Write one field; returns whether it is new.
    fn put_field(&self, tree: &mut Index, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        let entry = LogEntry::put(encode_key(key, field), value.to_vec());
        let loc = self.write_log_entry(&entry, DataType::Hash)?;
        let old = tree.put(field.to_vec(), self.make_node(loc, value, 0));
        let added = old.is_none();
        self.discard_node(DataType::Hash, old);
        Ok(added)
    }
}
