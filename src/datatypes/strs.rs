//! String operations
//!
//! One record per write, keyed by the user key. A TTL rides in the record's
//! `expires_at`; expired keys stay in the index until overwritten or
//! compacted but are invisible to every read.

use std::time::Duration;

use crate::datatypes::{pairs, parse_int};
use crate::encoding::now_secs;
use crate::index::Index;
use crate::logfile::LogEntry;
use crate::{DataType, Engine, Result, StorageError};

impl Engine {
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut strs = self.write_guard(&self.strs)?;
        self.put_str(&mut strs, key, value, 0)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let strs = self.read_guard(&self.strs)?;
        let value = self.live_str(&strs, key)?;
        self.note_read(value.is_some());
        Ok(value)
    }

    pub fn mget<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Err(StorageError::WrongNumberOfArgs);
        }
        let strs = self.read_guard(&self.strs)?;
        keys.iter()
            .map(|key| {
                let value = self.live_str(&strs, key.as_ref())?;
                self.note_read(value.is_some());
                Ok(value)
            })
            .collect()
    }

    /// Substring between byte offsets `start` and `end` inclusive; negative
    /// offsets count from the end.
    pub fn get_range(&self, key: &[u8], start: i64, end: i64) -> Result<Vec<u8>> {
        let value = match self.get(key)? {
            Some(value) => value,
            None => return Ok(Vec::new()),
        };

        let len = value.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        let mut end = if end < 0 { len + end } else { end };
        if start < 0 {
            start = 0;
        }
        if end < 0 {
            end = 0;
        }
        if end >= len {
            end = len - 1;
        }
        if start > end || len == 0 {
            return Ok(Vec::new());
        }
        Ok(value[start as usize..=end as usize].to_vec())
    }

    /// Remove `key` and return the value it held.
    pub fn get_del(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut strs = self.write_guard(&self.strs)?;
        let value = self.live_str(&strs, key)?;
        if value.is_some() {
            self.delete_str(&mut strs, key)?;
        }
        Ok(value)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut strs = self.write_guard(&self.strs)?;
        self.delete_str(&mut strs, key)
    }

    /// Set `key` to expire `ttl` from now.
    pub fn set_ex(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(StorageError::InvalidArgument("ttl must be positive".into()));
        }
        let expires_at = now_secs() + ttl.as_secs().max(1) as i64;
        let mut strs = self.write_guard(&self.strs)?;
        self.put_str(&mut strs, key, value, expires_at)
    }

    /// Set only if `key` does not exist; returns whether it was set.
    pub fn set_nx(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut strs = self.write_guard(&self.strs)?;
        if self.live_str(&strs, key)?.is_some() {
            return Ok(false);
        }
        self.put_str(&mut strs, key, value, 0)?;
        Ok(true)
    }

    /// Set several keys from a flat `[k1, v1, k2, v2, ...]` list.
    pub fn mset<K: AsRef<[u8]>>(&self, args: &[K]) -> Result<()> {
        let pairs = pairs(args)?;
        let mut strs = self.write_guard(&self.strs)?;
        for (key, value) in pairs {
            self.put_str(&mut strs, key, value, 0)?;
        }
        Ok(())
    }

    /// Like `mset`, but writes nothing if any of the keys exists.
    pub fn mset_nx<K: AsRef<[u8]>>(&self, args: &[K]) -> Result<bool> {
        let pairs = pairs(args)?;
        let mut strs = self.write_guard(&self.strs)?;
        for (key, _) in &pairs {
            if self.live_str(&strs, key)?.is_some() {
                return Ok(false);
            }
        }
        for (key, value) in pairs {
            self.put_str(&mut strs, key, value, 0)?;
        }
        Ok(true)
    }

    /// Append to the value at `key` (creating it) and return the new length.
    pub fn append(&self, key: &[u8], suffix: &[u8]) -> Result<usize> {
        let mut strs = self.write_guard(&self.strs)?;
        let expires_at = self.live_expiry(&strs, key);
        let mut value = self.live_str(&strs, key)?.unwrap_or_default();
        value.extend_from_slice(suffix);
        self.put_str(&mut strs, key, &value, expires_at)?;
        Ok(value.len())
    }

    pub fn incr(&self, key: &[u8]) -> Result<i64> {
        self.incr_by(key, 1)
    }

    pub fn incr_by(&self, key: &[u8], delta: i64) -> Result<i64> {
        self.update_int(key, |n| n.checked_add(delta))
    }

    pub fn decr(&self, key: &[u8]) -> Result<i64> {
        self.decr_by(key, 1)
    }

    pub fn decr_by(&self, key: &[u8], delta: i64) -> Result<i64> {
        self.update_int(key, |n| n.checked_sub(delta))
    }

    fn update_int(&self, key: &[u8], apply: impl Fn(i64) -> Option<i64>) -> Result<i64> {
        let mut strs = self.write_guard(&self.strs)?;
        let current = self.live_str(&strs, key)?;
        let n = parse_int(current.as_deref())?;
        let next = apply(n).ok_or(StorageError::IntegerOverflow)?;

        let expires_at = self.live_expiry(&strs, key);
        self.put_str(&mut strs, key, next.to_string().as_bytes(), expires_at)?;
        Ok(next)
    }

    /// Length of the value at `key`, 0 if missing.
    pub fn str_len(&self, key: &[u8]) -> Result<usize> {
        Ok(self.get(key)?.map_or(0, |v| v.len()))
    }

    /// Number of live string keys.
    pub fn count(&self) -> Result<usize> {
        let strs = self.read_guard(&self.strs)?;
        let now = now_secs();
        Ok(strs.iter().filter(|(_, node)| !node.is_expired(now)).count())
    }

    /// Up to `count` live pairs whose key starts with `prefix`, in key order.
    /// A `count` of zero means no limit.
    pub fn scan(&self, prefix: &[u8], count: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let strs = self.read_guard(&self.strs)?;
        let limit = if count == 0 { usize::MAX } else { count };
        let mut out = Vec::new();
        for (key, node) in strs.prefix_iter(prefix) {
            if out.len() >= limit {
                break;
            }
            if let Some(value) = self.read_value(DataType::Str, node)? {
                out.push((key.to_vec(), value));
            }
        }
        Ok(out)
    }

    /// Set a TTL on an existing key. A zero TTL deletes it.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> Result<bool> {
        let mut strs = self.write_guard(&self.strs)?;
        let value = match self.live_str(&strs, key)? {
            Some(value) => value,
            None => return Ok(false),
        };
        if ttl.is_zero() {
            self.delete_str(&mut strs, key)?;
            return Ok(true);
        }
        let expires_at = now_secs() + ttl.as_secs().max(1) as i64;
        self.put_str(&mut strs, key, &value, expires_at)?;
        Ok(true)
    }

    /// Remaining seconds to live: -2 if the key is missing, -1 if it never
    /// expires.
    pub fn ttl(&self, key: &[u8]) -> Result<i64> {
        let strs = self.read_guard(&self.strs)?;
        let now = now_secs();
        match strs.get(key) {
            None => Ok(-2),
            Some(node) if node.is_expired(now) => Ok(-2),
            Some(node) if node.expires_at == 0 => Ok(-1),
            Some(node) => Ok(node.expires_at - now),
        }
    }

    /// Drop the TTL of `key`; returns whether there was one.
    pub fn persist(&self, key: &[u8]) -> Result<bool> {
        let mut strs = self.write_guard(&self.strs)?;
        if self.live_expiry(&strs, key) == 0 {
            return Ok(false);
        }
        let value = match self.live_str(&strs, key)? {
            Some(value) => value,
            None => return Ok(false),
        };
        self.put_str(&mut strs, key, &value, 0)?;
        Ok(true)
    }

    /// Every live string key in key order.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let strs = self.read_guard(&self.strs)?;
        let now = now_secs();
        Ok(strs
            .iter()
            .filter(|(_, node)| !node.is_expired(now))
            .map(|(key, _)| key.to_vec())
            .collect())
    }

    fn live_str(&self, strs: &Index, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match strs.get(key) {
            Some(node) => self.read_value(DataType::Str, node),
            None => Ok(None),
        }
    }

    /// Expiry of a live key, 0 when it has none or does not exist.
    fn live_expiry(&self, strs: &Index, key: &[u8]) -> i64 {
        match strs.get(key) {
            Some(node) if !node.is_expired(now_secs()) => node.expires_at,
            _ => 0,
        }
    }

    fn put_str(&self, strs: &mut Index, key: &[u8], value: &[u8], expires_at: i64) -> Result<()> {
        let entry = LogEntry::with_expiry(key.to_vec(), value.to_vec(), expires_at);
        let loc = self.write_log_entry(&entry, DataType::Str)?;

        // Already expired: the write is durable but leaves nothing visible.
        if expires_at != 0 && expires_at <= now_secs() {
            let old = strs.delete(key);
            self.discard_node(DataType::Str, old);
            self.discard_location(DataType::Str, loc);
            return Ok(());
        }

        let old = strs.put(key.to_vec(), self.make_node(loc, value, expires_at));
        self.discard_node(DataType::Str, old);
        Ok(())
    }

    fn delete_str(&self, strs: &mut Index, key: &[u8]) -> Result<()> {
        if !strs.contains(key) {
            return Ok(());
        }
        let loc = self.write_log_entry(&LogEntry::delete(key.to_vec(), Vec::new()), DataType::Str)?;
        let old = strs.delete(key);
        self.discard_node(DataType::Str, old);
        self.discard_location(DataType::Str, loc);
        Ok(())
    }
}
