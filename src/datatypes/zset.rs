//! Sorted-set operations
//!
//! A `zadd` touches three structures: the log (record keyed by
//! `encode_key(key, score)`, member as value), the member-hash index that
//! locates that record, and the in-memory skip list that ranks
//! `(score, member)` pairs.

use crate::encoding::{encode_key, encode_score, member_hash};
use crate::logfile::LogEntry;
use crate::{DataType, Engine, Result, StorageError};

impl Engine {
    /// Add `member` or update its score; returns whether it was new.
    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8]) -> Result<bool> {
        if score.is_nan() {
            return Err(StorageError::InvalidArgument("score is not a number".into()));
        }
        let mut zsets = self.write_guard(&self.zsets)?;
        let existing = zsets.sorted.get(key).and_then(|s| s.score(member));
        if existing == Some(score) {
            return Ok(false);
        }

        let entry = LogEntry::put(encode_key(key, &encode_score(score)), member.to_vec());
        let loc = self.write_log_entry(&entry, DataType::ZSet)?;

        let node = self.make_node(loc, member, 0);
        let old = zsets
            .trees
            .entry(key.to_vec())
            .or_default()
            .put(member_hash(member), node);
        self.discard_node(DataType::ZSet, old);
        zsets.sorted.entry(key.to_vec()).or_default().add(member, score);

        Ok(existing.is_none())
    }

    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        let zsets = self.read_guard(&self.zsets)?;
        let score = zsets.sorted.get(key).and_then(|s| s.score(member));
        self.note_read(score.is_some());
        Ok(score)
    }

    /// Remove `member`; returns whether it was present.
    pub fn zrem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let mut zsets = self.write_guard(&self.zsets)?;
        let score = match zsets.sorted.get(key).and_then(|s| s.score(member)) {
            Some(score) => score,
            None => return Ok(false),
        };

        let entry = LogEntry::delete(encode_key(key, &encode_score(score)), member.to_vec());
        let loc = self.write_log_entry(&entry, DataType::ZSet)?;
        self.discard_location(DataType::ZSet, loc);

        if let Some(tree) = zsets.trees.get_mut(key) {
            let old = tree.delete(&member_hash(member));
            self.discard_node(DataType::ZSet, old);
        }
        if let Some(sorted) = zsets.sorted.get_mut(key) {
            sorted.remove(member);
        }
        Ok(true)
    }

    pub fn zcard(&self, key: &[u8]) -> Result<usize> {
        let zsets = self.read_guard(&self.zsets)?;
        Ok(zsets.sorted.get(key).map_or(0, |s| s.card()))
    }

    /// Members between ranks `start` and `stop` inclusive, lowest score first.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        Ok(strip_scores(self.zrange_with_scores(key, start, stop)?))
    }

    pub fn zrange_with_scores(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<(Vec<u8>, f64)>> {
        self.zrange_by_rank(key, start, stop, false)
    }

    /// Members between ranks `start` and `stop`, highest score first.
    pub fn zrevrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        Ok(strip_scores(self.zrevrange_with_scores(key, start, stop)?))
    }

    pub fn zrevrange_with_scores(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<(Vec<u8>, f64)>> {
        self.zrange_by_rank(key, start, stop, true)
    }

    /// Zero-based rank, lowest score first.
    pub fn zrank(&self, key: &[u8], member: &[u8]) -> Result<Option<usize>> {
        let zsets = self.read_guard(&self.zsets)?;
        Ok(zsets.sorted.get(key).and_then(|s| s.rank(member, false)))
    }

    /// Zero-based rank, highest score first.
    pub fn zrevrank(&self, key: &[u8], member: &[u8]) -> Result<Option<usize>> {
        let zsets = self.read_guard(&self.zsets)?;
        Ok(zsets.sorted.get(key).and_then(|s| s.rank(member, true)))
    }

    fn zrange_by_rank(&self, key: &[u8], start: i64, stop: i64, reverse: bool) -> Result<Vec<(Vec<u8>, f64)>> {
        let zsets = self.read_guard(&self.zsets)?;
        Ok(zsets
            .sorted
            .get(key)
            .map(|s| s.range(start, stop, reverse))
            .unwrap_or_default())
    }
}

fn strip_scores(pairs: Vec<(Vec<u8>, f64)>) -> Vec<Vec<u8>> {
    pairs.into_iter().map(|(member, _)| member).collect()
}
