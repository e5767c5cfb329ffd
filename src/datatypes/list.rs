//! List operations
//!
//! Elements live at sequence numbers strictly between `head` and `tail`.
//! Both start around a midpoint, so pushing left decrements `head` and
//! pushing right increments `tail` without renumbering:
//!
//! ```text
//!   head              tail
//!    │   ┌───┬───┬───┐  │
//!    ▼   │ a │ b │ c │  ▼
//!  MID-2  MID-1 MID MID+1  MID+2
//! ```
//!
//! The meta record (log key = list key) stores `head | tail` and is rewritten
//! after every push or pop. An emptied list snaps back to the midpoint.

use std::collections::HashMap;

use crate::datatypes::with_container;
use crate::encoding::{decode_list_meta, encode_list_key, encode_list_meta};
use crate::index::Index;
use crate::logfile::LogEntry;
use crate::{DataType, Engine, Result, StorageError};

/// Sequence number around which every list starts.
pub const LIST_MID: u32 = u32::MAX / 2;

const EMPTY_META: (u32, u32) = (LIST_MID, LIST_MID + 1);

/// End of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSide {
    Left,
    Right,
}

/// Sequence number of logical `index`; negative indices count from the tail.
fn list_seq(head: u32, tail: u32, index: i64) -> Result<u32> {
    let seq = if index >= 0 {
        (head as i64 + 1).checked_add(index)
    } else {
        (tail as i64).checked_add(index)
    };
    match seq {
        Some(seq) if seq > head as i64 && seq < tail as i64 => Ok(seq as u32),
        _ => Err(StorageError::IndexOutOfRange),
    }
}

fn list_len(head: u32, tail: u32) -> usize {
    (tail - head - 1) as usize
}

impl Engine {
    /// Push `values` onto the head one by one; returns the new length.
    pub fn lpush<V: AsRef<[u8]>>(&self, key: &[u8], values: &[V]) -> Result<usize> {
        self.push(key, values, ListSide::Left, false)
    }

    /// `lpush` only if the list already holds elements.
    pub fn lpushx<V: AsRef<[u8]>>(&self, key: &[u8], values: &[V]) -> Result<usize> {
        self.push(key, values, ListSide::Left, true)
    }

    pub fn rpush<V: AsRef<[u8]>>(&self, key: &[u8], values: &[V]) -> Result<usize> {
        self.push(key, values, ListSide::Right, false)
    }

    pub fn rpushx<V: AsRef<[u8]>>(&self, key: &[u8], values: &[V]) -> Result<usize> {
        self.push(key, values, ListSide::Right, true)
    }

    fn push<V: AsRef<[u8]>>(&self, key: &[u8], values: &[V], side: ListSide, only_existing: bool) -> Result<usize> {
        if values.is_empty() {
            return Err(StorageError::WrongNumberOfArgs);
        }
        let mut lists = self.write_guard(&self.lists)?;
        if only_existing {
            let (head, tail) = self.list_meta(lists.get(key), key)?;
            if list_len(head, tail) == 0 {
                return Ok(0);
            }
        }
        self.push_locked(&mut lists, key, values, side)
    }

    pub fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut lists = self.write_guard(&self.lists)?;
        self.pop_locked(&mut lists, key, ListSide::Left)
    }

    pub fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut lists = self.write_guard(&self.lists)?;
        self.pop_locked(&mut lists, key, ListSide::Right)
    }

    /// Pop from `from` of `src` and push onto `to` of `dst` atomically.
    pub fn lmove(&self, src: &[u8], dst: &[u8], from: ListSide, to: ListSide) -> Result<Option<Vec<u8>>> {
        let mut lists = self.write_guard(&self.lists)?;
        let value = match self.pop_locked(&mut lists, src, from)? {
            Some(value) => value,
            None => return Ok(None),
        };
        self.push_locked(&mut lists, dst, &[value.as_slice()], to)?;
        Ok(Some(value))
    }

    pub fn llen(&self, key: &[u8]) -> Result<usize> {
        let lists = self.read_guard(&self.lists)?;
        let (head, tail) = self.list_meta(lists.get(key), key)?;
        Ok(list_len(head, tail))
    }

    /// Element at `index`. A missing list is a miss; an index outside an
    /// existing list is `IndexOutOfRange`.
    pub fn lindex(&self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        let lists = self.read_guard(&self.lists)?;
        let tree = match lists.get(key) {
            Some(tree) => tree,
            None => return Ok(None),
        };
        let (head, tail) = self.list_meta(Some(&*tree), key)?;
        let seq = list_seq(head, tail, index)?;
        self.list_element(tree, seq, key)
    }

    pub fn lset(&self, key: &[u8], index: i64, value: &[u8]) -> Result<()> {
        let mut lists = self.write_guard(&self.lists)?;
        let tree = lists.get_mut(key).ok_or(StorageError::KeyNotFound)?;
        let (head, tail) = self.list_meta(Some(&*tree), key)?;
        if list_len(head, tail) == 0 {
            return Err(StorageError::KeyNotFound);
        }
        let seq = list_seq(head, tail, index)?;
        self.put_element(tree, seq, key, value)
    }

    /// Elements between `start` and `end` inclusive, clamped to the list.
    pub fn lrange(&self, key: &[u8], start: i64, end: i64) -> Result<Vec<Vec<u8>>> {
        let lists = self.read_guard(&self.lists)?;
        let tree = match lists.get(key) {
            Some(tree) => tree,
            None => return Ok(Vec::new()),
        };
        let (head, tail) = self.list_meta(Some(&*tree), key)?;
        let len = list_len(head, tail) as i64;

        let mut start = if start < 0 { len + start } else { start };
        let mut end = if end < 0 { len + end } else { end };
        if start < 0 {
            start = 0;
        }
        if end >= len {
            end = len - 1;
        }
        if start > end || start >= len {
            return Ok(Vec::new());
        }

        let first = list_seq(head, tail, start)?;
        let last = list_seq(head, tail, end)?;
        let mut out = Vec::with_capacity((last - first + 1) as usize);
        for seq in first..=last {
            if let Some(value) = self.list_element(tree, seq, key)? {
                out.push(value);
            }
        }
        Ok(out)
    }

    /// Remove up to `|count|` elements equal to `value`, scanning from the
    /// head when `count > 0`, from the tail when `count < 0`, or every match
    /// when `count == 0`. Returns the number removed.
    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> Result<usize> {
        let mut lists = self.write_guard(&self.lists)?;
        let tree = match lists.get_mut(key) {
            Some(tree) => tree,
            None => return Ok(0),
        };
        let (head, tail) = self.list_meta(Some(&*tree), key)?;

        let mut elements = Vec::with_capacity(list_len(head, tail));
        for seq in head + 1..tail {
            elements.push(self.list_element(tree, seq, key)?.unwrap_or_default());
        }

        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut remove = vec![false; elements.len()];
        let mut removed = 0;
        let positions: Box<dyn Iterator<Item = usize>> = if count < 0 {
            Box::new((0..elements.len()).rev())
        } else {
            Box::new(0..elements.len())
        };
        for i in positions {
            if removed == limit {
                break;
            }
            if elements[i] == value {
                remove[i] = true;
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(0);
        }

        // Renumber from the first removed position onwards.
        let first = remove.iter().position(|&r| r).unwrap_or(0);
        let survivors: Vec<&Vec<u8>> = elements
            .iter()
            .zip(&remove)
            .skip(first)
            .filter(|(_, removed)| !**removed)
            .map(|(e, _)| e)
            .collect();

        for (i, element) in survivors.iter().enumerate() {
            self.put_element(tree, head + 1 + (first + i) as u32, key, element)?;
        }
        let new_len = first + survivors.len();
        for i in new_len..elements.len() {
            self.delete_element(tree, head + 1 + i as u32, key)?;
        }

        let (head, tail) = if new_len == 0 {
            EMPTY_META
        } else {
            (head, head + 1 + new_len as u32)
        };
        self.write_list_meta(tree, key, head, tail)?;
        Ok(removed)
    }

    fn list_meta(&self, tree: Option<&Index>, key: &[u8]) -> Result<(u32, u32)> {
        let node = match tree.and_then(|t| t.get(key)) {
            Some(node) => node,
            None => return Ok(EMPTY_META),
        };
        match self.read_value(DataType::List, node)? {
            Some(raw) => decode_list_meta(&raw),
            None => Ok(EMPTY_META),
        }
    }

    fn write_list_meta(&self, tree: &mut Index, key: &[u8], head: u32, tail: u32) -> Result<()> {
        let value = encode_list_meta(head, tail);
        let loc = self.write_log_entry(&LogEntry::list_meta(key.to_vec(), value.clone()), DataType::List)?;
        let old = tree.put(key.to_vec(), self.make_node(loc, &value, 0));
        self.discard_node(DataType::List, old);
        Ok(())
    }

    fn list_element(&self, tree: &Index, seq: u32, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match tree.get(&encode_list_key(seq, key)) {
            Some(node) => self.read_value(DataType::List, node),
            None => Ok(None),
        }
    }

    fn put_element(&self, tree: &mut Index, seq: u32, key: &[u8], value: &[u8]) -> Result<()> {
        let element_key = encode_list_key(seq, key);
        let loc = self.write_log_entry(&LogEntry::put(element_key.clone(), value.to_vec()), DataType::List)?;
        let old = tree.put(element_key, self.make_node(loc, value, 0));
        self.discard_node(DataType::List, old);
        Ok(())
    }

    fn delete_element(&self, tree: &mut Index, seq: u32, key: &[u8]) -> Result<()> {
        let element_key = encode_list_key(seq, key);
        let loc = self.write_log_entry(&LogEntry::delete(element_key.clone(), Vec::new()), DataType::List)?;
        let old = tree.delete(&element_key);
        self.discard_node(DataType::List, old);
        self.discard_location(DataType::List, loc);
        Ok(())
    }

    fn push_locked<V: AsRef<[u8]>>(
        &self,
        lists: &mut HashMap<Vec<u8>, Index>,
        key: &[u8],
        values: &[V],
        side: ListSide,
    ) -> Result<usize> {
        with_container(lists, key, |tree| {
            let (mut head, mut tail) = self.list_meta(Some(&*tree), key)?;

            for value in values {
                let seq = match side {
                    ListSide::Left => {
                        let seq = head;
                        head = head.checked_sub(1).ok_or(StorageError::IndexOutOfRange)?;
                        seq
                    }
                    ListSide::Right => {
                        let seq = tail;
                        tail = tail.checked_add(1).ok_or(StorageError::IndexOutOfRange)?;
                        seq
                    }
                };
                self.put_element(tree, seq, key, value.as_ref())?;
            }

            self.write_list_meta(tree, key, head, tail)?;
            Ok(list_len(head, tail))
        })
    }

    fn pop_locked(&self, lists: &mut HashMap<Vec<u8>, Index>, key: &[u8], side: ListSide) -> Result<Option<Vec<u8>>> {
        let tree = match lists.get_mut(key) {
            Some(tree) => tree,
            None => return Ok(None),
        };
        let (mut head, mut tail) = self.list_meta(Some(&*tree), key)?;
        if list_len(head, tail) == 0 {
            return Ok(None);
        }

        let seq = match side {
            ListSide::Left => head + 1,
            ListSide::Right => tail - 1,
        };
        let value = self.list_element(tree, seq, key)?;
        self.delete_element(tree, seq, key)?;

        match side {
            ListSide::Left => head += 1,
            ListSide::Right => tail -= 1,
        }
        if list_len(head, tail) == 0 {
            (head, tail) = EMPTY_META;
        }
        self.write_list_meta(tree, key, head, tail)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_translation() {
        // Three elements at MID, MID+1, MID+2.
        let (head, tail) = (LIST_MID - 1, LIST_MID + 3);
        assert_eq!(list_seq(head, tail, 0).unwrap(), LIST_MID);
        assert_eq!(list_seq(head, tail, 2).unwrap(), LIST_MID + 2);
        assert_eq!(list_seq(head, tail, -1).unwrap(), LIST_MID + 2);
        assert_eq!(list_seq(head, tail, -3).unwrap(), LIST_MID);
        assert!(matches!(list_seq(head, tail, 3), Err(StorageError::IndexOutOfRange)));
        assert!(matches!(list_seq(head, tail, -4), Err(StorageError::IndexOutOfRange)));
    }

    #[test]
    fn test_empty_list_has_no_valid_index() {
        let (head, tail) = EMPTY_META;
        assert_eq!(list_len(head, tail), 0);
        assert!(list_seq(head, tail, 0).is_err());
        assert!(list_seq(head, tail, -1).is_err());
    }
}
