//! Data-type codecs
//!
//! Each submodule adds the operations of one logical structure to [`Engine`]
//! and decides how they become log records and index updates:
//!
//! | type   | log key                         | log value      | index key        |
//! |--------|---------------------------------|----------------|------------------|
//! | string | key                             | value          | key              |
//! | list   | `u32_le(seq) \| key`            | element        | log key          |
//! | list   | key (meta record)               | head \| tail   | key              |
//! | hash   | `varint \| varint \| key \| field` | value       | field            |
//! | set    | key                             | member         | member hash      |
//! | zset   | `varint \| varint \| key \| score` | member      | member hash      |
//!
//! [`Engine`]: crate::Engine

pub mod hash;
pub mod list;
pub mod set;
pub mod strs;
pub mod zset;

use std::collections::HashMap;

use crate::index::Index;
use crate::{Result, StorageError};

/// Run `f` on the index of container `key`, creating it on first write.
/// A container created here is dropped again if `f` fails before anything
/// was written into it.
pub(crate) fn with_container<T>(
    containers: &mut HashMap<Vec<u8>, Index>,
    key: &[u8],
    f: impl FnOnce(&mut Index) -> Result<T>,
) -> Result<T> {
    let existed = containers.contains_key(key);
    let tree = containers.entry(key.to_vec()).or_default();
    let result = f(&mut *tree);
    if result.is_err() && !existed && tree.is_empty() {
        containers.remove(key);
    }
    result
}

/// Split a flat `[k1, v1, k2, v2, ...]` argument list into pairs.
pub(crate) fn pairs<K: AsRef<[u8]>>(args: &[K]) -> Result<Vec<(&[u8], &[u8])>> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(StorageError::WrongNumberOfArgs);
    }
    Ok(args
        .chunks_exact(2)
        .map(|pair| (pair[0].as_ref(), pair[1].as_ref()))
        .collect())
}

/// Parse a stored counter; a missing value counts as zero.
pub(crate) fn parse_int(value: Option<&[u8]>) -> Result<i64> {
    match value {
        None => Ok(0),
        Some(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(StorageError::NotInteger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_arity() {
        assert_eq!(pairs(&["a", "1", "b", "2"]).unwrap().len(), 2);
        assert!(matches!(pairs(&["a", "1", "b"]), Err(StorageError::WrongNumberOfArgs)));
        assert!(matches!(pairs::<&str>(&[]), Err(StorageError::WrongNumberOfArgs)));
    }

    #[test]
    fn test_failed_first_write_leaves_no_container() {
        let mut containers: HashMap<Vec<u8>, Index> = HashMap::new();
        let failed: Result<()> = with_container(&mut containers, b"new", |_| Err(StorageError::Closed));
        assert!(failed.is_err());
        assert!(!containers.contains_key(b"new".as_slice()));

        // An existing container stays even when empty.
        containers.insert(b"old".to_vec(), Index::new());
        let failed: Result<()> = with_container(&mut containers, b"old", |_| Err(StorageError::Closed));
        assert!(failed.is_err());
        assert!(containers.contains_key(b"old".as_slice()));

        let created = with_container(&mut containers, b"new", |_| Ok(1)).unwrap();
        assert_eq!(created, 1);
        assert!(containers.contains_key(b"new".as_slice()));
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(None).unwrap(), 0);
        assert_eq!(parse_int(Some(b"-42")).unwrap(), -42);
        assert!(matches!(parse_int(Some(b"4x")), Err(StorageError::NotInteger)));
        assert!(matches!(
            parse_int(Some(b"99999999999999999999")),
            Err(StorageError::NotInteger)
        ));
    }
}
