//! Sorted set data type tests

use ledgerkv::{Engine, Options, StorageError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn open(dir: &Path) -> Arc<Engine> {
    let opts = Options::builder(dir)
        .log_file_gc_interval(Duration::ZERO)
        .build();
    Engine::open(opts).unwrap()
}

fn strings(members: Vec<Vec<u8>>) -> Vec<String> {
    members
        .into_iter()
        .map(|m| String::from_utf8(m).unwrap())
        .collect()
}

/// Test: Re-scoring a member keeps a single entry
#[test]
fn test_rescore_keeps_one_entry() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    assert!(engine.zadd(b"Z", 1.0, b"a").unwrap());
    assert!(!engine.zadd(b"Z", 2.0, b"a").unwrap());
    assert!(!engine.zadd(b"Z", 2.0, b"a").unwrap());

    assert_eq!(engine.zcard(b"Z").unwrap(), 1);
    assert_eq!(engine.zscore(b"Z", b"a").unwrap(), Some(2.0));
    assert_eq!(engine.zrange_with_scores(b"Z", 0, -1).unwrap(), vec![(b"a".to_vec(), 2.0)]);

    println!("✓ Re-score keeps one entry");
}

/// Test: Rank order, ties broken by member
#[test]
fn test_ranges_and_ranks() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    engine.zadd(b"Z", 2.0, b"a").unwrap();
    engine.zadd(b"Z", 1.5, b"b").unwrap();
    engine.zadd(b"Z", 3.0, b"c").unwrap();
    engine.zadd(b"Z", 1.5, b"aa").unwrap();
    engine.zadd(b"Z", -4.0, b"neg").unwrap();

    assert_eq!(strings(engine.zrange(b"Z", 0, -1).unwrap()), ["neg", "aa", "b", "a", "c"]);
    assert_eq!(strings(engine.zrevrange(b"Z", 0, -1).unwrap()), ["c", "a", "b", "aa", "neg"]);
    assert_eq!(strings(engine.zrange(b"Z", 1, 2).unwrap()), ["aa", "b"]);
    assert_eq!(strings(engine.zrange(b"Z", -2, -1).unwrap()), ["a", "c"]);
    assert_eq!(strings(engine.zrevrange(b"Z", 0, 1).unwrap()), ["c", "a"]);
    assert!(engine.zrange(b"Z", 10, 20).unwrap().is_empty());

    assert_eq!(
        engine.zrevrange_with_scores(b"Z", 0, 0).unwrap(),
        vec![(b"c".to_vec(), 3.0)]
    );

    assert_eq!(engine.zrank(b"Z", b"neg").unwrap(), Some(0));
    assert_eq!(engine.zrank(b"Z", b"a").unwrap(), Some(3));
    assert_eq!(engine.zrevrank(b"Z", b"a").unwrap(), Some(1));
    assert_eq!(engine.zrank(b"Z", b"missing").unwrap(), None);
    assert_eq!(engine.zrank(b"nothing", b"a").unwrap(), None);
}

/// Test: zrem updates ranks and cardinality
#[test]
fn test_zrem() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    engine.zadd(b"Z", 1.0, b"a").unwrap();
    engine.zadd(b"Z", 2.0, b"b").unwrap();

    assert!(engine.zrem(b"Z", b"a").unwrap());
    assert!(!engine.zrem(b"Z", b"a").unwrap());
    assert_eq!(engine.zcard(b"Z").unwrap(), 1);
    assert_eq!(engine.zscore(b"Z", b"a").unwrap(), None);
    assert_eq!(engine.zrank(b"Z", b"b").unwrap(), Some(0));

    assert!(engine.zrem(b"Z", b"b").unwrap());
    assert_eq!(engine.zcard(b"Z").unwrap(), 0);
    assert!(engine.zrange(b"Z", 0, -1).unwrap().is_empty());

    // The member can come back after removal
    assert!(engine.zadd(b"Z", 5.0, b"a").unwrap());
    assert_eq!(engine.zscore(b"Z", b"a").unwrap(), Some(5.0));
}

/// Test: NaN scores are rejected
#[test]
fn test_nan_rejected() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    assert!(matches!(
        engine.zadd(b"Z", f64::NAN, b"a"),
        Err(StorageError::InvalidArgument(_))
    ));
    assert_eq!(engine.zcard(b"Z").unwrap(), 0);

    engine.zadd(b"Z", f64::INFINITY, b"top").unwrap();
    engine.zadd(b"Z", f64::NEG_INFINITY, b"bottom").unwrap();
    assert_eq!(strings(engine.zrange(b"Z", 0, -1).unwrap()), ["bottom", "top"]);
}
