//! String data type tests
//!
//! Tests the public string API end to end against a temporary directory

use ledgerkv::{Engine, Options, StorageError};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn open(dir: &Path) -> Arc<Engine> {
    let opts = Options::builder(dir)
        .log_file_gc_interval(Duration::ZERO)
        .build();
    Engine::open(opts).unwrap()
}

/// Test: Set, get and delete round trip
#[test]
fn test_set_get_delete() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    assert_eq!(engine.get(b"missing").unwrap(), None);

    engine.set(b"name", b"ledger").unwrap();
    assert_eq!(engine.get(b"name").unwrap(), Some(b"ledger".to_vec()));

    engine.set(b"name", b"kv").unwrap();
    assert_eq!(engine.get(b"name").unwrap(), Some(b"kv".to_vec()));

    engine.delete(b"name").unwrap();
    assert_eq!(engine.get(b"name").unwrap(), None);

    // Deleting a missing key is not an error
    engine.delete(b"name").unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.reads_total.get(), 4);
    assert_eq!(metrics.reads_hits.get(), 2);

    println!("✓ Set/get/delete round trip");
}

/// Test: Counters start at zero and reject non-integers
#[test]
fn test_incr_decr() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    assert_eq!(engine.incr(b"n").unwrap(), 1);
    assert_eq!(engine.incr_by(b"n", 10).unwrap(), 11);
    assert_eq!(engine.decr(b"n").unwrap(), 10);
    assert_eq!(engine.decr_by(b"n", 25).unwrap(), -15);
    assert_eq!(engine.get(b"n").unwrap(), Some(b"-15".to_vec()));

    engine.set(b"word", b"abc").unwrap();
    assert!(matches!(engine.incr(b"word"), Err(StorageError::NotInteger)));
    assert_eq!(engine.get(b"word").unwrap(), Some(b"abc".to_vec()));
}

/// Test: Keys with a TTL disappear once it passes
#[test]
fn test_set_ex_expires() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    engine.set_ex(b"session", b"token", Duration::from_secs(2)).unwrap();
    assert_eq!(engine.get(b"session").unwrap(), Some(b"token".to_vec()));
    let ttl = engine.ttl(b"session").unwrap();
    assert!((1..=2).contains(&ttl), "ttl was {}", ttl);

    thread::sleep(Duration::from_millis(3100));

    assert_eq!(engine.get(b"session").unwrap(), None);
    assert_eq!(engine.ttl(b"session").unwrap(), -2);
    assert!(!engine.keys().unwrap().contains(&b"session".to_vec()));

    assert!(matches!(
        engine.set_ex(b"k", b"v", Duration::ZERO),
        Err(StorageError::InvalidArgument(_))
    ));

    println!("✓ TTL expiry hides the key");
}

/// Test: expire, persist and ttl reporting
#[test]
fn test_expire_and_persist() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    assert!(!engine.expire(b"nope", Duration::from_secs(10)).unwrap());
    assert_eq!(engine.ttl(b"nope").unwrap(), -2);

    engine.set(b"k", b"v").unwrap();
    assert_eq!(engine.ttl(b"k").unwrap(), -1);
    assert!(!engine.persist(b"k").unwrap());

    assert!(engine.expire(b"k", Duration::from_secs(100)).unwrap());
    let ttl = engine.ttl(b"k").unwrap();
    assert!((99..=100).contains(&ttl), "ttl was {}", ttl);

    assert!(engine.persist(b"k").unwrap());
    assert_eq!(engine.ttl(b"k").unwrap(), -1);
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));

    // Zero TTL removes the key outright
    assert!(engine.expire(b"k", Duration::ZERO).unwrap());
    assert_eq!(engine.get(b"k").unwrap(), None);
}

/// Test: set clears a TTL, append and incr keep it
#[test]
fn test_ttl_preservation() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    engine.set_ex(b"a", b"x", Duration::from_secs(100)).unwrap();
    assert_eq!(engine.append(b"a", b"yz").unwrap(), 3);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"xyz".to_vec()));
    assert!(engine.ttl(b"a").unwrap() > 0);

    engine.set_ex(b"n", b"1", Duration::from_secs(100)).unwrap();
    assert_eq!(engine.incr(b"n").unwrap(), 2);
    assert!(engine.ttl(b"n").unwrap() > 0);

    engine.set(b"a", b"plain").unwrap();
    assert_eq!(engine.ttl(b"a").unwrap(), -1);
}

/// Test: Multi-key writes and reads
#[test]
fn test_mset_mget() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    engine.mset(&["k1", "v1", "k2", "v2"]).unwrap();
    assert_eq!(
        engine.mget(&["k1", "k2", "k3"]).unwrap(),
        vec![Some(b"v1".to_vec()), Some(b"v2".to_vec()), None]
    );

    assert!(matches!(engine.mset(&["k1", "v1", "k2"]), Err(StorageError::WrongNumberOfArgs)));
    assert!(matches!(engine.mget::<&str>(&[]), Err(StorageError::WrongNumberOfArgs)));

    // One existing key blocks the whole batch
    assert!(!engine.mset_nx(&["k3", "v3", "k1", "other"]).unwrap());
    assert_eq!(engine.get(b"k3").unwrap(), None);
    assert_eq!(engine.get(b"k1").unwrap(), Some(b"v1".to_vec()));

    assert!(engine.mset_nx(&["k3", "v3", "k4", "v4"]).unwrap());
    assert_eq!(engine.get(b"k4").unwrap(), Some(b"v4".to_vec()));
}

/// Test: set_nx, get_del and str_len
#[test]
fn test_conditional_and_destructive_reads() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    assert!(engine.set_nx(b"k", b"first").unwrap());
    assert!(!engine.set_nx(b"k", b"second").unwrap());
    assert_eq!(engine.str_len(b"k").unwrap(), 5);
    assert_eq!(engine.str_len(b"missing").unwrap(), 0);

    assert_eq!(engine.get_del(b"k").unwrap(), Some(b"first".to_vec()));
    assert_eq!(engine.get_del(b"k").unwrap(), None);
    assert_eq!(engine.get(b"k").unwrap(), None);
}

/// Test: Prefix scan, count and key listing
#[test]
fn test_scan_and_keys() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    for key in ["user:3", "user:1", "order:1", "user:2"] {
        engine.set(key.as_bytes(), b"x").unwrap();
    }

    assert_eq!(engine.count().unwrap(), 4);

    let users: Vec<Vec<u8>> = engine
        .scan(b"user:", 0)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(users, vec![b"user:1".to_vec(), b"user:2".to_vec(), b"user:3".to_vec()]);

    assert_eq!(engine.scan(b"user:", 2).unwrap().len(), 2);
    assert!(engine.scan(b"nothing", 0).unwrap().is_empty());

    assert_eq!(engine.keys().unwrap().first().unwrap(), b"order:1");
}

/// Test: Every operation fails cleanly after close
#[test]
fn test_closed_engine_rejects_operations() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    engine.set(b"k", b"v").unwrap();
    engine.close().unwrap();

    assert!(matches!(engine.get(b"k"), Err(StorageError::Closed)));
    assert!(matches!(engine.set(b"k", b"v"), Err(StorageError::Closed)));
    assert!(matches!(engine.incr(b"n"), Err(StorageError::Closed)));
    assert!(matches!(engine.lpush(b"l", &["a"]), Err(StorageError::Closed)));
    assert!(matches!(engine.hget(b"h", b"f"), Err(StorageError::Closed)));
    assert!(matches!(engine.sadd(b"s", &["m"]), Err(StorageError::Closed)));
    assert!(matches!(engine.zadd(b"z", 1.0, b"m"), Err(StorageError::Closed)));
    assert!(matches!(
        engine.compact(ledgerkv::DataType::Str, 0.5),
        Err(StorageError::Closed)
    ));
}
