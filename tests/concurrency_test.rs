//! Concurrency Tests
//!
//! Many threads sharing one engine through an `Arc`

use ledgerkv::{Engine, Options};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn open(dir: &Path) -> Arc<Engine> {
    let opts = Options::builder(dir)
        .log_file_size_threshold(64 << 10)
        .log_file_gc_interval(Duration::ZERO)
        .build();
    Engine::open(opts).unwrap()
}

/// Test: Concurrent increments of one key are never lost
#[test]
fn test_concurrent_incr() {
    println!("\n=== Test: Concurrent Increments ===\n");

    const THREADS: usize = 8;
    const PER_THREAD: usize = 250;

    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    engine.incr(b"counter").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = (THREADS * PER_THREAD).to_string();
    assert_eq!(engine.get(b"counter").unwrap(), Some(expected.clone().into_bytes()));
    engine.close().unwrap();

    let engine = open(dir.path());
    assert_eq!(engine.get(b"counter").unwrap(), Some(expected.into_bytes()));

    println!("✓ {} increments", THREADS * PER_THREAD);
}

/// Test: Pushes from many threads all land in the list
#[test]
fn test_concurrent_list_pushes() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 100;

    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let value = format!("{}-{}", t, i);
                    if t % 2 == 0 {
                        engine.lpush(b"L", &[value]).unwrap();
                    } else {
                        engine.rpush(b"L", &[value]).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.llen(b"L").unwrap(), THREADS * PER_THREAD);
    let mut all = engine.lrange(b"L", 0, -1).unwrap();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), THREADS * PER_THREAD);
}

/// Test: Readers and writers of different types run side by side
#[test]
fn test_mixed_types_in_parallel() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..200 {
                    let member = format!("m{}", i);
                    match t {
                        0 => engine.set(format!("k{}", i).as_bytes(), b"v").unwrap(),
                        1 => {
                            engine.hset(b"H", &[member.as_str(), "v"]).unwrap();
                        }
                        2 => {
                            engine.sadd(b"S", &[member.as_str()]).unwrap();
                        }
                        _ => {
                            engine.zadd(b"Z", i as f64, member.as_bytes()).unwrap();
                        }
                    }
                }
            })
        })
        .collect();

    let reader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..200 {
                engine.count().unwrap();
                engine.hlen(b"H").unwrap();
                engine.scard(b"S").unwrap();
                engine.zrange(b"Z", 0, 10).unwrap();
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(engine.count().unwrap(), 200);
    assert_eq!(engine.hlen(b"H").unwrap(), 200);
    assert_eq!(engine.scard(b"S").unwrap(), 200);
    assert_eq!(engine.zcard(b"Z").unwrap(), 200);
    assert_eq!(engine.zrank(b"Z", b"m199").unwrap(), Some(199));
}

/// Test: Closing while other threads are still issuing operations
#[test]
fn test_close_while_busy() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut ok = 0;
                for i in 0..10_000 {
                    match engine.set(format!("{}-{}", t, i).as_bytes(), b"v") {
                        Ok(()) => ok += 1,
                        Err(ledgerkv::StorageError::Closed) => break,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                ok
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(5));
    engine.close().unwrap();

    let written: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    drop(engine);

    // Everything acknowledged before close is on disk
    let engine = open(dir.path());
    assert_eq!(engine.count().unwrap(), written);
}
