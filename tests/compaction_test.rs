//! Compaction Tests
//!
//! Tests space reclamation, tombstone handling and the background scheduler

use ledgerkv::index::ValueLocation;
use ledgerkv::logfile::LogFile;
use ledgerkv::{DataType, Engine, Options};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const THRESHOLD: i64 = 1024;

fn opts(dir: &Path) -> Options {
    Options::builder(dir)
        .log_file_size_threshold(THRESHOLD)
        .log_file_gc_interval(Duration::ZERO)
        .build()
}

fn value(i: usize) -> Vec<u8> {
    format!("{:0>100}", i).into_bytes()
}

/// Test: Overwriting one key, then compacting, reclaims every archived segment
#[test]
fn test_compaction_reclaims_overwritten_segments() {
    println!("\n=== Test: Compaction Reclaims Space ===\n");

    let dir = tempdir().unwrap();
    let engine = Engine::open(opts(dir.path())).unwrap();

    for i in 0..50 {
        engine.set(b"k", &value(i)).unwrap();
    }
    let before = engine.segment_ids(DataType::Str);
    assert!(before.len() > 2);
    let active = *before.last().unwrap();

    let stats = engine.compact(DataType::Str, 0.5).unwrap();
    assert_eq!(stats.segments_compacted, before.len() - 1);
    assert_eq!(stats.entries_rewritten, 0);
    assert!(stats.bytes_reclaimed > 0);

    assert_eq!(engine.segment_ids(DataType::Str), vec![active]);
    for &fid in &before[..before.len() - 1] {
        assert!(!LogFile::segment_path(dir.path(), DataType::Str, fid).exists());
        assert_eq!(engine.discard(DataType::Str).slot(fid).unwrap(), None);
    }
    assert_eq!(engine.get(b"k").unwrap(), Some(value(49)));
    assert_eq!(
        engine.metrics().segments_reclaimed.get(),
        stats.segments_compacted as u64
    );

    engine.close().unwrap();

    let engine = Engine::open(opts(dir.path())).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(value(49)));

    println!("✓ {} segments reclaimed", stats.segments_compacted);
}

/// Test: Live records in a reclaimed segment move to the active segment
#[test]
fn test_live_records_are_rewritten() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(opts(dir.path())).unwrap();

    // Two keys that survive, then churn that makes segment 1 mostly garbage
    engine.set(b"keep1", b"first").unwrap();
    engine.set(b"keep2", b"second").unwrap();
    for i in 0..30 {
        engine.set(b"churn", &value(i)).unwrap();
    }
    assert!(engine.segment_ids(DataType::Str).len() > 2);

    let syncs = engine.metrics().segment_syncs.get();
    let stats = engine.compact(DataType::Str, 0.5).unwrap();
    assert!(stats.segments_compacted >= 1);
    assert_eq!(stats.entries_rewritten, 2);
    // The active segment is flushed before each reclaimed segment is deleted
    assert!(engine.metrics().segment_syncs.get() >= syncs + stats.segments_compacted as u64);
    assert!(!LogFile::segment_path(dir.path(), DataType::Str, 1).exists());

    assert_eq!(engine.get(b"keep1").unwrap(), Some(b"first".to_vec()));
    assert_eq!(engine.get(b"keep2").unwrap(), Some(b"second".to_vec()));
    assert_eq!(engine.get(b"churn").unwrap(), Some(value(29)));
    engine.close().unwrap();

    let engine = Engine::open(opts(dir.path())).unwrap();
    assert_eq!(engine.get(b"keep1").unwrap(), Some(b"first".to_vec()));
    assert_eq!(engine.get(b"keep2").unwrap(), Some(b"second".to_vec()));
    assert_eq!(engine.get(b"churn").unwrap(), Some(value(29)));
}

/// Fill segment 1 with `a` plus live padding, delete `a` in segment 2,
/// then churn until segment 2 is archived and mostly obsolete.
fn tombstone_layout(engine: &Engine, rewrite_a: bool) {
    engine.set(b"a", &value(0)).unwrap();
    let mut i = 0;
    while engine.segment_ids(DataType::Str).len() < 2 {
        engine.set(format!("pad{}", i).as_bytes(), &value(i)).unwrap();
        i += 1;
    }
    engine.delete(b"a").unwrap();
    if rewrite_a {
        engine.set(b"a", b"again").unwrap();
    }
    for i in 0..30 {
        engine.set(b"churn", &value(i)).unwrap();
    }
}

/// Test: A tombstone whose older value is still on disk survives compaction
#[test]
fn test_tombstone_carried_forward() {
    println!("\n=== Test: Tombstone Carry-Forward ===\n");

    let dir = tempdir().unwrap();
    {
        let engine = Engine::open(opts(dir.path())).unwrap();
        tombstone_layout(&engine, false);

        let stats = engine.compact(DataType::Str, 0.5).unwrap();
        assert!(stats.segments_compacted >= 1);
        assert!(stats.tombstones_carried >= 1);

        // Segment 1 still holds the original value of `a`
        assert!(LogFile::segment_path(dir.path(), DataType::Str, 1).exists());
        assert!(!LogFile::segment_path(dir.path(), DataType::Str, 2).exists());
        assert_eq!(engine.get(b"a").unwrap(), None);
        engine.close().unwrap();
    }

    let engine = Engine::open(opts(dir.path())).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"pad0").unwrap(), Some(value(0)));
    assert_eq!(engine.get(b"churn").unwrap(), Some(value(29)));

    println!("✓ Deleted key stays deleted after compaction and reopen");
}

/// Test: A tombstone shadowed by a later write is dropped
#[test]
fn test_superseded_tombstone_dropped() {
    let dir = tempdir().unwrap();
    {
        let engine = Engine::open(opts(dir.path())).unwrap();
        tombstone_layout(&engine, true);

        let stats = engine.compact(DataType::Str, 0.5).unwrap();
        assert!(stats.segments_compacted >= 1);
        assert_eq!(engine.get(b"a").unwrap(), Some(b"again".to_vec()));
        engine.close().unwrap();
    }

    let engine = Engine::open(opts(dir.path())).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), Some(b"again".to_vec()));
}

/// Test: Container types keep their contents through compaction
#[test]
fn test_compaction_of_container_types() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(opts(dir.path())).unwrap();

    for i in 0..30 {
        engine.hset(b"H", &[b"f".to_vec(), value(i)]).unwrap();
        engine.rpush(b"L", &[value(i)]).unwrap();
        engine.lpop(b"L").unwrap();
        engine.sadd(b"S", &[value(i)]).unwrap();
        engine.srem(b"S", &[value(i)]).unwrap();
        engine.zadd(b"Z", i as f64, &value(0)).unwrap();
    }
    engine.hset(b"H", &["g", "kept"]).unwrap();
    engine.rpush(b"L", &["tail"]).unwrap();
    engine.sadd(b"S", &["member"]).unwrap();
    engine.zadd(b"Z", 0.5, b"low").unwrap();

    for dt in [DataType::Hash, DataType::List, DataType::Set, DataType::ZSet] {
        assert!(engine.segment_ids(dt).len() > 1, "{} did not rotate", dt);
        let stats = engine.compact(dt, 0.5).unwrap();
        assert!(stats.segments_compacted >= 1, "{} compacted nothing", dt);
    }

    check_containers(&engine);
    engine.close().unwrap();

    let engine = Engine::open(opts(dir.path())).unwrap();
    check_containers(&engine);
}

fn check_containers(engine: &Engine) {
    assert_eq!(engine.hget(b"H", b"f").unwrap(), Some(value(29)));
    assert_eq!(engine.hget(b"H", b"g").unwrap(), Some(b"kept".to_vec()));
    assert_eq!(engine.lrange(b"L", 0, -1).unwrap(), vec![b"tail".to_vec()]);
    assert_eq!(engine.smembers(b"S").unwrap(), vec![b"member".to_vec()]);
    assert_eq!(
        engine.zrange_with_scores(b"Z", 0, -1).unwrap(),
        vec![(b"low".to_vec(), 0.5), (value(0), 29.0)]
    );
}

/// Test: Segments below the ratio are left alone
#[test]
fn test_ratio_threshold_respected() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(opts(dir.path())).unwrap();

    for i in 0..30 {
        engine.set(format!("unique{}", i).as_bytes(), &value(i)).unwrap();
    }
    let before = engine.segment_ids(DataType::Str);
    assert!(before.len() > 1);

    let stats = engine.compact(DataType::Str, 0.5).unwrap();
    assert_eq!(stats.segments_compacted, 0);
    assert_eq!(engine.segment_ids(DataType::Str), before);
}

/// Test: Reclaimed discard slots are handed out again
#[test]
fn test_discard_slots_reused() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(opts(dir.path())).unwrap();
    let discard = engine.discard(DataType::Str);
    let initial_free = discard.free_slots();

    for i in 0..50 {
        engine.set(b"k", &value(i)).unwrap();
    }
    let segments = engine.segment_ids(DataType::Str).len();
    assert_eq!(discard.free_slots(), initial_free - (segments - 1));

    engine.compact(DataType::Str, 0.5).unwrap();
    assert_eq!(discard.free_slots(), initial_free);

    // An overwrite racing the compaction reports a location in segment 1
    // after its slot was released; the update must not claim a new slot
    discard.send(ValueLocation {
        segment_id: 1,
        offset: 0,
        size: 100,
    });
    discard.drain();
    assert_eq!(discard.slot(1).unwrap(), None);
    assert_eq!(discard.free_slots(), initial_free);

    for i in 0..20 {
        engine.set(b"k", &value(i)).unwrap();
    }
    let segments = engine.segment_ids(DataType::Str).len();
    assert_eq!(discard.free_slots(), initial_free - (segments - 1));
}

/// Test: The background scheduler compacts without being asked
#[test]
fn test_scheduler_compacts_in_background() {
    let dir = tempdir().unwrap();
    let opts = Options::builder(dir.path())
        .log_file_size_threshold(THRESHOLD)
        .log_file_gc_interval(Duration::from_millis(50))
        .log_file_gc_ratio(0.5)
        .build();
    let engine = Engine::open(opts).unwrap();

    for i in 0..50 {
        engine.set(b"k", &value(i)).unwrap();
    }

    let mut reclaimed = false;
    for _ in 0..40 {
        thread::sleep(Duration::from_millis(50));
        if !LogFile::segment_path(dir.path(), DataType::Str, 1).exists() {
            reclaimed = true;
            break;
        }
    }
    assert!(reclaimed, "segment 1 was never compacted");
    assert_eq!(engine.get(b"k").unwrap(), Some(value(49)));
    engine.close().unwrap();
}

/// Test: Compaction runs alongside writers without losing updates
#[test]
fn test_compaction_with_concurrent_writers() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(opts(dir.path())).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..100 {
                    engine
                        .set(format!("w{}", t).as_bytes(), &value(i))
                        .unwrap();
                }
            })
        })
        .collect();

    for _ in 0..10 {
        engine.compact(DataType::Str, 0.5).ok();
        thread::sleep(Duration::from_millis(1));
    }
    for writer in writers {
        writer.join().unwrap();
    }
    engine.compact(DataType::Str, 0.5).unwrap();

    for t in 0..4 {
        assert_eq!(
            engine.get(format!("w{}", t).as_bytes()).unwrap(),
            Some(value(99))
        );
    }
    engine.close().unwrap();

    let engine = Engine::open(opts(dir.path())).unwrap();
    for t in 0..4 {
        assert_eq!(
            engine.get(format!("w{}", t).as_bytes()).unwrap(),
            Some(value(99))
        );
    }
}
