//! Compaction: reclaiming space from archived segments
//!
//! # Algorithm
//!
//! 1. Drain and sync the type's discard file
//! 2. Select archived segments with `discarded / total >= ratio`, lowest id first
//! 3. Replay each candidate; a record the index still points at is rewritten
//!    into the active segment and the index moved to the copy
//! 4. Remove the segment from the archived map, delete its file, free its
//!    discard slot
//!
//! Rewrites go through the type's write lock one record at a time, so
//! application writers interleave freely with a running compaction and the
//! index always holds the newest writer.
//!
//! # Tombstones
//!
//! A delete record (or an expired put) can only be dropped once no older
//! segment of the type could still hold a value for the same key. While a
//! lower-numbered segment exists, such records are carried forward into the
//! active segment and immediately counted as discarded there. A tombstone
//! whose key has been written again since is dropped instead.

use crossbeam_channel::{bounded, select, tick, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::encoding::{decode_key, decode_list_key, member_hash, now_secs};
use crate::engine::Engine;
use crate::index::{Index, ValueLocation};
use crate::logfile::{EntryKind, LogEntry, LogFile};
use crate::{DataType, Result, StorageError};

/// Compaction statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompactionStats {
    pub segments_compacted: usize,
    pub bytes_reclaimed: u64,
    pub entries_scanned: usize,
    pub entries_rewritten: usize,
    pub entries_dropped: usize,
    pub tombstones_carried: usize,
    pub duration_ms: u64,
}

/// What happened to one record of a segment being compacted.
enum Outcome {
    Rewritten,
    Dropped,
    Carried,
}

/// Clears a type's in-progress flag when the cycle ends, however it ends.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Engine {
    /// Run one compaction cycle for `data_type` now.
    ///
    /// Fails with `CompactionInProgress` if the scheduler (or another caller)
    /// is already compacting this type.
    pub fn compact(&self, data_type: DataType, ratio: f64) -> Result<CompactionStats> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        let flag = &self.gc_running[data_type.index()];
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StorageError::CompactionInProgress(data_type.name()));
        }
        let _running = RunningFlag(flag);

        let start = Instant::now();
        let metrics = self.metrics();
        let discard = self.discard(data_type);
        discard.drain();
        discard.sync()?;

        let active_fid = self.active_segment(data_type)?.fid();
        let candidates = discard.compaction_candidates(active_fid, ratio)?;
        let mut stats = CompactionStats::default();

        for fid in candidates {
            let (segment, has_older) = {
                let segments = self.segments.read();
                let archived = segments.archived.get(&data_type);
                let segment = archived.and_then(|s| s.get(&fid)).cloned();
                let has_older = archived.map_or(false, |s| s.range(..fid).next().is_some());
                (segment, has_older)
            };

            let segment = match segment {
                Some(segment) => segment,
                None => {
                    // Slot left behind by a segment that no longer exists.
                    discard.clear(fid)?;
                    continue;
                }
            };

            let seg_start = Instant::now();
            let before = stats.clone();
            self.compact_segment(data_type, &segment, has_older, &mut stats)?;
            // Relocated records must be durable before their old copy goes.
            self.sync_segment(&*self.active_segment(data_type)?)?;

            {
                let mut segments = self.segments.write();
                if let Some(archived) = segments.archived.get_mut(&data_type) {
                    archived.remove(&fid);
                }
                let archived: usize = segments.archived.values().map(|s| s.len()).sum();
                metrics.archived_segments.set(archived as u64);
            }

            let reclaimed = std::fs::metadata(segment.path()).map(|m| m.len()).unwrap_or(0);
            segment.close()?;
            segment.delete()?;
            discard.clear(fid)?;

            stats.segments_compacted += 1;
            stats.bytes_reclaimed += reclaimed;
            metrics.segments_reclaimed.inc();
            metrics.compaction_bytes_reclaimed.add(reclaimed);

            debug!(
                data_type = %data_type,
                fid,
                rewritten = stats.entries_rewritten - before.entries_rewritten,
                dropped = stats.entries_dropped - before.entries_dropped,
                carried = stats.tombstones_carried - before.tombstones_carried,
                elapsed_ms = seg_start.elapsed().as_millis() as u64,
                "segment compacted"
            );
        }

        let elapsed = start.elapsed();
        stats.duration_ms = elapsed.as_millis() as u64;
        metrics.compactions_total.inc();
        metrics.compaction_duration.observe(elapsed);
        metrics
            .compaction_entries_rewritten
            .add(stats.entries_rewritten as u64);

        if stats.segments_compacted > 0 {
            info!(
                data_type = %data_type,
                segments = stats.segments_compacted,
                reclaimed_bytes = stats.bytes_reclaimed,
                rewritten = stats.entries_rewritten,
                dropped = stats.entries_dropped,
                duration_ms = stats.duration_ms,
                "compaction complete"
            );
        }
        Ok(stats)
    }

    fn compact_segment(
        &self,
        data_type: DataType,
        segment: &LogFile,
        has_older: bool,
        stats: &mut CompactionStats,
    ) -> Result<()> {
        let now = now_secs();
        let mut offset = 0i64;
        while let Some((entry, size)) = segment.read_entry(offset)? {
            let loc = ValueLocation {
                segment_id: segment.fid(),
                offset,
                size: size as i32,
            };
            offset += size;
            stats.entries_scanned += 1;

            match self.rewrite_entry(data_type, &entry, loc, has_older, now)? {
                Outcome::Rewritten => stats.entries_rewritten += 1,
                Outcome::Dropped => stats.entries_dropped += 1,
                Outcome::Carried => stats.tombstones_carried += 1,
            }
        }
        Ok(())
    }

    /// Find the index that owns `entry` and relocate it under the type lock.
    fn rewrite_entry(
        &self,
        data_type: DataType,
        entry: &LogEntry,
        loc: ValueLocation,
        carry: bool,
        now: i64,
    ) -> Result<Outcome> {
        match data_type {
            DataType::Str => {
                let mut strs = self.write_guard(&self.strs)?;
                self.relocate(data_type, Some(&mut *strs), &entry.key, entry, loc, carry, now)
            }
            DataType::List => {
                let mut lists = self.write_guard(&self.lists)?;
                let container = match entry.kind {
                    EntryKind::ListMeta => entry.key.as_slice(),
                    _ => decode_list_key(&entry.key)?.1,
                };
                self.relocate(data_type, lists.get_mut(container), &entry.key, entry, loc, carry, now)
            }
            DataType::Hash => {
                let mut hashes = self.write_guard(&self.hashes)?;
                let (container, field) = decode_key(&entry.key)?;
                self.relocate(data_type, hashes.get_mut(container), field, entry, loc, carry, now)
            }
            DataType::Set => {
                let mut sets = self.write_guard(&self.sets)?;
                let hash = member_hash(&entry.value);
                self.relocate(data_type, sets.get_mut(&entry.key), &hash, entry, loc, carry, now)
            }
            DataType::ZSet => {
                let mut zsets = self.write_guard(&self.zsets)?;
                let (container, _) = decode_key(&entry.key)?;
                let hash = member_hash(&entry.value);
                self.relocate(data_type, zsets.trees.get_mut(container), &hash, entry, loc, carry, now)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn relocate(
        &self,
        data_type: DataType,
        tree: Option<&mut Index>,
        index_key: &[u8],
        entry: &LogEntry,
        loc: ValueLocation,
        carry: bool,
        now: i64,
    ) -> Result<Outcome> {
        if entry.kind == EntryKind::Delete {
            // A later write to the same key already shadows this tombstone;
            // carrying it past that write would delete the newer value.
            if tree.as_deref().map_or(false, |t| t.contains(index_key)) {
                return Ok(Outcome::Dropped);
            }
            return self.carry_forward(data_type, entry, carry);
        }

        let tree = match tree {
            Some(tree) => tree,
            None => return Ok(Outcome::Dropped),
        };
        let live = tree.get(index_key).map_or(false, |node| node.points_at(&loc));
        if !live {
            return Ok(Outcome::Dropped);
        }

        if entry.is_expired(now) {
            tree.delete(index_key);
            return self.carry_forward(data_type, entry, carry);
        }

        let new_loc = self.write_log_entry(entry, data_type)?;
        if let Some(node) = tree.get_mut(index_key) {
            node.location = new_loc;
        }
        Ok(Outcome::Rewritten)
    }

    /// Keep a record that only shadows older data, if older data may exist.
    fn carry_forward(&self, data_type: DataType, entry: &LogEntry, carry: bool) -> Result<Outcome> {
        if !carry {
            return Ok(Outcome::Dropped);
        }
        let new_loc = self.write_log_entry(entry, data_type)?;
        self.discard_location(data_type, new_loc);
        Ok(Outcome::Carried)
    }
}

/// Background thread running a compaction cycle for every data type on a
/// fixed interval.
///
/// Holds only a `Weak` engine reference, so it never keeps a dropped engine
/// alive. Shutdown is checked between data types; a type already being
/// compacted runs to the end of its candidate list.
pub(crate) struct CompactionScheduler {
    shutdown_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CompactionScheduler {
    pub fn start(engine: Weak<Engine>, interval: Duration, ratio: f64) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("ledgerkv-gc".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                let mut run_id = 0u64;
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let engine = match engine.upgrade() {
                                Some(engine) => engine,
                                None => break,
                            };
                            run_id += 1;
                            if !run_cycle(&engine, ratio, run_id, || {
                                !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty))
                            }) {
                                break;
                            }
                        }
                    }
                }
                debug!("compaction scheduler stopped");
            })?;

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it, unless called from the thread itself
    /// (the last engine reference can be dropped there).
    pub fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("compaction scheduler panicked");
            }
        }
    }
}

/// One scheduled pass over every data type. Returns false when the scheduler
/// should exit.
fn run_cycle(engine: &Arc<Engine>, ratio: f64, run_id: u64, shutdown: impl Fn() -> bool) -> bool {
    for data_type in DataType::ALL {
        if shutdown() {
            return false;
        }
        match engine.compact(data_type, ratio) {
            Ok(_) => {}
            Err(StorageError::CompactionInProgress(_)) => {
                debug!(run_id, data_type = %data_type, "compaction already running, skipped");
            }
            Err(StorageError::Closed) => return false,
            Err(e) => {
                error!(run_id, data_type = %data_type, error = %e, "compaction cycle failed");
            }
        }
    }
    true
}
