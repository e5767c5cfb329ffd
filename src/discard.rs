//! Discard tracking
//!
//! One side file per data type (`discard.<type>`) holds a fixed array of
//! 12-byte slots, no header:
//!
//! ```text
//! ┌──────────────┬─────────────┬─────────────────┐
//! │ fid (u32 LE) │ total (u32) │ discarded (u32) │
//! └──────────────┴─────────────┴─────────────────┘
//! ```
//!
//! An all-zero slot is free. The free list and the fid → slot map are rebuilt
//! by scanning the file at open. Writers never touch the file directly: they
//! push superseded locations into a bounded channel and a listener thread
//! applies them. A full channel drops the update (counted in
//! `discard_dropped`), so discard accounting is best effort.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

use crate::index::ValueLocation;
use crate::logfile::{FileIo, IoSelector};
use crate::metrics::Metrics;
use crate::{DataType, Result, StorageError};

/// Size of a discard file in bytes.
pub const DISCARD_FILE_SIZE: i64 = 2 << 12;

/// fid (4) + total (4) + discarded (4).
pub const DISCARD_RECORD_SIZE: i64 = 12;

pub const DISCARD_SLOTS: i64 = DISCARD_FILE_SIZE / DISCARD_RECORD_SIZE;

/// Message for the discard listener thread
enum DiscardMessage {
    Incr(ValueLocation),
    /// Reply once every earlier message has been applied.
    Barrier(Sender<()>),
    Shutdown,
}

struct DiscardState {
    io: FileIo,
    free_list: Vec<i64>,
    location: HashMap<u32, i64>,
}

impl DiscardState {
    fn read_slot(&self, offset: i64) -> Result<(u32, u32, u32)> {
        let mut buf = [0u8; DISCARD_RECORD_SIZE as usize];
        let n = self.io.read(&mut buf, offset)?;
        if n < buf.len() {
            return Err(StorageError::Corruption(format!(
                "discard slot at {} is truncated",
                offset
            )));
        }
        let field = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Ok((field(0), field(4), field(8)))
    }

    fn write_u32(&self, value: u32, offset: i64) -> Result<()> {
        self.io.write(&value.to_le_bytes(), offset)?;
        Ok(())
    }

    /// Slot offset for `fid`, claiming a free one on first use.
    fn alloc(&mut self, fid: u32) -> Result<i64> {
        if let Some(&offset) = self.location.get(&fid) {
            return Ok(offset);
        }
        let offset = self.free_list.pop().ok_or(StorageError::DiscardNoSpace)?;
        let mut slot = [0u8; DISCARD_RECORD_SIZE as usize];
        slot[..4].copy_from_slice(&fid.to_le_bytes());
        self.io.write(&slot, offset)?;
        self.location.insert(fid, offset);
        Ok(offset)
    }

    /// Add to an existing slot only. Slots are claimed by `set_total` when a
    /// segment becomes active, so an update for an unknown fid is either for
    /// an untracked segment or arrived after the segment was reclaimed.
    fn incr(&mut self, fid: u32, delta: u32) -> Result<bool> {
        let offset = match self.location.get(&fid) {
            Some(&offset) => offset,
            None => return Ok(false),
        };
        let (_, _, discarded) = self.read_slot(offset)?;
        self.write_u32(discarded.saturating_add(delta), offset + 8)?;
        Ok(true)
    }

    fn release(&mut self, fid: u32) -> Result<()> {
        if let Some(offset) = self.location.remove(&fid) {
            self.io.write(&[0u8; DISCARD_RECORD_SIZE as usize], offset)?;
            self.free_list.push(offset);
        }
        Ok(())
    }
}

/// Per-type tracker of obsolete bytes in each segment.
pub struct Discard {
    data_type: DataType,
    path: PathBuf,
    state: Arc<Mutex<DiscardState>>,
    tx: Sender<DiscardMessage>,
    listener: Mutex<Option<thread::JoinHandle<()>>>,
    metrics: Arc<Metrics>,
}

impl Discard {
    pub fn file_path(dir: &Path, data_type: DataType) -> PathBuf {
        dir.join(format!("discard.{}", data_type.name()))
    }

    /// Open (creating if needed) the discard file of `data_type` in `dir` and
    /// start its listener thread.
    pub fn open(dir: &Path, data_type: DataType, buffer_size: usize, metrics: Arc<Metrics>) -> Result<Self> {
        let path = Self::file_path(dir, data_type);
        let io = FileIo::open(&path, DISCARD_FILE_SIZE)?;

        let mut state = DiscardState {
            io,
            free_list: Vec::new(),
            location: HashMap::new(),
        };

        // Scan from the back so the lowest free slot is popped first.
        for slot in (0..DISCARD_SLOTS).rev() {
            let offset = slot * DISCARD_RECORD_SIZE;
            match state.read_slot(offset)? {
                (0, 0, 0) => state.free_list.push(offset),
                (fid, _, _) => {
                    state.location.insert(fid, offset);
                }
            }
        }

        debug!(
            data_type = %data_type,
            tracked = state.location.len(),
            free = state.free_list.len(),
            "discard file loaded"
        );

        let state = Arc::new(Mutex::new(state));
        let (tx, rx) = bounded(buffer_size);
        let listener = Self::spawn_listener(data_type, rx, Arc::clone(&state), Arc::clone(&metrics))?;

        Ok(Self {
            data_type,
            path,
            state,
            tx,
            listener: Mutex::new(Some(listener)),
            metrics,
        })
    }

    fn spawn_listener(
        data_type: DataType,
        rx: Receiver<DiscardMessage>,
        state: Arc<Mutex<DiscardState>>,
        metrics: Arc<Metrics>,
    ) -> Result<thread::JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name(format!("discard-{}", data_type.name()))
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        DiscardMessage::Incr(loc) => {
                            let delta = loc.size.max(0) as u32;
                            match state.lock().incr(loc.segment_id, delta) {
                                Ok(true) => metrics.discard_updates.inc(),
                                Ok(false) => debug!(
                                    data_type = %data_type,
                                    fid = loc.segment_id,
                                    "discard update for untracked segment ignored"
                                ),
                                Err(e) => error!(
                                    data_type = %data_type,
                                    fid = loc.segment_id,
                                    error = %e,
                                    "discard update failed"
                                ),
                            }
                        }
                        DiscardMessage::Barrier(reply) => {
                            let _ = reply.send(());
                        }
                        DiscardMessage::Shutdown => break,
                    }
                }
            })?;
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue `loc` as obsolete. Never blocks: a full queue drops the update.
    pub fn send(&self, loc: ValueLocation) {
        match self.tx.try_send(DiscardMessage::Incr(loc)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.discard_dropped.inc();
                warn!(
                    data_type = %self.data_type,
                    fid = loc.segment_id,
                    size = loc.size,
                    "discard queue full, update dropped"
                );
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Wait until every update queued so far has been applied.
    pub fn drain(&self) {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(DiscardMessage::Barrier(reply_tx)).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    /// Record the size budget of a segment that just became active.
    pub fn set_total(&self, fid: u32, total: u32) -> Result<()> {
        let mut state = self.state.lock();
        let offset = state.alloc(fid)?;
        state.write_u32(total, offset + 4)
    }

    /// Add `delta` obsolete bytes to `fid` synchronously. Returns whether
    /// `fid` is tracked.
    pub fn incr_discard(&self, fid: u32, delta: u32) -> Result<bool> {
        self.state.lock().incr(fid, delta)
    }

    /// Release the slot of a reclaimed segment.
    pub fn clear(&self, fid: u32) -> Result<()> {
        self.state.lock().release(fid)
    }

    /// Release every slot whose segment is not `live`; returns how many.
    pub fn retain(&self, live: impl Fn(u32) -> bool) -> Result<usize> {
        let mut state = self.state.lock();
        let stale: Vec<u32> = state.location.keys().copied().filter(|&fid| !live(fid)).collect();
        for &fid in &stale {
            state.release(fid)?;
        }
        Ok(stale.len())
    }

    /// `(total, discarded)` recorded for `fid`.
    pub fn slot(&self, fid: u32) -> Result<Option<(u32, u32)>> {
        let state = self.state.lock();
        match state.location.get(&fid) {
            Some(&offset) => {
                let (_, total, discarded) = state.read_slot(offset)?;
                Ok(Some((total, discarded)))
            }
            None => Ok(None),
        }
    }

    /// Archived segments whose discarded share reaches `ratio`, lowest fid first.
    pub fn compaction_candidates(&self, active_fid: u32, ratio: f64) -> Result<Vec<u32>> {
        let state = self.state.lock();
        let mut candidates = Vec::new();
        for (&fid, &offset) in &state.location {
            if fid >= active_fid {
                continue;
            }
            let (_, total, discarded) = state.read_slot(offset)?;
            if total == 0 {
                continue;
            }
            if discarded as f64 / total as f64 >= ratio {
                candidates.push(fid);
            }
        }
        candidates.sort_unstable();
        Ok(candidates)
    }

    pub fn free_slots(&self) -> usize {
        self.state.lock().free_list.len()
    }

    pub fn sync(&self) -> Result<()> {
        self.state.lock().io.sync()
    }

    /// Stop the listener after it has applied everything queued, then sync.
    pub fn close(&self) -> Result<()> {
        if let Some(handle) = self.listener.lock().take() {
            let _ = self.tx.send(DiscardMessage::Shutdown);
            if handle.join().is_err() {
                error!(data_type = %self.data_type, "discard listener panicked");
            }
        }
        self.sync()
    }
}

impl std::fmt::Debug for Discard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discard")
            .field("data_type", &self.data_type)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> Discard {
        Discard::open(dir, DataType::Hash, 64, Arc::new(Metrics::new())).unwrap()
    }

    fn loc(segment_id: u32, size: i32) -> ValueLocation {
        ValueLocation {
            segment_id,
            offset: 0,
            size,
        }
    }

    #[test]
    fn test_file_layout() {
        let dir = tempdir().unwrap();
        let discard = open(dir.path());
        assert_eq!(std::fs::metadata(discard.path()).unwrap().len(), 8192);
        assert_eq!(discard.free_slots(), 682);
        discard.close().unwrap();
    }

    #[test]
    fn test_queued_updates_are_applied() {
        let dir = tempdir().unwrap();
        let discard = open(dir.path());
        discard.set_total(1, 1000).unwrap();

        for _ in 0..10 {
            discard.send(loc(1, 30));
        }
        discard.drain();

        assert_eq!(discard.slot(1).unwrap(), Some((1000, 300)));
        discard.close().unwrap();
    }

    #[test]
    fn test_candidates_by_ratio() {
        let dir = tempdir().unwrap();
        let discard = open(dir.path());
        for fid in 1..=4 {
            discard.set_total(fid, 100).unwrap();
        }
        discard.incr_discard(1, 60).unwrap();
        discard.incr_discard(2, 10).unwrap();
        discard.incr_discard(3, 50).unwrap();
        discard.incr_discard(4, 90).unwrap();

        // fid 4 is the active segment and never a candidate.
        assert_eq!(discard.compaction_candidates(4, 0.5).unwrap(), vec![1, 3]);
        assert_eq!(discard.compaction_candidates(4, 0.55).unwrap(), vec![1]);
        discard.close().unwrap();
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let discard = open(dir.path());
            discard.set_total(7, 500).unwrap();
            discard.incr_discard(7, 123).unwrap();
            discard.close().unwrap();
        }

        let discard = open(dir.path());
        assert_eq!(discard.slot(7).unwrap(), Some((500, 123)));
        assert_eq!(discard.free_slots(), 681);
        discard.close().unwrap();
    }

    #[test]
    fn test_clear_frees_slot_for_reuse() {
        let dir = tempdir().unwrap();
        let discard = open(dir.path());
        discard.set_total(1, 100).unwrap();
        discard.incr_discard(1, 80).unwrap();

        discard.clear(1).unwrap();
        assert_eq!(discard.slot(1).unwrap(), None);
        assert_eq!(discard.free_slots(), 682);

        // A new segment starts from zero in the reused slot.
        discard.set_total(2, 100).unwrap();
        assert_eq!(discard.slot(2).unwrap(), Some((100, 0)));
        discard.close().unwrap();
    }

    #[test]
    fn test_late_update_for_reclaimed_segment_is_ignored() {
        let dir = tempdir().unwrap();
        let discard = open(dir.path());
        discard.set_total(1, 100).unwrap();
        discard.set_total(2, 100).unwrap();
        discard.clear(1).unwrap();
        let free = discard.free_slots();

        discard.send(loc(1, 40));
        discard.drain();

        assert_eq!(discard.slot(1).unwrap(), None);
        assert_eq!(discard.free_slots(), free);
        discard.close().unwrap();
    }

    #[test]
    fn test_retain_releases_stale_slots() {
        let dir = tempdir().unwrap();
        let discard = open(dir.path());
        for fid in 1..=4 {
            discard.set_total(fid, 100).unwrap();
        }

        assert_eq!(discard.retain(|fid| fid % 2 == 0).unwrap(), 2);
        assert_eq!(discard.slot(1).unwrap(), None);
        assert_eq!(discard.slot(2).unwrap(), Some((100, 0)));
        assert_eq!(discard.free_slots(), 680);
        discard.close().unwrap();
    }

    #[test]
    fn test_no_space() {
        let dir = tempdir().unwrap();
        let discard = open(dir.path());
        for fid in 1..=DISCARD_SLOTS as u32 {
            discard.set_total(fid, 10).unwrap();
        }
        assert!(matches!(
            discard.set_total(10_000, 10),
            Err(StorageError::DiscardNoSpace)
        ));
        // Tracked segments keep working.
        assert!(discard.incr_discard(1, 5).unwrap());
        assert!(!discard.incr_discard(10_000, 5).unwrap());
        discard.close().unwrap();
    }

    #[test]
    fn test_full_queue_counts_drops() {
        let dir = tempdir().unwrap();
        let metrics = Arc::new(Metrics::new());
        let discard = Discard::open(dir.path(), DataType::Str, 1, Arc::clone(&metrics)).unwrap();

        // Hold the state lock so the listener stalls on the first update.
        let guard = discard.state.lock();
        for _ in 0..50 {
            discard.send(loc(1, 1));
        }
        drop(guard);

        assert!(metrics.discard_dropped.get() > 0);
        discard.close().unwrap();
    }
}
