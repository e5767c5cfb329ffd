//! Engine façade
//!
//! Owns the per-type segment maps, indexes and discard trackers, and exposes
//! the typed operations (implemented per data type under `datatypes`).
//!
//! ## Locking
//! - one `RwLock` per data type guards its index; writers hold it across
//!   encode → append → index update, so appends to one type's active segment
//!   are serialized
//! - `segments` guards only the active/archived maps; file creation, sync and
//!   deletion happen outside it
//! - `closed` is checked after a type lock is taken, so `close` (which takes
//!   every type lock) never races with a half-finished operation

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::compaction::CompactionScheduler;
use crate::config::{IndexMode, Options};
use crate::discard::Discard;
use crate::encoding::now_secs;
use crate::index::{Index, IndexNode, SortedSet, ValueLocation};
use crate::logfile::{EntryKind, LogEntry, LogFile};
use crate::metrics::Metrics;
use crate::recovery;
use crate::{DataType, Result, StorageError};

/// Active and archived segments of every data type.
#[derive(Debug, Default)]
pub(crate) struct SegmentSet {
    pub active: HashMap<DataType, Arc<LogFile>>,
    pub archived: HashMap<DataType, BTreeMap<u32, Arc<LogFile>>>,
}

impl SegmentSet {
    pub fn get(&self, data_type: DataType, fid: u32) -> Option<Arc<LogFile>> {
        if let Some(active) = self.active.get(&data_type) {
            if active.fid() == fid {
                return Some(Arc::clone(active));
            }
        }
        self.archived
            .get(&data_type)
            .and_then(|segments| segments.get(&fid))
            .cloned()
    }

    fn archived_count(&self) -> usize {
        self.archived.values().map(|s| s.len()).sum()
    }
}

/// Sorted-set state: member-hash index plus rank structure per container key.
#[derive(Debug, Default)]
pub(crate) struct ZSetIndex {
    pub trees: HashMap<Vec<u8>, Index>,
    pub sorted: HashMap<Vec<u8>, SortedSet>,
}

pub struct Engine {
    opts: Options,
    metrics: Arc<Metrics>,
    pub(crate) segments: RwLock<SegmentSet>,
    discards: Vec<Discard>,

    pub(crate) strs: RwLock<Index>,
    pub(crate) lists: RwLock<HashMap<Vec<u8>, Index>>,
    pub(crate) hashes: RwLock<HashMap<Vec<u8>, Index>>,
    pub(crate) sets: RwLock<HashMap<Vec<u8>, Index>>,
    pub(crate) zsets: RwLock<ZSetIndex>,

    /// Compaction in progress, one flag per data type.
    pub(crate) gc_running: [AtomicBool; 5],
    closed: AtomicBool,
    scheduler: Mutex<Option<CompactionScheduler>>,
}

impl Engine {
    /// Open (or create) the database at `opts.db_path`, replaying every
    /// segment into memory and starting the compaction scheduler.
    pub fn open(opts: Options) -> Result<Arc<Self>> {
        opts.validate()?;
        std::fs::create_dir_all(&opts.db_path)?;
        let start = Instant::now();

        let metrics = Arc::new(Metrics::new());
        let discards = DataType::ALL
            .iter()
            .map(|&dt| Discard::open(&opts.db_path, dt, opts.discard_buffer_size, Arc::clone(&metrics)))
            .collect::<Result<Vec<_>>>()?;

        let loaded = recovery::load(&opts)?;

        for dt in DataType::ALL {
            let segments = &loaded.segments;
            let stale = discards[dt.index()].retain(|fid| segments.get(dt, fid).is_some())?;
            if stale > 0 {
                debug!(data_type = %dt, stale, "released discard slots of missing segments");
            }
        }

        for &(dt, fid) in &loaded.created {
            if let Err(e) = discards[dt.index()].set_total(fid, opts.log_file_size_threshold as u32) {
                warn!(data_type = %dt, fid, error = %e, "segment not tracked for compaction");
            }
        }

        metrics.active_segments.set(loaded.segments.active.len() as u64);
        metrics.archived_segments.set(loaded.segments.archived_count() as u64);

        let engine = Arc::new(Engine {
            opts,
            metrics,
            segments: RwLock::new(loaded.segments),
            discards,
            strs: RwLock::new(loaded.strs),
            lists: RwLock::new(loaded.lists),
            hashes: RwLock::new(loaded.hashes),
            sets: RwLock::new(loaded.sets),
            zsets: RwLock::new(loaded.zsets),
            gc_running: Default::default(),
            closed: AtomicBool::new(false),
            scheduler: Mutex::new(None),
        });

        if !engine.opts.log_file_gc_interval.is_zero() {
            let scheduler = CompactionScheduler::start(
                Arc::downgrade(&engine),
                engine.opts.log_file_gc_interval,
                engine.opts.log_file_gc_ratio,
            )?;
            *engine.scheduler.lock() = Some(scheduler);
        }

        info!(
            path = %engine.opts.db_path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "engine opened"
        );
        Ok(engine)
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn discard(&self, data_type: DataType) -> &Discard {
        &self.discards[data_type.index()]
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ids of every segment of `data_type`, ascending; the last one is active.
    pub fn segment_ids(&self, data_type: DataType) -> Vec<u32> {
        let segments = self.segments.read();
        let mut ids: Vec<u32> = segments
            .archived
            .get(&data_type)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default();
        if let Some(active) = segments.active.get(&data_type) {
            ids.push(active.fid());
        }
        ids
    }

    pub(crate) fn read_guard<'a, T>(&self, lock: &'a RwLock<T>) -> Result<RwLockReadGuard<'a, T>> {
        let guard = lock.read();
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(guard)
    }

    pub(crate) fn write_guard<'a, T>(&self, lock: &'a RwLock<T>) -> Result<RwLockWriteGuard<'a, T>> {
        let guard = lock.write();
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(guard)
    }

    pub(crate) fn active_segment(&self, data_type: DataType) -> Result<Arc<LogFile>> {
        self.segments
            .read()
            .active
            .get(&data_type)
            .cloned()
            .ok_or_else(|| StorageError::SegmentNotFound(format!("no active segment for {}", data_type)))
    }

    /// Append `entry` to the active segment of `data_type`, rotating first if
    /// it would not fit. The caller holds the type's write lock.
    pub(crate) fn write_log_entry(&self, entry: &LogEntry, data_type: DataType) -> Result<ValueLocation> {
        let buf = entry.encode();
        let size = buf.len() as i64;
        let threshold = self.opts.log_file_size_threshold;
        if size > threshold {
            return Err(StorageError::InvalidArgument(format!(
                "entry of {} bytes exceeds segment size {}",
                size, threshold
            )));
        }

        let mut active = self.active_segment(data_type)?;
        if active.write_at() + size > threshold {
            active = self.rotate(data_type, active)?;
        }

        let offset = active.write(&buf)?;
        if self.opts.sync {
            self.sync_segment(&active)?;
        }

        self.metrics.writes_total.inc();
        self.metrics.writes_bytes.add(size as u64);

        Ok(ValueLocation {
            segment_id: active.fid(),
            offset,
            size: size as i32,
        })
    }

    /// Archive `full` and make a fresh segment active.
    fn rotate(&self, data_type: DataType, full: Arc<LogFile>) -> Result<Arc<LogFile>> {
        self.sync_segment(&full)?;
        let fid = full.fid() + 1;
        let next = Arc::new(LogFile::open(
            &self.opts.db_path,
            data_type,
            fid,
            self.opts.log_file_size_threshold,
            self.opts.io_type,
        )?);

        {
            let mut segments = self.segments.write();
            segments
                .archived
                .entry(data_type)
                .or_default()
                .insert(full.fid(), Arc::clone(&full));
            segments.active.insert(data_type, Arc::clone(&next));
            self.metrics.archived_segments.set(segments.archived_count() as u64);
        }

        if let Err(e) = self.discard(data_type).set_total(fid, self.opts.log_file_size_threshold as u32) {
            warn!(data_type = %data_type, fid, error = %e, "segment not tracked for compaction");
        }

        self.metrics.rotations_total.inc();
        info!(data_type = %data_type, archived = full.fid(), active = fid, "segment rotated");
        Ok(next)
    }

    /// Read the record a location points at.
    pub(crate) fn read_log_entry(&self, data_type: DataType, loc: &ValueLocation) -> Result<LogEntry> {
        let segment = self.segments.read().get(data_type, loc.segment_id).ok_or_else(|| {
            StorageError::SegmentNotFound(format!("{} segment {}", data_type, loc.segment_id))
        })?;

        let start = Instant::now();
        let read = segment.read_entry(loc.offset)?;
        self.metrics.disk_reads.inc();
        self.metrics.disk_read_latency.observe(start.elapsed());

        read.map(|(entry, _)| entry).ok_or_else(|| {
            StorageError::Corruption(format!(
                "no record at {} offset {} of segment {}",
                data_type, loc.offset, loc.segment_id
            ))
        })
    }

    /// Value an index node refers to, or `None` if it is no longer live.
    pub(crate) fn read_value(&self, data_type: DataType, node: &IndexNode) -> Result<Option<Vec<u8>>> {
        let now = now_secs();
        if node.is_expired(now) {
            return Ok(None);
        }
        if let Some(value) = &node.value {
            return Ok(Some(value.clone()));
        }
        let entry = self.read_log_entry(data_type, &node.location)?;
        if entry.kind == EntryKind::Delete || entry.is_expired(now) {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    /// Index node for a record just written, caching the value if configured.
    pub(crate) fn make_node(&self, location: ValueLocation, value: &[u8], expires_at: i64) -> IndexNode {
        IndexNode {
            location,
            value: match self.opts.index_mode {
                IndexMode::KeyValueMemory => Some(value.to_vec()),
                IndexMode::KeyOnlyMemory => None,
            },
            expires_at,
        }
    }

    /// Report a superseded or removed node as obsolete.
    pub(crate) fn discard_node(&self, data_type: DataType, node: Option<IndexNode>) {
        if let Some(node) = node {
            self.discard(data_type).send(node.location);
        }
    }

    pub(crate) fn discard_location(&self, data_type: DataType, loc: ValueLocation) {
        self.discard(data_type).send(loc);
    }

    pub(crate) fn note_read(&self, hit: bool) {
        self.metrics.reads_total.inc();
        if hit {
            self.metrics.reads_hits.inc();
        } else {
            self.metrics.reads_misses.inc();
        }
    }

    pub(crate) fn sync_segment(&self, segment: &LogFile) -> Result<()> {
        segment.sync()?;
        self.metrics.segment_syncs.inc();
        Ok(())
    }

    /// Flush every active segment and discard file to disk.
    pub fn sync(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        let active: Vec<Arc<LogFile>> = self.segments.read().active.values().cloned().collect();
        for segment in active {
            self.sync_segment(&segment)?;
        }
        for discard in &self.discards {
            discard.sync()?;
        }
        Ok(())
    }

    /// Stop background work, close every segment and discard file, then
    /// release the indexes. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }

        // Wait for in-flight operations; later ones observe `closed`.
        let mut strs = self.strs.write();
        let mut lists = self.lists.write();
        let mut hashes = self.hashes.write();
        let mut sets = self.sets.write();
        let mut zsets = self.zsets.write();

        let mut first_err = None;
        {
            let segments = self.segments.read();
            let all = segments
                .active
                .values()
                .chain(segments.archived.values().flat_map(|s| s.values()));
            for segment in all {
                if let Err(e) = segment.close() {
                    error!(segment = ?segment, error = %e, "failed to close segment");
                    first_err.get_or_insert(e);
                }
            }
        }

        for discard in &self.discards {
            if let Err(e) = discard.close() {
                error!(discard = ?discard, error = %e, "failed to close discard file");
                first_err.get_or_insert(e);
            }
        }

        strs.clear();
        lists.clear();
        hashes.clear();
        sets.clear();
        zsets.trees.clear();
        zsets.sorted.clear();

        info!(path = %self.opts.db_path.display(), "engine closed");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("db_path", &self.opts.db_path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
