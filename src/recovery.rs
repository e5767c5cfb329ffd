//! Startup replay
//!
//! Segment files are grouped per data type and replayed lowest id first with
//! the same index rules live writes use. Each type is independent, so each
//! one is replayed on its own scoped thread.
//!
//! A checksum mismatch in an archived segment fails the open. In the active
//! segment it can only be a write torn by a crash, so replay stops there and
//! the write cursor is placed at the last good record.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::config::{IndexMode, Options};
use crate::encoding::{decode_key, decode_list_key, decode_score, member_hash, now_secs};
use crate::engine::{SegmentSet, ZSetIndex};
use crate::index::{Index, IndexNode, ValueLocation};
use crate::logfile::{EntryKind, LogEntry, LogFile};
use crate::{DataType, Result, StorageError};

/// Everything `Engine::open` needs from disk.
pub(crate) struct Loaded {
    pub segments: SegmentSet,
    pub strs: Index,
    pub lists: HashMap<Vec<u8>, Index>,
    pub hashes: HashMap<Vec<u8>, Index>,
    pub sets: HashMap<Vec<u8>, Index>,
    pub zsets: ZSetIndex,
    /// Segments created because their type had none on disk.
    pub created: Vec<(DataType, u32)>,
}

/// Index state of one data type while it is replayed.
#[derive(Default)]
struct TypeState {
    strs: Index,
    containers: HashMap<Vec<u8>, Index>,
    zsets: ZSetIndex,
}

struct TypeLoad {
    data_type: DataType,
    active: Arc<LogFile>,
    archived: BTreeMap<u32, Arc<LogFile>>,
    created: Option<u32>,
    records: usize,
    state: TypeState,
}

pub(crate) fn load(opts: &Options) -> Result<Loaded> {
    let mut groups: HashMap<DataType, Vec<u32>> = HashMap::new();
    for entry in std::fs::read_dir(&opts.db_path)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some((dt, fid)) = name.to_str().and_then(LogFile::parse_segment_name) {
            groups.entry(dt).or_default().push(fid);
        }
    }

    let work: Vec<(DataType, Vec<u32>)> = DataType::ALL
        .iter()
        .map(|&dt| (dt, groups.remove(&dt).unwrap_or_default()))
        .collect();

    let results = thread::scope(|scope| {
        let handles: Vec<_> = work
            .into_iter()
            .map(|(dt, fids)| scope.spawn(move || load_type(opts, dt, fids)))
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let loaded = handle
                .join()
                .map_err(|_| StorageError::Corruption("recovery thread panicked".to_string()))??;
            results.push(loaded);
        }
        Ok::<_, StorageError>(results)
    })?;

    let mut loaded = Loaded {
        segments: SegmentSet::default(),
        strs: Index::new(),
        lists: HashMap::new(),
        hashes: HashMap::new(),
        sets: HashMap::new(),
        zsets: ZSetIndex::default(),
        created: Vec::new(),
    };

    for result in results {
        let dt = result.data_type;
        info!(
            data_type = %dt,
            segments = result.archived.len() + 1,
            records = result.records,
            active = result.active.fid(),
            "replayed data type"
        );

        loaded.segments.active.insert(dt, result.active);
        loaded.segments.archived.insert(dt, result.archived);
        if let Some(fid) = result.created {
            loaded.created.push((dt, fid));
        }

        let state = result.state;
        match dt {
            DataType::Str => loaded.strs = state.strs,
            DataType::List => loaded.lists = state.containers,
            DataType::Hash => loaded.hashes = state.containers,
            DataType::Set => loaded.sets = state.containers,
            DataType::ZSet => loaded.zsets = state.zsets,
        }
    }

    Ok(loaded)
}

fn load_type(opts: &Options, data_type: DataType, mut fids: Vec<u32>) -> Result<TypeLoad> {
    fids.sort_unstable();
    let mut created = None;
    if fids.is_empty() {
        fids.push(1);
        created = Some(1);
    }
    let active_fid = fids[fids.len() - 1];

    let cache = opts.index_mode == IndexMode::KeyValueMemory;
    let now = now_secs();
    let mut state = TypeState::default();
    let mut archived = BTreeMap::new();
    let mut active = None;
    let mut records = 0;

    for &fid in &fids {
        let segment = Arc::new(LogFile::open(
            &opts.db_path,
            data_type,
            fid,
            opts.log_file_size_threshold,
            opts.io_type,
        )?);
        let is_active = fid == active_fid;

        let mut offset = 0i64;
        let mut torn = false;
        loop {
            match segment.read_entry(offset) {
                Ok(Some((entry, size))) => {
                    let loc = ValueLocation {
                        segment_id: fid,
                        offset,
                        size: size as i32,
                    };
                    state.apply(data_type, entry, loc, cache, now)?;
                    offset += size;
                    records += 1;
                }
                Ok(None) => break,
                Err(StorageError::Corruption(reason)) if is_active => {
                    warn!(
                        data_type = %data_type,
                        fid,
                        offset,
                        reason = %reason,
                        "torn record at tail of active segment, truncating"
                    );
                    torn = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(data_type = %data_type, fid, end = offset, "segment replayed");

        if torn {
            segment.truncate_tail(offset)?;
        }
        if is_active {
            segment.set_write_at(offset);
            active = Some(segment);
        } else {
            archived.insert(fid, segment);
        }
    }

    let active = active.ok_or_else(|| {
        StorageError::SegmentNotFound(format!("no active segment for {}", data_type))
    })?;

    Ok(TypeLoad {
        data_type,
        active,
        archived,
        created,
        records,
        state,
    })
}

impl TypeState {
    fn apply(&mut self, data_type: DataType, entry: LogEntry, loc: ValueLocation, cache: bool, now: i64) -> Result<()> {
        let node = |value: &[u8], expires_at: i64| IndexNode {
            location: loc,
            value: if cache { Some(value.to_vec()) } else { None },
            expires_at,
        };

        match (data_type, entry.kind) {
            (DataType::Str, EntryKind::Put) => {
                if entry.is_expired(now) {
                    self.strs.delete(&entry.key);
                } else {
                    let node = node(&entry.value, entry.expires_at);
                    self.strs.put(entry.key, node);
                }
            }
            (DataType::Str, EntryKind::Delete) => {
                self.strs.delete(&entry.key);
            }

            (DataType::List, EntryKind::ListMeta) => {
                let node = node(&entry.value, 0);
                self.containers
                    .entry(entry.key.clone())
                    .or_default()
                    .put(entry.key, node);
            }
            (DataType::List, EntryKind::Put) => {
                let (_, container) = decode_list_key(&entry.key)?;
                let node = node(&entry.value, 0);
                self.containers
                    .entry(container.to_vec())
                    .or_default()
                    .put(entry.key, node);
            }
            (DataType::List, EntryKind::Delete) => {
                let (_, container) = decode_list_key(&entry.key)?;
                if let Some(tree) = self.containers.get_mut(container) {
                    tree.delete(&entry.key);
                }
            }

            (DataType::Hash, EntryKind::Put) => {
                let (container, field) = decode_key(&entry.key)?;
                self.containers
                    .entry(container.to_vec())
                    .or_default()
                    .put(field.to_vec(), node(&entry.value, 0));
            }
            (DataType::Hash, EntryKind::Delete) => {
                let (container, field) = decode_key(&entry.key)?;
                remove_from(&mut self.containers, container, field);
            }

            (DataType::Set, EntryKind::Put) => {
                let node = node(&entry.value, 0);
                self.containers
                    .entry(entry.key)
                    .or_default()
                    .put(member_hash(&entry.value), node);
            }
            (DataType::Set, EntryKind::Delete) => {
                remove_from(&mut self.containers, &entry.key, &member_hash(&entry.value));
            }

            (DataType::ZSet, EntryKind::Put) => {
                let (container, score) = decode_key(&entry.key)?;
                let score = decode_score(score)?;
                self.zsets
                    .trees
                    .entry(container.to_vec())
                    .or_default()
                    .put(member_hash(&entry.value), node(&entry.value, 0));
                self.zsets
                    .sorted
                    .entry(container.to_vec())
                    .or_default()
                    .add(&entry.value, score);
            }
            (DataType::ZSet, EntryKind::Delete) => {
                let (container, _) = decode_key(&entry.key)?;
                remove_from(&mut self.zsets.trees, container, &member_hash(&entry.value));
                if let Some(sorted) = self.zsets.sorted.get_mut(container) {
                    sorted.remove(&entry.value);
                }
            }

            (dt, kind) => {
                return Err(StorageError::InvalidFormat(format!(
                    "{:?} record in {} segment {}",
                    kind, dt, loc.segment_id
                )));
            }
        }
        Ok(())
    }
}

fn remove_from(containers: &mut HashMap<Vec<u8>, Index>, container: &[u8], key: &[u8]) {
    if let Some(tree) = containers.get_mut(container) {
        tree.delete(key);
    }
}
