//! # ledgerkv
//!
//! An embedded, log-structured key-value engine in the Bitcask family.
//!
//! Five data structures share one segment-log abstraction:
//!
//! ```text
//!   String ─┐
//!   List   ─┤   per-type RwLock<Index>      per-type segments      per-type discard file
//!   Hash   ─┼──► (BTreeMap, skip list) ───► log.<type>.000000001 ──► discard.<type>
//!   Set    ─┤                               log.<type>.000000002        │
//!   ZSet   ─┘                               log.<type>.000000003 (active)
//!                                                  ▲                    │
//!                                                  └──── compaction ◄───┘
//! ```
//!
//! Writes append a CRC-framed record to the active segment of their type and
//! point the index at it. Reads go through the index and either return the
//! cached value or re-read the record. Superseded records are reported to the
//! discard tracker, and the compactor rewrites the live remainder of heavily
//! discarded segments before deleting them.

pub mod compaction;
pub mod config;
pub mod datatypes;
pub mod discard;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod index;
pub mod logfile;
pub mod metrics;
mod recovery;

pub use compaction::CompactionStats;
pub use config::{IndexMode, IoType, Options};
pub use datatypes::list::ListSide;
pub use engine::Engine;
pub use error::{Result, StorageError};

/// The logical data structures, each with its own log, index and discard file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    Str = 0,
    List = 1,
    Hash = 2,
    Set = 3,
    ZSet = 4,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Str,
        DataType::List,
        DataType::Hash,
        DataType::Set,
        DataType::ZSet,
    ];

    /// Short name used in file names and log fields.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Str => "strs",
            DataType::List => "list",
            DataType::Hash => "hash",
            DataType::Set => "sets",
            DataType::ZSet => "zset",
        }
    }

    /// Prefix of this type's segment file names, e.g. `log.strs.`.
    pub fn segment_prefix(&self) -> String {
        format!("log.{}.", self.name())
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DataType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "strs" | "string" => Ok(DataType::Str),
            "list" => Ok(DataType::List),
            "hash" => Ok(DataType::Hash),
            "sets" | "set" => Ok(DataType::Set),
            "zset" => Ok(DataType::ZSet),
            other => Err(StorageError::InvalidArgument(format!(
                "unknown data type: {}",
                other
            ))),
        }
    }
}
