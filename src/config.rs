//! Engine configuration
//!
//! Centralized options with sensible defaults, a builder, and JSON loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, StorageError};

/// Whether index nodes keep values in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexMode {
    /// Keys and values live in memory; reads never touch the segment files.
    KeyValueMemory,
    /// Only keys and locations live in memory; values are re-read from disk.
    KeyOnlyMemory,
}

/// I/O backend used for segment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoType {
    /// Positional reads and writes on a regular file handle.
    FileIo,
    /// Memory-mapped segment files.
    Mmap,
}

/// Main configuration for an engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Directory holding every segment and discard file of this database.
    pub db_path: PathBuf,

    pub index_mode: IndexMode,

    pub io_type: IoType,

    /// fsync the active segment after every write.
    pub sync: bool,

    /// Size a segment may reach before a new active segment is started (bytes).
    pub log_file_size_threshold: i64,

    /// Capacity of the queue feeding superseded locations to the discard tracker.
    pub discard_buffer_size: usize,

    /// How often the background compactor wakes up. Zero disables it.
    #[serde(with = "duration_secs")]
    pub log_file_gc_interval: Duration,

    /// Discard ratio at which an archived segment becomes a compaction candidate.
    pub log_file_gc_ratio: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./ledgerkv_data"),
            index_mode: IndexMode::KeyOnlyMemory,
            io_type: IoType::FileIo,
            sync: false,
            log_file_size_threshold: 512 << 20, // 512 MB
            discard_buffer_size: 8 << 10,
            log_file_gc_interval: Duration::from_secs(8 * 60 * 60),
            log_file_gc_ratio: 0.5,
        }
    }
}

impl Options {
    /// Default options rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            ..Self::default()
        }
    }

    pub fn builder(path: impl Into<PathBuf>) -> OptionsBuilder {
        OptionsBuilder {
            options: Self::new(path),
        }
    }

    /// Load options from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let options: Options = serde_json::from_str(&raw)
            .map_err(|e| StorageError::Config(format!("{}: {}", path.display(), e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_file_size_threshold <= 0 || self.log_file_size_threshold > i32::MAX as i64 {
            return Err(StorageError::Config(format!(
                "log_file_size_threshold must be in 1..={}, got {}",
                i32::MAX,
                self.log_file_size_threshold
            )));
        }
        if !(self.log_file_gc_ratio > 0.0 && self.log_file_gc_ratio <= 1.0) {
            return Err(StorageError::Config(format!(
                "log_file_gc_ratio must be in (0, 1], got {}",
                self.log_file_gc_ratio
            )));
        }
        if self.discard_buffer_size == 0 {
            return Err(StorageError::Config(
                "discard_buffer_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Options
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn index_mode(mut self, mode: IndexMode) -> Self {
        self.options.index_mode = mode;
        self
    }

    pub fn io_type(mut self, io_type: IoType) -> Self {
        self.options.io_type = io_type;
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.options.sync = sync;
        self
    }

    /// Set the segment size threshold (in bytes)
    pub fn log_file_size_threshold(mut self, size: i64) -> Self {
        self.options.log_file_size_threshold = size;
        self
    }

    pub fn discard_buffer_size(mut self, size: usize) -> Self {
        self.options.discard_buffer_size = size;
        self
    }

    pub fn log_file_gc_interval(mut self, interval: Duration) -> Self {
        self.options.log_file_gc_interval = interval;
        self
    }

    pub fn log_file_gc_ratio(mut self, ratio: f64) -> Self {
        self.options.log_file_gc_ratio = ratio;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
