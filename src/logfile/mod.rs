//! Segment log
//!
//! Each data type writes to its own sequence of segment files:
//! - log.strs.000000001 (archived, read-only, compaction target)
//! - log.strs.000000002 (archived)
//! - log.strs.000000003 (active) ← current writes
//!
//! A segment never shrinks and is only appended to. The write cursor is an
//! atomic so size checks can read it without holding the type lock.

mod entry;
mod io;

pub use entry::{EntryKind, LogEntry, MAX_HEADER_SIZE};
pub use io::{FileIo, IoSelector, MmapIo};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::IoType;
use crate::{DataType, Result, StorageError};

/// One append-only segment file.
pub struct LogFile {
    fid: u32,
    data_type: DataType,
    path: PathBuf,
    write_at: AtomicI64,
    io: Box<dyn IoSelector>,
}

impl LogFile {
    /// Open (creating if needed) the segment `fid` of `data_type` in `dir`.
    pub fn open(dir: &Path, data_type: DataType, fid: u32, size: i64, io_type: IoType) -> Result<Self> {
        let path = Self::segment_path(dir, data_type, fid);
        let io: Box<dyn IoSelector> = match io_type {
            IoType::FileIo => Box::new(FileIo::open(&path, size)?),
            IoType::Mmap => Box::new(MmapIo::open(&path, size)?),
        };

        Ok(Self {
            fid,
            data_type,
            path,
            write_at: AtomicI64::new(0),
            io,
        })
    }

    pub fn segment_path(dir: &Path, data_type: DataType, fid: u32) -> PathBuf {
        dir.join(format!("{}{:09}", data_type.segment_prefix(), fid))
    }

    /// "log.hash.000000042" → Some((Hash, 42))
    pub fn parse_segment_name(name: &str) -> Option<(DataType, u32)> {
        DataType::ALL.into_iter().find_map(|dt| {
            let id = name.strip_prefix(dt.segment_prefix().as_str())?;
            if id.len() != 9 || !id.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            id.parse::<u32>().ok().map(|fid| (dt, fid))
        })
    }

    pub fn fid(&self) -> u32 {
        self.fid
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset the next append will land at.
    pub fn write_at(&self) -> i64 {
        self.write_at.load(Ordering::SeqCst)
    }

    pub fn set_write_at(&self, offset: i64) {
        self.write_at.store(offset, Ordering::SeqCst);
    }

    /// Append `buf` and return the offset it was written at.
    ///
    /// Callers serialize appends to one segment through their type lock.
    pub fn write(&self, buf: &[u8]) -> Result<i64> {
        let offset = self.write_at.load(Ordering::SeqCst);
        self.io.write(buf, offset)?;
        self.write_at.fetch_add(buf.len() as i64, Ordering::SeqCst);
        Ok(offset)
    }

    /// Read the record starting at `offset`.
    ///
    /// Returns the entry and its encoded size, or `None` once the segment's
    /// valid data is exhausted. A header whose lengths run past the end of
    /// the file is reported as `Corruption` before anything is allocated.
    pub fn read_entry(&self, offset: i64) -> Result<Option<(LogEntry, i64)>> {
        let mut header_buf = [0u8; MAX_HEADER_SIZE];
        let n = self.io.read(&mut header_buf, offset)?;

        let (header, header_len) = match entry::decode_header(&header_buf[..n]) {
            Some(h) => h,
            None => return Ok(None),
        };

        let remaining = (self.io.size()? - offset).max(0) as u64;
        let body_len = header.key_size.checked_add(header.value_size);
        let body_len = match body_len {
            Some(len) if (header_len as u64).saturating_add(len as u64) <= remaining => len,
            _ => {
                return Err(StorageError::Corruption(format!(
                    "record at {} in {} segment {} claims key {} + value {} bytes, {} left in file",
                    offset, self.data_type, self.fid, header.key_size, header.value_size, remaining
                )))
            }
        };

        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            let read = self.io.read(&mut body, offset + header_len as i64)?;
            if read < body_len {
                return Ok(None);
            }
        }

        let entry = entry::finish_decode(&header, &header_buf[..header_len], &body)?;
        Ok(Some((entry, (header_len + body_len) as i64)))
    }

    /// Drop everything from `offset` to the end of the file and move the
    /// write cursor there. Used when recovery finds a torn tail, so bytes of
    /// the torn record cannot resurface behind later, shorter records.
    pub fn truncate_tail(&self, offset: i64) -> Result<()> {
        const CHUNK: i64 = 64 * 1024;
        let zeros = vec![0u8; CHUNK as usize];
        let end = self.io.size()?;
        let mut at = offset;
        while at < end {
            let len = CHUNK.min(end - at);
            self.io.write(&zeros[..len as usize], at)?;
            at += len;
        }
        self.io.sync()?;
        self.set_write_at(offset);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.io.close()
    }

    pub fn delete(&self) -> Result<()> {
        self.io.delete()
    }
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("data_type", &self.data_type)
            .field("fid", &self.fid)
            .field("write_at", &self.write_at())
            .finish()
    }
}
