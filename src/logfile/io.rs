//! Segment I/O backends
//!
//! Both backends pre-allocate the file to its full size, so the logical end
//! of a segment is found by decoding records, not from the file length.

use memmap2::MmapMut;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::{Result, StorageError};

/// Positional I/O over one backing file.
pub trait IoSelector: Send + Sync {
    /// Write all of `buf` at `offset`, returning the number of bytes written.
    fn write(&self, buf: &[u8], offset: i64) -> Result<usize>;

    /// Fill as much of `buf` as the file holds from `offset`.
    fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize>;

    /// Length of the backing file in bytes.
    fn size(&self) -> Result<i64>;

    fn sync(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Remove the backing file.
    fn delete(&self) -> Result<()>;
}

fn open_file(path: &Path, size: i64) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    if (file.metadata()?.len() as i64) < size {
        file.set_len(size as u64)?;
    }
    Ok(file)
}

/// Standard file I/O using pread/pwrite.
pub struct FileIo {
    file: File,
    path: PathBuf,
}

impl FileIo {
    pub fn open(path: &Path, size: i64) -> Result<Self> {
        Ok(Self {
            file: open_file(path, size)?,
            path: path.to_path_buf(),
        })
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    while !buf.is_empty() {
        let n = std::os::windows::fs::FileExt::seek_write(file, buf, offset)?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

impl IoSelector for FileIo {
    fn write(&self, buf: &[u8], offset: i64) -> Result<usize> {
        write_all_at(&self.file, buf, offset as u64)?;
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match read_at(&self.file, &mut buf[filled..], offset as u64 + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn size(&self) -> Result<i64> {
        Ok(self.file.metadata()?.len() as i64)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.sync()
    }

    fn delete(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Memory-mapped I/O over a pre-allocated file.
pub struct MmapIo {
    map: RwLock<MmapMut>,
    path: PathBuf,
}

impl MmapIo {
    pub fn open(path: &Path, size: i64) -> Result<Self> {
        let file = open_file(path, size)?;
        // SAFETY: the engine owns the directory and never truncates or
        // rewrites a mapped segment through another handle while mapped.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            map: RwLock::new(map),
            path: path.to_path_buf(),
        })
    }
}

impl IoSelector for MmapIo {
    fn write(&self, buf: &[u8], offset: i64) -> Result<usize> {
        let mut map = self.map.write();
        let start = offset as usize;
        let end = start + buf.len();
        if end > map.len() {
            return Err(StorageError::InvalidArgument(format!(
                "write of {} bytes at {} exceeds mapped size {}",
                buf.len(),
                offset,
                map.len()
            )));
        }
        map[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        let map = self.map.read();
        let start = offset as usize;
        if start >= map.len() {
            return Ok(0);
        }
        let n = buf.len().min(map.len() - start);
        buf[..n].copy_from_slice(&map[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> Result<i64> {
        Ok(self.map.read().len() as i64)
    }

    fn sync(&self) -> Result<()> {
        self.map.read().flush()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.sync()
    }

    fn delete(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}
