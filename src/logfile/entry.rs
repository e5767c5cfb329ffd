//! Log record codec
//!
//! ## Format
//! ```text
//! ┌──────────┬─────────┬───────────────┬─────────────────┬─────────────────┬─────┬───────┐
//! │ CRC (4B) │ Kind(1B)│ varint key_len│ varint value_len│ varint expires  │ key │ value │
//! └──────────┴─────────┴───────────────┴─────────────────┴─────────────────┴─────┴───────┘
//! ```
//!
//! CRC covers everything after the CRC field. A header with zero CRC, zero
//! key length and zero value length marks the end of a segment's data, which
//! matters for pre-allocated and memory-mapped files.

use bytes::{BufMut, BytesMut};

use crate::encoding::{get_varint, put_varint};
use crate::{Result, StorageError};

/// CRC (4) + kind (1) + key_len (5) + value_len (5) + expires_at (10).
pub const MAX_HEADER_SIZE: usize = 25;

const CRC_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    Put = 0,
    Delete = 1,
    ListMeta = 2,
}

impl EntryKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EntryKind::Put),
            1 => Some(EntryKind::Delete),
            2 => Some(EntryKind::ListMeta),
            _ => None,
        }
    }
}

/// A single record in a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Unix seconds, 0 = never expires.
    pub expires_at: i64,
    pub kind: EntryKind,
}

/// Decoded fixed part of a record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryHeader {
    pub crc: u32,
    pub kind: u8,
    pub key_size: usize,
    pub value_size: usize,
    pub expires_at: i64,
}

impl LogEntry {
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::with_expiry(key, value, 0)
    }

    pub fn with_expiry(key: Vec<u8>, value: Vec<u8>, expires_at: i64) -> Self {
        LogEntry {
            key,
            value,
            expires_at,
            kind: EntryKind::Put,
        }
    }

    pub fn delete(key: Vec<u8>, value: Vec<u8>) -> Self {
        LogEntry {
            key,
            value,
            expires_at: 0,
            kind: EntryKind::Delete,
        }
    }

    pub fn list_meta(key: Vec<u8>, value: Vec<u8>) -> Self {
        LogEntry {
            key,
            value,
            expires_at: 0,
            kind: EntryKind::ListMeta,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }

    /// Serialize this record, CRC included.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(MAX_HEADER_SIZE + self.key.len() + self.value.len());

        buf.put_u32_le(0);
        buf.put_u8(self.kind as u8);
        put_varint(&mut buf, self.key.len() as i64);
        put_varint(&mut buf, self.value.len() as i64);
        put_varint(&mut buf, self.expires_at);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        buf.to_vec()
    }

    /// Decode one record from the front of `buf`.
    ///
    /// `Ok(None)` means there is no further valid data; a checksum mismatch is
    /// reported as [`StorageError::Corruption`].
    pub fn decode(buf: &[u8]) -> Result<Option<(LogEntry, usize)>> {
        let (header, header_len) = match decode_header(buf) {
            Some(h) => h,
            None => return Ok(None),
        };
        let total = header
            .key_size
            .checked_add(header.value_size)
            .and_then(|n| n.checked_add(header_len));
        let total = match total {
            Some(total) if total <= buf.len() => total,
            _ => return Ok(None),
        };
        let entry = finish_decode(&header, &buf[..header_len], &buf[header_len..total])?;
        Ok(Some((entry, total)))
    }
}

/// Decode the header at the front of `buf`; `None` ends the segment.
pub(crate) fn decode_header(buf: &[u8]) -> Option<(EntryHeader, usize)> {
    if buf.len() <= CRC_SIZE + 1 {
        return None;
    }
    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = buf[CRC_SIZE];

    let mut index = CRC_SIZE + 1;
    let (key_size, n) = get_varint(&buf[index..])?;
    index += n;
    let (value_size, n) = get_varint(&buf[index..])?;
    index += n;
    let (expires_at, n) = get_varint(&buf[index..])?;
    index += n;

    if crc == 0 && key_size == 0 && value_size == 0 {
        return None;
    }
    if key_size < 0 || value_size < 0 {
        return None;
    }

    Some((
        EntryHeader {
            crc,
            kind,
            key_size: key_size as usize,
            value_size: value_size as usize,
            expires_at,
        },
        index,
    ))
}

/// Verify the checksum over header and body, then build the entry.
pub(crate) fn finish_decode(header: &EntryHeader, header_bytes: &[u8], body: &[u8]) -> Result<LogEntry> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header_bytes[CRC_SIZE..]);
    hasher.update(body);
    let computed = hasher.finalize();

    if computed != header.crc {
        return Err(StorageError::Corruption(format!(
            "Checksum mismatch: expected {}, got {}",
            header.crc, computed
        )));
    }

    let kind = EntryKind::from_u8(header.kind)
        .ok_or_else(|| StorageError::InvalidFormat(format!("Invalid entry kind: {}", header.kind)))?;

    Ok(LogEntry {
        key: body[..header.key_size].to_vec(),
        value: body[header.key_size..].to_vec(),
        expires_at: header.expires_at,
        kind,
    })
}
