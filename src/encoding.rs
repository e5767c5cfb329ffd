//! Byte-level helpers shared by the record codec and the data-type codecs.
//!
//! ## Varints
//! Signed integers are zig-zag encoded and written as LEB128, at most
//! 10 bytes per value.
//!
//! ## Container keys
//! ```text
//! hash / zset sub-key:  varint(len key) | varint(len sub) | key | sub
//! list element key:     u32_le(seq) | key
//! list meta value:      u32_le(head) | u32_le(tail)
//! ```

use bytes::{Buf, BufMut};
use std::time::{SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::xxh3_128;

use crate::{Result, StorageError};

pub const MAX_VARINT_LEN: usize = 10;

/// Width of a member content hash.
pub const MEMBER_HASH_LEN: usize = 16;

/// Append `v` as a zig-zag LEB128 varint.
pub fn put_varint(buf: &mut impl BufMut, v: i64) {
    let mut ux = (v as u64) << 1;
    if v < 0 {
        ux = !ux;
    }
    while ux >= 0x80 {
        buf.put_u8((ux as u8) | 0x80);
        ux >>= 7;
    }
    buf.put_u8(ux as u8);
}

/// Decode a zig-zag varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// buffer ends mid-varint or the varint overflows 64 bits.
pub fn get_varint(buf: &[u8]) -> Option<(i64, usize)> {
    let mut ux: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return None;
        }
        if b < 0x80 {
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return None;
            }
            ux |= (b as u64) << shift;
            let mut x = (ux >> 1) as i64;
            if ux & 1 != 0 {
                x = !x;
            }
            return Some((x, i + 1));
        }
        ux |= ((b & 0x7f) as u64) << shift;
        shift += 7;
    }
    None
}

/// Encode a container key plus sub-key (hash field, zset score).
pub fn encode_key(key: &[u8], sub_key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + sub_key.len() + 2 * MAX_VARINT_LEN);
    put_varint(&mut buf, key.len() as i64);
    put_varint(&mut buf, sub_key.len() as i64);
    buf.extend_from_slice(key);
    buf.extend_from_slice(sub_key);
    buf
}

/// Split an encoded container key back into `(key, sub_key)`.
pub fn decode_key(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    let malformed = || StorageError::InvalidFormat("malformed container key".into());

    let (key_len, n1) = get_varint(buf).ok_or_else(malformed)?;
    let (sub_len, n2) = get_varint(&buf[n1..]).ok_or_else(malformed)?;
    if key_len < 0 || sub_len < 0 {
        return Err(malformed());
    }
    let start = n1 + n2;
    if key_len as u64 + sub_len as u64 != (buf.len() - start) as u64 {
        return Err(malformed());
    }
    let key_end = start + key_len as usize;
    Ok((&buf[start..key_end], &buf[key_end..]))
}

pub fn encode_list_key(seq: u32, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + key.len());
    buf.put_u32_le(seq);
    buf.extend_from_slice(key);
    buf
}

pub fn decode_list_key(buf: &[u8]) -> Result<(u32, &[u8])> {
    if buf.len() < 4 {
        return Err(StorageError::InvalidFormat("list key too short".into()));
    }
    let mut header = &buf[..4];
    let seq = header.get_u32_le();
    Ok((seq, &buf[4..]))
}

pub fn encode_list_meta(head: u32, tail: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.put_u32_le(head);
    buf.put_u32_le(tail);
    buf
}

pub fn decode_list_meta(buf: &[u8]) -> Result<(u32, u32)> {
    if buf.len() != 8 {
        return Err(StorageError::InvalidFormat(format!(
            "list meta must be 8 bytes, got {}",
            buf.len()
        )));
    }
    let mut b = buf;
    let head = b.get_u32_le();
    let tail = b.get_u32_le();
    Ok((head, tail))
}

/// 128-bit content hash used as the index key of set and zset members.
pub fn member_hash(member: &[u8]) -> Vec<u8> {
    xxh3_128(member).to_le_bytes().to_vec()
}

/// Shortest decimal text that parses back to the same `f64`.
pub fn encode_score(score: f64) -> Vec<u8> {
    score.to_string().into_bytes()
}

pub fn decode_score(buf: &[u8]) -> Result<f64> {
    std::str::from_utf8(buf)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| StorageError::InvalidFormat("malformed zset score".into()))
}

/// Current unix time in seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        for v in [0i64, 1, -1, 63, -64, 64, 300, -300, i64::MAX, i64::MIN] {
            let mut buf = Vec::new();
            put_varint(&mut buf, v);
            assert!(buf.len() <= MAX_VARINT_LEN);
            assert_eq!(get_varint(&buf), Some((v, buf.len())), "value {}", v);
        }
    }

    #[test]
    fn test_varint_small_values_are_one_byte() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 5);
        assert_eq!(buf, vec![10]);
        buf.clear();
        put_varint(&mut buf, -1);
        assert_eq!(buf, vec![1]);
    }

    #[test]
    fn test_varint_truncated() {
        assert_eq!(get_varint(&[]), None);
        assert_eq!(get_varint(&[0x80, 0x80]), None);
    }

    #[test]
    fn test_container_key() {
        let encoded = encode_key(b"myhash", b"field");
        let (key, field) = decode_key(&encoded).unwrap();
        assert_eq!(key, b"myhash");
        assert_eq!(field, b"field");

        assert!(decode_key(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_list_key_and_meta() {
        let encoded = encode_list_key(u32::MAX / 2, b"L");
        assert_eq!(decode_list_key(&encoded).unwrap(), (u32::MAX / 2, &b"L"[..]));

        let meta = encode_list_meta(10, 20);
        assert_eq!(decode_list_meta(&meta).unwrap(), (10, 20));
        assert!(decode_list_meta(&meta[..7]).is_err());
    }

    #[test]
    fn test_score_text() {
        for score in [0.0, 1.0, -2.5, 1e-300, 123456789.125, f64::INFINITY] {
            assert_eq!(decode_score(&encode_score(score)).unwrap(), score);
        }
        assert!(decode_score(b"abc").is_err());
    }

    #[test]
    fn test_member_hash_width() {
        assert_eq!(member_hash(b"a").len(), MEMBER_HASH_LEN);
        assert_ne!(member_hash(b"a"), member_hash(b"b"));
    }
}
