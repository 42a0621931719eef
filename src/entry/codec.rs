//! Entry codec
//!
//! Encoding and decoding functions for segment log records.

use std::io::{ErrorKind, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, SegKvError};

use super::{Entry, EntryValue};

/// Size of each fixed-width length field
pub const LEN_PREFIX_SIZE: usize = 4;

/// Smallest possible record: total len + key len + value len, empty key/value
pub const MIN_RECORD_SIZE: usize = 3 * LEN_PREFIX_SIZE;

/// Value length marking a tombstone (no value bytes follow)
pub const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Upfront buffer reservation when reading a record body
const READ_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Encoding
// =============================================================================

/// Encode an entry into a self-delimiting record
///
/// Format: total_len (4) + key_len (4) + key + val_len (4) + value
pub fn encode(entry: &Entry) -> Result<Bytes> {
    let total_len = entry.encoded_len();
    if total_len > u32::MAX as usize {
        return Err(SegKvError::CorruptRecord(format!(
            "record of {} bytes does not fit the u32 length prefix",
            total_len
        )));
    }

    let mut buf = BytesMut::with_capacity(total_len);
    buf.put_u32_le(total_len as u32);
    buf.put_u32_le(entry.key.len() as u32);
    buf.put_slice(&entry.key);

    match &entry.value {
        EntryValue::Value(value) => {
            buf.put_u32_le(value.len() as u32);
            buf.put_slice(value);
        }
        EntryValue::Tombstone => buf.put_u32_le(TOMBSTONE_MARKER),
    }

    Ok(buf.freeze())
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode exactly one record from `data`
///
/// `data` must hold the whole record and nothing else; any length that
/// disagrees with the buffer is a `CorruptRecord`.
pub fn decode(data: &[u8]) -> Result<Entry> {
    let mut buf = data;

    if buf.remaining() < MIN_RECORD_SIZE {
        return Err(corrupt(format!(
            "record is {} bytes, shorter than the {} byte minimum",
            data.len(),
            MIN_RECORD_SIZE
        )));
    }

    let total_len = buf.get_u32_le() as usize;
    if total_len != data.len() {
        return Err(corrupt(format!(
            "length prefix says {} bytes but buffer holds {}",
            total_len,
            data.len()
        )));
    }

    let key_len = buf.get_u32_le() as usize;
    // Key must leave room for the value length field
    if buf.remaining() < key_len + LEN_PREFIX_SIZE {
        return Err(corrupt(format!("key length {} overruns record", key_len)));
    }
    let key = buf.copy_to_bytes(key_len).to_vec();

    let val_len = buf.get_u32_le();
    let value = if val_len == TOMBSTONE_MARKER {
        EntryValue::Tombstone
    } else {
        let val_len = val_len as usize;
        if buf.remaining() < val_len {
            return Err(corrupt(format!("value length {} overruns record", val_len)));
        }
        EntryValue::Value(buf.copy_to_bytes(val_len).to_vec())
    };

    if buf.has_remaining() {
        return Err(corrupt(format!(
            "{} trailing bytes after value",
            buf.remaining()
        )));
    }

    Ok(Entry { key, value })
}

/// Read the next record from a sequential reader
///
/// Returns `Ok(None)` on a clean EOF at a record boundary, otherwise the
/// decoded entry and the number of bytes it occupied. A record cut short
/// anywhere after its first byte is a `CorruptRecord`.
pub fn read_entry<R: Read>(reader: &mut R) -> Result<Option<(Entry, u64)>> {
    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LEN_PREFIX_SIZE {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if filled == 0 {
        return Ok(None);
    }
    if filled < LEN_PREFIX_SIZE {
        return Err(corrupt(format!(
            "truncated length prefix ({} of {} bytes)",
            filled, LEN_PREFIX_SIZE
        )));
    }

    let total_len = u32::from_le_bytes(prefix) as usize;
    if total_len < MIN_RECORD_SIZE {
        return Err(corrupt(format!("impossible record length {}", total_len)));
    }

    // The buffer grows with the bytes actually present, not the prefix
    let mut record = Vec::with_capacity(total_len.min(READ_CHUNK_SIZE));
    record.extend_from_slice(&prefix);
    let body_len = (total_len - LEN_PREFIX_SIZE) as u64;
    let read = reader.by_ref().take(body_len).read_to_end(&mut record)?;
    if (read as u64) < body_len {
        return Err(corrupt(format!(
            "record of {} bytes truncated by end of file ({} bytes present)",
            total_len,
            LEN_PREFIX_SIZE + read
        )));
    }

    let entry = decode(&record)?;
    Ok(Some((entry, total_len as u64)))
}

fn corrupt(message: String) -> SegKvError {
    SegKvError::CorruptRecord(message)
}
