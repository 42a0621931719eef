//! Entry Module
//!
//! Binary framing of a single key/value record in a segment log.
//!
//! ## Responsibilities
//! - Self-delimiting records: a reader learns the record size from the
//!   first four bytes alone
//! - Tombstones as a tagged variant instead of a reserved value
//! - Rejecting truncated or size-inconsistent buffers
//!
//! ## Record Format
//! ```text
//! ┌──────────────┬─────────────┬───────┬─────────────┬─────────┐
//! │ TotalLen (4) │ KeyLen (4)  │  Key  │ ValLen (4)  │  Value  │
//! └──────────────┴─────────────┴───────┴─────────────┴─────────┘
//! ```
//! All integers are little-endian `u32`. `TotalLen` counts the whole
//! record including itself. `ValLen = u32::MAX` marks a tombstone and
//! is followed by no value bytes.

mod codec;

pub use codec::{decode, encode, read_entry, LEN_PREFIX_SIZE, MIN_RECORD_SIZE, TOMBSTONE_MARKER};

/// A single record in a segment log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The lookup key
    pub key: Vec<u8>,

    /// A live value or a deletion marker
    pub value: EntryValue,
}

/// Payload of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValue {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl Entry {
    /// Create an entry carrying a live value
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: EntryValue::Value(value.into()),
        }
    }

    /// Create a tombstone entry for `key`
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: EntryValue::Tombstone,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, EntryValue::Tombstone)
    }

    /// Size of this entry once framed on disk
    pub fn encoded_len(&self) -> usize {
        let value_len = match &self.value {
            EntryValue::Value(v) => v.len(),
            EntryValue::Tombstone => 0,
        };
        MIN_RECORD_SIZE + self.key.len() + value_len
    }
}

impl EntryValue {
    /// The live value, or `None` for a tombstone
    pub fn into_option(self) -> Option<Vec<u8>> {
        match self {
            EntryValue::Value(v) => Some(v),
            EntryValue::Tombstone => None,
        }
    }
}
