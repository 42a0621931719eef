//! Segment Recovery
//!
//! Rebuilds a segment's index by replaying its log from the first byte.

use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::Ordering;

use crate::entry::read_entry;
use crate::error::Result;

use super::Segment;

const READ_BUFFER_SIZE: usize = 8192;

/// Result of replaying one segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of records read from the log
    pub entries_replayed: u64,

    /// How many of those records were tombstones
    pub tombstones: u64,

    /// Bytes consumed, which becomes the segment's write offset
    pub bytes: u64,
}

impl Segment {
    /// Replay the whole log, rebuilding the index and write offset
    ///
    /// A clean end of file finishes the replay; any framing inconsistency
    /// aborts it with `CorruptRecord` since the index cannot be trusted.
    pub fn recover(&self) -> Result<RecoveryStats> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut stats = RecoveryStats::default();
        let mut index = self.index.write();
        index.clear();

        while let Some((entry, len)) = read_entry(&mut reader)? {
            if entry.is_tombstone() {
                stats.tombstones += 1;
            }
            index.insert(entry.key, stats.bytes);
            stats.bytes += len;
            stats.entries_replayed += 1;
        }

        self.write_offset.store(stats.bytes, Ordering::Release);
        self.reserved_offset.store(stats.bytes, Ordering::Release);

        tracing::debug!(
            segment = self.id,
            entries = stats.entries_replayed,
            keys = index.len(),
            bytes = stats.bytes,
            "Segment recovered"
        );

        Ok(stats)
    }
}
