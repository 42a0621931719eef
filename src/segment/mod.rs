//! Segment Module
//!
//! One append-only log file plus an in-memory hash index.
//!
//! ## Responsibilities
//! - Map each key to the offset of its most recent record in this file
//! - Serialize all appends through a single writer thread (active segments)
//! - Serve point reads through independent file handles
//! - Rebuild the index by replaying the log on startup
//!
//! ## Lifecycle
//! ```text
//!   open(active) ──► writes ──► close_writer() ──► read-only ──► remove_file()
//!   open(inactive) ──► recover() ──► read-only ──► remove_file()
//! ```
//! The file name is the segment id: a decimal creation timestamp in
//! nanoseconds. Ascending ids give write order across segments.

mod recovery;
mod writer;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::SyncStrategy;
use crate::entry::{read_entry, Entry, EntryValue};
use crate::error::{Result, SegKvError};

pub use recovery::RecoveryStats;
pub use writer::WriteTicket;

use writer::{WriterHandle, WriterShared};

/// A single segment of the log
///
/// ## Concurrency:
/// - The file handle and write offset belong to the writer thread
/// - `index`: RwLock, written only by the writer thread or `recover()`
/// - Reads never touch the writer's handle; each opens the file itself
pub struct Segment {
    /// Creation timestamp parsed from the file name
    id: u64,

    /// Location of the log file
    path: PathBuf,

    /// Soft ceiling on the file size
    size_bound: u64,

    /// Key → offset of the latest record for that key in this file
    index: Arc<RwLock<HashMap<Vec<u8>, u64>>>,

    /// Bytes appended so far
    write_offset: Arc<AtomicU64>,

    /// Bytes accepted into the writer queue, including ones not yet written
    reserved_offset: AtomicU64,

    /// Set by the writer thread once it stops accepting writes
    sealed: Arc<AtomicBool>,

    /// Present while the segment is active
    writer: Mutex<Option<WriterHandle>>,
}

impl Segment {
    /// Open a segment without fsync on writes
    pub fn open(path: &Path, active: bool, size_bound: u64) -> Result<Self> {
        Self::open_with(path, active, size_bound, SyncStrategy::None)
    }

    /// Create or open the backing file
    ///
    /// An active segment keeps the file open for appending and starts its
    /// writer thread. An inactive one only makes sure the file exists; call
    /// `recover()` to load its index.
    pub fn open_with(
        path: &Path,
        active: bool,
        size_bound: u64,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        let id = segment_id_from_path(path).ok_or_else(|| {
            SegKvError::Config(format!("{} is not a segment file name", path.display()))
        })?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let existing_len = file.metadata()?.len();

        let index = Arc::new(RwLock::new(HashMap::new()));
        let write_offset = Arc::new(AtomicU64::new(existing_len));
        let sealed = Arc::new(AtomicBool::new(!active));

        let writer = if active {
            let shared = WriterShared {
                segment_id: id,
                index: Arc::clone(&index),
                write_offset: Arc::clone(&write_offset),
                sealed: Arc::clone(&sealed),
                size_bound,
                sync_strategy,
            };
            Some(WriterHandle::spawn(file, shared)?)
        } else {
            None
        };

        Ok(Self {
            id,
            path: path.to_path_buf(),
            size_bound,
            index,
            write_offset,
            reserved_offset: AtomicU64::new(existing_len),
            sealed,
            writer: Mutex::new(writer),
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append an entry and block until the writer acknowledges it
    pub fn put(&self, entry: Entry) -> Result<()> {
        self.submit(entry)?.wait(None)
    }

    /// Queue an entry for the writer without waiting
    ///
    /// Tickets are acknowledged in submission order.
    pub fn submit(&self, entry: Entry) -> Result<WriteTicket> {
        let writer = self.writer.lock();
        let handle = writer.as_ref().ok_or(SegKvError::NoWriter)?;
        if self.sealed.load(Ordering::Acquire) {
            return Err(SegKvError::NoWriter);
        }

        let len = entry.encoded_len() as u64;
        let ticket = handle.submit(entry)?;
        self.reserved_offset.fetch_add(len, Ordering::AcqRel);
        Ok(ticket)
    }

    /// Stop the writer thread once every queued write is acknowledged
    ///
    /// Later `put` calls fail with `NoWriter`. Calling this again is a no-op.
    pub fn close_writer(&self) {
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            handle.shutdown();
            tracing::debug!(segment = self.id, "Writer closed");
        }
        self.sealed.store(true, Ordering::Release);
    }

    /// Release the file handle held by this segment
    pub fn close(&self) -> Result<()> {
        self.close_writer();
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up a key in this segment
    ///
    /// Returns:
    /// - `Ok(Some(value))` — key found with value
    /// - `Ok(None)` — key found but is a tombstone (deleted)
    /// - `Err(KeyNotFound)` — key not in this segment
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let offset = match self.index.read().get(key) {
            Some(&offset) => offset,
            None => return Err(SegKvError::KeyNotFound),
        };

        let mut reader = BufReader::new(File::open(&self.path)?);
        let entry = self.read_at(&mut reader, key, offset)?;
        Ok(entry.value.into_option())
    }

    /// Materialize the latest value or tombstone of every indexed key
    pub fn get_all_data(&self) -> Result<HashMap<Vec<u8>, EntryValue>> {
        let positions: Vec<(Vec<u8>, u64)> = self
            .index
            .read()
            .iter()
            .map(|(key, &offset)| (key.clone(), offset))
            .collect();

        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut all = HashMap::with_capacity(positions.len());
        for (key, offset) in positions {
            let entry = self.read_at(&mut reader, &key, offset)?;
            all.insert(entry.key, entry.value);
        }

        Ok(all)
    }

    fn read_at(&self, reader: &mut BufReader<File>, key: &[u8], offset: u64) -> Result<Entry> {
        reader.seek(SeekFrom::Start(offset))?;

        let entry = match read_entry(reader)? {
            Some((entry, _)) => entry,
            None => {
                return Err(SegKvError::CorruptRecord(format!(
                    "offset {} is past the end of segment {}",
                    offset, self.id
                )))
            }
        };

        if entry.key != key {
            return Err(SegKvError::CorruptRecord(format!(
                "record at offset {} in segment {} belongs to another key",
                offset, self.id
            )));
        }

        Ok(entry)
    }

    // =========================================================================
    // File Management
    // =========================================================================

    /// Delete the backing file
    pub fn remove_file(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Move the backing file of a segment whose writer is closed
    pub(crate) fn rename(&mut self, to: &Path) -> Result<()> {
        if self.is_active() {
            return Err(SegKvError::Merge(format!(
                "segment {} still has a writer",
                self.id
            )));
        }
        let id = segment_id_from_path(to).ok_or_else(|| {
            SegKvError::Config(format!("{} is not a segment file name", to.display()))
        })?;

        fs::rename(&self.path, to)?;
        self.id = id;
        self.path = to.to_path_buf();
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bound(&self) -> u64 {
        self.size_bound
    }

    /// Bytes appended to the file so far
    pub fn write_offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Bytes appended plus bytes still queued for the writer
    pub fn reserved_offset(&self) -> u64 {
        self.reserved_offset.load(Ordering::Acquire)
    }

    /// Number of distinct keys indexed (tombstones included)
    pub fn key_count(&self) -> usize {
        self.index.read().len()
    }

    /// Whether this segment still accepts writes
    pub fn is_active(&self) -> bool {
        !self.sealed.load(Ordering::Acquire) && self.writer.lock().is_some()
    }
}

/// Parse the segment id from a path
///
/// "1700000000123456789" → Some(1700000000123456789); suffixes after the
/// first '.' are ignored so in-progress merge files carry their target id.
pub fn segment_id_from_path(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let digits = name.split('.').next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
