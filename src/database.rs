//! Database Module
//!
//! The ordered set of segments that makes up a store.
//!
//! ## Responsibilities
//! - Discover and replay existing segments on startup
//! - Route writes to the single active segment, rotating it when full
//! - Resolve reads newest segment → oldest (last write wins)
//! - Trigger background merges when segments pile up

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::entry::Entry;
use crate::error::{Result, SegKvError};
use crate::merge;
use crate::segment::{segment_id_from_path, Segment};

/// The main store handle
///
/// ## Concurrency Model
///
/// - **Writes** (put/delete): `write_lock` serializes the rotation decision
///   and the hand-off to the active segment's writer queue. The caller then
///   waits for its acknowledgement outside the lock, so writers to one
///   segment overlap while the segment's writer thread keeps them ordered.
///
/// - **Reads** (get): hold a read lock on the segment list for the whole
///   scan, so a merge can never delete a file a lookup is about to open.
///
/// - **Merges**: run on a background thread and take the segment list's
///   write lock only to swap the merged window for its replacement.
pub struct Database {
    inner: Arc<DbInner>,
}

/// Shared state, also held by the background merge thread
pub(crate) struct DbInner {
    pub(crate) config: Config,

    /// Segments ordered oldest → newest; the last one is active
    pub(crate) segments: RwLock<Vec<Arc<Segment>>>,

    /// Serializes rotation decisions and writer hand-off
    write_lock: Mutex<()>,

    /// Highest segment id handed out so far
    last_segment_id: AtomicU64,

    /// Advisory flag preventing overlapping merges
    pub(crate) merge_in_progress: AtomicBool,

    /// Handle of the most recent background merge thread
    pub(crate) merge_thread: Mutex<Option<JoinHandle<()>>>,

    pub(crate) merges_completed: AtomicU64,

    pub(crate) closed: AtomicBool,
}

/// Point-in-time summary of a database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStats {
    /// Number of segment files, active one included
    pub segment_count: usize,

    /// Keys indexed across all segments (a key in two segments counts twice)
    pub indexed_keys: usize,

    /// Total bytes across all segment logs
    pub total_bytes: u64,

    /// Merges finished since open
    pub merges_completed: u64,
}

impl Database {
    /// Open or create a database in `dir` with default settings otherwise
    pub fn open(dir: impl AsRef<Path>, segment_size_bound: u64) -> Result<Self> {
        let config = Config::builder()
            .data_dir(dir.as_ref())
            .segment_size_bound(segment_size_bound)
            .build();
        Self::open_with_config(config)
    }

    /// Open or create a database with the given config
    ///
    /// On startup:
    /// 1. Create the data directory if it doesn't exist
    /// 2. Finish or discard merges interrupted by a crash
    /// 3. Replay every segment file, oldest first
    /// 4. Start a fresh active segment
    pub fn open_with_config(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        merge::finish_interrupted(&config.data_dir)?;

        let ids = discover_segment_ids(&config.data_dir)?;

        let mut segments = Vec::with_capacity(ids.len() + 1);
        let mut entries_replayed = 0;
        for &id in &ids {
            let path = segment_path(&config.data_dir, id);
            let segment = Segment::open_with(
                &path,
                false,
                config.segment_size_bound,
                config.sync_strategy,
            )?;
            entries_replayed += segment.recover()?.entries_replayed;
            segments.push(Arc::new(segment));
        }

        let inner = Arc::new(DbInner {
            last_segment_id: AtomicU64::new(ids.last().copied().unwrap_or(0)),
            config,
            segments: RwLock::new(segments),
            write_lock: Mutex::new(()),
            merge_in_progress: AtomicBool::new(false),
            merge_thread: Mutex::new(None),
            merges_completed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let active = inner.create_segment()?;
        inner.segments.write().push(active);

        tracing::info!(
            dir = %inner.config.data_dir.display(),
            segments = inner.segment_count(),
            entries_replayed,
            "Database opened"
        );

        if inner.segment_count() > inner.config.merge_threshold {
            merge::schedule(&inner);
        }

        Ok(Self { inner })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Get a value by key
    ///
    /// Searches segments newest → oldest. Returns `Ok(None)` when the key
    /// was never written or its latest record is a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        let segments = self.inner.segments.read();
        for segment in segments.iter().rev() {
            match segment.get(key) {
                Ok(value) => return Ok(value),             // Found (None = tombstone)
                Err(SegKvError::KeyNotFound) => continue, // Not in this segment
                Err(e) => return Err(e),                  // Real error
            }
        }

        Ok(None)
    }

    /// Put a key-value pair, blocking until it is appended
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(Entry::put(key, value))
    }

    /// Delete a key by appending a tombstone
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(Entry::tombstone(key))
    }

    fn write(&self, entry: Entry) -> Result<()> {
        self.ensure_open()?;

        let ticket = {
            let _write_guard = self.inner.write_lock.lock();
            // close() may have stopped every writer while we waited
            self.ensure_open()?;

            let mut active = self.inner.active_segment()?;
            if self.inner.needs_rotation(&active, entry.encoded_len() as u64) {
                active = self.inner.rotate(&active)?;

                if self.inner.segment_count() > self.inner.config.merge_threshold {
                    merge::schedule(&self.inner);
                }
            }

            active.submit(entry)?
        };

        ticket.wait(self.inner.config.write_timeout)
    }

    /// Run one merge on the calling thread
    ///
    /// Returns `Ok(false)` when another merge is running or there is
    /// nothing old enough to merge.
    pub fn compact(&self) -> Result<bool> {
        self.ensure_open()?;
        merge::run_merge(&self.inner)
    }

    /// Block until the current background merge (if any) has finished
    pub fn wait_for_merge(&self) {
        let handle = self.inner.merge_thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Merge thread panicked");
            }
        }
    }

    /// Close the database
    ///
    /// Waits for any background merge, then stops every writer. Calling it
    /// again is a no-op; other operations afterwards return `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.wait_for_merge();

        let _write_guard = self.inner.write_lock.lock();
        for segment in self.inner.segments.read().iter() {
            segment.close()?;
        }

        tracing::info!(dir = %self.inner.config.data_dir.display(), "Database closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the number of segments, active one included
    pub fn segment_count(&self) -> usize {
        self.inner.segment_count()
    }

    /// Segment ids, oldest first
    pub fn segment_ids(&self) -> Vec<u64> {
        self.inner.segments.read().iter().map(|s| s.id()).collect()
    }

    pub fn stats(&self) -> DbStats {
        let segments = self.inner.segments.read();
        DbStats {
            segment_count: segments.len(),
            indexed_keys: segments.iter().map(|s| s.key_count()).sum(),
            total_bytes: segments.iter().map(|s| s.write_offset()).sum(),
            merges_completed: self.inner.merges_completed.load(Ordering::Acquire),
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &DbInner {
        &self.inner
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(SegKvError::Closed);
        }
        Ok(())
    }
}

impl DbInner {
    pub(crate) fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    fn active_segment(&self) -> Result<Arc<Segment>> {
        self.segments
            .read()
            .last()
            .cloned()
            .ok_or(SegKvError::NoWriter)
    }

    /// Whether `record_len` more bytes must go to a fresh segment
    ///
    /// An empty segment always takes the record, so a single oversized
    /// record still lands somewhere.
    fn needs_rotation(&self, active: &Segment, record_len: u64) -> bool {
        if !active.is_active() {
            return true;
        }
        let reserved = active.reserved_offset();
        reserved > 0 && reserved + record_len > self.config.segment_size_bound
    }

    /// Retire the active segment and append a new one (write lock held)
    fn rotate(&self, current: &Segment) -> Result<Arc<Segment>> {
        current.close_writer();

        let next = self.create_segment()?;
        self.segments.write().push(Arc::clone(&next));

        tracing::info!(
            retired = current.id(),
            retired_bytes = current.write_offset(),
            active = next.id(),
            "Rotated active segment"
        );

        Ok(next)
    }

    fn create_segment(&self) -> Result<Arc<Segment>> {
        let id = self.next_segment_id();
        let path = segment_path(&self.config.data_dir, id);
        let segment = Segment::open_with(
            &path,
            true,
            self.config.segment_size_bound,
            self.config.sync_strategy,
        )?;
        Ok(Arc::new(segment))
    }

    /// Nanosecond timestamp, bumped past the previous id if the clock lags
    fn next_segment_id(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let previous = self
            .last_segment_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);

        now.max(previous + 1)
    }
}

/// File path of the segment with the given id
pub(crate) fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(id.to_string())
}

/// Ids of all segment files in `dir`, ascending
///
/// Files whose names are not plain decimal timestamps are skipped.
fn discover_segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if !entry.file_type()?.is_file() {
            continue;
        }

        let is_plain_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| !n.contains('.'))
            .unwrap_or(false);

        match segment_id_from_path(&path) {
            Some(id) if is_plain_name => ids.push(id),
            _ => tracing::warn!(file = %path.display(), "Skipping non-segment file"),
        }
    }

    ids.sort_unstable();
    Ok(ids)
}
