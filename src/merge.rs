//! Merge Module
//!
//! Background compaction: folds the oldest segments into one, dropping
//! superseded values and tombstoned keys.
//!
//! ## Commit Protocol
//! ```text
//!   {id}.merging   output being written (discarded on restart)
//!        │ sync + rename            ◄── commit point
//!        ▼
//!   {id}.merged    complete output (restart finishes the merge)
//!        │ delete window files, rename
//!        ▼
//!   {id}           ordinary read-only segment
//! ```
//! `id` is the newest id in the merged window, so the output sorts exactly
//! where the window sat. Every segment file with an id at or below it was
//! part of the window.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::database::{segment_path, DbInner};
use crate::entry::{Entry, EntryValue};
use crate::error::{Result, SegKvError};
use crate::segment::{segment_id_from_path, Segment};

const MERGING_SUFFIX: &str = "merging";
const MERGED_SUFFIX: &str = "merged";

/// Holds the merge-in-progress flag; dropping it clears the flag
struct MergeGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> MergeGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Start a background merge unless one is already running
///
/// The thread keeps merging while the segment count stays above the
/// threshold, so rotations that happen mid-merge are caught up on.
pub(crate) fn schedule(db: &Arc<DbInner>) {
    if db.closed.load(Ordering::Acquire) || db.merge_in_progress.load(Ordering::Acquire) {
        return;
    }

    let mut slot = db.merge_thread.lock();
    if let Some(previous) = slot.take() {
        if !previous.is_finished() {
            *slot = Some(previous);
            return;
        }
        let _ = previous.join();
    }

    let db = Arc::clone(db);
    let spawned = thread::Builder::new()
        .name("segkv-merge".to_string())
        .spawn(move || loop {
            let before = db.segment_count();
            match run_merge(&db) {
                Ok(true) => {
                    let after = db.segment_count();
                    if db.closed.load(Ordering::Acquire)
                        || after <= db.config.merge_threshold
                        || after >= before
                    {
                        break;
                    }
                }
                Ok(false) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Background merge failed");
                    break;
                }
            }
        });

    match spawned {
        Ok(handle) => *slot = Some(handle),
        Err(e) => tracing::error!(error = %e, "Failed to start merge thread"),
    }
}

/// Merge the oldest segments into one
///
/// Returns `Ok(false)` without doing anything if another merge holds the
/// flag or only the active segment exists.
pub(crate) fn run_merge(db: &DbInner) -> Result<bool> {
    let _guard = match MergeGuard::acquire(&db.merge_in_progress) {
        Some(guard) => guard,
        None => return Ok(false),
    };

    // Step 1: Select the window (never the active segment)
    let window: Vec<Arc<Segment>> = {
        let segments = db.segments.read();
        if segments.len() < 2 {
            return Ok(false);
        }
        let count = db.config.merge_window.min(segments.len() - 1);
        segments[..count].to_vec()
    };
    let output_id = match window.last() {
        Some(segment) => segment.id(),
        None => return Ok(false),
    };

    tracing::debug!(
        window = ?window.iter().map(|s| s.id()).collect::<Vec<_>>(),
        "Merge started"
    );

    // Step 2: Fold oldest → newest; tombstones drop the key entirely
    let mut live: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    for segment in &window {
        for (key, value) in segment.get_all_data()? {
            match value {
                EntryValue::Value(v) => {
                    live.insert(key, v);
                }
                EntryValue::Tombstone => {
                    live.remove(&key);
                }
            }
        }
    }

    // Step 3: Write and commit the replacement before touching the window
    let merging_path = suffixed_path(&db.config.data_dir, output_id, MERGING_SUFFIX);
    let mut output = match write_output(db, &merging_path, live) {
        Ok(output) => output,
        Err(e) => {
            let _ = fs::remove_file(&merging_path);
            return Err(e);
        }
    };
    let merged_path = suffixed_path(&db.config.data_dir, output_id, MERGED_SUFFIX);
    if let Err(e) = output.rename(&merged_path) {
        let _ = fs::remove_file(&merging_path);
        return Err(e);
    }

    // Step 4: Swap the window for the output in one step
    let keys = output.key_count();
    let bytes = output.write_offset();
    let (segment_count, commit_error) = install(db, &window, output)?;

    if let Some(e) = commit_error {
        return Err(SegKvError::Merge(format!(
            "merged segment {} committed but not finalized: {}",
            output_id, e
        )));
    }

    db.merges_completed.fetch_add(1, Ordering::AcqRel);
    tracing::info!(
        merged = window.len(),
        output = output_id,
        keys,
        bytes,
        segments = segment_count,
        "Merge completed"
    );

    Ok(true)
}

/// Replace the window at the front of the segment list with `output`
///
/// `output` must already carry its committed `.merged` name. Returns the
/// new segment count and any error hit while finalizing file names; the
/// output is spliced in either way once the window files are touched.
fn install(
    db: &DbInner,
    window: &[Arc<Segment>],
    mut output: Segment,
) -> Result<(usize, Option<SegKvError>)> {
    let mut segments = db.segments.write();

    let prefix_matches = segments.len() > window.len()
        && segments
            .iter()
            .zip(window)
            .all(|(current, merged)| current.id() == merged.id());
    if !prefix_matches {
        drop(segments);
        // Left in place, the next open would finish a merge of the wrong window
        let _ = output.remove_file();
        return Err(SegKvError::Merge(
            "segment list changed underneath the merge".to_string(),
        ));
    }

    let mut commit_error: Option<SegKvError> = None;
    for segment in window {
        if let Err(e) = segment.remove_file() {
            commit_error.get_or_insert(e);
        }
    }

    // If cleanup failed the committed name stays; the next open finishes it
    if commit_error.is_none() {
        let final_path = segment_path(&db.config.data_dir, output.id());
        if let Err(e) = output.rename(&final_path) {
            commit_error = Some(e);
        }
    }

    segments.splice(..window.len(), std::iter::once(Arc::new(output)));
    Ok((segments.len(), commit_error))
}

/// Write every surviving pair through a fresh writer, then make it durable
fn write_output(db: &DbInner, path: &Path, live: BTreeMap<Vec<u8>, Vec<u8>>) -> Result<Segment> {
    // The output is never appended to after the merge, so it is not bound
    let output = Segment::open_with(path, true, u64::MAX, db.config.sync_strategy)?;

    for (key, value) in live {
        if let Err(e) = output.put(Entry::put(key, value)) {
            output.close_writer();
            return Err(e);
        }
    }
    output.close_writer();

    File::open(path)?.sync_all()?;
    Ok(output)
}

/// Complete or discard merges a crash interrupted
///
/// `.merging` files never reached the commit point and are removed. A
/// `.merged` file is complete: every segment at or below its id is
/// deleted before it takes its final name.
pub(crate) fn finish_interrupted(dir: &Path) -> Result<()> {
    let mut committed = Vec::new();
    let mut segment_ids = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        match (segment_id_from_path(&path), name.split_once('.')) {
            (Some(_), Some((_, MERGING_SUFFIX))) => {
                tracing::warn!(file = %path.display(), "Discarding incomplete merge output");
                fs::remove_file(&path)?;
            }
            (Some(id), Some((_, MERGED_SUFFIX))) => committed.push(id),
            (Some(id), None) => segment_ids.push(id),
            _ => {}
        }
    }

    committed.sort_unstable();
    for id in committed {
        for &old in segment_ids.iter().filter(|&&old| old <= id) {
            let path = segment_path(dir, old);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        fs::rename(
            suffixed_path(dir, id, MERGED_SUFFIX),
            segment_path(dir, id),
        )?;
        tracing::info!(segment = id, "Finished interrupted merge");
    }

    Ok(())
}

fn suffixed_path(dir: &Path, id: u64, suffix: &str) -> PathBuf {
    dir.join(format!("{}.{}", id, suffix))
}
