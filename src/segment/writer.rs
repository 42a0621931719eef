//! Segment Writer
//!
//! A dedicated thread that owns the segment file and appends entries in
//! the order they were submitted.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;

use crate::config::SyncStrategy;
use crate::entry::{encode, Entry};
use crate::error::{Result, SegKvError};

/// A queued write and the channel its acknowledgement goes back on
struct WriteRequest {
    entry: Entry,
    ack: Sender<Result<()>>,
}

/// State the writer thread shares with its segment
pub(super) struct WriterShared {
    pub(super) segment_id: u64,
    pub(super) index: Arc<RwLock<HashMap<Vec<u8>, u64>>>,
    pub(super) write_offset: Arc<AtomicU64>,
    pub(super) sealed: Arc<AtomicBool>,
    pub(super) size_bound: u64,
    pub(super) sync_strategy: SyncStrategy,
}

/// Handle to a running writer thread
pub(super) struct WriterHandle {
    sender: Sender<WriteRequest>,
    thread: JoinHandle<()>,
}

impl WriterHandle {
    /// Start the writer thread; it owns `file` from here on
    pub(super) fn spawn(file: File, shared: WriterShared) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let thread = thread::Builder::new()
            .name(format!("segkv-writer-{}", shared.segment_id))
            .spawn(move || write_loop(file, receiver, shared))?;

        Ok(Self { sender, thread })
    }

    /// Queue an entry; the returned ticket resolves once it is on disk
    pub(super) fn submit(&self, entry: Entry) -> Result<WriteTicket> {
        let (ack, receiver) = channel::bounded(1);
        self.sender
            .send(WriteRequest { entry, ack })
            .map_err(|_| SegKvError::NoWriter)?;
        Ok(WriteTicket { receiver })
    }

    /// Stop accepting writes and wait for queued ones to be acknowledged
    pub(super) fn shutdown(self) {
        let WriterHandle { sender, thread } = self;
        drop(sender);
        if thread.join().is_err() {
            tracing::error!("Segment writer thread panicked");
        }
    }
}

/// Pending acknowledgement of a submitted write
#[must_use = "a write is not known to have succeeded until its ticket is waited on"]
pub struct WriteTicket {
    receiver: Receiver<Result<()>>,
}

impl WriteTicket {
    /// Block until the writer acknowledges the write
    ///
    /// A writer that stopped before reaching this write reports `NoWriter`.
    pub fn wait(self, timeout: Option<Duration>) -> Result<()> {
        match timeout {
            None => self.receiver.recv().map_err(|_| SegKvError::NoWriter)?,
            Some(limit) => match self.receiver.recv_timeout(limit) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(SegKvError::WriteTimeout(limit)),
                Err(RecvTimeoutError::Disconnected) => Err(SegKvError::NoWriter),
            },
        }
    }
}

fn write_loop(mut file: File, receiver: Receiver<WriteRequest>, shared: WriterShared) {
    tracing::debug!(segment = shared.segment_id, "Writer started");

    for request in receiver.iter() {
        let result = append(&mut file, &request.entry, &shared);
        let failed = result.is_err();

        // The caller may have timed out and gone away
        let _ = request.ack.send(result);

        if failed {
            tracing::warn!(segment = shared.segment_id, "Write failed, sealing segment");
            break;
        }
        if shared.write_offset.load(Ordering::Acquire) > shared.size_bound {
            tracing::debug!(
                segment = shared.segment_id,
                offset = shared.write_offset.load(Ordering::Acquire),
                "Size bound exceeded, sealing segment"
            );
            break;
        }
    }

    // Requests still queued are dropped; their tickets see NoWriter
    shared.sealed.store(true, Ordering::Release);
    tracing::debug!(segment = shared.segment_id, "Writer stopped");
}

fn append(file: &mut File, entry: &Entry, shared: &WriterShared) -> Result<()> {
    let record = encode(entry)?;
    let offset = shared.write_offset.load(Ordering::Acquire);

    // Single write call for the entire record
    file.write_all(&record)?;
    file.flush()?;
    if shared.sync_strategy == SyncStrategy::EveryWrite {
        file.sync_data()?;
    }

    // Tombstones are indexed too so a delete shadows older values
    shared.index.write().insert(entry.key.clone(), offset);
    shared
        .write_offset
        .store(offset + record.len() as u64, Ordering::Release);

    Ok(())
}
