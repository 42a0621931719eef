//! Tests for Segment
//!
//! These tests verify:
//! - Writes through the writer thread are readable by key
//! - Tombstones resolve as present-but-deleted
//! - Writers are closed explicitly or by exceeding the size bound
//! - Concurrent writers never interleave records

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use segkv::entry::{Entry, EntryValue};
use segkv::segment::{segment_id_from_path, Segment};
use segkv::SegKvError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_segment() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1700000000000000000");
    (temp_dir, path)
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_active_creates_file() {
    let (_temp, path) = setup_temp_segment();

    let segment = Segment::open(&path, true, 1024).unwrap();

    assert!(path.exists());
    assert!(segment.is_active());
    assert_eq!(segment.id(), 1700000000000000000);
    assert_eq!(segment.write_offset(), 0);
    assert_eq!(segment.key_count(), 0);
}

#[test]
fn test_open_inactive_has_no_writer() {
    let (_temp, path) = setup_temp_segment();

    let segment = Segment::open(&path, false, 1024).unwrap();

    assert!(!segment.is_active());
    assert!(matches!(
        segment.put(Entry::put(b"k".to_vec(), b"v".to_vec())),
        Err(SegKvError::NoWriter)
    ));
}

#[test]
fn test_open_rejects_non_numeric_name() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("current-data");

    assert!(matches!(
        Segment::open(&path, true, 1024),
        Err(SegKvError::Config(_))
    ));
}

#[test]
fn test_segment_id_from_path() {
    assert_eq!(segment_id_from_path(&PathBuf::from("/tmp/42")), Some(42));
    assert_eq!(segment_id_from_path(&PathBuf::from("42.merging")), Some(42));
    assert_eq!(segment_id_from_path(&PathBuf::from("abc")), None);
    assert_eq!(segment_id_from_path(&PathBuf::from(".hidden")), None);
    assert_eq!(segment_id_from_path(&PathBuf::from("-5")), None);
}

// =============================================================================
// Put/Get Tests
// =============================================================================

#[test]
fn test_put_get() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    segment.put(Entry::put(b"hello".to_vec(), b"world".to_vec())).unwrap();

    assert_eq!(segment.get(b"hello").unwrap(), Some(b"world".to_vec()));
}

#[test]
fn test_get_missing_key() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    assert!(matches!(segment.get(b"missing"), Err(SegKvError::KeyNotFound)));
}

#[test]
fn test_last_write_in_segment_wins() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    segment.put(Entry::put(b"key".to_vec(), b"v1".to_vec())).unwrap();
    segment.put(Entry::put(b"key".to_vec(), b"v2".to_vec())).unwrap();

    assert_eq!(segment.get(b"key").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(segment.key_count(), 1);
}

#[test]
fn test_tombstone_reads_as_deleted() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    segment.put(Entry::put(b"key".to_vec(), b"value".to_vec())).unwrap();
    segment.put(Entry::tombstone(b"key".to_vec())).unwrap();

    // Present in the index, but deleted
    assert_eq!(segment.get(b"key").unwrap(), None);
}

#[test]
fn test_write_offset_advances_by_record_size() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    let first = Entry::put(b"a".to_vec(), b"12345".to_vec());
    let second = Entry::tombstone(b"a".to_vec());
    let expected = (first.encoded_len() + second.encoded_len()) as u64;

    segment.put(first).unwrap();
    segment.put(second).unwrap();

    assert_eq!(segment.write_offset(), expected);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
}

#[test]
fn test_get_all_data_includes_tombstones() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    segment.put(Entry::put(b"a".to_vec(), b"1".to_vec())).unwrap();
    segment.put(Entry::put(b"b".to_vec(), b"2".to_vec())).unwrap();
    segment.put(Entry::put(b"a".to_vec(), b"3".to_vec())).unwrap();
    segment.put(Entry::tombstone(b"b".to_vec())).unwrap();

    let all = segment.get_all_data().unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(all.get(b"a".as_slice()), Some(&EntryValue::Value(b"3".to_vec())));
    assert_eq!(all.get(b"b".as_slice()), Some(&EntryValue::Tombstone));
}

// =============================================================================
// Writer Lifecycle Tests
// =============================================================================

#[test]
fn test_close_writer_rejects_later_puts() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    segment.put(Entry::put(b"k".to_vec(), b"v".to_vec())).unwrap();
    segment.close_writer();

    assert!(!segment.is_active());
    assert!(matches!(
        segment.put(Entry::put(b"k2".to_vec(), b"v2".to_vec())),
        Err(SegKvError::NoWriter)
    ));
    // Reads keep working on a closed segment
    assert_eq!(segment.get(b"k").unwrap(), Some(b"v".to_vec()));

    // Closing twice is harmless
    segment.close_writer();
    segment.close().unwrap();
}

#[test]
fn test_close_writer_acknowledges_queued_writes() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024 * 1024).unwrap();

    let tickets: Vec<_> = (0..50)
        .map(|i| {
            segment
                .submit(Entry::put(format!("key{}", i), format!("value{}", i)))
                .unwrap()
        })
        .collect();

    segment.close_writer();

    for ticket in tickets {
        ticket.wait(Some(Duration::from_secs(5))).unwrap();
    }
    assert_eq!(segment.key_count(), 50);
}

#[test]
fn test_writer_seals_after_exceeding_bound() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 32).unwrap();

    // 12 + 3 + 30 = 45 bytes, past the 32 byte bound
    segment.put(Entry::put(b"big".to_vec(), vec![1u8; 30])).unwrap();

    // The writer stops on its own once the bound is crossed
    for _ in 0..100 {
        if !segment.is_active() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!segment.is_active());
    assert!(matches!(
        segment.put(Entry::put(b"more".to_vec(), b"x".to_vec())),
        Err(SegKvError::NoWriter)
    ));
    assert_eq!(segment.get(b"big").unwrap(), Some(vec![1u8; 30]));
}

#[test]
fn test_reserved_offset_counts_submitted_bytes() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    let entry = Entry::put(b"key".to_vec(), b"value".to_vec());
    let len = entry.encoded_len() as u64;
    let ticket = segment.submit(entry).unwrap();

    assert_eq!(segment.reserved_offset(), len);
    ticket.wait(None).unwrap();
    assert_eq!(segment.write_offset(), len);
}

#[test]
fn test_wait_with_timeout_acknowledges_write() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    let ticket = segment
        .submit(Entry::put(b"key".to_vec(), b"value".to_vec()))
        .unwrap();

    ticket.wait(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(segment.get(b"key").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn test_wait_on_dropped_request_reports_no_writer() {
    let (_temp, path) = setup_temp_segment();
    // The first record crosses the bound, so the writer stops after it
    let segment = Segment::open(&path, true, 16).unwrap();

    let first = segment
        .submit(Entry::put(b"big".to_vec(), vec![1u8; 30]))
        .unwrap();
    // Either refused outright or dropped from the queue once the writer stops
    let second = segment
        .submit(Entry::put(b"next".to_vec(), b"x".to_vec()))
        .and_then(|ticket| ticket.wait(Some(Duration::from_secs(5))));

    first.wait(Some(Duration::from_secs(5))).unwrap();
    assert!(matches!(second, Err(SegKvError::NoWriter)));
    assert!(matches!(segment.get(b"next"), Err(SegKvError::KeyNotFound)));
}

#[test]
fn test_submit_after_close_writer_reports_no_writer() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::open(&path, true, 1024).unwrap();

    segment.close_writer();

    assert!(matches!(
        segment.submit(Entry::put(b"k".to_vec(), b"v".to_vec())),
        Err(SegKvError::NoWriter)
    ));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_then_recovery() {
    let (_temp, path) = setup_temp_segment();
    let segment = Arc::new(Segment::open(&path, true, u64::MAX).unwrap());

    let mut handles = vec![];
    for t in 0..8 {
        let segment = Arc::clone(&segment);
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                let key = format!("thread{}_key{}", t, i);
                let value = format!("thread{}_value{}", t, i);
                segment.put(Entry::put(key, value)).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    segment.close_writer();

    // A fresh replay must see every record intact
    let replayed = Segment::open(&path, false, u64::MAX).unwrap();
    let stats = replayed.recover().unwrap();

    assert_eq!(stats.entries_replayed, 400);
    assert_eq!(replayed.key_count(), 400);
    assert_eq!(replayed.write_offset(), segment.write_offset());
    for t in 0..8 {
        for i in 0..50 {
            let key = format!("thread{}_key{}", t, i);
            let expected = format!("thread{}_value{}", t, i);
            assert_eq!(replayed.get(key.as_bytes()).unwrap(), Some(expected.into_bytes()));
        }
    }
}

#[test]
fn test_concurrent_reads_during_writes() {
    let (_temp, path) = setup_temp_segment();
    let segment = Arc::new(Segment::open(&path, true, u64::MAX).unwrap());

    for i in 0..20 {
        segment
            .put(Entry::put(format!("stable{}", i), format!("value{}", i)))
            .unwrap();
    }

    let writer = {
        let segment = Arc::clone(&segment);
        thread::spawn(move || {
            for i in 0..200 {
                segment
                    .put(Entry::put(format!("new{}", i), vec![b'x'; 64]))
                    .unwrap();
            }
        })
    };

    let mut readers = vec![];
    for _ in 0..4 {
        let segment = Arc::clone(&segment);
        readers.push(thread::spawn(move || {
            for _ in 0..10 {
                for i in 0..20 {
                    let key = format!("stable{}", i);
                    let expected = format!("value{}", i);
                    assert_eq!(segment.get(key.as_bytes()).unwrap(), Some(expected.into_bytes()));
                }
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}
