//! # segkv
//!
//! An embeddable, persistent key-value store with:
//! - Append-only segment logs with an in-memory hash index per segment
//! - One writer thread per active segment, totally ordering its appends
//! - Segment rotation at a configurable size bound
//! - Background merging of the oldest segments
//! - Recovery by replaying every segment log on open
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Database                            │
//! │        put / delete ──► active segment (rotation)           │
//! │        get ──► segments newest → oldest                     │
//! └───────┬──────────────────────────────────────┬──────────────┘
//!         │                                      │ segment count
//!         ▼                                      ▼ > threshold
//!  ┌────────────┬────────────┬────────────┐  ┌─────────────┐
//!  │ Segment 1  │ Segment 2  │  Active    │  │    Merge    │
//!  │ (readonly) │ (readonly) │  Segment   │◄─┤  (thread)   │
//!  │ hash index │ hash index │  + writer  │  └─────────────┘
//!  └────────────┴────────────┴────────────┘
//!         │             │            │
//!         ▼             ▼            ▼
//!     {dir}/<ts>    {dir}/<ts>   {dir}/<ts>     (framed entries)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use segkv::Database;
//!
//! let db = Database::open("./data", 10 * 1024 * 1024).unwrap();
//! db.put(b"hello", b"world").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//! db.delete(b"hello").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), None);
//! db.close().unwrap();
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod database;
pub mod entry;
mod merge;
pub mod segment;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, SyncStrategy};
pub use database::{Database, DbStats};
pub use error::{Result, SegKvError};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of segkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
