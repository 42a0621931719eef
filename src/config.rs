//! Configuration for segkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SegKvError};

/// Main configuration for a segkv database
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the segment files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── 1700000000000000000   (oldest segment)
    ///     ├── ...
    ///     └── 1700000000900000000   (active segment)
    pub data_dir: PathBuf,

    /// Soft ceiling on a segment file's size (in bytes) before rotation
    pub segment_size_bound: u64,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Segment count above which a background merge is started
    pub merge_threshold: usize,

    /// Number of oldest segments folded together by one merge
    pub merge_window: usize,

    // -------------------------------------------------------------------------
    // Write Path Configuration
    // -------------------------------------------------------------------------
    /// Whether the writer syncs to disk before acknowledging a write
    pub sync_strategy: SyncStrategy,

    /// Upper bound on how long a caller waits for its write acknowledgement
    pub write_timeout: Option<Duration>,
}

/// Segment writer sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Rely on the buffered append only (no fsync)
    None,

    /// fsync the data before every acknowledgement (safest, slowest)
    EveryWrite,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./segkv_data"),
            segment_size_bound: 10 * 1024 * 1024, // 10 MB
            merge_threshold: 2,
            merge_window: 2,
            sync_strategy: SyncStrategy::None,
            write_timeout: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the database cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.segment_size_bound == 0 {
            return Err(SegKvError::Config(
                "segment_size_bound must be positive".to_string(),
            ));
        }
        if self.merge_threshold == 0 {
            return Err(SegKvError::Config(
                "merge_threshold must be at least 1".to_string(),
            ));
        }
        if self.merge_window == 0 {
            return Err(SegKvError::Config(
                "merge_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the segment size bound (in bytes)
    pub fn segment_size_bound(mut self, bytes: u64) -> Self {
        self.config.segment_size_bound = bytes;
        self
    }

    /// Set the segment count that triggers a merge
    pub fn merge_threshold(mut self, count: usize) -> Self {
        self.config.merge_threshold = count;
        self
    }

    /// Set how many of the oldest segments one merge folds together
    pub fn merge_window(mut self, count: usize) -> Self {
        self.config.merge_window = count;
        self
    }

    /// Set the writer sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Bound the wait for write acknowledgements
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
