//! Collection configuration.

use crate::types::Backend;
use std::path::{Path, PathBuf};

/// Default LRU cache size for the directory backend (entries).
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// Default number of async worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Default dead-byte threshold for automatic log compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: u64 = 1024 * 1024;

/// Collection configuration.
#[derive(Clone, Debug)]
pub struct CollectionConfig {
    /// Persistence root (a directory).
    pub path: PathBuf,

    /// Record store layout. `None` uses the root's manifest, or the log
    /// backend for a new root.
    pub backend: Option<Backend>,

    /// Wipe an existing root before opening it.
    pub reset: bool,

    /// Whether to create the root if it doesn't exist.
    pub create_if_missing: bool,

    /// Record cache size (number of payloads, directory backend).
    pub cache_size: usize,

    /// Worker threads for async operations. Started on first use.
    pub worker_threads: usize,

    /// Dead bytes in the record log before it is compacted.
    pub compaction_threshold: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./collection"),
            backend: None,
            reset: false,
            create_if_missing: true,
            cache_size: DEFAULT_CACHE_SIZE,
            worker_threads: DEFAULT_WORKER_THREADS,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

impl CollectionConfig {
    /// Default configuration for the root at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn cache_size(mut self, entries: usize) -> Self {
        self.cache_size = entries;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn compaction_threshold(mut self, bytes: u64) -> Self {
        self.compaction_threshold = bytes;
        self
    }
}
