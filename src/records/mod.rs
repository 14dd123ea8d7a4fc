//! Durable key -> bytes storage.
//!
//! Two interchangeable backends implement [`RecordStore`]: a single
//! append-only log file and a directory with one file per record. Every
//! mutating call is on stable storage before it returns.

mod dir;
mod log;

pub use dir::DirStore;
pub use log::LogStore;

use crate::error::Result;

/// Iterator over `(key, payload)` pairs of a record store.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<(String, Vec<u8>)>> + 'a>;

/// Durable key -> bytes storage.
pub trait RecordStore: Send + Sync {
    /// Insert or replace the payload stored under `key`.
    fn put(&mut self, key: &str, payload: &[u8]) -> Result<()>;

    /// Read the payload stored under `key` (`KeyNotFound` if absent).
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete `key`. Returns false if it was not present.
    fn delete(&mut self, key: &str) -> Result<bool>;

    /// Check whether `key` is present.
    fn contains(&self, key: &str) -> bool;

    /// All live keys, in no particular order.
    fn keys(&self) -> Vec<String>;

    /// Number of live records.
    fn len(&self) -> usize;

    /// Remove every record.
    fn clear(&mut self) -> Result<()>;

    /// Total payload bytes of the live record set.
    fn byte_len(&self) -> u64;

    /// Flush anything the backend keeps in OS buffers.
    fn sync(&mut self) -> Result<()>;

    /// Reclaim space held by superseded data. Returns true if work was done.
    fn compact(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Whether the store holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enumerate live records. Payloads are read lazily.
    fn iter(&self) -> RecordIter<'_> {
        Box::new(
            self.keys()
                .into_iter()
                .map(move |key| self.get(&key).map(|payload| (key, payload))),
        )
    }
}
