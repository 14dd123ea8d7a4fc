//! Error types for persistent collections.

use crate::types::{Backend, CollectionKind};
use thiserror::Error;

/// Main error type for collection operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Index {index} out of range (count is {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Collection is empty")]
    EmptyCollection,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Collection root is locked by another open instance")]
    Locked,

    #[error("Collection is closed")]
    Closed,

    #[error("Collection root not initialized")]
    NotInitialized,

    #[error("Collection kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        expected: CollectionKind,
        found: CollectionKind,
    },

    #[error("Storage backend mismatch: requested {expected}, found {found}")]
    BackendMismatch { expected: Backend, found: Backend },

    #[error("Worker error: {0}")]
    Worker(String),
}

impl StoreError {
    /// True for caller mistakes that are rejected before any storage is touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidArgument(_)
                | StoreError::IndexOutOfRange { .. }
                | StoreError::KeyNotFound(_)
                | StoreError::DuplicateKey(_)
                | StoreError::EmptyCollection
        )
    }

    /// True for failures of the underlying files (StorageIO / StorageCorruption).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::Corruption(_)
                | StoreError::ChecksumMismatch { .. }
                | StoreError::InvalidFormat(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            StoreError::Deserialization(e.to_string())
        } else {
            StoreError::Serialization(e.to_string())
        }
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for collection operations.
pub type Result<T> = std::result::Result<T, StoreError>;
