//! Directory record store.
//!
//! Each record is its own file, named by the SHA-256 of its key and sharded
//! into directories by the first byte of the hash (like Git objects).
//! Writes go through a temp file and an atomic rename.

use crate::error::{Result, StoreError};
use crate::fsutil;
use crate::records::RecordStore;
use crate::types::MAX_KEY_LEN;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes for record files.
const RECORD_MAGIC: &[u8; 4] = b"REC\0";

/// Current record file format version.
const RECORD_VERSION: u8 = 1;

/// Extension of committed record files.
const RECORD_EXT: &str = "rec";

/// Record store with one file per record.
pub struct DirStore {
    /// Base directory for record files.
    path: PathBuf,

    /// Live key -> payload size.
    entries: HashMap<String, u64>,

    /// LRU cache for recently accessed payloads.
    cache: Mutex<LruCache<String, Vec<u8>>>,
}

impl DirStore {
    /// Open or create a directory record store, indexing the files present.
    pub fn open(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        let mut store = Self {
            path,
            entries: HashMap::new(),
            cache: Mutex::new(LruCache::new(cache_size)),
        };
        store.scan()?;

        Ok(store)
    }

    /// Index every record file, removing leftovers of interrupted writes.
    fn scan(&mut self) -> Result<()> {
        for shard in fs::read_dir(&self.path)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }

            for entry in fs::read_dir(shard.path())? {
                let file_path = entry?.path();
                match file_path.extension().and_then(|e| e.to_str()) {
                    Some(RECORD_EXT) => {
                        let (key, payload) = read_record_file(&file_path)?;
                        self.entries.insert(key, payload.len() as u64);
                    }
                    Some(fsutil::TMP_SUFFIX) => {
                        warn!(path = %file_path.display(), "removing unfinished record write");
                        fs::remove_file(&file_path)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Hex SHA-256 of a key.
    fn key_hash(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Get the shard directory for a key.
    fn shard_path(&self, hash: &str) -> PathBuf {
        self.path.join(&hash[..2])
    }

    /// Get the full path for a record file.
    fn record_path(&self, key: &str) -> PathBuf {
        let hash = Self::key_hash(key);
        self.shard_path(&hash)
            .join(format!("{}.{}", hash, RECORD_EXT))
    }
}

impl RecordStore for DirStore {
    fn put(&mut self, key: &str, payload: &[u8]) -> Result<()> {
        let bytes = encode_record(key, payload)?;

        let record_path = self.record_path(key);
        if let Some(shard) = record_path.parent() {
            fs::create_dir_all(shard)?;
        }
        fsutil::write_atomic(&record_path, &bytes)?;

        self.entries.insert(key.to_string(), payload.len() as u64);
        self.cache.lock().put(key.to_string(), payload.to_vec());

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        if !self.entries.contains_key(key) {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }

        if let Some(cached) = self.cache.lock().get(key).cloned() {
            return Ok(cached);
        }

        let (stored_key, payload) = read_record_file(&self.record_path(key))?;
        if stored_key != key {
            return Err(StoreError::Corruption(format!(
                "Record file for {} holds key {}",
                key, stored_key
            )));
        }

        self.cache.lock().put(key.to_string(), payload.clone());
        Ok(payload)
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        if self.entries.remove(key).is_none() {
            return Ok(false);
        }
        self.cache.lock().pop(key);

        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) -> Result<()> {
        self.cache.lock().clear();
        self.entries.clear();

        for shard in fs::read_dir(&self.path)? {
            let shard = shard?;
            if shard.file_type()?.is_dir() {
                fs::remove_dir_all(shard.path())?;
            }
        }
        fsutil::sync_dir(&self.path);

        Ok(())
    }

    fn byte_len(&self) -> u64 {
        self.entries.values().sum()
    }

    fn sync(&mut self) -> Result<()> {
        // Every put is already synced through the atomic rename.
        fsutil::sync_dir(&self.path);
        Ok(())
    }
}

fn encode_record(key: &str, payload: &[u8]) -> Result<Vec<u8>> {
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidArgument(format!(
            "Key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        StoreError::InvalidArgument(format!("Payload of {} bytes is too large", payload.len()))
    })?;

    let mut buf = Vec::with_capacity(4 + 1 + 2 + key.len() + 4 + payload.len() + 4);
    buf.extend_from_slice(RECORD_MAGIC);
    buf.push(RECORD_VERSION);
    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(payload);

    let checksum = crc32fast::hash(&buf[5..]);
    buf.extend_from_slice(&checksum.to_le_bytes());

    Ok(buf)
}

fn read_record_file(path: &Path) -> Result<(String, Vec<u8>)> {
    let mut file = File::open(path)?;
    let truncated =
        |_: std::io::Error| StoreError::Corruption(format!("Record file {} is truncated", path.display()));

    // Read and verify magic
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(truncated)?;
    if &magic != RECORD_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid record file magic".into()));
    }

    // Read version
    let mut version = [0u8; 1];
    file.read_exact(&mut version).map_err(truncated)?;
    if version[0] != RECORD_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported record file version: {}",
            version[0]
        )));
    }

    let mut hasher = crc32fast::Hasher::new();

    // Read key
    let mut key_len_bytes = [0u8; 2];
    file.read_exact(&mut key_len_bytes).map_err(truncated)?;
    hasher.update(&key_len_bytes);
    let mut key = vec![0u8; u16::from_le_bytes(key_len_bytes) as usize];
    file.read_exact(&mut key).map_err(truncated)?;
    hasher.update(&key);

    // Read payload
    let mut payload_len_bytes = [0u8; 4];
    file.read_exact(&mut payload_len_bytes).map_err(truncated)?;
    hasher.update(&payload_len_bytes);
    let payload_len = u32::from_le_bytes(payload_len_bytes) as u64;
    if payload_len > file.metadata()?.len() {
        return Err(StoreError::Corruption(format!(
            "Record file {} declares a {} byte payload",
            path.display(),
            payload_len
        )));
    }
    let mut payload = vec![0u8; payload_len as usize];
    file.read_exact(&mut payload).map_err(truncated)?;
    hasher.update(&payload);

    // Read and verify checksum
    let mut checksum_bytes = [0u8; 4];
    file.read_exact(&mut checksum_bytes).map_err(truncated)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);
    let computed_checksum = hasher.finalize();
    if stored_checksum != computed_checksum {
        return Err(StoreError::ChecksumMismatch {
            expected: stored_checksum,
            got: computed_checksum,
        });
    }

    let key = String::from_utf8(key)
        .map_err(|_| StoreError::Corruption("Record key is not valid UTF-8".into()))?;

    Ok((key, payload))
}
