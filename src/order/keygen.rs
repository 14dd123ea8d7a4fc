//! Persisted key generator.
//!
//! Keys are a monotonically increasing `u64` rendered as 16 lowercase hex
//! digits, so lexicographic order matches numeric order. Values are
//! reserved in blocks; the reserved high-water mark is on disk before any
//! key from the block is handed out, so a key is never reused even after a
//! crash. Unused values of a block are simply skipped.

use crate::error::{Result, StoreError};
use crate::fsutil;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Magic bytes for the key sequence file.
const SEQ_MAGIC: &[u8; 4] = b"KSQ\0";

/// Current key sequence format version.
const SEQ_VERSION: u8 = 1;

/// magic + version + high-water mark + crc32
const SEQ_FILE_SIZE: usize = 4 + 1 + 8 + 4;

/// Number of values reserved per write of the sequence file.
pub const RESERVE_BLOCK: u64 = 64;

/// Width of a generated key in hex digits.
const KEY_WIDTH: usize = 16;

/// Generates unique record keys for one collection root.
pub struct KeyGenerator {
    path: PathBuf,

    /// Next value to hand out.
    next: u64,

    /// Values below this are covered by the persisted high-water mark.
    reserved: u64,
}

impl KeyGenerator {
    /// Load the generator state from `path`, starting at zero if absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let reserved = match fs::read(&path) {
            Ok(bytes) => decode(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            next: reserved,
            reserved,
        })
    }

    /// Produce the next key for which `in_use` returns false.
    pub fn next_key(&mut self, in_use: impl Fn(&str) -> bool) -> Result<String> {
        loop {
            if self.next == u64::MAX {
                return Err(StoreError::InvalidArgument("Key space exhausted".into()));
            }
            if self.next >= self.reserved {
                self.reserve(self.next.saturating_add(RESERVE_BLOCK))?;
            }

            let value = self.next;
            self.next = value + 1;

            let key = format_key(value);
            if !in_use(&key) {
                return Ok(key);
            }
        }
    }

    /// Make sure `key` will never be generated, if it has the generated shape.
    pub fn observe(&mut self, key: &str) {
        if let Some(value) = parse_key(key) {
            if value >= self.next {
                self.next = value.saturating_add(1);
            }
        }
    }

    /// Value the next call to [`next_key`](Self::next_key) starts from.
    #[cfg(test)]
    pub fn peek_value(&self) -> u64 {
        self.next
    }

    /// Persist the current high-water mark if it fell behind observed keys.
    pub fn persist(&mut self) -> Result<()> {
        if self.next > self.reserved {
            self.reserve(self.next)?;
        }
        Ok(())
    }

    fn reserve(&mut self, high_water: u64) -> Result<()> {
        if high_water == self.reserved {
            return Err(StoreError::InvalidArgument("Key space exhausted".into()));
        }

        let mut buf = Vec::with_capacity(SEQ_FILE_SIZE);
        buf.extend_from_slice(SEQ_MAGIC);
        buf.push(SEQ_VERSION);
        buf.extend_from_slice(&high_water.to_le_bytes());
        let checksum = crc32fast::hash(&buf[5..]);
        buf.extend_from_slice(&checksum.to_le_bytes());

        fsutil::write_atomic(&self.path, &buf)?;
        self.reserved = high_water;
        Ok(())
    }
}

/// Render a generated key.
pub fn format_key(value: u64) -> String {
    hex::encode(value.to_be_bytes())
}

/// Parse a key produced by [`format_key`].
pub fn parse_key(key: &str) -> Option<u64> {
    if key.len() != KEY_WIDTH || !key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    let bytes = hex::decode(key).ok()?;
    let bytes: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn decode(bytes: &[u8]) -> Result<u64> {
    if bytes.len() != SEQ_FILE_SIZE {
        return Err(StoreError::Corruption(format!(
            "Key sequence file has {} bytes",
            bytes.len()
        )));
    }
    if &bytes[..4] != SEQ_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid key sequence magic".into()));
    }
    if bytes[4] != SEQ_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported key sequence version: {}",
            bytes[4]
        )));
    }

    let stored = u32::from_le_bytes([bytes[13], bytes[14], bytes[15], bytes[16]]);
    let computed = crc32fast::hash(&bytes[5..13]);
    if stored != computed {
        return Err(StoreError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    let mut value = [0u8; 8];
    value.copy_from_slice(&bytes[5..13]);
    Ok(u64::from_le_bytes(value))
}
