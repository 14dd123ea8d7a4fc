//! Persistent position <-> key mapping.

use crate::error::{Result, StoreError};
use crate::fsutil;
use crate::types::{Placement, Sequence};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{Cursor, ErrorKind, Read};
use std::path::{Path, PathBuf};

/// Magic bytes for index files.
const INDEX_MAGIC: &[u8; 4] = b"IDX\0";

/// Current index format version.
const INDEX_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_SIZE: usize = 4 + 1;

/// One position in the order index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: String,
    pub sequence: Sequence,
}

/// Ordered sequence of record keys.
///
/// Positions behave like array indices: removing an element shifts every
/// later element down by one. Mutations only touch memory; [`save`] makes
/// them durable by atomically replacing the index file.
///
/// [`save`]: OrderIndex::save
pub struct OrderIndex {
    /// Path to the index file.
    path: PathBuf,

    /// Keys in collection order.
    entries: VecDeque<IndexEntry>,

    /// Key -> sequence, for membership tests.
    members: HashMap<String, Sequence>,

    /// Stamp handed to the next inserted key.
    next_sequence: Sequence,
}

impl OrderIndex {
    /// Create an empty index that will be saved at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: VecDeque::new(),
            members: HashMap::new(),
            next_sequence: Sequence(1),
        }
    }

    /// Load the index from `path`, or start empty if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut index = Self::new(path);

        match fs::read(&index.path) {
            Ok(bytes) => index.decode(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(index)
    }

    // --- Mutations ---

    /// Add a key after the last element. Returns its position.
    pub fn append(&mut self, key: impl Into<String>) -> Result<usize> {
        self.place(Placement::Back, key)
    }

    /// Add a key before the first element. Returns its position (always 0).
    pub fn prepend(&mut self, key: impl Into<String>) -> Result<usize> {
        self.place(Placement::Front, key)
    }

    /// Insert a key at `position`, shifting later elements up by one.
    pub fn insert(&mut self, position: usize, key: impl Into<String>) -> Result<usize> {
        self.place(Placement::At(position), key)
    }

    /// Add a key according to `placement`. Returns its position.
    pub fn place(&mut self, placement: Placement, key: impl Into<String>) -> Result<usize> {
        let key = key.into();
        if self.members.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key));
        }

        let position = match placement {
            Placement::Back => self.entries.len(),
            Placement::Front => 0,
            Placement::At(position) => {
                if position > self.entries.len() {
                    return Err(StoreError::IndexOutOfRange {
                        index: position,
                        len: self.entries.len(),
                    });
                }
                position
            }
        };

        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        self.members.insert(key.clone(), sequence);
        self.entries.insert(position, IndexEntry { key, sequence });

        Ok(position)
    }

    /// Remove the element at `position`, shifting later elements down.
    pub fn remove_at(&mut self, position: usize) -> Result<IndexEntry> {
        let entry = self
            .entries
            .remove(position)
            .ok_or(StoreError::IndexOutOfRange {
                index: position,
                len: self.entries.len(),
            })?;
        self.members.remove(&entry.key);
        Ok(entry)
    }

    /// Remove `key`, returning the position it held.
    pub fn remove_key(&mut self, key: &str) -> Option<(usize, IndexEntry)> {
        let position = self.position_of(key)?;
        let entry = self.entries.remove(position)?;
        self.members.remove(&entry.key);
        Some((position, entry))
    }

    /// Put back an entry removed earlier, keeping its sequence.
    pub(crate) fn restore(&mut self, position: usize, entry: IndexEntry) {
        let position = position.min(self.entries.len());
        self.members.insert(entry.key.clone(), entry.sequence);
        self.entries.insert(position, entry);
    }

    /// Remove every entry, returning them in order.
    pub fn take_all(&mut self) -> Vec<IndexEntry> {
        self.members.clear();
        self.entries.drain(..).collect()
    }

    /// Replace the contents with previously taken entries.
    pub(crate) fn restore_all(&mut self, entries: Vec<IndexEntry>) {
        self.members = entries
            .iter()
            .map(|e| (e.key.clone(), e.sequence))
            .collect();
        self.entries = entries.into();
    }

    /// Keep only the keys for which `keep` returns true. Returns the dropped keys.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let mut dropped = Vec::new();
        self.entries.retain(|entry| {
            let kept = keep(&entry.key);
            if !kept {
                dropped.push(entry.key.clone());
            }
            kept
        });
        for key in &dropped {
            self.members.remove(key);
        }
        dropped
    }

    // --- Lookups ---

    /// Key at `position`.
    pub fn key_at(&self, position: usize) -> Result<&str> {
        self.entry_at(position).map(|e| e.key.as_str())
    }

    /// Entry at `position`.
    pub fn entry_at(&self, position: usize) -> Result<&IndexEntry> {
        self.entries.get(position).ok_or(StoreError::IndexOutOfRange {
            index: position,
            len: self.entries.len(),
        })
    }

    /// Position of `key`, if present.
    pub fn position_of(&self, key: &str) -> Option<usize> {
        if !self.members.contains_key(key) {
            return None;
        }
        self.entries.iter().position(|e| e.key == key)
    }

    /// Insertion stamp of `key`, if present.
    pub fn sequence_of(&self, key: &str) -> Option<Sequence> {
        self.members.get(key).copied()
    }

    /// Check if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.members.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    /// Iterate entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    // --- Persistence ---

    /// Save the index, atomically replacing the previous file.
    pub fn save(&self) -> Result<()> {
        fsutil::write_atomic(&self.path, &self.encode())?;
        Ok(())
    }

    /// Reload the last saved state, discarding unsaved mutations.
    #[cfg(test)]
    pub fn reload(&mut self) -> Result<()> {
        *self = Self::load(&self.path)?;
        Ok(())
    }

    fn encode(&self) -> Vec<u8> {
        let body_len: usize = self.entries.iter().map(|e| 8 + 2 + e.key.len()).sum();
        let mut buf = Vec::with_capacity(HEADER_SIZE + 16 + body_len + 4);

        buf.extend_from_slice(INDEX_MAGIC);
        buf.push(INDEX_VERSION);
        buf.extend_from_slice(&self.next_sequence.0.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());

        for entry in &self.entries {
            buf.extend_from_slice(&entry.sequence.0.to_le_bytes());
            buf.extend_from_slice(&(entry.key.len() as u16).to_le_bytes());
            buf.extend_from_slice(entry.key.as_bytes());
        }

        let checksum = crc32fast::hash(&buf[HEADER_SIZE..]);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() < HEADER_SIZE + 16 + 4 {
            return Err(StoreError::Corruption("Index file truncated".into()));
        }
        if &bytes[..4] != INDEX_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid index magic".into()));
        }
        if bytes[4] != INDEX_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported index version: {}",
                bytes[4]
            )));
        }

        let (body, checksum) = bytes.split_at(bytes.len() - 4);
        let stored_checksum = u32::from_le_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
        let computed_checksum = crc32fast::hash(&body[HEADER_SIZE..]);
        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let mut cursor = Cursor::new(&body[HEADER_SIZE..]);
        let next_sequence = Sequence(read_u64(&mut cursor)?);
        let count = read_u64(&mut cursor)?;

        let mut entries = VecDeque::new();
        let mut members = HashMap::new();
        for _ in 0..count {
            let sequence = Sequence(read_u64(&mut cursor)?);

            let mut key_len = [0u8; 2];
            read_exact(&mut cursor, &mut key_len)?;
            let key_len = u16::from_le_bytes(key_len) as usize;

            let mut key = vec![0u8; key_len];
            read_exact(&mut cursor, &mut key)?;
            let key = String::from_utf8(key)
                .map_err(|_| StoreError::Corruption("Index key is not valid UTF-8".into()))?;

            if members.insert(key.clone(), sequence).is_some() {
                return Err(StoreError::Corruption(format!("Index lists {} twice", key)));
            }
            entries.push_back(IndexEntry { key, sequence });
        }

        if cursor.position() != cursor.get_ref().len() as u64 {
            return Err(StoreError::Corruption("Trailing bytes in index file".into()));
        }

        self.entries = entries;
        self.members = members;
        self.next_sequence = next_sequence;
        Ok(())
    }
}

fn read_exact(cursor: &mut Cursor<&[u8]>, buf: &mut [u8]) -> Result<()> {
    cursor
        .read_exact(buf)
        .map_err(|_| StoreError::Corruption("Index file truncated".into()))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut bytes = [0u8; 8];
    read_exact(cursor, &mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}
