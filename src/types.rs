//! Core types shared by the storage layers and the collection facades.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest key (in bytes) that fits the on-disk frame formats.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Logical insertion stamp of a record.
///
/// Assigned once when the record enters the collection and kept for its
/// whole life. It is independent of the record's current position.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// A stored record: key, serialized value and its insertion stamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Stable identifier, unique within the collection root.
    pub key: String,

    /// Serialized value as produced by the collection's codec.
    pub payload: Vec<u8>,

    /// Logical insertion stamp.
    pub sequence: Sequence,
}

/// Where a new key goes in the order index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// After the last element (list, queue, dictionary).
    Back,
    /// Before the first element (stack).
    Front,
    /// At a given position, shifting later elements up by one.
    At(usize),
}

/// On-disk layout of the record store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// All records in one append-only log file.
    #[default]
    Log,
    /// One file per record under a sharded directory tree.
    Directory,
}

impl Backend {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Backend::Log => 0,
            Backend::Directory => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Backend::Log),
            1 => Some(Backend::Directory),
            _ => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Log => write!(f, "log"),
            Backend::Directory => write!(f, "directory"),
        }
    }
}

/// Which facade owns a collection root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    List,
    Queue,
    Stack,
    Dictionary,
}

impl CollectionKind {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            CollectionKind::List => 0,
            CollectionKind::Queue => 1,
            CollectionKind::Stack => 2,
            CollectionKind::Dictionary => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CollectionKind::List),
            1 => Some(CollectionKind::Queue),
            2 => Some(CollectionKind::Stack),
            3 => Some(CollectionKind::Dictionary),
            _ => None,
        }
    }

    /// How keys are assigned for this kind of collection.
    pub(crate) fn key_policy(self) -> KeyPolicy {
        match self {
            CollectionKind::Dictionary => KeyPolicy::Supplied,
            _ => KeyPolicy::Generated,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectionKind::List => "list",
            CollectionKind::Queue => "queue",
            CollectionKind::Stack => "stack",
            CollectionKind::Dictionary => "dictionary",
        };
        f.write_str(name)
    }
}

/// Key assignment strategy of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum KeyPolicy {
    /// Keys come from the persisted key generator; callers may also supply one.
    Generated,
    /// Every key is supplied by the caller.
    Supplied,
}
