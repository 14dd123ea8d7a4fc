//! Persistent FIFO queue.
//!
//! Plain `dequeue` and `peek` treat an empty queue as a normal state and
//! return `None`; the keyed and positional variants fail on a bad key or
//! position.

use crate::codec::Codec;
use crate::engine::validate_key;
use crate::error::{Result, StoreError};
use crate::types::{CollectionKind, Placement};
use crate::worker::Ticket;
use serde::de::DeserializeOwned;
use serde::Serialize;

super::facade! {
    /// Disk-backed FIFO queue. Position 0 is the head.
    PersistentQueue, CollectionKind::Queue
}

impl<T, C> PersistentQueue<T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Add a value at the tail. Returns its generated key.
    pub fn enqueue(&self, value: &T) -> Result<String> {
        Ok(self.inner.insert_value(None, value, Placement::Back)?.0)
    }

    /// Add a value at the tail under a caller-chosen key.
    pub fn enqueue_with_key(&self, key: impl Into<String>, value: &T) -> Result<()> {
        self.inner
            .insert_value(Some(key.into()), value, Placement::Back)?;
        Ok(())
    }

    /// Remove and return the head, or `None` if the queue is empty.
    pub fn dequeue(&self) -> Result<Option<T>> {
        self.inner.take_where(
            |s| match s.len() {
                0 => Ok(None),
                _ => s.key_at(0).map(|key| Some(key.to_string())),
            },
            true,
        )
    }

    /// Remove and return the element under `key` (`KeyNotFound` if absent).
    pub fn dequeue_key(&self, key: &str) -> Result<T> {
        validate_key(key)?;
        self.inner.take_existing(
            |s| {
                if s.contains_key(key) {
                    Ok(key.to_string())
                } else {
                    Err(StoreError::KeyNotFound(key.to_string()))
                }
            },
            true,
        )
    }

    /// Remove and return the element at `position`.
    pub fn dequeue_at(&self, position: usize) -> Result<T> {
        self.inner
            .take_existing(|s| s.key_at(position).map(str::to_string), true)
    }

    /// The head without removing it, or `None` if the queue is empty.
    pub fn peek(&self) -> Result<Option<T>> {
        self.inner.read_where(|s| match s.len() {
            0 => Ok(None),
            _ => s.key_at(0).map(|key| Some(key.to_string())),
        })
    }

    /// The element at `position` without removing it.
    pub fn peek_at(&self, position: usize) -> Result<T> {
        self.get_at(position)
    }
}

impl<T, C> PersistentQueue<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    pub fn enqueue_async(&self, value: T) -> Ticket<String> {
        self.schedule(self.clone(), move |queue| queue.enqueue(&value))
    }

    pub fn dequeue_async(&self) -> Ticket<Option<T>> {
        self.schedule(self.clone(), |queue| queue.dequeue())
    }

    pub fn peek_async(&self) -> Ticket<Option<T>> {
        self.schedule(self.clone(), |queue| queue.peek())
    }

    pub fn enqueue_with_key_async(&self, key: impl Into<String>, value: T) -> Ticket<()> {
        let key = key.into();
        self.schedule(self.clone(), move |queue| {
            queue.enqueue_with_key(key, &value)
        })
    }

    pub fn dequeue_key_async(&self, key: impl Into<String>) -> Ticket<T> {
        let key = key.into();
        self.schedule(self.clone(), move |queue| queue.dequeue_key(&key))
    }

    pub fn dequeue_at_async(&self, position: usize) -> Ticket<T> {
        self.schedule(self.clone(), move |queue| queue.dequeue_at(position))
    }

    pub fn peek_at_async(&self, position: usize) -> Ticket<T> {
        self.schedule(self.clone(), move |queue| queue.peek_at(position))
    }
}
