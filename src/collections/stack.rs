//! Persistent LIFO stack.
//!
//! Position 0 is always the most recently pushed live element. Unlike the
//! queue, popping or peeking an empty stack is an error.

use crate::codec::Codec;
use crate::error::{Result, StoreError};
use crate::types::{CollectionKind, Placement};
use crate::worker::Ticket;
use serde::de::DeserializeOwned;
use serde::Serialize;

super::facade! {
    /// Disk-backed LIFO stack.
    PersistentStack, CollectionKind::Stack
}

impl<T, C> PersistentStack<T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Push a value on top. Returns its generated key.
    pub fn push(&self, value: &T) -> Result<String> {
        Ok(self.inner.insert_value(None, value, Placement::Front)?.0)
    }

    /// Remove and return the top (`EmptyCollection` if empty).
    pub fn pop(&self) -> Result<T> {
        self.inner.take_existing(top, false)
    }

    /// The top without removing it (`EmptyCollection` if empty).
    pub fn peek(&self) -> Result<T> {
        self.inner
            .read_where(|s| top(s).map(Some))?
            .ok_or(StoreError::EmptyCollection)
    }

    /// Read the element at `position`, removing it when `remove` is set.
    /// The relative order of the other elements is unchanged.
    pub fn pop_at(&self, position: usize, remove: bool) -> Result<T> {
        if remove {
            self.inner
                .take_existing(|s| s.key_at(position).map(str::to_string), false)
        } else {
            self.get_at(position)
        }
    }

    /// Replace the value under `key`.
    pub fn update_by_key(&self, key: &str, value: &T) -> Result<()> {
        self.update(key, value)
    }

    /// Remove `key`. Returns false if it was not present.
    pub fn purge(&self, key: &str) -> Result<bool> {
        self.remove(key)
    }

    /// All values, most recent first.
    pub fn to_array(&self) -> Result<Vec<T>> {
        self.to_vec()
    }
}

fn top(s: &crate::engine::Storage) -> Result<String> {
    if s.len() == 0 {
        return Err(StoreError::EmptyCollection);
    }
    s.key_at(0).map(str::to_string)
}

impl<T, C> PersistentStack<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    pub fn push_async(&self, value: T) -> Ticket<String> {
        self.schedule(self.clone(), move |stack| stack.push(&value))
    }

    pub fn pop_async(&self) -> Ticket<T> {
        self.schedule(self.clone(), |stack| stack.pop())
    }

    pub fn peek_async(&self) -> Ticket<T> {
        self.schedule(self.clone(), |stack| stack.peek())
    }

    pub fn pop_at_async(&self, position: usize, remove: bool) -> Ticket<T> {
        self.schedule(self.clone(), move |stack| stack.pop_at(position, remove))
    }

    pub fn update_by_key_async(&self, key: impl Into<String>, value: T) -> Ticket<()> {
        let key = key.into();
        self.schedule(self.clone(), move |stack| stack.update_by_key(&key, &value))
    }

    pub fn purge_async(&self, key: impl Into<String>) -> Ticket<bool> {
        let key = key.into();
        self.schedule(self.clone(), move |stack| stack.purge(&key))
    }

    pub fn to_array_async(&self) -> Ticket<Vec<T>> {
        self.schedule(self.clone(), |stack| stack.to_array())
    }
}
