//! Typed base shared by every collection facade.
//!
//! [`Collection`] turns values into record payloads with a [`Codec`] and
//! runs each operation as one logical unit on the [`Engine`]. The facades
//! in [`crate::collections`] add the list, queue, stack and dictionary
//! specific operations on top and dereference to this type for the rest.

use crate::codec::{Codec, MessagePack};
use crate::config::CollectionConfig;
use crate::engine::{validate_key, Engine, Storage};
use crate::error::{Result, StoreError};
use crate::events::{CollectionEvent, ListenerId, Subscription};
use crate::types::{Backend, CollectionKind, Placement, Record};
use crate::worker::Ticket;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

/// Shared handle to an open collection root.
///
/// Cloning is cheap; every clone talks to the same engine. The root is
/// closed by [`close`](Collection::close) or when the last handle drops.
pub struct Collection<T, C: Codec = MessagePack> {
    engine: Arc<Engine>,
    _marker: PhantomData<fn() -> (T, C)>,
}

impl<T, C: Codec> Clone for Collection<T, C> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, C: Codec> Collection<T, C> {
    pub(crate) fn open(kind: CollectionKind, config: &CollectionConfig) -> Result<Self> {
        Ok(Self {
            engine: Arc::new(Engine::open(kind, config)?),
            _marker: PhantomData,
        })
    }

    // --- Introspection ---

    /// Persistence root.
    pub fn path(&self) -> &Path {
        self.engine.path()
    }

    pub fn kind(&self) -> CollectionKind {
        self.engine.kind()
    }

    /// Record store layout of the root.
    pub fn backend(&self) -> Backend {
        self.engine.backend()
    }

    /// Number of elements.
    pub fn count(&self) -> Result<usize> {
        self.engine.read(|s| Ok(s.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.engine.read(|s| Ok(s.len() == 0))
    }

    /// Total payload bytes of the live records.
    pub fn byte_len(&self) -> Result<u64> {
        self.engine.read(|s| Ok(s.byte_len()))
    }

    /// Keys in collection order.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.engine.read(|s| Ok(s.keys()))
    }

    /// Key at `position`.
    pub fn key_at(&self, position: usize) -> Result<String> {
        self.engine.read(|s| s.key_at(position).map(str::to_string))
    }

    /// Current position of `key`, if present.
    pub fn position_of(&self, key: &str) -> Result<Option<usize>> {
        self.engine.read(|s| Ok(s.position_of(key)))
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.engine.read(|s| Ok(s.contains_key(key)))
    }

    /// Whether `position` addresses an element.
    pub fn contains_index(&self, position: usize) -> Result<bool> {
        self.engine.read(|s| Ok(position < s.len()))
    }

    /// Raw stored record: key, serialized payload and insertion stamp.
    pub fn record(&self, key: &str) -> Result<Record> {
        validate_key(key)?;
        self.engine.read(|s| s.record(key))
    }

    // --- Removal ---

    /// Remove `key`. Returns false if it was not present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.engine.write(|s, events| match s.remove_key(key)? {
            Some(_) => {
                events.push(CollectionEvent::Removed {
                    key: key.to_string(),
                });
                Ok(true)
            }
            None => Ok(false),
        })
    }

    /// Remove the element at `position`, returning its key.
    pub fn remove_at(&self, position: usize) -> Result<String> {
        self.engine.write(|s, events| {
            let key = s.remove_at(position)?;
            events.push(CollectionEvent::Removed { key: key.clone() });
            Ok(key)
        })
    }

    /// Remove every element as one unit.
    pub fn clear(&self) -> Result<()> {
        self.engine.write(|s, events| {
            s.clear()?;
            events.push(CollectionEvent::Cleared);
            Ok(())
        })
    }

    // --- Maintenance ---

    /// Reclaim space held by superseded record data. Returns true if work was done.
    pub fn compact(&self) -> Result<bool> {
        self.engine.write(|s, _| s.compact())
    }

    /// Flush record storage to disk.
    pub fn sync(&self) -> Result<()> {
        self.engine.write(|s, _| s.sync())
    }

    /// Flush and release the root. Later calls fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        self.engine.close()
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    // --- Events ---

    /// Register a callback invoked after each durable mutation.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + Send + Sync + 'static,
    {
        self.engine.events().add_listener(callback)
    }

    /// Receive events over a bounded channel.
    pub fn subscribe(&self, buffer: usize) -> Subscription {
        self.engine.events().subscribe(buffer)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.engine.events().remove_listener(id)
    }

    // --- Crate helpers ---

    /// Run `op` with `handle` on the worker pool.
    pub(crate) fn schedule<H, R, F>(&self, handle: H, op: F) -> Ticket<R>
    where
        H: Send + 'static,
        R: Send + 'static,
        F: FnOnce(&H) -> Result<R> + Send + 'static,
    {
        self.engine.worker().spawn(move || op(&handle))
    }
}

impl<T, C> Collection<T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    // --- Reads ---

    /// Value stored under `key` (`KeyNotFound` if absent).
    pub fn get(&self, key: &str) -> Result<T> {
        validate_key(key)?;
        let payload = self.engine.read(|s| s.payload(key))?;
        C::decode(&payload)
    }

    /// Value stored under `key`, or `None` if absent.
    pub fn try_get(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Value at `position` (`IndexOutOfRange` outside `[0, count)`).
    pub fn get_at(&self, position: usize) -> Result<T> {
        let (_, payload) = self.engine.read(|s| s.payload_at(position))?;
        C::decode(&payload)
    }

    /// All values in collection order.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let payloads = self.engine.read(|s| s.payloads())?;
        payloads
            .into_iter()
            .map(|(_, payload)| C::decode(&payload))
            .collect()
    }

    /// Lazy iterator over values in collection order.
    ///
    /// Keys are snapshotted on the first call to `next`; values are read
    /// one at a time, and keys removed in the meantime are skipped.
    pub fn iter(&self) -> Iter<'_, T, C> {
        Iter {
            collection: self,
            keys: None,
        }
    }

    // --- Updates ---

    /// Replace the value under `key`, keeping its key and position.
    pub fn update(&self, key: &str, value: &T) -> Result<()> {
        validate_key(key)?;
        let payload = C::encode(value)?;
        self.engine.write(|s, events| {
            s.replace(key, &payload)?;
            events.push(CollectionEvent::Updated {
                key: key.to_string(),
            });
            Ok(())
        })
    }

    /// Replace the value at `position`, keeping its key and position.
    pub fn update_at(&self, position: usize, value: &T) -> Result<()> {
        let payload = C::encode(value)?;
        self.engine.write(|s, events| {
            let key = s.key_at(position)?.to_string();
            s.replace(&key, &payload)?;
            events.push(CollectionEvent::Updated { key });
            Ok(())
        })
    }

    // --- Crate helpers ---

    /// Insert a value. Raises `Added`, plus `Enqueued` for queues.
    pub(crate) fn insert_value(
        &self,
        key: Option<String>,
        value: &T,
        placement: Placement,
    ) -> Result<(String, usize)> {
        let payload = C::encode(value)?;
        let enqueued = self.kind() == CollectionKind::Queue;

        self.engine.write(|s, events| {
            let (key, position) = s.insert(key, &payload, placement)?;
            events.push(CollectionEvent::Added { key: key.clone() });
            if enqueued {
                events.push(CollectionEvent::Enqueued { key: key.clone() });
            }
            Ok((key, position))
        })
    }

    /// Read the element `locate` picks, if any.
    pub(crate) fn read_where(
        &self,
        locate: impl FnOnce(&Storage) -> Result<Option<String>>,
    ) -> Result<Option<T>> {
        let payload = self.engine.read(|s| match locate(s)? {
            Some(key) => s.payload(&key).map(Some),
            None => Ok(None),
        })?;
        payload.map(|bytes| C::decode(&bytes)).transpose()
    }

    /// Remove and return the element `locate` picks, if any.
    ///
    /// The value is decoded before anything is removed. Raises `Removed`,
    /// plus `Dequeued` when `dequeued` is set.
    pub(crate) fn take_where(
        &self,
        locate: impl FnOnce(&Storage) -> Result<Option<String>>,
        dequeued: bool,
    ) -> Result<Option<T>> {
        self.engine.write(|s, events| match locate(s)? {
            Some(key) => Self::take_key(s, key, events, dequeued).map(Some),
            None => Ok(None),
        })
    }

    /// Remove and return the element `locate` names; a missing element is
    /// reported by `locate` itself.
    pub(crate) fn take_existing(
        &self,
        locate: impl FnOnce(&Storage) -> Result<String>,
        dequeued: bool,
    ) -> Result<T> {
        self.engine.write(|s, events| {
            let key = locate(s)?;
            Self::take_key(s, key, events, dequeued)
        })
    }

    fn take_key(
        s: &mut Storage,
        key: String,
        events: &mut Vec<CollectionEvent>,
        dequeued: bool,
    ) -> Result<T> {
        let value = C::decode(&s.payload(&key)?)?;
        s.remove_key(&key)?;

        events.push(CollectionEvent::Removed { key: key.clone() });
        if dequeued {
            events.push(CollectionEvent::Dequeued { key });
        }
        Ok(value)
    }

    /// Insert under `key` or replace the existing value, as one unit.
    pub(crate) fn upsert(&self, key: &str, value: &T) -> Result<bool> {
        validate_key(key)?;
        let payload = C::encode(value)?;

        self.engine.write(|s, events| {
            if s.contains_key(key) {
                s.replace(key, &payload)?;
                events.push(CollectionEvent::Updated {
                    key: key.to_string(),
                });
                Ok(false)
            } else {
                let (key, _) = s.insert(Some(key.to_string()), &payload, Placement::Back)?;
                events.push(CollectionEvent::Added { key });
                Ok(true)
            }
        })
    }

    /// Key and value pairs in collection order.
    pub(crate) fn entries(&self) -> Result<Vec<(String, T)>> {
        let payloads = self.engine.read(|s| s.payloads())?;
        payloads
            .into_iter()
            .map(|(key, payload)| C::decode(&payload).map(|value| (key, value)))
            .collect()
    }
}

impl<T, C> Collection<T, C>
where
    T: Serialize + DeserializeOwned + PartialEq,
    C: Codec,
{
    /// Whether any element equals `value`.
    pub fn contains(&self, value: &T) -> Result<bool> {
        Ok(self.position_of_value(value)?.is_some())
    }

    /// Position of the first element equal to `value`.
    pub(crate) fn position_of_value(&self, value: &T) -> Result<Option<usize>> {
        let payloads = self.engine.read(|s| s.payloads())?;
        for (position, (_, payload)) in payloads.iter().enumerate() {
            if C::decode::<T>(payload)? == *value {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }
}

// --- Async variants ---

impl<T, C> Collection<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    pub fn get_async(&self, key: impl Into<String>) -> Ticket<T> {
        let key = key.into();
        self.schedule(self.clone(), move |c| c.get(&key))
    }

    pub fn get_at_async(&self, position: usize) -> Ticket<T> {
        self.schedule(self.clone(), move |c| c.get_at(position))
    }

    pub fn update_async(&self, key: impl Into<String>, value: T) -> Ticket<()> {
        let key = key.into();
        self.schedule(self.clone(), move |c| c.update(&key, &value))
    }

    pub fn update_at_async(&self, position: usize, value: T) -> Ticket<()> {
        self.schedule(self.clone(), move |c| c.update_at(position, &value))
    }

    pub fn remove_async(&self, key: impl Into<String>) -> Ticket<bool> {
        let key = key.into();
        self.schedule(self.clone(), move |c| c.remove(&key))
    }

    pub fn remove_at_async(&self, position: usize) -> Ticket<String> {
        self.schedule(self.clone(), move |c| c.remove_at(position))
    }

    pub fn contains_key_async(&self, key: impl Into<String>) -> Ticket<bool> {
        let key = key.into();
        self.schedule(self.clone(), move |c| c.contains_key(&key))
    }

    pub fn count_async(&self) -> Ticket<usize> {
        self.schedule(self.clone(), |c| c.count())
    }

    pub fn clear_async(&self) -> Ticket<()> {
        self.schedule(self.clone(), |c| c.clear())
    }

    pub fn keys_async(&self) -> Ticket<Vec<String>> {
        self.schedule(self.clone(), |c| c.keys())
    }

    pub fn to_vec_async(&self) -> Ticket<Vec<T>> {
        self.schedule(self.clone(), |c| c.to_vec())
    }

    pub fn try_get_async(&self, key: impl Into<String>) -> Ticket<Option<T>> {
        let key = key.into();
        self.schedule(self.clone(), move |c| c.try_get(&key))
    }

    pub fn is_empty_async(&self) -> Ticket<bool> {
        self.schedule(self.clone(), |c| c.is_empty())
    }

    pub fn byte_len_async(&self) -> Ticket<u64> {
        self.schedule(self.clone(), |c| c.byte_len())
    }

    pub fn key_at_async(&self, position: usize) -> Ticket<String> {
        self.schedule(self.clone(), move |c| c.key_at(position))
    }

    pub fn position_of_async(&self, key: impl Into<String>) -> Ticket<Option<usize>> {
        let key = key.into();
        self.schedule(self.clone(), move |c| c.position_of(&key))
    }

    pub fn contains_index_async(&self, position: usize) -> Ticket<bool> {
        self.schedule(self.clone(), move |c| c.contains_index(position))
    }

    pub fn record_async(&self, key: impl Into<String>) -> Ticket<Record> {
        let key = key.into();
        self.schedule(self.clone(), move |c| c.record(&key))
    }

    pub fn compact_async(&self) -> Ticket<bool> {
        self.schedule(self.clone(), |c| c.compact())
    }

    pub fn sync_async(&self) -> Ticket<()> {
        self.schedule(self.clone(), |c| c.sync())
    }
}

impl<T, C> Collection<T, C>
where
    T: Serialize + DeserializeOwned + PartialEq + Send + 'static,
    C: Codec,
{
    pub fn contains_async(&self, value: T) -> Ticket<bool> {
        self.schedule(self.clone(), move |c| c.contains(&value))
    }
}

// --- Iteration ---

/// Lazy iterator over the values of a collection.
pub struct Iter<'a, T, C: Codec = MessagePack> {
    collection: &'a Collection<T, C>,
    keys: Option<std::vec::IntoIter<String>>,
}

impl<'a, T, C> Iterator for Iter<'a, T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.keys.is_none() {
            match self.collection.keys() {
                Ok(keys) => self.keys = Some(keys.into_iter()),
                Err(e) => {
                    self.keys = Some(Vec::new().into_iter());
                    return Some(Err(e));
                }
            }
        }

        let keys = self.keys.as_mut()?;
        loop {
            let key = keys.next()?;
            match self.collection.try_get(&key) {
                Ok(Some(value)) => return Some(Ok(value)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<'a, T, C> IntoIterator for &'a Collection<T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    type Item = Result<T>;
    type IntoIter = Iter<'a, T, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open(dir: &TempDir, kind: CollectionKind) -> Collection<String> {
        Collection::open(kind, &CollectionConfig::new(dir.path().join("root"))).unwrap()
    }

    fn add(c: &Collection<String>, value: &str) -> String {
        c.insert_value(None, &value.to_string(), Placement::Back)
            .unwrap()
            .0
    }

    #[test]
    fn test_get_and_update() {
        let dir = TempDir::new().unwrap();
        let c = open(&dir, CollectionKind::List);

        let key = add(&c, "foo");
        assert_eq!(c.get(&key).unwrap(), "foo");

        c.update(&key, &"bar".to_string()).unwrap();
        assert_eq!(c.get(&key).unwrap(), "bar");
        assert_eq!(c.position_of(&key).unwrap(), Some(0));

        assert!(matches!(
            c.update("missing", &"x".to_string()),
            Err(StoreError::KeyNotFound(_))
        ));
        assert!(matches!(c.get(""), Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_record_keeps_sequence_across_update() {
        let dir = TempDir::new().unwrap();
        let c = open(&dir, CollectionKind::List);

        add(&c, "a");
        let key = add(&c, "b");
        let before = c.record(&key).unwrap();

        c.update_at(1, &"changed".to_string()).unwrap();
        let after = c.record(&key).unwrap();

        assert_eq!(before.sequence, after.sequence);
        assert_ne!(before.payload, after.payload);
    }

    #[test]
    fn test_iter_skips_removed_keys() {
        let dir = TempDir::new().unwrap();
        let c = open(&dir, CollectionKind::List);
        for v in ["a", "b", "c"] {
            add(&c, v);
        }

        let mut iter = c.iter();
        assert_eq!(iter.next().unwrap().unwrap(), "a");

        c.remove_at(1).unwrap();
        let rest: Vec<String> = iter.map(|v| v.unwrap()).collect();
        assert_eq!(rest, vec!["c"]);

        // Restartable
        let again: Vec<String> = c.iter().map(|v| v.unwrap()).collect();
        assert_eq!(again, vec!["a", "c"]);
    }

    #[test]
    fn test_take_decodes_before_removal() {
        let dir = TempDir::new().unwrap();
        let c = open(&dir, CollectionKind::Queue);
        add(&c, "text");

        let numbers: Collection<u64> = Collection {
            engine: c.engine.clone(),
            _marker: PhantomData,
        };
        let result = numbers.take_where(|s| Ok(Some(s.key_at(0)?.to_string())), true);
        assert!(matches!(result, Err(StoreError::Deserialization(_))));
        assert_eq!(c.count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_events() {
        let dir = TempDir::new().unwrap();
        let c: Collection<String, Json> = Collection::open(
            CollectionKind::Dictionary,
            &CollectionConfig::new(dir.path().join("root")),
        )
        .unwrap();
        let events = c.subscribe(16);

        assert!(c.upsert("phone", &"555-1234".to_string()).unwrap());
        assert!(!c.upsert("phone", &"555-5678".to_string()).unwrap());

        assert_eq!(
            events.drain(),
            vec![
                CollectionEvent::Added {
                    key: "phone".into()
                },
                CollectionEvent::Updated {
                    key: "phone".into()
                },
            ]
        );
        assert_eq!(c.count().unwrap(), 1);
    }

    #[test]
    fn test_async_roundtrip() {
        let dir = TempDir::new().unwrap();
        let c = open(&dir, CollectionKind::List);
        let key = add(&c, "value");

        assert_eq!(c.get_async(key.clone()).wait().unwrap(), "value");
        c.update_async(key.clone(), "new".to_string()).wait().unwrap();
        assert_eq!(c.to_vec_async().wait().unwrap(), vec!["new"]);
        assert_eq!(c.count_async().wait().unwrap(), 1);
    }

    #[test]
    fn test_async_introspection() {
        let dir = TempDir::new().unwrap();
        let c = open(&dir, CollectionKind::List);
        assert!(c.is_empty_async().wait().unwrap());

        let first = add(&c, "a");
        let second = add(&c, "bb");

        assert!(!c.is_empty_async().wait().unwrap());
        assert_eq!(c.byte_len_async().wait().unwrap(), c.byte_len().unwrap());
        assert_eq!(c.key_at_async(1).wait().unwrap(), second);
        assert_eq!(c.position_of_async(first.clone()).wait().unwrap(), Some(0));
        assert_eq!(c.position_of_async("missing").wait().unwrap(), None);
        assert!(c.contains_index_async(1).wait().unwrap());
        assert!(!c.contains_index_async(2).wait().unwrap());
        assert!(c.contains_async("bb".to_string()).wait().unwrap());
        assert!(!c.contains_async("zz".to_string()).wait().unwrap());
        assert_eq!(c.try_get_async(first.clone()).wait().unwrap(), Some("a".to_string()));
        assert_eq!(c.try_get_async("missing").wait().unwrap(), None);

        let record = c.record_async(second.clone()).wait().unwrap();
        assert_eq!(record.key, second);
        assert!(matches!(
            c.key_at_async(5).wait(),
            Err(StoreError::IndexOutOfRange { .. })
        ));

        c.remove(&first).unwrap();
        c.compact_async().wait().unwrap();
        c.sync_async().wait().unwrap();
        assert_eq!(c.to_vec().unwrap(), vec!["bb"]);
    }

    #[test]
    fn test_closed_rejects_everything() {
        let dir = TempDir::new().unwrap();
        let c = open(&dir, CollectionKind::List);
        let key = add(&c, "a");

        c.close().unwrap();
        assert!(c.is_closed());
        assert!(matches!(c.get(&key), Err(StoreError::Closed)));
        assert!(matches!(c.count(), Err(StoreError::Closed)));
        assert!(matches!(c.clear(), Err(StoreError::Closed)));

        let mut ticket = c.count_async();
        assert!(matches!(
            ticket.wait_timeout(Duration::from_secs(1)),
            Some(Err(StoreError::Closed))
        ));
    }
}
