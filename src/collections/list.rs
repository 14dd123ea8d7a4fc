//! Persistent list: insertion order, positional insert and removal.

use crate::codec::Codec;
use crate::error::Result;
use crate::types::{CollectionKind, Placement};
use crate::worker::Ticket;
use serde::de::DeserializeOwned;
use serde::Serialize;

super::facade! {
    /// Disk-backed list.
    ///
    /// Elements keep insertion order; removing one shifts later positions
    /// down by one, inserting shifts them up.
    ///
    /// ```ignore
    /// let list: PersistentList<String> = PersistentList::open("/tmp/names")?;
    /// list.add(&"foo".to_string())?;
    /// list.insert(0, &"bar".to_string())?;
    /// assert_eq!(list.get_at(0)?, "bar");
    /// ```
    PersistentList, CollectionKind::List
}

impl<T, C> PersistentList<T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Append a value. Returns its generated key.
    pub fn add(&self, value: &T) -> Result<String> {
        Ok(self.inner.insert_value(None, value, Placement::Back)?.0)
    }

    /// Append a value under a caller-chosen key (`DuplicateKey` if taken).
    pub fn add_with_key(&self, key: impl Into<String>, value: &T) -> Result<()> {
        self.inner
            .insert_value(Some(key.into()), value, Placement::Back)?;
        Ok(())
    }

    /// Insert at `position` (`0..=count`), shifting later elements up.
    pub fn insert(&self, position: usize, value: &T) -> Result<String> {
        Ok(self
            .inner
            .insert_value(None, value, Placement::At(position))?
            .0)
    }
}

impl<T, C> PersistentList<T, C>
where
    T: Serialize + DeserializeOwned + PartialEq,
    C: Codec,
{
    /// Position of the first element equal to `value`.
    pub fn index_of(&self, value: &T) -> Result<Option<usize>> {
        self.inner.position_of_value(value)
    }
}

impl<T, C> PersistentList<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    pub fn add_async(&self, value: T) -> Ticket<String> {
        self.schedule(self.clone(), move |list| list.add(&value))
    }

    pub fn insert_async(&self, position: usize, value: T) -> Ticket<String> {
        self.schedule(self.clone(), move |list| list.insert(position, &value))
    }

    pub fn add_with_key_async(&self, key: impl Into<String>, value: T) -> Ticket<()> {
        let key = key.into();
        self.schedule(self.clone(), move |list| list.add_with_key(key, &value))
    }
}

impl<T, C> PersistentList<T, C>
where
    T: Serialize + DeserializeOwned + PartialEq + Send + 'static,
    C: Codec,
{
    pub fn index_of_async(&self, value: T) -> Ticket<Option<usize>> {
        self.schedule(self.clone(), move |list| list.index_of(&value))
    }
}
