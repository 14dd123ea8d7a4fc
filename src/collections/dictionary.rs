//! Persistent dictionary with caller-supplied keys.

use crate::codec::Codec;
use crate::error::Result;
use crate::types::{CollectionKind, Placement};
use crate::worker::Ticket;
use serde::de::DeserializeOwned;
use serde::Serialize;

super::facade! {
    /// Disk-backed key/value dictionary.
    ///
    /// Keys are chosen by the caller and enumerate in insertion order.
    /// [`get`](crate::Collection::get) fails with `KeyNotFound` for a
    /// missing key; use [`try_get`](crate::Collection::try_get) for a soft
    /// lookup.
    ///
    /// ```ignore
    /// let contacts: PersistentDictionary<String> = PersistentDictionary::open(path)?;
    /// contacts.add("name", &"John Doe".to_string())?;
    /// contacts.set("phone", &"555-5678".to_string())?;
    /// ```
    PersistentDictionary, CollectionKind::Dictionary
}

impl<T, C> PersistentDictionary<T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Insert a new key (`DuplicateKey` if it exists; the stored value is untouched).
    pub fn add(&self, key: impl Into<String>, value: &T) -> Result<()> {
        self.inner
            .insert_value(Some(key.into()), value, Placement::Back)?;
        Ok(())
    }

    /// Insert or replace. Returns true if the key was new.
    pub fn set(&self, key: &str, value: &T) -> Result<bool> {
        self.inner.upsert(key, value)
    }

    /// Values in insertion order.
    pub fn values(&self) -> Result<Vec<T>> {
        self.to_vec()
    }

    /// Key and value pairs in insertion order.
    pub fn entries(&self) -> Result<Vec<(String, T)>> {
        self.inner.entries()
    }
}

impl<T, C> PersistentDictionary<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    pub fn add_async(&self, key: impl Into<String>, value: T) -> Ticket<()> {
        let key = key.into();
        self.schedule(self.clone(), move |dict| dict.add(key, &value))
    }

    pub fn set_async(&self, key: impl Into<String>, value: T) -> Ticket<bool> {
        let key = key.into();
        self.schedule(self.clone(), move |dict| dict.set(&key, &value))
    }

    pub fn values_async(&self) -> Ticket<Vec<T>> {
        self.schedule(self.clone(), |dict| dict.values())
    }

    pub fn entries_async(&self) -> Ticket<Vec<(String, T)>> {
        self.schedule(self.clone(), |dict| dict.entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::events::CollectionEvent;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> PersistentDictionary<String> {
        PersistentDictionary::open(dir.path().join("dict")).unwrap()
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_add_get() {
        let dir = TempDir::new().unwrap();
        let dict = open(&dir);

        dict.add("name", &s("John Doe")).unwrap();
        assert_eq!(dict.get("name").unwrap(), "John Doe");
        assert!(matches!(
            dict.get("nonexistent"),
            Err(StoreError::KeyNotFound(_))
        ));
        assert_eq!(dict.try_get("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_duplicate_add_keeps_value() {
        let dir = TempDir::new().unwrap();
        let dict = open(&dir);

        dict.add("phone", &s("555-1234")).unwrap();
        assert!(matches!(
            dict.add("phone", &s("555-0000")),
            Err(StoreError::DuplicateKey(_))
        ));
        assert_eq!(dict.get("phone").unwrap(), "555-1234");
    }

    #[test]
    fn test_set_upserts() {
        let dir = TempDir::new().unwrap();
        let dict = open(&dir);

        dict.add("phone", &s("555-1234")).unwrap();
        assert!(!dict.set("phone", &s("555-5678")).unwrap());
        assert_eq!(dict.count().unwrap(), 1);
        assert_eq!(dict.get("phone").unwrap(), "555-5678");

        assert!(dict.set("email", &s("john@example.com")).unwrap());
        assert_eq!(dict.count().unwrap(), 2);
    }

    #[test]
    fn test_views_in_insertion_order() {
        let dir = TempDir::new().unwrap();
        let dict = open(&dir);

        dict.add("b", &s("2")).unwrap();
        dict.add("a", &s("1")).unwrap();
        dict.add("c", &s("3")).unwrap();
        dict.remove("a").unwrap();

        assert_eq!(dict.keys().unwrap(), vec!["b", "c"]);
        assert_eq!(dict.values().unwrap(), vec!["2", "3"]);
        assert_eq!(
            dict.entries().unwrap(),
            vec![(s("b"), s("2")), (s("c"), s("3"))]
        );
    }

    #[test]
    fn test_empty_key_rejected() {
        let dir = TempDir::new().unwrap();
        let dict = open(&dir);

        assert!(matches!(
            dict.add("", &s("v")),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            dict.set("", &s("v")),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(dict.remove(""), Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_set_events() {
        let dir = TempDir::new().unwrap();
        let dict = open(&dir);
        let events = dict.subscribe(8);

        dict.set("k", &s("1")).unwrap();
        dict.set("k", &s("2")).unwrap();

        assert_eq!(
            events.drain(),
            vec![
                CollectionEvent::Added { key: s("k") },
                CollectionEvent::Updated { key: s("k") },
            ]
        );
    }

    #[test]
    fn test_async_variants() {
        let dir = TempDir::new().unwrap();
        let dict = open(&dir);

        dict.add_async("a", s("1")).wait().unwrap();
        assert!(!dict.set_async("a", s("2")).wait().unwrap());
        assert_eq!(dict.try_get_async("a").wait().unwrap(), Some(s("2")));
        assert_eq!(dict.try_get_async("zz").wait().unwrap(), None);
        dict.add_async("b", s("9")).wait().unwrap();
        assert_eq!(dict.values_async().wait().unwrap(), vec![s("2"), s("9")]);
        assert_eq!(
            dict.entries_async().wait().unwrap(),
            vec![(s("a"), s("2")), (s("b"), s("9"))]
        );
        assert!(matches!(
            dict.add_async("a", s("3")).wait(),
            Err(StoreError::DuplicateKey(_))
        ));
    }
}
