//! Collection engine: one open persistence root behind a reader/writer guard.
//!
//! The engine owns the record store, the order index and the key generator
//! of a root. Every collection call runs as one logical unit under the
//! guard: mutations take the write lock, reads take the read lock. Events
//! produced by a mutation are dispatched after the lock is released and
//! before the call returns.
//!
//! Commit points are ordered so a crash leaves at most orphaned records,
//! which are removed the next time the root is opened:
//! - insert writes the record, then the index
//! - update replaces the record atomically and leaves the index alone
//! - remove and clear write the index, then delete records

use crate::config::CollectionConfig;
use crate::error::{Result, StoreError};
use crate::events::{CollectionEvent, EventDispatcher};
use crate::fsutil;
use crate::order::{KeyGenerator, OrderIndex};
use crate::records::{DirStore, LogStore, RecordStore};
use crate::types::{Backend, CollectionKind, KeyPolicy, Placement, Record, MAX_KEY_LEN};
use crate::worker::WorkerPool;
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Magic bytes for the collection manifest.
const MANIFEST_MAGIC: &[u8; 4] = b"PCL\0";

/// Current collection format version.
const MANIFEST_VERSION: u8 = 1;

/// magic + version + kind + backend
const MANIFEST_SIZE: usize = 4 + 1 + 1 + 1;

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
const INDEX_FILE: &str = "order.idx";
const KEYS_FILE: &str = "keys.seq";
const LOG_FILE: &str = "records.log";
const RECORDS_DIR: &str = "records";

/// Reject keys that cannot be stored.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidArgument("Key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidArgument(format!(
            "Key is {} bytes, the limit is {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

/// Open storage of a collection root.
pub(crate) struct Storage {
    /// Lock file for exclusive access.
    _lock_file: File,

    records: Box<dyn RecordStore>,

    index: OrderIndex,

    /// Present for collections with generated keys.
    keys: Option<KeyGenerator>,
}

impl Storage {
    // --- Reads ---

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.index.contains(key)
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.index.keys()
    }

    pub(crate) fn key_at(&self, position: usize) -> Result<&str> {
        self.index.key_at(position)
    }

    pub(crate) fn position_of(&self, key: &str) -> Option<usize> {
        self.index.position_of(key)
    }

    /// Payload of a key referenced by the index.
    pub(crate) fn payload(&self, key: &str) -> Result<Vec<u8>> {
        if !self.index.contains(key) {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }
        self.records.get(key)
    }

    pub(crate) fn payload_at(&self, position: usize) -> Result<(String, Vec<u8>)> {
        let key = self.index.key_at(position)?.to_string();
        let payload = self.records.get(&key)?;
        Ok((key, payload))
    }

    pub(crate) fn record(&self, key: &str) -> Result<Record> {
        let sequence = self
            .index
            .sequence_of(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
        Ok(Record {
            key: key.to_string(),
            payload: self.records.get(key)?,
            sequence,
        })
    }

    /// Payloads in collection order.
    pub(crate) fn payloads(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.index
            .iter()
            .map(|entry| {
                self.records
                    .get(&entry.key)
                    .map(|payload| (entry.key.clone(), payload))
            })
            .collect()
    }

    pub(crate) fn byte_len(&self) -> u64 {
        self.records.byte_len()
    }

    // --- Mutations ---

    /// Add a record. `key` is generated when `None`.
    pub(crate) fn insert(
        &mut self,
        key: Option<String>,
        payload: &[u8],
        placement: Placement,
    ) -> Result<(String, usize)> {
        if let Placement::At(position) = placement {
            if position > self.index.len() {
                return Err(StoreError::IndexOutOfRange {
                    index: position,
                    len: self.index.len(),
                });
            }
        }

        let key = match key {
            Some(key) => {
                validate_key(&key)?;
                if self.index.contains(&key) || self.records.contains(&key) {
                    return Err(StoreError::DuplicateKey(key));
                }
                if let Some(keys) = &mut self.keys {
                    keys.observe(&key);
                }
                key
            }
            None => self.generate_key()?,
        };

        self.records.put(&key, payload)?;

        let position = match self.index.place(placement, key.clone()) {
            Ok(position) => position,
            Err(e) => {
                self.discard_record(&key);
                return Err(e);
            }
        };

        if let Err(e) = self.index.save() {
            self.index.remove_key(&key);
            self.discard_record(&key);
            return Err(e);
        }

        Ok((key, position))
    }

    /// Replace the payload of an existing key.
    pub(crate) fn replace(&mut self, key: &str, payload: &[u8]) -> Result<()> {
        if !self.index.contains(key) {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }
        self.records.put(key, payload)
    }

    /// Remove `key`. Returns the position it held, or `None` if absent.
    pub(crate) fn remove_key(&mut self, key: &str) -> Result<Option<usize>> {
        let (position, entry) = match self.index.remove_key(key) {
            Some(removed) => removed,
            None => return Ok(None),
        };

        if let Err(e) = self.index.save() {
            self.index.restore(position, entry);
            return Err(e);
        }

        self.discard_record(key);
        Ok(Some(position))
    }

    /// Remove the element at `position`, returning its key.
    pub(crate) fn remove_at(&mut self, position: usize) -> Result<String> {
        let key = self.index.key_at(position)?.to_string();
        self.remove_key(&key)?;
        Ok(key)
    }

    /// Remove everything. Returns the number of records removed.
    pub(crate) fn clear(&mut self) -> Result<usize> {
        let entries = self.index.take_all();
        let count = entries.len();

        if let Err(e) = self.index.save() {
            self.index.restore_all(entries);
            return Err(e);
        }

        if let Err(e) = self.records.clear() {
            warn!(error = %e, "Failed to delete cleared records; they will be removed on next open");
        }
        Ok(count)
    }

    pub(crate) fn compact(&mut self) -> Result<bool> {
        self.records.compact()
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.records.sync()
    }

    fn generate_key(&mut self) -> Result<String> {
        let Storage {
            records,
            index,
            keys,
            ..
        } = self;

        match keys {
            Some(keys) => {
                keys.next_key(|candidate| index.contains(candidate) || records.contains(candidate))
            }
            None => Err(StoreError::InvalidArgument(
                "This collection requires caller-supplied keys".into(),
            )),
        }
    }

    /// Delete a record the index no longer references.
    ///
    /// Failure leaves an orphan that the next open removes.
    fn discard_record(&mut self, key: &str) {
        if let Err(e) = self.records.delete(key) {
            warn!(key, error = %e, "Failed to delete unreferenced record");
        }
    }

    /// Bring index, records and key generator back into agreement.
    fn reconcile(&mut self) -> Result<()> {
        let records = &self.records;
        let dropped = self.index.retain(|key| records.contains(key));
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "Dropped index entries without records");
            self.index.save()?;
        }

        let orphans: Vec<String> = self
            .records
            .keys()
            .into_iter()
            .filter(|key| !self.index.contains(key))
            .collect();
        if !orphans.is_empty() {
            warn!(count = orphans.len(), "Deleting records not referenced by the index");
            for key in &orphans {
                self.records.delete(key)?;
            }
        }

        if let Some(keys) = &mut self.keys {
            for entry in self.index.iter() {
                keys.observe(&entry.key);
            }
            keys.persist()?;
        }

        Ok(())
    }
}

/// Shared state of one open collection.
pub(crate) struct Engine {
    path: PathBuf,
    kind: CollectionKind,
    backend: Backend,

    /// `None` once closed.
    state: RwLock<Option<Storage>>,

    events: Arc<EventDispatcher>,

    worker: WorkerPool,
}

impl Engine {
    /// Open (or create) the root described by `config` as a collection of `kind`.
    pub(crate) fn open(kind: CollectionKind, config: &CollectionConfig) -> Result<Self> {
        let path = config.path.clone();
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidArgument(
                "Persistence path must not be empty".into(),
            ));
        }
        if path.exists() && !path.is_dir() {
            return Err(StoreError::InvalidArgument(format!(
                "Persistence path {} is not a directory",
                path.display()
            )));
        }

        if config.reset && path.exists() {
            Self::reset_root(&path)?;
        }

        let created = !path.join(MANIFEST_FILE).exists();
        let (lock_file, backend) = if created {
            Self::create_root(&path, kind, config)?
        } else {
            Self::open_root(&path, kind, config)?
        };

        Self::remove_stale_files(&path);

        let records: Box<dyn RecordStore> = match backend {
            Backend::Log => Box::new(LogStore::open(
                path.join(LOG_FILE),
                config.compaction_threshold,
            )?),
            Backend::Directory => Box::new(DirStore::open(
                path.join(RECORDS_DIR),
                config.cache_size,
            )?),
        };
        let index = OrderIndex::load(path.join(INDEX_FILE))?;
        let keys = match kind.key_policy() {
            KeyPolicy::Generated => Some(KeyGenerator::load(path.join(KEYS_FILE))?),
            KeyPolicy::Supplied => None,
        };

        let mut storage = Storage {
            _lock_file: lock_file,
            records,
            index,
            keys,
        };
        storage.reconcile()?;

        info!(
            path = %path.display(),
            %kind,
            %backend,
            count = storage.len(),
            created,
            "Opened collection"
        );

        let events = Arc::new(EventDispatcher::new());
        let worker = WorkerPool::new(
            format!("pcoll-{}", kind),
            config.worker_threads,
            events.clone(),
        );

        Ok(Self {
            path,
            kind,
            backend,
            state: RwLock::new(Some(storage)),
            events,
            worker,
        })
    }

    fn create_root(
        path: &Path,
        kind: CollectionKind,
        config: &CollectionConfig,
    ) -> Result<(File, Backend)> {
        if !path.exists() {
            if !config.create_if_missing {
                return Err(StoreError::NotInitialized);
            }
            fs::create_dir_all(path)?;
        } else if !Self::is_vacant(path)? {
            return Err(StoreError::InvalidArgument(format!(
                "{} is not empty and is not a collection root",
                path.display()
            )));
        }

        let lock_file = Self::acquire_lock(path)?;
        let backend = config.backend.unwrap_or_default();
        Self::write_manifest(path, kind, backend)?;

        info!(path = %path.display(), %kind, %backend, "Created collection root");
        Ok((lock_file, backend))
    }

    /// Empty, or holding only what an interrupted create leaves behind.
    fn is_vacant(path: &Path) -> Result<bool> {
        let leftover = fsutil::tmp_path(Path::new(MANIFEST_FILE)).into_os_string();
        for entry in fs::read_dir(path)? {
            let name = entry?.file_name();
            if name != LOCK_FILE && name != leftover {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn open_root(
        path: &Path,
        kind: CollectionKind,
        config: &CollectionConfig,
    ) -> Result<(File, Backend)> {
        let (found_kind, found_backend) = Self::verify_manifest(path)?;

        if found_kind != kind {
            return Err(StoreError::KindMismatch {
                expected: kind,
                found: found_kind,
            });
        }
        if let Some(requested) = config.backend {
            if requested != found_backend {
                return Err(StoreError::BackendMismatch {
                    expected: requested,
                    found: found_backend,
                });
            }
        }

        let lock_file = Self::acquire_lock(path)?;
        Ok((lock_file, found_backend))
    }

    /// Wipe a root so it can be recreated.
    fn reset_root(path: &Path) -> Result<()> {
        if !path.join(MANIFEST_FILE).exists() {
            if fs::read_dir(path)?.next().is_none() {
                return Ok(());
            }
            return Err(StoreError::InvalidArgument(format!(
                "Refusing to reset {}: not a collection root",
                path.display()
            )));
        }

        // Fails with Locked if another instance has the root open.
        let probe = Self::acquire_lock(path)?;
        drop(probe);

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        fsutil::sync_dir(path);

        info!(path = %path.display(), "Reset collection root");
        Ok(())
    }

    /// Remove temp files left by an interrupted atomic replace.
    fn remove_stale_files(path: &Path) {
        for name in [MANIFEST_FILE, INDEX_FILE, KEYS_FILE] {
            let tmp = fsutil::tmp_path(&path.join(name));
            match fs::remove_file(&tmp) {
                Ok(()) => warn!(file = %tmp.display(), "Removed stale temp file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(file = %tmp.display(), error = %e, "Failed to remove stale temp file"),
            }
        }
    }

    fn write_manifest(path: &Path, kind: CollectionKind, backend: Backend) -> Result<()> {
        let mut buf = Vec::with_capacity(MANIFEST_SIZE);
        buf.extend_from_slice(MANIFEST_MAGIC);
        buf.push(MANIFEST_VERSION);
        buf.push(kind.to_byte());
        buf.push(backend.to_byte());

        fsutil::write_atomic(&path.join(MANIFEST_FILE), &buf)?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<(CollectionKind, Backend)> {
        let bytes = fs::read(path.join(MANIFEST_FILE))?;

        if bytes.len() < 4 || &bytes[..4] != MANIFEST_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid collection magic".into()));
        }
        if bytes.len() != MANIFEST_SIZE {
            return Err(StoreError::Corruption(format!(
                "Manifest has {} bytes",
                bytes.len()
            )));
        }
        if bytes[4] != MANIFEST_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported collection version: {}",
                bytes[4]
            )));
        }

        let kind = CollectionKind::from_byte(bytes[5]).ok_or_else(|| {
            StoreError::InvalidFormat(format!("Unknown collection kind: {}", bytes[5]))
        })?;
        let backend = Backend::from_byte(bytes[6]).ok_or_else(|| {
            StoreError::InvalidFormat(format!("Unknown storage backend: {}", bytes[6]))
        })?;

        Ok((kind, backend))
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join(LOCK_FILE);
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }

    // --- Accessors ---

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub(crate) fn backend(&self) -> Backend {
        self.backend
    }

    pub(crate) fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub(crate) fn worker(&self) -> &WorkerPool {
        &self.worker
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.read().is_none()
    }

    // --- Logical units ---

    /// Run a read under the shared lock.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Storage) -> Result<R>) -> Result<R> {
        let guard = self.state.read();
        let storage = guard.as_ref().ok_or(StoreError::Closed)?;
        f(storage)
    }

    /// Run a mutation under the exclusive lock, then dispatch the events it produced.
    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&mut Storage, &mut Vec<CollectionEvent>) -> Result<R>,
    ) -> Result<R> {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.state.write();
            let storage = guard.as_mut().ok_or(StoreError::Closed)?;
            f(storage, &mut events)
        };

        self.events.dispatch(&events);
        result
    }

    /// Flush, release the root lock and stop the worker pool. Idempotent.
    pub(crate) fn close(&self) -> Result<()> {
        let storage = self.state.write().take();
        self.worker.shutdown();

        if let Some(mut storage) = storage {
            let synced = storage.sync();
            drop(storage);
            info!(path = %self.path.display(), kind = %self.kind, "Closed collection");
            synced?;
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Best-effort close on drop
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CollectionConfig {
        CollectionConfig::new(dir.path().join("root"))
    }

    fn append(engine: &Engine, payload: &[u8]) -> String {
        engine
            .write(|s, _| s.insert(None, payload, Placement::Back))
            .unwrap()
            .0
    }

    #[test]
    fn test_create_root() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();

        assert!(engine.path().join(MANIFEST_FILE).exists());
        assert!(engine.path().join(LOG_FILE).exists());
        assert_eq!(engine.backend(), Backend::Log);
    }

    #[test]
    fn test_empty_path_rejected() {
        let result = Engine::open(CollectionKind::List, &CollectionConfig::new(""));
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_file_path_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"hello").unwrap();

        let result = Engine::open(CollectionKind::List, &CollectionConfig::new(&file));
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_missing_root_without_create() {
        let dir = TempDir::new().unwrap();
        let result = Engine::open(CollectionKind::Queue, &config(&dir).create_if_missing(false));
        assert!(matches!(result, Err(StoreError::NotInitialized)));
    }

    #[test]
    fn test_interrupted_create_resumes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(root.join(LOCK_FILE), b"").unwrap();
        fs::write(root.join("MANIFEST.tmp"), b"PCL").unwrap();

        let engine = Engine::open(CollectionKind::Stack, &config(&dir)).unwrap();
        assert_eq!(engine.kind(), CollectionKind::Stack);
        assert!(!root.join("MANIFEST.tmp").exists());
    }

    #[test]
    fn test_kind_mismatch() {
        let dir = TempDir::new().unwrap();
        drop(Engine::open(CollectionKind::Queue, &config(&dir)).unwrap());

        match Engine::open(CollectionKind::Stack, &config(&dir)) {
            Err(StoreError::KindMismatch { expected, found }) => {
                assert_eq!(expected, CollectionKind::Stack);
                assert_eq!(found, CollectionKind::Queue);
            }
            other => panic!("Expected KindMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_backend_recorded() {
        let dir = TempDir::new().unwrap();
        drop(Engine::open(CollectionKind::List, &config(&dir).backend(Backend::Directory)).unwrap());

        let engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();
        assert_eq!(engine.backend(), Backend::Directory);
        drop(engine);

        let result = Engine::open(CollectionKind::List, &config(&dir).backend(Backend::Log));
        assert!(matches!(result, Err(StoreError::BackendMismatch { .. })));
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();

        let result = Engine::open(CollectionKind::List, &config(&dir));
        assert!(matches!(result, Err(StoreError::Locked)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();
        append(&engine, b"a");

        engine.close().unwrap();
        engine.close().unwrap();
        assert!(engine.is_closed());

        let result = engine.read(|s| Ok(s.len()));
        assert!(matches!(result, Err(StoreError::Closed)));

        // Lock released
        let reopened = Engine::open(CollectionKind::List, &config(&dir)).unwrap();
        assert_eq!(reopened.read(|s| Ok(s.len())).unwrap(), 1);
    }

    #[test]
    fn test_reset_wipes_root() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();
            append(&engine, b"a");
            append(&engine, b"b");
        }

        let engine = Engine::open(CollectionKind::List, &config(&dir).reset(true)).unwrap();
        assert_eq!(engine.read(|s| Ok(s.len())).unwrap(), 0);
    }

    #[test]
    fn test_reset_refuses_foreign_directory() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("notes.txt"), b"keep me").unwrap();

        let result = Engine::open(CollectionKind::List, &config(&dir).reset(true));
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
        assert!(root.join("notes.txt").exists());
    }

    #[test]
    fn test_events_after_unlock() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(Engine::open(CollectionKind::List, &config(&dir)).unwrap());

        // A listener that reads the collection would deadlock if called under the lock.
        let observer = engine.clone();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.events().add_listener(move |_| {
            sink.lock().push(observer.read(|s| Ok(s.len())).unwrap());
        });

        engine
            .write(|s, events| {
                let (key, _) = s.insert(None, b"x", Placement::Back)?;
                events.push(CollectionEvent::Added { key });
                Ok(())
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec![1]);
    }

    #[test]
    fn test_failed_index_write_rolls_back() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();
        append(&engine, b"a");

        // Block the index temp file so the next index write fails.
        let blocker = fsutil::tmp_path(&engine.path().join(INDEX_FILE));
        fs::create_dir(&blocker).unwrap();

        let result = engine.write(|s, _| s.insert(None, b"b", Placement::Back));
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert_eq!(engine.read(|s| Ok(s.len())).unwrap(), 1);
        assert_eq!(engine.read(|s| Ok(s.records.len())).unwrap(), 1);

        let result = engine.write(|s, _| s.remove_at(0));
        assert!(result.is_err());
        assert_eq!(engine.read(|s| Ok(s.len())).unwrap(), 1);

        fs::remove_dir(&blocker).unwrap();
        append(&engine, b"b");
        assert_eq!(engine.read(|s| Ok(s.len())).unwrap(), 2);
    }

    #[test]
    fn test_reconcile_removes_orphans() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        {
            let engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();
            append(&engine, b"kept");
        }

        // Simulate a crash between the record write and the index write.
        {
            let mut log = LogStore::open(root.join(LOG_FILE), u64::MAX).unwrap();
            log.put("orphan", b"lost").unwrap();
        }

        let engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();
        engine
            .read(|s| {
                assert_eq!(s.len(), 1);
                assert!(!s.records.contains("orphan"));
                assert_eq!(s.records.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_reconcile_drops_dangling_entries() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let key = {
            let engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();
            append(&engine, b"one");
            append(&engine, b"two")
        };

        {
            let mut log = LogStore::open(root.join(LOG_FILE), u64::MAX).unwrap();
            log.delete(&key).unwrap();
        }

        let engine = Engine::open(CollectionKind::List, &config(&dir)).unwrap();
        assert_eq!(engine.read(|s| Ok(s.keys().len())).unwrap(), 1);
        assert!(!engine.read(|s| Ok(s.contains_key(&key))).unwrap());
    }

    #[test]
    fn test_generated_keys_not_reused() {
        let dir = TempDir::new().unwrap();
        let first = {
            let engine = Engine::open(CollectionKind::Stack, &config(&dir)).unwrap();
            let key = append(&engine, b"a");
            engine.write(|s, _| s.remove_key(&key)).unwrap();
            key
        };

        let engine = Engine::open(CollectionKind::Stack, &config(&dir)).unwrap();
        let second = append(&engine, b"b");
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn test_dictionary_requires_keys() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(CollectionKind::Dictionary, &config(&dir)).unwrap();

        let result = engine.write(|s, _| s.insert(None, b"v", Placement::Back));
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));

        engine
            .write(|s, _| s.insert(Some("name".into()), b"v", Placement::Back))
            .unwrap();
        let result = engine.write(|s, _| s.insert(Some("name".into()), b"w", Placement::Back));
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert!(!engine.path().join(KEYS_FILE).exists());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("a").is_ok());
        assert!(matches!(validate_key(""), Err(StoreError::InvalidArgument(_))));
        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(validate_key(&long), Err(StoreError::InvalidArgument(_))));
    }
}
