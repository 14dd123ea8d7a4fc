//! Error handling and edge case tests.

use pcoll::{
    Backend, CollectionConfig, CollectionKind, PersistentDictionary, PersistentList,
    PersistentQueue, PersistentStack, StoreError, MAX_KEY_LEN,
};
use std::fs;
use tempfile::TempDir;

fn s(v: &str) -> String {
    v.to_string()
}

fn test_list(dir: &TempDir) -> PersistentList<String> {
    PersistentList::open(dir.path().join("list")).unwrap()
}

// --- Opening ---

#[test]
fn test_empty_path_rejected() {
    let result = PersistentList::<String>::open("");
    assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
}

#[test]
fn test_missing_root_without_create() {
    let dir = TempDir::new().unwrap();
    let config = CollectionConfig::new(dir.path().join("absent")).create_if_missing(false);

    let result = PersistentQueue::<u32>::open_with(config);
    assert!(matches!(result, Err(StoreError::NotInitialized)));
    assert!(!dir.path().join("absent").exists());
}

#[test]
fn test_kind_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("root");
    drop(PersistentList::<u32>::open(&path).unwrap());

    match PersistentQueue::<u32>::open(&path) {
        Err(StoreError::KindMismatch { expected, found }) => {
            assert_eq!(expected, CollectionKind::Queue);
            assert_eq!(found, CollectionKind::List);
        }
        other => panic!("Expected KindMismatch, got {:?}", other.err()),
    }

    // The root is untouched and still opens as a list.
    PersistentList::<u32>::open(&path).unwrap();
}

#[test]
fn test_backend_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("root");
    drop(PersistentStack::<u32>::open(&path).unwrap());

    let config = CollectionConfig::new(&path).backend(Backend::Directory);
    assert!(matches!(
        PersistentStack::<u32>::open_with(config),
        Err(StoreError::BackendMismatch {
            expected: Backend::Directory,
            found: Backend::Log,
        })
    ));
}

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let _list = test_list(&dir);

    assert!(matches!(
        PersistentList::<String>::open(dir.path().join("list")),
        Err(StoreError::Locked)
    ));
}

#[test]
fn test_foreign_directory_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("photos");
    fs::create_dir(&path).unwrap();
    fs::write(path.join("cat.jpg"), b"meow").unwrap();

    let result = PersistentDictionary::<String>::open(&path);
    assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    assert!(path.join("cat.jpg").exists());
}

// --- Positions ---

#[test]
fn test_position_out_of_range() {
    let dir = TempDir::new().unwrap();
    let list = test_list(&dir);
    list.add(&s("only")).unwrap();

    assert!(matches!(
        list.get_at(1),
        Err(StoreError::IndexOutOfRange { index: 1, len: 1 })
    ));
    assert!(matches!(
        list.insert(2, &s("far")),
        Err(StoreError::IndexOutOfRange { index: 2, len: 1 })
    ));
    assert!(matches!(
        list.remove_at(5),
        Err(StoreError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        list.update_at(1, &s("nope")),
        Err(StoreError::IndexOutOfRange { .. })
    ));

    // Inserting at count appends.
    list.insert(1, &s("end")).unwrap();
    assert_eq!(list.to_vec().unwrap(), vec!["only", "end"]);
}

#[test]
fn test_failed_calls_leave_no_partial_state() {
    let dir = TempDir::new().unwrap();
    let list = test_list(&dir);
    list.add(&s("a")).unwrap();
    let keys = list.keys().unwrap();
    let bytes = list.byte_len().unwrap();

    assert!(list.insert(9, &s("x")).is_err());
    assert!(list.update_at(3, &s("x")).is_err());
    assert!(list.add_with_key(&keys[0], &s("dup")).is_err());
    assert!(list.add_with_key("", &s("empty")).is_err());

    assert_eq!(list.keys().unwrap(), keys);
    assert_eq!(list.byte_len().unwrap(), bytes);
    assert_eq!(list.get_at(0).unwrap(), "a");
}

// --- Keys ---

#[test]
fn test_missing_key() {
    let dir = TempDir::new().unwrap();
    let list = test_list(&dir);

    assert!(matches!(list.get("nope"), Err(StoreError::KeyNotFound(k)) if k == "nope"));
    assert!(matches!(
        list.update("nope", &s("v")),
        Err(StoreError::KeyNotFound(_))
    ));
    assert_eq!(list.try_get("nope").unwrap(), None);
    assert!(!list.remove("nope").unwrap());
}

#[test]
fn test_invalid_keys() {
    let dir = TempDir::new().unwrap();
    let dict: PersistentDictionary<u8> =
        PersistentDictionary::open(dir.path().join("dict")).unwrap();

    let err = dict.add("", &1).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
    assert!(err.is_validation());

    let long = "k".repeat(MAX_KEY_LEN + 1);
    assert!(matches!(
        dict.set(&long, &1),
        Err(StoreError::InvalidArgument(_))
    ));
    assert!(matches!(dict.get(""), Err(StoreError::InvalidArgument(_))));

    // The longest legal key round-trips.
    let longest = "k".repeat(MAX_KEY_LEN);
    dict.add(longest.clone(), &7).unwrap();
    assert_eq!(dict.get(&longest).unwrap(), 7);
    assert_eq!(dict.count().unwrap(), 1);
}

#[test]
fn test_duplicate_key() {
    let dir = TempDir::new().unwrap();
    let queue: PersistentQueue<u32> = PersistentQueue::open(dir.path().join("queue")).unwrap();

    queue.enqueue_with_key("job-1", &1).unwrap();
    let err = queue.enqueue_with_key("job-1", &2).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(ref k) if k == "job-1"));
    assert!(err.is_validation());

    assert_eq!(queue.count().unwrap(), 1);
    assert_eq!(queue.dequeue_key("job-1").unwrap(), 1);
    assert!(matches!(
        queue.dequeue_key("job-1"),
        Err(StoreError::KeyNotFound(_))
    ));
}

#[test]
fn test_generated_keys_exhausted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("list");

    {
        let list = test_list(&dir);
        list.add_with_key("fffffffffffffffe", &s("last")).unwrap();

        let err = list.add(&s("overflow")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(list.count().unwrap(), 1);

        // Caller-supplied keys still work.
        list.add_with_key("manual", &s("ok")).unwrap();
        list.close().unwrap();
    }

    let list: PersistentList<String> = PersistentList::open(&path).unwrap();
    assert!(matches!(list.add(&s("again")), Err(StoreError::InvalidArgument(_))));
    assert_eq!(list.to_vec().unwrap(), vec!["last", "ok"]);
}

// --- Empty collections ---

#[test]
fn test_empty_stack_is_an_error() {
    let dir = TempDir::new().unwrap();
    let stack: PersistentStack<u32> = PersistentStack::open(dir.path().join("stack")).unwrap();

    assert!(matches!(stack.pop(), Err(StoreError::EmptyCollection)));
    assert!(matches!(stack.peek(), Err(StoreError::EmptyCollection)));
    assert_eq!(stack.to_array().unwrap(), Vec::<u32>::new());
}

#[test]
fn test_empty_queue_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let queue: PersistentQueue<u32> = PersistentQueue::open(dir.path().join("queue")).unwrap();

    assert_eq!(queue.dequeue().unwrap(), None);
    assert_eq!(queue.peek().unwrap(), None);
    assert!(matches!(
        queue.peek_at(0),
        Err(StoreError::IndexOutOfRange { index: 0, len: 0 })
    ));
}

// --- Lifecycle ---

#[test]
fn test_operations_after_close() {
    let dir = TempDir::new().unwrap();
    let list = test_list(&dir);
    let other = list.clone();
    list.add(&s("a")).unwrap();

    list.close().unwrap();
    list.close().unwrap();

    assert!(list.is_closed());
    assert!(other.is_closed());
    assert!(matches!(list.count(), Err(StoreError::Closed)));
    assert!(matches!(other.add(&s("b")), Err(StoreError::Closed)));
    assert!(matches!(other.get_at(0), Err(StoreError::Closed)));
    assert!(matches!(list.clear(), Err(StoreError::Closed)));
}

#[test]
fn test_value_type_mismatch_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("list");
    {
        let list: PersistentList<String> = PersistentList::open(&path).unwrap();
        list.add(&s("not a number")).unwrap();
    }

    let list: PersistentList<u32> = PersistentList::open(&path).unwrap();
    let err = list.get_at(0).unwrap_err();
    assert!(matches!(err, StoreError::Deserialization(_)));
    assert!(!err.is_validation());

    // The record itself is still intact.
    assert_eq!(list.count().unwrap(), 1);
}
