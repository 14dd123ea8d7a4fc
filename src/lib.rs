//! # Persistent Collections
//!
//! Disk-backed list, queue, stack and dictionary types that behave like
//! their in-memory counterparts and survive process restarts.
//!
//! ## Core Concepts
//!
//! - **Records**: key -> serialized value, durable before each call returns
//! - **Order Index**: position <-> key mapping giving each collection its order
//! - **Keys**: generated for list/queue/stack, caller-supplied for dictionaries
//! - **Events**: synchronous notification after every durable mutation
//! - **Async**: `*_async` variants run the same operation on a worker pool
//!
//! ## Example
//!
//! ```ignore
//! use pcoll::{PersistentList, PersistentQueue};
//!
//! let list: PersistentList<String> = PersistentList::open("./names")?;
//! list.add(&"foo".to_string())?;
//! list.add(&"bar".to_string())?;
//! assert_eq!(list.get_at(1)?, "bar");
//!
//! let jobs: PersistentQueue<u64> = PersistentQueue::open("./jobs")?;
//! jobs.enqueue(&42)?;
//! assert_eq!(jobs.dequeue()?, Some(42));
//! assert_eq!(jobs.dequeue()?, None);
//! ```

pub mod codec;
pub mod collection;
pub mod collections;
pub mod config;
mod engine;
pub mod error;
pub mod events;
mod fsutil;
pub mod order;
pub mod records;
pub mod types;
pub mod worker;

// Re-exports
pub use codec::{Codec, Json, MessagePack};
pub use collection::{Collection, Iter};
pub use collections::{PersistentDictionary, PersistentList, PersistentQueue, PersistentStack};
pub use config::CollectionConfig;
pub use error::{Result, StoreError};
pub use events::{CollectionEvent, EventDispatcher, ListenerId, Subscription};
pub use order::{IndexEntry, KeyGenerator, OrderIndex};
pub use records::{DirStore, LogStore, RecordStore};
pub use types::*;
pub use worker::{Ticket, WorkerPool};
