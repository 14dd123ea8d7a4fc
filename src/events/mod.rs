//! In-process change notification.
//!
//! Every collection owns an [`EventDispatcher`]. Listeners are invoked in
//! registration order on the thread that performed the mutation, after the
//! change is durable and before the mutating call returns.
//!
//! Two registration styles share one listener list:
//! - callbacks via [`EventDispatcher::add_listener`]
//! - bounded channels via [`EventDispatcher::subscribe`]; a subscriber that
//!   falls behind or drops its receiver is removed
//!
//! # Example
//!
//! ```ignore
//! let list: PersistentList<String> = PersistentList::open(path)?;
//! let events = list.subscribe(64);
//!
//! list.add(&"foo".to_string())?;
//! assert!(matches!(events.try_recv(), Ok(CollectionEvent::Added { .. })));
//! ```

mod dispatcher;
mod types;

pub use dispatcher::EventDispatcher;
pub use types::{CollectionEvent, ListenerId, Subscription};
