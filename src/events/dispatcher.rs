//! Listener registry and synchronous dispatch.

use super::types::{CollectionEvent, ListenerId, Subscription};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Callback = Arc<dyn Fn(&CollectionEvent) + Send + Sync>;

/// A registered receiver of events.
#[derive(Clone)]
enum Listener {
    Callback(Callback),
    Channel(Sender<CollectionEvent>),
}

impl Listener {
    /// Deliver an event. Returns false if the listener should be dropped.
    fn deliver(&self, event: &CollectionEvent) -> bool {
        match self {
            Listener::Callback(callback) => {
                callback(event);
                true
            }
            Listener::Channel(sender) => match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => false,
                Err(TrySendError::Disconnected(_)) => false,
            },
        }
    }
}

/// Ordered list of listeners for one collection.
pub struct EventDispatcher {
    /// Listeners in registration order.
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    /// Counter for generating listener IDs.
    next_id: AtomicU64,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback. It runs on the mutating thread and may call
    /// back into the collection.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + Send + Sync + 'static,
    {
        self.register(Listener::Callback(Arc::new(callback)))
    }

    /// Register a channel subscriber holding up to `buffer` undelivered events.
    pub fn subscribe(&self, buffer: usize) -> Subscription {
        let (sender, receiver) = bounded(buffer.max(1));
        let id = self.register(Listener::Channel(sender));
        Subscription { id, receiver }
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver `events` in order to every listener in registration order.
    ///
    /// The listener list is snapshotted first, so callbacks may register or
    /// remove listeners without deadlocking.
    pub fn dispatch(&self, events: &[CollectionEvent]) {
        if events.is_empty() {
            return;
        }

        let snapshot: Vec<(ListenerId, Listener)> = self.listeners.read().clone();
        if snapshot.is_empty() {
            return;
        }

        let mut to_remove = Vec::new();
        for event in events {
            for (id, listener) in &snapshot {
                if to_remove.contains(id) {
                    continue;
                }
                if !listener.deliver(event) {
                    to_remove.push(*id);
                }
            }
        }

        // Remove dropped subscribers
        if !to_remove.is_empty() {
            self.listeners
                .write()
                .retain(|(id, _)| !to_remove.contains(id));
        }
    }

    /// Deliver a single event.
    pub fn emit(&self, event: CollectionEvent) {
        self.dispatch(std::slice::from_ref(&event));
    }

    fn register(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn added(key: &str) -> CollectionEvent {
        CollectionEvent::Added { key: key.into() }
    }

    #[test]
    fn test_callbacks_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let seen = seen.clone();
            dispatcher.add_listener(move |event| {
                seen.lock().push((name, event.clone()));
            });
        }

        dispatcher.dispatch(&[added("a"), CollectionEvent::Cleared]);

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                ("first", added("a")),
                ("second", added("a")),
                ("first", CollectionEvent::Cleared),
                ("second", CollectionEvent::Cleared),
            ]
        );
    }

    #[test]
    fn test_remove_listener() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(Mutex::new(0));

        let counter = count.clone();
        let id = dispatcher.add_listener(move |_| *counter.lock() += 1);

        dispatcher.emit(added("a"));
        assert!(dispatcher.remove_listener(id));
        assert!(!dispatcher.remove_listener(id));
        dispatcher.emit(added("b"));

        assert_eq!(*count.lock(), 1);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn test_subscription_receives() {
        let dispatcher = EventDispatcher::new();
        let sub = dispatcher.subscribe(16);

        dispatcher.emit(added("x"));

        let event = sub.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(event, added("x"));
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let dispatcher = EventDispatcher::new();
        let _sub = dispatcher.subscribe(2);

        for i in 0..10 {
            dispatcher.emit(added(&i.to_string()));
        }

        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn test_drop_disconnected_subscriber() {
        let dispatcher = EventDispatcher::new();
        let sub = dispatcher.subscribe(8);
        drop(sub);

        dispatcher.emit(CollectionEvent::Cleared);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn test_callback_may_register_listener() {
        let dispatcher = Arc::new(EventDispatcher::new());

        let inner = dispatcher.clone();
        dispatcher.add_listener(move |_| {
            inner.add_listener(|_| {});
        });

        dispatcher.emit(CollectionEvent::Cleared);
        assert_eq!(dispatcher.listener_count(), 2);
    }
}
