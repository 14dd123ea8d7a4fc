//! Event types raised by collections.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Notification raised after a mutation is durable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionEvent {
    /// A record entered the collection.
    Added { key: String },

    /// A record left the collection.
    Removed { key: String },

    /// A record's value was replaced in place.
    Updated { key: String },

    /// Every record was removed at once.
    Cleared,

    /// A record was enqueued (queues only, after `Added`).
    Enqueued { key: String },

    /// A record was dequeued (queues only, after `Removed`).
    Dequeued { key: String },

    /// Background work failed and nobody was waiting for the result.
    ExceptionEncountered { error: String },
}

impl CollectionEvent {
    /// Key the event refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            CollectionEvent::Added { key }
            | CollectionEvent::Removed { key }
            | CollectionEvent::Updated { key }
            | CollectionEvent::Enqueued { key }
            | CollectionEvent::Dequeued { key } => Some(key),
            CollectionEvent::Cleared | CollectionEvent::ExceptionEncountered { .. } => None,
        }
    }
}

/// Identifier of a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receiving end of a channel subscription.
///
/// The dispatcher drops the subscription once its buffer is full or this
/// handle is dropped.
pub struct Subscription {
    pub id: ListenerId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<CollectionEvent>,
}

impl Subscription {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<CollectionEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<CollectionEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<CollectionEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain every event currently buffered.
    pub fn drain(&self) -> Vec<CollectionEvent> {
        self.receiver.try_iter().collect()
    }
}
