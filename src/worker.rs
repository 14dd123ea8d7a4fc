//! Background execution for the `*_async` collection methods.
//!
//! A [`WorkerPool`] owns a few named threads fed from an unbounded job
//! queue. Threads start on the first submitted job. Each job resolves a
//! [`Ticket`], which the caller can block on or `.await` on any executor.
//! Failures nobody is waiting for are routed to the collection's
//! `ExceptionEncountered` event.

use crate::error::{Result, StoreError};
use crate::events::{CollectionEvent, EventDispatcher};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    /// Job queue; `None` before start and after shutdown.
    sender: Option<Sender<Job>>,
    shut_down: bool,
}

/// Lazily started thread pool for one collection.
pub struct WorkerPool {
    name: String,
    threads: usize,
    events: Arc<EventDispatcher>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Create a pool of `threads` workers. No thread starts until the first job.
    pub fn new(name: impl Into<String>, threads: usize, events: Arc<EventDispatcher>) -> Self {
        Self {
            name: name.into(),
            threads: threads.max(1),
            events,
            state: Mutex::new(PoolState {
                sender: None,
                shut_down: false,
            }),
        }
    }

    /// Run `job` on a worker thread.
    ///
    /// A panic inside the job resolves the ticket with `Worker` and raises
    /// `ExceptionEncountered`. An error nobody is waiting for (the ticket was
    /// dropped) also raises `ExceptionEncountered`.
    pub fn spawn<T, F>(&self, job: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (ticket, completer) = Ticket::pending();
        let events = self.events.clone();

        let work: Job = Box::new(move || {
            let (result, panicked) = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => (result, false),
                Err(payload) => (
                    Err(StoreError::Worker(panic_message(payload.as_ref()))),
                    true,
                ),
            };

            let failure = result.as_ref().err().map(|e| e.to_string());
            let delivered = completer.complete(result);

            if let Some(message) = failure {
                if panicked || !delivered {
                    error!(error = %message, "Background collection operation failed");
                    events.emit(CollectionEvent::ExceptionEncountered { error: message });
                }
            }
        });

        match self.submit(work) {
            Ok(()) => ticket,
            Err(e) => Ticket::ready(Err(e)),
        }
    }

    /// Stop accepting jobs. Already queued jobs still run.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if !state.shut_down {
            state.shut_down = true;
            state.sender = None;
            debug!(pool = %self.name, "Worker pool shut down");
        }
    }

    /// Whether worker threads have been started.
    pub fn is_started(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    fn submit(&self, job: Job) -> Result<()> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(StoreError::Closed);
        }

        if state.sender.is_none() {
            state.sender = Some(self.start()?);
        }

        match &state.sender {
            Some(sender) => sender
                .send(job)
                .map_err(|_| StoreError::Worker("Worker threads exited".into())),
            None => Err(StoreError::Closed),
        }
    }

    fn start(&self) -> Result<Sender<Job>> {
        let (sender, receiver) = unbounded::<Job>();

        let mut started = 0;
        for i in 0..self.threads {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.name, i))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                });

            match spawned {
                Ok(_) => started += 1,
                Err(e) if started == 0 => return Err(e.into()),
                Err(e) => {
                    error!(error = %e, pool = %self.name, "Failed to start worker thread");
                    break;
                }
            }
        }

        debug!(pool = %self.name, threads = started, "Worker pool started");
        Ok(sender)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("operation panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("operation panicked: {}", s)
    } else {
        "operation panicked".to_string()
    }
}

// --- Tickets ---

struct Slot<T> {
    value: Option<Result<T>>,
    taken: bool,
    abandoned: bool,
    waker: Option<Waker>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Handle to the result of a background operation.
///
/// Block with [`wait`](Ticket::wait), poll with
/// [`try_take`](Ticket::try_take), or `.await` it.
pub struct Ticket<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Ticket<T> {
    fn pending() -> (Self, Completer<T>) {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                value: None,
                taken: false,
                abandoned: false,
                waker: None,
            }),
            ready: Condvar::new(),
        });

        (
            Ticket {
                shared: shared.clone(),
            },
            Completer {
                shared,
                done: false,
            },
        )
    }

    /// A ticket that is already resolved.
    pub(crate) fn ready(result: Result<T>) -> Self {
        let (ticket, completer) = Self::pending();
        completer.complete(result);
        ticket
    }

    /// Block until the operation finishes.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = take(&mut slot) {
                return result;
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`. Returns `None` if still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = take(&mut slot) {
                return Some(result);
            }
            if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                return take(&mut slot);
            }
        }
    }

    /// Take the result if the operation has finished.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        take(&mut self.shared.slot.lock())
    }

    /// Whether a result is available.
    pub fn is_ready(&self) -> bool {
        let slot = self.shared.slot.lock();
        slot.value.is_some() || slot.taken
    }
}

fn take<T>(slot: &mut Slot<T>) -> Option<Result<T>> {
    if slot.taken {
        return Some(Err(StoreError::Worker("Result already taken".into())));
    }
    let value = slot.value.take()?;
    slot.taken = true;
    Some(value)
}

impl<T> Future for Ticket<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        match take(&mut slot) {
            Some(result) => Poll::Ready(result),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for Ticket<T> {
    fn drop(&mut self) {
        self.shared.slot.lock().abandoned = true;
    }
}

/// Producer side of a ticket. Resolves with `Closed` if dropped unused.
struct Completer<T> {
    shared: Arc<Shared<T>>,
    done: bool,
}

impl<T> Completer<T> {
    /// Deliver the result. Returns false if the ticket was already dropped.
    fn complete(mut self, result: Result<T>) -> bool {
        self.done = true;
        self.resolve(result)
    }

    fn resolve(&self, result: Result<T>) -> bool {
        let waker = {
            let mut slot = self.shared.slot.lock();
            if slot.abandoned {
                return false;
            }
            slot.value = Some(result);
            slot.waker.take()
        };

        self.shared.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if !self.done {
            self.resolve(Err(StoreError::Closed));
        }
    }
}
