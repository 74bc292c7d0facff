// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Distribution hub.
//
// Every subscriber gets a bounded queue and its own delivery task.
// `broadcast` only ever `try_send`s; a subscriber whose queue is full is
// evicted on the spot instead of slowing the producer or its peers.
//
// Lifecycle of a registry entry:
//
//   subscribe ──▶ Active ──(full queue | unsubscribe | write error)──▶ Closing
//                                                                     │
//                          delivery task closes the sink, then ◀──────┘
//                          removes the entry

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use weighbridge_core::types::{SubscriberId, SubscriberState};

use crate::sink::MessageSink;

/// Outbound queue depth per subscriber.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Upper bound on how long closing an evicted connection may take.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

struct Entry {
    /// `None` once the queue has been closed.
    queue: Option<mpsc::Sender<Arc<str>>>,
    state: SubscriberState,
    /// Wakes the delivery task out of a blocked write.
    evict: Arc<Notify>,
    peer: String,
}

struct HubInner {
    registry: Mutex<HashMap<SubscriberId, Entry>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl HubInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriberId, Entry>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip an entry to `Closing`, close its queue and wake its task.
    /// Returns `false` if the entry was already closing or is gone.
    fn begin_close(&self, id: SubscriberId) -> bool {
        let mut registry = self.registry();
        let Some(entry) = registry.get_mut(&id) else {
            return false;
        };
        if entry.state == SubscriberState::Closing {
            return false;
        }
        entry.state = SubscriberState::Closing;
        entry.queue = None;
        entry.evict.notify_one();
        true
    }

    fn release(&self, id: SubscriberId) {
        self.registry().remove(&id);
    }
}

/// Registry of live subscribers.  Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a subscriber and spawn its delivery task.
    pub fn subscribe<S: MessageSink>(&self, sink: S) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let evict = Arc::new(Notify::new());
        let peer = sink.describe();

        self.inner.registry().insert(
            id,
            Entry {
                queue: Some(tx),
                state: SubscriberState::Active,
                evict: Arc::clone(&evict),
                peer: peer.clone(),
            },
        );
        info!(subscriber = %id, peer = %peer, "subscriber registered");

        tokio::spawn(deliver(Arc::clone(&self.inner), id, sink, rx, evict));
        id
    }

    /// Remove a subscriber, closing its queue and connection.  Unknown ids
    /// are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.inner.begin_close(id) {
            debug!(subscriber = %id, "subscriber unsubscribed");
        }
    }

    /// Enqueue `message` for every active subscriber without waiting.
    ///
    /// Subscribers whose queue is full (or whose task has gone) are evicted.
    /// Returns the number of subscribers the message was queued for.
    pub fn broadcast(&self, message: &str) -> usize {
        let message: Arc<str> = Arc::from(message);
        let mut queued = 0;
        let mut registry = self.inner.registry();

        for (id, entry) in registry.iter_mut() {
            if entry.state != SubscriberState::Active {
                continue;
            }
            let Some(queue) = entry.queue.as_ref() else {
                continue;
            };
            let reason = match queue.try_send(Arc::clone(&message)) {
                Ok(()) => {
                    queued += 1;
                    continue;
                }
                Err(TrySendError::Full(_)) => "outbound queue full",
                Err(TrySendError::Closed(_)) => "delivery task gone",
            };
            warn!(subscriber = %id, peer = %entry.peer, reason, "evicting subscriber");
            entry.state = SubscriberState::Closing;
            entry.queue = None;
            entry.evict.notify_one();
        }
        queued
    }

    /// Active subscribers at this instant.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .registry()
            .values()
            .filter(|entry| entry.state == SubscriberState::Active)
            .count()
    }

    /// State of one subscriber, `None` once it has been fully released.
    pub fn subscriber_state(&self, id: SubscriberId) -> Option<SubscriberState> {
        self.inner.registry().get(&id).map(|entry| entry.state)
    }
}

/// Drain one subscriber's queue into its sink, in order.
async fn deliver<S: MessageSink>(
    hub: Arc<HubInner>,
    id: SubscriberId,
    mut sink: S,
    mut queue: mpsc::Receiver<Arc<str>>,
    evict: Arc<Notify>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = evict.notified() => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let sent = tokio::select! {
            biased;
            _ = evict.notified() => break,
            sent = sink.send_text(&message) => sent,
        };
        if let Err(e) = sent {
            warn!(subscriber = %id, error = %e, "subscriber write failed");
            hub.begin_close(id);
            break;
        }
    }

    queue.close();
    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        debug!(subscriber = %id, "subscriber close timed out");
    }
    hub.release(id);
    info!(subscriber = %id, "subscriber released");
}
