//! Bounded per-session outbound queue.
//!
//! Two enqueue policies share one FIFO:
//!
//! - **Blocking-preferred** ([`SendQueue::push_blocking`]): the item always
//!   ends up queued. On a full queue every queued non-blocking item is
//!   evicted first; queued blocking items keep their order.
//! - **Best-effort** ([`SendQueue::push_non_blocking`]): on a full queue the
//!   new item is dropped.
//!
//! Neither call waits. The send loop drains with [`SendQueue::drain`] and
//! sleeps in [`SendQueue::wait`], which an enqueue wakes early.
//!
//! # Invariants
//!
//! - A blocking item is never dropped by the queue.
//! - The queue only exceeds its capacity when it is full of blocking items
//!   at the moment another blocking item arrives.

use std::{collections::VecDeque, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct QueuedItem {
    data: Bytes,
    blocking: bool,
}

/// Outcome of a blocking-preferred push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Room was available
    Queued,
    /// Queue was full; this many non-blocking items were evicted to make room
    Evicted(usize),
    /// Queue was full of blocking items; capacity was exceeded by one
    Overflowed,
}

/// Bounded FIFO of outbound queue items.
#[derive(Debug)]
pub struct SendQueue {
    items: Mutex<VecDeque<QueuedItem>>,
    capacity: usize,
    notify: Notify,
}

impl SendQueue {
    /// Empty queue holding up to `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self { items: Mutex::new(VecDeque::with_capacity(capacity)), capacity, notify: Notify::new() }
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Enqueue `data`, evicting non-blocking items if the queue is full.
    pub fn push_blocking(&self, data: Bytes) -> PushOutcome {
        let outcome = {
            let mut items = self.items.lock();
            let outcome = if items.len() < self.capacity {
                PushOutcome::Queued
            } else {
                let before = items.len();
                items.retain(|item| item.blocking);
                let evicted = before - items.len();
                if items.len() < self.capacity { PushOutcome::Evicted(evicted) } else { PushOutcome::Overflowed }
            };
            items.push_back(QueuedItem { data, blocking: true });
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Enqueue `data` if there is room. Returns `false` if it was dropped.
    pub fn push_non_blocking(&self, data: Bytes) -> bool {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return false;
            }
            items.push_back(QueuedItem { data, blocking: false });
        }
        self.notify.notify_one();
        true
    }

    /// Take every queued item in order.
    pub fn drain(&self) -> Vec<Bytes> {
        self.items.lock().drain(..).map(|item| item.data).collect()
    }

    /// Wait until an item is pushed or `timeout` elapses.
    ///
    /// A push that happened since the last wait completes this immediately.
    pub async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    /// Wake a waiting send loop without pushing.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}
