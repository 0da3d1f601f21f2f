//! Fan-out log and per-subscriber ring queues

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info, trace};

use crate::error::StreamLogError;
use crate::metrics;

/// Upper bound on the queue storage reserved up front for a new subscriber
const MAX_PREALLOCATED: usize = 1024;

/// Identity of a subscription within its log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of pushing one entry onto one subscriber queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Push {
    Delivered,
    Evicted,
    Closed,
}

struct QueueState<T> {
    entries: VecDeque<T>,
    closed: bool,
}

/// Bounded ring queue shared between the log (writer) and one subscription (reader)
struct Queue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> Queue<T> {
    fn new(capacity: usize, closed: bool) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity.min(MAX_PREALLOCATED)),
                closed,
            }),
            notify: Notify::new(),
        }
    }

    // A panicking reader must not take publishers down with it, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, entry: T) -> Push {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return Push::Closed;
            }
            let outcome = if state.entries.len() >= self.capacity {
                state.entries.pop_front();
                Push::Evicted
            } else {
                Push::Delivered
            };
            state.entries.push_back(entry);
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.entries.pop_front()
    }

    fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.entries.clear();
        }
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

struct Inner<T> {
    name: Arc<str>,
    capacity: usize,
    closed: AtomicBool,
    next_id: AtomicU64,
    subscribers: DashMap<SubscriptionId, Arc<Queue<T>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Named, capacity-bounded broadcast log
///
/// Cloning an `EventLog` is cheap and yields another handle to the same log,
/// so one instance can be owned by the server and injected into every
/// producer and debug handler.
///
/// # Example
///
/// ```
/// use querylogz::streamlog::EventLog;
///
/// let log = EventLog::new("querylogz", 100).unwrap();
/// let mut subscription = log.subscribe();
/// log.publish("hello".to_string());
/// assert_eq!(subscription.try_recv(), Some("hello".to_string()));
/// ```
pub struct EventLog<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventLog<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for EventLog<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.inner.subscribers.len())
            .finish()
    }
}

/// Point-in-time counters of a log, exposed for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub name: String,
    pub capacity: usize,
    pub subscribers: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

impl<T: Clone + Send + 'static> EventLog<T> {
    /// Create a log whose subscribers each queue at most `capacity` entries
    ///
    /// Fails with [`StreamLogError::InvalidCapacity`] when `capacity` is zero.
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self, StreamLogError> {
        let name = name.into();
        if capacity == 0 {
            return Err(StreamLogError::InvalidCapacity { name, capacity });
        }

        metrics::describe_stream_metrics();

        Ok(Self {
            inner: Arc::new(Inner {
                name: Arc::from(name.as_str()),
                capacity,
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                subscribers: DashMap::new(),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Deliver `entry` to every active subscription
    ///
    /// Never blocks: a full subscriber queue evicts its oldest entry. The work
    /// done is proportional to the number of current subscribers only.
    pub fn publish(&self, entry: T) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0u64;
        let mut dropped = 0u64;

        // Each shard stays read-locked while its queues are pushed, so an
        // unsubscribe that has returned can never race a late delivery.
        for subscriber in self.inner.subscribers.iter() {
            match subscriber.value().push(entry.clone()) {
                Push::Delivered => delivered += 1,
                Push::Evicted => {
                    delivered += 1;
                    dropped += 1;
                    trace!(
                        log = %self.inner.name,
                        subscription = %subscriber.key(),
                        "Subscriber queue full, evicted oldest entry"
                    );
                }
                Push::Closed => {}
            }
        }

        self.inner.delivered.fetch_add(delivered, Ordering::Relaxed);
        self.inner.dropped.fetch_add(dropped, Ordering::Relaxed);
        metrics::record_publish(&self.inner.name, delivered, dropped);
    }

    /// Register a new subscription
    ///
    /// The subscription only sees entries published after this call returns.
    /// Subscribing to a closed log yields a subscription that is already closed.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        if self.is_closed() {
            return Subscription {
                id,
                log: self.clone(),
                queue: Arc::new(Queue::new(self.inner.capacity, true)),
            };
        }

        let queue = Arc::new(Queue::new(self.inner.capacity, false));
        self.inner.subscribers.insert(id, Arc::clone(&queue));

        // close() may have drained the set between the check above and the insert
        if self.is_closed() {
            self.unsubscribe(id);
        } else {
            metrics::record_subscribers(&self.inner.name, self.inner.subscribers.len());
            debug!(log = %self.inner.name, subscription = %id, "Subscribed");
        }

        Subscription {
            id,
            log: self.clone(),
            queue,
        }
    }

    /// Deregister a subscription and discard anything still queued for it
    ///
    /// Idempotent. Returns `true` if the subscription was active. A reader
    /// blocked on the subscription is woken and sees the end of the stream.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.inner.subscribers.remove(&id) {
            Some((_, queue)) => {
                queue.close();
                metrics::record_subscribers(&self.inner.name, self.inner.subscribers.len());
                debug!(log = %self.inner.name, subscription = %id, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Terminate every subscription and refuse new ones
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut terminated = 0usize;
        self.inner.subscribers.retain(|_, queue| {
            queue.close();
            terminated += 1;
            false
        });

        metrics::record_subscribers(&self.inner.name, 0);
        info!(
            log = %self.inner.name,
            subscriptions = terminated,
            "Stream log closed"
        );
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            name: self.inner.name.to_string(),
            capacity: self.inner.capacity,
            subscribers: self.inner.subscribers.len(),
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A subscriber's private queue on an [`EventLog`]
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T: Clone + Send + 'static> {
    id: SubscriptionId,
    log: EventLog<T>,
    queue: Arc<Queue<T>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Number of entries currently queued and not yet received
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the next queued entry without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        self.queue.pop()
    }

    /// Wait for the next entry
    ///
    /// Returns `None` once the subscription has been closed, either by
    /// unsubscribe or by the log shutting down.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            // Register interest before checking so a push in between is not missed
            let notified = self.queue.notify.notified();
            {
                let mut state = self.queue.lock();
                if state.closed {
                    return None;
                }
                if let Some(entry) = state.entries.pop_front() {
                    return Some(entry);
                }
            }
            notified.await;
        }
    }

    /// Stop receiving entries; idempotent
    pub fn unsubscribe(&self) {
        self.log.unsubscribe(self.id);
        // Covers subscriptions handed out by an already closed log
        self.queue.close();
    }

    /// A cloneable handle that can cancel this subscription from another task
    pub fn unsubscriber(&self) -> Unsubscriber<T> {
        Unsubscriber {
            id: self.id,
            log: self.log.clone(),
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("log", &self.log.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.log.unsubscribe(self.id);
    }
}

/// Cancellation handle for a [`Subscription`]
pub struct Unsubscriber<T: Clone + Send + 'static> {
    id: SubscriptionId,
    log: EventLog<T>,
    queue: Arc<Queue<T>>,
}

impl<T: Clone + Send + 'static> Clone for Unsubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            log: self.log.clone(),
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T: Clone + Send + 'static> Unsubscriber<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Close the subscription, waking any reader blocked on it
    pub fn unsubscribe(&self) {
        self.log.unsubscribe(self.id);
        self.queue.close();
    }
}
