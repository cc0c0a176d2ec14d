//! De-duplicating, rate-limited work queue.
//!
//! Semantics:
//! - a key that is already queued is not queued twice
//! - a key that is being processed is marked dirty and queued again once
//!   the worker calls [`WorkQueue::done`], so a key is never processed by
//!   two workers at the same time and no update is lost
//! - [`WorkQueue::add_rate_limited`] re-queues after a per-key exponential
//!   delay that grows with every consecutive failure until
//!   [`WorkQueue::forget`] is called

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tracing::trace;

use crate::backoff::exponential_delay;
use crate::shutdown;

pub const DEFAULT_RATE_LIMIT_BASE: Duration = Duration::from_millis(5);
pub const DEFAULT_RATE_LIMIT_MAX: Duration = Duration::from_secs(1000);

/// Per-key exponential failure rate limiter.
#[derive(Debug)]
pub struct ItemExponentialRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash> ItemExponentialRateLimiter<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn when(&mut self, key: K) -> Duration {
        let failures = self.failures.entry(key).or_insert(0);
        let delay = exponential_delay(self.base, self.max, *failures);
        *failures = failures.saturating_add(1);
        delay
    }

    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

impl<K: Eq + Hash> Default for ItemExponentialRateLimiter<K> {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_BASE, DEFAULT_RATE_LIMIT_MAX)
    }
}

struct QueueState<K> {
    /// Keys waiting for a worker, in FIFO order.
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or re-added while processing).
    dirty: HashSet<K>,
    /// Keys currently held by a worker.
    processing: HashSet<K>,
    shutting_down: bool,
    limiter: ItemExponentialRateLimiter<K>,
}

/// Work queue of keys. Share it behind an `Arc`.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    shutdown_tx: watch::Sender<bool>,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(limiter: ItemExponentialRateLimiter<K>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
                limiter,
            }),
            notify: Notify::new(),
            shutdown_tx,
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(?key, "Key in flight, marked dirty");
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wake-up on so idle workers pick up the rest.
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release `key` after processing. If it was re-added meanwhile it is
    /// queued again.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Add `key` after `delay`. The pending add is dropped on shutdown.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.add(key),
                _ = shutdown::requested(&mut shutdown_rx) => {}
            }
        });
    }

    /// Re-queue `key` after its current back-off delay.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = self.lock().limiter.when(key.clone());
        trace!(?key, ?delay, "Rate limited requeue");
        self.add_after(key, delay);
    }

    /// Reset the back-off of `key`.
    pub fn forget(&self, key: &K) {
        self.lock().limiter.forget(key);
    }

    /// Consecutive rate-limited requeues of `key` since the last `forget`.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().limiter.num_requeues(key)
    }

    /// Number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting keys and wake every waiting `get`. Idempotent.
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        self.shutdown_tx.send_replace(true);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}
