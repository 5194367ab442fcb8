//! Per-key work queue and retry backoff.
//!
//! The queue merges triggers from the watch path, the drift poller and manual
//! requests into one stream of keys. A key is pending at most once and is
//! never handed to two workers at the same time: a trigger that arrives while
//! the key is being processed is deferred until the worker calls
//! [`WorkQueue::done`].
//!
//! Capacity bounds the number of distinct pending keys. [`WorkQueue::add`]
//! waits for room; [`WorkQueue::try_add`] fails fast with
//! [`QueueError::Full`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;

use crate::model::ObjectKey;

/// Default number of distinct pending keys.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Outcome of adding a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The key was queued.
    Added,
    /// The key was already pending; the triggers were merged.
    Merged,
    /// The key is being processed; it will be queued again when the
    /// current pass completes.
    Deferred,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is full")]
    Full,
    #[error("work queue is shut down")]
    ShutDown,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    /// Keys waiting to be processed (queued or deferred).
    dirty: HashSet<ObjectKey>,
    /// Keys currently handed out to a worker.
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
}

/// Deduplicating, bounded FIFO of object keys.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    item_added: Notify,
    space_freed: Notify,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            item_added: Notify::new(),
            space_freed: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a key without waiting.
    pub fn try_add(&self, key: ObjectKey) -> Result<Enqueued, QueueError> {
        let mut state = self.lock();
        if state.shutting_down {
            return Err(QueueError::ShutDown);
        }
        if state.dirty.contains(&key) {
            return Ok(Enqueued::Merged);
        }
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return Ok(Enqueued::Deferred);
        }
        if state.queue.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        state.dirty.insert(key.clone());
        state.queue.push_back(key);
        drop(state);
        self.item_added.notify_one();
        Ok(Enqueued::Added)
    }

    /// Add a key, waiting for room if the queue is full.
    pub async fn add(&self, key: ObjectKey) -> Result<Enqueued, QueueError> {
        loop {
            let notified = self.space_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_add(key.clone()) {
                Err(QueueError::Full) => notified.await,
                other => return other,
            }
        }
    }

    /// Take the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller must call [`WorkQueue::done`] when finished with the key.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.item_added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    drop(state);
                    self.space_freed.notify_waiters();
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key as finished. Re-queues it if it was triggered meanwhile.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.item_added.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiter.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.item_added.notify_waiters();
        self.space_freed.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of queued keys (excluding deferred and in-flight keys).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a key is queued or deferred.
    pub fn is_pending(&self, key: &ObjectKey) -> bool {
        self.lock().dirty.contains(key)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Retry delays for failed reconcile passes.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound for transient failures.
    pub max: Duration,
    /// Minimum delay after an adapter contract violation.
    pub contract_violation_floor: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(300),
            contract_violation_floor: Duration::from_secs(30),
        }
    }
}

/// Per-key exponential backoff.
pub struct Backoff {
    config: BackoffConfig,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&self, key: &ObjectKey, contract_violation: bool) -> Duration {
        let attempts = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let count = failures.entry(key.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };

        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        let delay = self.config.base.saturating_mul(factor).min(self.config.max);

        if contract_violation {
            delay.max(self.config.contract_violation_floor)
        } else {
            delay
        }
    }

    /// Reset the failure count after a successful pass.
    pub fn forget(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
