//! Rate-limited work queue keyed by object
//!
//! A key is handed to at most one worker at a time. Keys added while being processed are parked
//! and handed out again once the worker calls [`WorkQueue::done`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

use crate::store::ObjectKey;
use crate::utils::Backoff;

/// Work queue options
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Backoff applied to keys whose reconcile failed
    pub backoff: Backoff,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    options: Options,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, options: Options) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark a key as needing a reconcile
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        trace!("{} queue: adding {}", self.name, key);
        state.dirty.insert(key.clone());
        if !state.processing.contains(&key) {
            state.queue.push_back(key);
            self.notify.notify_one();
        }
    }

    /// Add a key once `delay` has passed
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add a key after a backoff that grows with each consecutive failure
    pub fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) {
        let attempt = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            *failures - 1
        };
        let delay = self.options.backoff.delay(attempt);
        self.add_after(key, delay);
    }

    /// Consecutive failures recorded for a key
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failures.get(key).copied().unwrap_or(0)
    }

    /// Reset the backoff of a key
    pub fn forget(&self, key: &ObjectKey) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failures.remove(key);
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing a key, re-queueing it if it was added in the meantime
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
