//! Keyed, deduplicating, rate-limited work queue.
//!
//! # Key lifecycle
//!
//! ```text
//!            add                    get                 done
//! absent ---------> ready ---------------> processing --------> absent
//!   |                 ^                        |
//!   | add_after       | deadline               | add (coalesced: requeued
//!   v                 |                        v  right after done)
//! waiting ------------+                    processing + dirty
//! ```
//!
//! A key is handed to at most one worker at a time, and at most one pending
//! instance of a key is ever held.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::limiter::{RateLimiter, lock};

/// Work queue contract used by the scheduler.
pub trait WorkQueue<K>: Send + Sync {
    /// Queue `key` for immediate processing. No-op if it is already pending.
    fn add(&self, key: K);

    /// Queue `key` once `delay` has elapsed.
    fn add_after(&self, key: K, delay: Duration);

    /// Record a failure for `key` and queue it after the rate limiter's delay.
    ///
    /// Returns the delay that was applied.
    fn add_rate_limited(&self, key: K) -> Duration;

    /// Wait for the next ready key. Returns `None` once the queue is shut down.
    fn get(&self) -> impl Future<Output = Option<K>> + Send;

    /// Mark `key` as no longer being processed.
    fn done(&self, key: &K);

    /// Clear `key`'s failure history.
    fn forget(&self, key: &K);

    /// Stop handing out keys; pending and future `get` calls return `None`.
    fn shut_down(&self);
}

/// A delayed admission. Ordered by deadline, then insertion order.
#[derive(Debug)]
struct Timer<K> {
    ready_at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Timer<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Timer<K> {}

impl<K> PartialOrd for Timer<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Timer<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ready_at, self.seq).cmp(&(other.ready_at, other.seq))
    }
}

#[derive(Debug)]
struct QueueState<K> {
    /// Keys ready to be handed out, in FIFO order.
    ready: VecDeque<K>,
    /// Keys that need processing (queued in `ready`, or re-added while processing).
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Current deadline of each waiting key.
    waiting: HashMap<K, Instant>,
    /// Min-heap of deadlines. Entries superseded in `waiting` are skipped lazily.
    timers: BinaryHeap<Reverse<Timer<K>>>,
    next_seq: u64,
    shutting_down: bool,
}

impl<K: Eq + Hash + Clone> QueueState<K> {
    fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            waiting: HashMap::new(),
            timers: BinaryHeap::new(),
            next_seq: 0,
            shutting_down: false,
        }
    }

    /// Mark `key` as needing processing. Returns true if it became ready.
    fn enqueue(&mut self, key: K) -> bool {
        self.waiting.remove(&key);
        if !self.dirty.insert(key.clone()) {
            return false;
        }
        if self.processing.contains(&key) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    /// Move every waiting key whose deadline has passed into `ready`.
    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse(timer)) = self.timers.peek() {
            if timer.ready_at > now {
                break;
            }
            let Some(Reverse(timer)) = self.timers.pop() else {
                break;
            };
            if self.waiting.get(&timer.key) == Some(&timer.ready_at) {
                self.enqueue(timer.key);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(timer)| timer.ready_at)
    }
}

/// In-memory [`WorkQueue`] whose retry delays come from a [`RateLimiter`].
pub struct RateLimitingQueue<K, R> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    limiter: R,
}

impl<K, R> RateLimitingQueue<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: RateLimiter<K>,
{
    pub fn new(limiter: R) -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            notify: Notify::new(),
            limiter,
        }
    }

    /// Number of keys ready to be handed out right now.
    pub fn len(&self) -> usize {
        lock(&self.state).ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys scheduled for a future admission.
    pub fn waiting_len(&self) -> usize {
        lock(&self.state).waiting.len()
    }

    pub fn is_processing(&self, key: &K) -> bool {
        lock(&self.state).processing.contains(key)
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.state).shutting_down
    }

    /// Failures recorded for `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.limiter.failures(key)
    }
}

impl<K, R> WorkQueue<K> for RateLimitingQueue<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: RateLimiter<K>,
{
    fn add(&self, key: K) {
        let mut state = lock(&self.state);
        if state.shutting_down {
            return;
        }
        if state.enqueue(key) {
            self.notify.notify_waiters();
        }
    }

    fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let mut state = lock(&self.state);
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        let ready_at = Instant::now() + delay;
        if let Some(&existing) = state.waiting.get(&key)
            && existing <= ready_at
        {
            return;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.waiting.insert(key.clone(), ready_at);
        state.timers.push(Reverse(Timer { ready_at, seq, key }));

        // Sleeping workers recompute their wake-up deadline.
        self.notify.notify_waiters();
    }

    fn add_rate_limited(&self, key: K) -> Duration {
        self.limiter.record_failure(&key);
        let delay = self.limiter.next_delay(&key);
        self.add_after(key, delay);
        delay
    }

    async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);

            let deadline = {
                let mut state = lock(&self.state);
                // Register before inspecting state so no wake-up is lost.
                notified.as_mut().enable();

                if state.shutting_down {
                    return None;
                }

                state.promote_due(Instant::now());
                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                state.next_deadline()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn done(&self, key: &K) {
        let mut state = lock(&self.state);
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.ready.push_back(key.clone());
            self.notify.notify_waiters();
        }
    }

    fn forget(&self, key: &K) {
        self.limiter.forget(key);
    }

    fn shut_down(&self) {
        lock(&self.state).shutting_down = true;
        self.notify.notify_waiters();
    }
}
