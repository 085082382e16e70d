//! Rate limiters deciding how long a queue key must wait before it runs again.
//!
//! Two independent policies are layered by [`MaxOfLimiter`]:
//!
//! ```text
//! per-key failure backoff   base * 2^failures, clamped to [base, max]
//! global token bucket       shared by all keys, bounds aggregate retries
//!
//! effective delay = max(every limiter's delay)
//! ```
//!
//! Failure counts only ever reset through [`RateLimiter::forget`]; they do not
//! decay with time.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{BackoffConfig, TokenBucketConfig};

/// Acquires a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned mutex");
        poisoned.into_inner()
    })
}

/// Answers "how long until this key may run again".
pub trait RateLimiter<K>: Send + Sync {
    /// Record one more consecutive failure for `key`.
    fn record_failure(&self, key: &K);

    /// Delay before `key` may run again.
    ///
    /// Limiters that meter throughput consume capacity on every call.
    fn next_delay(&self, key: &K) -> Duration;

    /// Reset `key`'s failure count; called after a successful run.
    fn forget(&self, key: &K);

    /// Failures recorded for `key` since the last `forget`.
    fn failures(&self, key: &K) -> u32;
}

impl BackoffConfig {
    /// Delay after `failures` consecutive failures.
    ///
    /// The first failure waits `base`, each further one doubles it, and the
    /// result never leaves `[base, max]`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        if exponent >= 64 {
            return self.max.max(self.base);
        }
        let nanos = self.base.as_nanos().saturating_mul(1u128 << exponent);
        let delay = if nanos >= self.max.as_nanos() {
            self.max
        } else {
            // Below `max`, so it fits in a u64 nanosecond count.
            Duration::from_nanos(nanos as u64)
        };
        delay.max(self.base)
    }
}

// ---------------------------------------------------------------------------
// Per-key exponential failure backoff
// ---------------------------------------------------------------------------

/// Per-key exponential backoff driven by recorded failures.
pub struct ExponentialFailureLimiter<K> {
    config: BackoffConfig,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> ExponentialFailureLimiter<K> {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> RateLimiter<K> for ExponentialFailureLimiter<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn record_failure(&self, key: &K) {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
    }

    fn next_delay(&self, key: &K) -> Duration {
        self.config.delay_for(self.failures(key))
    }

    fn forget(&self, key: &K) {
        lock(&self.failures).remove(key);
    }

    fn failures(&self, key: &K) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Global token bucket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every key.
///
/// Each `next_delay` reserves one token. When the bucket is empty the token
/// is borrowed from the future and the caller is told how long to wait for
/// it, so admissions never exceed `capacity` in a burst or `refill_per_sec`
/// in the long run.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucketLimiter {
    pub fn new(config: TokenBucketConfig) -> Self {
        let capacity = f64::from(config.capacity);
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Reserve one token as of `now` and return the wait until it is usable.
    fn reserve_at(&self, now: Instant) -> Duration {
        let mut bucket = lock(&self.bucket);

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }

        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            let wait_nanos = (-bucket.tokens / self.refill_per_sec * 1e9).round();
            Duration::from_nanos(wait_nanos as u64)
        }
    }
}

impl<K> RateLimiter<K> for TokenBucketLimiter {
    fn record_failure(&self, _key: &K) {}

    fn next_delay(&self, _key: &K) -> Duration {
        self.reserve_at(Instant::now())
    }

    fn forget(&self, _key: &K) {}

    fn failures(&self, _key: &K) -> u32 {
        0
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Delegates to every inner limiter and waits for the slowest one.
pub struct MaxOfLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfLimiter<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }

    /// The standard stack: a fine-grained queue backoff, a coarse failure
    /// backoff tuned for the upstream source, and the global token bucket.
    pub fn layered(
        queue_backoff: BackoffConfig,
        failure_backoff: BackoffConfig,
        bucket: TokenBucketConfig,
    ) -> Self {
        Self::new(vec![
            Box::new(ExponentialFailureLimiter::new(queue_backoff)),
            Box::new(ExponentialFailureLimiter::new(failure_backoff)),
            Box::new(TokenBucketLimiter::new(bucket)),
        ])
    }
}

impl<K> RateLimiter<K> for MaxOfLimiter<K>
where
    K: Send + Sync,
{
    fn record_failure(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.record_failure(key);
        }
    }

    fn next_delay(&self, key: &K) -> Duration {
        // Every limiter is asked so the token bucket always reserves.
        self.limiters
            .iter()
            .map(|limiter| limiter.next_delay(key))
            .fold(Duration::ZERO, Duration::max)
    }

    fn forget(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn failures(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.failures(key))
            .max()
            .unwrap_or(0)
    }
}
