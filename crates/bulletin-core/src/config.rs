use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Bounds of an exponential backoff profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffConfig {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Fine-grained profile applied by the queue itself.
    pub fn queue_default() -> Self {
        Self::new(Duration::from_millis(2), Duration::from_millis(1000))
    }

    /// Coarse profile tuned for the upstream notice board: 1 minute up to 30 minutes.
    pub fn failure_default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(30 * 60))
    }
}

/// Global token bucket shared by every queue key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketConfig {
    /// Maximum burst of admissions.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl TokenBucketConfig {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self::new(100, 10.0)
    }
}

/// Configuration for the sync scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Number of concurrent workers draining the queue.
    pub workers: usize,
    /// Delay before a successfully synced key runs again.
    pub resync_interval: Duration,
    pub queue_backoff: BackoffConfig,
    pub failure_backoff: BackoffConfig,
    pub token_bucket: TokenBucketConfig,
    /// Run the bulk loader before the workers start.
    pub bulk_load_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_interval: Duration::from_secs(8 * 60 * 60),
            queue_backoff: BackoffConfig::queue_default(),
            failure_backoff: BackoffConfig::failure_default(),
            token_bucket: TokenBucketConfig::default(),
            bulk_load_on_start: true,
        }
    }
}

impl SchedulerConfig {
    /// Read configuration from environment variables, falling back to defaults.
    ///
    /// - `BULLETIN_WORKERS`
    /// - `BULLETIN_RESYNC_INTERVAL_SECS`
    /// - `BULLETIN_QUEUE_BACKOFF_BASE_MS` / `BULLETIN_QUEUE_BACKOFF_MAX_MS`
    /// - `BULLETIN_FAILURE_BACKOFF_BASE_SECS` / `BULLETIN_FAILURE_BACKOFF_MAX_SECS`
    /// - `BULLETIN_BUCKET_CAPACITY` / `BULLETIN_BUCKET_REFILL_PER_SEC`
    /// - `BULLETIN_BULK_LOAD_ON_START`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let config = Self {
            workers: parse_var(&lookup, "BULLETIN_WORKERS")?.unwrap_or(defaults.workers),
            resync_interval: parse_var(&lookup, "BULLETIN_RESYNC_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.resync_interval),
            queue_backoff: BackoffConfig {
                base: parse_var(&lookup, "BULLETIN_QUEUE_BACKOFF_BASE_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.queue_backoff.base),
                max: parse_var(&lookup, "BULLETIN_QUEUE_BACKOFF_MAX_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.queue_backoff.max),
            },
            failure_backoff: BackoffConfig {
                base: parse_var(&lookup, "BULLETIN_FAILURE_BACKOFF_BASE_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.failure_backoff.base),
                max: parse_var(&lookup, "BULLETIN_FAILURE_BACKOFF_MAX_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.failure_backoff.max),
            },
            token_bucket: TokenBucketConfig {
                capacity: parse_var(&lookup, "BULLETIN_BUCKET_CAPACITY")?
                    .unwrap_or(defaults.token_bucket.capacity),
                refill_per_sec: parse_var(&lookup, "BULLETIN_BUCKET_REFILL_PER_SEC")?
                    .unwrap_or(defaults.token_bucket.refill_per_sec),
            },
            bulk_load_on_start: parse_var(&lookup, "BULLETIN_BULK_LOAD_ON_START")?
                .unwrap_or(defaults.bulk_load_on_start),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn with_queue_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.queue_backoff = backoff;
        self
    }

    pub fn with_failure_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.failure_backoff = backoff;
        self
    }

    pub fn with_token_bucket(mut self, bucket: TokenBucketConfig) -> Self {
        self.token_bucket = bucket;
        self
    }

    pub fn with_bulk_load_on_start(mut self, enabled: bool) -> Self {
        self.bulk_load_on_start = enabled;
        self
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.workers == 0 {
            return Err(AppError::ConfigError(
                "BULLETIN_WORKERS must be at least 1".into(),
            ));
        }
        if self.token_bucket.capacity == 0 {
            return Err(AppError::ConfigError(
                "Token bucket capacity must be at least 1".into(),
            ));
        }
        if !(self.token_bucket.refill_per_sec > 0.0 && self.token_bucket.refill_per_sec.is_finite())
        {
            return Err(AppError::ConfigError(format!(
                "Token bucket refill rate must be a positive number, got {}",
                self.token_bucket.refill_per_sec
            )));
        }
        for (name, backoff) in [
            ("queue", &self.queue_backoff),
            ("failure", &self.failure_backoff),
        ] {
            if backoff.base > backoff.max {
                return Err(AppError::ConfigError(format!(
                    "{name} backoff base {:?} exceeds max {:?}",
                    backoff.base, backoff.max
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, AppError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AppError::ConfigError(format!("Invalid {name} '{raw}'"))
        }),
    }
}
