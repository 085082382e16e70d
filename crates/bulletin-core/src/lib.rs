pub mod bulk;
pub mod config;
pub mod error;
pub mod limiter;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use bulk::{BulkLoadReport, BulkLoader};
pub use config::{BackoffConfig, SchedulerConfig, TokenBucketConfig};
pub use error::AppError;
pub use models::{CrawledPage, Entry, NewEntry};
pub use queue::{RateLimitingQueue, WorkQueue};
pub use scheduler::{
    NOTICE_SYNC_KEY, Scheduler, SchedulerEvent, SchedulerReporter, TracingSchedulerReporter,
};
pub use sync::{SyncCycle, SyncReport};
pub use traits::{Crawler, EntryStore};
