//! Process-lifetime sync loop.
//!
//! The scheduler runs the bulk loader once, seeds the queue with
//! [`NOTICE_SYNC_KEY`] and starts a fixed pool of workers. Each worker
//! dequeues the key, runs a [`SyncCycle`] and puts the key back: after
//! `resync_interval` on success, through the rate limiter on failure. The
//! loop is self-perpetuating until the cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bulk::{BulkLoadReport, BulkLoader};
use crate::config::SchedulerConfig;
use crate::error::AppError;
use crate::limiter::MaxOfLimiter;
use crate::queue::{RateLimitingQueue, WorkQueue};
use crate::sync::{SyncCycle, SyncReport};
use crate::traits::{Crawler, EntryStore};

/// The single key driving the notice sync.
pub const NOTICE_SYNC_KEY: &str = "notice-sync";

/// Queue type owned by the scheduler.
pub type SyncQueue = RateLimitingQueue<String, MaxOfLimiter<String>>;

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    BulkLoadStarted,
    BulkLoadPageFailed {
        page: u32,
        error: &'a str,
    },
    BulkLoadFinished {
        report: &'a BulkLoadReport,
    },
    WorkerStarted {
        worker_id: usize,
    },
    CycleStarted {
        worker_id: usize,
        key: &'a str,
    },
    CycleSucceeded {
        worker_id: usize,
        key: &'a str,
        report: &'a SyncReport,
        next_run_in: Duration,
    },
    CycleFailed {
        worker_id: usize,
        key: &'a str,
        error: &'a str,
        /// Whether the error looks transient. The key is requeued either way.
        retryable: bool,
        failures: u32,
        retry_in: Duration,
    },
    /// The cycle was dropped mid-flight because of shutdown.
    CycleAborted {
        worker_id: usize,
        key: &'a str,
    },
    WorkerStopped {
        worker_id: usize,
    },
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::BulkLoadStarted => {
                tracing::info!("Bulk load started");
            }
            SchedulerEvent::BulkLoadPageFailed { page, error } => {
                tracing::warn!(%page, %error, "Bulk load page failed, continuing");
            }
            SchedulerEvent::BulkLoadFinished { report } => {
                tracing::info!(
                    total_pages = report.total_pages,
                    pages_failed = report.pages_failed,
                    created = report.created,
                    duplicates = report.duplicates,
                    failed = report.failed,
                    "Bulk load finished"
                );
            }
            SchedulerEvent::WorkerStarted { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            SchedulerEvent::CycleStarted { worker_id, key } => {
                tracing::debug!(%worker_id, %key, "Sync cycle started");
            }
            SchedulerEvent::CycleSucceeded {
                worker_id,
                key,
                report,
                next_run_in,
            } => {
                tracing::info!(
                    %worker_id,
                    %key,
                    created = report.created,
                    skipped = report.skipped,
                    next_run_in_secs = next_run_in.as_secs(),
                    "Sync cycle succeeded"
                );
            }
            SchedulerEvent::CycleFailed {
                worker_id,
                key,
                error,
                retryable,
                failures,
                retry_in,
            } => {
                tracing::warn!(
                    %worker_id,
                    %key,
                    %error,
                    retryable,
                    %failures,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Sync cycle failed"
                );
            }
            SchedulerEvent::CycleAborted { worker_id, key } => {
                tracing::info!(%worker_id, %key, "Sync cycle aborted by shutdown");
            }
            SchedulerEvent::WorkerStopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Owns the work queue and the worker pool.
pub struct Scheduler<C, S> {
    cycle: SyncCycle<C, S>,
    bulk: BulkLoader<C, S>,
    queue: Arc<SyncQueue>,
    config: SchedulerConfig,
}

impl<C, S> Scheduler<C, S>
where
    C: Crawler,
    S: EntryStore,
{
    pub fn new(crawler: C, store: S, config: SchedulerConfig) -> Self {
        let limiter = MaxOfLimiter::layered(
            config.queue_backoff,
            config.failure_backoff,
            config.token_bucket,
        );
        Self {
            cycle: SyncCycle::new(crawler.clone(), store.clone()),
            bulk: BulkLoader::new(crawler, store),
            queue: Arc::new(RateLimitingQueue::new(limiter)),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Queue `key` for an immediate run. Coalesces with a pending run of the
    /// same key, and is deferred until a running cycle of it completes.
    pub fn trigger(&self, key: impl Into<String>) {
        self.queue.add(key.into());
    }

    /// Run until `cancel` fires.
    ///
    /// Cancellation shuts the queue down, drops any cycle still in flight
    /// and waits for every worker to exit.
    pub async fn run<R>(&self, cancel: CancellationToken, reporter: Arc<R>) -> Result<(), AppError>
    where
        R: SchedulerReporter + 'static,
    {
        self.config.validate()?;

        if self.config.bulk_load_on_start {
            tokio::select! {
                _ = self.bulk.run(reporter.as_ref()) => {}
                () = cancel.cancelled() => {
                    tracing::info!("Shutdown requested during bulk load");
                    self.queue.shut_down();
                    return Ok(());
                }
            }
        }

        self.queue.add(NOTICE_SYNC_KEY.to_string());

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.workers {
            let worker = Worker {
                id: worker_id,
                queue: Arc::clone(&self.queue),
                cycle: self.cycle.clone(),
                resync_interval: self.config.resync_interval,
                reporter: Arc::clone(&reporter),
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }

        cancel.cancelled().await;
        self.queue.shut_down();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        Ok(())
    }
}

struct Worker<C, S, R> {
    id: usize,
    queue: Arc<SyncQueue>,
    cycle: SyncCycle<C, S>,
    resync_interval: Duration,
    reporter: Arc<R>,
    cancel: CancellationToken,
}

impl<C, S, R> Worker<C, S, R>
where
    C: Crawler,
    S: EntryStore,
    R: SchedulerReporter,
{
    async fn run(self) {
        self.reporter
            .report(SchedulerEvent::WorkerStarted { worker_id: self.id });

        loop {
            let key = tokio::select! {
                key = self.queue.get() => match key {
                    Some(key) => key,
                    None => break,
                },
                () = self.cancel.cancelled() => break,
            };

            self.process(&key).await;
            self.queue.done(&key);
        }

        self.reporter
            .report(SchedulerEvent::WorkerStopped { worker_id: self.id });
    }

    async fn process(&self, key: &String) {
        self.reporter.report(SchedulerEvent::CycleStarted {
            worker_id: self.id,
            key,
        });

        let outcome = tokio::select! {
            result = self.cycle.execute() => Some(result),
            () = self.cancel.cancelled() => None,
        };

        match outcome {
            Some(Ok(report)) => {
                self.queue.forget(key);
                self.queue.add_after(key.clone(), self.resync_interval);
                self.reporter.report(SchedulerEvent::CycleSucceeded {
                    worker_id: self.id,
                    key,
                    report: &report,
                    next_run_in: self.resync_interval,
                });
            }
            Some(Err(e)) => {
                let retry_in = self.queue.add_rate_limited(key.clone());
                let error = e.to_string();
                self.reporter.report(SchedulerEvent::CycleFailed {
                    worker_id: self.id,
                    key,
                    error: &error,
                    retryable: e.is_retryable(),
                    failures: self.queue.num_requeues(key),
                    retry_in,
                });
            }
            None => {
                self.reporter.report(SchedulerEvent::CycleAborted {
                    worker_id: self.id,
                    key,
                });
            }
        }
    }
}
