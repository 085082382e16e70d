use crate::error::AppError;
use crate::traits::{Crawler, EntryStore};

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries listed on the upstream first page.
    pub fetched: usize,
    /// Entries that were new and got stored.
    pub created: usize,
    /// Entries already present in the store.
    pub skipped: usize,
}

/// Incremental diff-and-upsert against the first listing page.
///
/// Only page 1 is fetched: between two runs the board is assumed to publish
/// less than a page of new notices. Any crawl or store error aborts the rest
/// of the cycle. Entries stored before the failure stay stored and are
/// skipped by the existence check on the next attempt.
#[derive(Clone)]
pub struct SyncCycle<C, S> {
    crawler: C,
    store: S,
}

impl<C, S> SyncCycle<C, S>
where
    C: Crawler,
    S: EntryStore,
{
    pub fn new(crawler: C, store: S) -> Self {
        Self { crawler, store }
    }

    pub async fn execute(&self) -> Result<SyncReport, AppError> {
        let page = self
            .crawler
            .fetch_page(1)
            .await
            .map_err(|e| e.context("fetch listing page 1"))?;
        tracing::debug!(entries = page.entries.len(), "Fetched listing page 1");

        let mut report = SyncReport {
            fetched: page.entries.len(),
            ..SyncReport::default()
        };

        for entry in &page.entries {
            let exists = self
                .store
                .exists(&entry.url)
                .await
                .map_err(|e| e.context(format!("check existing entry {}", entry.url)))?;
            if exists {
                report.skipped += 1;
                continue;
            }

            let id = self
                .store
                .create(entry)
                .await
                .map_err(|e| e.context(format!("store entry {}", entry.url)))?;
            tracing::info!(%id, url = %entry.url, title = %entry.title, "New entry stored");
            report.created += 1;
        }

        tracing::info!(
            fetched = report.fetched,
            created = report.created,
            skipped = report.skipped,
            "Sync cycle complete"
        );
        Ok(report)
    }
}
