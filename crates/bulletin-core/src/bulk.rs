use crate::models::CrawledPage;
use crate::scheduler::{SchedulerEvent, SchedulerReporter};
use crate::traits::{Crawler, EntryStore};

/// Outcome of a bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkLoadReport {
    /// Page count announced by the first listing page (0 if it could not be fetched).
    pub total_pages: u32,
    pub pages_failed: u32,
    pub created: usize,
    /// Rows rejected by the store because their URL is already stored.
    pub duplicates: usize,
    /// Rows the store failed to insert for any other reason.
    pub failed: usize,
}

/// One-shot load of the whole upstream listing.
///
/// Every row of every page is handed to [`EntryStore::create`] without an
/// existence check. Page and row failures are logged and skipped; nothing
/// aborts the walk.
pub struct BulkLoader<C, S> {
    crawler: C,
    store: S,
}

impl<C, S> BulkLoader<C, S>
where
    C: Crawler,
    S: EntryStore,
{
    pub fn new(crawler: C, store: S) -> Self {
        Self { crawler, store }
    }

    pub async fn run<R: SchedulerReporter + ?Sized>(&self, reporter: &R) -> BulkLoadReport {
        reporter.report(SchedulerEvent::BulkLoadStarted);
        let mut report = BulkLoadReport::default();

        // The first page doubles as the source of the total page count.
        let first = match self.crawler.fetch_page(1).await {
            Ok(page) => page,
            Err(e) => {
                let error = e.to_string();
                report.pages_failed += 1;
                reporter.report(SchedulerEvent::BulkLoadPageFailed {
                    page: 1,
                    error: &error,
                });
                reporter.report(SchedulerEvent::BulkLoadFinished { report: &report });
                return report;
            }
        };
        report.total_pages = first.total_pages.max(1);
        self.store_page(1, first, &mut report).await;

        for page in 2..=report.total_pages {
            match self.crawler.fetch_page(page).await {
                Ok(crawled) => self.store_page(page, crawled, &mut report).await,
                Err(e) => {
                    let error = e.to_string();
                    report.pages_failed += 1;
                    reporter.report(SchedulerEvent::BulkLoadPageFailed {
                        page,
                        error: &error,
                    });
                }
            }
        }

        reporter.report(SchedulerEvent::BulkLoadFinished { report: &report });
        report
    }

    async fn store_page(&self, page: u32, crawled: CrawledPage, report: &mut BulkLoadReport) {
        for entry in &crawled.entries {
            match self.store.create(entry).await {
                Ok(_) => report.created += 1,
                Err(e) if e.is_duplicate() => {
                    tracing::debug!(page, url = %entry.url, "Entry already stored");
                    report.duplicates += 1;
                }
                Err(e) => {
                    tracing::warn!(page, url = %entry.url, error = %e, "Failed to store entry");
                    report.failed += 1;
                }
            }
        }
    }
}
