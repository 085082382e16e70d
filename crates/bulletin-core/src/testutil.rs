//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CrawledPage, Entry, NewEntry};
use crate::scheduler::{SchedulerEvent, SchedulerReporter};
use crate::traits::{Crawler, EntryStore};

// ---------------------------------------------------------------------------
// MockCrawler
// ---------------------------------------------------------------------------

/// Mock crawler serving a configurable listing.
#[derive(Clone, Default)]
pub struct MockCrawler {
    pages: Arc<Mutex<HashMap<u32, CrawledPage>>>,
    /// Scripted failures per page; each call pops the first one.
    errors: Arc<Mutex<HashMap<u32, VecDeque<AppError>>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    pub calls: Arc<Mutex<Vec<u32>>>,
}

impl MockCrawler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-page listing with the given URLs.
    pub fn with_urls(urls: &[&str]) -> Self {
        let crawler = Self::new();
        crawler.set_page(1, make_entries(urls), 1);
        crawler
    }

    /// Replace the content of listing page `page`.
    pub fn set_page(&self, page: u32, entries: Vec<NewEntry>, total_pages: u32) {
        self.pages
            .lock()
            .unwrap()
            .insert(page, CrawledPage::new(entries, total_pages));
    }

    /// Make the next fetch of `page` fail with `error`.
    pub fn fail_next(&self, page: u32, error: AppError) {
        self.errors
            .lock()
            .unwrap()
            .entry(page)
            .or_default()
            .push_back(error);
    }

    /// Make every fetch sleep before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Crawler for MockCrawler {
    async fn fetch_page(&self, page: u32) -> Result<CrawledPage, AppError> {
        self.calls.lock().unwrap().push(page);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .errors
            .lock()
            .unwrap()
            .get_mut(&page)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        self.pages
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .ok_or_else(|| AppError::HttpError(format!("HTTP 404 for page {page}")))
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory entry store enforcing URL uniqueness.
#[derive(Clone)]
pub struct MockStore {
    pub entries: Arc<Mutex<Vec<Entry>>>,
    page_size: usize,
    create_calls: Arc<Mutex<usize>>,
    /// Failures keyed by the 1-based index of the `create` call.
    create_errors: Arc<Mutex<HashMap<usize, AppError>>>,
    exists_errors: Arc<Mutex<VecDeque<AppError>>>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            page_size: 20,
            create_calls: Arc::new(Mutex::new(0)),
            create_errors: Arc::new(Mutex::new(HashMap::new())),
            exists_errors: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Store already holding entries for `urls`.
    pub fn with_urls(urls: &[&str]) -> Self {
        let store = Self::empty();
        {
            let mut entries = store.entries.lock().unwrap();
            for new_entry in make_entries(urls) {
                entries.push(stored(&new_entry));
            }
        }
        store
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Make the `call`-th `create` (1-based, counted over the store's lifetime) fail.
    pub fn fail_create_on_call(&self, call: usize, error: AppError) {
        self.create_errors.lock().unwrap().insert(call, error);
    }

    /// Make the next `exists` check fail.
    pub fn fail_next_exists(&self, error: AppError) {
        self.exists_errors.lock().unwrap().push_back(error);
    }

    pub fn urls(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.url.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create_calls(&self) -> usize {
        *self.create_calls.lock().unwrap()
    }
}

impl EntryStore for MockStore {
    async fn exists(&self, url: &str) -> Result<bool, AppError> {
        if let Some(error) = self.exists_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.entries.lock().unwrap().iter().any(|e| e.url == url))
    }

    async fn create(&self, entry: &NewEntry) -> Result<Uuid, AppError> {
        let call = {
            let mut calls = self.create_calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if let Some(error) = self.create_errors.lock().unwrap().remove(&call) {
            return Err(error);
        }

        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.url == entry.url) {
            return Err(AppError::DuplicateEntry(entry.url.clone()));
        }
        let stored = stored(entry);
        let id = stored.id;
        entries.push(stored);
        Ok(id)
    }

    async fn read_page(&self, page: u32) -> Result<Vec<Entry>, AppError> {
        let offset = (page.max(1) as usize - 1) * self.page_size;
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .rev()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock scheduler reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
    /// `retryable` flag of each `CycleFailed`, in order.
    pub retryable: Arc<Mutex<Vec<bool>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl SchedulerReporter for MockReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        let label = match &event {
            SchedulerEvent::BulkLoadStarted => "BulkLoadStarted",
            SchedulerEvent::BulkLoadPageFailed { .. } => "BulkLoadPageFailed",
            SchedulerEvent::BulkLoadFinished { .. } => "BulkLoadFinished",
            SchedulerEvent::WorkerStarted { .. } => "WorkerStarted",
            SchedulerEvent::CycleStarted { .. } => "CycleStarted",
            SchedulerEvent::CycleSucceeded { .. } => "CycleSucceeded",
            SchedulerEvent::CycleFailed { retryable, .. } => {
                self.retryable.lock().unwrap().push(*retryable);
                "CycleFailed"
            }
            SchedulerEvent::CycleAborted { .. } => "CycleAborted",
            SchedulerEvent::WorkerStopped { .. } => "WorkerStopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Build crawled entries for the given URLs.
pub fn make_entries(urls: &[&str]) -> Vec<NewEntry> {
    urls.iter()
        .map(|url| NewEntry::new(format!("Notice {url}"), *url, "2024-03-01"))
        .collect()
}

fn stored(entry: &NewEntry) -> Entry {
    let now = Utc::now();
    Entry {
        id: Uuid::new_v4(),
        title: entry.title.clone(),
        url: entry.url.clone(),
        published_at: entry.published_at.clone(),
        created_at: now,
        updated_at: now,
    }
}
