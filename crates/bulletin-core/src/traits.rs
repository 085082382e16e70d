use std::future::Future;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CrawledPage, Entry, NewEntry};

/// Fetches one page of the upstream announcement listing.
pub trait Crawler: Send + Sync + Clone + 'static {
    /// Fetch listing page `page` (1-based) along with the total page count.
    fn fetch_page(&self, page: u32) -> impl Future<Output = Result<CrawledPage, AppError>> + Send;
}

/// Persists and retrieves announcement entries.
///
/// Implementations must be safe for concurrent use; every sync cycle calls
/// them independently.
pub trait EntryStore: Send + Sync + Clone + 'static {
    /// Whether an entry with this URL is already stored.
    fn exists(&self, url: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Insert a new entry. Returns the generated UUID.
    ///
    /// Fails with [`AppError::DuplicateEntry`] when the URL is already stored.
    fn create(&self, entry: &NewEntry) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    /// Read one page (1-based) of stored entries, newest first.
    fn read_page(&self, page: u32) -> impl Future<Output = Result<Vec<Entry>, AppError>> + Send;
}
