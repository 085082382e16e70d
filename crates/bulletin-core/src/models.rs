use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A stored announcement.
///
/// `url` is the natural key: at most one entry exists per URL and it is
/// never changed after creation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    /// Publication date as printed by the upstream board (e.g. "2024-03-01").
    pub published_at: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An announcement as scraped from the upstream board, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NewEntry {
    pub title: String,
    pub url: String,
    pub published_at: String,
}

impl NewEntry {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        published_at: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            published_at: published_at.into(),
        }
    }
}

/// One page of the upstream listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawledPage {
    pub entries: Vec<NewEntry>,
    /// Total number of listing pages reported by the upstream board.
    pub total_pages: u32,
}

impl CrawledPage {
    pub fn new(entries: Vec<NewEntry>, total_pages: u32) -> Self {
        Self {
            entries,
            total_pages,
        }
    }
}
