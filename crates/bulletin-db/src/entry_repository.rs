use bulletin_core::error::AppError;
use bulletin_core::models::{Entry, NewEntry};
use bulletin_core::traits::EntryStore;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL-backed [`EntryStore`].
///
/// URL uniqueness is enforced by the `uq_entries_url` constraint, so racing
/// inserts of the same URL leave exactly one row.
#[derive(Clone)]
pub struct EntryRepository {
    pool: PgPool,
    page_size: u32,
}

impl EntryRepository {
    pub fn new(pool: PgPool, page_size: u32) -> Self {
        Self {
            pool,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub async fn exists(&self, url: &str) -> Result<bool, AppError> {
        let row: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM entries WHERE url = $1)")
            .bind(url)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }

    /// Insert a new entry. Returns the generated UUID.
    pub async fn create(&self, entry: &NewEntry) -> Result<Uuid, AppError> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO entries (title, url, published_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&entry.title)
        .bind(&entry.url)
        .bind(&entry.published_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::DuplicateEntry(entry.url.clone())
            }
            _ => AppError::DatabaseError(e.to_string()),
        })?;

        Ok(row.0)
    }

    /// Read one page of entries, newest first. Page numbers are 1-based; 0 reads page 1.
    pub async fn read_page(&self, page: u32) -> Result<Vec<Entry>, AppError> {
        let limit = i64::from(self.page_size);
        let offset = i64::from(page.max(1) - 1) * limit;

        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, title, url, published_at, created_at, updated_at
            FROM entries
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Total number of stored entries.
    pub async fn count(&self) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    title: String,
    url: String,
    published_at: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: row.id,
            title: row.title,
            url: row.url,
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// -- Trait implementation --

impl EntryStore for EntryRepository {
    async fn exists(&self, url: &str) -> Result<bool, AppError> {
        EntryRepository::exists(self, url).await
    }

    async fn create(&self, entry: &NewEntry) -> Result<Uuid, AppError> {
        EntryRepository::create(self, entry).await
    }

    async fn read_page(&self, page: u32) -> Result<Vec<Entry>, AppError> {
        EntryRepository::read_page(self, page).await
    }
}
