use bulletin_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::entry_repository::EntryRepository;

/// Central database facade. Owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    page_size: u32,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::debug!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self {
            pool,
            page_size: config.page_size,
        })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool, page_size: u32) -> Self {
        Self { pool, page_size }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get an [`EntryRepository`] backed by this pool.
    pub fn entry_repo(&self) -> EntryRepository {
        EntryRepository::new(self.pool.clone(), self.page_size)
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
