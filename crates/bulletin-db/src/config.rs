use bulletin_core::AppError;

/// Configuration for the database connection pool and paginated reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Rows returned by one `read_page` call.
    pub page_size: u32,
}

impl DatabaseConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `BULLETIN_PAGE_SIZE` (optional, defaults to 20)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("DATABASE_URL").ok_or_else(|| {
            AppError::ConfigError("DATABASE_URL not set. Required for database operations.".into())
        })?;

        Ok(Self {
            url,
            max_connections: positive(&lookup, "DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(Self::DEFAULT_MAX_CONNECTIONS),
            page_size: positive(&lookup, "BULLETIN_PAGE_SIZE")?.unwrap_or(Self::DEFAULT_PAGE_SIZE),
        })
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<u32>, AppError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let parsed: u32 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!(
            "Invalid {name} '{raw}': must be a positive integer"
        ))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(format!("{name} must be at least 1")));
    }
    Ok(Some(parsed))
}
