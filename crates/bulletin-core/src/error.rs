use thiserror::Error;

/// Application-wide error types for Bulletin.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request to the upstream board failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Upstream response could not be parsed into entries.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An entry with this URL is already stored.
    #[error("Entry already exists: {0}")]
    DuplicateEntry(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// An error annotated with the operation that produced it.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Wrap this error with a description of the failing operation.
    pub fn context(self, context: impl Into<String>) -> Self {
        AppError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all context layers removed.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::ParseError(_)
            | AppError::DatabaseError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("HTTP 5")
                    || msg.contains("HTTP 429")
                    || msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error reports a unique-URL conflict.
    pub fn is_duplicate(&self) -> bool {
        matches!(self.root(), AppError::DuplicateEntry(_))
    }
}
