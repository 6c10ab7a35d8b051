use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Source unavailable: {source_name}: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Invalid search options: {0}")]
    InvalidOptions(String),

    #[error("Index already exists: {0}")]
    IndexExists(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Bulk indexing failed for {failed} of {total} documents")]
    BulkIndex { failed: usize, total: usize },

    #[error("Bulk indexing did not complete within {0:?}")]
    BulkTimeout(Duration),

    #[error("Alias swap failed for '{alias}': {reason}")]
    AliasSwap { alias: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn source_unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Error::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error belongs to the caller's request rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidOptions(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
