use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Source not found: {0}")]
    SourceNotFound(i64),

    #[error("Search query must not be empty")]
    EmptyQuery,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Catalog not found: {0}")]
    CatalogNotFound(String),

    #[error("Invalid catalog {pkg}: {reason}")]
    InvalidCatalog { pkg: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl CatalogError {
    /// Transport-level failures a caller may decide to retry.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            CatalogError::Http(_) | CatalogError::Status { .. } | CatalogError::Timeout(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CatalogError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
