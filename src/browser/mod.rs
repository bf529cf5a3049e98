//! Headless browser rendering for sites that need JavaScript.
//!
//! Sources never talk to the browser directly. [`HttpSource`](crate::source::HttpSource)
//! routes a request here when the source asks for it or when a plain HTTP
//! fetch lands on a challenge page.

pub mod chrome;
pub mod config;

use async_trait::async_trait;

use crate::app::Result;

pub use chrome::ChromeEngine;
pub use config::BrowserConfig;

/// One page render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserRequest {
    pub url: String,
    /// CSS selector that must be present before the page counts as loaded.
    pub wait_for: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Render `request.url` and return the resulting HTML.
    ///
    /// Fails with [`CatalogError::Timeout`](crate::app::CatalogError::Timeout)
    /// once the configured limit elapses.
    async fn fetch(&self, request: BrowserRequest) -> Result<String>;
}
