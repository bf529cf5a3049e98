use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{Mutex, OnceCell};

use crate::app::{CatalogError, Result};
use crate::browser::{BrowserConfig, BrowserEngine, BrowserRequest};

/// Clears the in-progress flag when a render ends, however it ends.
struct InProgress<'a>(&'a AtomicBool);

impl<'a> InProgress<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Chrome-backed [`BrowserEngine`] using chromiumoxide.
///
/// The browser is launched on first use. Renders on one engine are
/// serialised, so per-request state never leaks between callers.
pub struct ChromeEngine {
    config: BrowserConfig,
    browser: OnceCell<Browser>,
    render_lock: Mutex<()>,
    in_progress: Arc<AtomicBool>,
}

impl ChromeEngine {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            browser: OnceCell::new(),
            render_lock: Mutex::new(()),
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    async fn browser(&self) -> Result<&Browser> {
        self.browser.get_or_try_init(|| launch(&self.config)).await
    }

    async fn render(&self, browser: &Browser, request: &BrowserRequest) -> Result<String> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| CatalogError::Browser(format!("Failed to create page: {}", e)))?;

        let result = self.render_page(&page, request).await;

        if let Err(e) = page.close().await {
            tracing::debug!(url = %request.url, error = %e, "Failed to close page");
        }
        result
    }

    async fn render_page(&self, page: &Page, request: &BrowserRequest) -> Result<String> {
        let user_agent = request.user_agent.as_ref().or(self.config.user_agent.as_ref());
        if let Some(ua) = user_agent {
            page.set_user_agent(ua.as_str())
                .await
                .map_err(|e| CatalogError::Browser(format!("Failed to set user agent: {}", e)))?;
        }

        page.goto(request.url.as_str())
            .await
            .map_err(|e| CatalogError::Browser(format!("Navigation failed: {}", e)))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| CatalogError::Browser(format!("Navigation failed: {}", e)))?;

        if let Some(selector) = &request.wait_for {
            while page.find_element(selector.as_str()).await.is_err() {
                tokio::time::sleep(self.config.poll_interval()).await;
            }
        }

        tokio::time::sleep(self.config.wait_after_load()).await;

        page.content()
            .await
            .map_err(|e| CatalogError::Browser(format!("Failed to read page content: {}", e)))
    }
}

async fn launch(config: &BrowserConfig) -> Result<Browser> {
    let mut builder = ChromeConfig::builder()
        .arg("--no-sandbox")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage");

    if !config.headless {
        builder = builder.with_head();
    }
    if let Some(executable) = &config.executable {
        builder = builder.chrome_executable(executable);
    }

    let chrome_config = builder
        .build()
        .map_err(|e| CatalogError::Browser(format!("Failed to build browser config: {}", e)))?;

    let (browser, mut handler) = Browser::launch(chrome_config).await.map_err(|e| {
        CatalogError::Browser(format!(
            "Failed to launch browser: {}. Is Chrome or Chromium installed and in PATH?",
            e
        ))
    })?;

    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::trace!(error = %e, "Browser handler event error");
            }
        }
    });

    tracing::info!(headless = config.headless, "Browser launched");
    Ok(browser)
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    async fn fetch(&self, request: BrowserRequest) -> Result<String> {
        let _serial = self.render_lock.lock().await;
        let _busy = InProgress::start(&self.in_progress);

        let browser = self.browser().await?;
        let limit = self.config.timeout();

        match tokio::time::timeout(limit, self.render(browser, &request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(url = %request.url, ?limit, "Browser render timed out");
                Err(CatalogError::Timeout(limit))
            }
        }
    }
}
