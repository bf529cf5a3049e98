use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::app::{CatalogError, Result};
use crate::browser::{BrowserEngine, BrowserRequest};
use crate::config::HttpConfig;
use crate::source::{DEFAULT_USER_AGENT, Dependencies};

const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "challenge-platform",
    "cf_chl_opt",
    "<title>Just a moment...</title>",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    pub fn headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend(headers.iter().cloned());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the body looks like an anti-bot interstitial.
    pub fn is_challenge(&self) -> bool {
        matches!(self.status, 403 | 429 | 503) && CHALLENGE_MARKERS.iter().any(|m| self.body.contains(m))
    }
}

/// Minimal HTTP surface sources need. Non-2xx statuses are returned, not raised.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let user_agent = if config.user_agent.trim().is_empty() {
            DEFAULT_USER_AGENT
        } else {
            config.user_agent.as_str()
        };

        let client = Client::builder()
            .timeout(config.timeout())
            .gzip(true)
            .brotli(true)
            .cookie_store(config.cookies)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await?;

        tracing::debug!(url = %url, status, bytes = body.len(), "HTTP response");
        Ok(HttpResponse { status, url, body })
    }
}

/// How a page should be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMode {
    Http,
    /// Render in the browser engine, waiting for `wait_for` to appear.
    Browser { wait_for: Option<String> },
}

/// Shared plumbing for sources that scrape one site.
pub struct HttpSource {
    base_url: String,
    user_agent: String,
    extra_headers: BTreeMap<String, String>,
    headers: OnceLock<Vec<(String, String)>>,
    http: Arc<dyn HttpClient>,
    browser: Option<Arc<dyn BrowserEngine>>,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, deps: &Dependencies) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            user_agent: deps.user_agent.clone(),
            extra_headers: BTreeMap::new(),
            headers: OnceLock::new(),
            http: deps.http.clone(),
            browser: deps.browser.clone(),
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.extra_headers = headers;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    /// Request headers, built on first use.
    pub fn headers(&self) -> &[(String, String)] {
        self.headers.get_or_init(|| {
            let mut headers = vec![
                ("User-Agent".to_string(), self.user_agent.clone()),
                ("Cache-Control".to_string(), "max-age=0".to_string()),
            ];
            for (name, value) in &self.extra_headers {
                match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                    Some(existing) => existing.1 = value.clone(),
                    None => headers.push((name.clone(), value.clone())),
                }
            }
            headers
        })
    }

    /// Fetch `url` as text.
    ///
    /// A challenge page is retried through the browser engine when one is
    /// configured. Other non-2xx statuses become [`CatalogError::Status`].
    pub async fn fetch_text(&self, url: &str, mode: &FetchMode) -> Result<String> {
        if let FetchMode::Browser { wait_for } = mode {
            match &self.browser {
                Some(browser) => return self.fetch_with_browser(browser.as_ref(), url, wait_for.clone()).await,
                None => tracing::debug!(url, "No browser engine configured, using plain HTTP"),
            }
        }

        let response = self
            .http
            .execute(HttpRequest::get(url).headers(self.headers()))
            .await?;

        if response.is_success() {
            return Ok(response.body);
        }

        if response.is_challenge() {
            if let Some(browser) = &self.browser {
                tracing::info!(url, status = response.status, "Challenge page, retrying in browser");
                return self.fetch_with_browser(browser.as_ref(), url, None).await;
            }
        }

        Err(CatalogError::Status {
            status: response.status,
            url: url.to_string(),
        })
    }

    async fn fetch_with_browser(
        &self,
        browser: &dyn BrowserEngine,
        url: &str,
        wait_for: Option<String>,
    ) -> Result<String> {
        browser
            .fetch(BrowserRequest {
                url: url.to_string(),
                wait_for,
                user_agent: Some(self.user_agent.clone()),
            })
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory HTTP fake serving canned bodies keyed by URL.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeHttp {
        routes: Mutex<HashMap<String, (u16, String)>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeHttp {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(self, url: &str, body: &str) -> Self {
            self.route_status(url, 200, body)
        }

        pub fn route_status(self, url: &str, status: u16, body: &str) -> Self {
            self.routes
                .lock()
                .unwrap()
                .insert(url.to_string(), (status, body.to_string()));
            self
        }

        pub fn requested_urls(&self) -> Vec<String> {
            self.requests.lock().unwrap().iter().map(|r| r.url.clone()).collect()
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for FakeHttp {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            let url = request.url.clone();
            self.requests.lock().unwrap().push(request);
            let (status, body) = self
                .routes
                .lock()
                .unwrap()
                .get(&url)
                .cloned()
                .unwrap_or((404, String::new()));
            Ok(HttpResponse { status, url, body })
        }
    }

    /// Browser fake returning a fixed body and counting calls.
    #[derive(Default)]
    pub struct FakeBrowser {
        pub body: String,
        pub calls: Mutex<Vec<BrowserRequest>>,
    }

    #[async_trait]
    impl BrowserEngine for FakeBrowser {
        async fn fetch(&self, request: BrowserRequest) -> Result<String> {
            self.calls.lock().unwrap().push(request);
            Ok(self.body.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeBrowser, FakeHttp};
    use super::*;
    use crate::store::SqliteStore;

    fn deps(http: Arc<FakeHttp>, browser: Option<Arc<FakeBrowser>>) -> Dependencies {
        let prefs = Arc::new(SqliteStore::in_memory().unwrap());
        Dependencies::new(http, prefs).with_browser(browser.map(|b| b as Arc<dyn BrowserEngine>))
    }

    #[test]
    fn test_default_headers_include_user_agent() {
        let http = Arc::new(FakeHttp::new());
        let source = HttpSource::new("https://site.test/", &deps(http, None));
        let headers = source.headers();
        assert_eq!(headers[0], ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()));
        assert!(headers.iter().any(|(n, v)| n == "Cache-Control" && v == "max-age=0"));
        assert_eq!(source.base_url(), "https://site.test");
    }

    #[test]
    fn test_extra_headers_override_defaults() {
        let http = Arc::new(FakeHttp::new());
        let mut extra = BTreeMap::new();
        extra.insert("user-agent".to_string(), "custom".to_string());
        extra.insert("Referer".to_string(), "https://site.test/".to_string());
        let source = HttpSource::new("https://site.test", &deps(http, None)).with_headers(extra);

        let headers = source.headers();
        assert_eq!(headers[0].1, "custom");
        assert!(headers.iter().any(|(n, _)| n == "Referer"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_typed_error() {
        let http = Arc::new(FakeHttp::new().route_status("https://site.test/x", 500, "oops"));
        let source = HttpSource::new("https://site.test", &deps(http.clone(), None));

        let err = source.fetch_text("https://site.test/x", &FetchMode::Http).await.unwrap_err();
        assert!(matches!(err, CatalogError::Status { status: 500, .. }));
        assert!(err.is_network());
        assert_eq!(http.requests()[0].headers[0].0, "User-Agent");
    }

    #[tokio::test]
    async fn test_challenge_falls_back_to_browser() {
        let http = Arc::new(FakeHttp::new().route_status(
            "https://site.test/x",
            503,
            "<html><title>Just a moment...</title></html>",
        ));
        let browser = Arc::new(FakeBrowser {
            body: "<p>real</p>".into(),
            ..Default::default()
        });
        let source = HttpSource::new("https://site.test", &deps(http, Some(browser.clone())));

        let body = source.fetch_text("https://site.test/x", &FetchMode::Http).await.unwrap();
        assert_eq!(body, "<p>real</p>");
        assert_eq!(browser.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_browser_mode_without_engine_uses_http() {
        let http = Arc::new(FakeHttp::new().route("https://site.test/x", "plain"));
        let source = HttpSource::new("https://site.test", &deps(http, None));
        let mode = FetchMode::Browser { wait_for: None };
        assert_eq!(source.fetch_text("https://site.test/x", &mode).await.unwrap(), "plain");
    }
}
