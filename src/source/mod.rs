pub mod factory;
pub mod http;
pub mod local;
pub mod parse;
pub mod user;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::app::Result;
use crate::browser::BrowserEngine;
use crate::domain::{BooksPage, ChapterInfo, ChaptersPage, Filter, MangaInfo, Page};
use crate::source::http::HttpClient;
use crate::store::PreferenceStore;

pub use factory::FactorySource;
pub use http::{FetchMode, HttpRequest, HttpResponse, HttpSource, ReqwestClient};
pub use local::LocalSource;
pub use user::UserSourceRuntime;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Deterministic, non-negative id for a source.
///
/// Hashes `name.lowercase()/lang/version_id` and keeps the first 8 bytes of
/// the digest with the sign bit cleared.
pub fn source_id(name: &str, lang: &str, version_id: i64) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}/{}/{}", name.to_lowercase(), lang, version_id).as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes) & i64::MAX
}

/// Identity shared by every source.
pub trait Source: Send + Sync {
    fn id(&self) -> i64;
    fn name(&self) -> &str;
    fn lang(&self) -> &str;

    fn supports_latest(&self) -> bool {
        false
    }
}

/// Operations of a source that serves books from somewhere.
///
/// Every list operation reports whether another page exists; callers stop
/// once it is false.
#[async_trait]
pub trait CatalogSource: Source {
    async fn fetch_latest_updates(&self, page: u32) -> Result<BooksPage>;

    async fn fetch_popular(&self, page: u32) -> Result<BooksPage>;

    async fn search(&self, filters: &[Filter], page: u32) -> Result<BooksPage>;

    async fn get_book_details(&self, book: &MangaInfo) -> Result<MangaInfo>;

    async fn get_chapter_list(&self, book: &MangaInfo) -> Result<ChaptersPage>;

    async fn get_page_list(&self, chapter: &ChapterInfo) -> Result<Vec<Page>>;
}

/// Collaborators handed to every source on construction.
#[derive(Clone)]
pub struct Dependencies {
    pub http: Arc<dyn HttpClient>,
    pub browser: Option<Arc<dyn BrowserEngine>>,
    /// Namespaced to the package that owns the source.
    pub preferences: Arc<dyn PreferenceStore>,
    pub user_agent: String,
}

impl Dependencies {
    pub fn new(http: Arc<dyn HttpClient>, preferences: Arc<dyn PreferenceStore>) -> Self {
        Self {
            http,
            browser: None,
            preferences,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_browser(mut self, browser: Option<Arc<dyn BrowserEngine>>) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        let user_agent = user_agent.into();
        if !user_agent.trim().is_empty() {
            self.user_agent = user_agent;
        }
        self
    }

    /// Same collaborators with preferences scoped to another namespace.
    pub fn scoped(&self, preferences: Arc<dyn PreferenceStore>) -> Self {
        Self {
            preferences,
            ..self.clone()
        }
    }
}

/// A listing page that can be flattened by [`collect_pages`].
pub trait Paged {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, bool);
}

impl Paged for BooksPage {
    type Item = MangaInfo;

    fn into_parts(self) -> (Vec<MangaInfo>, bool) {
        (self.items, self.has_next_page)
    }
}

impl Paged for ChaptersPage {
    type Item = ChapterInfo;

    fn into_parts(self) -> (Vec<ChapterInfo>, bool) {
        (self.chapters, self.has_next_page)
    }
}

/// Request pages 1, 2, ... in order until one reports no next page or
/// `max_pages` have been fetched.
pub async fn collect_pages<P, F, Fut>(mut fetch: F, max_pages: u32) -> Result<Vec<P::Item>>
where
    P: Paged,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<P>>,
{
    let mut items = Vec::new();
    let mut page = 1;

    while page <= max_pages {
        let (batch, has_next) = fetch(page).await?.into_parts();
        items.extend(batch);
        if !has_next {
            break;
        }
        page += 1;
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_source_id_is_deterministic() {
        let a = source_id("Novel Site", "en", 1);
        let b = source_id("Novel Site", "en", 1);
        assert_eq!(a, b);
        assert!(a >= 0);
    }

    #[test]
    fn test_source_id_changes_with_inputs() {
        let base = source_id("Novel Site", "en", 1);
        assert_ne!(base, source_id("Novel Site", "en", 2));
        assert_ne!(base, source_id("Novel Site", "fr", 1));
        assert_eq!(base, source_id("NOVEL SITE", "en", 1));
    }

    #[tokio::test]
    async fn test_collect_pages_stops_when_no_next_page() {
        let requested = Mutex::new(Vec::new());

        let items = collect_pages(
            |page| {
                requested.lock().unwrap().push(page);
                async move {
                    let item = MangaInfo::new(format!("/book/{}", page), format!("Book {}", page));
                    Ok(BooksPage::new(vec![item], page < 3))
                }
            },
            10,
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(*requested.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_collect_pages_respects_limit() {
        let items = collect_pages(
            |page| async move { Ok(ChaptersPage::new(vec![ChapterInfo::new(format!("/c/{}", page), "c")], true)) },
            2,
        )
        .await
        .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_collect_pages_propagates_errors() {
        let result = collect_pages(
            |page| async move {
                if page == 2 {
                    Err(crate::app::CatalogError::Timeout(std::time::Duration::from_secs(1)))
                } else {
                    Ok(BooksPage::new(vec![], true))
                }
            },
            5,
        )
        .await;
        assert!(result.is_err());
    }
}
