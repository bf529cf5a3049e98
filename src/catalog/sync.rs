use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use url::Url;

use crate::app::{CatalogError, Result};
use crate::domain::CatalogRemote;
use crate::source::http::HttpClient;
use crate::source::HttpRequest;
use crate::store::{CatalogRepository, PreferenceStore, PreferenceStoreExt};

/// Milliseconds since the epoch of the last successful index download.
pub const LAST_SYNC_KEY: &str = "catalogs.last_remote_sync";

/// One entry of the repository index.
#[derive(Debug, Clone, Deserialize)]
struct IndexEntry {
    name: String,
    pkg: String,
    version: String,
    code: i64,
    lang: String,
    apk: String,
    id: i64,
    #[serde(default)]
    description: String,
    #[serde(default, deserialize_with = "flag")]
    nsfw: bool,
}

/// Index files write the flag as either `0`/`1` or a boolean.
fn flag<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The last sync is recent enough; nothing was fetched.
    Skipped,
    /// The cache now holds this many catalogs.
    Refreshed(usize),
}

/// Keeps the remote catalog cache in step with the repository index.
pub struct RemoteCatalogSync {
    http: Arc<dyn HttpClient>,
    repository: Arc<dyn CatalogRepository>,
    preferences: Arc<dyn PreferenceStore>,
    repository_url: String,
    cooldown: Duration,
}

impl RemoteCatalogSync {
    pub fn new(
        http: Arc<dyn HttpClient>,
        repository: Arc<dyn CatalogRepository>,
        preferences: Arc<dyn PreferenceStore>,
        repository_url: impl Into<String>,
        cooldown: Duration,
    ) -> Self {
        Self {
            http,
            repository,
            preferences,
            repository_url: repository_url.into(),
            cooldown,
        }
    }

    /// Fetch the index and replace the cache with it.
    ///
    /// Skipped when the last success is within the cooldown, unless `force`.
    /// On failure the cached list stays as it was.
    pub async fn refresh(&self, force: bool) -> Result<SyncOutcome> {
        if !force && self.within_cooldown() {
            tracing::debug!("Remote catalog index is fresh, skipping sync");
            return Ok(SyncOutcome::Skipped);
        }

        match self.fetch_index().await {
            Ok(catalogs) => {
                self.repository.replace_remote_catalogs(&catalogs)?;
                self.preferences
                    .set_long(LAST_SYNC_KEY, Utc::now().timestamp_millis())?;
                tracing::info!(count = catalogs.len(), url = %self.repository_url, "Remote catalogs synced");
                Ok(SyncOutcome::Refreshed(catalogs.len()))
            }
            Err(e) => {
                tracing::warn!(url = %self.repository_url, error = %e, "Remote catalog sync failed, keeping cached list");
                Err(e)
            }
        }
    }

    pub fn cached(&self) -> Result<Vec<CatalogRemote>> {
        self.repository.get_remote_catalogs()
    }

    fn within_cooldown(&self) -> bool {
        let last = self.preferences.get_long(LAST_SYNC_KEY, 0);
        if last <= 0 {
            return false;
        }
        let elapsed = Utc::now().timestamp_millis().saturating_sub(last);
        elapsed >= 0 && (elapsed as u128) < self.cooldown.as_millis()
    }

    async fn fetch_index(&self) -> Result<Vec<CatalogRemote>> {
        let response = self
            .http
            .execute(HttpRequest::get(&self.repository_url))
            .await?;
        if !response.is_success() {
            return Err(CatalogError::Status {
                status: response.status,
                url: response.url,
            });
        }

        let entries: Vec<IndexEntry> = serde_json::from_str(&response.body)?;
        if entries.is_empty() {
            return Err(CatalogError::Parse("repository index lists no catalogs".into()));
        }

        let base = Url::parse(&self.repository_url)?;
        entries
            .into_iter()
            .map(|entry| into_remote(entry, &base))
            .collect()
    }
}

fn into_remote(entry: IndexEntry, base: &Url) -> Result<CatalogRemote> {
    let pkg_url = base.join(&entry.apk)?.to_string();
    let file_name = entry.apk.rsplit('/').next().unwrap_or_default();
    let icon_name = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    let icon_url = base.join(&format!("icon/{}.png", icon_name))?.to_string();

    Ok(CatalogRemote {
        source_id: entry.id,
        name: entry.name,
        description: entry.description,
        pkg_name: entry.pkg,
        version_name: entry.version,
        version_code: entry.code,
        lang: entry.lang,
        pkg_url,
        icon_url,
        nsfw: entry.nsfw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::http::testing::FakeHttp;
    use crate::store::SqliteStore;
    use tokio_test::{assert_err, assert_ok};

    const REPO: &str = "https://repo.test/index.min.json";

    const INDEX: &str = r#"[
        {"name": "NovelFull", "pkg": "ireader.novelfull.en", "version": "2.1", "code": 3,
         "lang": "en", "apk": "apk/ireader-novelfull-en.json", "id": 11, "nsfw": 0},
        {"name": "Booktoki", "pkg": "ireader.booktoki.ko", "version": "2.0", "code": 1,
         "lang": "ko", "apk": "apk/ireader-booktoki-ko.json", "id": 22,
         "description": "Korean novels", "nsfw": true}
    ]"#;

    fn sync(http: FakeHttp, store: Arc<SqliteStore>) -> (RemoteCatalogSync, Arc<FakeHttp>) {
        let http = Arc::new(http);
        let sync = RemoteCatalogSync::new(
            http.clone(),
            store.clone(),
            store,
            REPO,
            Duration::from_secs(300),
        );
        (sync, http)
    }

    #[tokio::test]
    async fn test_refresh_replaces_cache() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (sync, _) = sync(FakeHttp::new().route(REPO, INDEX), store.clone());

        assert_eq!(assert_ok!(sync.refresh(true).await), SyncOutcome::Refreshed(2));

        let cached = sync.cached().unwrap();
        assert_eq!(cached.len(), 2);
        let booktoki = cached.iter().find(|c| c.pkg_name == "ireader.booktoki.ko").unwrap();
        assert!(booktoki.nsfw);
        assert_eq!(booktoki.source_id, 22);
        assert_eq!(booktoki.pkg_url, "https://repo.test/apk/ireader-booktoki-ko.json");
        assert_eq!(booktoki.icon_url, "https://repo.test/icon/ireader-booktoki-ko.png");
    }

    #[tokio::test]
    async fn test_cooldown_skips_network() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (sync, http) = sync(FakeHttp::new().route(REPO, INDEX), store);

        assert_ok!(sync.refresh(false).await);
        assert_eq!(assert_ok!(sync.refresh(false).await), SyncOutcome::Skipped);
        assert_eq!(http.requested_urls().len(), 1);

        assert_eq!(assert_ok!(sync.refresh(true).await), SyncOutcome::Refreshed(2));
        assert_eq!(http.requested_urls().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_index_is_a_failure_and_keeps_cache() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (first, _) = sync(FakeHttp::new().route(REPO, INDEX), store.clone());
        assert_ok!(first.refresh(true).await);

        let (second, _) = sync(FakeHttp::new().route(REPO, "[]"), store.clone());
        assert_err!(second.refresh(true).await);
        assert_eq!(second.cached().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_http_failure_keeps_cache() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (first, _) = sync(FakeHttp::new().route(REPO, INDEX), store.clone());
        assert_ok!(first.refresh(true).await);

        let (second, _) = sync(FakeHttp::new().route_status(REPO, 502, ""), store.clone());
        let err = second.refresh(true).await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(second.cached().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_index_keeps_cache() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (sync, _) = sync(FakeHttp::new().route(REPO, "{\"not\": \"a list\"}"), store);
        assert_err!(sync.refresh(true).await);
        assert!(sync.cached().unwrap().is_empty());
    }
}
