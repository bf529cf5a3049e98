use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::app::error::{CatalogError, Result};
use crate::browser::{BrowserEngine, ChromeEngine};
use crate::catalog::{
    CatalogInstaller, CatalogLoader, InstallationChanges, LoaderConfig, PackageStager, PluginRegistry,
    RemoteCatalogSync, SourceManager,
};
use crate::config::Config;
use crate::download::{spawn_download_worker, ChapterDownloader, DownloadWorkerHandle};
use crate::source::http::HttpClient;
use crate::source::{Dependencies, ReqwestClient};
use crate::store::SqliteStore;
use crate::usersource::TemplateRegistry;

const DB_FILE: &str = "ireader-sources.db";

pub struct AppContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub store: Arc<SqliteStore>,
    pub http: Arc<dyn HttpClient>,
    pub changes: InstallationChanges,
    pub manager: Arc<SourceManager>,
    pub installer: CatalogInstaller,
    pub sync: RemoteCatalogSync,
    pub templates: TemplateRegistry,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let data_dir = Config::data_dir().map_err(|e| CatalogError::Config(e.to_string()))?;
        std::fs::create_dir_all(&data_dir)?;
        let store = Arc::new(SqliteStore::new(data_dir.join(DB_FILE))?);
        Self::with_store(config, data_dir, store)
    }

    /// Context over an in-memory database, with files kept under `data_dir`.
    pub fn in_memory(config: Config, data_dir: &Path) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Self::with_store(config, data_dir.to_path_buf(), store)
    }

    fn with_store(config: Config, data_dir: PathBuf, store: Arc<SqliteStore>) -> Result<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(&config.http)?);
        Self::with_parts(config, data_dir, store, http)
    }

    pub fn with_parts(
        config: Config,
        data_dir: PathBuf,
        store: Arc<SqliteStore>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let browser: Option<Arc<dyn BrowserEngine>> = if config.browser.enabled {
            Some(Arc::new(ChromeEngine::new(config.browser.clone())))
        } else {
            None
        };
        let deps = Dependencies::new(http.clone(), store.clone())
            .with_browser(browser)
            .with_user_agent(config.http.user_agent.clone());

        let catalogs = &config.catalogs;
        let extensions_dir = catalogs.extensions_dir(&data_dir);
        let loader = CatalogLoader::new(
            LoaderConfig {
                extensions_dir: extensions_dir.clone(),
                system_dir: catalogs.system_dir(),
                library_dir: catalogs.library_dir(&data_dir),
                show_local: catalogs.show_local,
                show_system: catalogs.show_system,
            },
            Arc::new(PluginRegistry::with_builtins()),
            PackageStager::new(catalogs.staging_dir(&data_dir)),
            deps.clone(),
        );

        let changes = InstallationChanges::new();
        let manager = Arc::new(SourceManager::new(Arc::new(loader), store.clone(), deps));
        let installer = CatalogInstaller::new(
            http.clone(),
            store.clone(),
            changes.clone(),
            extensions_dir,
            data_dir.join("downloads"),
        );
        let sync = RemoteCatalogSync::new(
            http.clone(),
            store.clone(),
            store.clone(),
            catalogs.repository_url.clone(),
            catalogs.sync_cooldown(),
        );

        Ok(Self {
            config,
            data_dir,
            store,
            http,
            changes,
            manager,
            installer,
            sync,
            templates: TemplateRegistry::builtin(),
        })
    }

    /// Load every source and keep the loaded set in step with installs.
    pub async fn load_sources(&self) -> Result<JoinHandle<()>> {
        self.manager.init().await?;
        Ok(self.manager.spawn_change_listener(&self.changes))
    }

    pub fn downloader(&self) -> ChapterDownloader {
        ChapterDownloader::new(self.store.clone())
    }

    /// Start a background download worker sized from `[downloads]`.
    pub fn spawn_downloads(&self) -> DownloadWorkerHandle {
        spawn_download_worker(self.downloader(), self.config.downloads.queue_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LOCAL_PKG_NAME;
    use crate::source::http::testing::FakeHttp;

    #[tokio::test]
    async fn test_context_loads_bundled_sources() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let ctx = AppContext::with_parts(
            Config::default(),
            dir.path().to_path_buf(),
            store,
            Arc::new(FakeHttp::new()),
        )
        .unwrap();

        let listener = ctx.load_sources().await.unwrap();
        assert!(ctx.manager.catalog(LOCAL_PKG_NAME).is_some());
        listener.abort();
    }
}
