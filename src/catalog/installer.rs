use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::app::{CancellationFlag, CatalogError, Result};
use crate::catalog::changes::InstallationChanges;
use crate::catalog::manifest::{PackageManifest, MANIFEST_FILE};
use crate::domain::{CatalogRemote, ChangeTrigger, InstallStep, InstallationChange, InstalledCatalog};
use crate::source::http::HttpClient;
use crate::source::HttpRequest;
use crate::store::CatalogRepository;

/// Downloadable package: the manifest text plus the files it ships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageBundle {
    pub manifest: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// Deletes the downloaded artifact when dropped.
struct TempArtifact {
    path: PathBuf,
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to delete download artifact");
            }
        }
    }
}

pub struct CatalogInstaller {
    http: Arc<dyn HttpClient>,
    repository: Arc<dyn CatalogRepository>,
    changes: InstallationChanges,
    extensions_dir: PathBuf,
    download_dir: PathBuf,
}

impl CatalogInstaller {
    pub fn new(
        http: Arc<dyn HttpClient>,
        repository: Arc<dyn CatalogRepository>,
        changes: InstallationChanges,
        extensions_dir: impl Into<PathBuf>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            repository,
            changes,
            extensions_dir: extensions_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    /// Install `catalog`, reporting progress as it goes.
    ///
    /// The stream yields `Downloading`, `Idle`, `Installing` and then exactly
    /// one terminal step. A cancelled install ends in `Aborted`.
    pub fn install<'a>(
        &'a self,
        catalog: &'a CatalogRemote,
        cancel: &'a CancellationFlag,
    ) -> impl Stream<Item = InstallStep> + 'a {
        stream! {
            let pkg = catalog.pkg_name.as_str();
            yield InstallStep::Downloading;

            let artifact = match self.download(catalog).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    tracing::warn!(pkg, error = %e, "Catalog download failed");
                    yield InstallStep::Error(format!("download failed: {}", e));
                    return;
                }
            };
            yield InstallStep::Idle;

            if cancel.is_cancelled() {
                tracing::info!(pkg, "Catalog install cancelled");
                yield InstallStep::Aborted;
                return;
            }
            yield InstallStep::Installing;

            match self.install_artifact(catalog, &artifact.path) {
                Ok(()) => {
                    drop(artifact);
                    self.changes
                        .notify(InstallationChange::installed(pkg, ChangeTrigger::Local));
                    tracing::info!(pkg, version = %catalog.version_name, "Catalog installed");
                    yield InstallStep::Success;
                }
                Err(e) => {
                    drop(artifact);
                    tracing::warn!(pkg, error = %e, "Catalog install failed");
                    yield InstallStep::Error(e.to_string());
                }
            }
        }
    }

    /// Remove an installed catalog. Ends in `Completed` or `Error`.
    pub async fn uninstall(&self, pkg_name: &str) -> InstallStep {
        match self.remove_package(pkg_name) {
            Ok(()) => {
                self.changes
                    .notify(InstallationChange::uninstalled(pkg_name, ChangeTrigger::Local));
                tracing::info!(pkg = pkg_name, "Catalog uninstalled");
                InstallStep::Completed
            }
            Err(e) => {
                tracing::warn!(pkg = pkg_name, error = %e, "Catalog uninstall failed");
                InstallStep::Error(e.to_string())
            }
        }
    }

    async fn download(&self, catalog: &CatalogRemote) -> Result<TempArtifact> {
        let response = self.http.execute(HttpRequest::get(&catalog.pkg_url)).await?;
        if !response.is_success() {
            return Err(CatalogError::Status {
                status: response.status,
                url: response.url,
            });
        }

        fs::create_dir_all(&self.download_dir)?;
        let artifact = TempArtifact {
            path: self
                .download_dir
                .join(format!("{}.download", safe_name(&catalog.pkg_name)?)),
        };
        tokio::fs::write(&artifact.path, response.body.as_bytes()).await?;
        Ok(artifact)
    }

    fn install_artifact(&self, catalog: &CatalogRemote, artifact: &Path) -> Result<()> {
        let pkg = safe_name(&catalog.pkg_name)?;
        let invalid = |reason: String| CatalogError::InvalidCatalog {
            pkg: pkg.to_string(),
            reason,
        };

        let bundle: PackageBundle = serde_json::from_str(&fs::read_to_string(artifact)?)?;
        let manifest = PackageManifest::parse(&bundle.manifest).map_err(|e| invalid(e.to_string()))?;
        let package = manifest.validate(pkg).map_err(|e| invalid(e.to_string()))?;

        fs::create_dir_all(&self.extensions_dir)?;
        let target = self.extensions_dir.join(pkg);
        let partial = self.extensions_dir.join(format!("{}.partial", pkg));
        let backup = self.extensions_dir.join(format!("{}.backup", pkg));
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        if backup.exists() {
            // Left over from an interrupted swap; it is the only copy if the target is gone.
            if target.exists() {
                fs::remove_dir_all(&backup)?;
            } else {
                fs::rename(&backup, &target)?;
            }
        }

        if let Err(e) = self.write_package(&partial, &bundle) {
            discard(&partial);
            return Err(e);
        }

        let had_previous = target.exists();
        if had_previous {
            if let Err(e) = fs::rename(&target, &backup) {
                discard(&partial);
                return Err(e.into());
            }
        }

        let record = InstalledCatalog::new(
            package.pkg_name,
            package.name,
            package.version_name,
            package.version_code,
            target.clone(),
        );
        let swapped = match fs::rename(&partial, &target) {
            Ok(()) => self.repository.upsert_installed(&record),
            Err(e) => Err(e.into()),
        };

        match swapped {
            Ok(()) => {
                discard(&backup);
                Ok(())
            }
            Err(e) => {
                discard(&partial);
                discard(&target);
                if had_previous {
                    if let Err(restore) = fs::rename(&backup, &target) {
                        tracing::warn!(pkg, error = %restore, "Failed to restore previous install");
                    }
                }
                Err(e)
            }
        }
    }

    fn write_package(&self, dir: &Path, bundle: &PackageBundle) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(MANIFEST_FILE), &bundle.manifest)?;
        for (name, content) in &bundle.files {
            let name = safe_name(name)?;
            if name == MANIFEST_FILE {
                continue;
            }
            fs::write(dir.join(name), content)?;
        }
        Ok(())
    }

    fn remove_package(&self, pkg_name: &str) -> Result<()> {
        let pkg = safe_name(pkg_name)?;
        let dir = self.extensions_dir.join(pkg);
        let record = self.repository.get_installed(pkg)?;

        if record.is_none() && !dir.exists() {
            return Err(CatalogError::CatalogNotFound(pkg.to_string()));
        }
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.repository.delete_installed(pkg)?;
        Ok(())
    }
}

/// Remove a scratch directory, logging rather than failing.
fn discard(dir: &Path) {
    if !dir.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(dir) {
        tracing::warn!(path = %dir.display(), error = %e, "Failed to remove directory");
    }
}

/// A single path component, so package and file names cannot escape their directory.
fn safe_name(name: &str) -> Result<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(CatalogError::Parse(format!("invalid package entry name '{}'", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::http::testing::FakeHttp;
    use crate::store::SqliteStore;
    use futures::StreamExt;

    const PKG: &str = "ireader.sample.en";
    const PKG_URL: &str = "https://repo.test/apk/ireader.sample.en.json";

    fn manifest(pkg: &str) -> String {
        format!(
            r#"package = "{pkg}"
name = "Sample"
version_name = "2.0"
version_code = 4
features = ["ireader"]

[metadata]
"source.class" = "ireader.rules.UserSource"
"#
        )
    }

    fn bundle(pkg: &str) -> String {
        let mut files = BTreeMap::new();
        files.insert("source.json".to_string(), "{}".to_string());
        serde_json::to_string(&PackageBundle {
            manifest: manifest(pkg),
            files,
        })
        .unwrap()
    }

    fn remote() -> CatalogRemote {
        CatalogRemote {
            source_id: 1,
            name: "Sample".into(),
            description: String::new(),
            pkg_name: PKG.into(),
            version_name: "2.0".into(),
            version_code: 4,
            lang: "en".into(),
            pkg_url: PKG_URL.into(),
            icon_url: String::new(),
            nsfw: false,
        }
    }

    struct Fixture {
        root: tempfile::TempDir,
        store: Arc<SqliteStore>,
        changes: InstallationChanges,
        installer: CatalogInstaller,
    }

    fn fixture(http: FakeHttp) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let changes = InstallationChanges::new();
        let installer = CatalogInstaller::new(
            Arc::new(http),
            store.clone(),
            changes.clone(),
            root.path().join("extensions"),
            root.path().join("downloads"),
        );
        Fixture {
            root,
            store,
            changes,
            installer,
        }
    }

    fn artifact_path(f: &Fixture) -> PathBuf {
        f.root.path().join("downloads").join(format!("{}.download", PKG))
    }

    async fn run(f: &Fixture, cancel: &CancellationFlag) -> Vec<InstallStep> {
        let catalog = remote();
        f.installer.install(&catalog, cancel).collect().await
    }

    #[tokio::test]
    async fn test_successful_install() {
        let f = fixture(FakeHttp::new().route(PKG_URL, &bundle(PKG)));
        let mut events = f.changes.stream();

        let steps = run(&f, &CancellationFlag::new()).await;

        assert_eq!(
            steps,
            vec![
                InstallStep::Downloading,
                InstallStep::Idle,
                InstallStep::Installing,
                InstallStep::Success
            ]
        );
        let installed = f.root.path().join("extensions").join(PKG);
        assert!(installed.join("manifest.toml").exists());
        assert!(installed.join("source.json").exists());
        assert!(!f.root.path().join("extensions").join(format!("{}.partial", PKG)).exists());
        assert!(!artifact_path(&f).exists());

        let record = f.store.get_installed(PKG).unwrap().unwrap();
        assert_eq!(record.version_code, 4);
        assert_eq!(
            events.next().await.unwrap(),
            InstallationChange::installed(PKG, ChangeTrigger::Local)
        );
    }

    #[tokio::test]
    async fn test_download_failure_is_an_error_step() {
        let f = fixture(FakeHttp::new().route_status(PKG_URL, 500, "oops"));
        let steps = run(&f, &CancellationFlag::new()).await;

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], InstallStep::Downloading);
        assert!(steps[1].is_error());
        assert!(!artifact_path(&f).exists());
    }

    #[tokio::test]
    async fn test_mismatched_manifest_is_rejected_and_cleaned_up() {
        let f = fixture(FakeHttp::new().route(PKG_URL, &bundle("ireader.impostor.en")));
        let steps = run(&f, &CancellationFlag::new()).await;

        let terminal: Vec<_> = steps.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].is_error());
        assert!(!artifact_path(&f).exists());
        assert!(!f.root.path().join("extensions").join(PKG).exists());
        assert!(f.store.get_installed(PKG).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_artifact_is_an_error() {
        let f = fixture(FakeHttp::new().route(PKG_URL, "<html>not a package</html>"));
        let steps = run(&f, &CancellationFlag::new()).await;
        assert!(steps.last().unwrap().is_error());
        assert!(!artifact_path(&f).exists());
    }

    #[tokio::test]
    async fn test_cancelled_install_is_aborted_not_error() {
        let f = fixture(FakeHttp::new().route(PKG_URL, &bundle(PKG)));
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let steps = run(&f, &cancel).await;
        assert_eq!(steps.last(), Some(&InstallStep::Aborted));
        assert!(!steps.iter().any(|s| s.is_error()));
        assert!(!f.root.path().join("extensions").join(PKG).exists());
        assert!(!artifact_path(&f).exists());
    }

    #[tokio::test]
    async fn test_uninstall_removes_files_and_record() {
        let f = fixture(FakeHttp::new().route(PKG_URL, &bundle(PKG)));
        run(&f, &CancellationFlag::new()).await;
        let mut events = f.changes.stream();

        assert_eq!(f.installer.uninstall(PKG).await, InstallStep::Completed);
        assert!(!f.root.path().join("extensions").join(PKG).exists());
        assert!(f.store.get_installed(PKG).unwrap().is_none());
        assert_eq!(
            events.next().await.unwrap(),
            InstallationChange::uninstalled(PKG, ChangeTrigger::Local)
        );

        assert!(f.installer.uninstall(PKG).await.is_error());
    }

    /// Delegates to SQLite but refuses to record installs.
    struct RejectingStore(SqliteStore);

    impl CatalogRepository for RejectingStore {
        fn upsert_installed(&self, _catalog: &InstalledCatalog) -> Result<()> {
            Err(CatalogError::Other("database is locked".into()))
        }
        fn get_installed(&self, pkg_name: &str) -> Result<Option<InstalledCatalog>> {
            self.0.get_installed(pkg_name)
        }
        fn get_all_installed(&self) -> Result<Vec<InstalledCatalog>> {
            self.0.get_all_installed()
        }
        fn delete_installed(&self, pkg_name: &str) -> Result<bool> {
            self.0.delete_installed(pkg_name)
        }
        fn replace_remote_catalogs(&self, catalogs: &[CatalogRemote]) -> Result<()> {
            self.0.replace_remote_catalogs(catalogs)
        }
        fn get_remote_catalogs(&self) -> Result<Vec<CatalogRemote>> {
            self.0.get_remote_catalogs()
        }
        fn save_user_source(&self, source: &crate::usersource::UserSource) -> Result<()> {
            self.0.save_user_source(source)
        }
        fn get_user_source(&self, source_id: i64) -> Result<Option<crate::usersource::UserSource>> {
            self.0.get_user_source(source_id)
        }
        fn get_user_sources(&self) -> Result<Vec<crate::usersource::UserSource>> {
            self.0.get_user_sources()
        }
        fn delete_user_source(&self, source_id: i64) -> Result<bool> {
            self.0.delete_user_source(source_id)
        }
        fn save_chapter_content(
            &self,
            source_id: i64,
            chapter: &crate::domain::ChapterInfo,
            pages: &[crate::domain::Page],
        ) -> Result<()> {
            self.0.save_chapter_content(source_id, chapter, pages)
        }
        fn get_chapter_content(&self, source_id: i64, chapter_key: &str) -> Result<Option<Vec<crate::domain::Page>>> {
            self.0.get_chapter_content(source_id, chapter_key)
        }
        fn is_chapter_downloaded(&self, source_id: i64, chapter_key: &str) -> Result<bool> {
            self.0.is_chapter_downloaded(source_id, chapter_key)
        }
    }

    #[tokio::test]
    async fn test_failed_record_keeps_previous_install() {
        let root = tempfile::tempdir().unwrap();
        let extensions = root.path().join("extensions");
        let previous = extensions.join(PKG);
        fs::create_dir_all(&previous).unwrap();
        fs::write(previous.join(MANIFEST_FILE), manifest(PKG)).unwrap();
        fs::write(previous.join("old.json"), "{}").unwrap();

        let changes = InstallationChanges::new();
        let installer = CatalogInstaller::new(
            Arc::new(FakeHttp::new().route(PKG_URL, &bundle(PKG))),
            Arc::new(RejectingStore(SqliteStore::in_memory().unwrap())),
            changes.clone(),
            &extensions,
            root.path().join("downloads"),
        );
        let catalog = remote();
        let steps: Vec<_> = installer.install(&catalog, &CancellationFlag::new()).collect().await;

        assert!(steps.last().unwrap().is_error());
        assert!(previous.join("old.json").exists());
        assert!(!previous.join("source.json").exists());
        assert!(!extensions.join(format!("{}.partial", PKG)).exists());
        assert!(!extensions.join(format!("{}.backup", PKG)).exists());
    }

    #[tokio::test]
    async fn test_reinstall_replaces_files_and_drops_backup() {
        let f = fixture(FakeHttp::new().route(PKG_URL, &bundle(PKG)));
        let extensions = f.root.path().join("extensions");
        fs::create_dir_all(extensions.join(PKG)).unwrap();
        fs::write(extensions.join(PKG).join("old.json"), "{}").unwrap();

        let steps = run(&f, &CancellationFlag::new()).await;

        assert_eq!(steps.last(), Some(&InstallStep::Success));
        assert!(extensions.join(PKG).join("source.json").exists());
        assert!(!extensions.join(PKG).join("old.json").exists());
        assert!(!extensions.join(format!("{}.backup", PKG)).exists());
    }

    #[test]
    fn test_safe_name() {
        assert!(safe_name("source.json").is_ok());
        assert!(safe_name("../escape").is_err());
        assert!(safe_name("nested/file").is_err());
        assert!(safe_name("").is_err());
    }
}
