use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;

use crate::app::CatalogError;
use crate::catalog::manifest::{PackageManifest, ValidatedPackage, ValidationError};
use crate::catalog::registry::{InstantiateError, PluginContext, PluginRegistry};
use crate::catalog::staging::PackageStager;
use crate::domain::{CatalogLocal, CatalogOrigin};
use crate::source::local::LOCAL_SOURCE_NAME;
use crate::source::{CatalogSource, Dependencies, LocalSource, Source};
use crate::store::PrefixedPreferenceStore;

/// Package name of the bundled offline source.
pub const LOCAL_PKG_NAME: &str = "ireader.source.local";

/// Scratch directories the installer leaves beside a package while swapping it.
const SCRATCH_SUFFIXES: [&str; 2] = [".partial", ".backup"];

/// Why one candidate package was left out.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("invalid manifest: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Instantiate(#[from] InstantiateError),

    #[error("{0}")]
    Staging(#[from] CatalogError),

    #[error("loader task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Packages installed by this application.
    pub extensions_dir: PathBuf,
    /// Packages shared by every user of the machine.
    pub system_dir: PathBuf,
    pub library_dir: PathBuf,
    pub show_local: bool,
    pub show_system: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageKind {
    Local,
    System,
}

/// Finds, validates and instantiates installed catalogs.
pub struct CatalogLoader {
    config: LoaderConfig,
    registry: Arc<PluginRegistry>,
    stager: PackageStager,
    deps: Dependencies,
}

impl CatalogLoader {
    pub fn new(
        config: LoaderConfig,
        registry: Arc<PluginRegistry>,
        stager: PackageStager,
        deps: Dependencies,
    ) -> Self {
        Self {
            config,
            registry,
            stager,
            deps,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Every usable catalog: the bundled ones first, then local packages,
    /// then system packages. A package name appears at most once.
    pub async fn load_all(&self) -> Vec<CatalogLocal> {
        match self.stager.purge_stale() {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Purged stale staged packages"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge staging directory"),
        }

        let mut candidates = Vec::new();
        if self.config.show_local {
            candidates.extend(
                list_packages(&self.config.extensions_dir)
                    .into_iter()
                    .map(|(pkg, dir)| (pkg, dir, PackageKind::Local)),
            );
        }
        if self.config.show_system {
            candidates.extend(
                list_packages(&self.config.system_dir)
                    .into_iter()
                    .map(|(pkg, dir)| (pkg, dir, PackageKind::System)),
            );
        }

        let loads = candidates
            .into_iter()
            .map(|(pkg, dir, kind)| self.load_package(pkg, dir, kind));
        let loaded = join_all(loads).await;

        let mut catalogs = self.bundled();
        catalogs.extend(loaded.into_iter().flatten());
        let catalogs = deduplicate(catalogs);

        tracing::info!(count = catalogs.len(), "Loaded catalogs");
        catalogs
    }

    /// Load one package from the application's extensions directory.
    pub async fn load_local(&self, pkg_name: &str) -> Option<CatalogLocal> {
        let dir = self.config.extensions_dir.join(pkg_name);
        self.load_package(pkg_name.to_string(), dir, PackageKind::Local)
            .await
    }

    /// Load one package from the system directory.
    pub async fn load_system(&self, pkg_name: &str) -> Option<CatalogLocal> {
        let dir = self.config.system_dir.join(pkg_name);
        self.load_package(pkg_name.to_string(), dir, PackageKind::System)
            .await
    }

    fn bundled(&self) -> Vec<CatalogLocal> {
        vec![CatalogLocal {
            name: LOCAL_SOURCE_NAME.to_string(),
            description: "Read books from local storage".to_string(),
            source: Arc::new(LocalSource::new(&self.config.library_dir)),
            pkg_name: LOCAL_PKG_NAME.to_string(),
            version_name: env!("CARGO_PKG_VERSION").to_string(),
            version_code: 1,
            nsfw: false,
            icon_url: None,
            origin: CatalogOrigin::Bundled,
        }]
    }

    async fn load_package(&self, pkg_name: String, dir: PathBuf, kind: PackageKind) -> Option<CatalogLocal> {
        let job = LoadJob {
            registry: self.registry.clone(),
            stager: self.stager.clone(),
            deps: self.deps.clone(),
        };
        let pkg = pkg_name.clone();
        let outcome = tokio::task::spawn_blocking(move || job.run(&pkg, &dir, kind))
            .await
            .unwrap_or_else(|e| Err(LoadError::Task(e.to_string())));

        match outcome {
            Ok(catalog) => {
                tracing::debug!(pkg = %pkg_name, origin = catalog.origin.label(), "Catalog loaded");
                Some(catalog)
            }
            Err(e) => {
                tracing::warn!(pkg = %pkg_name, reason = %e, "Catalog rejected");
                None
            }
        }
    }
}

/// Owned state for loading one package on a blocking thread.
struct LoadJob {
    registry: Arc<PluginRegistry>,
    stager: PackageStager,
    deps: Dependencies,
}

impl LoadJob {
    fn run(self, pkg_name: &str, dir: &Path, kind: PackageKind) -> Result<CatalogLocal, LoadError> {
        let package = PackageManifest::read(dir)?.validate(pkg_name)?;

        let (load_dir, origin) = match kind {
            PackageKind::Local => (
                self.stager.stage(pkg_name, dir)?,
                CatalogOrigin::Locally {
                    install_dir: dir.to_path_buf(),
                },
            ),
            PackageKind::System => (
                dir.to_path_buf(),
                CatalogOrigin::SystemWide {
                    install_dir: dir.to_path_buf(),
                },
            ),
        };

        let preferences = Arc::new(PrefixedPreferenceStore::new(
            pkg_name,
            self.deps.preferences.clone(),
        ));
        let ctx = PluginContext {
            pkg_name,
            package_dir: &load_dir,
            deps: self.deps.scoped(preferences),
        };
        let source = self.registry.instantiate(&package.entry_point, &ctx)?;

        Ok(into_catalog(package, source, origin))
    }
}

fn into_catalog(
    package: ValidatedPackage,
    source: Arc<dyn CatalogSource>,
    origin: CatalogOrigin,
) -> CatalogLocal {
    let name = if package.name.trim().is_empty() {
        source.name().to_string()
    } else {
        package.name
    };
    CatalogLocal {
        name,
        description: package.description,
        source,
        pkg_name: package.pkg_name,
        version_name: package.version_name,
        version_code: package.version_code,
        nsfw: package.nsfw,
        icon_url: package.icon_url,
        origin,
    }
}

/// Package directories under `root`, sorted by name. Half-written installs
/// and hidden entries are ignored.
fn list_packages(root: &Path) -> Vec<(String, PathBuf)> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %root.display(), error = %e, "Cannot scan catalog directory");
            }
            return Vec::new();
        }
    };

    let mut packages: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if name.starts_with('.') || SCRATCH_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
                return None;
            }
            Some((name, entry.path()))
        })
        .collect();
    packages.sort();
    packages
}

/// First occurrence wins, by package name and then by source id.
fn deduplicate(catalogs: Vec<CatalogLocal>) -> Vec<CatalogLocal> {
    let mut packages = HashSet::new();
    let mut ids = HashSet::new();
    catalogs
        .into_iter()
        .filter(|catalog| {
            if !packages.insert(catalog.pkg_name.clone()) {
                tracing::debug!(pkg = %catalog.pkg_name, origin = catalog.origin.label(), "Skipping duplicate package");
                return false;
            }
            if !ids.insert(catalog.source_id()) {
                tracing::debug!(pkg = %catalog.pkg_name, id = catalog.source_id(), "Skipping duplicate source id");
                return false;
            }
            true
        })
        .collect()
}
