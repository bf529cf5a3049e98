use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::app::{CatalogError, Result};
use crate::catalog::changes::InstallationChanges;
use crate::catalog::loader::CatalogLoader;
use crate::domain::{CatalogLocal, CatalogOrigin, CatalogRemote, ChangeKind, ChangeTrigger, InstallationChange};
use crate::source::{CatalogSource, Dependencies, Source, UserSourceRuntime};
use crate::store::{CatalogRepository, PrefixedPreferenceStore};
use crate::usersource::UserSource;

/// An installed catalog with a newer version in the repository.
#[derive(Debug, Clone)]
pub struct CatalogUpdate {
    pub installed: CatalogLocal,
    pub available: CatalogRemote,
}

/// Every source the application can call, by id.
pub struct SourceManager {
    loader: Arc<CatalogLoader>,
    repository: Arc<dyn CatalogRepository>,
    deps: Dependencies,
    catalogs: RwLock<Vec<CatalogLocal>>,
    user_sources: RwLock<Vec<Arc<UserSourceRuntime>>>,
}

impl SourceManager {
    pub fn new(loader: Arc<CatalogLoader>, repository: Arc<dyn CatalogRepository>, deps: Dependencies) -> Self {
        Self {
            loader,
            repository,
            deps,
            catalogs: RwLock::new(Vec::new()),
            user_sources: RwLock::new(Vec::new()),
        }
    }

    /// Load installed catalogs and stored user sources.
    pub async fn init(&self) -> Result<()> {
        let catalogs = self.loader.load_all().await;
        *write(&self.catalogs) = catalogs;
        self.reload_user_sources()?;
        Ok(())
    }

    pub fn catalogs(&self) -> Vec<CatalogLocal> {
        read(&self.catalogs).clone()
    }

    pub fn catalog(&self, pkg_name: &str) -> Option<CatalogLocal> {
        read(&self.catalogs)
            .iter()
            .find(|c| c.pkg_name == pkg_name)
            .cloned()
    }

    pub fn user_sources(&self) -> Vec<Arc<UserSourceRuntime>> {
        read(&self.user_sources).clone()
    }

    /// Catalog sources first, then enabled user sources.
    pub fn sources(&self) -> Vec<Arc<dyn CatalogSource>> {
        let mut sources: Vec<Arc<dyn CatalogSource>> =
            read(&self.catalogs).iter().map(|c| c.source.clone()).collect();
        sources.extend(
            read(&self.user_sources)
                .iter()
                .map(|s| s.clone() as Arc<dyn CatalogSource>),
        );
        sources
    }

    /// Resolve a source id, failing with [`CatalogError::SourceNotFound`].
    pub fn get(&self, id: i64) -> Result<Arc<dyn CatalogSource>> {
        if let Some(catalog) = read(&self.catalogs).iter().find(|c| c.source_id() == id) {
            return Ok(catalog.source.clone());
        }
        read(&self.user_sources)
            .iter()
            .find(|s| s.id() == id)
            .map(|s| s.clone() as Arc<dyn CatalogSource>)
            .ok_or(CatalogError::SourceNotFound(id))
    }

    /// Rebuild runtimes for the enabled user sources in the repository.
    pub fn reload_user_sources(&self) -> Result<usize> {
        let runtimes: Vec<Arc<UserSourceRuntime>> = self
            .repository
            .get_user_sources()?
            .into_iter()
            .filter(|s| s.enabled)
            .map(|definition| {
                let preferences = Arc::new(PrefixedPreferenceStore::for_source(
                    definition.id(),
                    self.deps.preferences.clone(),
                ));
                Arc::new(UserSourceRuntime::new(definition, &self.deps.scoped(preferences)))
            })
            .collect();

        let count = runtimes.len();
        *write(&self.user_sources) = runtimes;
        tracing::debug!(count, "User sources loaded");
        Ok(count)
    }

    /// Store a user source and make it callable. Returns its id.
    pub fn add_user_source(&self, source: &UserSource) -> Result<i64> {
        source.validate()?;
        self.repository.save_user_source(source)?;
        self.reload_user_sources()?;
        Ok(source.id())
    }

    pub fn remove_user_source(&self, id: i64) -> Result<bool> {
        let removed = self.repository.delete_user_source(id)?;
        if removed {
            self.reload_user_sources()?;
        }
        Ok(removed)
    }

    /// Bring the loaded set in line with one installation change.
    ///
    /// A package keeps at most one entry, and a bundled or local copy is never
    /// displaced by a system-wide one. A package that fails to load leaves
    /// the loaded set as it was.
    pub async fn apply_change(&self, change: &InstallationChange) {
        let pkg = change.pkg_name.as_str();
        match change.kind {
            ChangeKind::Installed => {
                let loaded = match change.trigger {
                    ChangeTrigger::Local => match self.loader.load_local(pkg).await {
                        Some(catalog) => Some(catalog),
                        None => self.load_system_copy(pkg).await,
                    },
                    ChangeTrigger::System => self.load_system_copy(pkg).await,
                };
                match loaded {
                    Some(catalog) => self.offer(catalog),
                    None => tracing::warn!(pkg, "Installed catalog did not load, keeping the loaded set"),
                }
            }
            ChangeKind::Uninstalled => {
                let still_loaded = {
                    let mut catalogs = write(&self.catalogs);
                    catalogs.retain(|c| !(c.pkg_name == pkg && removed_by(&c.origin, change.trigger)));
                    catalogs.iter().any(|c| c.pkg_name == pkg)
                };
                if still_loaded {
                    return;
                }
                // A system copy may still be present once the local one is gone.
                let fallback = match change.trigger {
                    ChangeTrigger::Local => self.load_system_copy(pkg).await,
                    ChangeTrigger::System => None,
                };
                match fallback {
                    Some(catalog) => self.offer(catalog),
                    None => tracing::info!(pkg, "Catalog removed from loaded set"),
                }
            }
        }
    }

    async fn load_system_copy(&self, pkg: &str) -> Option<CatalogLocal> {
        if !self.loader.config().show_system {
            return None;
        }
        self.loader.load_system(pkg).await
    }

    /// Add `catalog`, replacing an entry for the same package of equal or lower precedence.
    fn offer(&self, catalog: CatalogLocal) {
        let mut catalogs = write(&self.catalogs);
        let pkg = catalog.pkg_name.clone();
        match catalogs.iter().position(|c| c.pkg_name == pkg) {
            Some(i) if precedence(&catalogs[i].origin) < precedence(&catalog.origin) => {
                tracing::debug!(
                    pkg = %pkg,
                    kept = catalogs[i].origin.label(),
                    ignored = catalog.origin.label(),
                    "Preferred copy already loaded"
                );
            }
            Some(i) => {
                tracing::info!(pkg = %pkg, origin = catalog.origin.label(), "Catalog reloaded");
                catalogs[i] = catalog;
            }
            None => {
                tracing::info!(pkg = %pkg, origin = catalog.origin.label(), "Catalog loaded");
                catalogs.push(catalog);
            }
        }
    }

    /// Apply every change published on `changes` until the bus closes.
    pub fn spawn_change_listener(self: &Arc<Self>, changes: &InstallationChanges) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut stream = changes.stream();
        tokio::spawn(async move {
            while let Some(change) = stream.next().await {
                manager.apply_change(&change).await;
            }
        })
    }

    /// Installed catalogs whose repository entry has a higher version code.
    pub fn updatable(&self, remote: &[CatalogRemote]) -> Vec<CatalogUpdate> {
        read(&self.catalogs)
            .iter()
            .filter_map(|installed| {
                remote
                    .iter()
                    .find(|r| r.pkg_name == installed.pkg_name && r.version_code > installed.version_code)
                    .map(|available| CatalogUpdate {
                        installed: installed.clone(),
                        available: available.clone(),
                    })
            })
            .collect()
    }
}

/// Lower wins: bundled, then local, then system-wide.
fn precedence(origin: &CatalogOrigin) -> u8 {
    match origin {
        CatalogOrigin::Bundled => 0,
        CatalogOrigin::Locally { .. } => 1,
        CatalogOrigin::SystemWide { .. } => 2,
    }
}

fn removed_by(origin: &CatalogOrigin, trigger: ChangeTrigger) -> bool {
    matches!(
        (origin, trigger),
        (CatalogOrigin::Locally { .. }, ChangeTrigger::Local) | (CatalogOrigin::SystemWide { .. }, ChangeTrigger::System)
    )
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
