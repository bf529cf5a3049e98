use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::{CatalogSource, Source};

/// Where an installed catalog was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogOrigin {
    /// Compiled into the binary.
    Bundled,
    /// Installed into the app-private extensions directory.
    Locally { install_dir: PathBuf },
    /// Found in the shared, system-wide extensions directory.
    SystemWide { install_dir: PathBuf },
}

impl CatalogOrigin {
    pub fn label(&self) -> &'static str {
        match self {
            CatalogOrigin::Bundled => "bundled",
            CatalogOrigin::Locally { .. } => "local",
            CatalogOrigin::SystemWide { .. } => "system",
        }
    }
}

/// A catalog whose source is loaded and callable.
#[derive(Clone)]
pub struct CatalogLocal {
    pub name: String,
    pub description: String,
    pub source: Arc<dyn CatalogSource>,
    pub pkg_name: String,
    pub version_name: String,
    pub version_code: i64,
    pub nsfw: bool,
    pub icon_url: Option<String>,
    pub origin: CatalogOrigin,
}

impl CatalogLocal {
    pub fn source_id(&self) -> i64 {
        self.source.id()
    }

    pub fn lang(&self) -> &str {
        self.source.lang()
    }
}

impl fmt::Debug for CatalogLocal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogLocal")
            .field("name", &self.name)
            .field("pkg_name", &self.pkg_name)
            .field("version_name", &self.version_name)
            .field("version_code", &self.version_code)
            .field("source_id", &self.source.id())
            .field("origin", &self.origin)
            .finish()
    }
}

/// An installable catalog advertised by the remote repository index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRemote {
    pub source_id: i64,
    pub name: String,
    pub description: String,
    pub pkg_name: String,
    pub version_name: String,
    pub version_code: i64,
    pub lang: String,
    pub pkg_url: String,
    pub icon_url: String,
    pub nsfw: bool,
}

/// Persisted record of a catalog installed through the installer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledCatalog {
    pub pkg_name: String,
    pub name: String,
    pub version_name: String,
    pub version_code: i64,
    pub install_dir: PathBuf,
    pub installed_at: DateTime<Utc>,
}

impl InstalledCatalog {
    pub fn new(
        pkg_name: impl Into<String>,
        name: impl Into<String>,
        version_name: impl Into<String>,
        version_code: i64,
        install_dir: PathBuf,
    ) -> Self {
        Self {
            pkg_name: pkg_name.into(),
            name: name.into(),
            version_name: version_name.into(),
            version_code,
            install_dir,
            installed_at: Utc::now(),
        }
    }
}
