//! Installed catalogs: discovery, validation, installation and the remote index.

pub mod changes;
pub mod installer;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod staging;
pub mod sync;

pub use changes::InstallationChanges;
pub use installer::{CatalogInstaller, PackageBundle};
pub use loader::{CatalogLoader, LoaderConfig, LOCAL_PKG_NAME};
pub use manager::{CatalogUpdate, SourceManager};
pub use manifest::{PackageManifest, ValidatedPackage, ValidationError};
pub use registry::{InstantiateError, PluginContext, PluginRegistry};
pub use staging::PackageStager;
pub use sync::{RemoteCatalogSync, SyncOutcome};
