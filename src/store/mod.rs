pub mod preferences;
pub mod sqlite;

use crate::app::Result;
use crate::domain::{CatalogRemote, ChapterInfo, InstalledCatalog, Page};
use crate::usersource::UserSource;

pub use preferences::{PreferenceStore, PreferenceStoreExt, PrefixedPreferenceStore};
pub use sqlite::SqliteStore;

/// Persistent records the catalog layer keeps between runs.
pub trait CatalogRepository: Send + Sync {
    // Installed catalogs
    fn upsert_installed(&self, catalog: &InstalledCatalog) -> Result<()>;
    fn get_installed(&self, pkg_name: &str) -> Result<Option<InstalledCatalog>>;
    fn get_all_installed(&self) -> Result<Vec<InstalledCatalog>>;
    /// Returns whether a record was removed.
    fn delete_installed(&self, pkg_name: &str) -> Result<bool>;

    // Remote index cache
    /// Replaces the whole cache in one transaction.
    fn replace_remote_catalogs(&self, catalogs: &[CatalogRemote]) -> Result<()>;
    fn get_remote_catalogs(&self) -> Result<Vec<CatalogRemote>>;

    // User-defined sources
    fn save_user_source(&self, source: &UserSource) -> Result<()>;
    fn get_user_source(&self, source_id: i64) -> Result<Option<UserSource>>;
    fn get_user_sources(&self) -> Result<Vec<UserSource>>;
    fn delete_user_source(&self, source_id: i64) -> Result<bool>;

    // Downloaded chapter content
    fn save_chapter_content(&self, source_id: i64, chapter: &ChapterInfo, pages: &[Page]) -> Result<()>;
    fn get_chapter_content(&self, source_id: i64, chapter_key: &str) -> Result<Option<Vec<Page>>>;
    fn is_chapter_downloaded(&self, source_id: i64, chapter_key: &str) -> Result<bool>;
}
