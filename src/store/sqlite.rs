use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};
use tokio::sync::broadcast;

use crate::app::{CatalogError, Result};
use crate::domain::{CatalogRemote, ChapterInfo, InstalledCatalog, Page};
use crate::store::{CatalogRepository, PreferenceStore};
use crate::usersource::UserSource;

const PREFERENCE_CHANNEL_CAPACITY: usize = 64;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    preference_changes: broadcast::Sender<String>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let (preference_changes, _) = broadcast::channel(PREFERENCE_CHANNEL_CAPACITY);
        let store = Self {
            conn: Mutex::new(conn),
            preference_changes,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.lock()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| CatalogError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            CatalogError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn installed_from_row(row: &Row<'_>) -> rusqlite::Result<InstalledCatalog> {
        Ok(InstalledCatalog {
            pkg_name: row.get(0)?,
            name: row.get(1)?,
            version_name: row.get(2)?,
            version_code: row.get(3)?,
            install_dir: PathBuf::from(row.get::<_, String>(4)?),
            installed_at: row
                .get::<_, String>(5)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }

    fn remote_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogRemote> {
        Ok(CatalogRemote {
            pkg_name: row.get(0)?,
            source_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            version_name: row.get(4)?,
            version_code: row.get(5)?,
            lang: row.get(6)?,
            pkg_url: row.get(7)?,
            icon_url: row.get(8)?,
            nsfw: row.get(9)?,
        })
    }

    /// Definitions that no longer decode are skipped with a warning.
    fn decode_user_source(source_id: i64, definition: &str) -> Option<UserSource> {
        match serde_json::from_str(definition) {
            Ok(source) => Some(source),
            Err(e) => {
                tracing::warn!(source_id, error = %e, "Stored user source does not decode");
                None
            }
        }
    }

    fn notify(&self, key: &str) {
        // No receivers is fine.
        let _ = self.preference_changes.send(key.to_string());
    }
}

impl CatalogRepository for SqliteStore {
    fn upsert_installed(&self, catalog: &InstalledCatalog) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO installed_catalogs
                 (pkg_name, name, version_name, version_code, install_dir, installed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(pkg_name) DO UPDATE SET
                 name = excluded.name,
                 version_name = excluded.version_name,
                 version_code = excluded.version_code,
                 install_dir = excluded.install_dir,
                 installed_at = excluded.installed_at",
            params![
                catalog.pkg_name,
                catalog.name,
                catalog.version_name,
                catalog.version_code,
                catalog.install_dir.to_string_lossy(),
                catalog.installed_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get_installed(&self, pkg_name: &str) -> Result<Option<InstalledCatalog>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                "SELECT pkg_name, name, version_name, version_code, install_dir, installed_at
                 FROM installed_catalogs WHERE pkg_name = ?1",
                params![pkg_name],
                Self::installed_from_row,
            )
            .optional()?;
        Ok(result)
    }

    fn get_all_installed(&self) -> Result<Vec<InstalledCatalog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT pkg_name, name, version_name, version_code, install_dir, installed_at
             FROM installed_catalogs ORDER BY pkg_name",
        )?;
        let catalogs = stmt
            .query_map([], Self::installed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(catalogs)
    }

    fn delete_installed(&self, pkg_name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM installed_catalogs WHERE pkg_name = ?1",
            params![pkg_name],
        )?;
        Ok(removed > 0)
    }

    fn replace_remote_catalogs(&self, catalogs: &[CatalogRemote]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM remote_catalogs", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO remote_catalogs
                     (pkg_name, source_id, name, description, version_name, version_code,
                      lang, pkg_url, icon_url, nsfw)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for catalog in catalogs {
                stmt.execute(params![
                    catalog.pkg_name,
                    catalog.source_id,
                    catalog.name,
                    catalog.description,
                    catalog.version_name,
                    catalog.version_code,
                    catalog.lang,
                    catalog.pkg_url,
                    catalog.icon_url,
                    catalog.nsfw
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_remote_catalogs(&self) -> Result<Vec<CatalogRemote>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT pkg_name, source_id, name, description, version_name, version_code,
                    lang, pkg_url, icon_url, nsfw
             FROM remote_catalogs ORDER BY lang, name",
        )?;
        let catalogs = stmt
            .query_map([], Self::remote_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(catalogs)
    }

    fn save_user_source(&self, source: &UserSource) -> Result<()> {
        let definition = serde_json::to_string(source)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO user_sources (source_id, name, definition, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                source.id(),
                source.source_name,
                definition,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get_user_source(&self, source_id: i64) -> Result<Option<UserSource>> {
        let conn = self.lock()?;
        let definition: Option<String> = conn
            .query_row(
                "SELECT definition FROM user_sources WHERE source_id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(definition.and_then(|d| Self::decode_user_source(source_id, &d)))
    }

    fn get_user_sources(&self) -> Result<Vec<UserSource>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT source_id, definition FROM user_sources ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, definition)| Self::decode_user_source(id, &definition))
            .collect())
    }

    fn delete_user_source(&self, source_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM user_sources WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(removed > 0)
    }

    fn save_chapter_content(&self, source_id: i64, chapter: &ChapterInfo, pages: &[Page]) -> Result<()> {
        let encoded = serde_json::to_string(pages)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO chapter_contents
                 (source_id, chapter_key, chapter_name, pages, downloaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source_id,
                chapter.key,
                chapter.name,
                encoded,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_chapter_content(&self, source_id: i64, chapter_key: &str) -> Result<Option<Vec<Page>>> {
        let conn = self.lock()?;
        let encoded: Option<String> = conn
            .query_row(
                "SELECT pages FROM chapter_contents WHERE source_id = ?1 AND chapter_key = ?2",
                params![source_id, chapter_key],
                |row| row.get(0),
            )
            .optional()?;

        match encoded {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn is_chapter_downloaded(&self, source_id: i64, chapter_key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chapter_contents WHERE source_id = ?1 AND chapter_key = ?2",
            params![source_id, chapter_key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl PreferenceStore for SqliteStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let removed = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM preferences WHERE key = ?1", params![key])?
        };
        if removed > 0 {
            self.notify(key);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM preferences ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn changes(&self) -> BoxStream<'static, String> {
        let rx = self.preference_changes.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(key) => return Some((key, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Preference listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(pkg: &str, lang: &str, code: i64) -> CatalogRemote {
        CatalogRemote {
            source_id: code * 10,
            name: format!("{} name", pkg),
            description: String::new(),
            pkg_name: pkg.to_string(),
            version_name: format!("1.{}", code),
            version_code: code,
            lang: lang.to_string(),
            pkg_url: format!("https://repo.example.com/{}.json", pkg),
            icon_url: String::new(),
            nsfw: false,
        }
    }

    #[test]
    fn test_installed_upsert_and_delete() {
        let store = SqliteStore::in_memory().unwrap();
        let mut record = InstalledCatalog::new(
            "ireader.novelfull.en",
            "NovelFull",
            "1.0",
            1,
            PathBuf::from("/tmp/ext/ireader.novelfull.en"),
        );
        store.upsert_installed(&record).unwrap();

        record.version_code = 2;
        record.version_name = "1.1".into();
        store.upsert_installed(&record).unwrap();

        let all = store.get_all_installed().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version_code, 2);

        let fetched = store.get_installed("ireader.novelfull.en").unwrap().unwrap();
        assert_eq!(fetched.install_dir, record.install_dir);

        assert!(store.delete_installed("ireader.novelfull.en").unwrap());
        assert!(!store.delete_installed("ireader.novelfull.en").unwrap());
        assert!(store.get_installed("ireader.novelfull.en").unwrap().is_none());
    }

    #[test]
    fn test_replace_remote_catalogs_drops_old_entries() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .replace_remote_catalogs(&[remote("a", "en", 1), remote("b", "en", 1)])
            .unwrap();
        store.replace_remote_catalogs(&[remote("c", "ko", 3)]).unwrap();

        let cached = store.get_remote_catalogs().unwrap();
        assert_eq!(cached, vec![remote("c", "ko", 3)]);
    }

    #[test]
    fn test_user_sources_are_stored_by_id() {
        let store = SqliteStore::in_memory().unwrap();
        let source = UserSource::new("Example", "https://example.com", "en");
        store.save_user_source(&source).unwrap();
        store.save_user_source(&source).unwrap();

        let all = store.get_user_sources().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source_name, "Example");
        assert!(store.get_user_source(source.id()).unwrap().is_some());

        assert!(store.delete_user_source(source.id()).unwrap());
        assert!(store.get_user_sources().unwrap().is_empty());
    }

    #[test]
    fn test_chapter_content_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let chapter = ChapterInfo::new("/novel/1", "Chapter 1");
        let pages = vec![Page::text("First line"), Page::text("Second line")];

        assert!(!store.is_chapter_downloaded(7, "/novel/1").unwrap());
        store.save_chapter_content(7, &chapter, &pages).unwrap();

        assert!(store.is_chapter_downloaded(7, "/novel/1").unwrap());
        assert_eq!(store.get_chapter_content(7, "/novel/1").unwrap(), Some(pages));
        assert_eq!(store.get_chapter_content(8, "/novel/1").unwrap(), None);
    }

    #[test]
    fn test_preferences_overwrite_and_remove() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_raw("theme", "dark").unwrap();
        store.set_raw("theme", "light").unwrap();
        assert_eq!(store.get_raw("theme").unwrap().as_deref(), Some("light"));
        assert_eq!(store.keys().unwrap(), vec!["theme"]);

        store.remove("theme").unwrap();
        assert_eq!(store.get_raw("theme").unwrap(), None);
    }

    #[tokio::test]
    async fn test_preference_changes_are_broadcast() {
        let store = SqliteStore::in_memory().unwrap();
        let mut changes = store.changes();

        store.set_raw("a", "1").unwrap();
        store.remove("missing").unwrap();
        store.remove("a").unwrap();

        assert_eq!(changes.next().await.as_deref(), Some("a"));
        assert_eq!(changes.next().await.as_deref(), Some("a"));
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalogs.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.set_raw("k", "v").unwrap();
        }
        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(reopened.get_raw("k").unwrap().as_deref(), Some("v"));
    }
}
