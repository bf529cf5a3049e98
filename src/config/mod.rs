//! Configuration management for ireader-sources.
//!
//! Configuration is read from `~/.config/ireader-sources/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::BrowserConfig;
use crate::source::DEFAULT_USER_AGENT;

pub const APP_DIR_NAME: &str = "ireader-sources";
pub const DEFAULT_REPOSITORY_URL: &str =
    "https://raw.githubusercontent.com/IReaderorg/IReader-extensions/repov2/index.min.json";

/// Main configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub browser: BrowserConfig,
    pub catalogs: CatalogsConfig,
    pub downloads: DownloadsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Sent on every request unless a source overrides it
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Keep cookies between requests
    pub cookies: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            cookies: true,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogsConfig {
    /// JSON index of installable catalogs
    pub repository_url: String,
    /// Skip the index fetch when the last successful sync is this recent
    pub sync_cooldown_secs: u64,
    pub show_local: bool,
    pub show_system: bool,
    /// Catalogs installed by this application
    pub extensions_dir: Option<PathBuf>,
    /// Shared catalogs installed for every user
    pub system_dir: Option<PathBuf>,
    /// Verified copies that packages are loaded from
    pub staging_dir: Option<PathBuf>,
    /// Books read by the local source
    pub library_dir: Option<PathBuf>,
}

impl Default for CatalogsConfig {
    fn default() -> Self {
        Self {
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
            sync_cooldown_secs: 300,
            show_local: true,
            show_system: true,
            extensions_dir: None,
            system_dir: None,
            staging_dir: None,
            library_dir: None,
        }
    }
}

impl CatalogsConfig {
    pub fn sync_cooldown(&self) -> Duration {
        Duration::from_secs(self.sync_cooldown_secs)
    }

    pub fn extensions_dir(&self, data_dir: &Path) -> PathBuf {
        self.extensions_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("extensions"))
    }

    pub fn staging_dir(&self, data_dir: &Path) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("staging"))
    }

    pub fn library_dir(&self, data_dir: &Path) -> PathBuf {
        self.library_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("library"))
    }

    pub fn system_dir(&self) -> PathBuf {
        self.system_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/usr/share").join(APP_DIR_NAME).join("extensions"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    /// Jobs waiting for the download worker before senders wait
    pub queue_size: usize,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self { queue_size: 16 }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    /// `~/.config/ireader-sources/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_DIR_NAME).join("config.toml"))
    }

    /// `~/.local/share/ireader-sources` on Linux.
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join(APP_DIR_NAME))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> String {
        format!(
            r##"# ireader-sources configuration
#
# Paths left unset default to directories under the platform data
# directory (~/.local/share/ireader-sources on Linux).

[http]
# Request timeout in seconds
timeout_secs = 30
# Keep cookies between requests
cookies = true
# user_agent = "Mozilla/5.0 ..."

[browser]
# Render script-heavy or protected pages with headless Chrome
enabled = false
headless = true
# Hard limit for one page render in seconds
timeout_secs = 30
# Wait time after page load for dynamic content (milliseconds)
wait_after_load_ms = 1000

[catalogs]
repository_url = "{repository}"
# Minimum seconds between two index downloads
sync_cooldown_secs = 300
show_local = true
show_system = true
# extensions_dir = "/path/to/extensions"
# system_dir = "/usr/share/ireader-sources/extensions"
# staging_dir = "/path/to/staging"
# library_dir = "/path/to/library"

[downloads]
queue_size = 16
"##,
            repository = DEFAULT_REPOSITORY_URL
        )
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert_eq!(config, Config::default());
        assert_eq!(config.catalogs.sync_cooldown(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
[catalogs]
sync_cooldown_secs = 60
library_dir = "/srv/books"
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.catalogs.sync_cooldown_secs, 60);
        assert_eq!(
            config.catalogs.library_dir(Path::new("/data")),
            PathBuf::from("/srv/books")
        );
        assert_eq!(config.catalogs.repository_url, DEFAULT_REPOSITORY_URL);
        assert_eq!(config.http.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert!(!config.browser.enabled);
        assert_eq!(config.downloads.queue_size, 16);
        assert_eq!(
            config.catalogs.extensions_dir(Path::new("/data")),
            PathBuf::from("/data/extensions")
        );
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_invalid_config_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[http\ntimeout_secs = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
