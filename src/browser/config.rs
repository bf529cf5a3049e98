use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the headless browser used on script-heavy or protected sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Launch a browser when a source asks for one (default: false)
    pub enabled: bool,

    /// Whether to run the browser in headless mode (default: true)
    pub headless: bool,

    /// Hard limit for one page render in seconds (default: 30)
    pub timeout_secs: u64,

    /// Wait time after the page is ready, in milliseconds (default: 1000)
    pub wait_after_load_ms: u64,

    /// Interval between checks for the awaited selector, in milliseconds (default: 250)
    pub poll_interval_ms: u64,

    /// Chrome or Chromium binary, found on PATH when unset
    pub executable: Option<PathBuf>,

    /// User agent used when the request does not bring its own
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            headless: true,
            timeout_secs: 30,
            wait_after_load_ms: 1000,
            poll_interval_ms: 250,
            executable: None,
            user_agent: None,
        }
    }
}

impl BrowserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn wait_after_load(&self) -> Duration {
        Duration::from_millis(self.wait_after_load_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    /// Shorter waits, for sites that render quickly.
    pub fn fast() -> Self {
        Self {
            timeout_secs: 15,
            wait_after_load_ms: 300,
            ..Default::default()
        }
    }

    /// Longer waits, for challenge pages that take a while to clear.
    pub fn thorough() -> Self {
        Self {
            timeout_secs: 60,
            wait_after_load_ms: 3000,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = BrowserConfig::default();
        assert!(!config.enabled);
        assert!(config.headless);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.wait_after_load_ms, 1000);
        assert!(config.executable.is_none());
    }

    #[test]
    fn test_presets() {
        assert_eq!(BrowserConfig::fast().timeout(), Duration::from_secs(15));
        assert_eq!(BrowserConfig::thorough().wait_after_load(), Duration::from_millis(3000));
        assert!(BrowserConfig::thorough().headless);
    }

    #[test]
    fn test_poll_interval_has_floor() {
        let config = BrowserConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_partial_toml() {
        let config: BrowserConfig = toml::from_str("enabled = true\ntimeout_secs = 5").unwrap();
        assert!(config.enabled);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.poll_interval_ms, 250);
    }
}
