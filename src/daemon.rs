//! Background daemon that keeps the remote catalog index fresh.
//!
//! Each cycle syncs the repository index and reports installed catalogs
//! that have a newer version available.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::interval;

use crate::app::{AppContext, CatalogError, Result};
use crate::catalog::SyncOutcome;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Sync interval in seconds (default: 3600 = 1 hour)
    pub sync_interval_secs: u64,
    /// Whether to sync immediately on start
    pub sync_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 3600,
            sync_on_start: true,
        }
    }
}

/// Interval suffixes, largest first.
const UNITS: [(char, u64); 4] = [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];

impl DaemonConfig {
    /// Parse an interval such as `"1h"`, `"30m"`, `"1d"` or plain seconds.
    pub fn parse_interval(s: &str) -> std::result::Result<u64, String> {
        let s = s.trim().to_lowercase();
        let (digits, factor) = UNITS
            .iter()
            .find_map(|&(suffix, factor)| s.strip_suffix(suffix).map(|d| (d, factor)))
            .unwrap_or((s.as_str(), 1));

        match digits.parse::<u64>() {
            Ok(value) if value > 0 => Ok(value.saturating_mul(factor)),
            _ => Err(format!("Invalid interval '{}', expected e.g. 30m, 6h or 1d", s)),
        }
    }

    /// Largest unit that divides `secs` evenly.
    pub fn format_interval(secs: u64) -> String {
        UNITS
            .iter()
            .find(|&&(_, factor)| secs >= factor && secs % factor == 0)
            .map(|&(suffix, factor)| format!("{}{}", secs / factor, suffix))
            .unwrap_or_else(|| format!("{}s", secs))
    }
}

pub struct Daemon {
    ctx: Arc<AppContext>,
    config: DaemonConfig,
    shutdown: Arc<Notify>,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>, config: DaemonConfig) -> Self {
        Self {
            ctx,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join(crate::config::APP_DIR_NAME).join("daemon.pid"))
    }

    /// Whether another daemon's PID file points at a live process.
    pub fn is_running() -> bool {
        let pid = Self::pid_file_path()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|content| content.trim().parse::<u32>().ok());
        pid.is_some_and(Self::process_exists)
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn write_pid_file(&self) -> std::io::Result<()> {
        if let Some(pid_path) = Self::pid_file_path() {
            if let Some(parent) = pid_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&pid_path)?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(())
    }

    fn remove_pid_file(&self) {
        if let Some(pid_path) = Self::pid_file_path() {
            let _ = fs::remove_file(pid_path);
        }
    }

    pub async fn run(&self) -> Result<()> {
        if Self::is_running() {
            return Err(CatalogError::Other(
                "Another daemon instance is already running".to_string(),
            ));
        }

        self.write_pid_file()
            .map_err(|e| CatalogError::Other(format!("Failed to write PID file: {}", e)))?;

        tracing::info!(
            interval = %DaemonConfig::format_interval(self.config.sync_interval_secs),
            pid = std::process::id(),
            "Catalog sync daemon started"
        );

        if self.config.sync_on_start {
            self.run_sync().await;
        }

        let mut timer = interval(Duration::from_secs(self.config.sync_interval_secs.max(1)));
        timer.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = timer.tick() => self.run_sync().await,
                _ = self.shutdown.notified() => break,
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                    }
                    break;
                }
            }
        }

        tracing::info!("Daemon shutting down");
        self.remove_pid_file();
        Ok(())
    }

    /// One sync cycle. Failures are logged; the next cycle tries again.
    pub async fn run_sync(&self) {
        match self.ctx.sync.refresh(false).await {
            Ok(SyncOutcome::Skipped) => {
                tracing::debug!("Index still fresh");
                return;
            }
            Ok(SyncOutcome::Refreshed(count)) => tracing::info!(count, "Index synced"),
            Err(e) => {
                tracing::warn!(error = %e, "Index sync failed");
                return;
            }
        }

        let remote = match self.ctx.sync.cached() {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cached index");
                return;
            }
        };
        for update in self.ctx.manager.updatable(&remote) {
            tracing::info!(
                pkg = %update.installed.pkg_name,
                installed = %update.installed.version_name,
                available = %update.available.version_name,
                "Catalog update available"
            );
        }
    }

    /// Ask a running [`Daemon::run`] to return after the current cycle.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}
