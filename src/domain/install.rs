use std::fmt;

use serde::{Deserialize, Serialize};

/// Progress of one install or uninstall operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallStep {
    Downloading,
    Idle,
    Installing,
    Success,
    Aborted,
    Completed,
    Error(String),
}

impl InstallStep {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallStep::Success | InstallStep::Aborted | InstallStep::Completed | InstallStep::Error(_)
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, InstallStep::Error(_))
    }
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallStep::Downloading => write!(f, "downloading"),
            InstallStep::Idle => write!(f, "idle"),
            InstallStep::Installing => write!(f, "installing"),
            InstallStep::Success => write!(f, "installed"),
            InstallStep::Aborted => write!(f, "aborted"),
            InstallStep::Completed => write!(f, "completed"),
            InstallStep::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Installed,
    Uninstalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTrigger {
    /// Caused by this application's installer.
    Local,
    /// Observed from outside, e.g. a package dropped into the system directory.
    System,
}

/// Event broadcast whenever the set of installed catalogs changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationChange {
    pub pkg_name: String,
    pub kind: ChangeKind,
    pub trigger: ChangeTrigger,
}

impl InstallationChange {
    pub fn installed(pkg_name: impl Into<String>, trigger: ChangeTrigger) -> Self {
        Self {
            pkg_name: pkg_name.into(),
            kind: ChangeKind::Installed,
            trigger,
        }
    }

    pub fn uninstalled(pkg_name: impl Into<String>, trigger: ChangeTrigger) -> Self {
        Self {
            pkg_name: pkg_name.into(),
            kind: ChangeKind::Uninstalled,
            trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_steps() {
        assert!(!InstallStep::Downloading.is_terminal());
        assert!(!InstallStep::Idle.is_terminal());
        assert!(!InstallStep::Installing.is_terminal());
        assert!(InstallStep::Success.is_terminal());
        assert!(InstallStep::Aborted.is_terminal());
        assert!(InstallStep::Completed.is_terminal());
        assert!(InstallStep::Error("boom".into()).is_terminal());
    }

    #[test]
    fn test_aborted_is_not_an_error() {
        assert!(!InstallStep::Aborted.is_error());
        assert!(InstallStep::Error("x".into()).is_error());
    }
}
