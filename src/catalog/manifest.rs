//! Catalog package metadata.
//!
//! Every package directory carries a `manifest.toml`:
//!
//! ```toml
//! package = "ireader.novelfull.en"
//! name = "NovelFull"
//! version_name = "2.1"
//! version_code = 3
//! features = ["ireader"]
//!
//! [metadata]
//! "source.class" = "ireader.rules.UserSource"
//! "source.description" = "Novels from novelfull"
//! "source.nsfw" = false
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.toml";

/// Feature a package must declare to be treated as a catalog.
pub const EXTENSION_FEATURE: &str = "ireader";

/// Library major versions this build can load.
pub const LIB_VERSION_MIN: u32 = 2;
pub const LIB_VERSION_MAX: u32 = 2;

const METADATA_SOURCE_CLASS: &str = "source.class";
const METADATA_DESCRIPTION: &str = "source.description";
const METADATA_NSFW: &str = "source.nsfw";
const METADATA_ICON: &str = "source.icon";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("manifest unreadable: {0}")]
    Unreadable(String),

    #[error("missing feature flag \"ireader\"")]
    MissingFeature,

    #[error("package name mismatch: expected {expected}, manifest declares {declared}")]
    PackageMismatch { expected: String, declared: String },

    #[error("version name {0:?} has no numeric major version")]
    BadVersionName(String),

    #[error("unsupported library version {found} (supported 2..=2)")]
    UnsupportedLibVersion { found: u32 },

    #[error("no entry point declared in metadata")]
    MissingEntryPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub package: String,
    pub name: String,
    pub version_name: String,
    pub version_code: i64,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, toml::Value>,
}

/// A manifest that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPackage {
    pub pkg_name: String,
    pub name: String,
    pub version_name: String,
    pub version_code: i64,
    pub lib_version: u32,
    /// Fully qualified entry point name.
    pub entry_point: String,
    pub description: String,
    pub nsfw: bool,
    pub icon_url: Option<String>,
}

impl PackageManifest {
    pub fn parse(content: &str) -> Result<Self, ValidationError> {
        toml::from_str(content).map_err(|e| ValidationError::Unreadable(e.to_string()))
    }

    pub fn read(package_dir: &Path) -> Result<Self, ValidationError> {
        let path = package_dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path)
            .map_err(|e| ValidationError::Unreadable(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Checks the manifest of the package expected to be `pkg_name`.
    pub fn validate(&self, pkg_name: &str) -> Result<ValidatedPackage, ValidationError> {
        if !self.features.iter().any(|f| f == EXTENSION_FEATURE) {
            return Err(ValidationError::MissingFeature);
        }

        if self.package != pkg_name {
            return Err(ValidationError::PackageMismatch {
                expected: pkg_name.to_string(),
                declared: self.package.clone(),
            });
        }

        let lib_version = lib_major_version(&self.version_name)
            .ok_or_else(|| ValidationError::BadVersionName(self.version_name.clone()))?;
        if !(LIB_VERSION_MIN..=LIB_VERSION_MAX).contains(&lib_version) {
            return Err(ValidationError::UnsupportedLibVersion { found: lib_version });
        }

        let class = self
            .metadata_str(METADATA_SOURCE_CLASS)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(ValidationError::MissingEntryPoint)?;
        let entry_point = if class.starts_with('.') {
            format!("{}{}", self.package, class)
        } else {
            class.to_string()
        };

        Ok(ValidatedPackage {
            pkg_name: self.package.clone(),
            name: self.name.clone(),
            version_name: self.version_name.clone(),
            version_code: self.version_code,
            lib_version,
            entry_point,
            description: self
                .metadata_str(METADATA_DESCRIPTION)
                .unwrap_or_default()
                .to_string(),
            nsfw: self.metadata_flag(METADATA_NSFW),
            icon_url: self.metadata_str(METADATA_ICON).map(str::to_string),
        })
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Accepts `true`, `1` or their string forms.
    fn metadata_flag(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(toml::Value::Boolean(b)) => *b,
            Some(toml::Value::Integer(i)) => *i == 1,
            Some(toml::Value::String(s)) => matches!(s.trim(), "1" | "true"),
            _ => false,
        }
    }
}

fn lib_major_version(version_name: &str) -> Option<u32> {
    version_name.trim().split('.').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
package = "ireader.novelfull.en"
name = "NovelFull"
version_name = "2.1"
version_code = 3
features = ["ireader"]

[metadata]
"source.class" = "ireader.rules.UserSource"
"source.description" = "Novels from novelfull"
"source.nsfw" = 1
"#;

    fn manifest() -> PackageManifest {
        PackageManifest::parse(MANIFEST).unwrap()
    }

    #[test]
    fn test_valid_manifest() {
        let package = manifest().validate("ireader.novelfull.en").unwrap();
        assert_eq!(package.entry_point, "ireader.rules.UserSource");
        assert_eq!(package.lib_version, 2);
        assert_eq!(package.description, "Novels from novelfull");
        assert!(package.nsfw);
        assert_eq!(package.icon_url, None);
    }

    #[test]
    fn test_missing_feature_is_rejected() {
        let mut m = manifest();
        m.features = vec!["tachiyomi".into()];
        assert_eq!(
            m.validate("ireader.novelfull.en"),
            Err(ValidationError::MissingFeature)
        );
    }

    #[test]
    fn test_spoofed_package_name_is_rejected() {
        let err = manifest().validate("ireader.other.en").unwrap_err();
        assert!(matches!(err, ValidationError::PackageMismatch { .. }));
    }

    #[test]
    fn test_library_version_range() {
        let mut m = manifest();
        m.version_name = "1.4".into();
        assert_eq!(
            m.validate("ireader.novelfull.en"),
            Err(ValidationError::UnsupportedLibVersion { found: 1 })
        );

        m.version_name = "3.0".into();
        assert_eq!(
            m.validate("ireader.novelfull.en"),
            Err(ValidationError::UnsupportedLibVersion { found: 3 })
        );

        m.version_name = "beta".into();
        assert!(matches!(
            m.validate("ireader.novelfull.en"),
            Err(ValidationError::BadVersionName(_))
        ));
    }

    #[test]
    fn test_missing_entry_point() {
        let mut m = manifest();
        m.metadata.remove("source.class");
        assert_eq!(
            m.validate("ireader.novelfull.en"),
            Err(ValidationError::MissingEntryPoint)
        );
    }

    #[test]
    fn test_relative_entry_point_uses_package_name() {
        let mut m = manifest();
        m.metadata
            .insert("source.class".into(), toml::Value::String(".NovelFull".into()));
        let package = m.validate("ireader.novelfull.en").unwrap();
        assert_eq!(package.entry_point, "ireader.novelfull.en.NovelFull");
    }

    #[test]
    fn test_unparseable_manifest() {
        assert!(matches!(
            PackageManifest::parse("package = "),
            Err(ValidationError::Unreadable(_))
        ));
    }
}
