use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::app::{CatalogError, Result};

/// Copies downloaded packages into a staging directory before they are loaded.
///
/// Staged files are read-only and must hash to the same digests as the
/// originals. Any failure removes the staged copy and refuses the package.
#[derive(Debug, Clone)]
pub struct PackageStager {
    staging_dir: PathBuf,
}

impl PackageStager {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Remove every previously staged package. Returns how many were removed.
    pub fn purge_stale(&self) -> Result<usize> {
        if !self.staging_dir.exists() {
            fs::create_dir_all(&self.staging_dir)?;
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.staging_dir)? {
            let path = entry?.path();
            let outcome = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match outcome {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to purge staged package"),
            }
        }
        Ok(removed)
    }

    /// Stage `package_dir` as `pkg_name` and return the staged directory.
    pub fn stage(&self, pkg_name: &str, package_dir: &Path) -> Result<PathBuf> {
        let target = self.staging_dir.join(pkg_name);
        match self.copy_verified(package_dir, &target) {
            Ok(()) => Ok(target),
            Err(e) => {
                if target.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&target) {
                        tracing::warn!(path = %target.display(), error = %cleanup, "Failed to remove partial staging copy");
                    }
                }
                Err(CatalogError::InvalidCatalog {
                    pkg: pkg_name.to_string(),
                    reason: format!("staging failed: {}", e),
                })
            }
        }
    }

    fn copy_verified(&self, source: &Path, target: &Path) -> Result<()> {
        let expected = digest_tree(source)?;
        if expected.is_empty() {
            return Err(CatalogError::Other("package is empty".into()));
        }

        if target.exists() {
            fs::remove_dir_all(target)?;
        }
        fs::create_dir_all(target)?;

        for relative in expected.keys() {
            let destination = target.join(relative);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(source.join(relative), &destination)?;

            let mut permissions = fs::metadata(&destination)?.permissions();
            permissions.set_readonly(true);
            fs::set_permissions(&destination, permissions)?;
        }

        let staged = digest_tree(target)?;
        if staged != expected {
            return Err(CatalogError::Other("staged copy does not match the package".into()));
        }
        Ok(())
    }
}

/// SHA-256 of every regular file under `root`, keyed by relative path.
fn digest_tree(root: &Path) -> Result<BTreeMap<PathBuf, String>> {
    let mut digests = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let bytes = fs::read(&path)?;
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| CatalogError::Other(e.to_string()))?
                    .to_path_buf();
                digests.insert(relative, hex::encode(Sha256::digest(&bytes)));
            }
        }
    }
    Ok(digests)
}
