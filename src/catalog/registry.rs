use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::source::{CatalogSource, Dependencies, FactorySource, UserSourceRuntime};
use crate::usersource::UserSource;

pub const USER_SOURCE_ENTRY: &str = "ireader.rules.UserSource";
pub const FACTORY_SOURCE_ENTRY: &str = "ireader.rules.FactorySource";

/// Definition file read by the [`USER_SOURCE_ENTRY`] plugin.
pub const USER_SOURCE_FILE: &str = "source.json";
/// Definition file read by the [`FACTORY_SOURCE_ENTRY`] plugin.
pub const FACTORY_SOURCE_FILE: &str = "factory.json";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstantiateError {
    #[error("entry point {0} is not registered")]
    ClassNotFound(String),

    #[error("entry point {class} cannot be built from this package: {reason}")]
    ConstructorMismatch { class: String, reason: String },

    #[error("entry point {class} failed: {reason}")]
    ConstructionFailed { class: String, reason: String },

    #[error("entry point {class} panicked during construction")]
    Panicked { class: String },
}

/// What a plugin factory gets to build its source from.
pub struct PluginContext<'a> {
    pub pkg_name: &'a str,
    pub package_dir: &'a Path,
    /// Preferences already scoped to `pkg_name`.
    pub deps: Dependencies,
}

pub type PluginFactory = Arc<
    dyn Fn(&PluginContext<'_>) -> Result<Arc<dyn CatalogSource>, InstantiateError> + Send + Sync,
>;

/// Entry point name to source factory.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the rule-driven plugins every build ships.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(USER_SOURCE_ENTRY, Arc::new(build_user_source));
        registry.register(FACTORY_SOURCE_ENTRY, Arc::new(build_factory_source));
        registry
    }

    pub fn register(&mut self, entry_point: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(entry_point.into(), factory);
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.factories.contains_key(entry_point)
    }

    /// Build the source behind `entry_point`. A panicking factory is reported
    /// as [`InstantiateError::Panicked`].
    pub fn instantiate(
        &self,
        entry_point: &str,
        ctx: &PluginContext<'_>,
    ) -> Result<Arc<dyn CatalogSource>, InstantiateError> {
        let factory = self
            .factories
            .get(entry_point)
            .ok_or_else(|| InstantiateError::ClassNotFound(entry_point.to_string()))?;

        match panic::catch_unwind(AssertUnwindSafe(|| factory(ctx))) {
            Ok(result) => result,
            Err(_) => Err(InstantiateError::Panicked {
                class: entry_point.to_string(),
            }),
        }
    }
}

fn read_definition(ctx: &PluginContext<'_>, class: &str, file: &str) -> Result<String, InstantiateError> {
    fs::read_to_string(ctx.package_dir.join(file)).map_err(|e| InstantiateError::ConstructorMismatch {
        class: class.to_string(),
        reason: format!("{}: {}", file, e),
    })
}

fn build_user_source(ctx: &PluginContext<'_>) -> Result<Arc<dyn CatalogSource>, InstantiateError> {
    let json = read_definition(ctx, USER_SOURCE_ENTRY, USER_SOURCE_FILE)?;
    let failed = |reason: String| InstantiateError::ConstructionFailed {
        class: USER_SOURCE_ENTRY.to_string(),
        reason,
    };

    let mut sources = UserSource::from_json(&json).map_err(|e| failed(e.to_string()))?;
    if sources.len() != 1 {
        return Err(InstantiateError::ConstructorMismatch {
            class: USER_SOURCE_ENTRY.to_string(),
            reason: format!("expected one source definition, found {}", sources.len()),
        });
    }
    let definition = sources.remove(0);
    Ok(Arc::new(UserSourceRuntime::new(definition, &ctx.deps)))
}

fn build_factory_source(ctx: &PluginContext<'_>) -> Result<Arc<dyn CatalogSource>, InstantiateError> {
    let json = read_definition(ctx, FACTORY_SOURCE_ENTRY, FACTORY_SOURCE_FILE)?;
    let source = FactorySource::from_json(&json, &ctx.deps).map_err(|e| {
        InstantiateError::ConstructionFailed {
            class: FACTORY_SOURCE_ENTRY.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(Arc::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::http::testing::FakeHttp;
    use crate::source::Source;
    use crate::store::SqliteStore;

    fn deps() -> Dependencies {
        let prefs = Arc::new(SqliteStore::in_memory().unwrap());
        Dependencies::new(Arc::new(FakeHttp::new()), prefs)
    }

    fn context<'a>(dir: &'a Path) -> PluginContext<'a> {
        PluginContext {
            pkg_name: "ireader.test.en",
            package_dir: dir,
            deps: deps(),
        }
    }

    #[test]
    fn test_unknown_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::with_builtins();
        let err = registry
            .instantiate("ireader.test.en.Missing", &context(dir.path()))
            .err()
            .unwrap();
        assert_eq!(
            err,
            InstantiateError::ClassNotFound("ireader.test.en.Missing".into())
        );
    }

    #[test]
    fn test_user_source_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let definition = UserSource::new("Example", "https://example.com", "en");
        fs::write(
            dir.path().join(USER_SOURCE_FILE),
            serde_json::to_string(&definition).unwrap(),
        )
        .unwrap();

        let registry = PluginRegistry::with_builtins();
        let source = registry
            .instantiate(USER_SOURCE_ENTRY, &context(dir.path()))
            .unwrap();
        assert_eq!(source.name(), "Example");
        assert_eq!(source.id(), definition.id());
    }

    #[test]
    fn test_missing_definition_file_is_a_constructor_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::with_builtins();
        let err = registry
            .instantiate(FACTORY_SOURCE_ENTRY, &context(dir.path()))
            .err()
            .unwrap();
        assert!(matches!(err, InstantiateError::ConstructorMismatch { .. }));
    }

    #[test]
    fn test_bad_definition_is_a_construction_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(FACTORY_SOURCE_FILE), "{\"name\": 5}").unwrap();
        let registry = PluginRegistry::with_builtins();
        let err = registry
            .instantiate(FACTORY_SOURCE_ENTRY, &context(dir.path()))
            .err()
            .unwrap();
        assert!(matches!(err, InstantiateError::ConstructionFailed { .. }));
    }

    #[test]
    fn test_panicking_factory_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = PluginRegistry::new();
        registry.register(
            "boom",
            Arc::new(
                |_: &PluginContext<'_>| -> Result<Arc<dyn CatalogSource>, InstantiateError> {
                    panic!("bad plugin")
                },
            ),
        );

        let err = registry.instantiate("boom", &context(dir.path())).err().unwrap();
        assert_eq!(err, InstantiateError::Panicked { class: "boom".into() });
    }
}
