use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::app::Result;

/// Key/value settings storage with change notification.
///
/// Values are stored as strings; the typed accessors live on
/// [`PreferenceStoreExt`].
pub trait PreferenceStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>>;
    fn set_raw(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;

    /// Stream of keys as they change. Only changes made after the call are seen.
    fn changes(&self) -> BoxStream<'static, String>;
}

/// Typed reads fall back to the default when the key is absent or the
/// stored value does not parse.
pub trait PreferenceStoreExt: PreferenceStore {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.lookup(key).unwrap_or_else(|| default.to_string())
    }

    fn get_int(&self, key: &str, default: i32) -> i32 {
        self.lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn get_long(&self, key: &str, default: i64) -> i64 {
        self.lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn get_object<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.lookup(key) else {
            return default;
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Stored preference does not decode, using default");
                default
            }
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set_raw(key, value)
    }

    fn set_int(&self, key: &str, value: i32) -> Result<()> {
        self.set_raw(key, &value.to_string())
    }

    fn set_long(&self, key: &str, value: i64) -> Result<()> {
        self.set_raw(key, &value.to_string())
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_raw(key, &value.to_string())
    }

    fn set_object<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, &raw)
    }

    #[doc(hidden)]
    fn lookup(&self, key: &str) -> Option<String> {
        match self.get_raw(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read preference");
                None
            }
        }
    }
}

impl<T: PreferenceStore + ?Sized> PreferenceStoreExt for T {}

/// View of another store where every key lives under `prefix.`.
///
/// Each source gets one, so two sources can use the same key names.
pub struct PrefixedPreferenceStore {
    prefix: String,
    inner: Arc<dyn PreferenceStore>,
}

impl PrefixedPreferenceStore {
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn PreferenceStore>) -> Self {
        Self {
            prefix: format!("{}.", prefix.into()),
            inner,
        }
    }

    pub fn for_source(source_id: i64, inner: Arc<dyn PreferenceStore>) -> Self {
        Self::new(format!("source_{}", source_id), inner)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl PreferenceStore for PrefixedPreferenceStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_raw(&self.full_key(key))
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_raw(&self.full_key(key), value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(&self.full_key(key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    fn changes(&self) -> BoxStream<'static, String> {
        let prefix = self.prefix.clone();
        self.inner
            .changes()
            .filter_map(move |key| {
                let local = key.strip_prefix(&prefix).map(str::to_string);
                async move { local }
            })
            .boxed()
    }
}
