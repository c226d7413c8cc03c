//! Durable key/value storage for the local stores.
//!
//! Values are plain JSON documents. [`JsonFileStore`] keeps one file per key;
//! [`MemoryStore`] is an in-process map for tests and embedding.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;

/// Opaque durable map of JSON documents.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
}

/// Typed read with a fallback when the key is absent.
pub fn get_or<T, S>(store: &S, key: &str, default: T) -> Result<T, StoreError>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get(key)? {
        Some(value) => {
            serde_json::from_value(value).map_err(|err| StoreError::malformed(key, err))
        }
        None => Ok(default),
    }
}

/// Typed write.
pub fn set_value<T, S>(store: &S, key: &str, value: &T) -> Result<(), StoreError>
where
    T: Serialize,
    S: KeyValueStore + ?Sized,
{
    let value = serde_json::to_value(value)?;
    store.set(key, &value)
}

/// One pretty-printed `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "reading store document");
        let contents = fs::read_to_string(&path).map_err(|err| StoreError::io(&path, err))?;
        let value = serde_json::from_str(&contents)
            .map_err(|err| StoreError::malformed(path.display().to_string(), err))?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        debug!(path = %path.display(), "writing store document");
        let mut buf = serde_json::to_string_pretty(value)?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }
}

/// Atomically write `contents` (temp file + rename).
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| {
        StoreError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
        )
    })?;
    fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents).map_err(|err| StoreError::io(&tmp_path, err))?;
    fs::rename(&tmp_path, path).map_err(|err| StoreError::io(path, err))?;
    Ok(())
}

/// In-memory store. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document, e.g. a legacy blob.
    pub fn with(self, key: &str, value: Value) -> Self {
        self.lock().insert(key.to_string(), value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        // Every write is a single insert, so a poisoned map is still consistent.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value.clone());
        Ok(())
    }
}
