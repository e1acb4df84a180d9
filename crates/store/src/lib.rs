//! Persistent key-value store.
//!
//! Holds the handful of values that must survive a restart: the admin's
//! own identity, the last admin a customer connected to, and the
//! customer's display name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

/// Well-known keys.
pub mod keys {
    /// Identity the admin device listens on.
    pub const ADMIN_IDENTITY: &str = "admin_id";
    /// Admin identity a customer device last connected to.
    pub const LAST_ADMIN: &str = "last_admin_id";
    /// Name a customer device presents to the shop.
    pub const DISPLAY_NAME: &str = "display_name";
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// String key-value storage shared by the engines.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Removes every key.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Store backed by a JSON file, cached in memory.
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading existing values if the file exists.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let values = load_values(&path)?;
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `change` to a copy of the cached values, writes the copy and
    /// only then replaces the cache. A failed write leaves the cache as it was.
    fn update(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.values.write().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.clone();
        if !change(&mut next) {
            return Ok(());
        }
        write_values(&self.path, &next)?;
        *guard = next;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|map| {
            map.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|map| map.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.update(|map| {
            map.clear();
            true
        })
    }
}

/// Volatile store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}

fn load_values(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let values: BTreeMap<String, String> = serde_json::from_str(&data)?;
    debug!("loaded {} value(s) from {:?}", values.len(), path);
    Ok(values)
}

fn write_values(path: &Path, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(values)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    debug!("persisted {} value(s) to {:?}", values.len(), path);
    Ok(())
}

/// Default location of the store file.
pub fn default_store_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("printlink").join("store.json"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, JsonFileStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path().join("store.json")).unwrap();
        (tmp, store)
    }

    #[test]
    fn new_store_empty() {
        let (_tmp, store) = test_store();
        assert!(store.get(keys::ADMIN_IDENTITY).is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn set_get_remove() {
        let (_tmp, store) = test_store();
        store.set(keys::LAST_ADMIN, "ADMIN-AB12CD").unwrap();
        assert_eq!(store.get(keys::LAST_ADMIN).as_deref(), Some("ADMIN-AB12CD"));

        store.remove(keys::LAST_ADMIN).unwrap();
        assert!(store.get(keys::LAST_ADMIN).is_none());
    }

    #[test]
    fn persist_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("store.json");

        {
            let store = JsonFileStore::open(path.clone()).unwrap();
            store.set(keys::ADMIN_IDENTITY, "ADMIN-XY12AB").unwrap();
            store.set(keys::DISPLAY_NAME, "Ana").unwrap();
        }

        let reopened = JsonFileStore::open(path).unwrap();
        assert_eq!(
            reopened.get(keys::ADMIN_IDENTITY).as_deref(),
            Some("ADMIN-XY12AB")
        );
        assert_eq!(reopened.get(keys::DISPLAY_NAME).as_deref(), Some("Ana"));
    }

    #[test]
    fn clear_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");
        let store = JsonFileStore::open(path.clone()).unwrap();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.clear().unwrap();

        let reopened = JsonFileStore::open(path).unwrap();
        assert!(reopened.get("a").is_none());
        assert!(reopened.get("b").is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(path),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn failed_write_keeps_previous_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");
        let store = JsonFileStore::open(path.clone()).unwrap();
        store.set(keys::ADMIN_IDENTITY, "ADMIN-OLD001").unwrap();

        // A directory in place of the file makes the rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store.set(keys::ADMIN_IDENTITY, "ADMIN-NEW002").is_err());
        assert_eq!(
            store.get(keys::ADMIN_IDENTITY).as_deref(),
            Some("ADMIN-OLD001")
        );
        assert!(store.remove(keys::ADMIN_IDENTITY).is_err());
        assert!(store.clear().is_err());
        assert_eq!(
            store.get(keys::ADMIN_IDENTITY).as_deref(),
            Some("ADMIN-OLD001")
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn unwritable_parent_leaves_cache_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        let store = JsonFileStore::open(blocker.join("store.json")).unwrap();

        assert!(store.set(keys::ADMIN_IDENTITY, "ADMIN-ABCDEF").is_err());
        assert!(store.get(keys::ADMIN_IDENTITY).is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
        store.clear().unwrap();
        assert!(store.get("k").is_none());
    }
}
