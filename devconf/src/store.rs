//! Device document persistence and the local preference blob.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Preference key holding the last saved language configuration.
pub const LANGUAGE_CONFIG_KEY: &str = "languageConfig";

/// Remote (or local) home of device documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Value, StoreError>;
    /// Store a new document; fails with [`StoreError::Conflict`] if `id` exists.
    async fn create(&self, id: &str, document: &Value) -> Result<(), StoreError>;
    /// Replace an existing document; fails with [`StoreError::NotFound`] otherwise.
    async fn update(&self, id: &str, document: &Value) -> Result<(), StoreError>;
}

/// Small key/value blob that outlives any single document.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Documents kept in memory, mainly for tests.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, document: Value) -> Self {
        self.documents.get_mut().insert(id.into(), document);
        self
    }

    pub async fn get(&self, id: &str) -> Option<Value> {
        self.documents.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn fetch(&self, id: &str) -> Result<Value, StoreError> {
        self.get(id)
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn create(&self, id: &str, document: &Value) -> Result<(), StoreError> {
        let mut documents = self.documents.lock().await;
        if documents.contains_key(id) {
            return Err(StoreError::Conflict(id.to_string()));
        }
        documents.insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn update(&self, id: &str, document: &Value) -> Result<(), StoreError> {
        let mut documents = self.documents.lock().await;
        let Some(slot) = documents.get_mut(id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        *slot = document.clone();
        Ok(())
    }
}

/// One pretty-printed `{id}.json` file per device in a directory.
///
/// Updates keep a timestamped backup of the previous file next to it.
pub struct FileDocumentStore {
    dir: PathBuf,
}

impl FileDocumentStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_of(&self, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(StoreError::Transport(format!("invalid device name `{id}`")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn write(&self, path: &Path, document: &Value) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(document).map_err(transport)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(transport)?;
        tokio::fs::write(path, content).await.map_err(transport)
    }
}

fn transport(e: impl std::fmt::Display) -> StoreError {
    StoreError::Transport(e.to_string())
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn fetch(&self, id: &str) -> Result<Value, StoreError> {
        let path = self.path_of(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(transport(e)),
        };
        serde_json::from_str(&content).map_err(transport)
    }

    async fn create(&self, id: &str, document: &Value) -> Result<(), StoreError> {
        let path = self.path_of(id)?;
        if tokio::fs::try_exists(&path).await.map_err(transport)? {
            return Err(StoreError::Conflict(id.to_string()));
        }
        self.write(&path, document).await?;
        info!("created device {id} at {}", path.display());
        Ok(())
    }

    async fn update(&self, id: &str, document: &Value) -> Result<(), StoreError> {
        let path = self.path_of(id)?;
        if !tokio::fs::try_exists(&path).await.map_err(transport)? {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let stamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(transport)?
            .as_secs();
        let backup = path.with_extension(format!("bk-{stamp}.json"));
        tokio::fs::copy(&path, &backup).await.map_err(transport)?;
        debug!("backed up {} to {}", path.display(), backup.display());

        self.write(&path, document).await?;
        info!("updated device {id}");
        Ok(())
    }
}

/// Preferences kept in memory.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<Map<String, Value>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// Preferences persisted as one JSON object file.
///
/// A missing file reads as no preferences; it is created on first write.
pub struct FilePreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePreferenceStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> anyhow::Result<Map<String, Value>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("{} is not a JSON object", self.path.display()))
    }

    async fn save(&self, values: &Map<String, Value>) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(values)?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), value);
        self.save(&values).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        if values.remove(key).is_some() {
            self.save(&values).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_conflicts() {
        let store = MemoryDocumentStore::new().with("dcm4chee-arc", json!({"dicomDeviceName": "dcm4chee-arc"}));
        assert!(matches!(
            store.create("dcm4chee-arc", &json!({})).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.update("storescp", &json!({})).await,
            Err(StoreError::NotFound(_))
        ));
        store.update("dcm4chee-arc", &json!({"x": 1})).await.unwrap();
        assert_eq!(store.fetch("dcm4chee-arc").await.unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::new(dir.path());
        let device = json!({"dicomDeviceName": "dcm4chee-arc"});

        assert!(matches!(store.fetch("dcm4chee-arc").await, Err(StoreError::NotFound(_))));
        store.create("dcm4chee-arc", &device).await.unwrap();
        assert!(matches!(
            store.create("dcm4chee-arc", &device).await,
            Err(StoreError::Conflict(_))
        ));

        let updated = json!({"dicomDeviceName": "dcm4chee-arc", "dicomInstalled": true});
        store.update("dcm4chee-arc", &updated).await.unwrap();
        assert_eq!(store.fetch("dcm4chee-arc").await.unwrap(), updated);

        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bk-"))
            .count();
        assert_eq!(backups, 1);
        assert!(matches!(store.fetch("../etc").await, Err(StoreError::Transport(_))));
    }

    #[tokio::test]
    async fn test_file_preferences() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let store = FilePreferenceStore::new(&path);

        assert_eq!(store.get(LANGUAGE_CONFIG_KEY).await.unwrap(), None);
        store
            .set(LANGUAGE_CONFIG_KEY, json!({"dcmLanguages": ["en|English|English|gb"]}))
            .await
            .unwrap();

        let reopened = FilePreferenceStore::new(&path);
        assert_eq!(
            reopened.get(LANGUAGE_CONFIG_KEY).await.unwrap(),
            Some(json!({"dcmLanguages": ["en|English|English|gb"]}))
        );
        reopened.remove(LANGUAGE_CONFIG_KEY).await.unwrap();
        assert_eq!(store.get(LANGUAGE_CONFIG_KEY).await.unwrap(), None);
    }
}
