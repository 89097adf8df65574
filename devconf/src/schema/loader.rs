use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SchemaError;

/// Fetches referenced schema documents by name.
#[async_trait]
pub trait SchemaLoader: Send + Sync {
    /// Load the schema document named by a `$ref` value.
    async fn fetch(&self, reference: &str) -> Result<Value, SchemaError>;
}

/// Loads schema documents from a directory, one JSON file per reference.
#[derive(Debug, Clone)]
pub struct DirSchemaLoader {
    dir: PathBuf,
}

impl DirSchemaLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl SchemaLoader for DirSchemaLoader {
    async fn fetch(&self, reference: &str) -> Result<Value, SchemaError> {
        // References are bare file names; anything else would escape the directory.
        if reference.is_empty() || reference.contains(['/', '\\']) || reference.starts_with('.') {
            return Err(SchemaError::Malformed {
                path: reference.to_string(),
                reason: "reference must be a plain file name".to_string(),
            });
        }
        let path = self.dir.join(reference);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SchemaError::NotFound {
                    reference: reference.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        debug!("loaded schema {}", path.display());
        Ok(serde_json::from_str(&content)?)
    }
}

/// In-memory loader that counts fetches; handy for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySchemaLoader {
    schemas: HashMap<String, Value>,
    fetches: AtomicUsize,
}

impl MemorySchemaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under a reference name.
    pub fn with(mut self, reference: impl Into<String>, schema: Value) -> Self {
        self.schemas.insert(reference.into(), schema);
        self
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaLoader for MemorySchemaLoader {
    async fn fetch(&self, reference: &str) -> Result<Value, SchemaError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.schemas
            .get(reference)
            .cloned()
            .ok_or_else(|| SchemaError::NotFound {
                reference: reference.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_dir_loader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("networkAE.schema.json"),
            r#"{"type":"object","properties":{"dicomAETitle":{"type":"string"}}}"#,
        )
        .unwrap();

        let loader = DirSchemaLoader::new(dir.path());
        let schema = loader.fetch("networkAE.schema.json").await.unwrap();
        assert_eq!(schema["properties"]["dicomAETitle"]["type"], json!("string"));

        assert!(matches!(
            loader.fetch("missing.schema.json").await,
            Err(SchemaError::NotFound { .. })
        ));
        assert!(matches!(
            loader.fetch("../etc/passwd").await,
            Err(SchemaError::Malformed { .. })
        ));
    }
}
