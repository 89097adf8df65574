use std::{collections::HashMap, sync::Arc};

use serde_json::Value;

use crate::{error::SchemaError, schema::loader::SchemaLoader};

/// Key marking an unresolved reference inside a schema node.
pub const REF_KEY: &str = "$ref";

/// Upper bound on splices per call; guards against self-referencing documents.
const MAX_SPLICES: usize = 64;

/// A schema tree that lazily splices referenced documents into itself.
///
/// The tree has a single owner and is only mutated through `&mut self`, so
/// two resolutions can never race on the same node. Every fetched document
/// is memoised by reference name: a name is requested from the loader at
/// most once per tree, even when it is referenced from several branches.
pub struct SchemaTree {
    root: Value,
    loader: Arc<dyn SchemaLoader>,
    resolved: HashMap<String, Value>,
}

impl SchemaTree {
    pub fn new(root: Value, loader: Arc<dyn SchemaLoader>) -> Self {
        Self {
            root,
            loader,
            resolved: HashMap::new(),
        }
    }

    /// Fetch the root document through the loader and build a tree from it.
    pub async fn load(
        root_reference: &str,
        loader: Arc<dyn SchemaLoader>,
    ) -> Result<Self, SchemaError> {
        let root = loader.fetch(root_reference).await?;
        let mut tree = Self::new(root.clone(), loader);
        tree.resolved.insert(root_reference.to_string(), root);
        Ok(tree)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Plain lookup without resolving references; `""` is the root.
    pub fn get(&self, path: &str) -> Option<&Value> {
        node_at(&self.root, &split(path))
    }

    /// Reference names fetched so far.
    pub fn fetched_references(&self) -> impl Iterator<Item = &str> {
        self.resolved.keys().map(String::as_str)
    }

    /// Walk `path` segment by segment, splicing in referenced documents.
    ///
    /// When the walk reaches a node holding a `$ref` (directly, under
    /// `items` or under `properties`), the referenced document replaces the
    /// reference in place and the walk continues. A missing segment or a
    /// failed fetch stops the walk: the deepest existing ancestor is
    /// returned and the failure is logged.
    pub async fn resolve_deep(&mut self, path: &str) -> &Value {
        let segments = split(path);
        let mut depth = 0;
        let mut splices = 0;

        loop {
            while depth < segments.len() && node_at(&self.root, &segments[..=depth]).is_some() {
                depth += 1;
            }
            match self.splice_reference(&segments[..depth]).await {
                Ok(true) => {
                    splices += 1;
                    if splices >= MAX_SPLICES {
                        warn!("schema resolution of `{path}` exceeded {MAX_SPLICES} splices");
                        break;
                    }
                }
                Ok(false) => break,
                Err(e) => {
                    warn!(
                        "schema resolution of `{path}` stopped at `{}`: {e}",
                        segments[..depth].join(".")
                    );
                    break;
                }
            }
        }

        if depth < segments.len() {
            debug!(
                "schema path `{path}` resolved only up to `{}`",
                segments[..depth].join(".")
            );
        }
        node_at(&self.root, &segments[..depth]).unwrap_or(&self.root)
    }

    /// Replace a reference held by the node at `at`; `Ok(false)` when there is none.
    async fn splice_reference(&mut self, at: &[&str]) -> Result<bool, SchemaError> {
        let Some(node) = node_at(&self.root, at) else {
            return Ok(false);
        };

        let mut target: Vec<&str> = at.to_vec();
        let reference = if let Some(r) = node.get(REF_KEY) {
            r
        } else if let Some(r) = node.get("items").and_then(|n| n.get(REF_KEY)) {
            target.push("items");
            r
        } else if let Some(r) = node.get("properties").and_then(|n| n.get(REF_KEY)) {
            target.push("properties");
            r
        } else {
            return Ok(false);
        };
        let Some(name) = reference.as_str().map(str::to_string) else {
            return Err(SchemaError::TypeMismatch {
                path: target.join("."),
                expected: "string $ref".to_string(),
                actual: reference.to_string(),
            });
        };

        let document = match self.resolved.get(&name) {
            Some(doc) => doc.clone(),
            None => {
                debug!("fetching schema reference {name}");
                let doc = self.loader.fetch(&name).await?;
                self.resolved.insert(name.clone(), doc.clone());
                doc
            }
        };

        let slot = node_at_mut(&mut self.root, &target).ok_or_else(|| SchemaError::Malformed {
            path: target.join("."),
            reason: "reference vanished while splicing".to_string(),
        })?;
        *slot = document;
        debug!("spliced {name} into `{}`", target.join("."));
        Ok(true)
    }
}

fn split(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

fn node_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, seg| node.get(*seg))
}

fn node_at_mut<'a>(root: &'a mut Value, segments: &[&str]) -> Option<&'a mut Value> {
    let mut node = root;
    for seg in segments {
        node = node.get_mut(*seg)?;
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::loader::MemorySchemaLoader;
    use serde_json::json;

    fn device_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "dicomDeviceName": {"type": "string"},
                "dicomNetworkAE": {
                    "type": "array",
                    "items": {"$ref": "networkAE.schema.json"}
                },
                "dcmDevice": {"$ref": "dcmDevice.schema.json"}
            }
        })
    }

    fn loader() -> Arc<MemorySchemaLoader> {
        Arc::new(
            MemorySchemaLoader::new()
                .with(
                    "networkAE.schema.json",
                    json!({
                        "type": "object",
                        "title": "Network AE",
                        "properties": {
                            "dicomAETitle": {"type": "string"},
                            "dcmNetworkAE": {"$ref": "dcmNetworkAE.schema.json"}
                        }
                    }),
                )
                .with(
                    "dcmNetworkAE.schema.json",
                    json!({"type": "object", "properties": {"dcmAcceptedUserRole": {"type": "array"}}}),
                ),
        )
    }

    #[tokio::test]
    async fn test_resolve_splices_items_reference() {
        let loader = loader();
        let mut tree = SchemaTree::new(device_schema(), loader.clone());

        let node = tree
            .resolve_deep("properties.dicomNetworkAE.items.properties.dicomAETitle")
            .await;
        assert_eq!(node, &json!({"type": "string"}));
        assert_eq!(
            tree.get("properties.dicomNetworkAE.items.title"),
            Some(&json!("Network AE"))
        );
        assert_eq!(loader.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_reference_fetched_once() {
        let loader = loader();
        let mut tree = SchemaTree::new(device_schema(), loader.clone());

        tree.resolve_deep("properties.dicomNetworkAE").await;
        tree.resolve_deep("properties.dicomNetworkAE").await;
        tree.resolve_deep("properties.dicomNetworkAE.items.properties.dicomAETitle")
            .await;
        assert_eq!(loader.fetch_count(), 1);
        assert_eq!(tree.fetched_references().count(), 1);
    }

    #[tokio::test]
    async fn test_nested_reference_resolved_lazily() {
        let loader = loader();
        let mut tree = SchemaTree::new(device_schema(), loader.clone());

        tree.resolve_deep("properties.dicomNetworkAE").await;
        assert!(
            tree.get("properties.dicomNetworkAE.items.properties.dcmNetworkAE.$ref")
                .is_some()
        );

        let node = tree
            .resolve_deep("properties.dicomNetworkAE.items.properties.dcmNetworkAE")
            .await;
        assert_eq!(node["properties"]["dcmAcceptedUserRole"]["type"], json!("array"));
        assert_eq!(loader.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_segment_returns_ancestor() {
        let loader = loader();
        let mut tree = SchemaTree::new(device_schema(), loader.clone());

        let node = tree
            .resolve_deep("properties.dicomNetworkAE.items.properties.noSuchField")
            .await;
        assert!(node.get("dicomAETitle").is_some());
        assert!(node.get("noSuchField").is_none());
    }

    #[tokio::test]
    async fn test_failed_fetch_returns_ancestor() {
        let loader = loader();
        let mut tree = SchemaTree::new(device_schema(), loader.clone());

        let node = tree.resolve_deep("properties.dcmDevice.properties.x").await;
        assert_eq!(node, &json!({"$ref": "dcmDevice.schema.json"}));
    }
}
