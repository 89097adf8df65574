//! Structural edits of a device document.

use serde_json::{Map, Value};

use crate::{
    form::FormParams,
    path::{DevicePath, array_container_path, get_path, remove_path, title_keys},
    reconcile::merge,
    schema::SchemaTree,
};

const AE_TITLE: &str = "dicomAETitle";

/// Merge `edits` into the subtree at `device_path` (the root when `None`).
///
/// A missing or null subtree is created from the edits alone. Returns
/// `false` when the path cannot be written, e.g. an array index beyond the
/// end, or when it already holds something other than an object.
pub fn merge_at(document: &mut Value, device_path: Option<&str>, edits: &Map<String, Value>) -> bool {
    let Some(path) = device_path.filter(|p| !p.is_empty()) else {
        merge(document, edits);
        return true;
    };
    let Some(parsed) = DevicePath::parse(path) else {
        warn!("cannot merge into malformed device path `{path}`");
        return false;
    };

    if let Some(subtree) = parsed.get_mut(document) {
        if !subtree.is_object() && !subtree.is_null() {
            warn!("`{path}` does not hold an object, refusing to merge into it");
            return false;
        }
        merge(subtree, edits);
        return true;
    }

    let mut created = Value::Object(Map::new());
    merge(&mut created, edits);
    let written = parsed.set(document, created);
    if !written {
        warn!("cannot create `{path}` in device document");
    }
    written
}

/// Splice element `index` out of the array at `path`.
pub fn remove_array_element(document: &mut Value, path: &str, index: usize) -> Option<Value> {
    match DevicePath::parse(path)?.get_mut(document)? {
        Value::Array(items) if index < items.len() => Some(items.remove(index)),
        _ => None,
    }
}

/// Remove a nested extension object such as `dcmDevice.dcmArchiveDevice`.
pub fn remove_extension(document: &mut Value, device_path: &str) -> Option<Value> {
    let removed = remove_path(document, device_path);
    if removed.is_none() {
        debug!("no extension at `{device_path}` to remove");
    }
    removed
}

/// Rename an AE: every string equal to the current `dicomAETitle` below
/// `subtree` is replaced by `new_title`, except the title field itself.
///
/// Returns the number of replaced values.
pub fn rename_ae_title(subtree: &mut Value, new_title: &str) -> usize {
    let Some(old) = subtree.get(AE_TITLE).and_then(Value::as_str).map(str::to_string) else {
        return 0;
    };

    let mut replaced = 0;
    let mut stack: Vec<&mut Value> = vec![subtree];
    while let Some(node) = stack.pop() {
        match node {
            Value::Object(map) => {
                for (key, value) in map.iter_mut() {
                    if key == AE_TITLE {
                        continue;
                    }
                    if value.as_str() == Some(old.as_str()) {
                        *value = Value::String(new_title.to_string());
                        replaced += 1;
                    } else {
                        stack.push(value);
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    if item.as_str() == Some(old.as_str()) {
                        *item = Value::String(new_title.to_string());
                        replaced += 1;
                    } else {
                        stack.push(item);
                    }
                }
            }
            _ => {}
        }
    }
    replaced
}

/// Whether the array addressed by `params` already holds an element with
/// the same identity as `new_value`.
///
/// Identity is every placeholder of the array schema's `titleKey`; schemas
/// without a title template never report duplicates.
pub fn is_duplicate_child(
    document: &Value,
    schema: &SchemaTree,
    new_value: &Value,
    params: &FormParams,
) -> bool {
    let (Some(schema_path), Some(device_path)) = (&params.schema_path, &params.device_path) else {
        return false;
    };
    let Some(template) = schema
        .get(schema_path)
        .and_then(|node| node.get("titleKey"))
        .and_then(Value::as_str)
    else {
        return false;
    };
    let keys = title_keys(template);
    let Some(siblings) = get_path(document, array_container_path(device_path)).and_then(Value::as_array)
    else {
        return false;
    };

    siblings.iter().any(|sibling| {
        keys.iter()
            .all(|key| sibling.get(key.as_str()) == new_value.get(key.as_str()))
    })
}
