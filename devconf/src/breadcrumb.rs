//! Breadcrumb trail reconstruction for nested edit URLs.
//!
//! A trail is rebuilt from the current URL alone: each step shortens the
//! device and schema paths by one level until the document root is reached.

use serde::Serialize;
use serde_json::Value;

use crate::{
    path::{
        Addressable, EditUrl, array_container_path, get_path, is_array_element_path,
        sibling_partition, substitute_placeholders,
    },
    schema::SchemaTree,
};

/// Title of an array element that has not been saved yet.
pub const NEW_ELEMENT_TITLE: &str = "[NEW]";

/// Icon shown next to a breadcrumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreadcrumbIcon {
    #[serde(rename = "subdirectory_arrow_right")]
    ArrayElement,
    #[serde(rename = "extension")]
    Extension,
}

/// Icon for an entry addressing `device_path`.
pub fn breadcrumb_icon(device_path: &str) -> BreadcrumbIcon {
    if is_array_element_path(device_path) {
        BreadcrumbIcon::ArrayElement
    } else {
        BreadcrumbIcon::Extension
    }
}

/// Another element of the same array, reachable from a breadcrumb.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreadcrumbOption {
    pub title: String,
    pub url: String,
    pub current_element_url: String,
}

impl Addressable for BreadcrumbOption {
    fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    pub url: String,
    pub title: String,
    /// Device path of the entry; `None` outside a nested edit context.
    pub devicereff: Option<String>,
    pub prefix_array: Vec<BreadcrumbOption>,
    pub suffix_array: Vec<BreadcrumbOption>,
    pub all_array: Vec<BreadcrumbOption>,
    pub child_object_title: String,
    pub material_icon_name: BreadcrumbIcon,
}

impl Breadcrumb {
    /// Entry without siblings, e.g. a fixed list page.
    pub fn fixed(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            devicereff: None,
            prefix_array: Vec::new(),
            suffix_array: Vec::new(),
            all_array: Vec::new(),
            child_object_title: String::new(),
            material_icon_name: BreadcrumbIcon::Extension,
        }
    }
}

/// Human title for `model` described by `schema`.
///
/// Array schemas render their `titleKey` template, or `[NEW]` for an unset
/// element. Everything else uses the schema `title`, falling back to `object`.
pub fn breadcrumb_title(model: Option<&Value>, schema: Option<&Value>) -> String {
    let schema_is_array = schema
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        == Some("array");
    if schema_is_array {
        return match model.filter(|m| !m.is_null()) {
            Some(model) => schema
                .and_then(|s| s.get("titleKey"))
                .and_then(Value::as_str)
                .map(|template| substitute_placeholders(template, model))
                .unwrap_or_default(),
            None => NEW_ELEMENT_TITLE.to_string(),
        };
    }
    schema
        .and_then(|s| s.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("object")
        .to_string()
}

/// Builds breadcrumbs from a document and its (partially resolved) schema.
pub struct Navigator<'a> {
    document: &'a Value,
    schema: &'a SchemaTree,
    document_id: String,
    home: Vec<Breadcrumb>,
}

impl<'a> Navigator<'a> {
    pub fn new(document: &'a Value, schema: &'a SchemaTree, document_id: impl Into<String>) -> Self {
        Self {
            document,
            schema,
            document_id: document_id.into(),
            home: Vec::new(),
        }
    }

    /// Fixed entries shown before the document root, e.g. the device list.
    pub fn with_home(mut self, home: Breadcrumb) -> Self {
        self.home.push(home);
        self
    }

    pub fn root_url(&self) -> String {
        EditUrl::root(self.document_id.clone()).to_string()
    }

    /// Full trail for `url`: home entries, the document root, then one
    /// entry per nesting level. A malformed URL yields only the fixed part.
    pub fn trail(&self, url: &str) -> Vec<Breadcrumb> {
        let mut trail = self.home.clone();
        let root = self.root_url();
        trail.push(Breadcrumb::fixed(root.clone(), self.document_id.clone()));

        match EditUrl::parse(url) {
            Some(current) if current.document == self.document_id => {
                trail.extend(self.compute_trail(self.entry(&current), &root));
            }
            _ => debug!("`{url}` is not an edit url of {}", self.document_id),
        }
        trail
    }

    /// Walk back from `current` until `root_url`, returned root-to-leaf.
    ///
    /// `root_url` itself is not part of the result.
    pub fn compute_trail(&self, current: Breadcrumb, root_url: &str) -> Vec<Breadcrumb> {
        let mut trail = Vec::new();
        let mut entry = current;
        while entry.url != root_url {
            let previous = self.previous(&entry);
            trail.push(entry);
            match previous {
                Some(previous) => entry = previous,
                None => break,
            }
        }
        trail.reverse();
        trail
    }

    /// Entry one level above `entry`; `None` for malformed or root URLs.
    pub fn previous(&self, entry: &Breadcrumb) -> Option<Breadcrumb> {
        let url = EditUrl::parse(&entry.url)?;
        if url.is_root() {
            return None;
        }
        let parent = url.parent();
        if parent == url {
            warn!("breadcrumb url `{}` cannot be shortened", entry.url);
            return None;
        }
        Some(self.entry(&parent))
    }

    /// Breadcrumb for an edit URL, with the siblings of an array element.
    pub fn entry(&self, url: &EditUrl) -> Breadcrumb {
        if url.is_root() {
            return Breadcrumb::fixed(self.root_url(), self.document_id.clone());
        }
        let model = get_path(self.document, &url.device_path);
        let schema = self.schema.get(&url.schema_path);
        let current_url = url.to_string();

        let all = self.siblings(&url.device_path, &url.schema_path, schema);
        let partition = sibling_partition(&current_url, &all);
        let all_array = partition
            .prefix
            .iter()
            .chain(partition.suffix.iter())
            .cloned()
            .collect();

        Breadcrumb {
            title: breadcrumb_title(model, schema),
            devicereff: Some(url.device_path.clone()),
            prefix_array: partition.prefix,
            suffix_array: partition.suffix,
            all_array,
            child_object_title: schema
                .and_then(|s| s.get("title"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            material_icon_name: breadcrumb_icon(&url.device_path),
            url: current_url,
        }
    }

    /// One option per element of the array containing `device_path`, by title.
    fn siblings(
        &self,
        device_path: &str,
        schema_path: &str,
        schema: Option<&Value>,
    ) -> Vec<BreadcrumbOption> {
        if !is_array_element_path(device_path) {
            return Vec::new();
        }
        let container = array_container_path(device_path);
        let Some(elements) = get_path(self.document, container).and_then(Value::as_array) else {
            return Vec::new();
        };

        let mut options: Vec<BreadcrumbOption> = elements
            .iter()
            .enumerate()
            .map(|(index, element)| {
                let element_path = format!("{container}[{index}]");
                BreadcrumbOption {
                    title: breadcrumb_title(Some(element), schema),
                    url: EditUrl::new(self.document_id.clone(), element_path.clone(), schema_path)
                        .to_string(),
                    current_element_url: element_path,
                }
            })
            .collect();
        options.sort_by(|a, b| a.title.cmp(&b.title));
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MemorySchemaLoader;
    use serde_json::json;
    use std::sync::Arc;

    fn fixture() -> (Value, SchemaTree) {
        let device = json!({
            "dicomDeviceName": "dcm4chee-arc",
            "dicomNetworkConnection": [
                {"cn": "http", "dicomHostname": "localhost"},
                {"cn": "dicom", "dicomHostname": "localhost"},
                {"cn": "https", "dicomHostname": "localhost"}
            ],
            "dicomNetworkAE": [{
                "dicomAETitle": "DCM4CHEE",
                "dcmNetworkAE": {"dcmAcceptedUserRole": []}
            }]
        });
        let schema = SchemaTree::new(
            json!({"type": "object", "title": "Device", "properties": {
                "dicomNetworkConnection": {
                    "type": "array",
                    "title": "Network Connection",
                    "titleKey": "{cn}",
                    "items": {"type": "object", "properties": {}}
                },
                "dicomNetworkAE": {
                    "type": "array",
                    "title": "Network AE",
                    "titleKey": "{dicomAETitle}",
                    "items": {"type": "object", "properties": {
                        "dcmNetworkAE": {"type": "object", "title": "Archive Network AE"}
                    }}
                }
            }}),
            Arc::new(MemorySchemaLoader::new()),
        );
        (device, schema)
    }

    #[test]
    fn test_titles() {
        let array = json!({"type": "array", "titleKey": "{cn} ({dicomHostname})"});
        assert_eq!(
            breadcrumb_title(Some(&json!({"cn": "dicom", "dicomHostname": "h"})), Some(&array)),
            "dicom (h)"
        );
        assert_eq!(breadcrumb_title(None, Some(&array)), NEW_ELEMENT_TITLE);
        assert_eq!(breadcrumb_title(None, Some(&json!({"title": "Device"}))), "Device");
        assert_eq!(breadcrumb_title(None, None), "object");
    }

    #[test]
    fn test_icon() {
        assert_eq!(breadcrumb_icon("dicomNetworkAE[0]"), BreadcrumbIcon::ArrayElement);
        assert_eq!(breadcrumb_icon("dicomNetworkAE[0].dcmNetworkAE"), BreadcrumbIcon::Extension);
    }

    #[test]
    fn test_trail_for_nested_extension() {
        let (device, schema) = fixture();
        let navigator = Navigator::new(&device, &schema, "dcm4chee-arc")
            .with_home(Breadcrumb::fixed("/device/devicelist", "devicelist"));

        let trail = navigator.trail(
            "/device/edit/dcm4chee-arc/dicomNetworkAE[0].dcmNetworkAE/properties.dicomNetworkAE.items.properties.dcmNetworkAE",
        );
        let urls: Vec<_> = trail.iter().map(|b| b.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "/device/devicelist",
                "/device/edit/dcm4chee-arc",
                "/device/edit/dcm4chee-arc/dicomNetworkAE[0]/properties.dicomNetworkAE",
                "/device/edit/dcm4chee-arc/dicomNetworkAE[0].dcmNetworkAE/properties.dicomNetworkAE.items.properties.dcmNetworkAE",
            ]
        );
        assert_eq!(trail[1].title, "dcm4chee-arc");
        assert_eq!(trail[2].title, "DCM4CHEE");
        assert_eq!(trail[2].material_icon_name, BreadcrumbIcon::ArrayElement);
        assert!(trail[2].all_array.is_empty());
        assert_eq!(trail[3].title, "Archive Network AE");
        assert_eq!(trail[3].devicereff.as_deref(), Some("dicomNetworkAE[0].dcmNetworkAE"));
    }

    #[test]
    fn test_siblings_partitioned_around_current() {
        let (device, schema) = fixture();
        let navigator = Navigator::new(&device, &schema, "dcm4chee-arc");
        let url = EditUrl::new(
            "dcm4chee-arc",
            "dicomNetworkConnection[0]",
            "properties.dicomNetworkConnection",
        );
        let entry = navigator.entry(&url);

        assert_eq!(entry.title, "http");
        let prefix: Vec<_> = entry.prefix_array.iter().map(|o| o.title.as_str()).collect();
        let suffix: Vec<_> = entry.suffix_array.iter().map(|o| o.title.as_str()).collect();
        assert_eq!(prefix, vec!["dicom"]);
        assert_eq!(suffix, vec!["https"]);
        assert_eq!(entry.all_array.len(), 2);
        assert_eq!(entry.suffix_array[0].current_element_url, "dicomNetworkConnection[2]");
    }

    #[test]
    fn test_malformed_urls() {
        let (device, schema) = fixture();
        let navigator = Navigator::new(&device, &schema, "dcm4chee-arc");

        let trail = navigator.trail("/device/devicelist");
        assert_eq!(trail.len(), 1);

        let bogus = Breadcrumb::fixed("not a url", "x");
        assert!(navigator.previous(&bogus).is_none());
        assert_eq!(navigator.compute_trail(bogus.clone(), "/device/edit/dcm4chee-arc"), vec![bogus]);
    }
}
