//! Path algebra for device documents and schema trees.
//!
//! Two path dialects address the same location:
//!
//! - device paths use `name[index]` segments: `dicomNetworkAE[0].dcmNetworkAE`
//! - schema paths use grouping keywords: `properties.dicomNetworkAE.items.properties.dcmNetworkAE`
//!
//! Both are dot separated, so one [`DevicePath`] parser serves both when
//! reading values out of a [`serde_json::Value`].

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde_json::{Map, Value};

/// Prefix of every nested edit URL.
pub const EDIT_PREFIX: &str = "/device/edit";

/// Keywords that group a user-defined schema segment with its container.
const SCHEMA_KEYWORDS: [&str; 2] = ["properties", "items"];

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(.*?)\}").unwrap());
static WORD_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w*)\}").unwrap());
static TRAILING_INDEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*)\[\d*\]$").unwrap());

/// One addressable step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key.
    Key(String),
    /// Array index.
    Index(usize),
}

/// Parsed dotted/bracketed path such as `a.b[2].c`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DevicePath {
    segments: Vec<Segment>,
}

impl DevicePath {
    /// Parse a dotted path. The empty string addresses the root.
    ///
    /// Returns `None` for empty segments (`a..b`), unbalanced brackets or
    /// non-numeric indices.
    pub fn parse(path: &str) -> Option<Self> {
        let mut segments = Vec::new();
        if path.is_empty() {
            return Some(Self { segments });
        }
        for part in path.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(pos) => part.split_at(pos),
                None => (part, ""),
            };
            if name.is_empty() && rest.is_empty() {
                return None;
            }
            if !name.is_empty() {
                segments.push(Segment::Key(name.to_string()));
            }
            while !rest.is_empty() {
                let close = rest.find(']')?;
                let index = rest.get(1..close)?.parse::<usize>().ok()?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return None;
                }
            }
        }
        Some(Self { segments })
    }

    /// Path segments in root-to-leaf order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// This path extended by every segment of `tail`.
    pub fn join(&self, tail: &DevicePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(tail.segments.iter().cloned());
        Self { segments }
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Read the value addressed by this path.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(root, |node, segment| step(node, segment))
    }

    /// Mutable access to the value addressed by this path.
    pub fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        let mut node = root;
        for segment in &self.segments {
            node = step_mut(node, segment)?;
        }
        Some(node)
    }

    /// Write `value` at this path, creating intermediate objects and arrays.
    ///
    /// Arrays only grow by one element at a time; an index past the end
    /// (other than `len`) fails and returns `false`.
    pub fn set(&self, root: &mut Value, value: Value) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            *root = value;
            return true;
        };
        let mut node = root;
        for (pos, segment) in parents.iter().enumerate() {
            let next_is_index = matches!(self.segments[pos + 1], Segment::Index(_));
            let Some(child) = step_or_create(node, segment, next_is_index) else {
                return false;
            };
            node = child;
        }
        match last {
            Segment::Key(key) => {
                if !node.is_object() {
                    *node = Value::Object(Map::new());
                }
                if let Value::Object(map) = node {
                    map.insert(key.clone(), value);
                }
                true
            }
            Segment::Index(index) => {
                if node.is_null() {
                    *node = Value::Array(Vec::new());
                }
                match node {
                    Value::Array(items) if *index < items.len() => {
                        items[*index] = value;
                        true
                    }
                    Value::Array(items) if *index == items.len() => {
                        items.push(value);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Delete the value addressed by this path and return it.
    ///
    /// Array elements are spliced out, shifting later elements down.
    pub fn remove(&self, root: &mut Value) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut node = root;
        for segment in parents {
            node = step_mut(node, segment)?;
        }
        match (node, last) {
            (Value::Object(map), Segment::Key(key)) => map.remove(key),
            (Value::Array(items), Segment::Index(index)) if *index < items.len() => {
                Some(items.remove(*index))
            }
            (Value::Array(items), Segment::Key(key)) => {
                let index = key.parse::<usize>().ok().filter(|i| *i < items.len())?;
                Some(items.remove(index))
            }
            _ => None,
        }
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pos, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if pos == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

fn step<'a>(node: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match (node, segment) {
        (Value::Object(map), Segment::Key(key)) => map.get(key),
        (Value::Array(items), Segment::Index(index)) => items.get(*index),
        (Value::Array(items), Segment::Key(key)) => items.get(key.parse::<usize>().ok()?),
        _ => None,
    }
}

fn step_mut<'a>(node: &'a mut Value, segment: &Segment) -> Option<&'a mut Value> {
    match (node, segment) {
        (Value::Object(map), Segment::Key(key)) => map.get_mut(key),
        (Value::Array(items), Segment::Index(index)) => items.get_mut(*index),
        (Value::Array(items), Segment::Key(key)) => items.get_mut(key.parse::<usize>().ok()?),
        _ => None,
    }
}

fn step_or_create<'a>(
    node: &'a mut Value,
    segment: &Segment,
    next_is_index: bool,
) -> Option<&'a mut Value> {
    let empty = || {
        if next_is_index {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    };
    match segment {
        Segment::Key(key) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Value::Object(map) = node else {
                return None;
            };
            let child = map.entry(key.clone()).or_insert_with(empty);
            if !child.is_object() && !child.is_array() {
                *child = empty();
            }
            Some(child)
        }
        Segment::Index(index) => {
            if node.is_null() {
                *node = Value::Array(Vec::new());
            }
            let Value::Array(items) = node else {
                return None;
            };
            if *index == items.len() {
                items.push(empty());
            }
            items.get_mut(*index)
        }
    }
}

/// Read `path` from `root`; malformed paths read as absent.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    DevicePath::parse(path)?.get(root)
}

/// Write `value` at `path`, returning whether the write happened.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> bool {
    DevicePath::parse(path).is_some_and(|p| p.set(root, value))
}

/// Delete the value at `path`.
pub fn remove_path(root: &mut Value, path: &str) -> Option<Value> {
    DevicePath::parse(path)?.remove(root)
}

/// Shorten a path by one addressable level.
///
/// Grouping keywords (`properties`, `items`) stay attached to the
/// user-defined segment that follows them, so
/// `properties.a.items.properties.b` becomes `properties.a`. Device paths
/// have no keywords and simply lose their last segment. Malformed input
/// (empty segments) is returned unchanged.
pub fn parent_schema_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('.').collect();
    if path.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return path.to_string();
    }

    let mut groups: Vec<Vec<&str>> = Vec::new();
    let mut group: Vec<&str> = Vec::new();
    for part in parts.iter().rev() {
        if !group.is_empty() && !SCHEMA_KEYWORDS.contains(part) {
            groups.push(std::mem::take(&mut group));
        }
        group.insert(0, part);
    }
    if !group.is_empty() {
        groups.push(group);
    }

    groups
        .iter()
        .skip(1)
        .rev()
        .map(|g| g.join("."))
        .collect::<Vec<_>>()
        .join(".")
}

/// Strip a single trailing `[index]` so the path addresses the containing array.
///
/// Paths without a trailing index are returned unchanged.
pub fn array_container_path(path: &str) -> &str {
    TRAILING_INDEX
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map_or(path, |m| m.as_str())
}

/// Whether the path ends in an `[index]` segment.
pub fn is_array_element_path(path: &str) -> bool {
    TRAILING_INDEX.is_match(path)
}

/// Ordered, possibly duplicated tokens found inside `{...}` markers.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Word-only placeholder names of a title template, used as identity keys.
pub fn title_keys(template: &str) -> Vec<String> {
    WORD_PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fill a title template like `{cn} ({dicomHostname})` from `model`.
///
/// Placeholders missing from the model become empty strings.
pub fn substitute_placeholders(template: &str, model: &Value) -> String {
    let mut title = template.to_string();
    for key in extract_placeholders(template) {
        let replacement = model.get(&key).map(display_value).unwrap_or_default();
        title = title.replacen(&format!("{{{key}}}"), &replacement, 1);
    }
    title
}

/// Render a scalar the way it appears inside a title.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Anything that carries a navigation URL.
pub trait Addressable {
    fn url(&self) -> &str;
}

/// Siblings before and after the current entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<T> {
    pub prefix: Vec<T>,
    pub suffix: Vec<T>,
}

impl<T> Default for Partition<T> {
    fn default() -> Self {
        Self {
            prefix: Vec::new(),
            suffix: Vec::new(),
        }
    }
}

/// Split `all` around the entry whose URL is `current_url`.
///
/// Fewer than two siblings yield two empty lists. Without a match the
/// current entry is treated as the last one and every sibling is a prefix.
pub fn sibling_partition<T: Addressable + Clone>(current_url: &str, all: &[T]) -> Partition<T> {
    if all.len() < 2 {
        return Partition::default();
    }
    match all.iter().position(|entry| entry.url() == current_url) {
        Some(pos) => Partition {
            prefix: all[..pos].to_vec(),
            suffix: all[pos + 1..].to_vec(),
        },
        None => Partition {
            prefix: all.to_vec(),
            suffix: Vec::new(),
        },
    }
}

/// Typed form of `/device/edit/{document}/{devicePath}/{schemaPath}`.
///
/// Empty paths mean the document root, rendered as `/device/edit/{document}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditUrl {
    pub document: String,
    pub device_path: String,
    pub schema_path: String,
}

impl EditUrl {
    pub fn new(
        document: impl Into<String>,
        device_path: impl Into<String>,
        schema_path: impl Into<String>,
    ) -> Self {
        Self {
            document: document.into(),
            device_path: device_path.into(),
            schema_path: schema_path.into(),
        }
    }

    /// URL of the document root.
    pub fn root(document: impl Into<String>) -> Self {
        Self::new(document, "", "")
    }

    /// Parse an edit URL; anything that is not one yields `None`.
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url.strip_prefix(EDIT_PREFIX)?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [document] if !document.is_empty() => Some(Self::root(*document)),
            [document, device, schema] if !document.is_empty() => {
                Some(Self::new(*document, *device, *schema))
            }
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.device_path.is_empty() || self.schema_path.is_empty()
    }

    /// URL one addressable level up in both path dialects.
    pub fn parent(&self) -> Self {
        Self::new(
            self.document.clone(),
            parent_schema_path(&self.device_path),
            parent_schema_path(&self.schema_path),
        )
    }
}

impl fmt::Display for EditUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "{EDIT_PREFIX}/{}", self.document)
        } else {
            write!(
                f,
                "{EDIT_PREFIX}/{}/{}/{}",
                self.document, self.device_path, self.schema_path
            )
        }
    }
}

/// Whether two edit URLs address elements of the same array.
pub fn is_same_sibling_url(last: &str, new: &str) -> bool {
    if last == new {
        return true;
    }
    let (Some(a), Some(b)) = (EditUrl::parse(last), EditUrl::parse(new)) else {
        return false;
    };
    a.document == b.document
        && a.schema_path == b.schema_path
        && is_array_element_path(&a.device_path)
        && is_array_element_path(&b.device_path)
        && array_container_path(&a.device_path) == array_container_path(&b.device_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry(&'static str);

    impl Addressable for Entry {
        fn url(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_parse_device_path() {
        let path = DevicePath::parse("a.b[2].c").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Key("c".into()),
            ]
        );
        assert_eq!(path.to_string(), "a.b[2].c");

        assert!(DevicePath::parse("a..b").is_none());
        assert!(DevicePath::parse("a[x]").is_none());
        assert!(DevicePath::parse("a[1").is_none());
        assert!(DevicePath::parse("").unwrap().segments().is_empty());
    }

    #[test]
    fn test_get_set_remove() {
        let mut doc = json!({"dicomNetworkAE": [{"dicomAETitle": "DCM4CHEE"}]});
        assert_eq!(
            get_path(&doc, "dicomNetworkAE[0].dicomAETitle"),
            Some(&json!("DCM4CHEE"))
        );
        assert_eq!(
            get_path(&doc, "dicomNetworkAE.0.dicomAETitle"),
            Some(&json!("DCM4CHEE"))
        );

        assert!(set_path(&mut doc, "dicomNetworkAE[1].dicomAETitle", json!("STORESCP")));
        assert!(set_path(&mut doc, "dcmDevice.dcmArchiveDevice.dcmQueue[0].dcmQueueName", json!("Export1")));
        assert_eq!(
            doc["dcmDevice"]["dcmArchiveDevice"]["dcmQueue"][0]["dcmQueueName"],
            json!("Export1")
        );
        assert!(!set_path(&mut doc, "dicomNetworkAE[5]", json!({})));

        assert_eq!(remove_path(&mut doc, "dicomNetworkAE[0]"), Some(json!({"dicomAETitle": "DCM4CHEE"})));
        assert_eq!(doc["dicomNetworkAE"][0]["dicomAETitle"], json!("STORESCP"));
    }

    #[test]
    fn test_parent_schema_path() {
        assert_eq!(
            parent_schema_path("properties.dicomNetworkConnection.items.properties.dcmNetworkConnection"),
            "properties.dicomNetworkConnection"
        );
        assert_eq!(parent_schema_path("properties.dicomNetworkAE"), "");
        assert_eq!(parent_schema_path("dicomNetworkAE[0].dcmNetworkAE"), "dicomNetworkAE[0]");
        assert_eq!(parent_schema_path("dicomNetworkAE[0]"), "");
        assert_eq!(parent_schema_path("a..b"), "a..b");
    }

    #[test]
    fn test_array_container_path() {
        assert_eq!(array_container_path("a.b[3]"), "a.b");
        assert_eq!(array_container_path("a.b"), "a.b");
        assert_eq!(array_container_path("a[0].b[12]"), "a[0].b");
        assert_eq!(array_container_path("a[0].b"), "a[0].b");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            extract_placeholders("{cn} ({dicomHostname}:{dicomPort}) {cn}"),
            vec!["cn", "dicomHostname", "dicomPort", "cn"]
        );
        assert!(extract_placeholders("plain").is_empty());

        let model = json!({"cn": "dicom", "dicomHostname": "localhost", "dicomPort": 11112});
        assert_eq!(
            substitute_placeholders("{cn} ({dicomHostname}:{dicomPort})", &model),
            "dicom (localhost:11112)"
        );
        assert_eq!(substitute_placeholders("{missing}-x", &model), "-x");
        assert_eq!(title_keys("{dicomAETitle} {a b}"), vec!["dicomAETitle"]);
    }

    #[test]
    fn test_sibling_partition() {
        let empty: Vec<Entry> = Vec::new();
        assert_eq!(sibling_partition("u1", &empty), Partition::default());
        assert_eq!(sibling_partition("u1", &[Entry("u1")]), Partition::default());

        let two = [Entry("u1"), Entry("u2")];
        let p = sibling_partition("u2", &two);
        assert_eq!(p.prefix, vec![Entry("u1")]);
        assert!(p.suffix.is_empty());

        let three = [Entry("u1"), Entry("u2"), Entry("u3")];
        let p = sibling_partition("u2", &three);
        assert_eq!(p.prefix, vec![Entry("u1")]);
        assert_eq!(p.suffix, vec![Entry("u3")]);

        let p = sibling_partition("nope", &three);
        assert_eq!(p.prefix.len(), 3);
        assert!(p.suffix.is_empty());
    }

    #[test]
    fn test_edit_url() {
        let url = EditUrl::parse(
            "/device/edit/dcm4chee-arc/dicomNetworkAE[0].dcmNetworkAE/properties.dicomNetworkAE.items.properties.dcmNetworkAE",
        )
        .unwrap();
        assert_eq!(url.document, "dcm4chee-arc");
        assert_eq!(
            url.parent().to_string(),
            "/device/edit/dcm4chee-arc/dicomNetworkAE[0]/properties.dicomNetworkAE"
        );
        assert_eq!(url.parent().parent().to_string(), "/device/edit/dcm4chee-arc");
        assert!(EditUrl::parse("/device/edit/dcm4chee-arc").unwrap().is_root());
        assert!(EditUrl::parse("/device/devicelist").is_none());
        assert!(EditUrl::parse("/device/edit/a/b").is_none());
    }

    #[test]
    fn test_same_sibling_url() {
        assert!(is_same_sibling_url(
            "/device/edit/d/dicomNetworkAE[0]/properties.dicomNetworkAE",
            "/device/edit/d/dicomNetworkAE[3]/properties.dicomNetworkAE"
        ));
        assert!(!is_same_sibling_url(
            "/device/edit/d/dicomNetworkAE[0]/properties.dicomNetworkAE",
            "/device/edit/d/dicomNetworkConnection[0]/properties.dicomNetworkConnection"
        ));
    }
}
