use futures::future::join_all;
use serde_json::Value;

use crate::{
    format::{FormatOption, FormatRegistry, FormatTag, FormatValue},
    form::{
        field::{ChildOption, Control, FormField, SelectOption, Validation},
        group::{Group, show_next_group},
    },
    path::{EditUrl, display_value, get_path, substitute_placeholders},
    reconcile::INHERITED,
};

/// Array whose entries are referenced as `/dicomNetworkConnection/{index}`.
const NETWORK_CONNECTION: &str = "dicomNetworkConnection";
const NETWORK_CONNECTION_REFERENCE: &str = "dicomNetworkConnectionReference";
const DEVICE_NAME: &str = "dicomDeviceName";
const VENDOR_DATA: &str = "dicomVendorData";
const LANGUAGES: &str = "dcmDevice.dcmuiConfig[0].dcmuiLanguageConfig[0].dcmLanguages";
/// Largest offset from a band's base order that stays inside the band.
const MAX_SUB_ORDER: f64 = 1.99;

/// Where the form being compiled sits inside the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormParams {
    /// Document id (the device name).
    pub device: String,
    /// Device path of the edited subtree; `None` at the document root.
    pub device_path: Option<String>,
    /// Schema path of the edited subtree; `None` at the schema root.
    pub schema_path: Option<String>,
}

impl FormParams {
    pub fn root(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn from_url(url: &EditUrl) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            device: url.document.clone(),
            device_path: non_empty(url.device_path.as_str()),
            schema_path: non_empty(url.schema_path.as_str()),
        }
    }

    /// URL entering property `key`, optionally a single element of it.
    fn child_url(&self, key: &str, properties_path: &str, index: Option<usize>) -> EditUrl {
        EditUrl::new(
            self.device.clone(),
            self.child_device_path(key, index),
            match &self.schema_path {
                Some(schema) => format!("{schema}.{properties_path}.{key}"),
                None => format!("properties.{key}"),
            },
        )
    }

    fn child_device_path(&self, key: &str, index: Option<usize>) -> String {
        let path = match &self.device_path {
            Some(parent) => format!("{parent}.{key}"),
            None => key.to_string(),
        };
        match index {
            Some(index) => format!("{path}[{index}]"),
            None => path,
        }
    }
}

/// Schema `type` of a property node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaType {
    String,
    Boolean,
    Integer,
    Array,
    Other,
}

impl SchemaType {
    fn of(node: &Value) -> Self {
        match node.get("type").and_then(Value::as_str) {
            Some("string") => Self::String,
            Some("boolean") => Self::Boolean,
            Some("integer") => Self::Integer,
            Some("array") => Self::Array,
            _ => Self::Other,
        }
    }
}

/// Compiles schema nodes into [`FormField`]s.
///
/// The compiler borrows the whole document: dynamic format lookups,
/// network-connection options and the language list are read from it, while
/// field values come from the subtree passed to [`FormCompiler::compile`].
pub struct FormCompiler<'a> {
    registry: &'a FormatRegistry,
    document: &'a Value,
    params: &'a FormParams,
    open_group: Group,
    pinned: Option<Group>,
}

/// Per-property inputs shared by the classification helpers.
struct Entry<'a> {
    key: &'a str,
    node: &'a Value,
    value: Option<&'a Value>,
    validation: Validation,
    sub_order: f64,
    properties_path: &'static str,
}

impl<'a> FormCompiler<'a> {
    pub fn new(registry: &'a FormatRegistry, document: &'a Value, params: &'a FormParams) -> Self {
        Self {
            registry,
            document,
            params,
            open_group: Group::default(),
            pinned: None,
        }
    }

    /// Group expanded by default.
    pub fn open_group(mut self, group: Group) -> Self {
        self.open_group = group;
        self
    }

    /// Group explicitly chosen by the caller; overrides [`Self::open_group`].
    pub fn pin(mut self, group: Option<Group>) -> Self {
        if let Some(group) = group {
            self.open_group = group;
        }
        self.pinned = group;
        self
    }

    /// Compile every declared property of an object (or array-of-object) node.
    ///
    /// Dynamic format lookups run concurrently; fields are emitted in
    /// property order once all of them have resolved. A node without a
    /// usable `type`/`properties` compiles to an empty form.
    pub async fn compile(&self, device: &Value, schema: &Value) -> Vec<FormField> {
        let Some(kind) = schema.get("type").and_then(Value::as_str) else {
            warn!("schema node has no type, nothing to compile");
            return Vec::new();
        };
        let (container, properties_path) = match (kind, schema.get("properties")) {
            ("object", Some(_)) => (schema, "properties"),
            ("array", _) if schema.pointer("/items/properties").is_some() => {
                (&schema["items"], "items.properties")
            }
            _ => {
                warn!("expected object properties or array item properties in `{kind}` schema");
                return Vec::new();
            }
        };
        let Some(properties) = container.get("properties").and_then(Value::as_object) else {
            warn!("schema properties are not an object");
            return Vec::new();
        };
        let required: Vec<&str> = container
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let entries: Vec<(&String, &Value)> = properties.iter().collect();
        let lookups = entries.iter().map(|(_, node)| async move {
            match node.get("format").and_then(Value::as_str) {
                Some(format) => self.registry.lookup(format, self.document).await,
                None => None,
            }
        });
        let format_values = join_all(lookups).await;

        let mut form = Vec::with_capacity(entries.len());
        for ((key, node), format_value) in entries.into_iter().zip(format_values) {
            let entry = Entry {
                key,
                node,
                value: device.get(key.as_str()).or_else(|| node.get("default")),
                validation: Validation::from_schema(node, required.contains(&key.as_str())),
                sub_order: (node.get("order").map_or(0.0, declared_order) / 100.0)
                    .clamp(0.0, MAX_SUB_ORDER),
                properties_path,
            };
            if let Some(field) = self.classify(&entry, device, format_value.as_ref()) {
                form.push(field);
            }
        }

        show_next_group(&mut form, self.pinned);
        form
    }

    fn classify(
        &self,
        entry: &Entry<'_>,
        device: &Value,
        format_value: Option<&FormatValue>,
    ) -> Option<FormField> {
        match SchemaType::of(entry.node) {
            SchemaType::String => Some(self.string_field(entry, device, format_value)),
            SchemaType::Boolean => self.boolean_field(entry, device),
            SchemaType::Array => Some(self.array_field(entry, format_value)),
            SchemaType::Integer => Some(self.integer_field(entry)),
            SchemaType::Other => Some(self.object_field(entry, device)),
        }
    }

    fn field(&self, entry: &Entry<'_>, group: Group, control: Control) -> FormField {
        FormField {
            key: entry.key.to_string(),
            label: str_of(entry.node, "title"),
            description: str_of(entry.node, "description"),
            order: group.base_order() + entry.sub_order,
            show: self.open_group == group,
            control,
        }
    }

    fn string_field(
        &self,
        entry: &Entry<'_>,
        device: &Value,
        format_value: Option<&FormatValue>,
    ) -> FormField {
        let value = entry.value.cloned();
        let validation = entry.validation.clone();
        let format = str_of(entry.node, "format");
        let tag = format.as_deref().and_then(FormatTag::parse);

        if entry.key == DEVICE_NAME && is_edit_mode(device) && self.params.device_path.is_none() {
            return self.field(entry, Group::Attribute, Control::Constant { value });
        }

        if entry.node.get("enum").is_some() || format_value.is_some() {
            let control = match format_value {
                Some(FormatValue::Missing { message }) if validation.required => Control::Message {
                    message: message.clone(),
                },
                Some(FormatValue::Missing { .. }) => Control::TextInput {
                    value,
                    format,
                    validation,
                },
                Some(FormatValue::Options(options)) => Control::Dropdown {
                    options: sorted(format_options(options, entry.value, false)),
                    value,
                    numeric: false,
                    validation,
                },
                None => Control::Dropdown {
                    options: sorted(enum_options(entry.node.get("enum"), entry.value, false)),
                    value,
                    numeric: false,
                    validation,
                },
            };
            return self.field(entry, Group::Attribute, control);
        }

        let control = match tag {
            Some(tag) if tag.is_cross_reference() => Control::ReferencePicker {
                format: tag.to_string(),
                multiple: false,
                value: value.unwrap_or_else(|| Value::String(String::new())),
                validation,
            },
            Some(FormatTag::DefaultLanguage) => Control::Dropdown {
                options: self.language_options(entry.value),
                value,
                numeric: false,
                validation,
            },
            _ => Control::TextInput {
                value,
                format,
                validation,
            },
        };
        self.field(entry, Group::Attribute, control)
    }

    fn language_options(&self, current: Option<&Value>) -> Vec<SelectOption> {
        let Some(languages) = get_path(self.document, LANGUAGES).and_then(Value::as_array) else {
            return Vec::new();
        };
        languages
            .iter()
            .filter_map(Value::as_str)
            .map(|language| {
                let parts: Vec<&str> = language.split('|').collect();
                let label = parts
                    .iter()
                    .take(3)
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" - ");
                SelectOption::new(
                    label,
                    Value::String(language.to_string()),
                    current.and_then(Value::as_str) == Some(language),
                )
            })
            .collect()
    }

    fn boolean_field(&self, entry: &Entry<'_>, device: &Value) -> Option<FormField> {
        if entry.key == VENDOR_DATA {
            // Vendor data can only be uploaded to a device that already exists.
            let device_name = device.get(DEVICE_NAME).and_then(Value::as_str)?;
            if device_name.is_empty() {
                return None;
            }
            let device_name = device_name.to_string();
            let control = if device.get(VENDOR_DATA) == Some(&Value::Bool(true)) {
                Control::FileDownload {
                    download_path: format!("devices/{device_name}/vendordata"),
                    device_name,
                }
            } else {
                Control::FileUpload { device_name }
            };
            return Some(self.field(entry, Group::Attribute, control));
        }

        let current = entry.value.and_then(Value::as_bool);
        let mut options = vec![
            SelectOption::new("True", Value::Bool(true), current == Some(true)),
            SelectOption::new("False", Value::Bool(false), current == Some(false)),
        ];
        if !entry.validation.required {
            options.push(SelectOption::new(
                "Inherited",
                Value::String(INHERITED.to_string()),
                current.is_none(),
            ));
        }
        Some(self.field(
            entry,
            Group::Attribute,
            Control::RadioGroup {
                options,
                value: entry.value.cloned(),
                validation: entry.validation.clone(),
            },
        ))
    }

    fn array_field(&self, entry: &Entry<'_>, format_value: Option<&FormatValue>) -> FormField {
        let node = entry.node;
        let validation = entry.validation.clone();
        let format = str_of(node, "format");
        let is_connection_reference = entry.key == NETWORK_CONNECTION_REFERENCE;

        if let (Some(FormatValue::Missing { message }), false) =
            (format_value, is_connection_reference)
        {
            return self.field(
                entry,
                Group::Attribute,
                Control::Message {
                    message: message.clone(),
                },
            );
        }

        let dynamic = match format_value {
            Some(FormatValue::Options(options)) if !options.is_empty() => Some(options),
            _ => None,
        };
        if is_connection_reference || dynamic.is_some() {
            let options = match dynamic {
                Some(options) if !is_connection_reference => {
                    format_options(options, entry.value, true)
                }
                _ => self.connection_options(entry.value),
            };
            return self.field(
                entry,
                Group::Attribute,
                Control::CheckboxGroup {
                    options: sorted(options),
                    format,
                    validation,
                },
            );
        }

        if let Some(item_enum) = node.pointer("/items/enum") {
            return self.field(
                entry,
                Group::Attribute,
                Control::CheckboxGroup {
                    options: sorted(enum_options(Some(item_enum), entry.value, true)),
                    format,
                    validation,
                },
            );
        }

        let elements = entry.value.and_then(Value::as_array);
        let holds_objects = node.pointer("/items/$ref").is_some()
            || node.pointer("/items/properties").is_some()
            || elements
                .and_then(|e| e.first())
                .is_some_and(Value::is_object);
        if holds_objects {
            return self.child_list(entry, elements.map(Vec::as_slice).unwrap_or_default());
        }

        let value = match entry.value {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => vec![Value::String(String::new())],
        };
        match format.as_deref().and_then(FormatTag::parse) {
            Some(tag) if tag.is_cross_reference() => self.field(
                entry,
                Group::Attribute,
                Control::ReferencePicker {
                    format: tag.to_string(),
                    multiple: true,
                    value: Value::Array(value),
                    validation,
                },
            ),
            _ => self.field(
                entry,
                Group::Attribute,
                Control::ArrayElement {
                    item_type: node
                        .pointer("/items/type")
                        .and_then(Value::as_str)
                        .unwrap_or("text")
                        .to_string(),
                    value,
                    format,
                    validation,
                },
            ),
        }
    }

    /// Options pointing at the document's own network connections.
    fn connection_options(&self, current: Option<&Value>) -> Vec<SelectOption> {
        let Some(connections) = self.document.get(NETWORK_CONNECTION).and_then(Value::as_array)
        else {
            return Vec::new();
        };
        connections
            .iter()
            .enumerate()
            .map(|(index, connection)| {
                let reference = format!("/{NETWORK_CONNECTION}/{index}");
                let host = connection
                    .get("dicomHostname")
                    .map(display_value)
                    .unwrap_or_default();
                let label = match connection.get("dicomPort") {
                    Some(port) => format!(
                        "{} ({host}:{})",
                        connection.get("cn").map(display_value).unwrap_or_default(),
                        display_value(port)
                    ),
                    None => format!(
                        "{} ({host})",
                        connection.get("cn").map(display_value).unwrap_or_default()
                    ),
                };
                let active = contains(current, &Value::String(reference.clone()));
                SelectOption::new(label, Value::String(reference), active)
            })
            .collect()
    }

    fn child_list(&self, entry: &Entry<'_>, elements: &[Value]) -> FormField {
        let title = str_of(entry.node, "title").unwrap_or_default();
        let title_key = entry.node.get("titleKey").and_then(Value::as_str);

        let mut options: Vec<ChildOption> = elements
            .iter()
            .enumerate()
            .map(|(index, element)| ChildOption {
                title: match title_key {
                    Some(template) => substitute_placeholders(template, element),
                    None => format!("{title}[{index}]"),
                },
                description: str_of(entry.node, "description"),
                key: entry.key.to_string(),
                url: self
                    .params
                    .child_url(entry.key, entry.properties_path, Some(index))
                    .to_string(),
                current_element_url: self.params.child_device_path(entry.key, Some(index)),
            })
            .collect();
        options.sort_by(|a, b| a.title.cmp(&b.title));

        let add_url = self
            .params
            .child_url(entry.key, entry.properties_path, Some(elements.len()))
            .to_string();
        self.field(entry, Group::Child, Control::ChildList { options, add_url })
    }

    fn integer_field(&self, entry: &Entry<'_>) -> FormField {
        let control = match entry.node.get("enum") {
            Some(values) => Control::Dropdown {
                options: sorted(enum_options(Some(values), entry.value, false)),
                value: entry.value.cloned(),
                numeric: true,
                validation: entry.validation.clone(),
            },
            None => Control::NumberInput {
                value: entry.value.and_then(parse_float),
                validation: entry.validation.clone(),
            },
        };
        self.field(entry, Group::Attribute, control)
    }

    fn object_field(&self, entry: &Entry<'_>, device: &Value) -> FormField {
        let size = entry.value.map_or(0, size_of);
        let count = if device.get(entry.key).is_some() && size < 1 {
            1
        } else {
            size
        };
        let url = self.params.child_url(entry.key, entry.properties_path, None);
        let device_path = url.device_path.clone();
        self.field(
            entry,
            Group::Extension,
            Control::ChildObject {
                url: url.to_string(),
                device_path,
                count,
            },
        )
    }
}

/// A document with a device name is being edited rather than created.
pub fn is_edit_mode(device: &Value) -> bool {
    device
        .get(DEVICE_NAME)
        .and_then(Value::as_str)
        .is_some_and(|name| !name.is_empty())
}

fn str_of(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Schema `order` may be written as a number or a numeric string.
fn declared_order(order: &Value) -> f64 {
    match order {
        Value::Number(n) => n.as_f64().map_or(0.0, f64::trunc),
        Value::String(s) => s
            .trim()
            .split(|c: char| !c.is_ascii_digit() && c != '-')
            .next()
            .and_then(|digits| digits.parse::<i64>().ok())
            .map_or(0.0, |n| n as f64),
        _ => 0.0,
    }
}

fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn size_of(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.len(),
        Value::Array(items) => items.len(),
        Value::String(s) => s.chars().count(),
        _ => 0,
    }
}

/// Whether `current` equals `candidate` or is an array containing it.
fn contains(current: Option<&Value>, candidate: &Value) -> bool {
    match current {
        Some(Value::Array(items)) => items.contains(candidate),
        Some(other) => other == candidate,
        None => false,
    }
}

fn sorted(mut options: Vec<SelectOption>) -> Vec<SelectOption> {
    options.sort_by(|a, b| a.label.cmp(&b.label));
    options
}

fn format_options(
    options: &[FormatOption],
    current: Option<&Value>,
    multiple: bool,
) -> Vec<SelectOption> {
    options
        .iter()
        .map(|opt| {
            let active = if multiple {
                contains(current, &opt.value)
            } else {
                current == Some(&opt.value)
            };
            SelectOption::new(opt.label.clone(), opt.value.clone(), active)
        })
        .collect()
}

/// Options from a schema `enum`; string entries may be `value|description|label`.
fn enum_options(values: Option<&Value>, current: Option<&Value>, multiple: bool) -> Vec<SelectOption> {
    let Some(values) = values.and_then(Value::as_array) else {
        return Vec::new();
    };
    values
        .iter()
        .map(|opt| {
            let (value, description, label) = match opt.as_str() {
                Some(encoded) if encoded.contains('|') => {
                    let mut parts = encoded.split('|');
                    let value = parts.next().unwrap_or_default();
                    let description = parts.next().unwrap_or_default();
                    let label = parts.next().filter(|l| !l.is_empty()).unwrap_or(value);
                    (
                        Value::String(value.to_string()),
                        Some(description.to_string()),
                        label.to_string(),
                    )
                }
                _ => (opt.clone(), None, display_value(opt)),
            };
            let active = current == Some(&value) || (multiple && contains(current, &value));
            SelectOption {
                label,
                value,
                description,
                active,
            }
        })
        .collect()
}
