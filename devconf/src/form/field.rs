use serde::Serialize;
use serde_json::Value;

use crate::form::group::Group;

/// One compiled form control, ready for a rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    /// Property name in the device document.
    pub key: String,
    pub label: Option<String>,
    pub description: Option<String>,
    /// Display order; the integer band selects the [`Group`].
    pub order: f64,
    /// Whether the field's group is initially expanded.
    pub show: bool,
    #[serde(flatten)]
    pub control: Control,
}

impl FormField {
    /// Display group this field belongs to.
    pub fn group(&self) -> Option<Group> {
        Group::of(self.order)
    }
}

/// Control kind together with its kind-specific data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "controlType",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Control {
    TextInput {
        value: Option<Value>,
        format: Option<String>,
        validation: Validation,
    },
    NumberInput {
        value: Option<f64>,
        validation: Validation,
    },
    Dropdown {
        options: Vec<SelectOption>,
        value: Option<Value>,
        /// Options carry numbers rather than strings.
        numeric: bool,
        validation: Validation,
    },
    RadioGroup {
        options: Vec<SelectOption>,
        value: Option<Value>,
        validation: Validation,
    },
    CheckboxGroup {
        options: Vec<SelectOption>,
        format: Option<String>,
        validation: Validation,
    },
    /// Free-form list of scalars.
    ArrayElement {
        item_type: String,
        value: Vec<Value>,
        format: Option<String>,
        validation: Validation,
    },
    /// Pick an existing identifier or type a new one.
    ReferencePicker {
        format: String,
        multiple: bool,
        value: Value,
        validation: Validation,
    },
    /// Existing child records of an array plus a link to add one.
    ChildList {
        options: Vec<ChildOption>,
        add_url: String,
    },
    /// Button entering a nested object.
    ChildObject {
        url: String,
        device_path: String,
        count: usize,
    },
    Constant {
        value: Option<Value>,
    },
    Message {
        message: String,
    },
    FileUpload {
        device_name: String,
    },
    FileDownload {
        device_name: String,
        download_path: String,
    },
}

/// Option of a dropdown, radio or checkbox group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectOption {
    pub label: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub active: bool,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: Value, active: bool) -> Self {
        Self {
            label: label.into(),
            value,
            description: None,
            active,
        }
    }
}

/// Navigation entry for one existing element of a child array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildOption {
    pub title: String,
    pub description: Option<String>,
    pub key: String,
    pub url: String,
    /// Device path of the element, e.g. `dicomNetworkAE[2]`.
    pub current_element_url: String,
}

/// Validation constraints copied from the schema node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    // Draft-4 schemas use booleans here, later drafts numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl Validation {
    pub fn from_schema(node: &Value, required: bool) -> Self {
        Self {
            required,
            minimum: node.get("minimum").and_then(Value::as_f64),
            maximum: node.get("maximum").and_then(Value::as_f64),
            exclusive_minimum: node.get("exclusiveMinimum").cloned(),
            exclusive_maximum: node.get("exclusiveMaximum").cloned(),
            min_length: node.get("minLength").and_then(Value::as_u64),
            max_length: node.get("maxLength").and_then(Value::as_u64),
            pattern: node
                .get("pattern")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}
