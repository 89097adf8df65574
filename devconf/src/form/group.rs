use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::form::field::FormField;

/// Display section of a form, selected by the integer band of a field's order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum Group {
    /// Nested objects, orders `[1, 3)`.
    #[serde(rename = "ext")]
    Extension,
    /// Child arrays of records, orders `[3, 5)`.
    #[serde(rename = "child")]
    Child,
    /// Plain attributes, orders `[5, ∞)`.
    #[default]
    #[serde(rename = "attr")]
    Attribute,
}

impl Group {
    /// First order value of the band.
    pub fn base_order(self) -> f64 {
        match self {
            Self::Extension => 1.0,
            Self::Child => 3.0,
            Self::Attribute => 5.0,
        }
    }

    /// Band containing `order`; orders below 1 belong to none.
    pub fn of(order: f64) -> Option<Self> {
        if order >= 5.0 {
            Some(Self::Attribute)
        } else if order >= 3.0 {
            Some(Self::Child)
        } else if order >= 1.0 {
            Some(Self::Extension)
        } else {
            None
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ext" => Some(Self::Extension),
            "child" => Some(Self::Child),
            "attr" => Some(Self::Attribute),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extension => "ext",
            Self::Child => "child",
            Self::Attribute => "attr",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open the most actionable group when the caller has not pinned one.
///
/// With any extension field present, every field keeps its own `show`.
/// Otherwise child fields are opened and everything else closed, unless the
/// caller pinned the attribute group. Without child fields all attribute
/// fields are shown.
pub fn show_next_group(form: &mut [FormField], pinned: Option<Group>) {
    if form.iter().any(|f| f.group() == Some(Group::Extension)) {
        return;
    }

    let child_exists = form.iter().any(|f| f.group() == Some(Group::Child));
    if child_exists {
        if pinned != Some(Group::Attribute) {
            for field in form.iter_mut() {
                field.show = field.group() == Some(Group::Child);
            }
        }
    } else {
        for field in form.iter_mut() {
            if field.group() == Some(Group::Attribute) {
                field.show = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::field::Control;

    fn field(key: &str, order: f64, show: bool) -> FormField {
        FormField {
            key: key.into(),
            label: None,
            description: None,
            order,
            show,
            control: Control::Message {
                message: String::new(),
            },
        }
    }

    #[test]
    fn test_bands() {
        assert_eq!(Group::of(1.0), Some(Group::Extension));
        assert_eq!(Group::of(2.99), Some(Group::Extension));
        assert_eq!(Group::of(3.0), Some(Group::Child));
        assert_eq!(Group::of(4.5), Some(Group::Child));
        assert_eq!(Group::of(5.0), Some(Group::Attribute));
        assert_eq!(Group::of(17.0), Some(Group::Attribute));
        assert_eq!(Group::of(0.5), None);
        assert_eq!(Group::parse("child"), Some(Group::Child));
        assert_eq!(Group::parse("other"), None);
    }

    #[test]
    fn test_children_opened_when_no_extensions() {
        let mut form = vec![
            field("dicomNetworkAE", 3.01, false),
            field("dicomNetworkConnection", 3.02, false),
            field("dicomDescription", 5.0, true),
            field("dicomInstalled", 5.1, true),
        ];
        show_next_group(&mut form, None);
        let shown: Vec<_> = form.iter().map(|f| f.show).collect();
        assert_eq!(shown, vec![true, true, false, false]);
    }

    #[test]
    fn test_pinned_attributes_kept() {
        let mut form = vec![field("dicomNetworkAE", 3.0, false), field("cn", 5.0, true)];
        show_next_group(&mut form, Some(Group::Attribute));
        assert!(!form[0].show);
        assert!(form[1].show);
    }

    #[test]
    fn test_extensions_untouched() {
        let mut form = vec![
            field("dcmDevice", 1.0, false),
            field("dicomNetworkAE", 3.0, false),
            field("cn", 5.0, false),
        ];
        show_next_group(&mut form, None);
        assert!(form.iter().all(|f| !f.show));
    }

    #[test]
    fn test_attributes_shown_when_alone() {
        let mut form = vec![field("cn", 5.0, false), field("dicomHostname", 5.01, false)];
        show_next_group(&mut form, Some(Group::Child));
        assert!(form.iter().all(|f| f.show));
    }
}
