//! Folding edited form values back into the device document.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::{
    error::PropagationError,
    path::{DevicePath, Segment},
};

/// Literal stored by a three-state boolean meaning "inherit from the parent configuration".
pub const INHERITED: &str = "inherent";

static REFERENCE_EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+(\[\*\])?(\.\w+(\[\*\])?)*$").unwrap());

/// Apply `edits` to `subtree`, then prune emptied keys.
///
/// Keys holding a nested object, or a non-empty array of objects, are
/// owned by child forms and never touched here. After all edits are applied
/// every top-level key whose value is null, an empty string, an empty array
/// or [`INHERITED`] is removed.
pub fn merge(subtree: &mut Value, edits: &Map<String, Value>) {
    if !subtree.is_object() {
        *subtree = Value::Object(Map::new());
    }
    let Value::Object(target) = subtree else {
        return;
    };

    for (key, new) in edits {
        let old = target.get(key);
        if old.is_some_and(is_child_container) {
            continue;
        }
        if let Some(value) = reconcile(old, new) {
            target.insert(key.clone(), value);
        }
    }

    target.retain(|key, value| {
        let keep = !is_prunable(value);
        if !keep {
            trace!("pruning `{key}`");
        }
        keep
    });
}

/// Reconciled value for one key, or `None` to leave it unchanged.
///
/// `old == None` means the key is absent; a null `new` means the edit
/// carries no value. Rules are tried in order and the first match wins.
/// `Some(Value::Null)` marks the key for deletion by the prune pass.
pub fn reconcile(old: Option<&Value>, new: &Value) -> Option<Value> {
    let old = old.filter(|v| !v.is_null());
    let take = || Some(new.clone());
    let delete = || Some(Value::Null);

    match old {
        Some(old) if same(old, new) => return None,
        None if new.is_null() => return None,
        _ => {}
    }
    if old.is_none() && !is_blank(new) {
        return take();
    }
    if matches!(old, Some(Value::String(s)) if !s.is_empty()) && is_empty_str(new) {
        return take();
    }
    // An empty string counts as zero here, so it leaves a number untouched.
    if matches!(old, Some(Value::Number(n)) if n.as_f64() != Some(0.0)) && new.is_null() {
        return delete();
    }
    if new.is_number() {
        return take();
    }
    if matches!(old, Some(Value::Array(_))) && new.is_array() {
        return take();
    }
    if old.is_none() && is_single_empty(new) {
        return delete();
    }
    if old.is_some()
        && !new.is_null()
        && ((!is_blank(new) && !is_inherited(new)) || is_single_filled(new))
    {
        return take();
    }

    let old_bool = matches!(old, Some(Value::Bool(_)));
    if old_bool && (new.is_null() || is_empty_str(new)) {
        return delete();
    }
    if (old_bool || old.is_none()) && new.is_boolean() {
        return take();
    }
    if old_bool && is_inherited(new) {
        return take();
    }
    None
}

/// Replace every scalar equal to `old` found through `references`.
///
/// Each expression is a dotted path whose segments may end in `[*]` to
/// visit every element of an array, e.g. `dicomNetworkAE[*].dicomAETitle`.
/// A failing expression is logged and reported; the others still run.
pub fn propagate_value(
    document: &mut Value,
    old: &Value,
    new: &Value,
    references: &[&str],
) -> Vec<PropagationError> {
    let mut errors = Vec::new();
    for expression in references {
        match propagate_one(document, old, new, expression) {
            Ok(0) => debug!("no value to update through `{expression}`"),
            Ok(count) => debug!("updated {count} value(s) through `{expression}`"),
            Err(e) => {
                warn!("propagation of {old} skipped: {e}");
                errors.push(e);
            }
        }
    }
    errors
}

/// One step of a reference expression.
struct Step {
    path: DevicePath,
    wildcard: bool,
}

fn parse_expression(expression: &str) -> Result<Vec<Step>, PropagationError> {
    let malformed = || PropagationError::MalformedExpression(expression.to_string());
    if !REFERENCE_EXPRESSION.is_match(expression) {
        return Err(malformed());
    }

    let pieces: Vec<&str> = expression.split("[*]").collect();
    let last = pieces.len() - 1;
    let mut steps = Vec::with_capacity(pieces.len());
    for (pos, piece) in pieces.into_iter().enumerate() {
        let piece = if pos == 0 {
            piece
        } else {
            piece.strip_prefix('.').unwrap_or(piece)
        };
        if piece.is_empty() && pos == last {
            break;
        }
        steps.push(Step {
            path: DevicePath::parse(piece).ok_or_else(malformed)?,
            wildcard: pos != last,
        });
    }
    Ok(steps)
}

fn propagate_one(
    document: &mut Value,
    old: &Value,
    new: &Value,
    expression: &str,
) -> Result<usize, PropagationError> {
    let steps = parse_expression(expression)?;
    let mut hits: Vec<DevicePath> = Vec::new();
    let mut pending = vec![(DevicePath::default(), 0usize)];

    while let Some((at, index)) = pending.pop() {
        let Some(step) = steps.get(index) else {
            continue;
        };
        let location = at.join(&step.path);
        let Some(target) = location.get(document) else {
            if index == 0 {
                return Err(PropagationError::MissingSegment {
                    expression: expression.to_string(),
                    segment: step.path.to_string(),
                });
            }
            continue;
        };

        if step.wildcard {
            let Value::Array(elements) = target else {
                continue;
            };
            for (i, element) in elements.iter().enumerate() {
                let element_at = location.child(Segment::Index(i));
                if is_scalar(element) {
                    if element == old {
                        hits.push(element_at);
                    }
                } else {
                    pending.push((element_at, index + 1));
                }
            }
        } else if is_scalar(target) {
            if target == old {
                hits.push(location);
            }
        } else {
            pending.push((location, index + 1));
        }
    }

    for hit in &hits {
        if let Some(slot) = hit.get_mut(document) {
            *slot = new.clone();
        }
    }
    Ok(hits.len())
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn is_child_container(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.first().is_some_and(Value::is_object),
        _ => false,
    }
}

fn is_prunable(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == INHERITED,
        Value::Array(items) => items.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(f64::is_nan),
        _ => false,
    }
}

/// Values a form submits for "nothing entered".
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(items) => items.is_empty() || is_single_empty(value),
        Value::Object(_) => false,
    }
}

fn is_empty_str(value: &Value) -> bool {
    value.as_str() == Some("")
}

fn is_inherited(value: &Value) -> bool {
    value.as_str() == Some(INHERITED)
}

/// `[""]`, what an untouched list-of-scalars editor submits.
fn is_single_empty(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.len() == 1 && is_empty_str(&items[0]))
}

fn is_single_filled(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.len() == 1 && !is_empty_str(&items[0]))
}

/// Structural equality that treats `5` and `5.0` as the same number.
fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
