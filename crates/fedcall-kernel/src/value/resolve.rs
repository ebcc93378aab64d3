//! First pass: type resolution.
//!
//! Lowers a [`SerialValue`] tree to JSON. Arrays of length one collapse to
//! their element at every level; nodes carrying attributes become
//! `{"value": .., <attr>: ..}` wrapper objects for the second pass to match.

use serde_json::{Map, Value};

use super::MalformedValue;
use super::serial::{Attributes, SerialValue};

pub(super) fn resolve(node: SerialValue, issues: &mut Vec<MalformedValue>) -> Value {
    match node {
        SerialValue::Null => Value::Null,
        SerialValue::Scalar(v) => v,
        SerialValue::Malformed(m) => {
            issues.push(m);
            Value::Null
        }
        SerialValue::Array(items) => collapse(resolve_all(items, issues)),
        SerialValue::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k, resolve(v, issues)))
                .collect(),
        ),
        SerialValue::List { items, attributes } => {
            let value = collapse(resolve_all(items, issues));
            wrap(value, attributes, issues)
        }
        SerialValue::Atomic {
            values, attributes, ..
        } => wrap(collapse(values), attributes, issues),
    }
}

fn resolve_all(items: Vec<SerialValue>, issues: &mut Vec<MalformedValue>) -> Vec<Value> {
    items.into_iter().map(|item| resolve(item, issues)).collect()
}

/// A one-element array becomes its element.
fn collapse(mut items: Vec<Value>) -> Value {
    if items.len() == 1 {
        items.remove(0)
    } else {
        Value::Array(items)
    }
}

fn wrap(value: Value, attributes: Attributes, issues: &mut Vec<MalformedValue>) -> Value {
    if attributes.is_empty() {
        return value;
    }
    let mut map = Map::with_capacity(attributes.len() + 1);
    map.insert("value".into(), value);
    for (name, attr) in attributes {
        let resolved = resolve(attr, issues);
        map.insert(name, resolved);
    }
    Value::Object(map)
}
