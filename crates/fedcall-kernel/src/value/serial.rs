//! Decoding of the engine's serialized value format.
//!
//! The engine serializes every value as a tagged node:
//!
//! ```json
//! {"type": "double", "attributes": {"names": {"type": "character", "value": ["a", "b"]}},
//!  "value": [1.5, "NA"]}
//! ```
//!
//! [`SerialValue::parse`] turns that JSON into an explicit variant tree and
//! casts atomic elements to their declared type. It never fails outright: a
//! node that cannot be decoded becomes [`SerialValue::Malformed`] carrying its
//! path, and its siblings decode normally.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};
use strum::{Display, EnumString};

use super::MalformedValue;

/// The engine's missing-value marker. Never cast.
pub const NA: &str = "NA";

/// Element type of an atomic vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AtomicKind {
    Integer,
    Double,
    Character,
    Complex,
    Logical,
}

/// Named attributes of a node, in source order.
pub type Attributes = Vec<(String, SerialValue)>;

/// A decoded node of the serialized value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialValue {
    /// `{"type": "NULL"}`.
    Null,
    /// Atomic vector; elements are already cast to `kind`.
    Atomic {
        kind: AtomicKind,
        values: Vec<Value>,
        attributes: Attributes,
    },
    /// Generic vector (`list`).
    List {
        items: Vec<SerialValue>,
        attributes: Attributes,
    },
    /// Bare JSON array met while recursing.
    Array(Vec<SerialValue>),
    /// Bare JSON object without a `type` tag.
    Object(Vec<(String, SerialValue)>),
    /// Bare JSON scalar.
    Scalar(Value),
    /// A node that could not be decoded.
    Malformed(MalformedValue),
}

impl SerialValue {
    /// Decode a serialized value tree.
    pub fn parse(json: &Value) -> Self {
        parse_at(json, "$")
    }
}

fn parse_at(json: &Value, path: &str) -> SerialValue {
    match json {
        Value::Array(items) => SerialValue::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| parse_at(item, &format!("{path}[{i}]")))
                .collect(),
        ),
        Value::Object(map) if map.contains_key("type") => parse_tagged(map, path),
        Value::Object(map) => SerialValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), parse_at(v, &format!("{path}.{k}"))))
                .collect(),
        ),
        scalar => SerialValue::Scalar(scalar.clone()),
    }
}

fn parse_tagged(map: &Map<String, Value>, path: &str) -> SerialValue {
    let tag = match map.get("type") {
        Some(Value::String(tag)) => tag.as_str(),
        _ => return malformed(format!("{path}.type"), "type tag is not a string"),
    };

    if tag == "NULL" {
        return SerialValue::Null;
    }

    let attributes = match parse_attributes(map.get("attributes"), path) {
        Ok(attributes) => attributes,
        Err(m) => return SerialValue::Malformed(m),
    };

    let value_path = format!("{path}.value");
    let Some(value) = map.get("value") else {
        return malformed(value_path, "missing value");
    };

    if tag == "list" {
        let items = match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| parse_at(item, &format!("{value_path}[{i}]")))
                .collect(),
            _ => return malformed(value_path, "list value is not an array"),
        };
        return SerialValue::List { items, attributes };
    }

    let Ok(kind) = AtomicKind::from_str(tag) else {
        return malformed(format!("{path}.type"), format!("unknown type tag '{tag}'"));
    };

    let raw: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        scalar => vec![scalar],
    };

    let mut values = Vec::with_capacity(raw.len());
    for (i, element) in raw.into_iter().enumerate() {
        match cast(kind, element) {
            Some(v) => values.push(v),
            None => {
                return malformed(
                    format!("{value_path}[{i}]"),
                    format!("cannot read {element} as {kind}"),
                );
            }
        }
    }

    SerialValue::Atomic {
        kind,
        values,
        attributes,
    }
}

fn parse_attributes(attributes: Option<&Value>, path: &str) -> Result<Attributes, MalformedValue> {
    match attributes {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), parse_at(v, &format!("{path}.attributes.{k}"))))
            .collect()),
        Some(_) => Err(MalformedValue::new(
            format!("{path}.attributes"),
            "attributes is not a map",
        )),
    }
}

fn malformed(path: impl Into<String>, reason: impl Into<String>) -> SerialValue {
    SerialValue::Malformed(MalformedValue::new(path, reason))
}

/// Cast one element to `kind`. The NA marker and JSON null pass through.
fn cast(kind: AtomicKind, element: &Value) -> Option<Value> {
    match element {
        Value::String(s) if s == NA => return Some(element.clone()),
        Value::Null => return Some(Value::Null),
        _ => {}
    }

    match kind {
        AtomicKind::Integer => cast_integer(element),
        AtomicKind::Double => cast_double(element),
        AtomicKind::Character => Some(match element {
            Value::String(_) => element.clone(),
            other => Value::String(other.to_string()),
        }),
        AtomicKind::Logical => cast_logical(element),
        AtomicKind::Complex => cast_complex(element),
    }
}

fn cast_integer(element: &Value) -> Option<Value> {
    match element {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(element.clone()),
        Value::Number(n) => {
            let f = n.as_f64()?;
            (f.fract() == 0.0).then(|| Value::from(f as i64))
        }
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn cast_double(element: &Value) -> Option<Value> {
    let f = match element {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    match Number::from_f64(f) {
        Some(n) => Some(Value::Number(n)),
        // "NaN", "Inf" and "-Inf" have no JSON number form.
        None => Some(element.clone()),
    }
}

fn cast_logical(element: &Value) -> Option<Value> {
    match element {
        Value::Bool(_) => Some(element.clone()),
        Value::String(s) => match s.as_str() {
            "TRUE" | "true" | "T" => Some(Value::Bool(true)),
            "FALSE" | "false" | "F" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

static COMPLEX_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)\s*([+-])\s*((?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)i\s*$",
    )
    .expect("complex literal pattern compiles")
});

/// Complex numbers become `{"re": .., "im": ..}`.
fn cast_complex(element: &Value) -> Option<Value> {
    let (re, im) = match element {
        Value::Number(n) => (n.as_f64()?, 0.0),
        Value::String(s) => {
            let caps = COMPLEX_LITERAL.captures(s)?;
            let re: f64 = caps[1].parse().ok()?;
            let magnitude: f64 = caps[3].parse().ok()?;
            let im = if &caps[2] == "-" { -magnitude } else { magnitude };
            (re, im)
        }
        _ => return None,
    };
    let mut map = Map::new();
    map.insert("re".into(), Value::Number(Number::from_f64(re)?));
    map.insert("im".into(), Value::Number(Number::from_f64(im)?));
    Some(Value::Object(map))
}
