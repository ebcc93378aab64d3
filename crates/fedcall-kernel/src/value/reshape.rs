//! Second pass: shape reconstruction.
//!
//! Every object left by the first pass is matched on its exact key set:
//!
//! | keys                                 | shape                      |
//! |--------------------------------------|----------------------------|
//! | `value`                              | plain value                |
//! | `names, value`                       | named vector / list        |
//! | `dim, dimnames, value`               | matrix or 1-D table        |
//! | `class, names, row.names, value`     | data frame                 |
//! | `logarithm, value`                   | log-scaled values          |
//! | `class, names, value`                | classed named list         |
//!
//! Anything else passes through with its children reshaped. A wrapper whose
//! parts do not line up (length mismatch, non-2-D `dim`) also passes through
//! rather than failing.

use serde_json::{Map, Number, Value};

pub(super) fn reshape(node: Value) -> Value {
    match node {
        Value::Array(items) => Value::Array(items.into_iter().map(reshape).collect()),
        Value::Object(map) => reshape_object(map),
        scalar => scalar,
    }
}

#[derive(Clone, Copy)]
enum Shape {
    Plain,
    Named,
    Matrix,
    DataFrame,
    Logarithm,
    ClassedNamed,
    Other,
}

impl Shape {
    fn of(map: &Map<String, Value>) -> Self {
        let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
        keys.sort_unstable();
        match keys.as_slice() {
            ["value"] => Shape::Plain,
            ["names", "value"] => Shape::Named,
            ["dim", "dimnames", "value"] => Shape::Matrix,
            ["class", "names", "row.names", "value"] => Shape::DataFrame,
            ["logarithm", "value"] => Shape::Logarithm,
            ["class", "names", "value"] => Shape::ClassedNamed,
            _ => Shape::Other,
        }
    }
}

fn reshape_object(mut map: Map<String, Value>) -> Value {
    let shaped = match Shape::of(&map) {
        Shape::Plain => map.remove("value").map(reshape),
        Shape::Named => named(&map),
        Shape::Matrix => matrix(&map),
        Shape::DataFrame => data_frame(&map),
        Shape::Logarithm => Some(logarithm(&map)),
        Shape::ClassedNamed => named(&map).map(|named| with_class(named, &map)),
        Shape::Other => None,
    };

    match shaped {
        Some(value) => value,
        None => passthrough(map),
    }
}

fn passthrough(map: Map<String, Value>) -> Value {
    Value::Object(map.into_iter().map(|(k, v)| (k, reshape(v))).collect())
}

fn with_class(shaped: Value, map: &Map<String, Value>) -> Value {
    let class = map.get("class").cloned().map(reshape).unwrap_or(Value::Null);
    match shaped {
        Value::Object(mut obj) => {
            obj.insert("class".into(), class);
            Value::Object(obj)
        }
        other => {
            let mut obj = Map::new();
            obj.insert("value".into(), other);
            obj.insert("class".into(), class);
            Value::Object(obj)
        }
    }
}

/// Labels of an axis: an array's items, nothing for `null`, else the scalar.
fn labels(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        scalar => vec![scalar.clone()],
    }
}

fn key_of(label: &Value) -> String {
    match label {
        Value::String(s) => s.clone(),
        Value::Null => "NA".to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// Named vectors
// ============================================================================

/// Zip names against values. A scalar `names` is a single name and keys the
/// whole value, whatever its shape.
fn named(map: &Map<String, Value>) -> Option<Value> {
    let names = map.get("names")?;
    let value = reshape(map.get("value")?.clone());

    let mut out = Map::new();
    match names {
        Value::Array(names) => {
            let Value::Array(items) = value else {
                return None;
            };
            if names.len() != items.len() {
                return None;
            }
            for (name, item) in names.iter().zip(items) {
                out.insert(key_of(name), item);
            }
        }
        name => {
            out.insert(key_of(name), value);
        }
    }
    Some(Value::Object(out))
}

// ============================================================================
// Matrices
// ============================================================================

/// Row and column labels plus the optional axis titles.
struct Dimnames {
    rows: Vec<Value>,
    cols: Vec<Value>,
    col_title: Option<String>,
}

impl Dimnames {
    fn parse(value: &Value) -> Option<Self> {
        let (axes, titles) = match value {
            Value::Object(obj) => (obj.get("value")?, obj.get("names")),
            other => (other, None),
        };
        let Value::Array(axes) = axes else {
            return None;
        };
        let [rows, cols] = axes.as_slice() else {
            return None;
        };
        let col_title = titles
            .and_then(|t| t.as_array())
            .and_then(|t| t.get(1))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Some(Self {
            rows: labels(rows),
            cols: labels(cols),
            col_title,
        })
    }
}

fn matrix(map: &Map<String, Value>) -> Option<Value> {
    let dim = map.get("dim")?;
    let dimnames = map.get("dimnames")?;
    let value = map.get("value")?;

    let Value::Array(dim) = dim else {
        return Some(table(dimnames, value));
    };
    let [nrow, ncol] = dim.as_slice() else {
        return None;
    };
    let nrow = usize::try_from(nrow.as_u64()?).ok()?;
    let ncol = usize::try_from(ncol.as_u64()?).ok()?;

    let cells: Vec<Value> = labels(value).into_iter().map(reshape).collect();
    if cells.len() != nrow * ncol {
        return None;
    }
    let names = Dimnames::parse(dimnames)?;
    if (!names.rows.is_empty() && names.rows.len() != nrow)
        || (!names.cols.is_empty() && names.cols.len() != ncol)
    {
        return None;
    }

    // Column-major source: element (i, j) sits at j * nrow + i.
    let rows: Vec<Vec<Value>> = (0..nrow)
        .map(|i| (0..ncol).map(|j| cells[j * nrow + i].clone()).collect())
        .collect();

    if !names.rows.is_empty() {
        let mut header = vec![Value::Null];
        header.extend(names.cols);
        let mut out = vec![Value::Array(header)];
        for (label, row) in names.rows.into_iter().zip(rows) {
            let mut line = vec![label];
            line.extend(row);
            out.push(Value::Array(line));
        }
        return Some(Value::Array(out));
    }

    let mut body: Vec<Value> = Vec::with_capacity(nrow + 1);
    if !names.cols.is_empty() {
        body.push(Value::Array(names.cols));
    }
    body.extend(rows.into_iter().map(Value::Array));
    let body = Value::Array(body);

    Some(match names.col_title {
        Some(title) => {
            let mut obj = Map::new();
            obj.insert(title, body);
            Value::Object(obj)
        }
        None => body,
    })
}

/// One-dimensional table: a label row followed by a value row.
///
/// Labels and counts stay in separate rows so the pairing survives when a
/// label is itself numeric.
fn table(dimnames: &Value, value: &Value) -> Value {
    let dimnames = match dimnames {
        Value::Object(obj) => obj.get("value").unwrap_or(&Value::Null),
        other => other,
    };
    Value::Array(vec![reshape(dimnames.clone()), reshape(value.clone())])
}

// ============================================================================
// Data frames
// ============================================================================

fn data_frame(map: &Map<String, Value>) -> Option<Value> {
    let names = map.get("names")?;
    let value = map.get("value")?;

    let columns: Vec<Vec<Value>> = match names {
        Value::Array(_) => match value {
            Value::Array(cols) => cols.iter().map(|c| labels(&reshape(c.clone()))).collect(),
            _ => return None,
        },
        _ => vec![labels(&reshape(value.clone()))],
    };
    let names = labels(names);
    if names.len() != columns.len() {
        return None;
    }

    let row_labels = row_names(map.get("row.names")?);
    if columns.iter().any(|c| c.len() != row_labels.len()) {
        return None;
    }

    let mut header = vec![Value::Null];
    header.extend(names);
    let mut out = vec![Value::Array(header)];
    for (i, label) in row_labels.into_iter().enumerate() {
        let mut line = vec![label];
        line.extend(columns.iter().map(|c| c[i].clone()));
        out.push(Value::Array(line));
    }

    let mut obj = Map::new();
    obj.insert("value".into(), Value::Array(out));
    obj.insert(
        "class".into(),
        map.get("class").cloned().map(reshape).unwrap_or(Value::Null),
    );
    Some(Value::Object(obj))
}

/// Row labels, expanding the compact `["NA", -n]` form to `1..=n`.
fn row_names(value: &Value) -> Vec<Value> {
    if let Value::Array(items) = value {
        if let [Value::String(na), count] = items.as_slice() {
            if na == super::serial::NA {
                if let Some(n) = count.as_i64().filter(|n| *n < 0) {
                    return (1..=n.unsigned_abs()).map(Value::from).collect();
                }
            }
        }
    }
    labels(value)
}

// ============================================================================
// Log scale
// ============================================================================

fn logarithm(map: &Map<String, Value>) -> Value {
    let value = reshape(map.get("value").cloned().unwrap_or(Value::Null));
    match map.get("logarithm") {
        Some(Value::Bool(true)) => exponentiate(value),
        _ => value,
    }
}

fn exponentiate(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(exponentiate).collect()),
        Value::Number(n) => match n.as_f64().map(f64::exp).and_then(Number::from_f64) {
            Some(exp) => Value::Number(exp),
            None => Value::Number(n),
        },
        other => other,
    }
}
