//! Engine value normalization.
//!
//! Converts the engine's tagged serialized value tree into plain JSON shaped
//! the way a consumer expects: vectors become arrays (or scalars when they hold
//! one element), named vectors become objects, matrices and data frames become
//! row-major tables with header rows.
//!
//! ```text
//! JSON ──parse──▶ SerialValue ──resolve──▶ JSON with {value, ..attrs} wrappers
//!                                              │
//!                                              └──reshape──▶ normalized JSON
//! ```
//!
//! `resolve` casts and collapses; `reshape` matches the key set of every
//! wrapper object against the known shapes. Shape matching has to run after
//! resolution: only then are the wrapper key sets stable.

mod reshape;
mod resolve;
pub mod serial;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;

pub use serial::{AtomicKind, SerialValue};

/// A node of the engine value tree that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedValue {
    /// JSON path of the node, rooted at `$`.
    pub path: String,
    pub reason: String,
}

impl MalformedValue {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<MalformedValue> for ServiceError {
    fn from(m: MalformedValue) -> Self {
        ServiceError::MalformedValue {
            path: m.path,
            reason: m.reason,
            partial: None,
        }
    }
}

/// Result of a best-effort normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Normalized tree; malformed nodes are replaced by `null`.
    pub value: Value,
    /// Every node that could not be decoded, in document order.
    pub issues: Vec<MalformedValue>,
}

/// Normalize an engine value tree, converting every decodable subtree.
pub fn normalize_partial(json: &Value) -> Normalized {
    let parsed = SerialValue::parse(json);
    let mut issues = Vec::new();
    let resolved = resolve::resolve(parsed, &mut issues);
    Normalized {
        value: reshape::reshape(resolved),
        issues,
    }
}

impl Normalized {
    /// Fail on the first issue, keeping the partially normalized tree.
    pub fn into_result(self) -> Result<Value, ServiceError> {
        match self.issues.into_iter().next() {
            Some(issue) => Err(ServiceError::MalformedValue {
                path: issue.path,
                reason: issue.reason,
                partial: Some(self.value),
            }),
            None => Ok(self.value),
        }
    }
}

/// Normalize an engine value tree, failing on the first malformed node.
pub fn normalize(json: &Value) -> Result<Value, MalformedValue> {
    let Normalized { value, issues } = normalize_partial(json);
    match issues.into_iter().next() {
        Some(issue) => Err(issue),
        None => Ok(value),
    }
}
