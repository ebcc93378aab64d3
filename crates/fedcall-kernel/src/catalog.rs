//! Function catalog.
//!
//! Built once from the engine's reflection (`list_functions`,
//! `function_formals`, `return_policy`). Invocation resolves through this
//! table by exact name or by shortcut: `ds.quantileMean` is also reachable as
//! `quantileMean`, `ds.dataFrame.fill` as `dataFrame_fill`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde_json::{Map, Value};

use crate::engine::{Engine, EngineError, Formal, ReturnPolicy};
use crate::error::{Result, ServiceError};

/// Formal bound by the engine from the session, never by callers.
pub const DATASOURCES: &str = "datasources";

/// Formal accepting arbitrary extra parameters.
pub const VARARGS: &str = "...";

/// One callable function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionEntry {
    pub name: String,
    pub shortcut: String,
    pub formals: Vec<Formal>,
    pub policy: ReturnPolicy,
}

impl FunctionEntry {
    fn formal(&self, name: &str) -> Option<&Formal> {
        self.formals.iter().find(|f| f.name == name)
    }

    fn accepts_varargs(&self) -> bool {
        self.formal(VARARGS).is_some()
    }

    /// Bind caller parameters against the formals.
    ///
    /// Unknown keys are retried with `_` read as `.` (`row_names` binds
    /// `row.names`); formal defaults fill in whatever is left unbound.
    pub fn bind(&self, supplied: Map<String, Value>) -> Result<Map<String, Value>> {
        let mut bound: HashMap<String, Value> = HashMap::new();
        let mut extra = Map::new();

        for (key, value) in supplied {
            if key == DATASOURCES {
                return Err(ServiceError::invalid(DATASOURCES, "bound by the session"));
            }
            if self.formal(&key).is_some() {
                bound.insert(key, value);
                continue;
            }
            let dotted = key.replace('_', ".");
            if self.formal(&dotted).is_some() {
                bound.insert(dotted, value);
            } else if self.accepts_varargs() {
                extra.insert(key, value);
            } else {
                return Err(ServiceError::invalid(
                    key,
                    format!("not a parameter of {}", self.name),
                ));
            }
        }

        let mut out = Map::new();
        for formal in &self.formals {
            if formal.name == DATASOURCES || formal.name == VARARGS {
                continue;
            }
            match bound.remove(&formal.name) {
                Some(value) => {
                    out.insert(formal.name.clone(), value);
                }
                None => {
                    if let Some(default) = &formal.default {
                        out.insert(formal.name.clone(), default.clone());
                    }
                }
            }
        }
        out.extend(extra);
        Ok(out)
    }
}

/// Shortcut name for a catalog function: prefix stripped, `.` as `_`.
pub fn shortcut(name: &str, prefix: &str) -> String {
    let stem = if prefix.is_empty() {
        name
    } else {
        name.strip_prefix(prefix).unwrap_or(name)
    };
    stem.replace('.', "_")
}

/// Lookup table of the engine's functions.
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    entries: Vec<FunctionEntry>,
    index: HashMap<String, usize>,
}

impl FunctionCatalog {
    /// Reflect the engine's catalog.
    pub fn from_engine<E: Engine>(engine: &E, prefix: &str) -> std::result::Result<Self, EngineError> {
        let mut entries = Vec::new();
        for name in engine.list_functions()? {
            let formals = engine.function_formals(&name)?;
            entries.push(FunctionEntry {
                shortcut: shortcut(&name, prefix),
                policy: engine.return_policy(&name),
                formals,
                name,
            });
        }
        Ok(Self::from_entries(entries))
    }

    /// Exact names take precedence over shortcuts; the first shortcut wins
    /// a collision.
    pub fn from_entries(entries: Vec<FunctionEntry>) -> Self {
        let mut index = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            index.insert(entry.name.clone(), i);
        }
        for (i, entry) in entries.iter().enumerate() {
            if let Entry::Vacant(slot) = index.entry(entry.shortcut.clone()) {
                slot.insert(i);
            } else if entry.shortcut != entry.name {
                tracing::debug!(
                    function = %entry.name,
                    shortcut = %entry.shortcut,
                    "shortcut already taken"
                );
            }
        }
        Self { entries, index }
    }

    /// Resolve a function by name or shortcut.
    pub fn resolve(&self, name: &str) -> Result<&FunctionEntry> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| ServiceError::FunctionNotFound { name: name.into() })
    }

    pub fn entries(&self) -> &[FunctionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
