//! Login server specifications.
//!
//! A login names one or more data servers. Each entry is a JSON object:
//!
//! ```json
//! {"server": "study1", "url": "https://opal.example", "user": "u", "password": "p",
//!  "table": "CNSIM.CNSIM1"}
//! ```
//!
//! `server` and `url` are required, names must be unique, and each server
//! needs a `table` or a `resource`. All other keys are kept verbatim and
//! handed to the engine.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, ServiceError};

/// One data server of a login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub server: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Credentials, driver and anything else the engine understands.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerSpec {
    pub fn new(server: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            url: url.into(),
            table: None,
            resource: None,
            extra: Map::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Parse one server map, checking required fields.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(ServiceError::invalid("servers", "each server must be a map"));
        };

        let server = required_text(map, "server")?;
        let url = required_text(map, "url")?;
        let table = optional_text(map, "table")?;
        let resource = optional_text(map, "resource")?;
        if table.is_none() && resource.is_none() {
            return Err(ServiceError::invalid("table, resource", "both missing"));
        }

        let extra = map
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "server" | "url" | "table" | "resource"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            server,
            url,
            table,
            resource,
            extra,
        })
    }
}

fn required_text(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | Some(Value::Null) | None => Err(ServiceError::missing(key)),
        Some(_) => Err(ServiceError::invalid(key, "must be a string")),
    }
}

fn optional_text(map: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
        Some(Value::String(_)) | Some(Value::Null) | None => Ok(None),
        Some(_) => Err(ServiceError::invalid(key, "must be a string")),
    }
}

/// Validate the server list of a login.
///
/// Runs before any background work so that the caller sees problems
/// immediately.
pub fn parse_servers(list: &[Value]) -> Result<Vec<ServerSpec>> {
    if list.is_empty() {
        return Err(ServiceError::missing("list_of_servers"));
    }

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(list.len());
    for entry in list {
        let spec = ServerSpec::from_value(entry)?;
        if !seen.insert(spec.server.clone()) {
            return Err(ServiceError::invalid("server", "duplicate"));
        }
        specs.push(spec);
    }
    Ok(specs)
}
