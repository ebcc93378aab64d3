//! Rhai-driven service configuration.
//!
//! Evaluates `service.rhai` scripts into a [`ServiceConfig`]. The script
//! defines a `service` map; every key is optional:
//!
//! ```rhai
//! let service = #{
//!     plot_dir: "/var/tmp/fedcall/plots",
//!     function_prefix: "ds.",
//!     error_marker: "datashield.errors",
//!     width_in: 10.0,
//!     height_in: 10.0,
//!     resolution: 300,
//! };
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from loading a service configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("service.rhai parse error: {0}")]
    Parse(String),

    #[error("service.rhai eval error: {0}")]
    Eval(String),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config key {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Service settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Directory plot images are written to.
    pub plot_dir: PathBuf,
    /// Prefix stripped from function names to form shortcuts.
    pub function_prefix: String,
    /// Engine error text that asks for the secondary error log.
    pub error_marker: String,
    /// Plot width per server, in inches.
    pub width_in: f64,
    pub height_in: f64,
    /// Plot resolution in dots per inch.
    pub resolution: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            plot_dir: std::env::temp_dir().join("fedcall-plots"),
            function_prefix: "ds.".to_string(),
            error_marker: "datashield.errors".to_string(),
            width_in: 10.0,
            height_in: 10.0,
            resolution: 300,
        }
    }
}

impl ServiceConfig {
    pub fn with_plot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plot_dir = dir.into();
        self
    }
}

/// Parse a `service.rhai` script. Missing keys keep their defaults.
pub fn load_service_config(script: &str) -> Result<ServiceConfig, ConfigError> {
    let engine = rhai::Engine::new();
    let ast = engine
        .compile(script)
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut scope = rhai::Scope::new();
    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|e| ConfigError::Eval(e.to_string()))?;
    extract_service(&scope)
}

/// Read and parse a `service.rhai` file.
pub fn load_service_config_file(path: impl AsRef<Path>) -> Result<ServiceConfig, ConfigError> {
    let path = path.as_ref();
    let script = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_service_config(&script)
}

fn extract_service(scope: &rhai::Scope) -> Result<ServiceConfig, ConfigError> {
    let mut config = ServiceConfig::default();
    let Some(map) = scope.get_value::<rhai::Map>("service") else {
        return Ok(config);
    };

    if let Some(v) = map.get("plot_dir") {
        config.plot_dir = PathBuf::from(text("plot_dir", v)?);
    }
    if let Some(v) = map.get("function_prefix") {
        config.function_prefix = text("function_prefix", v)?;
    }
    if let Some(v) = map.get("error_marker") {
        config.error_marker = text("error_marker", v)?;
    }
    if let Some(v) = map.get("width_in") {
        config.width_in = inches("width_in", v)?;
    }
    if let Some(v) = map.get("height_in") {
        config.height_in = inches("height_in", v)?;
    }
    if let Some(v) = map.get("resolution") {
        let dpi = v
            .as_int()
            .map_err(|t| ConfigError::invalid("resolution", format!("expected int, got {t}")))?;
        config.resolution = u32::try_from(dpi)
            .ok()
            .filter(|dpi| *dpi > 0)
            .ok_or_else(|| ConfigError::invalid("resolution", "must be positive"))?;
    }
    Ok(config)
}

fn text(key: &str, value: &rhai::Dynamic) -> Result<String, ConfigError> {
    value
        .clone()
        .into_string()
        .map_err(|t| ConfigError::invalid(key, format!("expected string, got {t}")))
}

fn inches(key: &str, value: &rhai::Dynamic) -> Result<f64, ConfigError> {
    let n = match (value.as_float(), value.as_int()) {
        (Ok(f), _) => f,
        (_, Ok(i)) => i as f64,
        _ => {
            return Err(ConfigError::invalid(
                key,
                format!("expected number, got {}", value.type_name()),
            ));
        }
    };
    if n.is_finite() && n > 0.0 {
        Ok(n)
    } else {
        Err(ConfigError::invalid(key, "must be positive"))
    }
}
