//! The statistical engine seam.
//!
//! [`Engine`] is what the service needs from the computation backend: session
//! begin/end, function invocation by name, catalog reflection, and its single
//! process-wide console. All methods block; the invoker runs them on the
//! blocking pool.
//!
//! [`ScriptedEngine`] is an in-memory implementation, always compiled so tests
//! and embedders can drive the full call lifecycle without a backend.

mod scripted;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::servers::ServerSpec;

pub use scripted::{ScriptedCall, ScriptedEngine, ScriptedFunction, ScriptedSession};

/// Error reported by the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Receiver of the engine's console output.
pub trait ConsoleSink: Send + Sync {
    /// Warning and error text.
    fn warn_error(&self, text: &str);

    /// Informational print text.
    fn print(&self, text: &str);
}

/// A formal parameter of an engine function.
#[derive(Debug, Clone, PartialEq)]
pub struct Formal {
    pub name: String,
    /// Default value, if the formal has one.
    pub default: Option<Value>,
}

impl Formal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }
}

/// How a function's result is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReturnPolicy {
    /// Result is meaningful; otherwise the call always yields `null`.
    pub returns_value: bool,
    /// The function renders a plot.
    pub produces_plot: bool,
}

impl ReturnPolicy {
    pub const VALUE: Self = Self {
        returns_value: true,
        produces_plot: false,
    };
    pub const EFFECT: Self = Self {
        returns_value: false,
        produces_plot: false,
    };
}

/// Where and how large to render a plot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotTarget {
    pub path: PathBuf,
    pub width_in: f64,
    pub height_in: f64,
    pub resolution: u32,
}

/// A bound function invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRequest {
    /// Catalog name, e.g. `ds.quantileMean`.
    pub function: String,
    /// Bound parameters. Never contains `datasources`.
    pub parameters: Map<String, Value>,
    /// 0-based subset of the session's servers, `None` for all.
    pub servers: Option<Vec<usize>>,
    pub plot: Option<PlotTarget>,
}

/// The computation backend.
pub trait Engine: Send + Sync + 'static {
    /// Engine-side connection to a set of data servers.
    type Session: Send + Sync + 'static;

    /// Log into the given servers.
    fn begin_session(
        &self,
        servers: &[ServerSpec],
        options: &Map<String, Value>,
    ) -> Result<Self::Session, EngineError>;

    /// Run a function against a session, binding `datasources` to the
    /// selected servers. Returns the serialized value tree.
    fn invoke_function(
        &self,
        session: &Self::Session,
        request: &FunctionRequest,
    ) -> Result<Value, EngineError>;

    /// Log out. Returns the serialized value tree (`{"type": "NULL"}` or bare
    /// `null` when there is nothing to report).
    fn end_session(&self, session: &Self::Session) -> Result<Value, EngineError>;

    /// Names of all callable functions.
    fn list_functions(&self) -> Result<Vec<String>, EngineError>;

    /// Formal parameters of a function, in declaration order.
    fn function_formals(&self, name: &str) -> Result<Vec<Formal>, EngineError>;

    /// Return-type classification of a function.
    fn return_policy(&self, name: &str) -> ReturnPolicy;

    /// Install a console sink, returning the one it replaces.
    fn set_console(&self, sink: Arc<dyn ConsoleSink>) -> Arc<dyn ConsoleSink>;

    /// The engine's own error log, populated after some failures.
    fn secondary_error_log(&self) -> Option<String> {
        None
    }
}
