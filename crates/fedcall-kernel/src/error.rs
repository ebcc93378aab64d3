//! Error types for the call service.
//!
//! `ServiceError` is both what the public operations return synchronously and
//! what a failed background call stores as its terminal result, so it is
//! `Clone` and serializable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use thiserror::Error;

/// What kind of identifier failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotFoundKind {
    /// Unknown or logged-out session.
    Connection,
    /// Unknown call within a known session.
    Call,
    /// Unknown login call.
    Login,
}

/// Errors surfaced by the call service.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ServiceError {
    /// A required parameter was not supplied.
    #[error("missing parameter: {name}")]
    MissingParameter { name: String },

    /// A parameter was supplied but cannot be used.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The engine does not expose the requested function.
    #[error("function not found: {name}")]
    FunctionNotFound { name: String },

    /// A call was completed twice.
    #[error("call {call} is already complete")]
    CallAlreadyComplete { call: String },

    /// The result was requested before the call finished.
    #[error("call {call} is still running")]
    CallBusy { call: String },

    /// An identifier did not resolve.
    #[error("{kind} {id} not found")]
    NotFound { kind: NotFoundKind, id: String },

    /// The data servers rejected the credentials.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// The engine reported an error while running the call.
    #[error("engine error: {message}{}", secondary_suffix(.secondary_log))]
    Engine {
        message: String,
        secondary_log: Option<String>,
    },

    /// The engine returned a value tree that could not be normalized.
    ///
    /// `partial` holds the rest of the tree, with undecodable nodes as `null`.
    #[error("malformed value at {path}: {reason}")]
    MalformedValue {
        path: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial: Option<Value>,
    },

    /// The plot directory could not be prepared.
    #[error("cannot store plot at {path}: {message}")]
    PlotStorage { path: String, message: String },

    /// No async runtime to run calls on, or a call worker died.
    #[error("runtime error: {message}")]
    Runtime { message: String },
}

fn secondary_suffix(log: &Option<String>) -> String {
    match log {
        Some(log) => format!("\nsecondary error log:\n{}", log),
        None => String::new(),
    }
}

impl ServiceError {
    /// Create a MissingParameter error.
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingParameter { name: name.into() }
    }

    /// Create an InvalidParameter error.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(kind: NotFoundKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create an Engine error without a secondary log.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
            secondary_log: None,
        }
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
