//! # fedcall-kernel
//!
//! Asynchronous, pollable calls against a federated statistics engine.
//!
//! Every login, function invocation and logout runs in the background and is
//! identified by a callback the client echoes back to poll. A call:
//! - Starts busy and completes exactly once, with a value or an error
//! - Collects the engine console lines emitted while it runs, and only those
//! - Returns engine values normalized to plain JSON (vectors, named lists,
//!   matrices, data frames)
//!
//! The engine itself sits behind the [`Engine`] trait; [`ScriptedEngine`] is
//! an in-memory implementation for tests and demos.

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod registry;
pub mod router;
pub mod servers;
pub mod tracker;
pub mod value;

pub use catalog::{FunctionCatalog, FunctionEntry};
pub use config::{ConfigError, ServiceConfig, load_service_config, load_service_config_file};
pub use dispatcher::CallDispatcher;
pub use engine::{
    ConsoleSink, Engine, EngineError, Formal, FunctionRequest, PlotTarget, ReturnPolicy,
    ScriptedCall, ScriptedEngine, ScriptedFunction, ScriptedSession,
};
pub use error::{NotFoundKind, Result, ServiceError};
pub use invoker::AsyncInvoker;
pub use registry::{LoginTranscript, Session, SessionRegistry, SessionState, SessionStatus};
pub use router::{OutputRouter, TracingConsole};
pub use servers::ServerSpec;
pub use tracker::{CallKind, CallOutput, CallRecord, CallResult, CallStatus, CallTable};
pub use value::{MalformedValue, Normalized, normalize, normalize_partial};

pub use fedcall_types::{CallId, Callback, PlotId, SessionId, SessionRef};
