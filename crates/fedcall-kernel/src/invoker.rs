//! Background execution of calls.
//!
//! Each accepted call becomes one tokio task that runs the blocking engine
//! work on the blocking pool:
//!
//! ```text
//! spawn ──▶ spawn_blocking ──▶ route console to call ──▶ engine work
//!                                                          │
//!   complete(call) ◀── settle (logout state) ◀── guard drop ◀┘
//! ```
//!
//! The console route is released before the call completes, so a poller that
//! sees `busy == false` sees the final set of console lines. Engine failures
//! and worker panics end up in the call's result, never in the caller.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use fedcall_types::{PlotId, SessionRef};

use crate::config::ServiceConfig;
use crate::engine::{Engine, EngineError, FunctionRequest, PlotTarget, ReturnPolicy};
use crate::error::{Result, ServiceError};
use crate::registry::{LoginTranscript, Session, SessionRegistry};
use crate::router::{CallSink, OutputRouter};
use crate::servers::ServerSpec;
use crate::tracker::{CallOutput, CallRecord, CallResult};
use crate::value::normalize_partial;

/// An invocation ready to run.
#[derive(Debug, Clone)]
pub struct InvokeJob {
    pub request: FunctionRequest,
    pub policy: ReturnPolicy,
    /// Return the raw serialized tree as a JSON string.
    pub serial: bool,
}

/// Runs login, invoke and logout work in the background.
pub struct AsyncInvoker<E: Engine> {
    engine: Arc<E>,
    router: Arc<OutputRouter>,
    registry: Arc<SessionRegistry<E::Session>>,
    config: Arc<ServiceConfig>,
    runtime: Handle,
}

impl<E: Engine> Clone for AsyncInvoker<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            router: self.router.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<E: Engine> AsyncInvoker<E> {
    pub fn new(
        engine: Arc<E>,
        router: Arc<OutputRouter>,
        registry: Arc<SessionRegistry<E::Session>>,
        config: Arc<ServiceConfig>,
        runtime: Handle,
    ) -> Self {
        Self {
            engine,
            router,
            registry,
            config,
            runtime,
        }
    }

    /// Log in; on success register the session and complete with its reference.
    pub fn start_login(
        &self,
        call: Arc<CallRecord>,
        servers: Vec<ServerSpec>,
        options: Map<String, Value>,
    ) {
        let registry = self.registry.clone();
        let marker = self.config.error_marker.clone();
        let record = call.clone();

        self.spawn(
            call,
            move |engine| {
                let handle = engine
                    .begin_session(&servers, &options)
                    .map_err(|e| classify_login_error(engine, e, &marker))?;
                let (warn_error, print) = record.transcript();
                let session =
                    registry.create_session(servers, handle, LoginTranscript { warn_error, print });
                info!(connection = %session.id(), servers = session.servers().len(), "session opened");
                Ok(CallOutput::Session(SessionRef::new(session.id())))
            },
            |_| {},
        );
    }

    /// Run a function against a session.
    pub fn start_invoke(
        &self,
        call: Arc<CallRecord>,
        session: &Session<E::Session>,
        handle: Arc<E::Session>,
        mut job: InvokeJob,
    ) {
        let plot = if job.policy.produces_plot {
            let id = PlotId::new();
            let servers = job
                .request
                .servers
                .as_ref()
                .map_or(session.servers().len(), Vec::len);
            job.request.plot = Some(self.plot_target(id, &job.request.parameters, servers));
            Some(id)
        } else {
            None
        };

        let marker = self.config.error_marker.clone();
        let record = call.clone();
        self.spawn(
            call,
            move |engine| {
                if let Some(target) = &job.request.plot {
                    prepare_plot_dir(&target.path)?;
                }
                let raw = engine
                    .invoke_function(&handle, &job.request)
                    .map_err(|e| engine_failure(engine, e, &marker))?;
                let returned = shape_return(raw, job.policy, job.serial)?;

                let Some(plot) = plot else {
                    return Ok(CallOutput::Value(returned));
                };
                record.set_plot(plot)?;
                let mut out = Map::new();
                out.insert("plot_uuid".into(), Value::String(plot.to_string()));
                if job.policy.returns_value {
                    let key = if job.serial { "return_serial_json" } else { "return_json" };
                    out.insert(key.into(), returned);
                }
                Ok(CallOutput::Value(Value::Object(out)))
            },
            |_| {},
        );
    }

    /// Log out; the session drops its handle once the logout succeeds.
    pub fn start_logout(
        &self,
        call: Arc<CallRecord>,
        session: Arc<Session<E::Session>>,
        handle: Arc<E::Session>,
    ) {
        let marker = self.config.error_marker.clone();
        let connection = session.id();
        self.spawn(
            call,
            move |engine| {
                let raw = engine
                    .end_session(&handle)
                    .map_err(|e| engine_failure(engine, e, &marker))?;
                Ok(CallOutput::Value(shape_return(raw, ReturnPolicy::VALUE, false)?))
            },
            move |result| {
                session.finish_logout(result.is_ok());
                match result {
                    Ok(_) => info!(%connection, "session logged out"),
                    Err(e) => warn!(%connection, "logout failed: {}", e),
                }
            },
        );
    }

    fn plot_target(&self, id: PlotId, parameters: &Map<String, Value>, servers: usize) -> PlotTarget {
        let split = match parameters.get("type") {
            Some(Value::String(t)) => t == "split",
            Some(Value::Array(items)) => items.first().and_then(Value::as_str) == Some("split"),
            _ => false,
        };
        let panels = if split { servers.max(1) } else { 1 };
        PlotTarget {
            path: self.config.plot_dir.join(format!("{}.png", id)),
            width_in: self.config.width_in * panels as f64,
            height_in: self.config.height_in,
            resolution: self.config.resolution,
        }
    }

    /// Run `work` on the blocking pool with the console routed to `call`,
    /// then `settle`, then complete the call.
    fn spawn<W, S>(&self, call: Arc<CallRecord>, work: W, settle: S)
    where
        W: FnOnce(&E) -> CallResult + Send + 'static,
        S: FnOnce(&CallResult) + Send + 'static,
    {
        let engine = self.engine.clone();
        let router = self.router.clone();
        let sink = Arc::new(CallSink::new(call.clone()));
        debug!(call = %call.id(), function = call.function(), kind = %call.kind(), "call started");

        self.runtime.spawn(async move {
            let joined = tokio::task::spawn_blocking(move || {
                let _route = router.route(engine.as_ref(), sink);
                work(engine.as_ref())
            })
            .await;

            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(ServiceError::Runtime {
                    message: format!("call worker failed: {}", e),
                }),
            };
            settle(&result);

            match &result {
                Ok(_) => debug!(call = %call.id(), "call finished"),
                Err(e) => warn!(call = %call.id(), function = call.function(), "call failed: {}", e),
            }
            if let Err(e) = call.complete(result) {
                warn!(call = %call.id(), "{}", e);
            }
        });
    }
}

fn prepare_plot_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    std::fs::create_dir_all(dir).map_err(|e| ServiceError::PlotStorage {
        path: dir.display().to_string(),
        message: e.to_string(),
    })
}

/// Apply the return policy to a raw engine value.
fn shape_return(raw: Value, policy: ReturnPolicy, serial: bool) -> Result<Value> {
    if !policy.returns_value {
        return Ok(Value::Null);
    }
    if serial {
        return serde_json::to_string(&raw)
            .map(Value::String)
            .map_err(|e| ServiceError::engine(format!("cannot serialize result: {}", e)));
    }
    if is_engine_null(&raw) {
        return Ok(Value::Null);
    }
    normalize_partial(&raw).into_result()
}

fn is_engine_null(raw: &Value) -> bool {
    raw.is_null() || *raw == json!({"type": "NULL"})
}

/// Wrap an engine error, attaching the secondary log when the message asks
/// for it.
fn engine_failure<E: Engine>(engine: &E, err: EngineError, marker: &str) -> ServiceError {
    let secondary_log = if !marker.is_empty() && err.message.contains(marker) {
        engine.secondary_error_log()
    } else {
        None
    };
    ServiceError::Engine {
        message: err.message,
        secondary_log,
    }
}

/// Map the engine's login failures onto parameter errors where possible.
fn classify_login_error<E: Engine>(engine: &E, err: EngineError, marker: &str) -> ServiceError {
    let m = err.message.as_str();
    if m.contains("The server parameter cannot be empty") {
        ServiceError::missing("server")
    } else if m.contains("The url parameter cannot be empty") {
        ServiceError::missing("url")
    } else if m.contains("Duplicate server name: ") {
        ServiceError::invalid("server", "duplicate")
    } else if m.contains("missing both table and resource columns") {
        ServiceError::invalid("table, resource", "both missing")
    } else if m.contains("Unauthorized") {
        ServiceError::Unauthorized {
            message: err.message,
        }
    } else {
        engine_failure(engine, err, marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedEngine;

    #[test]
    fn test_shape_return_policy() {
        let raw = json!({"type": "double", "value": [2.5]});
        assert_eq!(shape_return(raw.clone(), ReturnPolicy::EFFECT, false).unwrap(), Value::Null);
        assert_eq!(shape_return(raw.clone(), ReturnPolicy::VALUE, false).unwrap(), json!(2.5));

        let serial = shape_return(raw.clone(), ReturnPolicy::VALUE, true).unwrap();
        let text = serial.as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(text).unwrap(), raw);

        assert_eq!(
            shape_return(json!({"type": "NULL"}), ReturnPolicy::VALUE, false).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_malformed_result_is_an_error() {
        let err = shape_return(json!({"type": "closure"}), ReturnPolicy::VALUE, false).unwrap_err();
        assert!(matches!(err, ServiceError::MalformedValue { .. }));
    }

    #[test]
    fn test_malformed_result_keeps_decodable_siblings() {
        let raw = json!({
            "type": "list",
            "attributes": {"names": {"type": "character", "value": ["study1", "study2"]}},
            "value": [{"type": "integer", "value": [42]}, {"type": "S4", "value": []}]
        });
        match shape_return(raw, ReturnPolicy::VALUE, false).unwrap_err() {
            ServiceError::MalformedValue { path, partial, .. } => {
                assert_eq!(path, "$.value[1].type");
                assert_eq!(partial, Some(json!({"study1": 42, "study2": null})));
            }
            other => panic!("expected malformed value, got {:?}", other),
        }
    }

    #[test]
    fn test_login_error_classification() {
        let engine = ScriptedEngine::new();
        let classify = |m: &str| classify_login_error(&engine, EngineError::new(m), "datashield.errors");

        assert_eq!(
            classify("Error: The url parameter cannot be empty"),
            ServiceError::missing("url")
        );
        assert_eq!(
            classify("Duplicate server name: s1"),
            ServiceError::invalid("server", "duplicate")
        );
        assert_eq!(
            classify("The provided login details is missing both table and resource columns"),
            ServiceError::invalid("table, resource", "both missing")
        );
        assert!(matches!(classify("401 Unauthorized"), ServiceError::Unauthorized { .. }));
        assert_eq!(classify("timeout"), ServiceError::engine("timeout"));
    }

    #[test]
    fn test_secondary_log_only_on_marker() {
        let engine = ScriptedEngine::new().secondary_log("s1: object 'D' not found");
        let plain = engine_failure(&engine, EngineError::new("boom"), "datashield.errors");
        assert_eq!(plain, ServiceError::engine("boom"));

        let marked = engine_failure(
            &engine,
            EngineError::new("see datashield.errors()"),
            "datashield.errors",
        );
        match marked {
            ServiceError::Engine { secondary_log, .. } => {
                assert_eq!(secondary_log.as_deref(), Some("s1: object 'D' not found"));
            }
            other => panic!("expected engine error, got {:?}", other),
        }
    }
}
