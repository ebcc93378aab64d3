//! The public operation surface.
//!
//! `login`, `invoke` and `logout` validate synchronously, create a busy call,
//! hand it to the [`AsyncInvoker`] and return its [`Callback`] at once.
//! `get_status` and `get_result` resolve an echoed callback.
//!
//! Calls run in no guaranteed order relative to each other. An `invoke`
//! accepted before a `logout` may still reach the engine after the session
//! has ended, and then fails with the engine's error.
//!
//! # Arguments
//!
//! Parameters may be passed directly, nested under `parameters`, or both;
//! direct keys win on collision. Two control keys are consumed here:
//!
//! | key                  | meaning                                            |
//! |----------------------|----------------------------------------------------|
//! | `servers`            | subset of servers, 1-based positions or names      |
//! | `return_serial_JSON` | return the raw serialized tree as a JSON string    |

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};

use fedcall_types::{Callback, SessionId};

use crate::catalog::FunctionCatalog;
use crate::config::ServiceConfig;
use crate::engine::{Engine, FunctionRequest};
use crate::error::{Result, ServiceError};
use crate::invoker::{AsyncInvoker, InvokeJob};
use crate::registry::{SessionRegistry, SessionStatus};
use crate::router::{OutputRouter, TracingConsole};
use crate::servers::{ServerSpec, parse_servers};
use crate::tracker::{CallKind, CallResult, CallStatus};

/// Operations every dispatcher exposes, besides the function shortcuts.
pub const OPERATIONS: &[&str] = &[
    "login",
    "invoke",
    "logout",
    "get_status",
    "get_result",
    "session_status",
];

const NESTED_PARAMETERS: &str = "parameters";
const SERVERS: &str = "servers";
const RETURN_SERIAL: &str = "return_serial_JSON";

/// Entry point for all calls against one engine.
pub struct CallDispatcher<E: Engine> {
    registry: Arc<SessionRegistry<E::Session>>,
    catalog: FunctionCatalog,
    invoker: AsyncInvoker<E>,
    config: Arc<ServiceConfig>,
}

impl<E: Engine> std::fmt::Debug for CallDispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDispatcher")
            .field("functions", &self.catalog.len())
            .field("sessions", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<E: Engine> CallDispatcher<E> {
    /// Create a dispatcher running calls on the current tokio runtime.
    pub fn new(engine: Arc<E>, config: ServiceConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| ServiceError::Runtime {
            message: e.to_string(),
        })?;
        Self::with_runtime(engine, config, runtime)
    }

    /// Create a dispatcher running calls on `runtime`.
    ///
    /// Reflects the engine's function catalog and points its console at the
    /// tracing fallback.
    pub fn with_runtime(engine: Arc<E>, config: ServiceConfig, runtime: Handle) -> Result<Self> {
        let catalog = FunctionCatalog::from_engine(engine.as_ref(), &config.function_prefix)
            .map_err(|e| ServiceError::engine(e.message))?;
        engine.set_console(Arc::new(TracingConsole));

        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new());
        let invoker = AsyncInvoker::new(
            engine,
            Arc::new(OutputRouter::new()),
            registry.clone(),
            config.clone(),
            runtime,
        );
        info!(functions = catalog.len(), "call dispatcher ready");

        Ok(Self {
            registry,
            catalog,
            invoker,
            config,
        })
    }

    pub fn catalog(&self) -> &FunctionCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Public operation names followed by one shortcut per catalog function.
    pub fn operations(&self) -> Vec<String> {
        OPERATIONS
            .iter()
            .map(|op| op.to_string())
            .chain(self.catalog.entries().iter().map(|e| e.shortcut.clone()))
            .collect()
    }

    /// Start a login against `servers`.
    #[instrument(skip_all, fields(servers = servers.len()))]
    pub fn login(&self, servers: &[Value], arguments: Map<String, Value>) -> Result<Callback> {
        let specs = parse_servers(servers)?;
        let options = merge_arguments(arguments)?;

        let call = self.registry.logins().create("login", CallKind::Login);
        let callback = Callback::Login(call.id());
        info!(call = %call.id(), "login accepted");
        self.invoker.start_login(call, specs, options);
        Ok(callback)
    }

    /// Start a function call on a session.
    #[instrument(skip(self, arguments))]
    pub fn invoke(
        &self,
        connection: SessionId,
        function: &str,
        arguments: Map<String, Value>,
    ) -> Result<Callback> {
        let session = self.registry.session(&connection)?;
        let handle = session.handle_for_invoke()?;
        let entry = self.catalog.resolve(function)?;

        let mut parameters = merge_arguments(arguments)?;
        let servers = match parameters.remove(SERVERS) {
            Some(selection) => select_servers(&selection, session.servers())?,
            None => None,
        };
        let serial = match parameters.remove(RETURN_SERIAL) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => b,
            Some(_) => return Err(ServiceError::invalid(RETURN_SERIAL, "expected a boolean")),
        };
        let parameters = entry.bind(parameters)?;

        let call = session.calls().create(entry.name.clone(), CallKind::Invoke);
        let callback = Callback::Call {
            connection,
            call: call.id(),
        };
        debug!(call = %call.id(), function = %entry.name, "invoke accepted");

        let job = InvokeJob {
            request: FunctionRequest {
                function: entry.name.clone(),
                parameters,
                servers,
                plot: None,
            },
            policy: entry.policy,
            serial,
        };
        self.invoker.start_invoke(call, &session, handle, job);
        Ok(callback)
    }

    /// Start logging a session out.
    #[instrument(skip(self))]
    pub fn logout(&self, connection: SessionId) -> Result<Callback> {
        let session = self.registry.session(&connection)?;
        let handle = session.begin_logout()?;

        let call = session.calls().create("logout", CallKind::Logout);
        let callback = Callback::Call {
            connection,
            call: call.id(),
        };
        info!(call = %call.id(), "logout accepted");
        self.invoker.start_logout(call, session, handle);
        Ok(callback)
    }

    pub fn get_status(&self, callback: &Callback) -> Result<CallStatus> {
        self.registry.get_status(callback)
    }

    /// Terminal result of a call; a completed login yields a session reference.
    pub fn get_result(&self, callback: &Callback) -> CallResult {
        self.registry.get_result(callback)
    }

    pub fn session_status(&self, connection: SessionId) -> Result<SessionStatus> {
        Ok(self.registry.session(&connection)?.status())
    }
}

/// Flatten direct and nested `parameters`; direct keys win.
pub fn merge_arguments(mut arguments: Map<String, Value>) -> Result<Map<String, Value>> {
    let mut merged = match arguments.remove(NESTED_PARAMETERS) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(nested)) => nested,
        Some(_) => {
            return Err(ServiceError::invalid(NESTED_PARAMETERS, "expected a map"));
        }
    };
    merged.extend(arguments);
    Ok(merged)
}

/// Translate a server selection into 0-based indices.
///
/// Accepts a 1-based position, a server name, or an array of either.
pub fn select_servers(selection: &Value, servers: &[ServerSpec]) -> Result<Option<Vec<usize>>> {
    let one = |item: &Value| -> Result<usize> {
        match item {
            Value::Number(n) => n
                .as_u64()
                .and_then(|p| usize::try_from(p).ok())
                .filter(|p| (1..=servers.len()).contains(p))
                .map(|p| p - 1)
                .ok_or_else(|| {
                    ServiceError::invalid(
                        SERVERS,
                        format!("position {} out of range 1..={}", n, servers.len()),
                    )
                }),
            Value::String(name) => servers
                .iter()
                .position(|s| &s.server == name)
                .ok_or_else(|| ServiceError::invalid(SERVERS, format!("unknown server {}", name))),
            _ => Err(ServiceError::invalid(SERVERS, "expected a position or a name")),
        }
    };

    match selection {
        Value::Null => Ok(None),
        Value::Array(items) if items.is_empty() => {
            Err(ServiceError::invalid(SERVERS, "empty selection"))
        }
        Value::Array(items) => items.iter().map(one).collect::<Result<Vec<_>>>().map(Some),
        item => one(item).map(|i| Some(vec![i])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn servers() -> Vec<ServerSpec> {
        vec![
            ServerSpec::new("s1", "x").with_table("T"),
            ServerSpec::new("s2", "y").with_table("T"),
            ServerSpec::new("s3", "z").with_table("T"),
        ]
    }

    #[test]
    fn test_merge_arguments_direct_wins() {
        let args = json!({"parameters": {"x": "D$a", "type": "split"}, "type": "combine"});
        let merged = merge_arguments(args.as_object().unwrap().clone()).unwrap();
        assert_eq!(merged["x"], "D$a");
        assert_eq!(merged["type"], "combine");
        assert!(!merged.contains_key("parameters"));

        let bad = json!({"parameters": 3});
        assert!(merge_arguments(bad.as_object().unwrap().clone()).is_err());
    }

    #[test]
    fn test_select_servers() {
        let servers = servers();
        assert_eq!(select_servers(&json!(2), &servers).unwrap(), Some(vec![1]));
        assert_eq!(select_servers(&json!([1, 3]), &servers).unwrap(), Some(vec![0, 2]));
        assert_eq!(select_servers(&json!("s3"), &servers).unwrap(), Some(vec![2]));
        assert_eq!(select_servers(&json!(["s2", 1]), &servers).unwrap(), Some(vec![1, 0]));
        assert_eq!(select_servers(&Value::Null, &servers).unwrap(), None);

        assert!(select_servers(&json!(0), &servers).is_err());
        assert!(select_servers(&json!(4), &servers).is_err());
        assert!(select_servers(&json!("s9"), &servers).is_err());
        assert!(select_servers(&json!([]), &servers).is_err());
        assert!(select_servers(&json!(true), &servers).is_err());
    }
}
