//! In-memory scripted engine.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use super::{
    ConsoleSink, Engine, EngineError, Formal, FunctionRequest, PlotTarget, ReturnPolicy,
};
use crate::servers::ServerSpec;

/// Bytes written for a rendered plot.
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

type Handler = Arc<dyn Fn(&ScriptedCall<'_>) -> Result<Value, EngineError> + Send + Sync>;

/// What a scripted function handler sees.
pub struct ScriptedCall<'a> {
    pub function: &'a str,
    pub parameters: &'a Map<String, Value>,
    /// Servers bound to `datasources`.
    pub servers: Vec<&'a ServerSpec>,
    /// Options the session was opened with.
    pub options: &'a Map<String, Value>,
    /// Where the plot is being rendered, for plotting functions.
    pub plot: Option<&'a PlotTarget>,
    console: Arc<dyn ConsoleSink>,
}

impl ScriptedCall<'_> {
    /// Write a print line to the engine console.
    pub fn print(&self, text: &str) {
        self.console.print(text);
    }

    /// Write a warning/error line to the engine console.
    pub fn warn(&self, text: &str) {
        self.console.warn_error(text);
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

/// A function exposed by [`ScriptedEngine`].
#[derive(Clone)]
pub struct ScriptedFunction {
    name: String,
    formals: Vec<Formal>,
    policy: ReturnPolicy,
    handler: Handler,
}

impl fmt::Debug for ScriptedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedFunction")
            .field("name", &self.name)
            .field("formals", &self.formals)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ScriptedFunction {
    /// A value-returning function taking only `datasources`, returning NULL.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            formals: vec![Formal::new("datasources")],
            policy: ReturnPolicy::VALUE,
            handler: Arc::new(|_| Ok(json!({"type": "NULL"}))),
        }
    }

    pub fn formal(mut self, name: impl Into<String>) -> Self {
        self.formals.push(Formal::new(name));
        self
    }

    pub fn formal_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.formals.push(Formal::with_default(name, default));
        self
    }

    /// The function's result is never reported.
    pub fn effect_only(mut self) -> Self {
        self.policy.returns_value = false;
        self
    }

    /// The function renders a plot.
    pub fn plot(mut self) -> Self {
        self.policy.produces_plot = true;
        self
    }

    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&ScriptedCall<'_>) -> Result<Value, EngineError> + Send + Sync + 'static,
    {
        self.handler = Arc::new(f);
        self
    }

    /// Always return `value`.
    pub fn returning(self, value: Value) -> Self {
        self.handler(move |_| Ok(value.clone()))
    }

    /// Always fail with `message`.
    pub fn failing(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.handler(move |_| Err(EngineError::new(message.clone())))
    }
}

/// Session opened by [`ScriptedEngine`].
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    servers: Vec<ServerSpec>,
    options: Map<String, Value>,
}

impl ScriptedSession {
    pub fn servers(&self) -> &[ServerSpec] {
        &self.servers
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }
}

struct Discard;

impl ConsoleSink for Discard {
    fn warn_error(&self, _text: &str) {}
    fn print(&self, _text: &str) {}
}

/// Engine backed by scripted functions.
pub struct ScriptedEngine {
    functions: Vec<ScriptedFunction>,
    console: Mutex<Arc<dyn ConsoleSink>>,
    login_failure: Option<String>,
    logout_failure: Mutex<Option<String>>,
    secondary_log: Option<String>,
}

impl fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("functions", &self.functions)
            .field("login_failure", &self.login_failure)
            .field("secondary_log", &self.secondary_log)
            .finish()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            console: Mutex::new(Arc::new(Discard)),
            login_failure: None,
            logout_failure: Mutex::new(None),
            secondary_log: None,
        }
    }

    /// Add a function to the catalog.
    pub fn function(mut self, function: ScriptedFunction) -> Self {
        self.functions.retain(|f| f.name != function.name);
        self.functions.push(function);
        self
    }

    /// Reject every login with `message`.
    pub fn reject_login(mut self, message: impl Into<String>) -> Self {
        self.login_failure = Some(message.into());
        self
    }

    /// Text returned by [`Engine::secondary_error_log`].
    pub fn secondary_log(mut self, log: impl Into<String>) -> Self {
        self.secondary_log = Some(log.into());
        self
    }

    /// Make the next logout fail with `message`.
    pub fn fail_next_logout(&self, message: impl Into<String>) {
        *self.logout_failure.lock() = Some(message.into());
    }

    fn lookup(&self, name: &str) -> Option<&ScriptedFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    fn console(&self) -> Arc<dyn ConsoleSink> {
        self.console.lock().clone()
    }
}

impl Engine for ScriptedEngine {
    type Session = ScriptedSession;

    fn begin_session(
        &self,
        servers: &[ServerSpec],
        options: &Map<String, Value>,
    ) -> Result<ScriptedSession, EngineError> {
        let console = self.console();
        console.print("Logging into the collaborating servers");
        if let Some(message) = &self.login_failure {
            console.warn_error(message);
            return Err(EngineError::new(message.clone()));
        }
        if options.get("assign").and_then(Value::as_bool).unwrap_or(false) {
            let symbol = options.get("symbol").and_then(Value::as_str).unwrap_or("D");
            console.print(&format!("Assigning table data to '{}'", symbol));
        }
        Ok(ScriptedSession {
            servers: servers.to_vec(),
            options: options.clone(),
        })
    }

    fn invoke_function(
        &self,
        session: &ScriptedSession,
        request: &FunctionRequest,
    ) -> Result<Value, EngineError> {
        let function = self.lookup(&request.function).ok_or_else(|| {
            EngineError::new(format!("could not find function \"{}\"", request.function))
        })?;

        let servers: Vec<&ServerSpec> = match &request.servers {
            None => session.servers.iter().collect(),
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    session.servers.get(i).ok_or_else(|| {
                        EngineError::new(format!("subscript out of bounds: {}", i + 1))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        if let Some(plot) = &request.plot {
            std::fs::write(&plot.path, PNG_SIGNATURE).map_err(|e| {
                EngineError::new(format!("cannot open file '{}': {}", plot.path.display(), e))
            })?;
        }

        let call = ScriptedCall {
            function: &function.name,
            parameters: &request.parameters,
            servers,
            options: &session.options,
            plot: request.plot.as_ref(),
            console: self.console(),
        };
        (function.handler)(&call)
    }

    fn end_session(&self, session: &ScriptedSession) -> Result<Value, EngineError> {
        if let Some(message) = self.logout_failure.lock().take() {
            return Err(EngineError::new(message));
        }
        self.console()
            .print(&format!("Logged out from {} server(s)", session.servers.len()));
        Ok(json!({"type": "NULL"}))
    }

    fn list_functions(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.functions.iter().map(|f| f.name.clone()).collect())
    }

    fn function_formals(&self, name: &str) -> Result<Vec<Formal>, EngineError> {
        self.lookup(name)
            .map(|f| f.formals.clone())
            .ok_or_else(|| EngineError::new(format!("object '{}' not found", name)))
    }

    fn return_policy(&self, name: &str) -> ReturnPolicy {
        self.lookup(name).map(|f| f.policy).unwrap_or_default()
    }

    fn set_console(&self, sink: Arc<dyn ConsoleSink>) -> Arc<dyn ConsoleSink> {
        std::mem::replace(&mut *self.console.lock(), sink)
    }

    fn secondary_error_log(&self) -> Option<String> {
        self.secondary_log.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<String>>);

    impl ConsoleSink for Capture {
        fn warn_error(&self, text: &str) {
            self.0.lock().push(format!("warn:{}", text));
        }
        fn print(&self, text: &str) {
            self.0.lock().push(format!("print:{}", text));
        }
    }

    fn session(engine: &ScriptedEngine) -> ScriptedSession {
        let servers = vec![
            ServerSpec::new("s1", "x").with_table("T.A"),
            ServerSpec::new("s2", "y").with_table("T.B"),
        ];
        engine.begin_session(&servers, &Map::new()).unwrap()
    }

    fn request(function: &str, servers: Option<Vec<usize>>) -> FunctionRequest {
        FunctionRequest {
            function: function.into(),
            parameters: Map::new(),
            servers,
            plot: None,
        }
    }

    #[test]
    fn test_handler_sees_selected_servers() {
        let engine = ScriptedEngine::new().function(ScriptedFunction::new("ds.ls").handler(|call| {
            let names: Vec<&str> = call.servers.iter().map(|s| s.server.as_str()).collect();
            Ok(json!({"type": "character", "value": names}))
        }));
        let session = session(&engine);

        let all = engine.invoke_function(&session, &request("ds.ls", None)).unwrap();
        assert_eq!(all["value"], json!(["s1", "s2"]));

        let second = engine.invoke_function(&session, &request("ds.ls", Some(vec![1]))).unwrap();
        assert_eq!(second["value"], json!(["s2"]));

        let err = engine.invoke_function(&session, &request("ds.ls", Some(vec![5]))).unwrap_err();
        assert!(err.message.contains("out of bounds"));
    }

    #[test]
    fn test_console_swap() {
        let engine = ScriptedEngine::new()
            .function(ScriptedFunction::new("ds.noisy").handler(|call| {
                call.print("hello");
                call.warn("careful");
                Ok(Value::Null)
            }));
        let capture = Arc::new(Capture::default());
        let previous = engine.set_console(capture.clone());
        let session = session(&engine);
        engine.invoke_function(&session, &request("ds.noisy", None)).unwrap();
        engine.set_console(previous);

        let lines = capture.0.lock().clone();
        assert_eq!(
            lines,
            vec![
                "print:Logging into the collaborating servers",
                "print:hello",
                "warn:careful"
            ]
        );
    }

    #[test]
    fn test_login_rejection_and_logout_failure() {
        let engine = ScriptedEngine::new().reject_login("Unauthorized");
        let err = engine.begin_session(&[], &Map::new()).unwrap_err();
        assert_eq!(err.message, "Unauthorized");

        let engine = ScriptedEngine::new();
        let session = session(&engine);
        engine.fail_next_logout("connection reset");
        assert!(engine.end_session(&session).is_err());
        assert_eq!(engine.end_session(&session).unwrap(), json!({"type": "NULL"}));
    }

    #[test]
    fn test_catalog_reflection() {
        let engine = ScriptedEngine::new()
            .function(ScriptedFunction::new("ds.mean").formal("x").formal_default("type", "split"))
            .function(ScriptedFunction::new("ds.assign").effect_only());
        assert_eq!(engine.list_functions().unwrap(), vec!["ds.mean", "ds.assign"]);
        let formals = engine.function_formals("ds.mean").unwrap();
        assert_eq!(formals.len(), 3);
        assert_eq!(formals[2].default, Some(json!("split")));
        assert!(!engine.return_policy("ds.assign").returns_value);
        assert!(engine.function_formals("ds.nope").is_err());
    }
}
