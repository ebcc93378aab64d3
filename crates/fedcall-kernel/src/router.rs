//! Console routing.
//!
//! The engine has one process-wide console. A running call takes exclusive
//! ownership of it through [`OutputRouter::route`], which installs the call's
//! sink and hands back a [`RouteGuard`]. Dropping the guard restores the
//! previous sink and then releases the lock, on every exit path.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::engine::{ConsoleSink, Engine};
use crate::tracker::CallRecord;

/// Exclusive owner of the engine console.
#[derive(Debug, Default)]
pub struct OutputRouter {
    lock: Mutex<()>,
}

impl OutputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route the engine console to `sink` until the guard drops.
    ///
    /// Blocks while another call holds the console.
    pub fn route<'a, E: Engine>(
        &'a self,
        engine: &'a E,
        sink: Arc<dyn ConsoleSink>,
    ) -> RouteGuard<'a, E> {
        let lock = self.lock.lock();
        let previous = engine.set_console(sink);
        RouteGuard {
            engine,
            previous: Some(previous),
            _lock: lock,
        }
    }
}

/// Scoped ownership of the engine console.
pub struct RouteGuard<'a, E: Engine> {
    engine: &'a E,
    previous: Option<Arc<dyn ConsoleSink>>,
    // Declared last: released only after `drop` has restored the sink.
    _lock: MutexGuard<'a, ()>,
}

impl<E: Engine> Drop for RouteGuard<'_, E> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.engine.set_console(previous);
        }
    }
}

/// Sink appending console output to one call.
pub struct CallSink {
    call: Arc<CallRecord>,
}

impl CallSink {
    pub fn new(call: Arc<CallRecord>) -> Self {
        Self { call }
    }
}

impl ConsoleSink for CallSink {
    fn warn_error(&self, text: &str) {
        if let Err(e) = self.call.append_diagnostic(text) {
            tracing::warn!(call = %self.call.id(), "dropped console output: {}", e);
        }
    }

    fn print(&self, text: &str) {
        if let Err(e) = self.call.append_output(text) {
            tracing::warn!(call = %self.call.id(), "dropped console output: {}", e);
        }
    }
}

/// Fallback sink for console output no call owns.
#[derive(Debug, Default)]
pub struct TracingConsole;

impl ConsoleSink for TracingConsole {
    fn warn_error(&self, text: &str) {
        tracing::warn!(target: "fedcall::engine", "{}", text.trim_end());
    }

    fn print(&self, text: &str) {
        tracing::debug!(target: "fedcall::engine", "{}", text.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FunctionRequest, ScriptedEngine, ScriptedFunction};
    use crate::servers::ServerSpec;
    use crate::tracker::{CallKind, CallTable};
    use serde_json::{Map, Value};

    fn noisy_engine() -> ScriptedEngine {
        ScriptedEngine::new().function(ScriptedFunction::new("ds.noisy").handler(|call| {
            call.print("computing");
            call.warn("Warning: small cell counts");
            Ok(Value::Null)
        }))
    }

    fn run(engine: &ScriptedEngine, session: &<ScriptedEngine as Engine>::Session) {
        let request = FunctionRequest {
            function: "ds.noisy".into(),
            parameters: Map::new(),
            servers: None,
            plot: None,
        };
        engine.invoke_function(session, &request).unwrap();
    }

    #[test]
    fn test_routes_to_call_and_restores() {
        let engine = noisy_engine();
        let session = engine
            .begin_session(&[ServerSpec::new("s1", "x").with_table("T")], &Map::new())
            .unwrap();
        let router = OutputRouter::new();
        let table = CallTable::new();

        let first = table.create("ds.noisy", CallKind::Invoke);
        {
            let _guard = router.route(&engine, Arc::new(CallSink::new(first.clone())));
            run(&engine, &session);
        }
        // Output after the guard drops must not reach the first call.
        run(&engine, &session);

        let status = first.status();
        assert_eq!(status.print, vec!["computing"]);
        assert_eq!(status.warn_error, vec!["Warning: small cell counts"]);
    }

    #[test]
    fn test_sequential_calls_are_isolated() {
        let engine = noisy_engine();
        let session = engine
            .begin_session(&[ServerSpec::new("s1", "x").with_table("T")], &Map::new())
            .unwrap();
        let router = OutputRouter::new();
        let table = CallTable::new();

        let a = table.create("ds.noisy", CallKind::Invoke);
        let b = table.create("ds.noisy", CallKind::Invoke);
        for call in [&a, &b] {
            let _guard = router.route(&engine, Arc::new(CallSink::new(call.clone())));
            run(&engine, &session);
        }
        assert_eq!(a.status().print.len(), 1);
        assert_eq!(b.status().print.len(), 1);
    }

    #[test]
    fn test_completed_call_drops_output() {
        let table = CallTable::new();
        let call = table.create("ds.noisy", CallKind::Invoke);
        call.complete(Ok(crate::tracker::CallOutput::null())).unwrap();
        let sink = CallSink::new(call.clone());
        sink.print("late");
        assert!(call.status().print.is_empty());
    }
}
