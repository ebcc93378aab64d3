//! Call tracking.
//!
//! Every login, invocation and logout is a [`CallRecord`]: busy from creation
//! until its background job completes it exactly once. Console lines are
//! appended only while busy and are frozen afterwards.
//!
//! # Concurrency Model
//!
//! - DashMap for concurrent insert/lookup of records
//! - One RwLock per record; the running job is the only writer, pollers read
//!   consistent snapshots

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use fedcall_types::{CallId, PlotId, SessionRef};

use crate::error::{Result, ServiceError};

/// What a call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Login,
    Invoke,
    Logout,
}

/// Successful outcome of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallOutput {
    /// A completed login: the new session.
    Session(SessionRef),
    /// Normalized value, raw serialized text, plot descriptor or `null`.
    Value(Value),
}

impl CallOutput {
    pub fn null() -> Self {
        CallOutput::Value(Value::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            CallOutput::Value(v) => Some(v),
            CallOutput::Session(_) => None,
        }
    }

    pub fn as_session(&self) -> Option<SessionRef> {
        match self {
            CallOutput::Session(s) => Some(*s),
            CallOutput::Value(_) => None,
        }
    }
}

/// Terminal result of a call.
pub type CallResult = std::result::Result<CallOutput, ServiceError>;

/// Snapshot of a call returned by status polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStatus {
    pub function: String,
    pub busy: bool,
    #[serde(rename = "warnerror")]
    pub warn_error: Vec<String>,
    pub print: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_uuid: Option<PlotId>,
}

#[derive(Default)]
struct CallState {
    warn_error: Vec<String>,
    print: Vec<String>,
    plot: Option<PlotId>,
    outcome: Option<CallResult>,
}

/// One asynchronous unit of work.
pub struct CallRecord {
    id: CallId,
    function: String,
    kind: CallKind,
    state: RwLock<CallState>,
}

impl std::fmt::Debug for CallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRecord")
            .field("id", &self.id)
            .field("function", &self.function)
            .field("kind", &self.kind)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl CallRecord {
    fn new(id: CallId, function: String, kind: CallKind) -> Self {
        Self {
            id,
            function,
            kind,
            state: RwLock::new(CallState::default()),
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn is_busy(&self) -> bool {
        self.state.read().outcome.is_none()
    }

    fn already_complete(&self) -> ServiceError {
        ServiceError::CallAlreadyComplete {
            call: self.id.to_string(),
        }
    }

    /// Append a warning/error line.
    pub fn append_diagnostic(&self, line: impl Into<String>) -> Result<()> {
        let mut state = self.state.write();
        if state.outcome.is_some() {
            return Err(self.already_complete());
        }
        state.warn_error.push(line.into());
        Ok(())
    }

    /// Append a print line.
    pub fn append_output(&self, line: impl Into<String>) -> Result<()> {
        let mut state = self.state.write();
        if state.outcome.is_some() {
            return Err(self.already_complete());
        }
        state.print.push(line.into());
        Ok(())
    }

    /// Record the plot rendered by this call.
    pub fn set_plot(&self, plot: PlotId) -> Result<()> {
        let mut state = self.state.write();
        if state.outcome.is_some() {
            return Err(self.already_complete());
        }
        state.plot = Some(plot);
        Ok(())
    }

    /// Fix the terminal result. A call completes exactly once.
    pub fn complete(&self, result: CallResult) -> Result<()> {
        let mut state = self.state.write();
        if state.outcome.is_some() {
            return Err(self.already_complete());
        }
        state.outcome = Some(result);
        Ok(())
    }

    pub fn status(&self) -> CallStatus {
        let state = self.state.read();
        CallStatus {
            function: self.function.clone(),
            busy: state.outcome.is_none(),
            warn_error: state.warn_error.clone(),
            print: state.print.clone(),
            plot_uuid: state.plot,
        }
    }

    /// The terminal result. Fails with `CallBusy` while the call runs.
    pub fn result(&self) -> CallResult {
        match &self.state.read().outcome {
            Some(outcome) => outcome.clone(),
            None => Err(ServiceError::CallBusy {
                call: self.id.to_string(),
            }),
        }
    }

    /// Console lines captured so far: `(warn_error, print)`.
    pub fn transcript(&self) -> (Vec<String>, Vec<String>) {
        let state = self.state.read();
        (state.warn_error.clone(), state.print.clone())
    }
}

/// Calls of one scope: a session, or the standalone login calls.
#[derive(Default)]
pub struct CallTable {
    calls: DashMap<CallId, Arc<CallRecord>>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a busy call with a fresh identifier.
    pub fn create(&self, function: impl Into<String>, kind: CallKind) -> Arc<CallRecord> {
        let function = function.into();
        loop {
            let id = CallId::new();
            if let Entry::Vacant(slot) = self.calls.entry(id) {
                let record = Arc::new(CallRecord::new(id, function, kind));
                slot.insert(record.clone());
                return record;
            }
        }
    }

    pub fn get(&self, id: &CallId) -> Option<Arc<CallRecord>> {
        self.calls.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Whether any call in this table is still running.
    pub fn any_busy(&self) -> bool {
        self.calls.iter().any(|r| r.value().is_busy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedcall_types::SessionId;
    use serde_json::json;

    #[test]
    fn test_lifecycle() {
        let table = CallTable::new();
        let call = table.create("ds.mean", CallKind::Invoke);
        assert!(call.is_busy());
        assert!(matches!(call.result(), Err(ServiceError::CallBusy { .. })));

        call.append_output("line 1").unwrap();
        call.append_diagnostic("warning").unwrap();
        call.complete(Ok(CallOutput::Value(json!(3.5)))).unwrap();

        let status = call.status();
        assert!(!status.busy);
        assert_eq!(status.print, vec!["line 1"]);
        assert_eq!(status.warn_error, vec!["warning"]);
        assert_eq!(call.result().unwrap(), CallOutput::Value(json!(3.5)));
    }

    #[test]
    fn test_completes_exactly_once() {
        let table = CallTable::new();
        let call = table.create("logout", CallKind::Logout);
        call.complete(Ok(CallOutput::null())).unwrap();

        let err = call.complete(Ok(CallOutput::null())).unwrap_err();
        assert!(matches!(err, ServiceError::CallAlreadyComplete { .. }));
        assert!(call.append_output("late").is_err());
        assert!(call.status().print.is_empty());
    }

    #[test]
    fn test_error_result_is_stored() {
        let table = CallTable::new();
        let call = table.create("ds.mean", CallKind::Invoke);
        call.complete(Err(ServiceError::engine("boom"))).unwrap();
        assert!(!call.status().busy);
        assert_eq!(call.result().unwrap_err(), ServiceError::engine("boom"));
    }

    #[test]
    fn test_unique_ids_and_lookup() {
        let table = CallTable::new();
        let a = table.create("a", CallKind::Invoke);
        let b = table.create("b", CallKind::Invoke);
        assert_ne!(a.id(), b.id());
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&a.id()).unwrap().function(), "a");
        assert!(table.get(&CallId::new()).is_none());
        assert!(table.any_busy());
    }

    #[test]
    fn test_status_serialization() {
        let table = CallTable::new();
        let call = table.create("ds.histogram", CallKind::Invoke);
        let plot = PlotId::new();
        call.set_plot(plot).unwrap();
        let json = serde_json::to_value(call.status()).unwrap();
        assert_eq!(json["busy"], true);
        assert_eq!(json["warnerror"], json!([]));
        assert_eq!(json["plot_uuid"], json!(plot.to_string()));
    }

    #[test]
    fn test_session_output_serializes_as_reference() {
        let session = SessionRef::new(SessionId::new());
        let json = serde_json::to_value(CallOutput::Session(session)).unwrap();
        assert_eq!(json, json!({"connection": session.connection.to_string()}));
    }
}
