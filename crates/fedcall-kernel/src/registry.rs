//! Session registry.
//!
//! Sessions are registered only once their login call has succeeded. Each
//! session owns its engine handle and its own [`CallTable`]; login calls live
//! in a standalone table because they run before any session exists.
//!
//! A logged-out session stays registered with its handle dropped, so that
//! results of its calls, the logout included, remain retrievable.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::Display;

use fedcall_types::{Callback, SessionId};

use crate::error::{NotFoundKind, Result, ServiceError};
use crate::servers::ServerSpec;
use crate::tracker::{CallRecord, CallResult, CallStatus, CallTable};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    LoggingOut,
    LoggedOut,
}

/// Console lines of the login that opened a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginTranscript {
    #[serde(rename = "warnerror")]
    pub warn_error: Vec<String>,
    pub print: Vec<String>,
}

/// Snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connection: SessionId,
    pub servers: Vec<String>,
    pub state: SessionState,
    /// Whether any of the session's calls is still running.
    pub busy: bool,
    pub calls: usize,
    pub login: LoginTranscript,
}

struct Lifecycle<H> {
    state: SessionState,
    handle: Option<Arc<H>>,
}

/// A logged-in connection to a set of data servers.
pub struct Session<H> {
    id: SessionId,
    servers: Vec<ServerSpec>,
    transcript: LoginTranscript,
    calls: CallTable,
    lifecycle: RwLock<Lifecycle<H>>,
}

impl<H> std::fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("servers", &self.server_names())
            .field("state", &self.state())
            .finish()
    }
}

impl<H> Session<H> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn servers(&self) -> &[ServerSpec] {
        &self.servers
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.server.clone()).collect()
    }

    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.read().state
    }

    fn gone(&self) -> ServiceError {
        ServiceError::not_found(NotFoundKind::Connection, self.id)
    }

    /// Engine handle for a new invocation.
    ///
    /// Fails while a logout is running, and with `NotFound` once logged out.
    pub fn handle_for_invoke(&self) -> Result<Arc<H>> {
        let lifecycle = self.lifecycle.read();
        match (lifecycle.state, &lifecycle.handle) {
            (SessionState::Active, Some(handle)) => Ok(handle.clone()),
            (SessionState::LoggingOut, _) => {
                Err(ServiceError::invalid("connection", "logout in progress"))
            }
            _ => Err(self.gone()),
        }
    }

    /// Move to `LoggingOut` and hand out the engine handle for the logout.
    pub fn begin_logout(&self) -> Result<Arc<H>> {
        let mut lifecycle = self.lifecycle.write();
        match (lifecycle.state, &lifecycle.handle) {
            (SessionState::Active, Some(handle)) => {
                let handle = handle.clone();
                lifecycle.state = SessionState::LoggingOut;
                Ok(handle)
            }
            (SessionState::LoggingOut, _) => {
                Err(ServiceError::invalid("connection", "logout in progress"))
            }
            _ => Err(self.gone()),
        }
    }

    /// Settle a logout: drop the handle on success, reactivate on failure.
    pub fn finish_logout(&self, succeeded: bool) {
        let mut lifecycle = self.lifecycle.write();
        if succeeded {
            lifecycle.state = SessionState::LoggedOut;
            lifecycle.handle = None;
        } else {
            lifecycle.state = SessionState::Active;
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            connection: self.id,
            servers: self.server_names(),
            state: self.state(),
            busy: self.calls.any_busy(),
            calls: self.calls.len(),
            login: self.transcript.clone(),
        }
    }

    fn call(&self, callback: &Callback) -> Result<Arc<CallRecord>> {
        let id = callback.call_id();
        self.calls
            .get(&id)
            .ok_or_else(|| ServiceError::not_found(NotFoundKind::Call, id))
    }
}

/// All sessions plus the standalone login calls.
pub struct SessionRegistry<H> {
    sessions: DashMap<SessionId, Arc<Session<H>>>,
    logins: CallTable,
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
            logins: CallTable::new(),
        }
    }
}

impl<H> SessionRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of login calls.
    pub fn logins(&self) -> &CallTable {
        &self.logins
    }

    /// Register a freshly logged-in session under a new identifier.
    pub fn create_session(
        &self,
        servers: Vec<ServerSpec>,
        handle: H,
        transcript: LoginTranscript,
    ) -> Arc<Session<H>> {
        let handle = Arc::new(handle);
        loop {
            let id = SessionId::new();
            if let Entry::Vacant(slot) = self.sessions.entry(id) {
                let session = Arc::new(Session {
                    id,
                    servers,
                    transcript,
                    calls: CallTable::new(),
                    lifecycle: RwLock::new(Lifecycle {
                        state: SessionState::Active,
                        handle: Some(handle),
                    }),
                });
                slot.insert(session.clone());
                return session;
            }
        }
    }

    pub fn session(&self, id: &SessionId) -> Result<Arc<Session<H>>> {
        self.sessions
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| ServiceError::not_found(NotFoundKind::Connection, id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Resolve a callback to its call record.
    pub fn call(&self, callback: &Callback) -> Result<Arc<CallRecord>> {
        match callback {
            Callback::Login(id) => self
                .logins
                .get(id)
                .ok_or_else(|| ServiceError::not_found(NotFoundKind::Login, id)),
            Callback::Call { connection, .. } => self.session(connection)?.call(callback),
        }
    }

    pub fn get_status(&self, callback: &Callback) -> Result<CallStatus> {
        Ok(self.call(callback)?.status())
    }

    pub fn get_result(&self, callback: &Callback) -> CallResult {
        self.call(callback)?.result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{CallKind, CallOutput};
    use fedcall_types::CallId;

    fn registry_with_session() -> (SessionRegistry<&'static str>, Arc<Session<&'static str>>) {
        let registry = SessionRegistry::new();
        let session = registry.create_session(
            vec![ServerSpec::new("s1", "x").with_table("T")],
            "handle",
            LoginTranscript::default(),
        );
        (registry, session)
    }

    #[test]
    fn test_not_found_kinds() {
        let (registry, session) = registry_with_session();

        let err = registry.get_status(&Callback::Login(CallId::new())).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { kind: NotFoundKind::Login, .. }));

        let unknown_session = Callback::Call {
            connection: SessionId::new(),
            call: CallId::new(),
        };
        let err = registry.get_result(&unknown_session).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { kind: NotFoundKind::Connection, .. }));

        let unknown_call = Callback::Call {
            connection: session.id(),
            call: CallId::new(),
        };
        let err = registry.get_status(&unknown_call).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { kind: NotFoundKind::Call, .. }));
    }

    #[test]
    fn test_session_calls_resolve() {
        let (registry, session) = registry_with_session();
        let call = session.calls().create("ds.mean", CallKind::Invoke);
        let callback = Callback::Call {
            connection: session.id(),
            call: call.id(),
        };
        assert!(registry.get_status(&callback).unwrap().busy);
        call.complete(Ok(CallOutput::null())).unwrap();
        assert_eq!(registry.get_result(&callback).unwrap(), CallOutput::null());
        assert_eq!(session.status().calls, 1);
        assert!(!session.status().busy);
    }

    #[test]
    fn test_logout_lifecycle() {
        let (_registry, session) = registry_with_session();
        assert_eq!(*session.handle_for_invoke().unwrap(), "handle");

        session.begin_logout().unwrap();
        assert_eq!(session.state(), SessionState::LoggingOut);
        assert_eq!(
            session.handle_for_invoke().unwrap_err(),
            ServiceError::invalid("connection", "logout in progress")
        );
        assert!(session.begin_logout().is_err());

        session.finish_logout(false);
        assert_eq!(session.state(), SessionState::Active);

        session.begin_logout().unwrap();
        session.finish_logout(true);
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert!(matches!(
            session.handle_for_invoke().unwrap_err(),
            ServiceError::NotFound { kind: NotFoundKind::Connection, .. }
        ));
    }

    #[test]
    fn test_session_status_serializes() {
        let (_registry, session) = registry_with_session();
        let json = serde_json::to_value(session.status()).unwrap();
        assert_eq!(json["state"], "active");
        assert_eq!(json["servers"], serde_json::json!(["s1"]));
        assert_eq!(json["busy"], false);
    }
}
