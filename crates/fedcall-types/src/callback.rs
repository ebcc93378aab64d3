//! Callback objects handed to clients.
//!
//! A callback is opaque to the client: it is returned by `login`, `invoke`,
//! and `logout`, and must be echoed back unchanged to poll status or fetch
//! the result. Two wire shapes exist:
//!
//! ```text
//! "0192f0c4-…"                                  login call (bare call id)
//! {"connection": "0192f0c4-…", "call": "…"}     call scoped to a session
//! ```

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, SessionId};

/// Handle for one asynchronous call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Callback {
    /// A function invocation or logout running against a session.
    Call {
        connection: SessionId,
        call: CallId,
    },
    /// A login call. No session exists yet.
    Login(CallId),
}

impl Callback {
    /// The call this callback refers to.
    pub fn call_id(&self) -> CallId {
        match self {
            Callback::Call { call, .. } => *call,
            Callback::Login(call) => *call,
        }
    }

    /// The owning session, if the call is session-scoped.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Callback::Call { connection, .. } => Some(*connection),
            Callback::Login(_) => None,
        }
    }
}

/// Reference to a logged-in session.
///
/// This is what a completed login call yields: the capability to place
/// further calls against the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRef {
    pub connection: SessionId,
}

impl SessionRef {
    pub fn new(connection: SessionId) -> Self {
        Self { connection }
    }

    /// Callback for a call placed on this session.
    pub fn callback(&self, call: CallId) -> Callback {
        Callback::Call {
            connection: self.connection,
            call,
        }
    }
}
