//! Shared identifier and callback types for fedcall.
//!
//! A leaf crate with **no internal fedcall dependencies**. The kernel and any
//! transport layer build on these so that the callback objects clients echo
//! back have exactly one definition.
//!
//! # Key Types
//!
//! |-----------------|-----------------------------------------------|
//! | Type            | Purpose                                       |
//! |-----------------|-----------------------------------------------|
//! | [`SessionId`]   | Which logged-in session                       |
//! | [`CallId`]      | Which login / invocation / logout call        |
//! | [`PlotId`]      | Which rendered plot artifact                  |
//! | [`Callback`]    | Opaque handle returned to and echoed by users |
//! | [`SessionRef`]  | Result of a completed login                   |
//! |-----------------|-----------------------------------------------|

pub mod callback;
pub mod ids;

pub use callback::{Callback, SessionRef};
pub use ids::{CallId, PlotId, SessionId};
