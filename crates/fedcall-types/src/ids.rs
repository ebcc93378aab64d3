//! Typed identifiers for sessions, calls, and plot artifacts.
//!
//! All ID types wrap UUIDv7 (time-ordered, globally unique). They serialize as
//! standard UUID text so clients can echo them back verbatim. The `short()`
//! form (first 8 hex chars) is for logs only; never used as a lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A session identifier (UUIDv7), one per successful login.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

/// A call identifier (UUIDv7), one per login, invocation, or logout.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(uuid::Uuid);

/// A plot artifact identifier (UUIDv7). Names the rendered image file.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlotId(uuid::Uuid);

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters, for display only.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl std::str::FromStr for $T {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(SessionId, "SessionId");
impl_typed_id!(CallId, "CallId");
impl_typed_id!(PlotId, "PlotId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique() {
        let a = CallId::new();
        let b = CallId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_time_ordered() {
        let first = SessionId::new();
        let second = SessionId::new();
        assert!(first <= second);
    }

    #[test]
    fn test_short_is_prefix_of_display() {
        let id = PlotId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.to_string().replace('-', "").starts_with(&id.short()));
    }

    #[test]
    fn test_parse_both_forms() {
        let id = CallId::new();
        assert_eq!(CallId::parse(&id.to_string()).unwrap(), id);
        let simple = id.as_uuid().as_simple().to_string();
        assert_eq!(CallId::parse(&simple).unwrap(), id);
        assert!(CallId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = SessionId::new();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
    }

    #[test]
    fn test_debug_names_type() {
        let id = PlotId::new();
        assert!(format!("{:?}", id).starts_with("PlotId("));
    }
}
