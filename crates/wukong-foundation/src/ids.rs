//! Strongly-typed identifiers.
//!
//! Each id wraps a UUID and implements `Display`/`Serialize`/`Deserialize`,
//! matching the teacher's `TaskGroupId`/`EventId` pattern (wrap, don't
//! re-derive parsing logic per call site).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! uuid_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(uuid::Uuid::parse_str(raw)?))
            }
        }
    };
}

uuid_id!(SessionId, "sess");
uuid_id!(ToolCallId, "tc");
uuid_id!(ForkTaskId, "fork");
uuid_id!(AsyncTaskId, "atask");

/// Step ids are a session-scoped monotonic sequence (spec §3), not a UUID —
/// dense `{1..n}` numbering is an invariant (spec §8 property 1), which a
/// random id cannot express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub u64);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step-{}", self.0)
    }
}
