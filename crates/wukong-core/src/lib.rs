//! Stop controller (C2), tool registry (C3) and tool executor (C4).
//!
//! These three sit directly above `wukong-foundation`: the stop controller
//! is pure state (spec §4.2), the registry holds immutable tool descriptors
//! (spec §4.3), and the executor turns a registry lookup plus a handler call
//! into the validated, timed, sanitized, retry-classified result the rest of
//! the runtime consumes (spec §4.4).

pub mod stop;
pub mod tool;

pub use stop::{StopController, StopRequest};
pub use tool::executor::{ToolExecutionError, ToolExecutor};
pub use tool::registry::ToolRegistry;
pub use tool::ToolEntry;

pub use wukong_foundation::{Error, Result};
