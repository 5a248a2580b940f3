//! Agent-fork subsystem (C7): bounded-depth sub-agent tasks with context
//! and result compression, submitted through an execution adapter so the
//! parent session never blocks on sub-agent progress.

pub mod fork;

pub use fork::{ForkExecutor, ForkRequest};
pub use wukong_foundation::{Error, Result};
