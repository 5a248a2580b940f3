//! Session manager (C9): session lifecycle, cache-backed persistence
//! restore, and the per-user concurrency cap.

pub mod manager;

pub use manager::{AgentFactory, RuntimeStatus, SessionInfo, SessionManager};
pub use wukong_foundation::{Error, Result};
