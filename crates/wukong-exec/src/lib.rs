//! Async tool executor (C5) and parallel tool executor (C6).
//!
//! Built on top of `wukong-core`'s tool registry and C4 tool executor: C5
//! hands long-running tool calls off to a cache-backed polling/webhook
//! queue, C6 fans a batch of tool calls out concurrently and resolves once
//! a wait strategy's condition is satisfied.

pub mod async_exec;
pub mod parallel;

pub use async_exec::{AsyncToolExecutor, AsyncToolExecutorConfig, InMemoryCache};
pub use parallel::{ParallelBatchResult, ParallelExecOptions, ParallelToolExecutor};
pub use wukong_foundation::{Error, Result};
