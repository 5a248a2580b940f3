//! Step executor (C8) and agent loop (C10): the action envelope dispatcher
//! that turns one parsed [`Action`] into a terminal [`Step`], and the outer
//! interactive/autonomous driver that renders prompts, calls the LLM, and
//! repeats until `Finish`, a stop request, or a resource bound is hit.
//!
//! Sits above every other component crate: it dispatches into `wukong-core`'s
//! tool executor directly, and optionally into `wukong-exec`'s parallel
//! executor and `wukong-fork`'s fork executor when those are wired in.

pub mod agent_loop;
pub mod parser;
pub mod prompt;
pub mod step_executor;

pub use agent_loop::{AgentLoop, ConfirmationHandler};
pub use parser::ResponseParser;
pub use prompt::{HistoryEntry, PromptBuilder, PromptInput};
pub use step_executor::{build_tool_call_from, StepExecutor, StepOutcome};

pub use wukong_foundation::{Error, Result};
