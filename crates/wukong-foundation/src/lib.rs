//! Shared primitives for the wukong agent runtime: errors, ids, config,
//! the event bus, secret redaction, and tool-parameter schema validation.
//!
//! Every other crate in the workspace (`wukong-core`, `wukong-exec`,
//! `wukong-fork`, `wukong-session`, `wukong-agent`) depends on this one and
//! nothing flows in the other direction.

pub mod adapters;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod model;
pub mod redact;
pub mod schema;

pub use adapters::{
    with_lock, AsyncToolHandler, CacheAdapter, ExecutionAdapter, KnowledgeAdapter, KnowledgeHit,
    LlmAdapter, LlmCallOptions, LlmCapabilities, LlmResponse, LlmStreamSink, StepListFilter,
    StorageAdapter, SubAgentOutcome, SubAgentSpec, TokenUsage, ToolCallContext, ToolHandler,
};
pub use config::{
    AsyncToolConfig, CoreConfig, ForkConfig, LoopConfig, ParallelToolConfig, SessionConfig,
    ToolExecConfig,
};
pub use error::{classify_retryable_message, Error, Result};
pub use event::{events, EventBus, EventBusConfig, EventCategory, EventListener, WukongEvent};
pub use ids::{AsyncTaskId, ForkTaskId, SessionId, StepId, ToolCallId};
pub use model::{
    Action, AgentKind, AsyncTaskKind, AsyncTaskStatus, AsyncToolTask, ForkAgentTask, ForkTaskStatus,
    ParallelCallStatus, ParallelToolCall, RiskLevel, Session, SessionStatus, Step, StepStatus,
    StopSnapshot, StopStateView, TaskResult, TaskStatus, ToolDescriptorMeta, ToolInvocation,
    ToolOutcome, WaitStrategy,
};
pub use redact::sanitize;
pub use schema::{ObjectSchema, PropertySchema, ValidationError};
