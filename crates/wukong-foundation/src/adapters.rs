//! Collaborator interfaces (spec §6 "External interfaces").
//!
//! The storage adapter, cache adapter, LLM adapter and execution adapter are
//! explicitly out of scope (spec §1): the core depends on them only through
//! these trait contracts. Concrete implementations (a real database, a real
//! LLM API client, a k8s job queue) are the caller's responsibility;
//! `wukong-cli` wires in-memory stand-ins for demonstration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::ids::{AsyncTaskId, ForkTaskId, SessionId, StepId};
use crate::model::{AsyncToolTask, ForkAgentTask, ParallelToolCall, Session, Step};

// ---------------------------------------------------------------------
// Storage adapter
// ---------------------------------------------------------------------

/// Filter applied to `StorageAdapter::list_steps` (spec §6: `includeDiscarded`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StepListFilter {
    pub include_discarded: bool,
}

/// The system of record (spec §5 "Shared resources"). Assumed multi-writer
/// safe with optimistic, last-write-wins semantics on `updated_at` — no
/// global lock is acquired by callers.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn create_session(&self, session: Session) -> Result<()>;
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>>;
    async fn update_session(&self, session: Session) -> Result<()>;
    async fn list_sessions_by_user(&self, user_id: &str) -> Result<Vec<Session>>;
    async fn delete_session(&self, id: SessionId) -> Result<()>;

    async fn create_step(&self, step: Step) -> Result<()>;
    async fn get_step(&self, session_id: SessionId, step_id: StepId) -> Result<Option<Step>>;
    async fn update_step(&self, step: Step) -> Result<()>;
    async fn list_steps(&self, session_id: SessionId, filter: StepListFilter) -> Result<Vec<Step>>;
    async fn get_last_step(&self, session_id: SessionId) -> Result<Option<Step>>;
    async fn mark_discarded(&self, session_id: SessionId, step_ids: &[u64]) -> Result<()>;

    async fn create_parallel_call(&self, call: ParallelToolCall) -> Result<()>;
    async fn update_parallel_call(&self, call: ParallelToolCall) -> Result<()>;
    async fn list_parallel_calls(&self, step_id: StepId) -> Result<Vec<ParallelToolCall>>;

    async fn create_fork_task(&self, task: ForkAgentTask) -> Result<()>;
    async fn get_fork_task(&self, id: ForkTaskId) -> Result<Option<ForkAgentTask>>;
    async fn update_fork_task(&self, task: ForkAgentTask) -> Result<()>;
    async fn list_fork_tasks(&self, parent_session_id: SessionId) -> Result<Vec<ForkAgentTask>>;

    /// Run `f` as a single atomic unit (spec §6 `transaction(fn)`). The
    /// in-memory reference adapter implements this as a mutex section;
    /// the contract only requires atomicity, not any particular mechanism.
    async fn transaction(&self, f: Box<dyn FnOnce() -> Result<()> + Send>) -> Result<()> {
        f()
    }
}

// ---------------------------------------------------------------------
// Cache adapter
// ---------------------------------------------------------------------

/// Ephemeral key/value store with per-entry TTL, queues, and locks
/// (spec §6 "Cache adapter").
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn increment(&self, key: &str, by: i64) -> Result<i64>;
    async fn decrement(&self, key: &str, by: i64) -> Result<i64> {
        self.increment(key, -by).await
    }
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn push(&self, key: &str, value: Value) -> Result<()>;
    async fn pop(&self, key: &str) -> Result<Option<Value>>;
    async fn length(&self, key: &str) -> Result<usize>;

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn release_lock(&self, key: &str) -> Result<()>;
}

/// Spins on `acquire_lock` until it succeeds, runs `f`, then releases —
/// mirrors the spec's `withLock(key, ttl, fn)` convenience without making
/// `CacheAdapter` itself generic (which would break its object-safety).
pub async fn with_lock<F, Fut, T>(cache: &dyn CacheAdapter, key: &str, ttl: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    loop {
        if cache.acquire_lock(key, ttl).await? {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let result = f().await;
    cache.release_lock(key).await?;
    result
}

// ---------------------------------------------------------------------
// LLM adapter
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_used: TokenUsage,
    pub model: String,
    pub response_time_ms: u64,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmCallOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCapabilities {
    pub model: String,
    pub context_window: u64,
    pub supports_streaming: bool,
}

/// Streaming callbacks (spec §6 "optional streaming variant").
#[async_trait]
pub trait LlmStreamSink: Send + Sync {
    async fn on_chunk(&self, chunk: &str);
    async fn on_complete(&self, response: &LlmResponse);
    async fn on_error(&self, error: &str);
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn call(&self, prompt: &str, opts: &LlmCallOptions) -> Result<LlmResponse>;

    async fn call_streaming(
        &self,
        prompt: &str,
        opts: &LlmCallOptions,
        sink: &dyn LlmStreamSink,
    ) -> Result<LlmResponse> {
        // Default: no real streaming, deliver the whole response as one chunk.
        match self.call(prompt, opts).await {
            Ok(response) => {
                sink.on_chunk(&response.text).await;
                sink.on_complete(&response).await;
                Ok(response)
            }
            Err(e) => {
                sink.on_error(&e.to_string()).await;
                Err(e)
            }
        }
    }

    fn count_tokens(&self, text: &str) -> u64;
    fn get_capabilities(&self) -> LlmCapabilities;
}

// ---------------------------------------------------------------------
// Knowledge adapter (spec §1/§4.10: autonomous loop's step-0 search)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub title: String,
    pub snippet: String,
    pub score: f32,
}

#[async_trait]
pub trait KnowledgeAdapter: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<KnowledgeHit>>;
}

// ---------------------------------------------------------------------
// Execution adapter (spec §6, for C7 agent fork)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentSpec {
    pub goal: String,
    pub context_summary: String,
    pub parent_session_id: SessionId,
    pub parent_step_id: StepId,
    pub current_depth: u32,
    pub max_steps: u32,
    pub timeout_secs: u64,
    pub user_id: String,
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentOutcome {
    pub sub_session_id: SessionId,
    pub result_summary: String,
    pub steps_executed: u32,
    pub tokens_used: u64,
    pub tool_calls: u32,
}

/// Submits sub-agent execution without blocking the parent (spec §4.7).
/// Two implementations are implied: in-process (spawn the autonomous loop
/// in the background) and external (hand off to a durable job system).
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn execute_sub_agent(&self, fork_task_id: ForkTaskId, spec: SubAgentSpec) -> Result<()>;
    async fn wait_for_completion(
        &self,
        fork_task_id: ForkTaskId,
        timeout: Duration,
    ) -> Result<SubAgentOutcome>;
    async fn cancel_sub_agent(&self, fork_task_id: ForkTaskId) -> Result<()>;
    async fn is_running(&self, fork_task_id: ForkTaskId) -> Result<bool>;
}

// ---------------------------------------------------------------------
// Tool handler contract (spec §6 "Tool handler contract")
// ---------------------------------------------------------------------

use crate::model::ToolOutcome;

/// Execution context threaded through every tool invocation: who is
/// calling, from which session/step, plus free-form metadata the handler
/// may want (working directory, organization id, ...).
#[derive(Debug, Clone, Default)]
pub struct ToolCallContext {
    pub session_id: Option<SessionId>,
    pub step_id: Option<StepId>,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value, context: &ToolCallContext) -> ToolOutcome;

    /// Optional handler-specific error recovery (spec §6: `onError`).
    async fn on_error(&self, _error: &str, _params: &Value, _context: &ToolCallContext) -> Option<ToolOutcome> {
        None
    }
}

/// The submit/poll/webhook triple async tools carry in addition to the
/// synchronous handler contract (spec §3 "Tool descriptor", §4.5).
#[async_trait]
pub trait AsyncToolHandler: Send + Sync {
    async fn submit(&self, params: Value, context: &ToolCallContext) -> Result<String>;
    async fn poll(&self, external_task_id: &str, context: &ToolCallContext) -> Result<ToolOutcome>;
    async fn on_webhook(&self, payload: Value, context: &ToolCallContext) -> Result<ToolOutcome> {
        let _ = (payload, context);
        Err(crate::error::Error::Internal("webhook not supported".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_context_defaults_are_empty() {
        let ctx = ToolCallContext::default();
        assert!(ctx.session_id.is_none());
        assert!(ctx.metadata.is_empty());
    }
}
