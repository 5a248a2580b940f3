//! In-memory stand-ins for the collaborator traits (spec §6), wired
//! together by `main` into one runnable session. None of this is meant to
//! survive a restart — a real embedding swaps these for a database, a
//! model API client, and a real cache, without touching any other crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use wukong_foundation::{
    ForkAgentTask, ForkTaskId, LlmCallOptions, LlmCapabilities, LlmResponse, ParallelToolCall,
    Result, Session, SessionId, Step, StepId, StepListFilter, StorageAdapter, TokenUsage,
    ToolCallContext, ToolHandler, ToolOutcome,
};
use wukong_foundation::LlmAdapter;

/// A storage adapter backed by in-process `Mutex<HashMap<..>>` maps,
/// generalizing the teacher's single-process `Storage` (sqlite-backed) to
/// the full CRUD surface the spec's storage contract names. No session ever
/// outlives the process.
#[derive(Default)]
pub struct MemoryStorage {
    sessions: Mutex<HashMap<SessionId, Session>>,
    steps: Mutex<HashMap<(SessionId, StepId), Step>>,
    parallel_calls: Mutex<HashMap<StepId, Vec<ParallelToolCall>>>,
    fork_tasks: Mutex<HashMap<ForkTaskId, ForkAgentTask>>,
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn create_session(&self, session: Session) -> Result<()> {
        self.sessions.lock().unwrap().insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn update_session(&self, session: Session) -> Result<()> {
        self.sessions.lock().unwrap().insert(session.id, session);
        Ok(())
    }

    async fn list_sessions_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_session(&self, id: SessionId) -> Result<()> {
        self.sessions.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn create_step(&self, step: Step) -> Result<()> {
        self.steps.lock().unwrap().insert((step.session_id, step.id), step);
        Ok(())
    }

    async fn get_step(&self, session_id: SessionId, step_id: StepId) -> Result<Option<Step>> {
        Ok(self.steps.lock().unwrap().get(&(session_id, step_id)).cloned())
    }

    async fn update_step(&self, step: Step) -> Result<()> {
        self.steps.lock().unwrap().insert((step.session_id, step.id), step);
        Ok(())
    }

    async fn list_steps(&self, session_id: SessionId, filter: StepListFilter) -> Result<Vec<Step>> {
        let mut steps: Vec<Step> = self
            .steps
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.session_id == session_id && (filter.include_discarded || !s.discarded))
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_number);
        Ok(steps)
    }

    async fn get_last_step(&self, session_id: SessionId) -> Result<Option<Step>> {
        Ok(self.list_steps(session_id, StepListFilter::default()).await?.into_iter().last())
    }

    async fn mark_discarded(&self, session_id: SessionId, step_ids: &[u64]) -> Result<()> {
        for step in self.steps.lock().unwrap().values_mut() {
            if step.session_id == session_id && step_ids.contains(&step.step_number) {
                step.discarded = true;
            }
        }
        Ok(())
    }

    async fn create_parallel_call(&self, call: ParallelToolCall) -> Result<()> {
        self.parallel_calls.lock().unwrap().entry(call.step_id).or_default().push(call);
        Ok(())
    }

    async fn update_parallel_call(&self, call: ParallelToolCall) -> Result<()> {
        let mut calls = self.parallel_calls.lock().unwrap();
        if let Some(existing) = calls
            .entry(call.step_id)
            .or_default()
            .iter_mut()
            .find(|c| c.tool_id == call.tool_id)
        {
            *existing = call;
        }
        Ok(())
    }

    async fn list_parallel_calls(&self, step_id: StepId) -> Result<Vec<ParallelToolCall>> {
        Ok(self.parallel_calls.lock().unwrap().get(&step_id).cloned().unwrap_or_default())
    }

    async fn create_fork_task(&self, task: ForkAgentTask) -> Result<()> {
        self.fork_tasks.lock().unwrap().insert(task.id, task);
        Ok(())
    }

    async fn get_fork_task(&self, id: ForkTaskId) -> Result<Option<ForkAgentTask>> {
        Ok(self.fork_tasks.lock().unwrap().get(&id).cloned())
    }

    async fn update_fork_task(&self, task: ForkAgentTask) -> Result<()> {
        self.fork_tasks.lock().unwrap().insert(task.id, task);
        Ok(())
    }

    async fn list_fork_tasks(&self, parent_session_id: SessionId) -> Result<Vec<ForkAgentTask>> {
        Ok(self
            .fork_tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.parent_session_id == parent_session_id)
            .cloned()
            .collect())
    }
}

/// A tool that reports the wall-clock time, used to give the demo loop
/// something to call before it finishes.
pub struct CurrentTimeTool;

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    async fn call(&self, _params: Value, _context: &ToolCallContext) -> ToolOutcome {
        ToolOutcome::ok(json!({ "now": chrono::Utc::now().to_rfc3339() }))
    }
}

/// Deterministic stand-in for a real model API client: calls `current_time`
/// once, then finishes using whatever that tool returned. Exercises the
/// full `CallTool` -> `Finish` dispatch path without a network dependency.
pub struct ScriptedDemoLlm {
    calls: AtomicU32,
}

impl ScriptedDemoLlm {
    pub fn new() -> Self {
        Self { calls: AtomicU32::new(0) }
    }
}

impl Default for ScriptedDemoLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmAdapter for ScriptedDemoLlm {
    async fn call(&self, prompt: &str, _opts: &LlmCallOptions) -> Result<LlmResponse> {
        let call_number = self.calls.fetch_add(1, Ordering::SeqCst);
        let text = if call_number == 0 {
            r#"<final_output>{"action":"CallTool","reasoning":"check the current time before finishing","selectedTool":"current_time","parameters":{}}</final_output>"#
                .to_string()
        } else {
            let observed = prompt
                .lines()
                .rfind(|line| line.starts_with("step "))
                .map(|line| line.replace('"', "'"))
                .unwrap_or_else(|| "no prior step".to_string());
            format!(
                r#"<final_output>{{"action":"Finish","reasoning":"goal satisfied","finalResult":"done ({observed})"}}</final_output>"#
            )
        };
        Ok(LlmResponse {
            text,
            tokens_used: TokenUsage { prompt: prompt.len() as u64, completion: 20, total: prompt.len() as u64 + 20 },
            model: "scripted-demo".to_string(),
            response_time_ms: 1,
            finish_reason: "stop".to_string(),
        })
    }

    fn count_tokens(&self, text: &str) -> u64 {
        text.len() as u64
    }

    fn get_capabilities(&self) -> LlmCapabilities {
        LlmCapabilities { model: "scripted-demo".to_string(), context_window: 8192, supports_streaming: false }
    }
}

/// Re-exported so `main` can wire the session manager's cache-backed
/// persistence without pulling in a real Redis/Memcached client.
pub type DemoCache = wukong_exec::InMemoryCache;

pub fn new_cache() -> DemoCache {
    wukong_exec::InMemoryCache::new()
}
