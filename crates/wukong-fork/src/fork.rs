//! Agent-fork subsystem (C7, spec §4.7).
//!
//! Grounded in the teacher's `SubAgentManager` (bounded-concurrency
//! dispatch of background sub-tasks with a semaphore-style counter) and its
//! `ContextCompressor` (LLM-summarize over a length threshold, truncate on
//! failure). Generalized here to the spec's depth-bounded fork contract:
//! persist a `pending` task, hand it to an execution adapter without
//! blocking the caller, and let `waitForSubAgent` observe completion.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use wukong_foundation::{
    events, CacheAdapter, Error, EventBus, ExecutionAdapter, ForkAgentTask, ForkConfig, ForkTaskId,
    ForkTaskStatus, LlmAdapter, LlmCallOptions, Result, Session, SessionId, StepId, StorageAdapter,
    SubAgentSpec,
};

/// Cache key tracking how many sub-agents are in flight at once, used to
/// gate new forks once `max_concurrent` is reached (spec's supplemented
/// fork-queueing feature, SPEC_FULL.md).
const ACTIVE_FORKS_KEY: &str = "wukong:fork:active";

/// Parameters for `forkAutoAgent` (spec §4.7).
pub struct ForkRequest {
    pub goal: String,
    pub context_summary: String,
    pub parent_session_id: SessionId,
    pub parent_step_id: StepId,
    pub current_depth: u32,
    pub user_id: String,
    pub organization_id: Option<String>,
}

pub struct ForkExecutor {
    storage: Arc<dyn StorageAdapter>,
    cache: Arc<dyn CacheAdapter>,
    bus: Arc<EventBus>,
    execution: Arc<dyn ExecutionAdapter>,
    llm: Arc<dyn LlmAdapter>,
    config: ForkConfig,
}

impl ForkExecutor {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        cache: Arc<dyn CacheAdapter>,
        bus: Arc<EventBus>,
        execution: Arc<dyn ExecutionAdapter>,
        llm: Arc<dyn LlmAdapter>,
        config: ForkConfig,
    ) -> Self {
        Self { storage, cache, bus, execution, llm, config }
    }

    /// `forkAutoAgent` (spec §4.7 steps 1-5).
    pub async fn fork_auto_agent(&self, req: ForkRequest) -> Result<ForkTaskId> {
        let depth = req.current_depth + 1;
        if depth > self.config.max_depth {
            return Err(Error::ForkDepthExceeded(format!(
                "current depth {} + 1 exceeds configured max depth {}",
                req.current_depth, self.config.max_depth
            )));
        }

        self.acquire_fork_slot().await?;

        let context_summary = self.compress(&req.context_summary, self.config.compression_threshold_chars).await;

        let task = ForkAgentTask {
            id: ForkTaskId::new(),
            parent_session_id: req.parent_session_id,
            parent_step_id: req.parent_step_id,
            goal: req.goal.clone(),
            context_summary,
            depth,
            max_steps: self.config.max_steps,
            timeout_secs: self.config.timeout_secs,
            status: ForkTaskStatus::Pending,
            result_summary: None,
            error: None,
            steps_executed: 0,
            tokens_used: 0,
            tool_calls: 0,
            retry_count: 0,
            sub_session_id: None,
            created_at: chrono::Utc::now(),
        };
        self.storage.create_fork_task(task.clone()).await?;
        self.bus.publish(events::subagent::started(&task.id.to_string())).await;

        let spec = SubAgentSpec {
            goal: task.goal.clone(),
            context_summary: task.context_summary.clone(),
            parent_session_id: task.parent_session_id,
            parent_step_id: task.parent_step_id,
            current_depth: req.current_depth,
            max_steps: task.max_steps,
            timeout_secs: task.timeout_secs,
            user_id: req.user_id,
            organization_id: req.organization_id,
        };

        if let Err(e) = self.execution.execute_sub_agent(task.id, spec).await {
            let mut failed = task.clone();
            failed.status = ForkTaskStatus::Failed;
            failed.error = Some(e.to_string());
            self.storage.update_fork_task(failed).await?;
            self.bus.publish(events::subagent::failed(&task.id.to_string(), &e.to_string())).await;
            self.release_fork_slot().await;
            return Err(e);
        }

        Ok(task.id)
    }

    /// Blocks (via the execution adapter) until the sub-agent reaches a
    /// terminal state, then persists the compressed result (spec §4.7 step
    /// 6). Returns the task's error message for `failed`/`timeout`.
    pub async fn wait_for_sub_agent(&self, task_id: ForkTaskId) -> Result<ForkAgentTask> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let outcome = self.execution.wait_for_completion(task_id, timeout).await;
        let mut task = self
            .storage
            .get_fork_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("fork task {task_id}")))?;

        let result = match outcome {
            Ok(outcome) => {
                let compressed = self.compress(&outcome.result_summary, self.config.compression_threshold_chars).await;
                task.status = ForkTaskStatus::Completed;
                task.result_summary = Some(compressed);
                task.steps_executed = outcome.steps_executed;
                task.tokens_used = outcome.tokens_used;
                task.tool_calls = outcome.tool_calls;
                task.sub_session_id = Some(outcome.sub_session_id);
                self.storage.update_fork_task(task.clone()).await?;
                self.bus.publish(events::subagent::completed(&task_id.to_string())).await;
                Ok(task)
            }
            Err(e) => {
                task.status = if matches!(e, Error::TaskTimeout) { ForkTaskStatus::Timeout } else { ForkTaskStatus::Failed };
                task.error = Some(e.to_string());
                self.storage.update_fork_task(task.clone()).await?;
                self.bus.publish(events::subagent::failed(&task_id.to_string(), &e.to_string())).await;
                Err(e)
            }
        };
        self.release_fork_slot().await;
        result
    }

    /// Marks a sub-agent `failed` with reason "cancelled" and asks the
    /// execution adapter to propagate cancellation (spec §5 "Cancellation").
    /// No-op if the task already reached a terminal state.
    pub async fn cancel_sub_agent(&self, task_id: ForkTaskId) -> Result<()> {
        let Some(mut task) = self.storage.get_fork_task(task_id).await? else {
            return Err(Error::NotFound(format!("fork task {task_id}")));
        };
        if task.status.is_terminal() {
            return Ok(());
        }
        task.status = ForkTaskStatus::Failed;
        task.error = Some("cancelled".to_string());
        self.storage.update_fork_task(task).await?;
        self.execution.cancel_sub_agent(task_id).await?;
        self.bus.publish(events::subagent::failed(&task_id.to_string(), "cancelled")).await;
        self.release_fork_slot().await;
        Ok(())
    }

    pub async fn get_sub_agents(&self, parent_session_id: SessionId) -> Result<Vec<ForkAgentTask>> {
        self.storage.list_fork_tasks(parent_session_id).await
    }

    pub async fn get_parent_session(&self, session_id: SessionId) -> Result<Option<Session>> {
        let Some(session) = self.storage.get_session(session_id).await? else { return Ok(None) };
        match session.parent_session_id {
            Some(parent_id) => self.storage.get_session(parent_id).await,
            None => Ok(None),
        }
    }

    /// LLM-summarize text above `max_len`, falling back to truncation with
    /// an ellipsis when the LLM call itself fails (spec §4.7 step 2, and
    /// symmetrically `compressResult` in step 6).
    async fn compress(&self, text: &str, max_len: usize) -> String {
        if text.chars().count() <= max_len {
            return text.to_string();
        }
        let prompt = format!("Summarize the following in under {max_len} characters:\n\n{text}");
        match self.llm.call(&prompt, &LlmCallOptions::default()).await {
            Ok(response) => truncate(&response.text, max_len),
            Err(e) => {
                warn!(error = %e, "context compression via LLM failed, falling back to truncation");
                truncate(text, max_len)
            }
        }
    }

    async fn acquire_fork_slot(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.queue_timeout_secs);
        loop {
            let count = self.cache.increment(ACTIVE_FORKS_KEY, 1).await?;
            if count as usize <= self.config.max_concurrent {
                return Ok(());
            }
            self.cache.decrement(ACTIVE_FORKS_KEY, 1).await?;
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Transient("fork queue timeout exceeded, too many concurrent sub-agents".to_string()));
            }
            info!("fork slot unavailable, queueing");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn release_fork_slot(&self) {
        let _ = self.cache.decrement(ACTIVE_FORKS_KEY, 1).await;
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wukong_foundation::{
        AsyncToolTask, CacheAdapter, LlmCapabilities, LlmResponse, ParallelToolCall, Step, StepListFilter,
        SubAgentOutcome, TokenUsage,
    };

    struct NullStorage {
        fork_tasks: Mutex<HashMap<ForkTaskId, ForkAgentTask>>,
        sessions: Mutex<HashMap<SessionId, Session>>,
    }
    impl NullStorage {
        fn new() -> Self {
            Self { fork_tasks: Mutex::new(HashMap::new()), sessions: Mutex::new(HashMap::new()) }
        }
    }
    #[async_trait]
    impl StorageAdapter for NullStorage {
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
        async fn list_sessions_by_user(&self, _user_id: &str) -> Result<Vec<Session>> {
            Ok(vec![])
        }
        async fn delete_session(&self, id: SessionId) -> Result<()> {
            self.sessions.lock().unwrap().remove(&id);
            Ok(())
        }
        async fn create_step(&self, _step: Step) -> Result<()> {
            Ok(())
        }
        async fn get_step(&self, _session_id: SessionId, _step_id: StepId) -> Result<Option<Step>> {
            Ok(None)
        }
        async fn update_step(&self, _step: Step) -> Result<()> {
            Ok(())
        }
        async fn list_steps(&self, _session_id: SessionId, _filter: StepListFilter) -> Result<Vec<Step>> {
            Ok(vec![])
        }
        async fn get_last_step(&self, _session_id: SessionId) -> Result<Option<Step>> {
            Ok(None)
        }
        async fn mark_discarded(&self, _session_id: SessionId, _step_ids: &[u64]) -> Result<()> {
            Ok(())
        }
        async fn create_parallel_call(&self, _call: ParallelToolCall) -> Result<()> {
            Ok(())
        }
        async fn update_parallel_call(&self, _call: ParallelToolCall) -> Result<()> {
            Ok(())
        }
        async fn list_parallel_calls(&self, _step_id: StepId) -> Result<Vec<ParallelToolCall>> {
            Ok(vec![])
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

    struct NullCache {
        counters: Mutex<HashMap<String, i64>>,
    }
    impl NullCache {
        fn new() -> Self {
            Self { counters: Mutex::new(HashMap::new()) }
        }
    }
    #[async_trait]
    impl CacheAdapter for NullCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: Value, _ttl: Option<Duration>) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        async fn exists(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn increment(&self, key: &str, by: i64) -> Result<i64> {
            let mut counters = self.counters.lock().unwrap();
            let entry = counters.entry(key.to_string()).or_insert(0);
            *entry += by;
            Ok(*entry)
        }
        async fn keys(&self, _pattern: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn push(&self, _key: &str, _value: Value) -> Result<()> {
            Ok(())
        }
        async fn pop(&self, _key: &str) -> Result<Option<Value>> {
            Ok(None)
        }
        async fn length(&self, _key: &str) -> Result<usize> {
            Ok(0)
        }
        async fn acquire_lock(&self, _key: &str, _ttl: Duration) -> Result<bool> {
            Ok(true)
        }
        async fn release_lock(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    struct ImmediateExecution;
    #[async_trait]
    impl ExecutionAdapter for ImmediateExecution {
        async fn execute_sub_agent(&self, _fork_task_id: ForkTaskId, _spec: SubAgentSpec) -> Result<()> {
            Ok(())
        }
        async fn wait_for_completion(&self, _fork_task_id: ForkTaskId, _timeout: Duration) -> Result<SubAgentOutcome> {
            Ok(SubAgentOutcome {
                sub_session_id: SessionId::new(),
                result_summary: "done".to_string(),
                steps_executed: 3,
                tokens_used: 100,
                tool_calls: 1,
            })
        }
        async fn cancel_sub_agent(&self, _fork_task_id: ForkTaskId) -> Result<()> {
            Ok(())
        }
        async fn is_running(&self, _fork_task_id: ForkTaskId) -> Result<bool> {
            Ok(false)
        }
    }

    struct StubLlm;
    #[async_trait]
    impl LlmAdapter for StubLlm {
        async fn call(&self, _prompt: &str, _opts: &LlmCallOptions) -> Result<LlmResponse> {
            Ok(LlmResponse {
                text: "short summary".to_string(),
                tokens_used: TokenUsage { prompt: 10, completion: 5, total: 15 },
                model: "stub".to_string(),
                response_time_ms: 1,
                finish_reason: "stop".to_string(),
            })
        }
        fn count_tokens(&self, text: &str) -> u64 {
            text.len() as u64
        }
        fn get_capabilities(&self) -> LlmCapabilities {
            LlmCapabilities { model: "stub".to_string(), context_window: 8192, supports_streaming: false }
        }
    }

    fn harness() -> ForkExecutor {
        ForkExecutor::new(
            Arc::new(NullStorage::new()),
            Arc::new(NullCache::new()),
            Arc::new(EventBus::new()),
            Arc::new(ImmediateExecution),
            Arc::new(StubLlm),
            ForkConfig::default(),
        )
    }

    fn req(current_depth: u32) -> ForkRequest {
        ForkRequest {
            goal: "investigate".to_string(),
            context_summary: "short".to_string(),
            parent_session_id: SessionId::new(),
            parent_step_id: StepId(1),
            current_depth,
            user_id: "u1".to_string(),
            organization_id: None,
        }
    }

    #[tokio::test]
    async fn depth_exceeding_max_fails_without_creating_a_task() {
        let executor = harness();
        let err = executor.fork_auto_agent(req(3)).await.unwrap_err();
        let msg = err.to_string().to_lowercase();
        assert!(msg.contains("maximum fork depth") || msg.contains("exceeded"));
    }

    #[tokio::test]
    async fn successful_fork_round_trips_through_wait() {
        let executor = harness();
        let task_id = executor.fork_auto_agent(req(0)).await.unwrap();
        let task = executor.wait_for_sub_agent(task_id).await.unwrap();
        assert_eq!(task.status, ForkTaskStatus::Completed);
        assert_eq!(task.result_summary.as_deref(), Some("done"));
        assert_eq!(task.depth, 1);
    }

    #[tokio::test]
    async fn long_context_is_compressed() {
        let executor = harness();
        let mut request = req(0);
        request.context_summary = "x".repeat(600);
        let task_id = executor.fork_auto_agent(request).await.unwrap();
        let task = executor.storage.get_fork_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.context_summary, "short summary");
    }

    #[tokio::test]
    async fn cancel_is_idempotent_once_terminal() {
        let executor = harness();
        let task_id = executor.fork_auto_agent(req(0)).await.unwrap();
        executor.wait_for_sub_agent(task_id).await.unwrap();
        executor.cancel_sub_agent(task_id).await.unwrap();
        let task = executor.storage.get_fork_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, ForkTaskStatus::Completed);
    }

    #[tokio::test]
    async fn get_parent_session_walks_the_back_reference() {
        let executor = harness();
        let parent = Session::new_root(SessionId::new(), "u1", "root goal", wukong_foundation::AgentKind::Autonomous);
        executor.storage.create_session(parent.clone()).await.unwrap();
        let child = Session::new_child(SessionId::new(), "u1", "child goal", &parent, None);
        executor.storage.create_session(child.clone()).await.unwrap();

        let found = executor.get_parent_session(child.id).await.unwrap().unwrap();
        assert_eq!(found.id, parent.id);
    }
}
