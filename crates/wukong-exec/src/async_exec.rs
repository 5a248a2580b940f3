//! Async tool executor (C5, spec §4.5).
//!
//! State lives entirely in the cache adapter: `async:task:{id}` keys plus a
//! `async:polling:queue` FIFO (spec §6 "Persisted state layout"). Grounded in
//! the teacher's `TaskTracker` (`task/tracker.rs`) status-machine shape —
//! a map keyed by id with `mark_*` transitions — generalized here to read
//! and write through the cache adapter instead of an in-process `RwLock`,
//! since async task state must survive a process restart (spec §3 "Async
//! tool task").

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wukong_foundation::{
    events, AsyncTaskKind, AsyncTaskStatus, AsyncToolTask, AsyncToolHandler, CacheAdapter, Error,
    EventBus, Result, SessionId, StepId, ToolCallContext, ToolOutcome,
};

const POLLING_QUEUE_KEY: &str = "async:polling:queue";

fn task_key(id: &str) -> String {
    format!("async:task:{id}")
}

#[derive(Debug, Clone)]
pub struct AsyncToolExecutorConfig {
    pub pending_ttl: Duration,
    pub completed_ttl: Duration,
    pub failed_ttl: Duration,
    pub max_retries: u32,
}

impl Default for AsyncToolExecutorConfig {
    fn default() -> Self {
        let cfg = wukong_foundation::AsyncToolConfig::default();
        Self {
            pending_ttl: Duration::from_secs(cfg.pending_ttl_secs),
            completed_ttl: Duration::from_secs(cfg.completed_ttl_secs),
            failed_ttl: Duration::from_secs(cfg.failed_ttl_secs),
            max_retries: cfg.max_retries,
        }
    }
}

pub struct AsyncToolExecutor {
    cache: Arc<dyn CacheAdapter>,
    bus: Arc<EventBus>,
    config: AsyncToolExecutorConfig,
}

impl AsyncToolExecutor {
    pub fn new(cache: Arc<dyn CacheAdapter>, bus: Arc<EventBus>, config: AsyncToolExecutorConfig) -> Self {
        Self { cache, bus, config }
    }

    async fn persist(&self, task: &AsyncToolTask, ttl: Duration) -> Result<()> {
        let value = serde_json::to_value(task)?;
        self.cache.set(&task_key(&task.id.to_string()), value, Some(ttl)).await
    }

    /// Submit a new async tool invocation (spec §4.5 `executeAsync`).
    pub async fn execute_async(
        &self,
        tool_name: &str,
        parameters: Value,
        handler: &dyn AsyncToolHandler,
        session_id: SessionId,
        step_id: StepId,
        context: &ToolCallContext,
        kind: AsyncTaskKind,
    ) -> Result<AsyncToolTask> {
        let mut task = AsyncToolTask {
            id: wukong_foundation::AsyncTaskId::new(),
            tool_name: tool_name.to_string(),
            parameters: parameters.clone(),
            session_id,
            step_id,
            external_task_id: None,
            status: AsyncTaskStatus::Pending,
            result: None,
            error: None,
            last_poll_at: None,
            retry_count: 0,
            kind,
            estimated_duration_secs: None,
            created_at: chrono::Utc::now(),
        };

        self.persist(&task, self.config.pending_ttl).await?;
        self.bus.publish(events::tool_async::submitted(&task.id.to_string())).await;

        match handler.submit(parameters, context).await {
            Ok(external_id) => {
                task.external_task_id = Some(external_id);
                task.status = AsyncTaskStatus::Running;
                self.persist(&task, self.config.pending_ttl).await?;
                if matches!(kind, AsyncTaskKind::Polling) {
                    self.cache.push(POLLING_QUEUE_KEY, Value::String(task.id.to_string())).await?;
                }
                self.bus.publish(events::tool_async::running(&task.id.to_string())).await;
                Ok(task)
            }
            Err(e) => {
                task.status = AsyncTaskStatus::Failed;
                task.error = Some(wukong_foundation::sanitize(&e.to_string(), 500));
                self.persist(&task, self.config.failed_ttl).await?;
                self.bus.publish(events::tool_async::error(&task.id.to_string(), &e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn load(&self, task_id: &str) -> Result<Option<AsyncToolTask>> {
        match self.cache.get(&task_key(task_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Poll an in-flight task (spec §4.5 `pollTask`). No-op for terminal
    /// tasks; the polling queue is allowed spurious pops of already-terminal
    /// tasks (spec §9 open question), so this check makes that idempotent.
    pub async fn poll_task(
        &self,
        task_id: &str,
        handler: &dyn AsyncToolHandler,
        context: &ToolCallContext,
    ) -> Result<Option<AsyncToolTask>> {
        let Some(mut task) = self.load(task_id).await? else { return Ok(None) };
        if task.status.is_terminal() {
            return Ok(Some(task));
        }

        let external_id = task.external_task_id.clone().unwrap_or_default();
        task.last_poll_at = Some(chrono::Utc::now());

        match handler.poll(&external_id, context).await {
            Ok(outcome) if outcome.success => {
                task.status = AsyncTaskStatus::Completed;
                task.result = outcome.result;
                self.persist(&task, self.config.completed_ttl).await?;
                self.bus.publish(events::tool_async::completed(&task.id.to_string())).await;
            }
            Ok(outcome) if outcome.task_id.is_some() || is_still_running(&outcome) => {
                // still running: refresh TTL, re-enqueue, report progress.
                self.persist(&task, self.config.pending_ttl).await?;
                self.cache.push(POLLING_QUEUE_KEY, Value::String(task.id.to_string())).await?;
                self.bus.publish(events::tool_async::progress(&task.id.to_string())).await;
            }
            Ok(outcome) => {
                task.status = AsyncTaskStatus::Failed;
                let msg = outcome.error.unwrap_or_else(|| "tool reported failure".to_string());
                task.error = Some(wukong_foundation::sanitize(&msg, 500));
                self.persist(&task, self.config.failed_ttl).await?;
                self.bus.publish(events::tool_async::error(&task.id.to_string(), &msg)).await;
            }
            Err(e) => {
                task.retry_count += 1;
                if task.retry_count >= self.config.max_retries {
                    task.status = AsyncTaskStatus::Failed;
                    task.error = Some(wukong_foundation::sanitize(&e.to_string(), 500));
                    self.persist(&task, self.config.failed_ttl).await?;
                    self.bus.publish(events::tool_async::error(&task.id.to_string(), &e.to_string())).await;
                } else {
                    warn!(task_id, retry = task.retry_count, "poll failed, re-enqueuing");
                    self.persist(&task, self.config.pending_ttl).await?;
                    self.cache.push(POLLING_QUEUE_KEY, Value::String(task.id.to_string())).await?;
                }
            }
        }

        Ok(Some(task))
    }

    /// Webhook delivery mirrors `poll_task`, driven by `on_webhook` instead
    /// (spec §4.5 `handleWebhook`).
    pub async fn handle_webhook(
        &self,
        task_id: &str,
        payload: Value,
        handler: &dyn AsyncToolHandler,
        context: &ToolCallContext,
    ) -> Result<Option<AsyncToolTask>> {
        let Some(mut task) = self.load(task_id).await? else { return Ok(None) };
        if task.status.is_terminal() {
            return Ok(Some(task));
        }

        match handler.on_webhook(payload, context).await {
            Ok(outcome) if outcome.success => {
                task.status = AsyncTaskStatus::Completed;
                task.result = outcome.result;
                self.persist(&task, self.config.completed_ttl).await?;
                self.bus.publish(events::tool_async::completed(&task.id.to_string())).await;
            }
            Ok(outcome) => {
                task.status = AsyncTaskStatus::Failed;
                let msg = outcome.error.unwrap_or_else(|| "webhook reported failure".to_string());
                task.error = Some(wukong_foundation::sanitize(&msg, 500));
                self.persist(&task, self.config.failed_ttl).await?;
                self.bus.publish(events::tool_async::error(&task.id.to_string(), &msg)).await;
            }
            Err(e) => {
                task.status = AsyncTaskStatus::Failed;
                task.error = Some(wukong_foundation::sanitize(&e.to_string(), 500));
                self.persist(&task, self.config.failed_ttl).await?;
                self.bus.publish(events::tool_async::error(&task.id.to_string(), &e.to_string())).await;
            }
        }
        Ok(Some(task))
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<AsyncToolTask>> {
        self.load(task_id).await
    }

    pub async fn cancel(&self, task_id: &str) -> Result<Option<AsyncToolTask>> {
        let Some(mut task) = self.load(task_id).await? else { return Ok(None) };
        if task.status.is_terminal() {
            return Ok(Some(task));
        }
        task.status = AsyncTaskStatus::Failed;
        task.error = Some("cancelled".to_string());
        self.persist(&task, self.config.failed_ttl).await?;
        self.bus.publish(events::tool_async::cancelled(&task.id.to_string())).await;
        Ok(Some(task))
    }

    /// Map a terminal async task to the synchronous result shape
    /// (spec §4.5 `taskToToolResult`); timeout is reported as retryable.
    pub fn task_to_tool_result(task: &AsyncToolTask) -> ToolOutcome {
        match task.status {
            AsyncTaskStatus::Completed => ToolOutcome {
                success: true,
                result: task.result.clone(),
                task_id: Some(task.id.to_string()),
                ..Default::default()
            },
            AsyncTaskStatus::Failed => ToolOutcome::err(task.error.clone().unwrap_or_default(), false),
            AsyncTaskStatus::Timeout => ToolOutcome::err("async task timed out", true),
            AsyncTaskStatus::Pending | AsyncTaskStatus::Running => ToolOutcome {
                success: false,
                error: Some("still running".to_string()),
                can_retry: Some(true),
                task_id: Some(task.id.to_string()),
                ..Default::default()
            },
        }
    }

    /// Drain one task id from the polling queue, if any (spec §4.5: a queue
    /// of ids consumers dequeue at their own cadence, spec §5 backpressure).
    pub async fn next_polling_task(&self) -> Result<Option<String>> {
        match self.cache.pop(POLLING_QUEUE_KEY).await? {
            Some(Value::String(id)) => Ok(Some(id)),
            Some(_) => Err(Error::Cache("malformed polling queue entry".to_string())),
            None => Ok(None),
        }
    }
}

fn is_still_running(outcome: &ToolOutcome) -> bool {
    !outcome.success && outcome.error.is_none()
}

/// In-memory stand-in collaborator the spec leaves as an interface (spec §6)
/// — useful for tests and for `wukong-cli`'s demo wiring. Not used by
/// production code paths, which take `Arc<dyn CacheAdapter>` directly.
pub struct InMemoryCache {
    store: tokio::sync::Mutex<HashMap<String, Value>>,
    queues: tokio::sync::Mutex<HashMap<String, std::collections::VecDeque<Value>>>,
    locks: tokio::sync::Mutex<std::collections::HashSet<String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            store: tokio::sync::Mutex::new(HashMap::new()),
            queues: tokio::sync::Mutex::new(HashMap::new()),
            locks: tokio::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheAdapter for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.store.lock().await.get(key).cloned())
    }
    async fn set(&self, key: &str, value: Value, _ttl: Option<Duration>) -> Result<()> {
        self.store.lock().await.insert(key.to_string(), value);
        Ok(())
    }
    async fn delete(&self, key: &str) -> Result<()> {
        self.store.lock().await.remove(key);
        Ok(())
    }
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.store.lock().await.contains_key(key))
    }
    async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let mut store = self.store.lock().await;
        let current = store.get(key).and_then(Value::as_i64).unwrap_or(0);
        let next = current + by;
        store.insert(key.to_string(), Value::from(next));
        Ok(next)
    }
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let prefix = pattern.trim_end_matches('*');
        Ok(self.store.lock().await.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
    async fn push(&self, key: &str, value: Value) -> Result<()> {
        self.queues.lock().await.entry(key.to_string()).or_default().push_back(value);
        Ok(())
    }
    async fn pop(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.queues.lock().await.get_mut(key).and_then(|q| q.pop_front()))
    }
    async fn length(&self, key: &str) -> Result<usize> {
        Ok(self.queues.lock().await.get(key).map(|q| q.len()).unwrap_or(0))
    }
    async fn acquire_lock(&self, key: &str, _ttl: Duration) -> Result<bool> {
        Ok(self.locks.lock().await.insert(key.to_string()))
    }
    async fn release_lock(&self, key: &str) -> Result<()> {
        self.locks.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wukong_foundation::ToolOutcome;

    struct SlowJob {
        completes_after_polls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl AsyncToolHandler for SlowJob {
        async fn submit(&self, _params: Value, _ctx: &ToolCallContext) -> Result<String> {
            Ok("ext-1".to_string())
        }
        async fn poll(&self, _external_task_id: &str, _ctx: &ToolCallContext) -> Result<ToolOutcome> {
            let remaining = self.completes_after_polls.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            if remaining <= 1 {
                Ok(ToolOutcome::ok(serde_json::json!({"output": "x"})))
            } else {
                Ok(ToolOutcome { success: false, error: None, ..Default::default() })
            }
        }
    }

    fn harness() -> (AsyncToolExecutor, Arc<InMemoryCache>) {
        let cache = Arc::new(InMemoryCache::new());
        let bus = Arc::new(EventBus::new());
        (AsyncToolExecutor::new(cache.clone(), bus, AsyncToolExecutorConfig::default()), cache)
    }

    #[tokio::test]
    async fn submit_transitions_to_running_and_enqueues_for_polling() {
        let (exec, cache) = harness();
        let handler = SlowJob { completes_after_polls: std::sync::atomic::AtomicU32::new(1) };
        let task = exec
            .execute_async(
                "job",
                serde_json::json!({}),
                &handler,
                SessionId::new(),
                StepId(1),
                &ToolCallContext::default(),
                AsyncTaskKind::Polling,
            )
            .await
            .unwrap();
        assert_eq!(task.status, AsyncTaskStatus::Running);
        assert_eq!(cache.length(POLLING_QUEUE_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn poll_completes_the_task_and_stores_result() {
        let (exec, _cache) = harness();
        let handler = SlowJob { completes_after_polls: std::sync::atomic::AtomicU32::new(1) };
        let task = exec
            .execute_async(
                "job",
                serde_json::json!({}),
                &handler,
                SessionId::new(),
                StepId(1),
                &ToolCallContext::default(),
                AsyncTaskKind::Polling,
            )
            .await
            .unwrap();

        let polled = exec.poll_task(&task.id.to_string(), &handler, &ToolCallContext::default()).await.unwrap().unwrap();
        assert_eq!(polled.status, AsyncTaskStatus::Completed);
        assert_eq!(polled.result, Some(serde_json::json!({"output": "x"})));
    }

    #[tokio::test]
    async fn poll_is_a_noop_for_terminal_tasks() {
        let (exec, _cache) = harness();
        let handler = SlowJob { completes_after_polls: std::sync::atomic::AtomicU32::new(1) };
        let task = exec
            .execute_async(
                "job",
                serde_json::json!({}),
                &handler,
                SessionId::new(),
                StepId(1),
                &ToolCallContext::default(),
                AsyncTaskKind::Polling,
            )
            .await
            .unwrap();
        exec.poll_task(&task.id.to_string(), &handler, &ToolCallContext::default()).await.unwrap();
        // second poll after completion must not change anything (sticky terminal).
        let again = exec.poll_task(&task.id.to_string(), &handler, &ToolCallContext::default()).await.unwrap().unwrap();
        assert_eq!(again.status, AsyncTaskStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_marks_failed_with_cancelled_reason() {
        let (exec, _cache) = harness();
        let handler = SlowJob { completes_after_polls: std::sync::atomic::AtomicU32::new(5) };
        let task = exec
            .execute_async(
                "job",
                serde_json::json!({}),
                &handler,
                SessionId::new(),
                StepId(1),
                &ToolCallContext::default(),
                AsyncTaskKind::Polling,
            )
            .await
            .unwrap();
        let cancelled = exec.cancel(&task.id.to_string()).await.unwrap().unwrap();
        assert_eq!(cancelled.status, AsyncTaskStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn task_to_tool_result_reports_timeout_as_retryable() {
        let task = AsyncToolTask {
            id: wukong_foundation::AsyncTaskId::new(),
            tool_name: "job".to_string(),
            parameters: serde_json::json!({}),
            session_id: SessionId::new(),
            step_id: StepId(1),
            external_task_id: None,
            status: AsyncTaskStatus::Timeout,
            result: None,
            error: None,
            last_poll_at: None,
            retry_count: 0,
            kind: AsyncTaskKind::Polling,
            estimated_duration_secs: None,
            created_at: chrono::Utc::now(),
        };
        let outcome = AsyncToolExecutor::task_to_tool_result(&task);
        assert_eq!(outcome.can_retry, Some(true));
    }
}
