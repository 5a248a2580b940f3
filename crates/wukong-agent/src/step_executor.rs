//! Step executor (C8, spec §4.8).
//!
//! Given a session and a parsed [`Action`], creates the step record,
//! dispatches to the right handler by action kind, updates the step to a
//! terminal status, and emits the matching `step:*` events. Grounded in the
//! teacher's `Agent::run` turn loop (`agent.rs`): one record per turn,
//! before/after hooks bracketing dispatch — generalized here so dispatch is
//! exhaustive over the six action kinds instead of "tool calls vs text".

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use wukong_core::tool::executor::ToolExecutor;
use wukong_core::tool::registry::ToolRegistry;
use wukong_exec::{ParallelExecOptions, ParallelToolExecutor};
use wukong_fork::{ForkExecutor, ForkRequest};
use wukong_foundation::{
    events, Action, AgentKind, Error, EventBus, Result, Session, SessionId, SessionStatus,
    StepId, StepStatus, StorageAdapter, Step, StepListFilter, ToolCallContext,
};

/// Result of dispatching one action (spec §4.8 action dispatch table).
pub struct StepOutcome {
    pub step: Step,
    /// Whether the loop should request another model turn.
    pub should_continue: bool,
    /// `AskUser` sets this so the interactive loop pauses for input.
    pub wait_for_user: bool,
    /// Ids of any async tool tasks the loop may later poll/await (spec §4.8
    /// "CallTool": "if the tool result carries a `taskId`... return it in
    /// `taskIds`").
    pub task_ids: Vec<String>,
}

/// C8. Depends on the C4 tool executor directly, and optionally on the C6
/// parallel executor and C7 fork subsystem — both are `Option` because a
/// minimal embedding (spec §4.8 "if no fork subsystem is wired...") may
/// only need `CallTool`/`Finish` dispatch.
pub struct StepExecutor {
    storage: Arc<dyn StorageAdapter>,
    bus: Arc<EventBus>,
    registry: Arc<ToolRegistry>,
    tool_executor: Arc<ToolExecutor>,
    parallel_executor: Option<Arc<ParallelToolExecutor>>,
    fork_executor: Option<Arc<ForkExecutor>>,
}

impl StepExecutor {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        bus: Arc<EventBus>,
        registry: Arc<ToolRegistry>,
        tool_executor: Arc<ToolExecutor>,
    ) -> Self {
        Self { storage, bus, registry, tool_executor, parallel_executor: None, fork_executor: None }
    }

    pub fn with_parallel_executor(mut self, executor: Arc<ParallelToolExecutor>) -> Self {
        self.parallel_executor = Some(executor);
        self
    }

    pub fn with_fork_executor(mut self, executor: Arc<ForkExecutor>) -> Self {
        self.fork_executor = Some(executor);
        self
    }

    /// Execute one parsed action against `session` (spec §4.8 steps 1-6).
    pub async fn execute(
        &self,
        session: &Session,
        action: Action,
        llm_prompt: Option<String>,
        llm_response: Option<String>,
    ) -> Result<StepOutcome> {
        let step_number = self.next_step_number(session.id).await?;
        let step_id = StepId(step_number);

        let mut step = Step::new_pending(step_id, session.id, step_number, action);
        step.llm_prompt = llm_prompt;
        step.llm_response = llm_response;
        self.storage.create_step(step.clone()).await?;
        self.bus.publish(events::step::started(&session.id.to_string(), step_number)).await;

        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        self.storage.update_step(step.clone()).await?;

        let context = ToolCallContext {
            session_id: Some(session.id),
            step_id: Some(step.id),
            user_id: Some(session.user_id.clone()),
            metadata: Default::default(),
        };

        let dispatch = self.dispatch(session, &step, &context).await;

        step.completed_at = Some(Utc::now());
        let (should_continue, wait_for_user, task_ids) = match dispatch {
            Ok(dispatched) => {
                step.status = StepStatus::Completed;
                step.result = dispatched.result;
                self.bus.publish(events::step::completed(&session.id.to_string(), step_number)).await;
                (dispatched.should_continue, dispatched.wait_for_user, dispatched.task_ids)
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.error = Some(e.to_string());
                self.bus
                    .publish(events::step::failed(&session.id.to_string(), step_number, &e.to_string()))
                    .await;
                (e.is_retryable(), false, Vec::new())
            }
        };
        self.storage.update_step(step.clone()).await?;

        let discardable = step.action.discardable_steps().to_vec();
        if !discardable.is_empty() {
            self.storage.mark_discarded(session.id, &discardable).await?;
            self.bus.publish(events::step::discarded(&session.id.to_string(), &discardable)).await;
        }

        Ok(StepOutcome { step, should_continue, wait_for_user, task_ids })
    }

    /// Next dense `stepNumber` derived from the count of non-discarded steps
    /// (spec §4.8 step 1, §3 invariant "contiguous prefix {1..n}").
    async fn next_step_number(&self, session_id: SessionId) -> Result<u64> {
        let existing = self.storage.list_steps(session_id, StepListFilter { include_discarded: false }).await?;
        Ok(existing.len() as u64 + 1)
    }

    async fn dispatch(&self, session: &Session, step: &Step, context: &ToolCallContext) -> Result<Dispatched> {
        match &step.action {
            Action::CallTool { selected_tool, parameters, .. } => {
                self.dispatch_call_tool(session, selected_tool, parameters.clone(), context).await
            }
            Action::CallToolsParallel { tools, wait_strategy, timeout_secs, .. } => {
                self.dispatch_parallel(session, step.id, tools.clone(), *wait_strategy, *timeout_secs, context).await
            }
            Action::ForkAutoAgent { goal, context_summary, .. } => {
                self.dispatch_fork(session, step.id, goal, context_summary.clone()).await
            }
            Action::AskUser { message_to_user, .. } => {
                self.bus.publish(events::tool::requires_confirmation(&session.id.to_string(), "ask_user")).await;
                Ok(Dispatched {
                    result: Some(serde_json::json!({ "messageToUser": message_to_user })),
                    should_continue: false,
                    wait_for_user: true,
                    task_ids: Vec::new(),
                })
            }
            Action::Plan { plan, .. } => {
                self.bus.publish(events::plan::ready(&session.id.to_string(), plan)).await;
                Ok(Dispatched { result: Some(plan.clone()), should_continue: true, wait_for_user: false, task_ids: Vec::new() })
            }
            Action::Finish { final_result, .. } => {
                let mut finished = session.clone();
                finished.status = SessionStatus::Completed;
                finished.is_running = false;
                finished.updated_at = Utc::now();
                self.storage.update_session(finished).await?;
                self.bus.publish(events::session::updated(&session.id.to_string(), "completed")).await;
                Ok(Dispatched {
                    result: Some(serde_json::json!({ "finalResult": final_result })),
                    should_continue: false,
                    wait_for_user: false,
                    task_ids: Vec::new(),
                })
            }
        }
    }

    async fn dispatch_call_tool(
        &self,
        session: &Session,
        tool_name: &str,
        parameters: Value,
        context: &ToolCallContext,
    ) -> Result<Dispatched> {
        if let Some(entry) = self.registry.get(tool_name) {
            if entry.requires_confirmation {
                self.bus.publish(events::tool::requires_confirmation(&session.id.to_string(), tool_name)).await;
            }
        }
        self.bus.publish(events::tool::executing(&session.id.to_string(), tool_name)).await;

        let outcome = match self.tool_executor.execute(&self.registry, tool_name, parameters, context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.bus.publish(events::tool::failed(&session.id.to_string(), tool_name, &e.to_string())).await;
                return if e.can_retry() {
                    Ok(Dispatched {
                        result: Some(serde_json::json!({"error": e.to_string(), "canRetry": true})),
                        should_continue: true,
                        wait_for_user: false,
                        task_ids: Vec::new(),
                    })
                } else {
                    Err(Error::Tool(e.to_string()))
                };
            }
        };

        if !outcome.success {
            self.bus
                .publish(events::tool::failed(&session.id.to_string(), tool_name, outcome.error.as_deref().unwrap_or("")))
                .await;
            let retryable = outcome.can_retry.unwrap_or(false);
            return if retryable {
                Ok(Dispatched {
                    result: Some(serde_json::json!({"error": outcome.error, "canRetry": true})),
                    should_continue: true,
                    wait_for_user: false,
                    task_ids: Vec::new(),
                })
            } else {
                Err(Error::Tool(outcome.error.unwrap_or_else(|| "tool call failed".to_string())))
            };
        }

        self.bus.publish(events::tool::completed(&session.id.to_string(), tool_name)).await;
        let task_ids = outcome.task_id.clone().into_iter().collect();
        Ok(Dispatched {
            result: outcome.result.or_else(|| outcome.summary.map(|s| Value::String(s))),
            should_continue: true,
            wait_for_user: false,
            task_ids,
        })
    }

    async fn dispatch_parallel(
        &self,
        session: &Session,
        step_id: StepId,
        tools: Vec<wukong_foundation::ToolInvocation>,
        wait_strategy: wukong_foundation::WaitStrategy,
        timeout_secs: Option<u64>,
        context: &ToolCallContext,
    ) -> Result<Dispatched> {
        let Some(parallel) = &self.parallel_executor else {
            return Err(Error::InvalidState("CallToolsParallel dispatched without a parallel executor wired".to_string()));
        };
        let opts = ParallelExecOptions {
            step_id,
            session_id: session.id,
            wait_strategy,
            timeout: std::time::Duration::from_secs(timeout_secs.unwrap_or(120)),
            max_retries: None,
        };
        let result = parallel.execute(Arc::clone(&self.registry), tools, context.clone(), opts).await?;
        let result_json = serde_json::json!({
            "successCount": result.success_count,
            "totalCount": result.total_count,
            "conditionMet": result.condition_met,
            "calls": result.calls,
        });
        Ok(Dispatched {
            result: Some(result_json),
            should_continue: result.condition_met,
            wait_for_user: false,
            task_ids: Vec::new(),
        })
    }

    async fn dispatch_fork(
        &self,
        session: &Session,
        step_id: StepId,
        goal: &str,
        context_summary: Option<String>,
    ) -> Result<Dispatched> {
        let Some(fork) = &self.fork_executor else {
            // Fallback (spec §4.8 "ForkAutoAgent"): no fork subsystem wired,
            // create the sub-session directly and return without blocking.
            let child = Session::new_child(SessionId::new(), session.user_id.clone(), goal.to_string(), session, context_summary);
            self.storage.create_session(child.clone()).await?;
            warn!(session = %session.id, "fork subsystem not wired, created sub-session directly");
            return Ok(Dispatched {
                result: Some(serde_json::json!({"subSessionId": child.id.to_string()})),
                should_continue: true,
                wait_for_user: false,
                task_ids: Vec::new(),
            });
        };

        let request = ForkRequest {
            goal: goal.to_string(),
            context_summary: context_summary.unwrap_or_default(),
            parent_session_id: session.id,
            parent_step_id: step_id,
            current_depth: session.depth,
            user_id: session.user_id.clone(),
            organization_id: None,
        };
        match fork.fork_auto_agent(request).await {
            Ok(task_id) => Ok(Dispatched {
                result: Some(serde_json::json!({"forkTaskId": task_id.to_string()})),
                should_continue: true,
                wait_for_user: false,
                task_ids: Vec::new(),
            }),
            Err(e) => Err(e),
        }
    }
}

struct Dispatched {
    result: Option<Value>,
    should_continue: bool,
    wait_for_user: bool,
    task_ids: Vec<String>,
}

/// Builds the reduced "tool call" view the interactive loop's confirmation
/// handler is shown (spec §4.10 pseudocode `buildToolCallFrom(result.step)`).
pub fn build_tool_call_from(step: &Step) -> Option<Value> {
    match &step.action {
        Action::CallTool { selected_tool, parameters, .. } => Some(serde_json::json!({
            "tool": selected_tool,
            "parameters": parameters,
            "result": step.result,
        })),
        Action::CallToolsParallel { tools, .. } => Some(serde_json::json!({
            "tools": tools,
            "result": step.result,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wukong_foundation::{ForkAgentTask, ParallelToolCall, RiskLevel, ToolHandler, ToolOutcome};

    struct MemStorage {
        sessions: Mutex<HashMap<SessionId, Session>>,
        steps: Mutex<HashMap<(SessionId, StepId), Step>>,
    }
    impl MemStorage {
        fn new() -> Self {
            Self { sessions: Mutex::new(HashMap::new()), steps: Mutex::new(HashMap::new()) }
        }
    }
    #[async_trait]
    impl StorageAdapter for MemStorage {
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
            let mut steps = self.steps.lock().unwrap();
            for (_, step) in steps.iter_mut() {
                if step.session_id == session_id && step_ids.contains(&step.step_number) {
                    step.discarded = true;
                }
            }
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
        async fn create_fork_task(&self, _task: ForkAgentTask) -> Result<()> {
            Ok(())
        }
        async fn get_fork_task(&self, _id: wukong_foundation::ForkTaskId) -> Result<Option<ForkAgentTask>> {
            Ok(None)
        }
        async fn update_fork_task(&self, _task: ForkAgentTask) -> Result<()> {
            Ok(())
        }
        async fn list_fork_tasks(&self, _parent_session_id: SessionId) -> Result<Vec<ForkAgentTask>> {
            Ok(vec![])
        }
    }

    struct Echo;
    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, params: Value, _ctx: &ToolCallContext) -> ToolOutcome {
            ToolOutcome::ok(params)
        }
    }

    async fn harness() -> (StepExecutor, Session) {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemStorage::new());
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(wukong_core::tool::ToolEntry {
                name: "echo".to_string(),
                description: "echoes".to_string(),
                version: "1.0.0".to_string(),
                category: "test".to_string(),
                risk_level: RiskLevel::Low,
                timeout_secs: 5,
                requires_confirmation: false,
                estimated_time_secs: None,
                parameter_schema: json!({"type": "object", "properties": {"v": {"type": "string", "default": "x"}}}),
                handler: Arc::new(Echo),
                async_handler: None,
            })
            .unwrap();
        let session = Session::new_root(SessionId::new(), "u1", "goal", AgentKind::Autonomous);
        storage.create_session(session.clone()).await.unwrap();
        let executor = StepExecutor::new(storage, bus, registry, Arc::new(ToolExecutor::default()));
        (executor, session)
    }

    #[tokio::test]
    async fn call_tool_completes_and_continues() {
        let (executor, session) = harness().await;
        let action = Action::CallTool {
            reasoning: "r".into(),
            selected_tool: "echo".into(),
            parameters: json!({"v": "hi"}),
            discardable_steps: vec![],
        };
        let outcome = executor.execute(&session, action, None, None).await.unwrap();
        assert!(outcome.should_continue);
        assert_eq!(outcome.step.status, StepStatus::Completed);
        assert_eq!(outcome.step.step_number, 1);
    }

    #[tokio::test]
    async fn step_numbers_are_dense_across_calls() {
        let (executor, session) = harness().await;
        for _ in 0..3 {
            let action = Action::CallTool {
                reasoning: "r".into(),
                selected_tool: "echo".into(),
                parameters: json!({"v": "hi"}),
                discardable_steps: vec![],
            };
            executor.execute(&session, action, None, None).await.unwrap();
        }
        let action = Action::Finish { reasoning: "done".into(), final_result: "ok".into(), discardable_steps: vec![] };
        let outcome = executor.execute(&session, action, None, None).await.unwrap();
        assert_eq!(outcome.step.step_number, 4);
    }

    #[tokio::test]
    async fn finish_marks_session_completed() {
        let (executor, session) = harness().await;
        let action = Action::Finish { reasoning: "done".into(), final_result: "ok".into(), discardable_steps: vec![] };
        let outcome = executor.execute(&session, action, None, None).await.unwrap();
        assert!(!outcome.should_continue);
        assert_eq!(outcome.step.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn ask_user_pauses_for_input() {
        let (executor, session) = harness().await;
        let action = Action::AskUser { reasoning: "r".into(), message_to_user: "which file?".into(), discardable_steps: vec![] };
        let outcome = executor.execute(&session, action, None, None).await.unwrap();
        assert!(outcome.wait_for_user);
        assert!(!outcome.should_continue);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_hard_failure() {
        let (executor, session) = harness().await;
        let action = Action::CallTool {
            reasoning: "r".into(),
            selected_tool: "missing".into(),
            parameters: json!({}),
            discardable_steps: vec![],
        };
        let outcome = executor.execute(&session, action, None, None).await.unwrap();
        assert_eq!(outcome.step.status, StepStatus::Failed);
        assert!(!outcome.should_continue);
    }

    #[tokio::test]
    async fn discardable_steps_are_marked_on_completion() {
        let (executor, session) = harness().await;
        let action1 = Action::CallTool {
            reasoning: "r".into(),
            selected_tool: "echo".into(),
            parameters: json!({"v": "hi"}),
            discardable_steps: vec![],
        };
        executor.execute(&session, action1, None, None).await.unwrap();

        let action2 = Action::Plan { reasoning: "r".into(), plan: json!({"steps": []}), discardable_steps: vec![1] };
        executor.execute(&session, action2, None, None).await.unwrap();

        let steps = executor.storage.list_steps(session.id, StepListFilter { include_discarded: true }).await.unwrap();
        let step1 = steps.iter().find(|s| s.step_number == 1).unwrap();
        assert!(step1.discarded);

        let visible = executor.storage.list_steps(session.id, StepListFilter::default()).await.unwrap();
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn build_tool_call_from_projects_call_tool_action() {
        let step = Step::new_pending(
            StepId(1),
            SessionId::new(),
            1,
            Action::CallTool {
                reasoning: "r".into(),
                selected_tool: "echo".into(),
                parameters: json!({"v": "hi"}),
                discardable_steps: vec![],
            },
        );
        let projected = build_tool_call_from(&step).unwrap();
        assert_eq!(projected["tool"], json!("echo"));
    }
}
