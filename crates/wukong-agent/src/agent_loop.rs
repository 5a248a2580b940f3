//! Agent loop (C10, spec §4.10).
//!
//! The outer driver: render a prompt, call the LLM, parse its response into
//! an [`Action`], hand it to the C8 step executor, and decide whether to
//! keep going. Grounded in the teacher's `Agent::run` (`agent.rs`) turn loop
//! — steering checks and a bounded iteration count around a single-threaded
//! call/dispatch cycle — generalized here to the six-action dispatch table
//! and the two agent kinds the spec distinguishes (interactive vs.
//! autonomous) instead of the teacher's single text-or-tool-call turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;
use wukong_core::tool::registry::ToolRegistry;
use wukong_core::StopController;
use wukong_foundation::{
    events, Action, AgentKind, EventBus, KnowledgeAdapter, KnowledgeHit, LlmAdapter, LlmCallOptions,
    LoopConfig, Result, Session, SessionStatus, StepListFilter, StepStatus, StorageAdapter,
    TaskResult, TaskStatus,
};

use crate::parser::ResponseParser;
use crate::prompt::{PromptBuilder, PromptInput};
use crate::step_executor::{build_tool_call_from, StepExecutor};

/// Gate for the interactive loop: called after a `CallTool`/`CallToolsParallel`
/// step (or any step that asked to wait for the user) to decide whether the
/// loop keeps going (spec §4.10: "interactive variant — confirmation gate").
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, tool_call: &Value) -> bool;
}

/// C10. Owns the pieces a single session run needs: prompt rendering, the
/// LLM call, response parsing, and dispatch through the C8 step executor.
/// The stop controller is passed in per-run rather than owned here, since it
/// is session-local state the caller (session manager) already tracks
/// (spec §9 "Global state").
pub struct AgentLoop {
    storage: Arc<dyn StorageAdapter>,
    bus: Arc<EventBus>,
    llm: Arc<dyn LlmAdapter>,
    knowledge: Option<Arc<dyn KnowledgeAdapter>>,
    registry: Arc<ToolRegistry>,
    step_executor: Arc<StepExecutor>,
    config: LoopConfig,
}

impl AgentLoop {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        bus: Arc<EventBus>,
        llm: Arc<dyn LlmAdapter>,
        registry: Arc<ToolRegistry>,
        step_executor: Arc<StepExecutor>,
        config: LoopConfig,
    ) -> Self {
        Self { storage, bus, llm, knowledge: None, registry, step_executor, config }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeAdapter>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Autonomous variant: no user confirmation between steps; searches the
    /// knowledge base once, on the first step, before the first LLM call
    /// (spec §4.10 "autonomous variant").
    pub async fn run_autonomous(&self, session: Session, stop: Arc<StopController>) -> Result<TaskResult> {
        self.run(session, stop, None).await
    }

    /// Interactive variant: after every `CallTool`/`CallToolsParallel` step
    /// (or any step that asked to wait for the user), `handler.confirm` is
    /// consulted; declining pauses the session (spec §4.10 "interactive
    /// variant").
    pub async fn run_interactive(
        &self,
        session: Session,
        stop: Arc<StopController>,
        handler: Arc<dyn ConfirmationHandler>,
    ) -> Result<TaskResult> {
        self.run(session, stop, Some(handler)).await
    }

    async fn run(
        &self,
        mut session: Session,
        stop: Arc<StopController>,
        confirmation: Option<Arc<dyn ConfirmationHandler>>,
    ) -> Result<TaskResult> {
        stop.reset();
        self.bus.publish(events::task::started(&session.id.to_string())).await;

        let deadline = Instant::now() + Duration::from_secs(self.config.task_timeout_secs);
        let mut steps_executed: u32 = 0;
        let mut final_result: Option<String> = None;
        let mut knowledge_hits: Vec<KnowledgeHit> = Vec::new();

        loop {
            if Instant::now() >= deadline {
                self.bus.publish(events::task::timeout(&session.id.to_string())).await;
                return Ok(self.finish_as(&mut session, TaskStatus::Timeout, steps_executed, final_result, None, &stop).await?);
            }
            if steps_executed >= self.config.max_steps {
                self.bus.publish(events::task::max_steps_reached(&session.id.to_string())).await;
                return Ok(self
                    .finish_as(
                        &mut session,
                        TaskStatus::Failed,
                        steps_executed,
                        final_result,
                        Some("max steps reached".to_string()),
                        &stop,
                    )
                    .await?);
            }

            if steps_executed == 0 && session.agent_kind == AgentKind::Autonomous {
                knowledge_hits = self.search_knowledge(&session).await;
            }

            let prompt = self.render_prompt(&session, &knowledge_hits).await?;

            self.bus.publish(events::llm::started(&session.id.to_string())).await;
            let llm_response = match self.llm.call(&prompt, &LlmCallOptions::default()).await {
                Ok(response) => response,
                Err(e) => {
                    self.bus.publish(events::llm::error(&session.id.to_string(), &e.to_string())).await;
                    return Ok(self
                        .finish_as(&mut session, TaskStatus::Failed, steps_executed, final_result, Some(e.to_string()), &stop)
                        .await?);
                }
            };
            self.bus.publish(events::llm::complete(&session.id.to_string())).await;

            let action = match ResponseParser::parse(&llm_response.text) {
                Ok(action) => action,
                Err(e) => {
                    return Ok(self
                        .finish_as(&mut session, TaskStatus::Failed, steps_executed, final_result, Some(e.to_string()), &stop)
                        .await?);
                }
            };
            let is_finish = matches!(action, Action::Finish { .. });

            let outcome = self.step_executor.execute(&session, action, Some(prompt), Some(llm_response.text)).await?;
            steps_executed += 1;
            self.bus.publish(events::progress::updated(&session.id.to_string(), steps_executed)).await;
            stop.update_state(session.id, steps_executed as u64, Some(outcome.step.id), outcome.step.result.clone());

            if is_finish {
                if let Some(result) = &outcome.step.result {
                    final_result = result.get("finalResult").and_then(Value::as_str).map(str::to_string);
                }
                self.bus.publish(events::task::completed(&session.id.to_string())).await;
                return Ok(self.finish_as(&mut session, TaskStatus::Completed, steps_executed, final_result, None, &stop).await?);
            }

            if outcome.step.status == StepStatus::Failed && !outcome.should_continue {
                let error = outcome.step.error.clone();
                self.bus
                    .publish(events::task::failed(&session.id.to_string(), error.as_deref().unwrap_or("")))
                    .await;
                return Ok(self.finish_as(&mut session, TaskStatus::Failed, steps_executed, final_result, error, &stop).await?);
            }

            if let Some(handler) = &confirmation {
                let needs_confirmation = outcome.wait_for_user
                    || matches!(outcome.step.action, Action::CallTool { .. } | Action::CallToolsParallel { .. });
                if needs_confirmation {
                    let tool_call = build_tool_call_from(&outcome.step)
                        .unwrap_or_else(|| serde_json::json!({"action": outcome.step.action.kind_name()}));
                    if !handler.confirm(&tool_call).await {
                        return Ok(self
                            .finish_as(&mut session, TaskStatus::Stopped, steps_executed, final_result, None, &stop)
                            .await?);
                    }
                }
            } else if outcome.wait_for_user {
                return Ok(self
                    .finish_as(&mut session, TaskStatus::Stopped, steps_executed, final_result, None, &stop)
                    .await?);
            }

            // Spec §9 open question: the loop confirms any pending stop
            // unconditionally after every successful step, so a graceful
            // stop request always takes effect immediately after the step
            // in progress when it was issued (see `StopController`, DESIGN.md).
            stop.confirm_stop();
            if stop.should_stop() {
                self.bus.publish(events::task::stopped(&session.id.to_string())).await;
                return Ok(self
                    .finish_as(&mut session, TaskStatus::Stopped, steps_executed, final_result, None, &stop)
                    .await?);
            }
        }
    }

    async fn search_knowledge(&self, session: &Session) -> Vec<KnowledgeHit> {
        let Some(knowledge) = &self.knowledge else { return Vec::new() };
        self.bus.publish(events::knowledge::searching(&session.id.to_string())).await;
        match knowledge.search(&session.goal, self.config.knowledge_top_k).await {
            Ok(hits) => {
                self.bus.publish(events::knowledge::found(&session.id.to_string(), hits.len())).await;
                hits
            }
            Err(e) => {
                warn!(session = %session.id, error = %e, "knowledge search failed, continuing without it");
                self.bus.publish(events::knowledge::error(&session.id.to_string(), &e.to_string())).await;
                Vec::new()
            }
        }
    }

    async fn render_prompt(&self, session: &Session, knowledge: &[KnowledgeHit]) -> Result<String> {
        let steps = self.storage.list_steps(session.id, StepListFilter { include_discarded: false }).await?;
        let history: Vec<_> = steps.iter().map(PromptBuilder::history_entry).collect();
        let tool_schemas = self.registry.schemas_for_prompt();
        let input = PromptInput {
            goal: &session.goal,
            tool_schemas: &tool_schemas,
            history: &history,
            knowledge,
            agent_kind: session.agent_kind,
            auto_run: matches!(session.agent_kind, AgentKind::Autonomous),
        };
        Ok(PromptBuilder::build(&input))
    }

    /// Persists the session's terminal status and assembles the
    /// `TaskResult` (spec §4.10 end-of-loop, §8 "Resume eligibility").
    async fn finish_as(
        &self,
        session: &mut Session,
        status: TaskStatus,
        steps_executed: u32,
        final_result: Option<String>,
        error: Option<String>,
        stop: &StopController,
    ) -> Result<TaskResult> {
        session.status = match status {
            TaskStatus::Completed => SessionStatus::Completed,
            TaskStatus::Failed => SessionStatus::Failed,
            TaskStatus::Stopped | TaskStatus::Timeout => SessionStatus::Stopped,
        };
        session.is_running = false;
        session.updated_at = chrono::Utc::now();
        self.storage.update_session(session.clone()).await?;

        let can_resume = matches!(status, TaskStatus::Stopped | TaskStatus::Timeout) && stop.get_stop_state().can_resume;
        Ok(TaskResult { status, steps_executed, final_result, error, can_resume })
    }
}
