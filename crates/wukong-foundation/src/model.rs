//! Shared domain model (spec §3 "Data model").
//!
//! These types are the vocabulary every other crate in the workspace
//! operates on. They live here — rather than in whichever crate owns the
//! component that mutates them — because the collaborator traits in
//! [`crate::adapters`] (storage, cache) need to name them in CRUD signatures,
//! and those traits are themselves implemented by adapters that sit below
//! every component crate. Keeping the nouns in the leaf crate and the verbs
//! (`StopController`, `ToolRegistry`, `SessionManager`, ...) in their owning
//! crates mirrors the teacher's split between `forge-foundation` (types +
//! `Tool` trait) and `forge-core`/`forge-agent` (behavior).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AsyncTaskId, ForkTaskId, SessionId, StepId, ToolCallId};

// ---------------------------------------------------------------------
// Session (spec §3 "Session")
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    /// `completed` and `failed` are terminal (spec §3 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Interactive,
    Autonomous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub goal: String,
    pub status: SessionStatus,
    pub agent_kind: AgentKind,
    pub depth: u32,
    pub parent_session_id: Option<SessionId>,
    pub inherited_context: Option<String>,
    pub last_compressed_step_id: u64,
    pub is_running: bool,
    pub is_deleted: bool,
    pub is_compressing: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new_root(id: SessionId, user_id: impl Into<String>, goal: impl Into<String>, agent_kind: AgentKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            goal: goal.into(),
            status: SessionStatus::Active,
            agent_kind,
            depth: 0,
            parent_session_id: None,
            inherited_context: None,
            last_compressed_step_id: 0,
            is_running: true,
            is_deleted: false,
            is_compressing: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// A session with `parent` has `depth = parent.depth + 1` (spec §3 invariant).
    pub fn new_child(
        id: SessionId,
        user_id: impl Into<String>,
        goal: impl Into<String>,
        parent: &Session,
        inherited_context: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            goal: goal.into(),
            status: SessionStatus::Active,
            agent_kind: parent.agent_kind,
            depth: parent.depth + 1,
            parent_session_id: Some(parent.id),
            inherited_context,
            last_compressed_step_id: 0,
            is_running: true,
            is_deleted: false,
            is_compressing: false,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------
// Wait strategy (spec §4.6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    All,
    Any,
    Majority,
}

// ---------------------------------------------------------------------
// Action envelope (spec §9 "Dynamic action envelope -> tagged variants")
// ---------------------------------------------------------------------

/// One parallel tool invocation as requested inside a `CallToolsParallel`
/// action, before any execution state exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_id: String,
    pub tool_name: String,
    pub parameters: Value,
}

/// The six action kinds the model may emit (spec §4.8, GLOSSARY). Modeled as
/// a tagged union so the step executor's dispatch is exhaustive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Action {
    CallTool {
        reasoning: String,
        #[serde(rename = "selectedTool")]
        selected_tool: String,
        parameters: Value,
        #[serde(default)]
        discardable_steps: Vec<u64>,
    },
    CallToolsParallel {
        reasoning: String,
        tools: Vec<ToolInvocation>,
        #[serde(default = "default_wait_strategy")]
        wait_strategy: WaitStrategy,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        discardable_steps: Vec<u64>,
    },
    ForkAutoAgent {
        reasoning: String,
        goal: String,
        #[serde(default)]
        context_summary: Option<String>,
        #[serde(default)]
        discardable_steps: Vec<u64>,
    },
    AskUser {
        reasoning: String,
        #[serde(rename = "messageToUser")]
        message_to_user: String,
        #[serde(default)]
        discardable_steps: Vec<u64>,
    },
    Plan {
        reasoning: String,
        plan: Value,
        #[serde(default)]
        discardable_steps: Vec<u64>,
    },
    Finish {
        reasoning: String,
        #[serde(rename = "finalResult")]
        final_result: String,
        #[serde(default)]
        discardable_steps: Vec<u64>,
    },
}

fn default_wait_strategy() -> WaitStrategy {
    WaitStrategy::All
}

impl Action {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::CallTool { .. } => "CallTool",
            Action::CallToolsParallel { .. } => "CallToolsParallel",
            Action::ForkAutoAgent { .. } => "ForkAutoAgent",
            Action::AskUser { .. } => "AskUser",
            Action::Plan { .. } => "Plan",
            Action::Finish { .. } => "Finish",
        }
    }

    pub fn discardable_steps(&self) -> &[u64] {
        match self {
            Action::CallTool { discardable_steps, .. }
            | Action::CallToolsParallel { discardable_steps, .. }
            | Action::ForkAutoAgent { discardable_steps, .. }
            | Action::AskUser { discardable_steps, .. }
            | Action::Plan { discardable_steps, .. }
            | Action::Finish { discardable_steps, .. } => discardable_steps,
        }
    }
}

// ---------------------------------------------------------------------
// Step (spec §3 "Step")
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub session_id: SessionId,
    pub step_number: u64,
    pub action: Action,
    pub status: StepStatus,
    pub discarded: bool,
    pub llm_prompt: Option<String>,
    pub llm_response: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Step {
    pub fn new_pending(id: StepId, session_id: SessionId, step_number: u64, action: Action) -> Self {
        Self {
            id,
            session_id,
            step_number,
            action,
            status: StepStatus::Pending,
            discarded: false,
            llm_prompt: None,
            llm_response: None,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------
// Parallel tool call (spec §3 "Parallel tool call")
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl ParallelCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ParallelCallStatus::Completed | ParallelCallStatus::Failed | ParallelCallStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelToolCall {
    pub step_id: StepId,
    pub tool_id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub status: ParallelCallStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub progress: u8,
    pub retry_count: u32,
    pub retry_cap: u32,
}

impl ParallelToolCall {
    pub fn new_pending(step_id: StepId, invocation: &ToolInvocation, retry_cap: u32) -> Self {
        Self {
            step_id,
            tool_id: invocation.tool_id.clone(),
            tool_name: invocation.tool_name.clone(),
            parameters: invocation.parameters.clone(),
            status: ParallelCallStatus::Pending,
            result: None,
            error: None,
            progress: 0,
            retry_count: 0,
            retry_cap,
        }
    }
}

// ---------------------------------------------------------------------
// Fork-agent task (spec §3 "Fork-agent task")
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl ForkTaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ForkTaskStatus::Completed | ForkTaskStatus::Failed | ForkTaskStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkAgentTask {
    pub id: ForkTaskId,
    pub parent_session_id: SessionId,
    pub parent_step_id: StepId,
    pub goal: String,
    pub context_summary: String,
    pub depth: u32,
    pub max_steps: u32,
    pub timeout_secs: u64,
    pub status: ForkTaskStatus,
    pub result_summary: Option<String>,
    pub error: Option<String>,
    pub steps_executed: u32,
    pub tokens_used: u64,
    pub tool_calls: u32,
    pub retry_count: u32,
    pub sub_session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Async tool task (spec §3 "Async tool task")
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl AsyncTaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AsyncTaskStatus::Completed | AsyncTaskStatus::Failed | AsyncTaskStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncTaskKind {
    Polling,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncToolTask {
    pub id: AsyncTaskId,
    pub tool_name: String,
    pub parameters: Value,
    pub session_id: SessionId,
    pub step_id: StepId,
    pub external_task_id: Option<String>,
    pub status: AsyncTaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub kind: AsyncTaskKind,
    pub estimated_duration_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Tool descriptor (spec §3 "Tool descriptor")
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptorMeta {
    pub name: String,
    pub description: String,
    pub version: String,
    pub category: String,
    pub risk_level: RiskLevel,
    pub timeout_secs: u64,
    pub requires_confirmation: bool,
    pub is_async: bool,
    pub estimated_time_secs: Option<u64>,
    pub parameter_schema: Value,
}

/// Standard result shape a tool handler produces (spec §6 "Tool handler contract").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub can_retry: Option<bool>,
    pub suggestion: Option<String>,
    pub task_id: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self { success: true, result: Some(result), ..Default::default() }
    }

    pub fn err(error: impl Into<String>, can_retry: bool) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            can_retry: Some(can_retry),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------
// Stop state (spec §3 "Stop state", §4.2)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSnapshot {
    pub session_id: SessionId,
    pub completed_steps: u64,
    pub last_step_id: Option<StepId>,
    pub partial_result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopStateView {
    pub snapshot: Option<StopSnapshot>,
    pub can_resume: bool,
}

// ---------------------------------------------------------------------
// Top-level task result (spec §4.10, §8 "Resume eligibility")
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Stopped,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub steps_executed: u32,
    pub final_result: Option<String>,
    pub error: Option<String>,
    /// `true` iff `status` in {stopped, timeout} AND `saveState` was set
    /// (spec §8 property 8).
    pub can_resume: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SessionId;

    #[test]
    fn child_session_depth_follows_parent() {
        let parent = Session::new_root(SessionId::new(), "u1", "goal", AgentKind::Autonomous);
        let child = Session::new_child(SessionId::new(), "u1", "subgoal", &parent, None);
        assert_eq!(child.depth, parent.depth + 1);
        assert_eq!(child.parent_session_id, Some(parent.id));
    }

    #[test]
    fn terminal_statuses_are_recognized() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
    }

    #[test]
    fn action_kind_name_matches_variant() {
        let action = Action::Finish {
            reasoning: "done".into(),
            final_result: "ok".into(),
            discardable_steps: vec![],
        };
        assert_eq!(action.kind_name(), "Finish");
    }
}
