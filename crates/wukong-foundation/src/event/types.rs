//! Event taxonomy (spec §6 "Event taxonomy").
//!
//! Every component publishes typed events carrying a discriminant tag
//! (e.g. `session:created`, `step:started`). Consumers subscribe by tag or
//! by the coarser `EventCategory`. A thin transport layer (out of scope)
//! would translate these into SSE/WebSocket frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse grouping of event tags, used for listener filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Session,
    Plan,
    Todo,
    Step,
    Tool,
    ToolAsync,
    ToolsParallel,
    ToolParallel,
    Llm,
    Progress,
    Task,
    Subagent,
    Knowledge,
}

/// A single event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WukongEvent {
    pub id: uuid::Uuid,
    /// Discriminant tag, e.g. "step:started".
    pub tag: String,
    pub category: EventCategory,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub data: Value,
}

impl WukongEvent {
    pub fn new(tag: impl Into<String>, category: EventCategory) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            tag: tag.into(),
            category,
            timestamp: Utc::now(),
            session_id: None,
            data: Value::Null,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Pre-built constructors for the tags named in spec §6, grouped by
/// component. Keeps call sites (`bus.publish(events::step::started(..))`)
/// free of ad hoc `WukongEvent::new` string literals scattered everywhere.
pub mod events {
    use super::*;

    pub mod session {
        use super::*;
        pub fn created(session_id: &str) -> WukongEvent {
            WukongEvent::new("session:created", EventCategory::Session).with_session(session_id)
        }
        pub fn updated(session_id: &str, status: &str) -> WukongEvent {
            WukongEvent::new("session:updated", EventCategory::Session)
                .with_session(session_id)
                .with_data(serde_json::json!({"status": status}))
        }
        pub fn deleted(session_id: &str) -> WukongEvent {
            WukongEvent::new("session:deleted", EventCategory::Session).with_session(session_id)
        }
        pub fn resumed(session_id: &str) -> WukongEvent {
            WukongEvent::new("session:resumed", EventCategory::Session).with_session(session_id)
        }
    }

    pub mod step {
        use super::*;
        pub fn started(session_id: &str, step_number: u64) -> WukongEvent {
            WukongEvent::new("step:started", EventCategory::Step)
                .with_session(session_id)
                .with_data(serde_json::json!({"stepNumber": step_number}))
        }
        pub fn completed(session_id: &str, step_number: u64) -> WukongEvent {
            WukongEvent::new("step:completed", EventCategory::Step)
                .with_session(session_id)
                .with_data(serde_json::json!({"stepNumber": step_number}))
        }
        pub fn failed(session_id: &str, step_number: u64, error: &str) -> WukongEvent {
            WukongEvent::new("step:failed", EventCategory::Step)
                .with_session(session_id)
                .with_data(serde_json::json!({"stepNumber": step_number, "error": error}))
        }
        pub fn discarded(session_id: &str, step_ids: &[u64]) -> WukongEvent {
            WukongEvent::new("steps:discarded", EventCategory::Step)
                .with_session(session_id)
                .with_data(serde_json::json!({"stepIds": step_ids}))
        }
    }

    pub mod plan {
        use super::*;
        pub fn generated(session_id: &str, plan: &Value) -> WukongEvent {
            WukongEvent::new("plan:generated", EventCategory::Plan)
                .with_session(session_id)
                .with_data(plan.clone())
        }
        pub fn updated(session_id: &str, plan: &Value) -> WukongEvent {
            WukongEvent::new("plan:updated", EventCategory::Plan)
                .with_session(session_id)
                .with_data(plan.clone())
        }
        pub fn ready(session_id: &str, plan: &Value) -> WukongEvent {
            WukongEvent::new("plan:ready", EventCategory::Plan)
                .with_session(session_id)
                .with_data(plan.clone())
        }
    }

    pub mod tool {
        use super::*;
        pub fn executing(session_id: &str, tool_name: &str) -> WukongEvent {
            WukongEvent::new("tool:executing", EventCategory::Tool)
                .with_session(session_id)
                .with_data(serde_json::json!({"tool": tool_name}))
        }
        pub fn requires_confirmation(session_id: &str, tool_name: &str) -> WukongEvent {
            WukongEvent::new("tool:requiresConfirmation", EventCategory::Tool)
                .with_session(session_id)
                .with_data(serde_json::json!({"tool": tool_name}))
        }
        pub fn completed(session_id: &str, tool_name: &str) -> WukongEvent {
            WukongEvent::new("tool:completed", EventCategory::Tool)
                .with_session(session_id)
                .with_data(serde_json::json!({"tool": tool_name}))
        }
        pub fn failed(session_id: &str, tool_name: &str, error: &str) -> WukongEvent {
            WukongEvent::new("tool:failed", EventCategory::Tool)
                .with_session(session_id)
                .with_data(serde_json::json!({"tool": tool_name, "error": error}))
        }
    }

    pub mod tool_async {
        use super::*;
        fn evt(tag: &str, task_id: &str) -> WukongEvent {
            WukongEvent::new(tag.to_string(), EventCategory::ToolAsync)
                .with_data(serde_json::json!({"taskId": task_id}))
        }
        pub fn submitted(task_id: &str) -> WukongEvent {
            evt("tool:async:submitted", task_id)
        }
        pub fn running(task_id: &str) -> WukongEvent {
            evt("tool:async:running", task_id)
        }
        pub fn progress(task_id: &str) -> WukongEvent {
            evt("tool:async:progress", task_id)
        }
        pub fn completed(task_id: &str) -> WukongEvent {
            evt("tool:async:completed", task_id)
        }
        pub fn error(task_id: &str, message: &str) -> WukongEvent {
            WukongEvent::new("tool:async:error", EventCategory::ToolAsync)
                .with_data(serde_json::json!({"taskId": task_id, "error": message}))
        }
        pub fn cancelled(task_id: &str) -> WukongEvent {
            evt("tool:async:cancelled", task_id)
        }
    }

    pub mod tools_parallel {
        use super::*;
        pub fn submitted(step_id: &str, count: usize) -> WukongEvent {
            WukongEvent::new("tools:parallel:submitted", EventCategory::ToolsParallel)
                .with_data(serde_json::json!({"stepId": step_id, "count": count}))
        }
        pub fn ready(
            step_id: &str,
            success_count: usize,
            total_count: usize,
            condition_met: bool,
        ) -> WukongEvent {
            WukongEvent::new("tools:parallel:ready", EventCategory::ToolsParallel).with_data(
                serde_json::json!({
                    "stepId": step_id,
                    "successCount": success_count,
                    "totalCount": total_count,
                    "conditionMet": condition_met,
                }),
            )
        }
    }

    pub mod tool_parallel {
        use super::*;
        pub fn started(tool_id: &str, tool_name: &str) -> WukongEvent {
            WukongEvent::new("tool:parallel:started", EventCategory::ToolParallel)
                .with_data(serde_json::json!({"toolId": tool_id, "tool": tool_name}))
        }
        pub fn completed(tool_id: &str) -> WukongEvent {
            WukongEvent::new("tool:parallel:completed", EventCategory::ToolParallel)
                .with_data(serde_json::json!({"toolId": tool_id}))
        }
        pub fn failed(tool_id: &str, error: &str) -> WukongEvent {
            WukongEvent::new("tool:parallel:failed", EventCategory::ToolParallel)
                .with_data(serde_json::json!({"toolId": tool_id, "error": error}))
        }
        pub fn cancelled(tool_id: &str) -> WukongEvent {
            WukongEvent::new("tool:parallel:cancelled", EventCategory::ToolParallel)
                .with_data(serde_json::json!({"toolId": tool_id}))
        }
    }

    pub mod llm {
        use super::*;
        pub fn started(session_id: &str) -> WukongEvent {
            WukongEvent::new("llm:started", EventCategory::Llm).with_session(session_id)
        }
        pub fn streaming(session_id: &str, chunk: &str) -> WukongEvent {
            WukongEvent::new("llm:streaming", EventCategory::Llm)
                .with_session(session_id)
                .with_data(serde_json::json!({"chunk": chunk}))
        }
        pub fn complete(session_id: &str) -> WukongEvent {
            WukongEvent::new("llm:complete", EventCategory::Llm).with_session(session_id)
        }
        pub fn error(session_id: &str, message: &str) -> WukongEvent {
            WukongEvent::new("llm:error", EventCategory::Llm)
                .with_session(session_id)
                .with_data(serde_json::json!({"error": message}))
        }
    }

    pub mod progress {
        use super::*;
        pub fn updated(session_id: &str, current_step: u32) -> WukongEvent {
            WukongEvent::new("progress:updated", EventCategory::Progress)
                .with_session(session_id)
                .with_data(serde_json::json!({"currentStep": current_step}))
        }
    }

    pub mod task {
        use super::*;
        fn evt(tag: &str, session_id: &str) -> WukongEvent {
            WukongEvent::new(tag.to_string(), EventCategory::Task).with_session(session_id)
        }
        pub fn started(session_id: &str) -> WukongEvent {
            evt("task:started", session_id)
        }
        pub fn stopping(session_id: &str) -> WukongEvent {
            evt("task:stopping", session_id)
        }
        pub fn stopped(session_id: &str) -> WukongEvent {
            evt("task:stopped", session_id)
        }
        pub fn completed(session_id: &str) -> WukongEvent {
            evt("task:completed", session_id)
        }
        pub fn failed(session_id: &str, error: &str) -> WukongEvent {
            WukongEvent::new("task:failed", EventCategory::Task)
                .with_session(session_id)
                .with_data(serde_json::json!({"error": error}))
        }
        pub fn timeout(session_id: &str) -> WukongEvent {
            evt("task:timeout", session_id)
        }
        pub fn max_steps_reached(session_id: &str) -> WukongEvent {
            evt("task:maxStepsReached", session_id)
        }
    }

    pub mod subagent {
        use super::*;
        pub fn started(task_id: &str) -> WukongEvent {
            WukongEvent::new("subagent:started", EventCategory::Subagent)
                .with_data(serde_json::json!({"taskId": task_id}))
        }
        pub fn progress(task_id: &str) -> WukongEvent {
            WukongEvent::new("subagent:progress", EventCategory::Subagent)
                .with_data(serde_json::json!({"taskId": task_id}))
        }
        pub fn completed(task_id: &str) -> WukongEvent {
            WukongEvent::new("subagent:completed", EventCategory::Subagent)
                .with_data(serde_json::json!({"taskId": task_id}))
        }
        pub fn failed(task_id: &str, error: &str) -> WukongEvent {
            WukongEvent::new("subagent:failed", EventCategory::Subagent)
                .with_data(serde_json::json!({"taskId": task_id, "error": error}))
        }
    }

    pub mod knowledge {
        use super::*;
        pub fn searching(session_id: &str) -> WukongEvent {
            WukongEvent::new("knowledge:searching", EventCategory::Knowledge)
                .with_session(session_id)
        }
        pub fn found(session_id: &str, count: usize) -> WukongEvent {
            WukongEvent::new("knowledge:found", EventCategory::Knowledge)
                .with_session(session_id)
                .with_data(serde_json::json!({"count": count}))
        }
        pub fn error(session_id: &str, message: &str) -> WukongEvent {
            WukongEvent::new("knowledge:error", EventCategory::Knowledge)
                .with_session(session_id)
                .with_data(serde_json::json!({"error": message}))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::events;

    #[test]
    fn tags_match_spec_taxonomy() {
        assert_eq!(events::session::created("s1").tag, "session:created");
        assert_eq!(events::step::discarded("s1", &[1, 2]).tag, "steps:discarded");
        assert_eq!(
            events::tools_parallel::ready("s1", 2, 3, true).tag,
            "tools:parallel:ready"
        );
        assert_eq!(events::task::max_steps_reached("s1").tag, "task:maxStepsReached");
    }
}
