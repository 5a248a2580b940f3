//! Tool registry (C3) and tool executor (C4).

pub mod executor;
pub mod registry;

use serde_json::Value;
use std::sync::Arc;
use wukong_foundation::{AsyncToolHandler, RiskLevel, ToolHandler};

/// An immutable tool registration: metadata plus the live handler (spec §3
/// "Tool descriptor"). `async_handler` is populated only for tools whose
/// descriptor declares `async: true` (spec §4.5's submit/poll/webhook triple).
#[derive(Clone)]
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub version: String,
    pub category: String,
    pub risk_level: RiskLevel,
    pub timeout_secs: u64,
    pub requires_confirmation: bool,
    pub estimated_time_secs: Option<u64>,
    pub parameter_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
    pub async_handler: Option<Arc<dyn AsyncToolHandler>>,
}

impl ToolEntry {
    pub fn is_async(&self) -> bool {
        self.async_handler.is_some()
    }

    pub fn schema_projection(&self) -> Value {
        let properties = self
            .parameter_schema
            .get("properties")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let required = self
            .parameter_schema
            .get("required")
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "properties": properties,
            "required": required,
        })
    }
}
