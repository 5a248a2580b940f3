//! Tool registry (C3, spec §4.3).
//!
//! Grounded in the teacher's `ToolRegistry` (`tool/registry.rs`): a plain
//! `HashMap<String, Arc<_>>` behind `register`/`get`/`list` accessors, kept
//! here and generalized to validate registration and project schemas for
//! prompting the way the spec requires.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::warn;

use super::ToolEntry;

/// Holds registered tool descriptors by name (spec §3 "Ownership": tool
/// descriptors are shared read-only after registration).
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolEntry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: RwLock::new(HashMap::new()) }
    }

    /// Registers `entry`, validating presence of name/description/version/
    /// category/risk level and that the schema declares an object with
    /// properties (spec §4.3). Duplicate registration overwrites with a
    /// warning rather than erroring.
    pub fn register(&self, entry: ToolEntry) -> Result<(), String> {
        if entry.name.trim().is_empty() {
            return Err("tool name must not be empty".to_string());
        }
        if entry.description.trim().is_empty() {
            return Err(format!("tool '{}' is missing a description", entry.name));
        }
        if entry.version.trim().is_empty() {
            return Err(format!("tool '{}' is missing a version", entry.name));
        }
        if entry.category.trim().is_empty() {
            return Err(format!("tool '{}' is missing a category", entry.name));
        }
        let schema = wukong_foundation::ObjectSchema::from_json(&entry.parameter_schema);
        if !schema.declares_object_with_properties() {
            return Err(format!(
                "tool '{}' schema must declare an object with properties",
                entry.name
            ));
        }

        let mut tools = self.tools.write();
        if tools.contains_key(&entry.name) {
            warn!(tool = %entry.name, "overwriting existing tool registration");
        }
        tools.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ToolEntry> {
        self.tools.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    pub fn by_category(&self, category: &str) -> Vec<ToolEntry> {
        self.tools
            .read()
            .values()
            .filter(|t| t.category == category)
            .cloned()
            .collect()
    }

    /// Schema-only projection for prompting: name + description + properties
    /// + required list (spec §4.3).
    pub fn schemas_for_prompt(&self) -> Vec<serde_json::Value> {
        self.tools.read().values().map(ToolEntry::schema_projection).collect()
    }

    pub fn requiring_confirmation(&self) -> Vec<ToolEntry> {
        self.tools.read().values().filter(|t| t.requires_confirmation).cloned().collect()
    }

    pub fn async_tools(&self) -> Vec<ToolEntry> {
        self.tools.read().values().filter(|t| t.is_async()).cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use wukong_foundation::{RiskLevel, ToolCallContext, ToolHandler, ToolOutcome};

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, params: serde_json::Value, _ctx: &ToolCallContext) -> ToolOutcome {
            ToolOutcome::ok(params)
        }
    }

    fn sample_entry(name: &str) -> ToolEntry {
        ToolEntry {
            name: name.to_string(),
            description: "echoes input".to_string(),
            version: "1.0.0".to_string(),
            category: "test".to_string(),
            risk_level: RiskLevel::Low,
            timeout_secs: 5,
            requires_confirmation: false,
            estimated_time_secs: None,
            parameter_schema: json!({
                "type": "object",
                "properties": {"value": {"type": "string"}},
                "required": ["value"]
            }),
            handler: Arc::new(Echo),
            async_handler: None,
        }
    }

    #[test]
    fn register_and_get_round_trips() {
        let registry = ToolRegistry::new();
        registry.register(sample_entry("echo")).unwrap();
        assert!(registry.has("echo"));
        assert_eq!(registry.get("echo").unwrap().name, "echo");
    }

    #[test]
    fn rejects_schema_without_properties() {
        let registry = ToolRegistry::new();
        let mut entry = sample_entry("bad");
        entry.parameter_schema = json!({"type": "object"});
        assert!(registry.register(entry).is_err());
    }

    #[test]
    fn duplicate_registration_overwrites() {
        let registry = ToolRegistry::new();
        registry.register(sample_entry("echo")).unwrap();
        registry.register(sample_entry("echo")).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn schemas_for_prompt_include_required_list() {
        let registry = ToolRegistry::new();
        registry.register(sample_entry("echo")).unwrap();
        let schemas = registry.schemas_for_prompt();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["required"], json!(["value"]));
    }
}
