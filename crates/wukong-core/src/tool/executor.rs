//! Tool executor (C4, spec §4.4).
//!
//! One-shot synchronous execution: validate -> invoke with timeout ->
//! sanitize errors -> classify retryability -> produce summary.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use wukong_foundation::{sanitize, ObjectSchema, ToolCallContext, ToolOutcome};

use super::registry::ToolRegistry;

/// Errors the executor itself raises before a handler even runs, or on
/// timeout (spec §4.4 steps 1-3). Handler-thrown errors are captured inside
/// `ToolOutcome` instead, not as a Rust `Err`, since the spec treats
/// "tool logic failure" as data, not an exception (spec §7).
#[derive(Debug, Error, Clone)]
pub enum ToolExecutionError {
    #[error("tool not found: {name}. available tools: {available}")]
    NotFound { name: String, available: String },

    #[error("parameter validation failed: {message}. schema: {schema}")]
    Validation { message: String, schema: Value },

    #[error("tool '{name}' timed out after {timeout_secs}s; consider increasing the timeout")]
    Timeout { name: String, timeout_secs: u64 },
}

impl ToolExecutionError {
    /// Validation and timeout failures are always retryable at the decision
    /// level (spec §4.4 steps 2-3).
    pub fn can_retry(&self) -> bool {
        !matches!(self, ToolExecutionError::NotFound { .. })
    }
}

/// Configuration knobs mirrored from `wukong_foundation::ToolExecConfig`,
/// plus the "executor mode" toggle from spec §4.4 step 5.
#[derive(Debug, Clone)]
pub struct ToolExecutorConfig {
    pub max_error_len: usize,
    pub max_summary_len: usize,
    pub executor_mode: bool,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        let cfg = wukong_foundation::ToolExecConfig::default();
        Self {
            max_error_len: cfg.max_error_len,
            max_summary_len: cfg.max_summary_len,
            executor_mode: true,
        }
    }
}

/// The C4 tool executor. Caches parsed `ObjectSchema`s by tool name so
/// repeated calls to the same tool don't re-parse its JSON Schema every time
/// (spec §4.4 step 6).
pub struct ToolExecutor {
    config: ToolExecutorConfig,
    validator_cache: RwLock<HashMap<String, ObjectSchema>>,
}

impl ToolExecutor {
    pub fn new(config: ToolExecutorConfig) -> Self {
        Self { config, validator_cache: RwLock::new(HashMap::new()) }
    }

    pub fn clear_validator_cache(&self) {
        self.validator_cache.write().clear();
    }

    fn validator_for(&self, registry_schema: &Value, tool_name: &str) -> ObjectSchema {
        if let Some(schema) = self.validator_cache.read().get(tool_name) {
            return schema.clone();
        }
        let schema = ObjectSchema::from_json(registry_schema);
        self.validator_cache.write().insert(tool_name.to_string(), schema.clone());
        schema
    }

    /// Execute `tool_name` with `parameters` under `context` (spec §4.4).
    pub async fn execute(
        &self,
        registry: &ToolRegistry,
        tool_name: &str,
        parameters: Value,
        context: &ToolCallContext,
    ) -> Result<ToolOutcome, ToolExecutionError> {
        let entry = registry.get(tool_name).ok_or_else(|| ToolExecutionError::NotFound {
            name: tool_name.to_string(),
            available: registry.names().join(", "),
        })?;

        let validator = self.validator_for(&entry.parameter_schema, tool_name);
        let validated = validator.validate_and_coerce(&parameters).map_err(|e| {
            ToolExecutionError::Validation { message: e.to_string(), schema: entry.parameter_schema.clone() }
        })?;

        debug!(tool = tool_name, "invoking tool handler");
        let deadline = Duration::from_secs(entry.timeout_secs);
        let invocation = entry.handler.call(validated.clone(), context);

        let outcome = match tokio::time::timeout(deadline, invocation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(ToolExecutionError::Timeout {
                    name: tool_name.to_string(),
                    timeout_secs: entry.timeout_secs,
                })
            }
        };

        let outcome = if outcome.success {
            outcome
        } else {
            self.sanitize_failure(&entry, outcome, &validated, context).await
        };

        if outcome.success && self.config.executor_mode {
            Ok(self.with_summary(outcome))
        } else {
            Ok(outcome)
        }
    }

    /// Route a failed outcome through the tool's own error handler if it has
    /// one; otherwise sanitize the message and classify retryability
    /// (spec §4.4 step 4).
    async fn sanitize_failure(
        &self,
        entry: &super::ToolEntry,
        outcome: ToolOutcome,
        params: &Value,
        context: &ToolCallContext,
    ) -> ToolOutcome {
        let raw_error = outcome.error.clone().unwrap_or_default();

        if let Some(recovered) = entry.handler.on_error(&raw_error, params, context).await {
            return recovered;
        }

        let sanitized = sanitize(&raw_error, self.config.max_error_len);
        let can_retry = outcome.can_retry.unwrap_or_else(|| wukong_foundation::classify_retryable_message(&raw_error));
        if can_retry {
            warn!(tool = %entry.name, error = %sanitized, "tool call failed, retryable");
        }
        ToolOutcome {
            success: false,
            result: None,
            summary: None,
            error: Some(sanitized),
            can_retry: Some(can_retry),
            suggestion: outcome.suggestion,
            task_id: outcome.task_id,
        }
    }

    /// Synthesize a one-line summary for a successful result: first three
    /// array items, first five object keys, truncated (spec §4.4 step 5).
    fn with_summary(&self, mut outcome: ToolOutcome) -> ToolOutcome {
        if outcome.summary.is_some() {
            return outcome;
        }
        let Some(result) = &outcome.result else { return outcome };
        let raw = match result {
            Value::Array(items) => {
                let preview: Vec<String> = items.iter().take(3).map(|v| v.to_string()).collect();
                format!("[{}{}]", preview.join(", "), if items.len() > 3 { ", ..." } else { "" })
            }
            Value::Object(map) => {
                let keys: Vec<&str> = map.keys().take(5).map(String::as_str).collect();
                format!("{{{}{}}}", keys.join(", "), if map.len() > 5 { ", ..." } else { "" })
            }
            other => other.to_string(),
        };
        let truncated = if raw.len() > self.config.max_summary_len {
            format!("{}...", &raw[..self.config.max_summary_len.min(raw.len())])
        } else {
            raw
        };
        outcome.summary = Some(truncated);
        outcome
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new(ToolExecutorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolEntry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use wukong_foundation::{RiskLevel, ToolHandler};

    struct Echo;
    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, params: Value, _ctx: &ToolCallContext) -> ToolOutcome {
            ToolOutcome::ok(params)
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl ToolHandler for AlwaysFails {
        async fn call(&self, _params: Value, _ctx: &ToolCallContext) -> ToolOutcome {
            ToolOutcome::err("upstream returned 503, Bearer abc123xyz leaked", true)
        }
    }

    struct Hangs;
    #[async_trait]
    impl ToolHandler for Hangs {
        async fn call(&self, _params: Value, _ctx: &ToolCallContext) -> ToolOutcome {
            tokio::time::sleep(Duration::from_secs(10)).await;
            ToolOutcome::ok(json!({}))
        }
    }

    fn entry(name: &str, handler: Arc<dyn ToolHandler>, timeout_secs: u64) -> ToolEntry {
        ToolEntry {
            name: name.to_string(),
            description: "test tool".to_string(),
            version: "1.0.0".to_string(),
            category: "test".to_string(),
            risk_level: RiskLevel::Low,
            timeout_secs,
            requires_confirmation: false,
            estimated_time_secs: None,
            parameter_schema: json!({
                "type": "object",
                "properties": {"input": {"type": "string"}},
                "required": ["input"]
            }),
            handler,
            async_handler: None,
        }
    }

    #[tokio::test]
    async fn unknown_tool_lists_available_names_in_hint() {
        let registry = ToolRegistry::new();
        registry.register(entry("echo", Arc::new(Echo), 5)).unwrap();
        let executor = ToolExecutor::default();

        let err = executor
            .execute(&registry, "missing", json!({}), &ToolCallContext::default())
            .await
            .unwrap_err();
        match err {
            ToolExecutionError::NotFound { available, .. } => assert!(available.contains("echo")),
            _ => panic!("expected NotFound"),
        }
    }

    #[tokio::test]
    async fn validation_failure_is_retryable_and_carries_schema() {
        let registry = ToolRegistry::new();
        registry.register(entry("echo", Arc::new(Echo), 5)).unwrap();
        let executor = ToolExecutor::default();

        let err = executor
            .execute(&registry, "echo", json!({}), &ToolCallContext::default())
            .await
            .unwrap_err();
        assert!(err.can_retry());
        match err {
            ToolExecutionError::Validation { schema, .. } => assert!(schema.get("properties").is_some()),
            _ => panic!("expected Validation"),
        }
    }

    #[tokio::test]
    async fn timeout_is_retryable() {
        let registry = ToolRegistry::new();
        registry.register(entry("hangs", Arc::new(Hangs), 0)).unwrap();
        let executor = ToolExecutor::default();

        let err = executor
            .execute(&registry, "hangs", json!({"input": "x"}), &ToolCallContext::default())
            .await
            .unwrap_err();
        assert!(err.can_retry());
        assert!(matches!(err, ToolExecutionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn thrown_errors_are_sanitized() {
        let registry = ToolRegistry::new();
        registry.register(entry("fails", Arc::new(AlwaysFails), 5)).unwrap();
        let executor = ToolExecutor::default();

        let outcome = executor
            .execute(&registry, "fails", json!({"input": "x"}), &ToolCallContext::default())
            .await
            .unwrap();
        assert!(!outcome.success);
        let msg = outcome.error.unwrap();
        assert!(!msg.contains("Bearer abc123xyz"));
        assert_eq!(outcome.can_retry, Some(true));
    }

    #[tokio::test]
    async fn successful_result_gets_a_summary_in_executor_mode() {
        let registry = ToolRegistry::new();
        registry.register(entry("echo", Arc::new(Echo), 5)).unwrap();
        let executor = ToolExecutor::default();

        let outcome = executor
            .execute(&registry, "echo", json!({"input": "hello"}), &ToolCallContext::default())
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.summary.is_some());
    }

    #[tokio::test]
    async fn validator_cache_can_be_cleared() {
        let registry = ToolRegistry::new();
        registry.register(entry("echo", Arc::new(Echo), 5)).unwrap();
        let executor = ToolExecutor::default();
        executor
            .execute(&registry, "echo", json!({"input": "hello"}), &ToolCallContext::default())
            .await
            .unwrap();
        assert_eq!(executor.validator_cache.read().len(), 1);
        executor.clear_validator_cache();
        assert!(executor.validator_cache.read().is_empty());
    }
}
