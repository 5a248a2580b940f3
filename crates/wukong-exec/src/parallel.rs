//! Parallel tool executor (C6, spec §4.6).
//!
//! Fans out over the C4 tool executor with wait strategies `all`/`any`/
//! `majority` and per-tool retry with exponential backoff. Grounded in the
//! teacher's `ParallelToolExecutor` (`tool/parallel.rs`): a `tokio::spawn`
//! per call collected back into a `Vec`, generalized here to track record
//! state transitions and stop early once a wait strategy's condition is met
//! rather than always waiting for every spawned task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use wukong_core::tool::executor::ToolExecutor;
use wukong_core::tool::registry::ToolRegistry;
use wukong_foundation::{
    events, Error, EventBus, ParallelCallStatus, ParallelToolCall, ParallelToolConfig, Result, SessionId, StepId,
    ToolCallContext, ToolInvocation, WaitStrategy,
};

/// Options for one parallel batch (spec §4.6 input). `max_retries` defaults
/// to the executor's configured value when `None`.
pub struct ParallelExecOptions {
    pub step_id: StepId,
    pub session_id: SessionId,
    pub wait_strategy: WaitStrategy,
    pub timeout: Duration,
    pub max_retries: Option<u32>,
}

/// The tally returned once the wait strategy's condition is met or the
/// overall timeout elapses (spec §4.6 `tools:parallel:ready`).
#[derive(Debug, Clone)]
pub struct ParallelBatchResult {
    pub calls: Vec<ParallelToolCall>,
    pub success_count: usize,
    pub total_count: usize,
    pub condition_met: bool,
}

pub struct ParallelToolExecutor {
    bus: Arc<EventBus>,
    tool_executor: Arc<ToolExecutor>,
    config: ParallelToolConfig,
    /// Live record state, shared with in-flight tasks so `cancel_step_tool_calls`
    /// can observe and mutate it (spec §5 "Cancellation").
    records: Arc<tokio::sync::RwLock<HashMap<(StepId, String), ParallelToolCall>>>,
}

impl ParallelToolExecutor {
    pub fn new(bus: Arc<EventBus>, tool_executor: Arc<ToolExecutor>, config: ParallelToolConfig) -> Self {
        Self { bus, tool_executor, config, records: Arc::new(tokio::sync::RwLock::new(HashMap::new())) }
    }

    pub async fn execute(
        &self,
        registry: Arc<ToolRegistry>,
        invocations: Vec<ToolInvocation>,
        context: ToolCallContext,
        opts: ParallelExecOptions,
    ) -> Result<ParallelBatchResult> {
        if invocations.is_empty() {
            return Err(Error::Validation("CallToolsParallel requires at least one tool".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for inv in &invocations {
            if !seen.insert(inv.tool_id.clone()) {
                return Err(Error::Validation(format!("duplicate toolId '{}'", inv.tool_id)));
            }
        }

        let total = invocations.len();
        let threshold = match opts.wait_strategy {
            WaitStrategy::All => total,
            WaitStrategy::Any => 1,
            WaitStrategy::Majority => total.div_ceil(2),
        };
        let max_retries = opts.max_retries.unwrap_or(self.config.max_retries);

        {
            let mut records = self.records.write().await;
            for inv in &invocations {
                let call = ParallelToolCall::new_pending(opts.step_id, inv, max_retries);
                records.insert((opts.step_id, inv.tool_id.clone()), call);
            }
        }
        self.bus.publish(events::tools_parallel::submitted(&opts.step_id.to_string(), total)).await;

        let (tx, mut rx) = mpsc::channel::<()>(total.max(1));
        for inv in invocations.iter().cloned() {
            let registry = Arc::clone(&registry);
            let executor = Arc::clone(&self.tool_executor);
            let bus = Arc::clone(&self.bus);
            let records = Arc::clone(&self.records);
            let context = context.clone();
            let tx = tx.clone();
            let step_id = opts.step_id;
            let config = self.config.clone();

            tokio::spawn(async move {
                run_one(step_id, inv, registry, executor, bus, records, context, max_retries, config).await;
                let _ = tx.send(()).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::Instant::now() + opts.timeout;
        loop {
            let snapshot: Vec<ParallelToolCall> = {
                let records = self.records.read().await;
                invocations.iter().map(|inv| records[&(opts.step_id, inv.tool_id.clone())].clone()).collect()
            };
            let success_count = snapshot.iter().filter(|c| c.status == ParallelCallStatus::Completed).count();
            let terminal_count = snapshot.iter().filter(|c| c.status.is_terminal()).count();

            let condition_met = success_count >= threshold;
            let exhausted = terminal_count == total;
            if condition_met || exhausted {
                let result = ParallelBatchResult {
                    condition_met,
                    success_count,
                    total_count: total,
                    calls: snapshot,
                };
                self.bus
                    .publish(events::tools_parallel::ready(
                        &opts.step_id.to_string(),
                        result.success_count,
                        result.total_count,
                        result.condition_met,
                    ))
                    .await;
                return Ok(result);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                self.force_timeout_remaining(opts.step_id, &invocations).await;
                let snapshot: Vec<ParallelToolCall> = {
                    let records = self.records.read().await;
                    invocations.iter().map(|inv| records[&(opts.step_id, inv.tool_id.clone())].clone()).collect()
                };
                let success_count = snapshot.iter().filter(|c| c.status == ParallelCallStatus::Completed).count();
                let result = ParallelBatchResult {
                    condition_met: success_count >= threshold,
                    success_count,
                    total_count: total,
                    calls: snapshot,
                };
                self.bus
                    .publish(events::tools_parallel::ready(
                        &opts.step_id.to_string(),
                        result.success_count,
                        result.total_count,
                        result.condition_met,
                    ))
                    .await;
                return Ok(result);
            }

            let _ = tokio::time::timeout(remaining.min(Duration::from_millis(50)), rx.recv()).await;
        }
    }

    async fn force_timeout_remaining(&self, step_id: StepId, invocations: &[ToolInvocation]) {
        let mut records = self.records.write().await;
        for inv in invocations {
            if let Some(call) = records.get_mut(&(step_id, inv.tool_id.clone())) {
                if !call.status.is_terminal() {
                    warn!(tool_id = %call.tool_id, "forcing timeout at end of parallel batch");
                    call.status = ParallelCallStatus::Timeout;
                }
            }
        }
    }

    /// Forces all pending/running children of `step_id` to `failed` with
    /// reason "cancelled" (spec §4.6, §5 "Cancellation").
    pub async fn cancel_step_tool_calls(&self, step_id: StepId) {
        let mut records = self.records.write().await;
        for ((sid, tool_id), call) in records.iter_mut() {
            if *sid == step_id && !call.status.is_terminal() {
                call.status = ParallelCallStatus::Failed;
                call.error = Some("cancelled".to_string());
                self.bus.publish(events::tool_parallel::cancelled(tool_id)).await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one(
    step_id: StepId,
    inv: ToolInvocation,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    bus: Arc<EventBus>,
    records: Arc<tokio::sync::RwLock<HashMap<(StepId, String), ParallelToolCall>>>,
    context: ToolCallContext,
    max_retries: u32,
    config: ParallelToolConfig,
) {
    {
        let mut records = records.write().await;
        if let Some(call) = records.get_mut(&(step_id, inv.tool_id.clone())) {
            call.status = ParallelCallStatus::Running;
        }
    }
    bus.publish(events::tool_parallel::started(&inv.tool_id, &inv.tool_name)).await;

    let mut retry_count = 0u32;
    loop {
        let outcome = executor.execute(&registry, &inv.tool_name, inv.parameters.clone(), &context).await;

        let (succeeded, result, error, can_retry) = match outcome {
            Ok(o) if o.success => (true, o.result, None, false),
            Ok(o) => (false, None, o.error, o.can_retry.unwrap_or(false)),
            Err(e) => (false, None, Some(e.to_string()), e.can_retry()),
        };

        if succeeded {
            let mut records = records.write().await;
            if let Some(call) = records.get_mut(&(step_id, inv.tool_id.clone())) {
                call.status = ParallelCallStatus::Completed;
                call.result = result;
                call.progress = 100;
            }
            bus.publish(events::tool_parallel::completed(&inv.tool_id)).await;
            return;
        }

        if can_retry && retry_count < max_retries {
            retry_count += 1;
            {
                let mut records = records.write().await;
                if let Some(call) = records.get_mut(&(step_id, inv.tool_id.clone())) {
                    call.retry_count = retry_count;
                }
            }
            tokio::time::sleep(config.backoff_delay(retry_count)).await;
            continue;
        }

        let mut records = records.write().await;
        if let Some(call) = records.get_mut(&(step_id, inv.tool_id.clone())) {
            call.status = ParallelCallStatus::Failed;
            call.error = error.clone();
        }
        info!(tool_id = %inv.tool_id, "parallel tool call failed, exhausted retries");
        bus.publish(events::tool_parallel::failed(&inv.tool_id, &error.unwrap_or_default())).await;
        return;
    }
}
