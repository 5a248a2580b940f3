//! Demo binary: wires in-memory adapters to every layer of the wukong
//! agent runtime and drives one session end to end.
//!
//! Not a product CLI — there is no real LLM, storage, or tool behind any of
//! this. It exists to prove the crates actually fit together: the event
//! bus (C1), tool registry/executor (C3/C4), step executor (C8), session
//! manager (C9), and agent loop (C10) are all exercised on a single run.

mod demo_adapters;
mod listener;

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wukong_agent::{AgentLoop, ConfirmationHandler, StepExecutor};
use wukong_core::{StopController, ToolEntry, ToolExecutor, ToolRegistry};
use wukong_foundation::{AgentKind, CoreConfig, EventBus, RiskLevel, Session, StorageAdapter};
use wukong_session::{AgentFactory, SessionManager};

use demo_adapters::{CurrentTimeTool, MemoryStorage, ScriptedDemoLlm};
use listener::ConsoleListener;

/// Run a single goal through the autonomous (or interactive) agent loop
/// using the bundled in-memory adapters.
#[derive(Parser, Debug)]
#[command(name = "wukong")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The goal to hand the agent.
    #[arg(default_value = "summarize the current time")]
    goal: String,

    /// User id the session is created under.
    #[arg(long, default_value = "demo-user")]
    user: String,

    /// Ask for confirmation before each tool call instead of running autonomously.
    #[arg(short, long)]
    interactive: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

/// Confirms every tool call from stdin in interactive mode.
struct StdinConfirmation;

#[async_trait]
impl ConfirmationHandler for StdinConfirmation {
    async fn confirm(&self, tool_call: &Value) -> bool {
        println!("About to run: {tool_call}\nProceed? [Y/n] ");
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return true;
        }
        !matches!(line.trim().to_lowercase().as_str(), "n" | "no")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = CoreConfig::default();

    let bus = Arc::new(EventBus::new());
    bus.subscribe(Arc::new(ConsoleListener)).await;

    let storage = Arc::new(MemoryStorage::default());
    let registry = Arc::new(ToolRegistry::new());
    registry.register(ToolEntry {
        name: "current_time".to_string(),
        description: "returns the current UTC time".to_string(),
        version: "1.0.0".to_string(),
        category: "utility".to_string(),
        risk_level: RiskLevel::Low,
        timeout_secs: 5,
        requires_confirmation: false,
        estimated_time_secs: Some(1),
        parameter_schema: json!({"type": "object", "properties": {}}),
        handler: Arc::new(CurrentTimeTool),
        async_handler: None,
    })
    .map_err(anyhow::Error::msg)?;

    let tool_executor = Arc::new(ToolExecutor::default());
    let step_executor = Arc::new(StepExecutor::new(
        storage.clone() as Arc<dyn StorageAdapter>,
        bus.clone(),
        registry.clone(),
        tool_executor,
    ));
    let llm = Arc::new(ScriptedDemoLlm::new());
    let agent_loop = Arc::new(AgentLoop::new(
        storage.clone() as Arc<dyn StorageAdapter>,
        bus.clone(),
        llm,
        registry,
        step_executor,
        config.agent_loop.clone(),
    ));

    let cache = Arc::new(demo_adapters::new_cache());
    let factory: AgentFactory<Arc<AgentLoop>> = {
        let agent_loop = agent_loop.clone();
        Arc::new(move |_info| agent_loop.clone())
    };
    let sessions = Arc::new(SessionManager::new(cache, bus.clone(), config.session.clone(), factory));
    let (session_id, _handle) = sessions.create(&args.user).await?;

    let agent_kind = if args.interactive { AgentKind::Interactive } else { AgentKind::Autonomous };
    let session = Session::new_root(session_id, &args.user, &args.goal, agent_kind);
    storage.create_session(session.clone()).await?;

    let stop = Arc::new(StopController::new());
    let result = if args.interactive {
        agent_loop.run_interactive(session, stop, Arc::new(StdinConfirmation)).await?
    } else {
        agent_loop.run_autonomous(session, stop).await?
    };

    println!("\nstatus: {:?}", result.status);
    println!("steps executed: {}", result.steps_executed);
    if let Some(final_result) = &result.final_result {
        println!("final result: {final_result}");
    }
    if let Some(error) = &result.error {
        println!("error: {error}");
    }

    sessions.destroy(session_id).await?;
    Ok(())
}
