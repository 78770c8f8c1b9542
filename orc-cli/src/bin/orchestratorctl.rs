//! Thin `clap`-driven binary over `orc_cli::Orchestrator`, mirroring the
//! library-over-binary idiom of `core/src/bin/kernel.rs` and
//! `core/src/bin/host_control.rs` in the teacher repo: the binary wires up
//! storage and configuration and calls straight into the facade, it is not
//! itself the product surface (spec §6, §9 "Configuration").
//!
//! Concrete agent implementations (browser drivers, HTTP clients, ...) are
//! explicitly out of this spec's scope (spec §1); this binary registers
//! none, so `trigger`/`get` are useful for administering workflows whose
//! agents were registered by an embedding application, not for running
//! them standalone end-to-end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orc_agents::AgentRegistry;
use orc_cli::Orchestrator;
use orc_model::{OrchestratorConfig, Workflow};
use orc_scheduler::Scheduler;
use orc_store::{ExecutionStore, SledStore};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orchestratorctl", about = "Workflow orchestration control CLI", version)]
struct Cli {
    /// Durable store directory (spec §4.7, `ExecutionStore`).
    #[arg(long, env = "ORC_STORE_PATH", default_value = "./orc-data")]
    store_path: PathBuf,

    #[arg(long, env = "ORC_CONCURRENCY_CAP", default_value_t = OrchestratorConfig::default().concurrency_cap)]
    concurrency_cap: usize,

    #[arg(long, env = "ORC_DEFAULT_TASK_TIMEOUT_MS", default_value_t = OrchestratorConfig::default().default_task_timeout_ms)]
    default_task_timeout_ms: u64,

    #[arg(long, env = "ORC_WORKFLOW_TIMEOUT_MS", default_value_t = OrchestratorConfig::default().workflow_timeout_ms)]
    workflow_timeout_ms: u64,

    #[arg(long, env = "ORC_SCHEDULER_TICK_MS", default_value_t = OrchestratorConfig::default().scheduler_tick_ms)]
    scheduler_tick_ms: u64,

    #[arg(long, env = "ORC_BREAKER_FAILURE_THRESHOLD", default_value_t = OrchestratorConfig::default().breaker_failure_threshold)]
    breaker_failure_threshold: u32,

    #[arg(long, env = "ORC_BREAKER_OPEN_MS", default_value_t = OrchestratorConfig::default().breaker_open_ms)]
    breaker_open_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// SubmitWorkflow(spec) -> workflowId
    Submit {
        /// Path to a JSON-encoded `Workflow`.
        spec_path: PathBuf,
    },
    /// TriggerExecution(workflowId, input) -> executionId
    Trigger {
        workflow_id: String,
        /// JSON-encoded input object, defaults to `null`.
        #[arg(long)]
        input: Option<String>,
    },
    /// GetExecution(executionId) -> Execution + TaskStates
    Get { execution_id: String },
    /// CancelExecution(executionId)
    Cancel { execution_id: String },
    /// ListAgents() -> [AgentDescriptor]
    ListAgents,
    /// ScheduleUpsert(workflowId, cronExpr, tz, enabled)
    Schedule {
        workflow_id: String,
        cron_expr: String,
        timezone: String,
        #[arg(long)]
        disabled: bool,
    },
    /// Runs the single-leader scheduler tick loop until Ctrl-C (spec §4.8).
    RunScheduler,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = OrchestratorConfig {
        concurrency_cap: cli.concurrency_cap,
        default_task_timeout_ms: cli.default_task_timeout_ms,
        workflow_timeout_ms: cli.workflow_timeout_ms,
        scheduler_tick_ms: cli.scheduler_tick_ms,
        breaker_failure_threshold: cli.breaker_failure_threshold,
        breaker_open_ms: cli.breaker_open_ms,
    };

    let store: Arc<dyn ExecutionStore> =
        Arc::new(SledStore::open(&cli.store_path).context("opening execution store")?);
    let agents = Arc::new(AgentRegistry::new());
    let orchestrator = Orchestrator::new(store.clone(), agents, config.clone());

    match cli.command {
        Command::Submit { spec_path } => {
            let raw = std::fs::read_to_string(&spec_path)
                .with_context(|| format!("reading {}", spec_path.display()))?;
            let workflow: Workflow = serde_json::from_str(&raw).context("parsing workflow spec")?;
            let workflow_id = orchestrator.submit_workflow(workflow).await?;
            println!("{workflow_id}");
        }
        Command::Trigger { workflow_id, input } => {
            let input: Value = match input {
                Some(raw) => serde_json::from_str(&raw).context("parsing --input as JSON")?,
                None => Value::Null,
            };
            let execution_id = orchestrator.trigger_execution(&workflow_id, input).await?;
            println!("{execution_id}");
        }
        Command::Get { execution_id } => {
            let execution = orchestrator.get_execution(&execution_id).await?;
            println!("{}", serde_json::to_string_pretty(&execution)?);
        }
        Command::Cancel { execution_id } => {
            orchestrator.cancel_execution(&execution_id).await?;
            println!("cancelled {execution_id}");
        }
        Command::ListAgents => {
            let agents = orchestrator.list_agents();
            println!("{}", serde_json::to_string_pretty(&agents)?);
        }
        Command::Schedule {
            workflow_id,
            cron_expr,
            timezone,
            disabled,
        } => {
            let entry = orchestrator
                .schedule_upsert(&workflow_id, &cron_expr, &timezone, !disabled)
                .await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Command::RunScheduler => {
            let owner_id = uuid::Uuid::new_v4().to_string();
            let scheduler = Scheduler::new(
                store,
                orchestrator,
                owner_id,
                Duration::from_millis(config.scheduler_tick_ms),
                Duration::from_millis((config.scheduler_tick_ms * 30).max(10_000)),
            );
            let cancel = CancellationToken::new();
            let ctrl_c_token = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                ctrl_c_token.cancel();
            });
            scheduler.run(cancel).await;
        }
    }

    Ok(())
}
