use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use orc_agents::AgentRegistry;
use orc_model::{AgentDescriptorInfo, Execution, OrchestratorConfig, ScheduleEntry, Workflow};
use orc_planner::build_plan;
use orc_policy::CircuitBreaker;
use orc_runtime::WorkflowRuntime;
use orc_scheduler::{CronSchedule, EnqueueError, TriggerOrigin, TriggerSink};
use orc_store::ExecutionStore;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{FacadeError, Result};

/// Depth of the bounded submission queue fronting the runtime pool (spec
/// §5, "Backpressure"). Not part of `OrchestratorConfig`'s documented six
/// fields — an internal sizing choice, not a spec'd knob.
const SUBMISSION_QUEUE_CAPACITY: usize = 256;

struct PendingExecution {
    workflow: Workflow,
    plan: orc_planner::Plan,
    execution: Execution,
    cancel: CancellationToken,
}

/// Thin facade over the core implementing the Control API surface (spec
/// §6, C9). Not a transport — an HTTP/gRPC layer elsewhere in a real
/// deployment would call straight into these methods, the way
/// `core/src/bin/*.rs` binaries in the teacher wrap a library API without
/// being the product surface themselves.
pub struct Orchestrator {
    store: Arc<dyn ExecutionStore>,
    agents: Arc<AgentRegistry>,
    runtime: Arc<WorkflowRuntime>,
    config: OrchestratorConfig,
    cancels: DashMap<String, CancellationToken>,
    sender: mpsc::Sender<PendingExecution>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ExecutionStore>, agents: Arc<AgentRegistry>, config: OrchestratorConfig) -> Arc<Self> {
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_failure_threshold,
            Duration::from_millis(config.breaker_open_ms),
        ));
        let runtime = Arc::new(WorkflowRuntime::new(agents.clone(), breaker, store.clone()));
        let (sender, receiver) = mpsc::channel(SUBMISSION_QUEUE_CAPACITY);

        let orchestrator = Arc::new(Self {
            store,
            agents,
            runtime,
            config,
            cancels: DashMap::new(),
            sender,
        });
        orchestrator.clone().spawn_worker(receiver);
        orchestrator
    }

    /// Drains the submission queue, running each accepted execution as its
    /// own task so slow workflows never block others from starting (spec
    /// §5, "many runtimes may run in the same process").
    fn spawn_worker(self: Arc<Self>, mut receiver: mpsc::Receiver<PendingExecution>) {
        tokio::spawn(async move {
            while let Some(pending) = receiver.recv().await {
                let this = self.clone();
                tokio::spawn(async move {
                    let PendingExecution {
                        workflow,
                        plan,
                        mut execution,
                        cancel,
                    } = pending;
                    let execution_id = execution.id.clone();
                    if let Err(err) = this
                        .runtime
                        .run_execution(&workflow, &plan, &mut execution, cancel)
                        .await
                    {
                        warn!(execution_id = %execution_id, error = %err, "execution ended with a runtime error");
                    }
                    this.cancels.remove(&execution_id);
                });
            }
        });
    }

    /// `SubmitWorkflow(spec) → workflowId` (spec §6). Validates structure
    /// and plannability before ever persisting it, and assigns the next
    /// monotonic `version` if `id` already exists (spec §3, "immutable once
    /// referenced by an active execution... new edits produce a new
    /// version").
    #[instrument(skip(self, workflow))]
    pub async fn submit_workflow(&self, mut workflow: Workflow) -> Result<String> {
        workflow.validate_structure()?;
        build_plan(&workflow)?;

        let next_version = match self.store.latest_workflow(&workflow.id).await? {
            Some(existing) => existing.version + 1,
            None => workflow.version.max(1),
        };
        workflow.version = next_version;

        self.store.put_workflow(&workflow).await?;
        info!(workflow_id = %workflow.id, version = workflow.version, "workflow submitted");
        Ok(workflow.id)
    }

    /// `TriggerExecution(workflowId, input) → executionId` (spec §6).
    /// Always operates against the latest submitted version.
    #[instrument(skip(self, input))]
    pub async fn trigger_execution(&self, workflow_id: &str, input: Value) -> Result<String> {
        let workflow = self
            .store
            .latest_workflow(workflow_id)
            .await?
            .ok_or_else(|| FacadeError::WorkflowNotFound(workflow_id.to_string()))?;
        let plan = build_plan(&workflow)?;

        let execution_id = Uuid::new_v4().to_string();
        let mut execution = Execution::new(execution_id.clone(), workflow_id, workflow.version, input);
        execution.started_at = Some(Utc::now());
        self.store.put_execution(&execution).await?;

        let cancel = CancellationToken::new();
        self.cancels.insert(execution_id.clone(), cancel.clone());

        let pending = PendingExecution {
            workflow,
            plan,
            execution,
            cancel,
        };
        if self.sender.try_send(pending).is_err() {
            self.cancels.remove(&execution_id);
            return Err(FacadeError::Overloaded);
        }
        Ok(execution_id)
    }

    /// `GetExecution(executionId) → Execution + TaskStates` (spec §6).
    /// `TaskStates` already live inline on `Execution`, so this is one
    /// store read.
    pub async fn get_execution(&self, execution_id: &str) -> Result<Execution> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| FacadeError::ExecutionNotFound(execution_id.to_string()))
    }

    /// `CancelExecution(executionId) → void` (spec §6). A no-op for an
    /// execution that has already reached a terminal status — its cancel
    /// token was already dropped from the map by the worker.
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        if let Some((_, token)) = self.cancels.remove(execution_id) {
            token.cancel();
        }
        Ok(())
    }

    /// `ListAgents() → [AgentDescriptor]` (spec §6).
    pub fn list_agents(&self) -> Vec<AgentDescriptorInfo> {
        self.agents.list()
    }

    /// `ScheduleUpsert(workflowId, cronExpr, tz, enabled) → void` (spec
    /// §6). Writes straight through the store; the `Scheduler` tick loop
    /// (a separate process-wide task, see `orc-scheduler`) is the only
    /// thing that reads schedules back out, so this facade never needs to
    /// hold a live `Scheduler` handle.
    pub async fn schedule_upsert(
        &self,
        workflow_id: &str,
        cron_expr: &str,
        timezone: &str,
        enabled: bool,
    ) -> Result<ScheduleEntry> {
        let cron = CronSchedule::parse(cron_expr, timezone)?;
        let mut entry = ScheduleEntry::new(workflow_id, cron_expr, timezone);
        entry.enabled = enabled;
        entry.next_fire_at = cron.next_after(Utc::now());
        self.store.put_schedule(&entry).await?;
        Ok(entry)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

/// Lets `orc-scheduler::Scheduler` drive this facade directly as its
/// trigger sink (spec §6, "Trigger surface (consumed)": a single callback
/// `enqueue(workflowId, input, origin)`).
#[async_trait]
impl TriggerSink for Orchestrator {
    async fn enqueue(
        &self,
        workflow_id: &str,
        input: Value,
        origin: TriggerOrigin,
    ) -> std::result::Result<String, EnqueueError> {
        match origin {
            TriggerOrigin::Cron => info!(workflow_id, "cron trigger fired"),
            TriggerOrigin::Manual => info!(workflow_id, "manual trigger fired"),
            TriggerOrigin::Webhook => info!(workflow_id, "webhook trigger fired"),
        }
        self.trigger_execution(workflow_id, input)
            .await
            .map_err(|err| match err {
                FacadeError::Overloaded => EnqueueError::Overloaded,
                other => {
                    warn!(workflow_id, error = %other, "trigger rejected");
                    EnqueueError::Overloaded
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as at;
    use orc_agents::Agent;
    use orc_model::{ActionSpec, AgentOutcome, OnError, TaskSpec, Trigger, WorkflowConfig};
    use orc_store::SledStore;
    use serde_json::json;

    struct Echo;

    #[at]
    impl Agent for Echo {
        fn agent_type(&self) -> &str {
            "echo"
        }
        fn actions(&self) -> Vec<ActionSpec> {
            vec![ActionSpec {
                name: "say".to_string(),
                description: None,
                parameter_schema: Value::Null,
                return_schema: Value::Null,
            }]
        }
        fn is_idempotent(&self, _action: &str) -> bool {
            true
        }
        async fn execute(&self, _action: &str, params: Value) -> AgentOutcome {
            AgentOutcome::success(params)
        }
    }

    fn workflow(id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: "test".to_string(),
            version: 1,
            tasks: vec![TaskSpec {
                name: "a".to_string(),
                agent_type: "echo".to_string(),
                action: "say".to_string(),
                parameters: json!({"value": 1}),
                depends_on: Default::default(),
                retry: None,
                timeout_ms: Some(1_000),
                on_error: OnError::default(),
                condition: None,
            }],
            trigger: Trigger::Manual,
            config: WorkflowConfig::default(),
        }
    }

    async fn orchestrator() -> (Arc<Orchestrator>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ExecutionStore> = Arc::new(SledStore::open(dir.path()).unwrap());
        let agents = Arc::new(AgentRegistry::new());
        agents.register(Arc::new(Echo)).await.unwrap();
        (Orchestrator::new(store, agents, OrchestratorConfig::default()), dir)
    }

    #[tokio::test]
    async fn submit_then_trigger_runs_to_completion() {
        let (orchestrator, _dir) = orchestrator().await;
        let workflow_id = orchestrator.submit_workflow(workflow("wf-1")).await.unwrap();
        let execution_id = orchestrator
            .trigger_execution(&workflow_id, Value::Null)
            .await
            .unwrap();

        for _ in 0..50 {
            let execution = orchestrator.get_execution(&execution_id).await.unwrap();
            if execution.status.is_terminal() {
                assert_eq!(execution.status, orc_model::ExecutionStatus::Succeeded);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("execution did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn resubmitting_a_workflow_bumps_the_version() {
        let (orchestrator, _dir) = orchestrator().await;
        orchestrator.submit_workflow(workflow("wf-1")).await.unwrap();
        orchestrator.submit_workflow(workflow("wf-1")).await.unwrap();
        let execution_id = orchestrator
            .trigger_execution("wf-1", Value::Null)
            .await
            .unwrap();
        let execution = orchestrator.get_execution(&execution_id).await.unwrap();
        assert_eq!(execution.workflow_version, 2);
    }

    #[tokio::test]
    async fn trigger_unknown_workflow_is_rejected() {
        let (orchestrator, _dir) = orchestrator().await;
        let err = orchestrator
            .trigger_execution("missing", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn list_agents_reports_registered_agent() {
        let (orchestrator, _dir) = orchestrator().await;
        let agents = orchestrator.list_agents();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].agent_type, "echo");
    }

    #[tokio::test]
    async fn schedule_upsert_persists_and_seeds_next_fire() {
        let (orchestrator, _dir) = orchestrator().await;
        orchestrator.submit_workflow(workflow("wf-1")).await.unwrap();
        let entry = orchestrator
            .schedule_upsert("wf-1", "*/5 * * * *", "UTC", true)
            .await
            .unwrap();
        assert!(entry.enabled);
        assert!(entry.next_fire_at.is_some());
    }
}
