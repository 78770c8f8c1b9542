use std::collections::HashMap;
use std::path::Path;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orc_model::{Execution, ScheduleEntry, SchedulerLease, TaskState, Workflow};
use sled::{Db, Tree};
use tracing::debug;

use crate::error::{Result, StoreError};

/// Durable persistence for everything a running orchestrator needs to
/// survive a restart: workflow templates, in-flight/completed executions,
/// their per-task states, cron schedules, and the leader lease that gates
/// the scheduler's tick loop. Every write here is a single atomic `Tree`
/// insert; recovery after a crash just means re-reading whatever was last
/// durably written, no replay log required.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn put_workflow(&self, workflow: &Workflow) -> Result<()>;
    async fn get_workflow(&self, id: &str, version: u64) -> Result<Option<Workflow>>;
    async fn latest_workflow(&self, id: &str) -> Result<Option<Workflow>>;

    async fn put_execution(&self, execution: &Execution) -> Result<()>;
    async fn get_execution(&self, id: &str) -> Result<Option<Execution>>;
    async fn list_executions_for_workflow(&self, workflow_id: &str) -> Result<Vec<Execution>>;

    async fn put_task_state(&self, execution_id: &str, state: &TaskState) -> Result<()>;
    async fn get_task_states(&self, execution_id: &str) -> Result<HashMap<String, TaskState>>;

    async fn put_schedule(&self, entry: &ScheduleEntry) -> Result<()>;
    async fn get_schedule(&self, workflow_id: &str) -> Result<Option<ScheduleEntry>>;
    async fn list_schedules(&self) -> Result<Vec<ScheduleEntry>>;

    /// Atomically records that `workflow_id` fired at `fire_at`, returning
    /// `true` the first time a given (workflow, slot) pair is recorded and
    /// `false` on every later call for the same pair (spec §4.8,
    /// `tryRecordFire` dedup guarantee — the only thing allowed to decide
    /// whether a cron slot has already fired).
    async fn try_record_fire(&self, workflow_id: &str, fire_at: DateTime<Utc>) -> Result<bool>;

    /// Acquires the named lease for `owner_id` if it is unheld or expired,
    /// returns `None` if another owner holds it and it hasn't expired
    /// (spec §4.8, single-leader scheduling).
    async fn acquire_lease(
        &self,
        name: &str,
        owner_id: &str,
        ttl: StdDuration,
    ) -> Result<Option<SchedulerLease>>;

    /// Extends `name`'s expiry for `owner_id`, returns `None` if `owner_id`
    /// no longer holds it (lost the lease to expiry and another owner).
    async fn renew_lease(
        &self,
        name: &str,
        owner_id: &str,
        ttl: StdDuration,
    ) -> Result<Option<SchedulerLease>>;

    async fn release_lease(&self, name: &str, owner_id: &str) -> Result<()>;
}

const WORKFLOWS_TREE: &str = "workflows";
const WORKFLOW_LATEST_TREE: &str = "workflow_latest";
const EXECUTIONS_TREE: &str = "executions";
const TASK_STATES_TREE: &str = "task_states";
const SCHEDULES_TREE: &str = "schedules";
const FIRES_TREE: &str = "fires";
const LEASES_TREE: &str = "leases";

#[derive(Clone)]
pub struct SledStore {
    #[allow(dead_code)]
    db: Db,
    workflows: Tree,
    workflow_latest: Tree,
    executions: Tree,
    task_states: Tree,
    schedules: Tree,
    fires: Tree,
    leases: Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(&path).ok();
        let db = sled::open(path)?;
        debug!("opened execution store");
        Ok(Self {
            workflows: db.open_tree(WORKFLOWS_TREE)?,
            workflow_latest: db.open_tree(WORKFLOW_LATEST_TREE)?,
            executions: db.open_tree(EXECUTIONS_TREE)?,
            task_states: db.open_tree(TASK_STATES_TREE)?,
            schedules: db.open_tree(SCHEDULES_TREE)?,
            fires: db.open_tree(FIRES_TREE)?,
            leases: db.open_tree(LEASES_TREE)?,
            db,
        })
    }

    fn workflow_key(id: &str, version: u64) -> Vec<u8> {
        format!("{id}\0{version:020}").into_bytes()
    }

    fn task_state_key(execution_id: &str, task_name: &str) -> Vec<u8> {
        format!("{execution_id}\0{task_name}").into_bytes()
    }

    fn fire_key(workflow_id: &str, fire_at: DateTime<Utc>) -> Vec<u8> {
        format!("{workflow_id}\0{}", fire_at.to_rfc3339()).into_bytes()
    }

    async fn blocking<T, F>(f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|err| StoreError::Internal(format!("store task panicked: {err}")))?
    }
}

#[async_trait]
impl ExecutionStore for SledStore {
    async fn put_workflow(&self, workflow: &Workflow) -> Result<()> {
        let workflows = self.workflows.clone();
        let latest = self.workflow_latest.clone();
        let workflow = workflow.clone();
        Self::blocking(move || {
            let key = Self::workflow_key(&workflow.id, workflow.version);
            workflows.insert(key, serde_json::to_vec(&workflow)?)?;
            latest.insert(workflow.id.as_bytes(), &workflow.version.to_be_bytes())?;
            Ok(())
        })
        .await
    }

    async fn get_workflow(&self, id: &str, version: u64) -> Result<Option<Workflow>> {
        let workflows = self.workflows.clone();
        let key = Self::workflow_key(id, version);
        Self::blocking(move || {
            workflows
                .get(key)?
                .map(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn latest_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let latest = self.workflow_latest.clone();
        let workflows = self.workflows.clone();
        let id = id.to_string();
        Self::blocking(move || {
            let Some(version_bytes) = latest.get(id.as_bytes())? else {
                return Ok(None);
            };
            let version = u64::from_be_bytes(
                version_bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Internal("corrupt version marker".into()))?,
            );
            let key = SledStore::workflow_key(&id, version);
            workflows
                .get(key)?
                .map(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn put_execution(&self, execution: &Execution) -> Result<()> {
        let executions = self.executions.clone();
        let execution = execution.clone();
        Self::blocking(move || {
            executions.insert(execution.id.as_bytes(), serde_json::to_vec(&execution)?)?;
            Ok(())
        })
        .await
    }

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>> {
        let executions = self.executions.clone();
        let id = id.to_string();
        Self::blocking(move || {
            executions
                .get(id.as_bytes())?
                .map(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn list_executions_for_workflow(&self, workflow_id: &str) -> Result<Vec<Execution>> {
        let executions = self.executions.clone();
        let workflow_id = workflow_id.to_string();
        Self::blocking(move || {
            let mut matches = Vec::new();
            for entry in executions.iter() {
                let (_, value) = entry?;
                let execution: Execution = serde_json::from_slice(&value)?;
                if execution.workflow_id == workflow_id {
                    matches.push(execution);
                }
            }
            Ok(matches)
        })
        .await
    }

    async fn put_task_state(&self, execution_id: &str, state: &TaskState) -> Result<()> {
        let task_states = self.task_states.clone();
        let key = Self::task_state_key(execution_id, &state.name);
        let state = state.clone();
        Self::blocking(move || {
            task_states.insert(key, serde_json::to_vec(&state)?)?;
            Ok(())
        })
        .await
    }

    async fn get_task_states(&self, execution_id: &str) -> Result<HashMap<String, TaskState>> {
        let task_states = self.task_states.clone();
        let prefix = format!("{execution_id}\0");
        Self::blocking(move || {
            let mut states = HashMap::new();
            for entry in task_states.scan_prefix(prefix.as_bytes()) {
                let (_, value) = entry?;
                let state: TaskState = serde_json::from_slice(&value)?;
                states.insert(state.name.clone(), state);
            }
            Ok(states)
        })
        .await
    }

    async fn put_schedule(&self, entry: &ScheduleEntry) -> Result<()> {
        let schedules = self.schedules.clone();
        let entry = entry.clone();
        Self::blocking(move || {
            schedules.insert(entry.workflow_id.as_bytes(), serde_json::to_vec(&entry)?)?;
            Ok(())
        })
        .await
    }

    async fn get_schedule(&self, workflow_id: &str) -> Result<Option<ScheduleEntry>> {
        let schedules = self.schedules.clone();
        let workflow_id = workflow_id.to_string();
        Self::blocking(move || {
            schedules
                .get(workflow_id.as_bytes())?
                .map(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn list_schedules(&self) -> Result<Vec<ScheduleEntry>> {
        let schedules = self.schedules.clone();
        Self::blocking(move || {
            let mut entries = Vec::new();
            for entry in schedules.iter() {
                let (_, value) = entry?;
                entries.push(serde_json::from_slice(&value)?);
            }
            Ok(entries)
        })
        .await
    }

    async fn try_record_fire(&self, workflow_id: &str, fire_at: DateTime<Utc>) -> Result<bool> {
        let fires = self.fires.clone();
        let key = Self::fire_key(workflow_id, fire_at);
        Self::blocking(move || {
            let recorded = fires
                .compare_and_swap(key, None as Option<&[u8]>, Some(b"1".as_slice()))?
                .is_ok();
            Ok(recorded)
        })
        .await
    }

    async fn acquire_lease(
        &self,
        name: &str,
        owner_id: &str,
        ttl: StdDuration,
    ) -> Result<Option<SchedulerLease>> {
        let leases = self.leases.clone();
        let name = name.to_string();
        let owner_id = owner_id.to_string();
        Self::blocking(move || {
            let now = Utc::now();
            let current = leases
                .get(name.as_bytes())?
                .map(|bytes| serde_json::from_slice::<SchedulerLease>(&bytes))
                .transpose()?;

            if let Some(existing) = &current {
                if existing.owner_id != owner_id && !existing.is_expired(now) {
                    return Ok(None);
                }
            }

            let lease = SchedulerLease {
                owner_id,
                acquired_at: now,
                expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            };
            leases.insert(name.as_bytes(), serde_json::to_vec(&lease)?)?;
            Ok(Some(lease))
        })
        .await
    }

    async fn renew_lease(
        &self,
        name: &str,
        owner_id: &str,
        ttl: StdDuration,
    ) -> Result<Option<SchedulerLease>> {
        let leases = self.leases.clone();
        let name = name.to_string();
        let owner_id = owner_id.to_string();
        Self::blocking(move || {
            let current = leases
                .get(name.as_bytes())?
                .map(|bytes| serde_json::from_slice::<SchedulerLease>(&bytes))
                .transpose()?;
            match current {
                Some(existing) if existing.owner_id == owner_id => {
                    let now = Utc::now();
                    let lease = SchedulerLease {
                        owner_id,
                        acquired_at: existing.acquired_at,
                        expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
                    };
                    leases.insert(name.as_bytes(), serde_json::to_vec(&lease)?)?;
                    Ok(Some(lease))
                }
                _ => Ok(None),
            }
        })
        .await
    }

    async fn release_lease(&self, name: &str, owner_id: &str) -> Result<()> {
        let leases = self.leases.clone();
        let name = name.to_string();
        let owner_id = owner_id.to_string();
        Self::blocking(move || {
            if let Some(bytes) = leases.get(name.as_bytes())? {
                let existing: SchedulerLease = serde_json::from_slice(&bytes)?;
                if existing.owner_id == owner_id {
                    leases.remove(name.as_bytes())?;
                }
            }
            Ok(())
        })
        .await
    }
}
