use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use orc_model::AgentDescriptorInfo;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::{Agent, Error, Result};

/// Lifecycle hooks are given this long to complete; a hook that blows past
/// it is logged and otherwise ignored rather than blocking registration or
/// shutdown of every other agent (spec §4.1).
const LIFECYCLE_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves `(agentType, action)` pairs to a live `Agent` implementation.
///
/// Registration is keyed purely by `agentType` — one agent instance answers
/// for every action it declares. Lookup is lock-free (`dashmap`) so the
/// runtime can resolve dispatch targets from many concurrently running
/// tasks without contending on a single mutex.
pub struct AgentRegistry {
    agents: DashMap<String, Arc<dyn Agent>>,
    /// One semaphore per agent type that declares `maxConcurrent`, shared
    /// across every execution the way the breaker table is (spec §5,
    /// "Ordering guarantees": "the dispatch wrapper holds a semaphore
    /// accordingly"). Agents with no limit never get an entry here.
    concurrency: DashMap<String, Arc<Semaphore>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            concurrency: DashMap::new(),
        }
    }

    /// Registers an agent and runs its `initialize` hook. Returns an error
    /// if `agentType` is already taken; a failing or slow `initialize` is
    /// logged but does not prevent registration (spec §4.1: lifecycle hooks
    /// are best-effort).
    pub async fn register(&self, agent: Arc<dyn Agent>) -> Result<()> {
        let agent_type = agent.agent_type().to_string();
        if self.agents.contains_key(&agent_type) {
            return Err(Error::DuplicateAgentType(agent_type));
        }

        match tokio::time::timeout(LIFECYCLE_HOOK_TIMEOUT, agent.initialize()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(agent_type = %agent_type, error = %err, "agent initialize hook failed"),
            Err(_) => warn!(agent_type = %agent_type, "agent initialize hook timed out"),
        }

        self.agents.insert(agent_type, agent);
        Ok(())
    }

    /// Removes an agent and runs its `cleanup` hook under the same
    /// best-effort timeout as `initialize`.
    pub async fn deregister(&self, agent_type: &str) -> Result<()> {
        let (_, agent) = self
            .agents
            .remove(agent_type)
            .ok_or_else(|| Error::AgentNotFound(agent_type.to_string()))?;

        match tokio::time::timeout(LIFECYCLE_HOOK_TIMEOUT, agent.cleanup()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(agent_type = %agent_type, error = %err, "agent cleanup hook failed"),
            Err(_) => warn!(agent_type = %agent_type, "agent cleanup hook timed out"),
        }
        Ok(())
    }

    /// Resolves the agent that answers for `agentType`, or
    /// `ErrorKind::AgentNotFound` territory for the caller (spec §4.2 step
    /// 2) if it's unregistered. Does not validate `action` — that happens
    /// on dispatch, since it needs the agent's declared action list.
    pub fn resolve(&self, agent_type: &str) -> Result<Arc<dyn Agent>> {
        self.agents
            .get(agent_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::AgentNotFound(agent_type.to_string()))
    }

    /// Validates that `agentType` exposes `action`, for dispatch-time
    /// checks before an attempt is spent on it.
    pub fn resolve_action(&self, agent_type: &str, action: &str) -> Result<Arc<dyn Agent>> {
        let agent = self.resolve(agent_type)?;
        if agent.actions().iter().any(|a| a.name == action) {
            Ok(agent)
        } else {
            Err(Error::ActionNotFound(
                agent_type.to_string(),
                action.to_string(),
            ))
        }
    }

    /// Descriptive snapshot of every registered agent, for the `ListAgents`
    /// control-surface operation (spec §6).
    pub fn list(&self) -> Vec<AgentDescriptorInfo> {
        self.agents
            .iter()
            .map(|entry| {
                let agent = entry.value();
                AgentDescriptorInfo {
                    agent_type: agent.agent_type().to_string(),
                    name: agent.agent_type().to_string(),
                    actions: agent.actions(),
                    max_concurrent: agent.max_concurrent(),
                }
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.agents.len()
    }

    /// Acquires a concurrency permit for `agentType`, if it declares a
    /// `maxConcurrent` limit. Returns `None` for unlimited agents, in which
    /// case the caller dispatches with no throttling at all. The semaphore
    /// is created lazily on first use and reused for the agent's lifetime;
    /// it is sized once, from the value the agent reported at that point —
    /// an agent that changes its answer after agents are already in flight
    /// against it is not re-sized.
    pub async fn acquire_concurrency_permit(
        &self,
        agent_type: &str,
    ) -> Result<Option<OwnedSemaphorePermit>> {
        let agent = self.resolve(agent_type)?;
        let Some(limit) = agent.max_concurrent() else {
            return Ok(None);
        };
        let semaphore = self
            .concurrency
            .entry(agent_type.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone();
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        Ok(Some(permit))
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
