use async_trait::async_trait;
use serde_json::Value;

/// Why an execution was enqueued (spec §4.8 step 4, §6 "Trigger surface").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOrigin {
    Cron,
    Manual,
    Webhook,
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// The bounded submission queue in front of the runtime pool is full
    /// (spec §5, "Backpressure"). Manual/webhook callers see this; cron
    /// re-fires never retry on it — the slot is already marked fired.
    #[error("orchestrator is overloaded")]
    Overloaded,
}

/// The single callback the scheduler invokes to turn a trigger into a
/// running `Execution` (spec §6, "Trigger surface (consumed)": a single
/// callback `enqueue(workflowId, input, origin)`). Implemented outside this
/// crate by whatever owns the runtime pool and its submission queue.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn enqueue(
        &self,
        workflow_id: &str,
        input: Value,
        origin: TriggerOrigin,
    ) -> Result<String, EnqueueError>;
}
