use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use orc_model::ScheduleEntry;
use orc_store::ExecutionStore;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cron_schedule::CronSchedule;
use crate::error::Result;
use crate::sink::{TriggerOrigin, TriggerSink};

/// Name of the single lease row the scheduler contends for (spec §3,
/// `SchedulerLease` — "at most one active lease exists").
const LEASE_NAME: &str = "scheduler";

/// Single-leader tick loop turning cron schedules and manual/webhook
/// triggers into enqueued executions (spec §4.8).
///
/// Only one `Scheduler` instance across a process cluster ever holds the
/// lease at a time; every other instance sits in the acquire-and-retry loop
/// (spec: "this is the only 'consensus' surface; it is not Raft — it is a
/// TTL'd database row").
pub struct Scheduler {
    store: Arc<dyn ExecutionStore>,
    sink: Arc<dyn TriggerSink>,
    owner_id: String,
    tick_interval: StdDuration,
    lease_ttl: StdDuration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        sink: Arc<dyn TriggerSink>,
        owner_id: impl Into<String>,
        tick_interval: StdDuration,
        lease_ttl: StdDuration,
    ) -> Self {
        Self {
            store,
            sink,
            owner_id: owner_id.into(),
            tick_interval,
            lease_ttl,
        }
    }

    /// Runs until `cancel` fires. Alternates between "not the leader, sleep
    /// and retry acquiring" and "leader, tick until the lease is lost or
    /// `cancel` fires" (spec §4.8 step 1).
    pub async fn run(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            match self
                .store
                .acquire_lease(LEASE_NAME, &self.owner_id, self.lease_ttl)
                .await
            {
                Ok(Some(_lease)) => {
                    info!(owner = %self.owner_id, "acquired scheduler lease, entering tick loop");
                    self.run_as_leader(&cancel).await;
                }
                Ok(None) => debug!("scheduler lease held by another owner"),
                Err(err) => warn!(error = %err, "failed to acquire scheduler lease"),
            }

            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }
    }

    /// Ticks until lease renewal fails (another owner took over after this
    /// one stalled past its TTL) or the caller cancels. Renews at roughly
    /// a third of the TTL, per spec §5 ("renewal period ≤ ⅓ of TTL").
    async fn run_as_leader(&self, cancel: &CancellationToken) {
        let renew_every = (self.lease_ttl / 3).max(self.tick_interval);
        let mut since_renew = StdDuration::ZERO;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.tick_interval) => {}
            }

            since_renew += self.tick_interval;
            if since_renew >= renew_every {
                since_renew = StdDuration::ZERO;
                match self
                    .store
                    .renew_lease(LEASE_NAME, &self.owner_id, self.lease_ttl)
                    .await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!(owner = %self.owner_id, "lost scheduler lease, stepping down");
                        return;
                    }
                    Err(err) => warn!(error = %err, "lease renewal failed"),
                }
            }

            if let Err(err) = self.tick().await {
                warn!(error = %err, "scheduler tick failed");
            }
        }
    }

    /// One evaluation pass over every `ScheduleEntry` (spec §4.8 step 2).
    #[instrument(skip(self))]
    async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        for mut entry in self.store.list_schedules().await? {
            if !entry.enabled {
                continue;
            }

            let cron = match CronSchedule::parse(&entry.cron_expr, &entry.timezone) {
                Ok(cron) => cron,
                Err(err) => {
                    warn!(workflow_id = %entry.workflow_id, error = %err, "skipping malformed schedule");
                    continue;
                }
            };

            let Some(next_fire_at) = entry.next_fire_at else {
                entry.next_fire_at = cron.next_after(now);
                self.store.put_schedule(&entry).await?;
                continue;
            };

            if next_fire_at > now {
                continue;
            }

            let recorded = self.store.try_record_fire(&entry.workflow_id, next_fire_at).await?;
            if recorded {
                let missed = cron.count_missed_between(next_fire_at, now);
                if missed > 0 {
                    info!(
                        workflow_id = %entry.workflow_id,
                        missed,
                        "coalesced missed cron fires into a single run"
                    );
                }
                match self.sink.enqueue(&entry.workflow_id, Value::Null, TriggerOrigin::Cron).await {
                    Ok(execution_id) => {
                        debug!(workflow_id = %entry.workflow_id, %execution_id, "cron fire enqueued");
                    }
                    Err(err) => {
                        // The slot is already recorded as fired; a dropped
                        // enqueue here is not retried (spec §5, "cron
                        // re-fires are not queued — they are dropped").
                        warn!(workflow_id = %entry.workflow_id, error = %err, "cron fire dropped under backpressure");
                    }
                }
                entry.last_dedup_key = Some(next_fire_at.to_rfc3339());
            }

            // Advance regardless of whether this slot actually enqueued,
            // so a dropped or duplicate fire never wedges the schedule
            // (spec §4.8 step 2, "always advance nextFireAt").
            entry.next_fire_at = cron.next_after(now);
            self.store.put_schedule(&entry).await?;
        }
        Ok(())
    }

    /// Registers or updates a workflow's cron schedule (spec §6,
    /// `ScheduleUpsert`). Seeds `nextFireAt` immediately so the first tick
    /// after registration doesn't need a whole extra pass to discover it.
    pub async fn upsert_schedule(
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

    /// Manual trigger: bypasses dedup entirely (spec §4.8 step 4).
    pub async fn trigger_manual(
        &self,
        workflow_id: &str,
        input: Value,
    ) -> std::result::Result<String, crate::sink::EnqueueError> {
        self.sink.enqueue(workflow_id, input, TriggerOrigin::Manual).await
    }

    /// Webhook trigger: same passthrough as manual, distinguished only by
    /// `origin` for downstream observability (spec §4.8 step 4).
    pub async fn trigger_webhook(
        &self,
        workflow_id: &str,
        input: Value,
    ) -> std::result::Result<String, crate::sink::EnqueueError> {
        self.sink.enqueue(workflow_id, input, TriggerOrigin::Webhook).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use orc_store::SledStore;

    struct RecordingSink {
        fired: Mutex<Vec<(String, TriggerOrigin)>>,
        overloaded_after: Option<usize>,
        calls: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                fired: Mutex::new(Vec::new()),
                overloaded_after: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TriggerSink for RecordingSink {
        async fn enqueue(
            &self,
            workflow_id: &str,
            _input: Value,
            origin: TriggerOrigin,
        ) -> std::result::Result<String, crate::sink::EnqueueError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.overloaded_after {
                return Err(crate::sink::EnqueueError::Overloaded);
            }
            self.fired.lock().unwrap().push((workflow_id.to_string(), origin));
            Ok(format!("exec-{call}"))
        }
    }

    async fn store() -> (Arc<dyn ExecutionStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ExecutionStore> = Arc::new(SledStore::open(dir.path()).unwrap());
        (store, dir)
    }

    #[tokio::test]
    async fn tick_fires_a_due_schedule_exactly_once() {
        let (store, _dir) = store().await;
        let sink = Arc::new(RecordingSink::new());
        let scheduler = Scheduler::new(
            store.clone(),
            sink.clone(),
            "owner-a",
            StdDuration::from_millis(10),
            StdDuration::from_secs(30),
        );

        let mut entry = ScheduleEntry::new("wf-1", "* * * * *", "UTC");
        entry.next_fire_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.put_schedule(&entry).await.unwrap();

        scheduler.tick().await.unwrap();
        scheduler.tick().await.unwrap();

        assert_eq!(sink.fired.lock().unwrap().len(), 1);
        let refetched = store.get_schedule("wf-1").await.unwrap().unwrap();
        assert!(refetched.next_fire_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn disabled_schedule_never_fires() {
        let (store, _dir) = store().await;
        let sink = Arc::new(RecordingSink::new());
        let scheduler = Scheduler::new(
            store.clone(),
            sink.clone(),
            "owner-a",
            StdDuration::from_millis(10),
            StdDuration::from_secs(30),
        );

        let mut entry = ScheduleEntry::new("wf-1", "* * * * *", "UTC");
        entry.enabled = false;
        entry.next_fire_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.put_schedule(&entry).await.unwrap();

        scheduler.tick().await.unwrap();
        assert!(sink.fired.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_schedule_seeds_next_fire_at() {
        let (store, _dir) = store().await;
        let sink = Arc::new(RecordingSink::new());
        let scheduler = Scheduler::new(
            store,
            sink,
            "owner-a",
            StdDuration::from_millis(10),
            StdDuration::from_secs(30),
        );
        let entry = scheduler
            .upsert_schedule("wf-1", "*/5 * * * *", "UTC", true)
            .await
            .unwrap();
        assert!(entry.next_fire_at.is_some());
    }

    #[tokio::test]
    async fn manual_trigger_bypasses_dedup() {
        let (store, _dir) = store().await;
        let sink = Arc::new(RecordingSink::new());
        let scheduler = Scheduler::new(
            store,
            sink.clone(),
            "owner-a",
            StdDuration::from_millis(10),
            StdDuration::from_secs(30),
        );
        scheduler.trigger_manual("wf-1", Value::Null).await.unwrap();
        scheduler.trigger_manual("wf-1", Value::Null).await.unwrap();
        assert_eq!(sink.fired.lock().unwrap().len(), 2);
    }
}
