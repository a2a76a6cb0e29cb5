//! Schedule-trigger reconciliation for workflow graphs (spec.md §4.H).
//!
//! Polls trigger-type nodes of every non-disabled workflow every 60s and
//! keeps one timer per workflow whose trigger node resolves to a
//! `schedule` trigger, adding, replacing, or clearing timers to match.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::Storage;

use super::workflow_executor::{TriggerKind, WorkflowExecutor};

struct TriggerJob {
    interval_ms: u64,
    handle: JoinHandle<()>,
}

pub struct TriggerScheduler {
    storage: Arc<Storage>,
    executor: Arc<dyn WorkflowExecutor>,
    tick_interval: Duration,
    jobs: Mutex<HashMap<String, TriggerJob>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerScheduler {
    pub fn new(storage: Arc<Storage>, executor: Arc<dyn WorkflowExecutor>, tick_interval: Duration) -> Self {
        Self {
            storage,
            executor,
            tick_interval,
            jobs: Mutex::new(HashMap::new()),
            refresh_task: Mutex::new(None),
        }
    }

    /// Run `refresh_jobs` immediately, then every `tick_interval`.
    pub async fn start(self: Arc<Self>) {
        Arc::clone(&self).refresh_jobs().await;
        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(scheduler.tick_interval).await;
                Arc::clone(&scheduler).refresh_jobs().await;
            }
        });
        *self.refresh_task.lock().await = Some(handle);
    }

    /// Stop the reconciliation loop and every per-workflow timer.
    pub async fn stop(&self) {
        if let Some(task) = self.refresh_task.lock().await.take() {
            task.abort();
        }
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }

    /// Query trigger-type nodes of every non-disabled workflow, keep only
    /// `schedule` triggers, and reconcile the timer table: add a timer for
    /// a newly-active schedule, replace one whose interval changed, and
    /// clear any whose workflow is no longer active.
    pub async fn refresh_jobs(self: Arc<Self>) {
        let nodes = match self.storage.flow_nodes_trigger_for_enabled_workflows().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "failed to load trigger nodes, leaving existing timers in place");
                return;
            }
        };

        let mut active: HashMap<String, u64> = HashMap::new();
        for node in &nodes {
            let Some(trigger_type) = node.config.get("triggerType").and_then(|v| v.as_str()) else {
                continue;
            };
            if trigger_type != "schedule" {
                continue;
            }
            let interval_ms = node
                .config
                .get("schedule")
                .map(schedule_to_ms)
                .unwrap_or(0);
            // Last writer for a workflow with multiple schedule triggers
            // wins; workflows are expected to declare at most one.
            active.insert(node.workflow_id.clone(), interval_ms);
        }

        let mut jobs = self.jobs.lock().await;

        let stale: Vec<String> = jobs
            .keys()
            .filter(|workflow_id| !active.contains_key(*workflow_id))
            .cloned()
            .collect();
        for workflow_id in stale {
            if let Some(job) = jobs.remove(&workflow_id) {
                job.handle.abort();
                debug!(workflow_id, "cleared trigger timer for workflow no longer active");
            }
        }

        for (workflow_id, interval_ms) in active {
            if interval_ms == 0 {
                continue;
            }
            let needs_replace = jobs
                .get(&workflow_id)
                .map(|job| job.interval_ms != interval_ms)
                .unwrap_or(true);
            if !needs_replace {
                continue;
            }
            if let Some(old) = jobs.remove(&workflow_id) {
                old.handle.abort();
            }
            let handle = Arc::clone(&self).spawn_job(workflow_id.clone(), interval_ms);
            jobs.insert(workflow_id, TriggerJob { interval_ms, handle });
        }
    }

    fn spawn_job(self: Arc<Self>, workflow_id: String, interval_ms: u64) -> JoinHandle<()> {
        let scheduler = self;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                if let Err(e) = scheduler.executor.execute(&workflow_id, TriggerKind::Schedule).await {
                    warn!(workflow_id = %workflow_id, error = %e, "scheduled workflow trigger failed");
                }
            }
        })
    }
}

/// `{intervalValue, intervalUnit}` -> milliseconds. An unrecognized unit
/// logs a warning and resolves to 0, which `refresh_jobs` treats as "never
/// fires" rather than rejecting the whole workflow.
fn schedule_to_ms(schedule: &serde_json::Value) -> u64 {
    let value = schedule.get("intervalValue").and_then(|v| v.as_u64()).unwrap_or(0);
    let unit = schedule.get("intervalUnit").and_then(|v| v.as_str()).unwrap_or("");
    match unit {
        "minutes" => value * 60_000,
        "hours" => value * 3_600_000,
        "days" => value * 86_400_000,
        other => {
            warn!(unit = other, "unknown schedule interval unit, trigger will never fire");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FlowEdge, FlowNode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkflowExecutor for CountingExecutor {
        async fn execute(&self, _workflow_id: &str, _trigger: TriggerKind) -> Result<(), super::super::workflow_executor::ExecutorError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn workflow_with_trigger(storage: &Storage, interval_value: u64, unit: &str) -> String {
        let ws = storage.workspace_insert("default".into()).await.unwrap();
        let wf = storage.workflow_insert(ws.id, "wf".into(), true).await.unwrap();
        let node = FlowNode {
            id: crate::storage::new_id(),
            workflow_id: wf.id.clone(),
            node_type: "trigger".into(),
            config: serde_json::json!({
                "triggerType": "schedule",
                "schedule": {"intervalValue": interval_value, "intervalUnit": unit}
            }),
        };
        storage
            .workflow_replace_graph(wf.id.clone(), vec![node], Vec::<FlowEdge>::new())
            .await
            .unwrap();
        wf.id
    }

    #[tokio::test]
    async fn refresh_jobs_adds_a_timer_for_a_schedule_trigger() {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        let workflow_id = workflow_with_trigger(&storage, 5, "minutes").await;
        let executor = Arc::new(CountingExecutor { count: Arc::new(AtomicUsize::new(0)) });
        let scheduler = Arc::new(TriggerScheduler::new(storage, executor, Duration::from_secs(60)));

        scheduler.clone().refresh_jobs().await;

        let jobs = scheduler.jobs.lock().await;
        assert!(jobs.contains_key(&workflow_id));
        assert_eq!(jobs.get(&workflow_id).unwrap().interval_ms, 5 * 60_000);
    }

    #[tokio::test]
    async fn unknown_unit_resolves_to_never_fires() {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        let workflow_id = workflow_with_trigger(&storage, 5, "fortnights").await;
        let executor = Arc::new(CountingExecutor { count: Arc::new(AtomicUsize::new(0)) });
        let scheduler = Arc::new(TriggerScheduler::new(storage, executor, Duration::from_secs(60)));

        scheduler.clone().refresh_jobs().await;

        let jobs = scheduler.jobs.lock().await;
        assert!(!jobs.contains_key(&workflow_id));
    }

    #[tokio::test]
    async fn disabling_the_workflow_clears_its_timer() {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        let workflow_id = workflow_with_trigger(&storage, 5, "minutes").await;
        let executor = Arc::new(CountingExecutor { count: Arc::new(AtomicUsize::new(0)) });
        let scheduler = Arc::new(TriggerScheduler::new(storage.clone(), executor, Duration::from_secs(60)));
        scheduler.clone().refresh_jobs().await;
        assert!(scheduler.jobs.lock().await.contains_key(&workflow_id));

        let disable_id = workflow_id.clone();
        storage
            .with_conn(move |conn| {
                conn.execute("UPDATE workflows SET enabled = 0 WHERE id = ?1", rusqlite::params![disable_id])?;
                Ok(())
            })
            .await
            .unwrap();

        scheduler.clone().refresh_jobs().await;
        assert!(scheduler.jobs.lock().await.is_empty());
    }
}
