//! Per-`(pluginId, dataSourceId)` sync scheduling (spec.md §4.G).
//!
//! Each registered data source gets its own ticking timer; `run_sync`
//! itself is the exclusive, idempotent unit of work a timer tick, a
//! manual `trigger_sync`, and eventually an IPC call all funnel through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::ai::{Ledger, Router, TaskType};
use crate::events::{DevrigEvent, EventBus};
use crate::plugin_manager::PluginManager;
use crate::storage::{AiOperation, Storage, SyncStatus};

use super::error::SchedulerError;

struct SyncJob {
    #[allow(dead_code)]
    interval: Duration,
    handle: JoinHandle<()>,
}

pub struct SyncScheduler {
    storage: Arc<Storage>,
    plugins: Arc<PluginManager>,
    events: EventBus,
    router: Arc<Router>,
    ledger: Ledger,
    default_interval: Duration,
    snooze_tick_interval: Duration,
    jobs: Mutex<HashMap<(String, String), SyncJob>>,
    snooze_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        storage: Arc<Storage>,
        plugins: Arc<PluginManager>,
        events: EventBus,
        router: Arc<Router>,
        default_interval: Duration,
        snooze_tick_interval: Duration,
    ) -> Self {
        let ledger = Ledger::new(storage.clone());
        Self {
            storage,
            plugins,
            events,
            router,
            ledger,
            default_interval,
            snooze_tick_interval,
            jobs: Mutex::new(HashMap::new()),
            snooze_task: Mutex::new(None),
        }
    }

    /// Load persisted sync-state rows for every enabled plugin's declared
    /// data sources (registering any not already known, at a default
    /// 5-minute interval unless the manifest declares its own), start a
    /// timer for each, then start the 60s snooze-expiry tick.
    pub async fn start(self: Arc<Self>) -> Result<(), SchedulerError> {
        for summary in self.plugins.list().await {
            if !self.plugins.is_enabled(&summary.id).await {
                continue;
            }
            let Some(manifest) = self.plugins.manifest(&summary.id).await else {
                continue;
            };
            for data_source in &manifest.capabilities.data_sources {
                let interval = data_source
                    .sync_interval
                    .map(|ms| Duration::from_millis(ms as u64))
                    .unwrap_or(self.default_interval);
                Arc::clone(&self)
                    .register_data_source(summary.id.clone(), data_source.item.id.clone(), interval)
                    .await?;
            }
        }
        Arc::clone(&self).install_snooze_tick().await;
        Ok(())
    }

    /// Stop every data-source timer and the snooze tick. Idempotent.
    pub async fn stop(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
        if let Some(task) = self.snooze_task.lock().await.take() {
            task.abort();
        }
    }

    /// Register (or re-register) `data_source_id`'s timer: any existing
    /// timer for the key is always cleared first, and a new periodic
    /// timer is installed only if `interval` is non-zero. Re-registering
    /// with a changed interval therefore takes effect immediately,
    /// rather than being a silent no-op.
    pub async fn register_data_source(
        self: Arc<Self>,
        plugin_id: String,
        data_source_id: String,
        interval: Duration,
    ) -> Result<(), SchedulerError> {
        self.storage
            .sync_state_get_or_create(&plugin_id, &data_source_id)
            .await?;
        let key = (plugin_id.clone(), data_source_id.clone());
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.remove(&key) {
            job.handle.abort();
        }
        if !interval.is_zero() {
            let handle = Arc::clone(&self).spawn_job(plugin_id, data_source_id, interval);
            jobs.insert(key, SyncJob { interval, handle });
        }
        Ok(())
    }

    pub async fn unregister_data_source(&self, plugin_id: &str, data_source_id: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.remove(&(plugin_id.to_string(), data_source_id.to_string())) {
            job.handle.abort();
        }
    }

    pub async fn unregister_plugin(&self, plugin_id: &str) {
        let mut jobs = self.jobs.lock().await;
        let keys: Vec<_> = jobs.keys().filter(|(p, _)| p == plugin_id).cloned().collect();
        for key in keys {
            if let Some(job) = jobs.remove(&key) {
                job.handle.abort();
            }
        }
    }

    /// Run every registered data source of `plugin_id` immediately,
    /// outside its normal timer cadence.
    pub async fn trigger_sync(self: Arc<Self>, plugin_id: &str) -> Result<(), SchedulerError> {
        let data_source_ids: Vec<String> = {
            let jobs = self.jobs.lock().await;
            jobs.keys()
                .filter(|(p, _)| p == plugin_id)
                .map(|(_, d)| d.clone())
                .collect()
        };
        if data_source_ids.is_empty() {
            return Err(SchedulerError::UnknownDataSource(plugin_id.to_string(), "*".to_string()));
        }
        for data_source_id in data_source_ids {
            self.run_sync(plugin_id, &data_source_id).await?;
        }
        Ok(())
    }

    fn spawn_job(self: Arc<Self>, plugin_id: String, data_source_id: String, interval: Duration) -> JoinHandle<()> {
        let scheduler = self;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = scheduler.run_sync(&plugin_id, &data_source_id).await {
                    warn!(plugin_id = %plugin_id, data_source_id = %data_source_id, error = %e, "sync tick failed");
                }
            }
        })
    }

    /// The exclusive sync contract, per spec.md §4.G(a)-(g): read state,
    /// no-op if missing or already syncing, transition to `syncing`, emit
    /// progress, dispatch the plugin's sync entry point, transition to
    /// `idle`/`error` on completion, and optionally run a post-sync AI
    /// classification pass over unclassified items.
    pub async fn run_sync(&self, plugin_id: &str, data_source_id: &str) -> Result<(), SchedulerError> {
        let Some(state) = self.storage.sync_state_get(plugin_id, data_source_id).await? else {
            return Ok(());
        };
        if state.sync_status == SyncStatus::Syncing {
            return Ok(());
        }

        self.storage
            .sync_state_transition(plugin_id, data_source_id, SyncStatus::Syncing, None, None)
            .await?;
        self.events.publish(DevrigEvent::SyncProgress {
            plugin_id: plugin_id.to_string(),
            data_source_id: data_source_id.to_string(),
            progress: 0,
        });

        match self.plugins.call_data_source(plugin_id, data_source_id).await {
            Ok(result) => {
                let items_synced = result.get("itemsSynced").and_then(|v| v.as_i64()).unwrap_or(0);
                self.storage
                    .sync_state_transition(
                        plugin_id,
                        data_source_id,
                        SyncStatus::Idle,
                        None,
                        Some(items_synced),
                    )
                    .await?;
                self.events.publish(DevrigEvent::SyncComplete {
                    plugin_id: plugin_id.to_string(),
                    data_source_id: data_source_id.to_string(),
                    items_synced,
                });
                self.post_sync_classify(plugin_id).await;
            }
            Err(err) => {
                self.storage
                    .sync_state_transition(
                        plugin_id,
                        data_source_id,
                        SyncStatus::Error,
                        Some(err.to_string()),
                        None,
                    )
                    .await?;
                self.events.publish(DevrigEvent::SyncError {
                    plugin_id: plugin_id.to_string(),
                    data_source_id: data_source_id.to_string(),
                    error: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Optional step (g): when an AI provider is reachable, classify any
    /// items this plugin has synced that don't carry a classification
    /// yet, recording one ledger row per operation. Best-effort — a
    /// provider failure for one item is logged and does not fail the sync.
    async fn post_sync_classify(&self, plugin_id: &str) {
        if !self.router.default_provider_available().await {
            return;
        }
        let Ok(unclassified) = self.storage.inbox_list_unclassified(plugin_id).await else {
            return;
        };
        for item in unclassified {
            let input = serde_json::json!({ "title": item.title, "body": item.body, "preview": item.preview });
            match self.router.complete_with_fallback(TaskType::Classify, input).await {
                Ok(response) => {
                    if let Err(e) = self
                        .storage
                        .inbox_set_classification(&item.id, response.output.clone())
                        .await
                    {
                        warn!(plugin_id, item_id = %item.id, error = %e, "failed to persist classification");
                        continue;
                    }
                    let route = self.router.resolve(TaskType::Classify).ok();
                    let operation = AiOperation {
                        id: String::new(),
                        provider: route.as_ref().map(|r| r.provider_id.clone()).unwrap_or_default(),
                        model: route.as_ref().map(|r| r.model_id.clone()).unwrap_or_default(),
                        operation: "classify".to_string(),
                        plugin_id: Some(plugin_id.to_string()),
                        pipeline_id: None,
                        inbox_item_id: Some(item.id.clone()),
                        execution_id: None,
                        input_tokens: response.input_tokens,
                        output_tokens: response.output_tokens,
                        cost_usd: response.cost_usd,
                        duration_ms: Some(response.duration_ms),
                        created_at: 0,
                    };
                    if let Err(e) = self.ledger.record(operation).await {
                        warn!(plugin_id, item_id = %item.id, error = %e, "failed to record AI ledger row");
                    }
                }
                Err(e) => {
                    warn!(plugin_id, item_id = %item.id, error = %e, "post-sync classification failed");
                }
            }
        }
    }

    async fn install_snooze_tick(self: Arc<Self>) {
        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(scheduler.snooze_tick_interval).await;
                scheduler.snooze_tick_now().await;
            }
        });
        *self.snooze_task.lock().await = Some(handle);
    }

    /// Unsnooze any items whose `snoozedUntil` has passed, emitting
    /// `inbox:updated` when at least one row changed.
    pub async fn snooze_tick_now(&self) {
        let now = crate::storage::now_ms();
        match self.storage.inbox_unsnooze_expired(now).await {
            Ok(count) if count > 0 => {
                self.events.publish(DevrigEvent::InboxUpdated { unsnoozed: count });
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "snooze-expiry tick failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockProvider;
    use crate::host_functions::{HostFunctions, PermissionRegistry};
    use crate::sandbox::SandboxConfig;
    use tokio::sync::RwLock;

    async fn harness(tmp: &std::path::Path) -> (Arc<Storage>, Arc<PluginManager>) {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        let events = EventBus::new();
        let router = Arc::new(Router::new(Arc::new(MockProvider::new())));
        let permissions: PermissionRegistry = Arc::new(RwLock::new(HashMap::new()));
        let bridge = Arc::new(HostFunctions::new(storage.clone(), events, router, permissions.clone()));
        let plugins_dir = tmp.join("plugins");
        std::fs::create_dir_all(plugins_dir.join("gmail")).unwrap();
        let manifest = serde_json::json!({
            "id": "gmail",
            "name": "Gmail",
            "version": "1.0.0",
            "description": "syncs gmail",
            "author": {"name": "acme"},
            "capabilities": {
                "dataSources": [{"id": "emails", "name": "Emails", "entryPoint": "sync.js"}]
            }
        });
        std::fs::write(plugins_dir.join("gmail").join("manifest.json"), manifest.to_string()).unwrap();
        std::fs::write(
            plugins_dir.join("gmail").join("sync.js"),
            "function sync() { return { itemsSynced: 1 }; }",
        )
        .unwrap();
        let manager = Arc::new(PluginManager::new(
            storage.clone(),
            bridge,
            permissions,
            plugins_dir,
            SandboxConfig::default(),
            10,
        ));
        manager.initialize().await.unwrap();
        (storage, manager)
    }

    #[tokio::test]
    async fn run_sync_is_a_noop_without_a_registered_state_row() {
        let tmp = tempfile::tempdir().unwrap();
        let (storage, plugins) = harness(tmp.path()).await;
        let router = Arc::new(Router::new(Arc::new(MockProvider::new())));
        let scheduler = Arc::new(SyncScheduler::new(
            storage,
            plugins,
            EventBus::new(),
            router,
            Duration::from_secs(300),
            Duration::from_secs(60),
        ));
        // No sync-state row exists yet for an unregistered data source.
        scheduler.run_sync("gmail", "unregistered").await.unwrap();
    }

    #[tokio::test]
    async fn run_sync_transitions_idle_on_success_and_records_items_synced() {
        let tmp = tempfile::tempdir().unwrap();
        let (storage, plugins) = harness(tmp.path()).await;
        storage.sync_state_get_or_create("gmail", "emails").await.unwrap();
        let router = Arc::new(Router::new(Arc::new(MockProvider::new())));
        let scheduler = Arc::new(SyncScheduler::new(
            storage.clone(),
            plugins,
            EventBus::new(),
            router,
            Duration::from_secs(300),
            Duration::from_secs(60),
        ));

        scheduler.run_sync("gmail", "emails").await.unwrap();

        let state = storage.sync_state_get("gmail", "emails").await.unwrap().unwrap();
        assert_eq!(state.sync_status, SyncStatus::Idle);
        assert_eq!(state.items_synced, 1);
    }

    #[tokio::test]
    async fn register_data_source_replaces_existing_timer_and_skips_zero_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let (storage, plugins) = harness(tmp.path()).await;
        let router = Arc::new(Router::new(Arc::new(MockProvider::new())));
        let scheduler = Arc::new(SyncScheduler::new(
            storage,
            plugins,
            EventBus::new(),
            router,
            Duration::from_secs(300),
            Duration::from_secs(60),
        ));

        scheduler
            .clone()
            .register_data_source("gmail".into(), "emails".into(), Duration::from_secs(300))
            .await
            .unwrap();
        let first_handle_finished = {
            let jobs = scheduler.jobs.lock().await;
            jobs.get(&("gmail".to_string(), "emails".to_string()))
                .unwrap()
                .handle
                .is_finished()
        };
        assert!(!first_handle_finished);

        // Re-registering with a new interval must abort the old timer and
        // install a fresh one, not leave the stale one running untouched.
        scheduler
            .clone()
            .register_data_source("gmail".into(), "emails".into(), Duration::from_secs(60))
            .await
            .unwrap();
        let jobs = scheduler.jobs.lock().await;
        let job = jobs.get(&("gmail".to_string(), "emails".to_string())).unwrap();
        assert_eq!(job.interval, Duration::from_secs(60));
        drop(jobs);

        // A zero interval clears any timer and installs none.
        scheduler
            .clone()
            .register_data_source("gmail".into(), "emails".into(), Duration::ZERO)
            .await
            .unwrap();
        let jobs = scheduler.jobs.lock().await;
        assert!(!jobs.contains_key(&("gmail".to_string(), "emails".to_string())));
    }

    #[tokio::test]
    async fn trigger_sync_fails_for_unknown_plugin() {
        let tmp = tempfile::tempdir().unwrap();
        let (storage, plugins) = harness(tmp.path()).await;
        let router = Arc::new(Router::new(Arc::new(MockProvider::new())));
        let scheduler = Arc::new(SyncScheduler::new(
            storage,
            plugins,
            EventBus::new(),
            router,
            Duration::from_secs(300),
            Duration::from_secs(60),
        ));
        let err = scheduler.clone().trigger_sync("unknown").await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownDataSource(_, _)));
    }
}
