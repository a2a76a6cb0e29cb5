//! Runtime core for the devrig developer cockpit.
//!
//! This crate owns the subsystems spec'd as the "runtime core": the
//! plugin sandbox and its pool, the manifest/permission model, the sync
//! and trigger schedulers, the AI router and cost ledger, and the
//! storage substrate backing all of them. Everything else — the
//! windowing/UI layer, OAuth flow pages, the flow-graph DAG executor's
//! node-by-node semantics — is an external collaborator this crate only
//! names at its interface (`scheduler::WorkflowExecutor`).
//!
//! [`Runtime`] is the root object: it constructs every subsystem once,
//! wires them together explicitly, and is the single handle a host
//! application (the CLI, eventually a desktop shell) holds. There is no
//! global mutable state outside of it.

pub mod ai;
pub mod config;
pub mod error;
pub mod events;
pub mod host_functions;
pub mod manifest;
pub mod plugin_loader;
pub mod plugin_manager;
pub mod sandbox;
pub mod scheduler;
pub mod storage;

pub use config::Config;
pub use error::{DevrigError, ErrorKind, Result};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use ai::{MockProvider, Router};
use events::EventBus;
use host_functions::{HostFunctions, PermissionRegistry};
use plugin_manager::PluginManager;
use scheduler::{NoopExecutor, SyncScheduler, TriggerScheduler, WorkflowExecutor};
use storage::Storage;

/// Everything the runtime core needs to run, constructed once at process
/// start and disposed once at shutdown (spec.md §6 "Exit/shutdown").
pub struct Runtime {
    pub config: Config,
    pub storage: Arc<Storage>,
    pub events: EventBus,
    pub router: Arc<Router>,
    pub permissions: PermissionRegistry,
    pub plugins: Arc<PluginManager>,
    pub sync_scheduler: Arc<SyncScheduler>,
    pub trigger_scheduler: Arc<TriggerScheduler>,
}

impl Runtime {
    /// Wire every subsystem against `config`, using an offline
    /// [`MockProvider`] as the default AI provider and a [`NoopExecutor`]
    /// as the workflow executor. A host embedding this runtime for real
    /// should register real providers on `router` and swap the executor
    /// before calling [`Runtime::start`].
    pub async fn new(config: Config) -> Result<Self> {
        Self::build(config, Arc::new(NoopExecutor)).await
    }

    /// Same as [`Runtime::new`] but with an explicit workflow executor,
    /// for a host that has a real DAG executor to drive trigger firings
    /// into.
    pub async fn with_executor(config: Config, executor: Arc<dyn WorkflowExecutor>) -> Result<Self> {
        Self::build(config, executor).await
    }

    /// An in-memory runtime rooted at a fresh temp directory, for tests
    /// and the CLI's `demo` command. Never persists across process exit.
    pub async fn ephemeral() -> Result<Self> {
        let tmp = std::env::temp_dir().join(format!("devrig-ephemeral-{}", storage::new_id()));
        let config = Config::with_data_dir(&tmp);
        tokio::fs::create_dir_all(&config.plugins_dir).await.map_err(|e| {
            DevrigError::Validation(format!("failed to create plugins dir: {e}"))
        })?;
        let storage = Arc::new(Storage::open_in_memory().await?);
        Self::wire(config, storage, Arc::new(NoopExecutor)).await
    }

    async fn build(config: Config, executor: Arc<dyn WorkflowExecutor>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.plugins_dir).await.map_err(|e| {
            DevrigError::Validation(format!("failed to create plugins dir: {e}"))
        })?;
        let storage = Arc::new(Storage::open(&config.db_path()).await?);
        Self::wire(config, storage, executor).await
    }

    async fn wire(config: Config, storage: Arc<Storage>, executor: Arc<dyn WorkflowExecutor>) -> Result<Self> {
        let events = EventBus::new();
        let router = Arc::new(Router::new(Arc::new(MockProvider::new())));
        let permissions: PermissionRegistry = Arc::new(RwLock::new(HashMap::new()));
        let bridge = Arc::new(HostFunctions::new(
            storage.clone(),
            events.clone(),
            router.clone(),
            permissions.clone(),
        ));
        let plugins = Arc::new(PluginManager::new(
            storage.clone(),
            bridge,
            permissions.clone(),
            config.plugins_dir.clone(),
            sandbox::SandboxConfig {
                memory_limit_bytes: config.sandbox_memory_limit_bytes,
                eval_timeout: config.sandbox_eval_timeout,
            },
            config.sandbox_pool_size,
        ));
        let sync_scheduler = Arc::new(SyncScheduler::new(
            storage.clone(),
            plugins.clone(),
            events.clone(),
            router.clone(),
            config.default_sync_interval,
            config.snooze_tick_interval,
        ));
        let trigger_scheduler = Arc::new(TriggerScheduler::new(
            storage.clone(),
            executor,
            config.trigger_tick_interval,
        ));

        Ok(Self {
            config,
            storage,
            events,
            router,
            permissions,
            plugins,
            sync_scheduler,
            trigger_scheduler,
        })
    }

    /// Discover/register plugins, then start both schedulers. Mirrors
    /// spec.md §2's "all components are wired once at process start".
    pub async fn start(&self) -> Result<()> {
        self.plugins.initialize().await?;
        self.sync_scheduler.clone().start().await?;
        self.trigger_scheduler.clone().start().await;
        info!("runtime started");
        Ok(())
    }

    /// Stop the trigger scheduler, stop the sync scheduler, dispose every
    /// sandbox, then checkpoint and close the database — in that order,
    /// per spec.md §6. Every step runs even if an earlier one errors; a
    /// reimplementation that bails out partway would leave either a timer
    /// still firing against a disposed plugin manager, or an un-truncated
    /// WAL file.
    pub async fn shutdown(&self) {
        self.trigger_scheduler.stop().await;
        self.sync_scheduler.stop().await;
        self.plugins.dispose_all().await;
        if let Err(e) = self.storage.checkpoint_and_close().await {
            warn!(error = %e, "failed to checkpoint and close storage during shutdown");
        }
        info!("runtime shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ephemeral_runtime_starts_and_shuts_down_cleanly() {
        let runtime = Runtime::ephemeral().await.unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.plugins.list().await.is_empty());
        runtime.shutdown().await;
    }
}
