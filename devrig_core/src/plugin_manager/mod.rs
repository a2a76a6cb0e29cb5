//! Owns every installed plugin's lifecycle state and its sandbox pool,
//! dispatching calls into §4.D on the caller's behalf (spec.md §4.E).

mod error;
mod lru_pool;

pub use error::PluginError;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::host_functions::PermissionRegistry;
use crate::manifest::{self, Manifest};
use crate::plugin_loader::{self, PluginDescriptor};
use crate::sandbox::{HostBridge, Sandbox, SandboxConfig};
use crate::storage::Storage;

use lru_pool::LruPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    Installed,
    Active,
    Error,
    Disabled,
}

/// What to invoke inside a plugin's sandbox, and with what arguments.
/// Replaces a loosely-typed `(method: &str, args: Value)` pair with a
/// closed set spec.md §4.E actually dispatches.
#[derive(Debug, Clone)]
pub enum Invocation {
    DataSourceSync(String),
    Action { id: String, args: serde_json::Value },
    AiPipeline { id: String, args: serde_json::Value },
}

impl Invocation {
    fn function_name(&self) -> String {
        match self {
            Invocation::DataSourceSync(_) => "sync".to_string(),
            Invocation::Action { id, .. } => format!("action_{id}"),
            Invocation::AiPipeline { id, .. } => format!("pipeline_{id}"),
        }
    }

    /// The single JSON value passed as the guest function's sole
    /// argument (sandbox::Sandbox::invoke never spreads this across
    /// positional parameters — see `Engine::invoke_function`).
    fn args(&self) -> serde_json::Value {
        match self {
            Invocation::DataSourceSync(_) => serde_json::Value::Array(vec![]),
            Invocation::Action { args, .. } | Invocation::AiPipeline { args, .. } => args.clone(),
        }
    }

    fn capability_label(&self) -> String {
        match self {
            Invocation::DataSourceSync(id) => format!("dataSource:{id}"),
            Invocation::Action { id, .. } => format!("action:{id}"),
            Invocation::AiPipeline { id, .. } => format!("aiPipeline:{id}"),
        }
    }

    fn declared_in(&self, manifest: &Manifest) -> bool {
        match self {
            Invocation::DataSourceSync(id) => manifest.data_source(id).is_some(),
            Invocation::Action { id, .. } => manifest.action(id).is_some(),
            Invocation::AiPipeline { id, .. } => manifest.ai_pipeline(id).is_some(),
        }
    }
}

/// One plugin's runtime bookkeeping. `descriptor` is `None` only for a row
/// whose stored manifest failed to parse at startup — it stays in `Error`
/// status and every dispatch against it fails fast.
struct ManagedPlugin {
    descriptor: Option<PluginDescriptor>,
    status: PluginStatus,
    error: Option<String>,
    last_accessed: u64,
}

/// Read-only view handed back to callers (the CLI, diagnostics) that
/// should not see the full descriptor/manifest internals.
#[derive(Debug, Clone)]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub status: PluginStatus,
    pub error: Option<String>,
}

pub struct PluginManager {
    storage: Arc<Storage>,
    bridge: Arc<dyn HostBridge>,
    permissions: PermissionRegistry,
    plugins_dir: PathBuf,
    sandbox_config: SandboxConfig,
    plugins: RwLock<HashMap<String, ManagedPlugin>>,
    pool: Mutex<LruPool>,
    access_counter: AtomicU64,
}

impl PluginManager {
    pub fn new(
        storage: Arc<Storage>,
        bridge: Arc<dyn HostBridge>,
        permissions: PermissionRegistry,
        plugins_dir: PathBuf,
        sandbox_config: SandboxConfig,
        pool_size: usize,
    ) -> Self {
        Self {
            storage,
            bridge,
            permissions,
            plugins_dir,
            sandbox_config,
            plugins: RwLock::new(HashMap::new()),
            pool: Mutex::new(LruPool::new(pool_size)),
            access_counter: AtomicU64::new(0),
        }
    }

    fn next_access(&self) -> u64 {
        self.access_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Per spec.md §4.E: load every enabled plugin row, validate its
    /// stored manifest (malformed rows enter `Error` and are skipped for
    /// dispatch purposes), then discover on-disk plugins and register
    /// anything not already known.
    pub async fn initialize(&self) -> Result<(), PluginError> {
        let rows = self.storage.plugin_list().await?;
        for row in rows {
            if !row.enabled {
                continue;
            }
            match manifest::parse(&row.manifest_json) {
                Ok((parsed, warnings)) => {
                    for w in &warnings {
                        warn!(plugin_id = %row.id, warning = ?w, "manifest warning at startup");
                    }
                    let guard = manifest::PermissionGuard::new(&parsed.permissions);
                    self.permissions.write().await.insert(row.id.clone(), guard.clone());
                    let descriptor = PluginDescriptor {
                        id: row.id.clone(),
                        name: parsed.name.clone(),
                        version: parsed.version.clone(),
                        manifest: parsed,
                        path: self.plugins_dir.join(&row.id),
                        permissions: guard,
                        entry_points: Default::default(),
                    };
                    self.plugins.write().await.insert(
                        row.id.clone(),
                        ManagedPlugin {
                            descriptor: Some(descriptor),
                            status: PluginStatus::Installed,
                            error: None,
                            last_accessed: 0,
                        },
                    );
                }
                Err(e) => {
                    error!(plugin_id = %row.id, error = %e, "stored manifest failed to parse, entering error state");
                    self.plugins.write().await.insert(
                        row.id.clone(),
                        ManagedPlugin {
                            descriptor: None,
                            status: PluginStatus::Error,
                            error: Some(e.to_string()),
                            last_accessed: 0,
                        },
                    );
                }
            }
        }

        for result in plugin_loader::discover(&self.plugins_dir) {
            match result {
                Ok(descriptor) => {
                    let known = self.plugins.read().await.contains_key(&descriptor.id);
                    if known {
                        let mut plugins = self.plugins.write().await;
                        if let Some(managed) = plugins.get_mut(&descriptor.id) {
                            if let Some(existing) = managed.descriptor.as_mut() {
                                existing.path = descriptor.path.clone();
                                existing.entry_points = descriptor.entry_points.clone();
                            } else {
                                managed.descriptor = Some(descriptor);
                                managed.status = PluginStatus::Installed;
                                managed.error = None;
                            }
                        }
                    } else {
                        self.register_new_plugin(descriptor).await?;
                    }
                }
                Err(e) => warn!(error = %e, "skipping plugin during discovery"),
            }
        }
        Ok(())
    }

    async fn register_new_plugin(&self, descriptor: PluginDescriptor) -> Result<(), PluginError> {
        let manifest_json = serde_json::to_string(&descriptor.manifest)?;
        self.storage
            .plugin_insert(
                descriptor.id.clone(),
                descriptor.name.clone(),
                descriptor.version.to_string(),
                manifest_json,
                true,
            )
            .await?;
        for ds in &descriptor.manifest.capabilities.data_sources {
            self.storage
                .sync_state_get_or_create(&descriptor.id, &ds.item.id)
                .await?;
        }
        self.permissions
            .write()
            .await
            .insert(descriptor.id.clone(), descriptor.permissions.clone());
        self.plugins.write().await.insert(
            descriptor.id.clone(),
            ManagedPlugin {
                descriptor: Some(descriptor),
                status: PluginStatus::Installed,
                error: None,
                last_accessed: 0,
            },
        );
        Ok(())
    }

    /// Install a plugin from an on-disk source directory: load and
    /// validate it, reject if a plugin with this id is already installed,
    /// copy it into the managed plugins directory, then re-load from
    /// there so `descriptor.path` always points at the managed copy.
    pub async fn install(&self, source_path: &std::path::Path) -> Result<PluginSummary, PluginError> {
        let loaded = plugin_loader::load_one(source_path)?;
        if self.plugins.read().await.contains_key(&loaded.id) {
            return Err(PluginError::AlreadyInstalled(loaded.id));
        }

        let dest = self.plugins_dir.join(&loaded.id);
        copy_dir_recursive(source_path, &dest)?;
        let descriptor = plugin_loader::load_one(&dest)?;

        let manifest_json = serde_json::to_string(&descriptor.manifest)?;
        self.storage
            .plugin_insert(
                descriptor.id.clone(),
                descriptor.name.clone(),
                descriptor.version.to_string(),
                manifest_json,
                true,
            )
            .await?;
        for ds in &descriptor.manifest.capabilities.data_sources {
            self.storage
                .sync_state_get_or_create(&descriptor.id, &ds.item.id)
                .await?;
        }

        self.permissions
            .write()
            .await
            .insert(descriptor.id.clone(), descriptor.permissions.clone());
        let summary = PluginSummary {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            version: descriptor.version.to_string(),
            status: PluginStatus::Installed,
            error: None,
        };
        self.plugins.write().await.insert(
            descriptor.id.clone(),
            ManagedPlugin {
                descriptor: Some(descriptor),
                status: PluginStatus::Installed,
                error: None,
                last_accessed: 0,
            },
        );
        info!(plugin_id = %summary.id, "plugin installed");
        Ok(summary)
    }

    /// Re-validates the stored manifest's permissions before flipping the
    /// row to enabled. A permission-validation failure fails the enable
    /// and leaves status unchanged, per spec.md §4.E.
    pub async fn enable(&self, plugin_id: &str) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write().await;
        let managed = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::NotInstalled(plugin_id.to_string()))?;
        let Some(descriptor) = managed.descriptor.as_ref() else {
            return Err(PluginError::InError(
                plugin_id.to_string(),
                managed.error.clone().unwrap_or_default(),
            ));
        };
        manifest::validate(&descriptor.manifest).map_err(manifest::ManifestError::Invalid)?;

        self.storage.plugin_set_enabled(plugin_id, true).await?;
        managed.status = PluginStatus::Installed;
        managed.error = None;
        info!(plugin_id, "plugin enabled");
        Ok(())
    }

    pub async fn disable(&self, plugin_id: &str) -> Result<(), PluginError> {
        if !self.plugins.read().await.contains_key(plugin_id) {
            return Err(PluginError::NotInstalled(plugin_id.to_string()));
        }
        self.storage.plugin_set_enabled(plugin_id, false).await?;
        if let Some(mut sandbox) = self.pool.lock().await.remove(plugin_id) {
            sandbox.dispose();
        }
        let mut plugins = self.plugins.write().await;
        if let Some(managed) = plugins.get_mut(plugin_id) {
            managed.status = PluginStatus::Disabled;
        }
        info!(plugin_id, "plugin disabled");
        Ok(())
    }

    /// Disposes the sandbox, deletes inbox/sync-state rows and the plugin
    /// row (the `ON DELETE CASCADE` FKs do the cascading), removes the
    /// on-disk directory, and forgets the descriptor.
    pub async fn uninstall(&self, plugin_id: &str) -> Result<(), PluginError> {
        let path = {
            let mut plugins = self.plugins.write().await;
            let managed = plugins
                .remove(plugin_id)
                .ok_or_else(|| PluginError::NotInstalled(plugin_id.to_string()))?;
            managed.descriptor.map(|d| d.path)
        };
        if let Some(mut sandbox) = self.pool.lock().await.remove(plugin_id) {
            sandbox.dispose();
        }
        self.permissions.write().await.remove(plugin_id);
        self.storage.plugin_delete(plugin_id).await?;
        if let Some(path) = path {
            if path.exists() {
                std::fs::remove_dir_all(&path)?;
            }
        }
        info!(plugin_id, "plugin uninstalled");
        Ok(())
    }

    pub async fn list(&self) -> Vec<PluginSummary> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|(id, managed)| PluginSummary {
                id: id.clone(),
                name: managed
                    .descriptor
                    .as_ref()
                    .map(|d| d.name.clone())
                    .unwrap_or_else(|| id.clone()),
                version: managed
                    .descriptor
                    .as_ref()
                    .map(|d| d.version.to_string())
                    .unwrap_or_default(),
                status: managed.status,
                error: managed.error.clone(),
            })
            .collect()
    }

    pub async fn is_enabled(&self, plugin_id: &str) -> bool {
        self.plugins
            .read()
            .await
            .get(plugin_id)
            .map(|m| !matches!(m.status, PluginStatus::Disabled | PluginStatus::Error))
            .unwrap_or(false)
    }

    pub async fn manifest(&self, plugin_id: &str) -> Option<Manifest> {
        self.plugins
            .read()
            .await
            .get(plugin_id)
            .and_then(|m| m.descriptor.as_ref().map(|d| d.manifest.clone()))
    }

    /// Verify the capability is declared, obtain a sandbox (lazily
    /// creating and evicting per the LRU pool), invoke it, and bump
    /// `lastAccessed` — exactly spec.md §4.E's dispatch contract, unified
    /// behind one typed `Invocation` rather than three near-duplicate
    /// string-keyed methods.
    pub async fn invoke(&self, plugin_id: &str, invocation: Invocation) -> Result<serde_json::Value, PluginError> {
        let descriptor = self.require_dispatchable(plugin_id, &invocation).await?;
        let function_name = invocation.function_name();
        let args_json = serde_json::to_string(&invocation.args())?;
        let access = self.next_access();

        let mut pool = self.pool.lock().await;
        if !pool.contains(plugin_id) {
            if let Some(evicted) = pool.make_room() {
                debug!(plugin_id = %evicted, "evicted sandbox to make room in the pool");
            }
            let sandbox = self.create_sandbox(&descriptor).await?;
            pool.insert(plugin_id.to_string(), sandbox);
        }
        let sandbox = pool
            .get_mut(plugin_id)
            .expect("sandbox was just inserted or already present");
        sandbox.last_accessed = access;
        let result = sandbox.invoke(function_name, args_json).await;
        drop(pool);

        match result {
            Ok(value) => {
                self.touch(plugin_id, access).await;
                Ok(value)
            }
            Err(err) => {
                self.set_error(plugin_id, err.to_string()).await;
                Err(PluginError::Sandbox(err))
            }
        }
    }

    pub async fn call_data_source(
        &self,
        plugin_id: &str,
        data_source_id: &str,
    ) -> Result<serde_json::Value, PluginError> {
        self.invoke(plugin_id, Invocation::DataSourceSync(data_source_id.to_string()))
            .await
    }

    pub async fn call_action(
        &self,
        plugin_id: &str,
        action_id: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, PluginError> {
        self.invoke(
            plugin_id,
            Invocation::Action { id: action_id.to_string(), args },
        )
        .await
    }

    pub async fn call_ai_pipeline(
        &self,
        plugin_id: &str,
        pipeline_id: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, PluginError> {
        self.invoke(
            plugin_id,
            Invocation::AiPipeline { id: pipeline_id.to_string(), args },
        )
        .await
    }

    async fn require_dispatchable(
        &self,
        plugin_id: &str,
        invocation: &Invocation,
    ) -> Result<PluginDescriptor, PluginError> {
        let plugins = self.plugins.read().await;
        let managed = plugins
            .get(plugin_id)
            .ok_or_else(|| PluginError::NotInstalled(plugin_id.to_string()))?;
        match managed.status {
            PluginStatus::Disabled => return Err(PluginError::Disabled(plugin_id.to_string())),
            PluginStatus::Error => {
                return Err(PluginError::InError(
                    plugin_id.to_string(),
                    managed.error.clone().unwrap_or_default(),
                ))
            }
            PluginStatus::Installed | PluginStatus::Active => {}
        }
        let descriptor = managed
            .descriptor
            .as_ref()
            .ok_or_else(|| PluginError::InError(plugin_id.to_string(), "no usable descriptor".to_string()))?;
        if !invocation.declared_in(&descriptor.manifest) {
            return Err(PluginError::CapabilityNotDeclared(
                invocation.capability_label(),
                plugin_id.to_string(),
            ));
        }
        Ok(descriptor.clone())
    }

    async fn create_sandbox(&self, descriptor: &PluginDescriptor) -> Result<Sandbox, PluginError> {
        let mut sandbox = Sandbox::new(descriptor.id.clone(), self.bridge.clone(), self.sandbox_config.clone());
        sandbox.initialize().await?;
        for source in descriptor.entry_points.values() {
            sandbox.eval(source.clone()).await?;
        }
        Ok(sandbox)
    }

    async fn touch(&self, plugin_id: &str, access: u64) {
        let mut plugins = self.plugins.write().await;
        if let Some(managed) = plugins.get_mut(plugin_id) {
            managed.last_accessed = access;
            if managed.status != PluginStatus::Disabled {
                managed.status = PluginStatus::Active;
            }
        }
    }

    async fn set_error(&self, plugin_id: &str, message: String) {
        let mut plugins = self.plugins.write().await;
        if let Some(managed) = plugins.get_mut(plugin_id) {
            managed.status = PluginStatus::Error;
            managed.error = Some(message);
        }
    }

    /// Disposes every live sandbox. Called once, as the third step of
    /// `Runtime::shutdown`.
    pub async fn dispose_all(&self) {
        self.pool.lock().await.dispose_all();
    }
}

fn copy_dir_recursive(src: &std::path::Path, dst: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            std::fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_functions::HostFunctions;
    use crate::ai::{MockProvider, Router};
    use crate::events::EventBus;
    use std::sync::Arc;
    use tokio::sync::RwLock as TokioRwLock;

    async fn manager(plugins_dir: PathBuf) -> PluginManager {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        let events = EventBus::new();
        let router = Arc::new(Router::new(Arc::new(MockProvider::new())));
        let permissions: PermissionRegistry = Arc::new(TokioRwLock::new(HashMap::new()));
        let bridge = Arc::new(HostFunctions::new(storage.clone(), events, router, permissions.clone()));
        PluginManager::new(storage, bridge, permissions, plugins_dir, SandboxConfig::default(), 10)
    }

    fn write_plugin(dir: &std::path::Path, id: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let manifest = serde_json::json!({
            "id": id,
            "name": "Gmail",
            "version": "1.0.0",
            "description": "syncs gmail",
            "author": {"name": "acme"},
            "capabilities": {
                "dataSources": [{"id": "emails", "name": "Emails", "entryPoint": "sync.js"}]
            }
        });
        std::fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
        std::fs::write(dir.join("sync.js"), "function sync() { return { itemsSynced: 2 }; }").unwrap();
    }

    #[tokio::test]
    async fn initialize_discovers_and_registers_on_disk_plugins() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins_dir = tmp.path().join("plugins");
        write_plugin(&plugins_dir.join("gmail"), "gmail");

        let mgr = manager(plugins_dir).await;
        mgr.initialize().await.unwrap();

        let list = mgr.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "gmail");
        assert_eq!(list[0].status, PluginStatus::Installed);
    }

    #[tokio::test]
    async fn dispatch_rejects_undeclared_capability() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins_dir = tmp.path().join("plugins");
        write_plugin(&plugins_dir.join("gmail"), "gmail");

        let mgr = manager(plugins_dir).await;
        mgr.initialize().await.unwrap();

        let err = mgr.call_action("gmail", "not-declared", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, PluginError::CapabilityNotDeclared(_, _)));
    }

    #[tokio::test]
    async fn dispatch_invokes_sync_entry_point() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins_dir = tmp.path().join("plugins");
        write_plugin(&plugins_dir.join("gmail"), "gmail");

        let mgr = manager(plugins_dir).await;
        mgr.initialize().await.unwrap();

        let result = mgr.call_data_source("gmail", "emails").await.unwrap();
        assert_eq!(result["itemsSynced"], 2);
    }

    #[tokio::test]
    async fn disable_then_dispatch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins_dir = tmp.path().join("plugins");
        write_plugin(&plugins_dir.join("gmail"), "gmail");

        let mgr = manager(plugins_dir).await;
        mgr.initialize().await.unwrap();
        mgr.disable("gmail").await.unwrap();

        let err = mgr.call_data_source("gmail", "emails").await.unwrap_err();
        assert!(matches!(err, PluginError::Disabled(_)));
    }

    #[tokio::test]
    async fn uninstall_removes_directory_and_row() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins_dir = tmp.path().join("plugins");
        write_plugin(&plugins_dir.join("gmail"), "gmail");

        let mgr = manager(plugins_dir.clone()).await;
        mgr.initialize().await.unwrap();
        mgr.uninstall("gmail").await.unwrap();

        assert!(mgr.list().await.is_empty());
        assert!(!plugins_dir.join("gmail").exists());
    }
}
