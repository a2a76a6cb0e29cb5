//! The seam a sandbox calls back through. Concrete permission checks and
//! storage/network/AI plumbing live in `crate::host_functions`; this trait
//! only fixes the boundary shape so the sandbox engine can stay ignorant
//! of everything on the other side of it.

use async_trait::async_trait;
use serde_json::Value;

use super::error::SandboxError;

#[async_trait]
pub trait HostBridge: Send + Sync {
    async fn fetch(&self, plugin_id: &str, url: &str, opts: Value) -> Result<Value, SandboxError>;
    async fn get_secret(&self, plugin_id: &str, key: &str) -> Result<Option<String>, SandboxError>;
    async fn store_items(&self, plugin_id: &str, items: Value) -> Result<(), SandboxError>;
    async fn query_items(&self, plugin_id: &str, filter: Value) -> Result<Value, SandboxError>;
    async fn mark_read(&self, plugin_id: &str, ids: Value) -> Result<(), SandboxError>;
    async fn archive(&self, plugin_id: &str, ids: Value) -> Result<(), SandboxError>;
    async fn request_ai(&self, plugin_id: &str, op: &str, params: Value) -> Result<Value, SandboxError>;
    fn emit_event(&self, plugin_id: &str, name: &str, data: Value);
    /// `log` never errors and is never gated; level is clamped and the
    /// message truncated by the caller before this is invoked.
    fn log(&self, plugin_id: &str, level: &str, message: &str);
}
