//! Bridge from sandbox host calls into storage, secrets, AI, and the event
//! bus, with per-plugin permission gating (spec.md §4.F).
//!
//! Every gated call checks permissions *before* touching storage, network,
//! or the AI provider (spec.md §8 property 6) — the `PermissionGuard`
//! lookup always happens first in each method body below.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::ai::{Router, TaskType};
use crate::events::{DevrigEvent, EventBus};
use crate::manifest::PermissionGuard;
use crate::sandbox::{HostBridge, SandboxError};
use crate::storage::{AiOperation, InboxFilter, InboxItemInput, Storage};

/// Shared, mutable view of every live plugin's declared permissions,
/// updated by the plugin manager on install/enable/disable/uninstall and
/// read by `HostFunctions` on every gated call.
pub type PermissionRegistry = Arc<RwLock<HashMap<String, PermissionGuard>>>;

pub struct HostFunctions {
    storage: Arc<Storage>,
    events: EventBus,
    router: Arc<Router>,
    permissions: PermissionRegistry,
}

impl HostFunctions {
    pub fn new(storage: Arc<Storage>, events: EventBus, router: Arc<Router>, permissions: PermissionRegistry) -> Self {
        Self { storage, events, router, permissions }
    }

    async fn guard_for(&self, plugin_id: &str) -> Result<PermissionGuard, SandboxError> {
        self.permissions
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| SandboxError::PermissionDenied(format!("unknown plugin '{plugin_id}'")))
    }
}

#[async_trait]
impl HostBridge for HostFunctions {
    async fn fetch(&self, plugin_id: &str, url: &str, opts: Value) -> Result<Value, SandboxError> {
        let guard = self.guard_for(plugin_id).await?;
        if !guard.allows_url(url) {
            return Err(SandboxError::PermissionDenied(format!(
                "Network access denied for URL: {url}"
            )));
        }

        let client = reqwest::Client::new();
        let method = opts
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let mut request = client.request(
            method.parse().map_err(|_| SandboxError::HostCall(format!("invalid method '{method}'")))?,
            url,
        );
        if let Some(headers) = opts.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }
        if let Some(body) = opts.get("body").and_then(Value::as_str) {
            request = request.body(body.to_string());
        }

        let response = request.send().await.map_err(|e| SandboxError::HostCall(e.to_string()))?;
        let status = response.status().as_u16();
        let status_text = response.status().canonical_reason().unwrap_or_default().to_string();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or_default().to_string())))
            .collect();
        let is_json = headers
            .get("content-type")
            .and_then(Value::as_str)
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        let text = response.text().await.map_err(|e| SandboxError::HostCall(e.to_string()))?;
        let body = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(serde_json::json!({
            "status": status,
            "statusText": status_text,
            "headers": headers,
            "body": body,
        }))
    }

    async fn get_secret(&self, plugin_id: &str, key: &str) -> Result<Option<String>, SandboxError> {
        let guard = self.guard_for(plugin_id).await?;
        if !guard.allows_secret(key) {
            return Err(SandboxError::PermissionDenied(format!(
                "secret '{key}' is not declared by this plugin"
            )));
        }
        let namespaced = format!("{plugin_id}.{key}");
        let secret = self
            .storage
            .secret_get_by_name(&namespaced)
            .await
            .map_err(|e| SandboxError::HostCall(e.to_string()))?;
        Ok(secret.map(|s| s.encrypted_value))
    }

    async fn store_items(&self, plugin_id: &str, items: Value) -> Result<(), SandboxError> {
        let inputs: Vec<InboxItemInput> = serde_json::from_value(items)?;
        self.storage
            .inbox_upsert_batch(plugin_id, inputs)
            .await
            .map_err(|e| SandboxError::HostCall(e.to_string()))?;
        self.events.publish(DevrigEvent::InboxUpdated { unsnoozed: 0 });
        Ok(())
    }

    async fn query_items(&self, plugin_id: &str, filter: Value) -> Result<Value, SandboxError> {
        let filter: InboxFilter = serde_json::from_value(filter).unwrap_or_default();
        let items = self
            .storage
            .inbox_query(plugin_id, filter)
            .await
            .map_err(|e| SandboxError::HostCall(e.to_string()))?;
        Ok(serde_json::to_value(items)?)
    }

    async fn mark_read(&self, plugin_id: &str, ids: Value) -> Result<(), SandboxError> {
        let ids: Vec<String> = serde_json::from_value(ids)?;
        self.storage
            .inbox_mark_read(plugin_id, ids)
            .await
            .map_err(|e| SandboxError::HostCall(e.to_string()))?;
        Ok(())
    }

    async fn archive(&self, plugin_id: &str, ids: Value) -> Result<(), SandboxError> {
        let ids: Vec<String> = serde_json::from_value(ids)?;
        self.storage
            .inbox_archive(plugin_id, ids)
            .await
            .map_err(|e| SandboxError::HostCall(e.to_string()))?;
        Ok(())
    }

    async fn request_ai(&self, plugin_id: &str, op: &str, params: Value) -> Result<Value, SandboxError> {
        let guard = self.guard_for(plugin_id).await?;
        if !guard.allows_ai() {
            return Err(SandboxError::PermissionDenied(
                "this plugin does not declare ai permission".to_string(),
            ));
        }
        let task = match op {
            "classify" => TaskType::Classify,
            "summarize" => TaskType::Summarize,
            "draft" => TaskType::Draft,
            "complete" => TaskType::Complete,
            other => return Err(SandboxError::HostCall(format!("unknown AI operation '{other}'"))),
        };
        let response = self
            .router
            .complete_with_fallback(task, params)
            .await
            .map_err(|e| SandboxError::HostCall(e.to_string()))?;

        let route = self.router.resolve(task).unwrap_or(crate::ai::Route {
            provider_id: "unknown".to_string(),
            model_id: "unknown".to_string(),
        });
        let operation = AiOperation {
            id: String::new(),
            provider: route.provider_id,
            model: route.model_id,
            operation: op.to_string(),
            plugin_id: Some(plugin_id.to_string()),
            pipeline_id: None,
            inbox_item_id: None,
            execution_id: None,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost_usd: response.cost_usd,
            duration_ms: Some(response.duration_ms),
            created_at: 0,
        };
        if let Err(e) = self.storage.ai_operation_insert(operation).await {
            warn!(plugin_id, error = %e, "failed to record AI ledger row");
        }

        Ok(response.output)
    }

    fn emit_event(&self, plugin_id: &str, name: &str, data: Value) {
        self.events.publish(DevrigEvent::PluginEmitted {
            plugin_id: plugin_id.to_string(),
            name: name.to_string(),
            data,
        });
    }

    fn log(&self, plugin_id: &str, level: &str, message: &str) {
        match level {
            "debug" => tracing::debug!(plugin_id, "{message}"),
            "warn" => tracing::warn!(plugin_id, "{message}"),
            "error" => tracing::error!(plugin_id, "{message}"),
            _ => info!(plugin_id, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockProvider;
    use crate::manifest::Permissions;

    async fn host_functions() -> (HostFunctions, PermissionRegistry) {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        let events = EventBus::new();
        let router = Arc::new(Router::new(Arc::new(MockProvider::new())));
        let permissions: PermissionRegistry = Arc::new(RwLock::new(HashMap::new()));
        (
            HostFunctions::new(storage, events, router, permissions.clone()),
            permissions,
        )
    }

    #[tokio::test]
    async fn fetch_is_denied_without_matching_allowlist_entry() {
        let (hf, permissions) = host_functions().await;
        permissions.write().await.insert(
            "gmail".to_string(),
            PermissionGuard::new(&Permissions {
                network: vec!["api.github.com".to_string()],
                ..Default::default()
            }),
        );

        let err = hf.fetch("gmail", "https://evil.com/x", Value::Null).await.unwrap_err();
        assert!(matches!(err, SandboxError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn get_secret_denied_when_not_declared() {
        let (hf, permissions) = host_functions().await;
        permissions.write().await.insert("gmail".to_string(), PermissionGuard::new(&Permissions::default()));

        let err = hf.get_secret("gmail", "api_key").await.unwrap_err();
        assert!(matches!(err, SandboxError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn store_and_query_items_round_trip() {
        let (hf, permissions) = host_functions().await;
        permissions.write().await.insert("gmail".to_string(), PermissionGuard::new(&Permissions::default()));
        hf.storage
            .plugin_insert("gmail".into(), "gmail".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();

        let items = serde_json::json!([{
            "externalId": "e1",
            "type": "email",
            "title": "Hi",
            "sourceUrl": "https://mail.google.com/x",
            "isActionable": true,
            "externalCreatedAt": 1_700_000_000,
        }]);
        hf.store_items("gmail", items).await.unwrap();

        let result = hf.query_items("gmail", Value::Null).await.unwrap();
        let items = result.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["external_id"], "e1");
        assert_eq!(items[0]["source_url"], "https://mail.google.com/x");
        assert_eq!(items[0]["is_actionable"], true);
        assert_eq!(items[0]["external_created_at"], 1_700_000_000);
    }
}
