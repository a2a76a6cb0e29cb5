//! Row types shared by every repository. All timestamps are epoch-ms
//! (`i64`), matching spec.md §3. All ids are opaque 22+-char strings,
//! generated from a v4 UUID with no dashes (32 hex chars).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new opaque, collision-resistant id.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub id: String,
    pub name: String,
    pub version: String,
    pub manifest_json: String,
    pub enabled: bool,
    pub installed_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SyncStatus::Idle),
            "syncing" => Some(SyncStatus::Syncing),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSyncState {
    pub plugin_id: String,
    pub data_source_id: String,
    pub last_sync_at: Option<i64>,
    pub sync_cursor: Option<String>,
    pub sync_status: SyncStatus,
    pub error: Option<String>,
    pub items_synced: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Unread,
    Read,
    Archived,
    Snoozed,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Unread => "unread",
            InboxStatus::Read => "read",
            InboxStatus::Archived => "archived",
            InboxStatus::Snoozed => "snoozed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(InboxStatus::Unread),
            "read" => Some(InboxStatus::Read),
            "archived" => Some(InboxStatus::Archived),
            "snoozed" => Some(InboxStatus::Snoozed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxItem {
    pub id: String,
    pub plugin_id: String,
    pub external_id: String,
    pub item_type: String,
    pub title: String,
    pub body: Option<String>,
    pub preview: Option<String>,
    pub source_url: Option<String>,
    pub priority: i64,
    pub status: InboxStatus,
    pub ai_classification: Option<serde_json::Value>,
    pub ai_summary: Option<String>,
    pub ai_draft: Option<String>,
    pub metadata: serde_json::Value,
    pub is_actionable: bool,
    pub snoozed_until: Option<i64>,
    pub external_created_at: Option<i64>,
    pub synced_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Shape a guest plugin submits to `storeItems`, before coercion into an
/// `InboxItem` row (see `host_functions::items`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItemInput {
    pub id: Option<String>,
    pub external_id: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    pub body: Option<String>,
    pub preview: Option<String>,
    pub source_url: Option<String>,
    #[serde(default)]
    pub priority: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub is_actionable: Option<bool>,
    pub external_created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiOperation {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub operation: String,
    pub plugin_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub inbox_item_id: Option<String>,
    pub execution_id: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub duration_ms: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    pub workflow_id: String,
    pub node_type: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEdge {
    pub id: String,
    pub workflow_id: String,
    pub source_node_id: String,
    pub target_node_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "succeeded" => Some(ExecutionStatus::Succeeded),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub trigger_kind: String,
    pub status: ExecutionStatus,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub status: ExecutionStatus,
    pub output: Option<serde_json::Value>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub error: Option<String>,
}

/// List view of a secret; never carries `encrypted_value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSummary {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,
    pub name: String,
    pub encrypted_value: String,
    pub provider: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Secret {
    pub fn summary(&self) -> SecretSummary {
        SecretSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            provider: self.provider.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
