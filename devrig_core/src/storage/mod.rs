//! Embedded relational storage substrate (spec.md §4.A): an
//! write-ahead-logged sqlite database fronted by `rusqlite`'s built-in
//! statement cache, backing the inbox, plugin/sync state, AI ledger, and
//! workflow graph.

mod ai_operation_repo;
mod conn;
mod error;
mod inbox_repo;
mod migrations;
mod models;
mod plugin_repo;
mod secret_repo;
mod setting_repo;
mod sync_state_repo;
mod workflow_repo;

pub use ai_operation_repo::{PluginUsage, ProviderUsage};
pub use conn::Storage;
pub use error::{translate_unique_violation, Result, StorageError};
pub use inbox_repo::{InboxFilter, UpsertOutcome};
pub use models::{
    new_id, now_ms, AiOperation, Execution, ExecutionStatus, ExecutionStep, FlowEdge, FlowNode,
    InboxItem, InboxItemInput, InboxStatus, Plugin, PluginSyncState, Secret, SecretSummary,
    SyncStatus, Workflow, Workspace,
};
