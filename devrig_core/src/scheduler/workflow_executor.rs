//! The calling seam the trigger scheduler fires into. Not a DAG
//! interpreter — graph traversal, node execution, and conditional
//! branching are out of scope (spec.md §1/§12); this trait exists so the
//! scheduler has something concrete to call and something concrete to
//! replace once a real executor exists.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Schedule,
    Manual,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("workflow execution failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn execute(&self, workflow_id: &str, trigger: TriggerKind) -> Result<(), ExecutorError>;
}

/// Records that a trigger fired without attempting any real graph
/// traversal. Used until a real executor is wired in.
pub struct NoopExecutor;

#[async_trait]
impl WorkflowExecutor for NoopExecutor {
    async fn execute(&self, workflow_id: &str, trigger: TriggerKind) -> Result<(), ExecutorError> {
        tracing::debug!(workflow_id, ?trigger, "noop executor invoked, skipping graph traversal");
        Ok(())
    }
}
