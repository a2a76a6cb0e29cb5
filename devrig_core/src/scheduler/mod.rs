//! Periodic dispatchers that drive plugin sync entry points and
//! schedule-triggered workflow runs (spec.md §4.G, §4.H).

mod error;
mod sync;
mod trigger;
mod workflow_executor;

pub use error::SchedulerError;
pub use sync::SyncScheduler;
pub use trigger::TriggerScheduler;
pub use workflow_executor::{ExecutorError, NoopExecutor, TriggerKind, WorkflowExecutor};
