use crate::error::ErrorKind;
use crate::plugin_manager::PluginError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),
    #[error("plugin '{0}' has no registered data source '{1}'")]
    UnknownDataSource(String, String),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Storage(e) => e.kind(),
            SchedulerError::Plugin(e) => e.kind(),
            SchedulerError::UnknownWorkflow(_) => ErrorKind::NotFound,
            SchedulerError::UnknownDataSource(_, _) => ErrorKind::NotFound,
        }
    }
}
