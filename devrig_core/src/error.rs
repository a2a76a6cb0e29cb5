//! Crate-wide error taxonomy.
//!
//! Each subsystem defines its own `thiserror` enum; this module composes
//! them into a single `DevrigError` so callers one layer up (the CLI, a
//! future IPC boundary) have one type to match on. Internal code should
//! keep propagating the specific subsystem error with `?` and let `From`
//! do the conversion at the seam where it actually needs to widen.

use thiserror::Error;

use crate::ai::ProviderError;
use crate::manifest::ManifestError;
use crate::plugin_loader::LoaderError;
use crate::plugin_manager::PluginError;
use crate::sandbox::SandboxError;
use crate::scheduler::SchedulerError;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, DevrigError>;

/// Stable error kind tags mirrored across every variant below, so an IPC
/// boundary can report `{error, code}` without inspecting the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    PermissionDenied,
    SandboxDisposed,
    NotInitialized,
    Timeout,
    Provider,
    StorageBusy,
    ConstraintViolation,
    Internal,
}

#[derive(Debug, Error)]
pub enum DevrigError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl DevrigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DevrigError::Storage(e) => e.kind(),
            DevrigError::Manifest(_) => ErrorKind::Validation,
            DevrigError::Loader(_) => ErrorKind::Internal,
            DevrigError::Sandbox(e) => e.kind(),
            DevrigError::Plugin(e) => e.kind(),
            DevrigError::Provider(e) => ErrorKind::Provider,
            DevrigError::Scheduler(_) => ErrorKind::Internal,
            DevrigError::Validation(_) => ErrorKind::Validation,
            DevrigError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}
