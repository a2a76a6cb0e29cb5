use crate::error::ErrorKind;
use crate::manifest::ManifestError;
use crate::plugin_loader::LoaderError;
use crate::sandbox::SandboxError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin '{0}' is not installed")]
    NotInstalled(String),
    #[error("plugin '{0}' is already installed")]
    AlreadyInstalled(String),
    #[error("plugin '{0}' is disabled")]
    Disabled(String),
    #[error("plugin '{0}' is in an error state: {1}")]
    InError(String, String),
    #[error("capability '{0}' is not declared by plugin '{1}'")]
    CapabilityNotDeclared(String, String),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PluginError::NotInstalled(_) => ErrorKind::NotFound,
            PluginError::AlreadyInstalled(_) => ErrorKind::ConstraintViolation,
            PluginError::Disabled(_) => ErrorKind::PermissionDenied,
            PluginError::InError(_, _) => ErrorKind::Internal,
            PluginError::CapabilityNotDeclared(_, _) => ErrorKind::Validation,
            PluginError::Loader(e) => e.kind(),
            PluginError::Manifest(e) => e.kind(),
            PluginError::Sandbox(e) => e.kind(),
            PluginError::Storage(e) => e.kind(),
            PluginError::Serde(_) => ErrorKind::Validation,
            PluginError::Io(_) => ErrorKind::Internal,
        }
    }
}
