use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox has already been disposed")]
    Disposed,
    #[error("sandbox has not been initialized")]
    NotInitialized,
    #[error("guest evaluation exceeded its 5s timeout")]
    Timeout,
    #[error("invalid guest function name '{0}'")]
    InvalidFunctionName(String),
    #[error("guest function '{0}' is not defined")]
    FunctionNotFound(String),
    #[error("guest evaluation failed: {0}")]
    Eval(String),
    #[error("guest call arguments or result were not valid JSON: {0}")]
    Marshal(#[from] serde_json::Error),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("host call failed: {0}")]
    HostCall(String),
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::Disposed => ErrorKind::SandboxDisposed,
            SandboxError::NotInitialized => ErrorKind::NotInitialized,
            SandboxError::Timeout => ErrorKind::Timeout,
            SandboxError::InvalidFunctionName(_) => ErrorKind::Validation,
            SandboxError::FunctionNotFound(_) => ErrorKind::NotFound,
            SandboxError::Eval(_) => ErrorKind::Internal,
            SandboxError::Marshal(_) => ErrorKind::Validation,
            SandboxError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SandboxError::HostCall(_) => ErrorKind::Internal,
        }
    }
}
