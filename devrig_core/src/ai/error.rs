use crate::error::ErrorKind;

/// Provider-agnostic error taxonomy, per spec.md §4.I. Every concrete
/// `AiProvider` implementation maps its own wire errors into one of these
/// kinds rather than leaking vendor-specific error shapes upward.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("token limit exceeded")]
    TokenLimitExceeded,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("provider unavailable")]
    ProviderUnavailable,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("unknown provider error (http status {status:?}): {message}")]
    Unknown { status: Option<u16>, message: String },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Provider
    }

    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::AuthenticationFailed => false,
            ProviderError::TokenLimitExceeded => false,
            ProviderError::InvalidRequest(_) => false,
            ProviderError::ProviderUnavailable => true,
            ProviderError::NetworkError(_) => true,
            ProviderError::Unknown { status, .. } => status.map(|s| s >= 500).unwrap_or(false),
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_retryable_only_on_server_errors() {
        assert!(ProviderError::Unknown { status: Some(503), message: "x".into() }.retryable());
        assert!(!ProviderError::Unknown { status: Some(400), message: "x".into() }.retryable());
        assert!(!ProviderError::Unknown { status: None, message: "x".into() }.retryable());
    }
}
