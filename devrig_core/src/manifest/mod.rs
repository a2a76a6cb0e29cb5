//! Manifest parsing, validation, and the permission model that guards
//! every host function call (spec.md §4.B).

mod permissions;
mod schema;
mod validate;

pub use permissions::PermissionGuard;
pub use schema::{
    Action, ActionParam, AiPipeline, AiPipelineTrigger, Auth, AuthType, Author, Capabilities,
    CapabilityItem, DataSource, FlowNodeCapability, FlowNodeType, Manifest, ParamType, Permissions,
    View, ViewTarget,
};
pub use validate::{validate, ValidationWarning};

use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("manifest failed validation: {0}")]
    Invalid(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl ManifestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManifestError::Parse(_) | ManifestError::Invalid(_) => ErrorKind::Validation,
            ManifestError::PermissionDenied(_) => ErrorKind::PermissionDenied,
        }
    }
}

/// Parse a manifest from its JSON source, then run structural validation.
///
/// Returns the parsed manifest plus any non-fatal warnings (e.g. a
/// `*`/`*.*` network wildcard). Validation failures are fatal and surface
/// as `ManifestError::Invalid`.
pub fn parse(json_source: &str) -> Result<(Manifest, Vec<ValidationWarning>), ManifestError> {
    let manifest: Manifest = serde_json::from_str(json_source)?;
    let warnings = validate::validate(&manifest).map_err(ManifestError::Invalid)?;
    Ok((manifest, warnings))
}
