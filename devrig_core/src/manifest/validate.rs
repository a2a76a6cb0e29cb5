//! Structural validation rules for a parsed manifest, per spec.md §4.B.

use lazy_static::lazy_static;
use regex::Regex;

use super::schema::Manifest;

const MAX_SECRET_KEYS: usize = 20;
const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;
const ALLOWED_FS_ROOT: &str = "/tmp/";

/// A declared filesystem permission must live under `/tmp/` or be (or be
/// rooted under) the `__PLUGIN_DATA__` sentinel the host resolves to the
/// plugin's private data directory — anything else escapes the allowed
/// roots per spec.md §4.B.
fn is_under_allowed_root(path: &str) -> bool {
    path.starts_with(ALLOWED_FS_ROOT) || path.starts_with(super::permissions::PLUGIN_DATA_SENTINEL)
}

lazy_static! {
    static ref ID_RE: Regex = Regex::new(r"^[a-z][a-z0-9-]{1,62}[a-z0-9]$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A network permission entry of `*` or `*.*` grants unrestricted
    /// outbound access. Not rejected, but worth surfacing to whoever is
    /// installing the plugin.
    BroadNetworkWildcard(String),
}

/// Validate a manifest's structure and cross-references. Returns the list
/// of non-fatal warnings on success, or a message describing the first
/// fatal problem found.
pub fn validate(manifest: &Manifest) -> Result<Vec<ValidationWarning>, String> {
    if !ID_RE.is_match(&manifest.id) {
        return Err(format!(
            "plugin id '{}' must match {}",
            manifest.id,
            ID_RE.as_str()
        ));
    }
    if manifest.name.is_empty() || manifest.name.len() > MAX_NAME_LEN {
        return Err(format!(
            "plugin name must be 1-{MAX_NAME_LEN} characters, got {}",
            manifest.name.len()
        ));
    }
    if manifest.description.len() > MAX_DESCRIPTION_LEN {
        return Err(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        ));
    }

    if manifest.permissions.secrets.len() > MAX_SECRET_KEYS {
        return Err(format!(
            "manifest declares {} secret keys, exceeding the cap of {MAX_SECRET_KEYS}",
            manifest.permissions.secrets.len()
        ));
    }

    for entry in &manifest.permissions.network {
        if entry.trim().is_empty() {
            return Err("network permission entries must not be empty strings".to_string());
        }
    }

    for path in &manifest.permissions.filesystem {
        if path.contains("..") || !is_under_allowed_root(path) {
            return Err(format!(
                "filesystem permission '{path}' escapes the plugin's allowed roots ({} or {})",
                ALLOWED_FS_ROOT,
                super::permissions::PLUGIN_DATA_SENTINEL
            ));
        }
    }

    let all_ids = collect_capability_ids(manifest);
    let mut seen = std::collections::HashSet::new();
    for id in &all_ids {
        if !seen.insert(id.as_str()) {
            return Err(format!("duplicate capability id '{id}'"));
        }
    }

    for entry_point in manifest.entry_points() {
        if entry_point.trim().is_empty() {
            return Err("capability entryPoint must not be empty".to_string());
        }
    }

    let mut warnings = Vec::new();
    for entry in &manifest.permissions.network {
        if entry == "*" || entry == "*.*" {
            warnings.push(ValidationWarning::BroadNetworkWildcard(entry.clone()));
        }
    }

    Ok(warnings)
}

fn collect_capability_ids(manifest: &Manifest) -> Vec<String> {
    let caps = &manifest.capabilities;
    caps.data_sources
        .iter()
        .map(|d| d.item.id.clone())
        .chain(caps.actions.iter().map(|a| a.item.id.clone()))
        .chain(caps.ai_pipelines.iter().map(|p| p.item.id.clone()))
        .chain(caps.views.iter().map(|v| v.item.id.clone()))
        .chain(caps.flow_nodes.iter().map(|f| f.item.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Auth, AuthType, Author, Capabilities, Permissions};
    use semver::Version;

    fn base_manifest() -> Manifest {
        Manifest {
            id: "gmail-cockpit".to_string(),
            name: "Gmail Cockpit".to_string(),
            version: Version::new(1, 0, 0),
            description: "Syncs gmail into the inbox".to_string(),
            author: Author {
                name: "acme".to_string(),
                email: None,
                url: None,
            },
            icon: None,
            homepage: None,
            repository: None,
            min_app_version: None,
            max_app_version: None,
            auth: Auth {
                auth_type: AuthType::Oauth,
                provider_id: None,
            },
            permissions: Permissions::default(),
            capabilities: Capabilities::default(),
        }
    }

    #[test]
    fn rejects_bad_id() {
        let mut m = base_manifest();
        m.id = "Gmail_Cockpit".to_string();
        assert!(validate(&m).is_err());
    }

    #[test]
    fn rejects_too_many_secrets() {
        let mut m = base_manifest();
        m.permissions.secrets = (0..21).map(|i| format!("key-{i}")).collect();
        assert!(validate(&m).is_err());
    }

    #[test]
    fn warns_but_accepts_broad_wildcard() {
        let mut m = base_manifest();
        m.permissions.network = vec!["*".to_string()];
        let warnings = validate(&m).unwrap();
        assert_eq!(
            warnings,
            vec![ValidationWarning::BroadNetworkWildcard("*".to_string())]
        );
    }

    #[test]
    fn rejects_path_traversal() {
        let mut m = base_manifest();
        m.permissions.filesystem = vec!["../secrets".to_string()];
        assert!(validate(&m).is_err());
    }

    #[test]
    fn rejects_filesystem_path_outside_allowed_roots() {
        let mut m = base_manifest();
        m.permissions.filesystem = vec!["/home/user/Documents".to_string()];
        assert!(validate(&m).is_err());
    }

    #[test]
    fn accepts_filesystem_paths_under_allowed_roots() {
        let mut m = base_manifest();
        m.permissions.filesystem = vec!["/tmp/gmail-cockpit".to_string(), "__PLUGIN_DATA__/cache".to_string()];
        assert!(validate(&m).is_ok());
    }
}
