//! Plugin discovery off the filesystem (spec.md §4.C): scan a directory of
//! plugin subdirectories, parse and validate each manifest, and collect
//! entry-point source text with path-traversal defense.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::ErrorKind;
use crate::manifest::{self, Manifest, PermissionGuard};

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("missing manifest.json in {0}")]
    MissingManifest(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] manifest::ManifestError),
    #[error("entry point '{0}' resolves outside the plugin directory")]
    PathTraversal(String),
}

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoaderError::MissingManifest(_) => ErrorKind::NotFound,
            LoaderError::Io { .. } => ErrorKind::Internal,
            LoaderError::Manifest(e) => e.kind(),
            LoaderError::PathTraversal(_) => ErrorKind::Validation,
        }
    }
}

/// A fully loaded plugin, ready to be registered or installed.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub version: semver::Version,
    pub manifest: Manifest,
    pub path: PathBuf,
    pub permissions: PermissionGuard,
    /// filename -> source text, one entry per unique entry point.
    pub entry_points: BTreeMap<String, String>,
}

/// Scan `dir` one level deep; each subdirectory is a candidate plugin.
/// Per-plugin failures are logged and skipped; discovery itself never
/// fails wholesale.
pub fn discover(dir: &Path) -> Vec<Result<PluginDescriptor, LoaderError>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut results = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match load_one(&path) {
            Ok(descriptor) => results.push(Ok(descriptor)),
            Err(err) => {
                warn!(plugin_dir = %path.display(), error = %err, "skipping plugin during discovery");
                results.push(Err(err));
            }
        }
    }
    results
}

/// Load a single plugin from `dir`, which must directly contain
/// `manifest.json` plus any referenced entry-point source files.
pub fn load_one(dir: &Path) -> Result<PluginDescriptor, LoaderError> {
    let manifest_path = dir.join("manifest.json");
    if !manifest_path.exists() {
        return Err(LoaderError::MissingManifest(dir.to_path_buf()));
    }
    let manifest_json = std::fs::read_to_string(&manifest_path).map_err(|source| LoaderError::Io {
        path: manifest_path.clone(),
        source,
    })?;

    let manifest: Manifest = serde_json::from_str(&manifest_json)
        .map_err(|e| manifest::ManifestError::Invalid(e.to_string()))?;
    let warnings = manifest::validate(&manifest).map_err(manifest::ManifestError::Invalid)?;
    for w in &warnings {
        warn!(plugin_id = %manifest.id, warning = ?w, "manifest validation warning");
    }

    let permissions = PermissionGuard::new(&manifest.permissions);

    let mut entry_points = BTreeMap::new();
    for entry_point in manifest.entry_points() {
        if entry_points.contains_key(entry_point) {
            continue;
        }
        match resolve_entry_point(dir, entry_point) {
            Ok(Some(resolved)) => {
                let source = std::fs::read_to_string(&resolved).map_err(|source| LoaderError::Io {
                    path: resolved,
                    source,
                })?;
                entry_points.insert(entry_point.to_string(), source);
            }
            Ok(None) => {
                warn!(plugin_id = %manifest.id, entry_point, "entry point escapes plugin directory, omitting");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(PluginDescriptor {
        id: manifest.id.clone(),
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        manifest,
        path: dir.to_path_buf(),
        permissions,
        entry_points,
    })
}

/// Normalize `entry_point` relative to `base` and check it still resolves
/// under `base`. Returns `Ok(None)` (not an error) when the entry point
/// escapes, per spec.md's "silently omitted" traversal defense.
fn resolve_entry_point(base: &Path, entry_point: &str) -> Result<Option<PathBuf>, LoaderError> {
    let mut normalized = PathBuf::new();
    for component in Path::new(entry_point).components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Ok(None);
                }
            }
            Component::RootDir | Component::Prefix(_) => return Ok(None),
        }
    }
    let resolved = base.join(&normalized);
    if !resolved.starts_with(base) {
        return Ok(None);
    }
    Ok(Some(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(dir: &Path, id: &str) {
        let manifest = serde_json::json!({
            "id": id,
            "name": "Gmail",
            "version": "1.0.0",
            "description": "syncs gmail",
            "author": {"name": "acme"},
            "capabilities": {
                "dataSources": [
                    {"id": "emails", "name": "Emails", "entryPoint": "sync.js"}
                ]
            }
        });
        fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
        fs::write(dir.join("sync.js"), "function sync() { return []; }").unwrap();
    }

    #[test]
    fn loads_a_well_formed_plugin() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), "gmail");

        let descriptor = load_one(tmp.path()).unwrap();
        assert_eq!(descriptor.id, "gmail");
        assert_eq!(descriptor.entry_points.len(), 1);
        assert!(descriptor.entry_points.contains_key("sync.js"));
    }

    #[test]
    fn missing_manifest_errors() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(load_one(tmp.path()), Err(LoaderError::MissingManifest(_))));
    }

    #[test]
    fn traversal_entry_point_is_omitted_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = serde_json::json!({
            "id": "evil-plugin",
            "name": "Evil",
            "version": "1.0.0",
            "description": "tries to escape",
            "author": {"name": "acme"},
            "capabilities": {
                "actions": [
                    {"id": "leak", "name": "Leak", "entryPoint": "../../../etc/passwd"}
                ]
            }
        });
        fs::write(tmp.path().join("manifest.json"), manifest.to_string()).unwrap();

        let descriptor = load_one(tmp.path()).unwrap();
        assert!(descriptor.entry_points.is_empty());
    }

    #[test]
    fn discover_scans_one_level_and_skips_bad_plugins() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("gmail");
        fs::create_dir(&good).unwrap();
        write_manifest(&good, "gmail");

        let bad = tmp.path().join("broken");
        fs::create_dir(&bad).unwrap();

        let results = discover(tmp.path());
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }
}
