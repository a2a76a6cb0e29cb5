//! Runtime permission checks against a plugin's declared manifest
//! permissions, enforced on every host-function call.
//!
//! The network matcher's exact-host / `*.domain` subdomain-wildcard
//! semantics mirror a capability-host matcher pattern used elsewhere in
//! the wider plugin-sandboxing lineage this runtime descends from.

use super::schema::Permissions;

pub const PLUGIN_DATA_SENTINEL: &str = "__PLUGIN_DATA__";

/// A live view over one plugin's declared permissions, queried by host
/// functions before they touch the network, filesystem, secrets store,
/// or AI router on the plugin's behalf.
#[derive(Debug, Clone)]
pub struct PermissionGuard {
    network: Vec<String>,
    secrets: Vec<String>,
    ai: bool,
    filesystem: Vec<String>,
}

impl PermissionGuard {
    pub fn new(permissions: &Permissions) -> Self {
        Self {
            network: permissions.network.clone(),
            secrets: permissions.secrets.clone(),
            ai: permissions.ai,
            filesystem: permissions.filesystem.clone(),
        }
    }

    /// Does this plugin's network allowlist cover `url`?
    ///
    /// `url` must parse as an absolute URL with a host. Matching is by
    /// exact host, or by `*.domain` entries which match `domain` itself
    /// and any of its subdomains.
    pub fn allows_url(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.network.iter().any(|entry| host_matches(entry, host))
    }

    /// Does this plugin's filesystem allowlist cover `path`?
    ///
    /// The `__PLUGIN_DATA__` sentinel always matches — every plugin gets
    /// its own private data directory regardless of declared permissions.
    pub fn allows_path(&self, path: &str) -> bool {
        if path.starts_with(PLUGIN_DATA_SENTINEL) {
            return true;
        }
        self.filesystem.iter().any(|allowed| path_matches(allowed, path))
    }

    pub fn allows_secret(&self, key: &str) -> bool {
        self.secrets.iter().any(|k| k == key)
    }

    pub fn allows_ai(&self) -> bool {
        self.ai
    }
}

fn host_matches(entry: &str, host: &str) -> bool {
    if entry == "*" || entry == "*.*" {
        return true;
    }
    if let Some(domain) = entry.strip_prefix("*.") {
        return host == domain || host.ends_with(&format!(".{domain}"));
    }
    entry == host
}

fn path_matches(allowed: &str, path: &str) -> bool {
    if allowed == path {
        return true;
    }
    if let Some(dir) = allowed.strip_suffix('/') {
        // "that directory and any descendant, or an exact match without
        // the trailing slash"
        return path == dir || path.starts_with(allowed);
    }
    if let Some(prefix) = allowed.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    // Neither a `/`- nor `*`-terminated pattern: exact, or `<pattern>/…`.
    path.starts_with(&format!("{allowed}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(network: &[&str], filesystem: &[&str], secrets: &[&str], ai: bool) -> PermissionGuard {
        PermissionGuard::new(&Permissions {
            network: network.iter().map(|s| s.to_string()).collect(),
            secrets: secrets.iter().map(|s| s.to_string()).collect(),
            ai,
            filesystem: filesystem.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn exact_host_matches() {
        let g = guard(&["api.gmail.com"], &[], &[], false);
        assert!(g.allows_url("https://api.gmail.com/v1/messages"));
        assert!(!g.allows_url("https://api.outlook.com/v1/messages"));
    }

    #[test]
    fn subdomain_wildcard_matches_domain_and_subdomains() {
        let g = guard(&["*.github.com"], &[], &[], false);
        assert!(g.allows_url("https://api.github.com/repos"));
        assert!(g.allows_url("https://github.com/repos"));
        assert!(!g.allows_url("https://evilgithub.com/repos"));
    }

    #[test]
    fn plugin_data_sentinel_always_allowed() {
        let g = guard(&[], &[], &[], false);
        assert!(g.allows_path("__PLUGIN_DATA__/cache.json"));
    }

    #[test]
    fn filesystem_prefix_matching() {
        let g = guard(&[], &["/workspace/notes/*"], &[], false);
        assert!(g.allows_path("/workspace/notes/todo.md"));
        assert!(!g.allows_path("/workspace/secrets/creds.json"));
    }

    #[test]
    fn filesystem_trailing_slash_matches_dir_descendants_and_bare_dir() {
        let g = guard(&[], &["/workspace/notes/"], &[], false);
        assert!(g.allows_path("/workspace/notes/todo.md"));
        assert!(g.allows_path("/workspace/notes/"));
        assert!(g.allows_path("/workspace/notes"));
        assert!(!g.allows_path("/workspace/notesbad"));
    }

    #[test]
    fn filesystem_bare_pattern_requires_path_boundary() {
        let g = guard(&[], &["/workspace/notes"], &[], false);
        assert!(g.allows_path("/workspace/notes"));
        assert!(g.allows_path("/workspace/notes/todo.md"));
        assert!(!g.allows_path("/workspace/notesbad"));
    }

    #[test]
    fn secret_and_ai_checks() {
        let g = guard(&[], &[], &["gmail.token"], true);
        assert!(g.allows_secret("gmail.token"));
        assert!(!g.allows_secret("other.token"));
        assert!(g.allows_ai());
    }
}
