//! Process-wide configuration, loaded once at startup.
//!
//! Mirrors the teacher's constructor-pair convention (`PluginManager::new`
//! vs. `with_manifest_dir`): a zero-config default plus an explicit
//! override path, rather than a separate config-file format.

use std::path::{Path, PathBuf};

/// Resource caps and directory layout for one `Runtime`.
#[derive(Debug, Clone)]
pub struct Config {
    /// `<userData>/data` — holds the sqlite database file.
    pub data_dir: PathBuf,
    /// `<userData>/plugins` — managed (installed) plugin directories.
    pub plugins_dir: PathBuf,
    /// Optional read-only directory of bundled plugins, scanned to
    /// populate the "available" list without installing them.
    pub bundled_plugins_dir: Option<PathBuf>,
    /// File name of the sqlite database under `data_dir`.
    pub db_filename: String,
    /// Maximum number of sandboxes resident in the pool at once.
    pub sandbox_pool_size: usize,
    /// Hard heap cap per sandbox, in bytes.
    pub sandbox_memory_limit_bytes: usize,
    /// Per-eval / per-invocation timeout.
    pub sandbox_eval_timeout: std::time::Duration,
    /// Default sync interval applied when a data source declares none.
    pub default_sync_interval: std::time::Duration,
    /// Snooze-expiry tick interval for the sync scheduler.
    pub snooze_tick_interval: std::time::Duration,
    /// Trigger-scheduler reconciliation tick interval.
    pub trigger_tick_interval: std::time::Duration,
    /// Maximum number of secret keys a single manifest may declare.
    pub max_secret_keys: usize,
}

impl Config {
    /// Build a config rooted at an explicit `user_data` directory.
    pub fn with_data_dir<P: AsRef<Path>>(user_data: P) -> Self {
        let root = user_data.as_ref().to_path_buf();
        Self {
            data_dir: root.join("data"),
            plugins_dir: root.join("plugins"),
            bundled_plugins_dir: None,
            db_filename: "devrig.db".to_string(),
            sandbox_pool_size: 10,
            sandbox_memory_limit_bytes: 128 * 1024 * 1024,
            sandbox_eval_timeout: std::time::Duration::from_secs(5),
            default_sync_interval: std::time::Duration::from_secs(5 * 60),
            snooze_tick_interval: std::time::Duration::from_secs(60),
            trigger_tick_interval: std::time::Duration::from_secs(60),
            max_secret_keys: 20,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_filename)
    }

    pub fn with_bundled_plugins_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.bundled_plugins_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl Default for Config {
    /// Defaults to a `./devrig-data` directory relative to the process's
    /// current working directory; callers embedding this in a real host
    /// application are expected to call `with_data_dir` instead.
    fn default() -> Self {
        Self::with_data_dir("./devrig-data")
    }
}
