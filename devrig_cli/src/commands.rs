//! Clap command surface for the devrig runtime core.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "devrig", about = "Local command-line front door for the devrig runtime core")]
pub struct Cli {
    /// Directory holding the sqlite database and installed plugins.
    /// Defaults to `./devrig-data`.
    #[arg(long, global = true)]
    pub data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage installed plugins.
    #[command(subcommand)]
    Plugin(PluginCommand),

    /// Drive the sync scheduler.
    #[command(subcommand)]
    Sync(SyncCommand),

    /// Inspect and manage inbox items synced from plugins.
    #[command(subcommand)]
    Inbox(InboxCommand),

    /// Manage secrets available to plugin host-function calls.
    #[command(subcommand)]
    Secret(SecretCommand),

    /// AI cost ledger reporting.
    #[command(subcommand)]
    Ai(AiCommand),
}

#[derive(Subcommand)]
pub enum PluginCommand {
    /// List every installed plugin and its status.
    List,
    /// Install a plugin from a directory containing `manifest.json`.
    Install {
        /// Path to the plugin's source directory.
        path: std::path::PathBuf,
    },
    /// Re-enable a previously disabled plugin.
    Enable {
        /// Plugin id, e.g. `gmail`.
        plugin_id: String,
    },
    /// Disable a plugin without uninstalling it.
    Disable {
        /// Plugin id, e.g. `gmail`.
        plugin_id: String,
    },
    /// Remove a plugin and its installed files.
    Uninstall {
        /// Plugin id, e.g. `gmail`.
        plugin_id: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCommand {
    /// Run every registered data source of a plugin immediately, outside
    /// its normal interval.
    Trigger {
        /// Plugin id whose data sources should sync now.
        #[arg(long)]
        plugin: String,
    },
}

#[derive(Subcommand)]
pub enum InboxCommand {
    /// List inbox items synced from a plugin.
    List {
        /// Plugin id that owns the inbox items.
        #[arg(long)]
        plugin: String,
        /// Only show items with this status (`unread`, `read`, `archived`, `snoozed`).
        #[arg(long)]
        status: Option<String>,
    },
    /// Mark inbox items as read.
    MarkRead {
        #[arg(long)]
        plugin: String,
        /// Inbox item ids to mark read.
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum SecretCommand {
    /// Store a secret value under a name, for host-function `getSecret`
    /// calls to resolve against a plugin's declared permission list.
    Set {
        name: String,
        value: String,
        #[arg(long, default_value = "manual")]
        provider: String,
    },
    /// List secret names and providers, without values.
    List,
}

#[derive(Subcommand)]
pub enum AiCommand {
    /// Per-provider token/cost rollup since a number of hours ago.
    Usage {
        #[arg(long, default_value_t = 24)]
        since_hours: i64,
    },
}
