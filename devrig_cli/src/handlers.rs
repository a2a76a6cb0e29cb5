//! Command implementations. Each handler builds (or reuses) a
//! [`devrig_core::Runtime`], does one thing, prints a human-readable
//! summary, and returns. The CLI is a thin, short-lived host — it never
//! keeps the runtime's schedulers running past the command's lifetime
//! except for `sync trigger`, which needs the sync scheduler wired (but
//! not ticking) to know which data sources a plugin has registered.

use std::path::PathBuf;

use anyhow::{Context, Result};
use devrig_core::config::Config;
use devrig_core::storage::InboxFilter;
use devrig_core::Runtime;

use crate::commands::{AiCommand, InboxCommand, PluginCommand, SecretCommand, SyncCommand};

fn config_for(data_dir: Option<PathBuf>) -> Config {
    match data_dir {
        Some(dir) => Config::with_data_dir(dir),
        None => Config::default(),
    }
}

async fn runtime(data_dir: Option<PathBuf>) -> Result<Runtime> {
    let runtime = Runtime::new(config_for(data_dir))
        .await
        .context("failed to initialize devrig runtime")?;
    runtime
        .plugins
        .initialize()
        .await
        .context("failed to load installed plugins")?;
    Ok(runtime)
}

pub async fn handle_plugin(cmd: PluginCommand, data_dir: Option<PathBuf>) -> Result<()> {
    let runtime = runtime(data_dir).await?;
    match cmd {
        PluginCommand::List => {
            let plugins = runtime.plugins.list().await;
            if plugins.is_empty() {
                println!("no plugins installed");
                return Ok(());
            }
            for p in plugins {
                let error = p.error.map(|e| format!(" ({e})")).unwrap_or_default();
                println!("{:<20} {:<10} {:?}{}", p.id, p.version, p.status, error);
            }
        }
        PluginCommand::Install { path } => {
            let summary = runtime
                .plugins
                .install(&path)
                .await
                .with_context(|| format!("failed to install plugin from {}", path.display()))?;
            println!("installed {} ({})", summary.id, summary.version);
        }
        PluginCommand::Enable { plugin_id } => {
            runtime
                .plugins
                .enable(&plugin_id)
                .await
                .with_context(|| format!("failed to enable plugin '{plugin_id}'"))?;
            println!("enabled {plugin_id}");
        }
        PluginCommand::Disable { plugin_id } => {
            runtime
                .plugins
                .disable(&plugin_id)
                .await
                .with_context(|| format!("failed to disable plugin '{plugin_id}'"))?;
            println!("disabled {plugin_id}");
        }
        PluginCommand::Uninstall { plugin_id } => {
            runtime
                .plugins
                .uninstall(&plugin_id)
                .await
                .with_context(|| format!("failed to uninstall plugin '{plugin_id}'"))?;
            println!("uninstalled {plugin_id}");
        }
    }
    runtime.shutdown().await;
    Ok(())
}

pub async fn handle_sync(cmd: SyncCommand, data_dir: Option<PathBuf>) -> Result<()> {
    let runtime = runtime(data_dir).await?;
    match cmd {
        SyncCommand::Trigger { plugin } => {
            runtime.sync_scheduler.clone().start().await.context("failed to start sync scheduler")?;
            runtime
                .sync_scheduler
                .clone()
                .trigger_sync(&plugin)
                .await
                .with_context(|| format!("sync failed for plugin '{plugin}'"))?;
            println!("triggered sync for {plugin}");
        }
    }
    runtime.shutdown().await;
    Ok(())
}

pub async fn handle_inbox(cmd: InboxCommand, data_dir: Option<PathBuf>) -> Result<()> {
    let runtime = runtime(data_dir).await?;
    match cmd {
        InboxCommand::List { plugin, status } => {
            let filter = InboxFilter {
                status: status.as_deref().map(parse_status).transpose()?,
                ..Default::default()
            };
            let items = runtime
                .storage
                .inbox_query(&plugin, filter)
                .await
                .with_context(|| format!("failed to query inbox for plugin '{plugin}'"))?;
            if items.is_empty() {
                println!("no inbox items");
            }
            for item in items {
                println!("{:<36} [{}] {}", item.id, item.status.as_str(), item.title);
            }
        }
        InboxCommand::MarkRead { plugin, ids } => {
            let n = runtime
                .storage
                .inbox_mark_read(&plugin, ids)
                .await
                .context("failed to mark inbox items read")?;
            println!("marked {n} item(s) read");
        }
    }
    runtime.shutdown().await;
    Ok(())
}

fn parse_status(s: &str) -> Result<devrig_core::storage::InboxStatus> {
    use devrig_core::storage::InboxStatus::*;
    match s {
        "unread" => Ok(Unread),
        "read" => Ok(Read),
        "archived" => Ok(Archived),
        "snoozed" => Ok(Snoozed),
        other => Err(anyhow::anyhow!("unknown inbox status '{other}'")),
    }
}

pub async fn handle_secret(cmd: SecretCommand, data_dir: Option<PathBuf>) -> Result<()> {
    let runtime = runtime(data_dir).await?;
    match cmd {
        SecretCommand::Set { name, value, provider } => {
            runtime
                .storage
                .secret_upsert(name.clone(), value, provider)
                .await
                .with_context(|| format!("failed to store secret '{name}'"))?;
            println!("stored secret {name}");
        }
        SecretCommand::List => {
            let secrets = runtime.storage.secret_list().await.context("failed to list secrets")?;
            if secrets.is_empty() {
                println!("no secrets stored");
            }
            for s in secrets {
                println!("{:<20} provider={}", s.name, s.provider);
            }
        }
    }
    runtime.shutdown().await;
    Ok(())
}

pub async fn handle_ai(cmd: AiCommand, data_dir: Option<PathBuf>) -> Result<()> {
    let runtime = runtime(data_dir).await?;
    match cmd {
        AiCommand::Usage { since_hours } => {
            let since = devrig_core::storage::now_ms() - since_hours * 3_600_000;
            let by_provider = runtime
                .storage
                .ai_usage_by_provider_since(since)
                .await
                .context("failed to load AI usage rollup")?;
            if by_provider.is_empty() {
                println!("no AI operations in the last {since_hours}h");
            }
            for row in by_provider {
                println!(
                    "{:<12} ops={:<5} in={:<8} out={:<8} cost=${:.4}",
                    row.provider, row.operation_count, row.input_tokens, row.output_tokens, row.cost_usd
                );
            }
        }
    }
    runtime.shutdown().await;
    Ok(())
}
