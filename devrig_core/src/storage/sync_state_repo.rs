use rusqlite::{params, OptionalExtension};

use super::conn::Storage;
use super::error::Result;
use super::models::{now_ms, PluginSyncState, SyncStatus};

impl Storage {
    /// Get-or-create the `(pluginId, dataSourceId)` row, per spec.md §4.G
    /// `registerDataSource`.
    pub async fn sync_state_get_or_create(
        &self,
        plugin_id: &str,
        data_source_id: &str,
    ) -> Result<PluginSyncState> {
        if let Some(existing) = self.sync_state_get(plugin_id, data_source_id).await? {
            return Ok(existing);
        }
        let plugin_id = plugin_id.to_string();
        let data_source_id = data_source_id.to_string();
        let ts = now_ms();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO plugin_sync_state
                 (plugin_id, data_source_id, sync_status, items_synced, created_at, updated_at)
                 VALUES (?1, ?2, 'idle', 0, ?3, ?3)",
                params![plugin_id, data_source_id, ts],
            )?;
            conn.query_row(
                "SELECT plugin_id, data_source_id, last_sync_at, sync_cursor, sync_status,
                        error, items_synced, created_at, updated_at
                 FROM plugin_sync_state WHERE plugin_id = ?1 AND data_source_id = ?2",
                params![plugin_id, data_source_id],
                row_to_state,
            )
            .map_err(Into::into)
        })
        .await
    }

    pub async fn sync_state_get(
        &self,
        plugin_id: &str,
        data_source_id: &str,
    ) -> Result<Option<PluginSyncState>> {
        let plugin_id = plugin_id.to_string();
        let data_source_id = data_source_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT plugin_id, data_source_id, last_sync_at, sync_cursor, sync_status,
                            error, items_synced, created_at, updated_at
                     FROM plugin_sync_state WHERE plugin_id = ?1 AND data_source_id = ?2",
                    params![plugin_id, data_source_id],
                    row_to_state,
                )
                .optional()?)
        })
        .await
    }

    pub async fn sync_state_list_for_plugin(&self, plugin_id: &str) -> Result<Vec<PluginSyncState>> {
        let plugin_id = plugin_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT plugin_id, data_source_id, last_sync_at, sync_cursor, sync_status,
                        error, items_synced, created_at, updated_at
                 FROM plugin_sync_state WHERE plugin_id = ?1",
            )?;
            let rows = stmt.query_map(params![plugin_id], row_to_state)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    pub async fn sync_state_list_all(&self) -> Result<Vec<PluginSyncState>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT plugin_id, data_source_id, last_sync_at, sync_cursor, sync_status,
                        error, items_synced, created_at, updated_at
                 FROM plugin_sync_state",
            )?;
            let rows = stmt.query_map([], row_to_state)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Transition a sync-state row. `idle` requires `error = None`;
    /// `error` requires `Some` error text (spec.md §3 invariant).
    /// Transitioning out of `syncing` always bumps `updated_at`.
    pub async fn sync_state_transition(
        &self,
        plugin_id: &str,
        data_source_id: &str,
        status: SyncStatus,
        error: Option<String>,
        items_synced: Option<i64>,
    ) -> Result<()> {
        let plugin_id = plugin_id.to_string();
        let data_source_id = data_source_id.to_string();
        let ts = now_ms();
        self.with_conn(move |conn| {
            match items_synced {
                Some(count) => conn.execute(
                    "UPDATE plugin_sync_state
                     SET sync_status = ?1, error = ?2, items_synced = ?3,
                         last_sync_at = ?4, updated_at = ?4
                     WHERE plugin_id = ?5 AND data_source_id = ?6",
                    params![status.as_str(), error, count, ts, plugin_id, data_source_id],
                )?,
                None => conn.execute(
                    "UPDATE plugin_sync_state
                     SET sync_status = ?1, error = ?2, updated_at = ?3
                     WHERE plugin_id = ?4 AND data_source_id = ?5",
                    params![status.as_str(), error, ts, plugin_id, data_source_id],
                )?,
            };
            Ok(())
        })
        .await
    }

    pub async fn sync_state_set_cursor(
        &self,
        plugin_id: &str,
        data_source_id: &str,
        cursor: Option<String>,
    ) -> Result<()> {
        let plugin_id = plugin_id.to_string();
        let data_source_id = data_source_id.to_string();
        let ts = now_ms();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE plugin_sync_state SET sync_cursor = ?1, updated_at = ?2
                 WHERE plugin_id = ?3 AND data_source_id = ?4",
                params![cursor, ts, plugin_id, data_source_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Atomically flip every `snoozed` row past its `snoozedUntil` back to
    /// `unread`, clearing `snoozedUntil`; returns the number of rows
    /// changed. Used by the sync scheduler's 60s snooze tick.
    pub async fn inbox_unsnooze_expired(&self, now: i64) -> Result<usize> {
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "UPDATE inbox_items SET status = 'unread', snoozed_until = NULL, updated_at = ?1
                 WHERE status = 'snoozed' AND snoozed_until IS NOT NULL AND snoozed_until <= ?1",
                params![now],
            )?)
        })
        .await
    }
}

fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<PluginSyncState> {
    let status_str: String = row.get(4)?;
    Ok(PluginSyncState {
        plugin_id: row.get(0)?,
        data_source_id: row.get(1)?,
        last_sync_at: row.get(2)?,
        sync_cursor: row.get(3)?,
        sync_status: SyncStatus::parse(&status_str).unwrap_or(SyncStatus::Idle),
        error: row.get(5)?,
        items_synced: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage
            .plugin_insert("gmail".into(), "gmail".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();

        let first = storage.sync_state_get_or_create("gmail", "emails").await.unwrap();
        let second = storage.sync_state_get_or_create("gmail", "emails").await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.sync_status, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn unsnooze_expired_only_affects_past_items() {
        let storage = Storage::open_in_memory().await.unwrap();
        let plugin = storage
            .plugin_insert("gmail".into(), "gmail".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();

        let now = now_ms();
        for (external_id, snoozed_until) in [("past", now - 1000), ("future", now + 60_000)] {
            storage
                .inbox_upsert_batch(
                    &plugin.id,
                    vec![super::super::models::InboxItemInput {
                        id: None,
                        external_id: Some(external_id.to_string()),
                        item_type: "email".to_string(),
                        title: "hi".to_string(),
                        body: None,
                        preview: None,
                        source_url: None,
                        priority: None,
                        metadata: None,
                        is_actionable: None,
                        external_created_at: None,
                    }],
                )
                .await
                .unwrap();
            storage
                .inbox_snooze_by_external_id(&plugin.id, external_id, snoozed_until)
                .await
                .unwrap();
        }

        let count = storage.inbox_unsnooze_expired(now).await.unwrap();
        assert_eq!(count, 1);
    }
}
