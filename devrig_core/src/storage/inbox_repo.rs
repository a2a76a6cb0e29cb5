use rusqlite::{params, OptionalExtension};

use super::conn::Storage;
use super::error::Result;
use super::models::{new_id, now_ms, InboxItem, InboxItemInput, InboxStatus};

/// Outcome of a `storeItems` batch, matching spec.md S3's
/// `{created, updated}` shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub created: usize,
    pub updated: usize,
}

/// Optional filter applied by `queryItems`; every filter is implicitly
/// ANDed with `plugin_id = caller`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct InboxFilter {
    pub status: Option<InboxStatus>,
    pub item_type: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

impl Storage {
    /// Coerce and upsert a batch of guest-submitted items in one
    /// transaction, keyed on `(pluginId, externalId)`. `createdAt` is
    /// preserved across repeat upserts; `updatedAt` always advances.
    pub async fn inbox_upsert_batch(
        &self,
        plugin_id: &str,
        items: Vec<InboxItemInput>,
    ) -> Result<UpsertOutcome> {
        let plugin_id = plugin_id.to_string();
        self.with_conn_mut(move |conn| {
            let tx = conn.transaction()?;
            let mut outcome = UpsertOutcome::default();
            let ts = now_ms();

            for item in items {
                let external_id = item
                    .external_id
                    .or(item.id.clone())
                    .unwrap_or_default();
                let priority = coerce_priority(item.priority.as_ref());
                let metadata = item.metadata.unwrap_or(serde_json::json!({}));
                let is_actionable = item.is_actionable.unwrap_or(false);

                let existing_id: Option<String> = tx
                    .query_row(
                        "SELECT id FROM inbox_items WHERE plugin_id = ?1 AND external_id = ?2",
                        params![plugin_id, external_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                match existing_id {
                    Some(id) => {
                        tx.execute(
                            "UPDATE inbox_items SET
                                item_type = ?1, title = ?2, body = ?3, preview = ?4,
                                source_url = ?5, priority = ?6, metadata = ?7,
                                is_actionable = ?8, external_created_at = ?9,
                                synced_at = ?10, updated_at = ?10
                             WHERE id = ?11",
                            params![
                                item.item_type,
                                item.title,
                                item.body,
                                item.preview,
                                item.source_url,
                                priority,
                                metadata.to_string(),
                                is_actionable as i64,
                                item.external_created_at,
                                ts,
                                id,
                            ],
                        )?;
                        outcome.updated += 1;
                    }
                    None => {
                        let id = new_id();
                        tx.execute(
                            "INSERT INTO inbox_items (
                                id, plugin_id, external_id, item_type, title, body, preview,
                                source_url, priority, status, metadata, is_actionable,
                                external_created_at, synced_at, created_at, updated_at
                            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'unread', ?10, ?11, ?12, ?13, ?13, ?13)",
                            params![
                                id,
                                plugin_id,
                                external_id,
                                item.item_type,
                                item.title,
                                item.body,
                                item.preview,
                                item.source_url,
                                priority,
                                metadata.to_string(),
                                is_actionable as i64,
                                item.external_created_at,
                                ts,
                            ],
                        )?;
                        outcome.created += 1;
                    }
                }
            }

            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    pub async fn inbox_query(&self, plugin_id: &str, filter: InboxFilter) -> Result<Vec<InboxItem>> {
        let plugin_id = plugin_id.to_string();
        self.with_conn(move |conn| {
            let mut sql = String::from(
                "SELECT i.id, i.plugin_id, i.external_id, i.item_type, i.title, i.body, i.preview,
                        i.source_url, i.priority, i.status, i.ai_classification, i.ai_summary,
                        i.ai_draft, i.metadata, i.is_actionable, i.snoozed_until,
                        i.external_created_at, i.synced_at, i.created_at, i.updated_at
                 FROM inbox_items i",
            );
            if filter.search.is_some() {
                sql.push_str(
                    " JOIN inbox_items_fts f ON f.rowid = i.rowid",
                );
            }
            sql.push_str(" WHERE i.plugin_id = ?1");
            if filter.status.is_some() {
                sql.push_str(" AND i.status = ?2");
            }
            if filter.item_type.is_some() {
                sql.push_str(" AND i.item_type = ?3");
            }
            if filter.search.is_some() {
                sql.push_str(" AND inbox_items_fts MATCH ?4");
            }
            sql.push_str(" ORDER BY i.priority DESC, i.synced_at DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }

            let mut stmt = conn.prepare_cached(&sql)?;
            let status_param = filter.status.map(|s| s.as_str().to_string());
            let rows = stmt.query_map(
                params![
                    plugin_id,
                    status_param,
                    filter.item_type,
                    filter.search,
                ],
                row_to_item,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    pub async fn inbox_list_unclassified(&self, plugin_id: &str) -> Result<Vec<InboxItem>> {
        let plugin_id = plugin_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, plugin_id, external_id, item_type, title, body, preview,
                        source_url, priority, status, ai_classification, ai_summary,
                        ai_draft, metadata, is_actionable, snoozed_until,
                        external_created_at, synced_at, created_at, updated_at
                 FROM inbox_items WHERE plugin_id = ?1 AND ai_classification IS NULL",
            )?;
            let rows = stmt.query_map(params![plugin_id], row_to_item)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    pub async fn inbox_set_classification(
        &self,
        id: &str,
        classification: serde_json::Value,
    ) -> Result<()> {
        let id = id.to_string();
        let ts = now_ms();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE inbox_items SET ai_classification = ?1, updated_at = ?2 WHERE id = ?3",
                params![classification.to_string(), ts, id],
            )?;
            Ok(())
        })
        .await
    }

    /// `markRead` — restricted to ids owned by `plugin_id` (defense in
    /// depth per spec.md §4.F).
    pub async fn inbox_mark_read(&self, plugin_id: &str, ids: Vec<String>) -> Result<usize> {
        self.inbox_set_status_for_owned(plugin_id, ids, InboxStatus::Read)
            .await
    }

    /// `archive` — same ownership restriction as `markRead`.
    pub async fn inbox_archive(&self, plugin_id: &str, ids: Vec<String>) -> Result<usize> {
        self.inbox_set_status_for_owned(plugin_id, ids, InboxStatus::Archived)
            .await
    }

    async fn inbox_set_status_for_owned(
        &self,
        plugin_id: &str,
        ids: Vec<String>,
        status: InboxStatus,
    ) -> Result<usize> {
        let plugin_id = plugin_id.to_string();
        let ts = now_ms();
        self.with_conn_mut(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0usize;
            for id in ids {
                changed += tx.execute(
                    "UPDATE inbox_items SET status = ?1, updated_at = ?2
                     WHERE id = ?3 AND plugin_id = ?4",
                    params![status.as_str(), ts, id, plugin_id],
                )?;
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    pub async fn inbox_snooze_by_external_id(
        &self,
        plugin_id: &str,
        external_id: &str,
        snoozed_until: i64,
    ) -> Result<()> {
        let plugin_id = plugin_id.to_string();
        let external_id = external_id.to_string();
        let ts = now_ms();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE inbox_items SET status = 'snoozed', snoozed_until = ?1, updated_at = ?2
                 WHERE plugin_id = ?3 AND external_id = ?4",
                params![snoozed_until, ts, plugin_id, external_id],
            )?;
            Ok(())
        })
        .await
    }
}

fn coerce_priority(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::String(s)) => match s.as_str() {
            "critical" => 4,
            "high" => 3,
            "normal" => 2,
            "low" => 1,
            _ => 2,
        },
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(2),
        _ => 2,
    }
}

fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<InboxItem> {
    let status_str: String = row.get(9)?;
    let ai_classification: Option<String> = row.get(10)?;
    let metadata: String = row.get(13)?;
    Ok(InboxItem {
        id: row.get(0)?,
        plugin_id: row.get(1)?,
        external_id: row.get(2)?,
        item_type: row.get(3)?,
        title: row.get(4)?,
        body: row.get(5)?,
        preview: row.get(6)?,
        source_url: row.get(7)?,
        priority: row.get(8)?,
        status: InboxStatus::parse(&status_str).unwrap_or(InboxStatus::Unread),
        ai_classification: ai_classification
            .and_then(|s| serde_json::from_str(&s).ok()),
        ai_summary: row.get(11)?,
        ai_draft: row.get(12)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
        is_actionable: row.get::<_, i64>(14)? != 0,
        snoozed_until: row.get(15)?,
        external_created_at: row.get(16)?,
        synced_at: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(external_id: &str, title: &str) -> InboxItemInput {
        InboxItemInput {
            id: None,
            external_id: Some(external_id.to_string()),
            item_type: "email".to_string(),
            title: title.to_string(),
            body: None,
            preview: None,
            source_url: None,
            priority: Some(serde_json::json!("high")),
            metadata: None,
            is_actionable: None,
            external_created_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_preserves_created_at() {
        let storage = Storage::open_in_memory().await.unwrap();
        let plugin = storage
            .plugin_insert("gmail".into(), "gmail".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();

        let first = storage
            .inbox_upsert_batch(&plugin.id, vec![item("e1", "Hi")])
            .await
            .unwrap();
        assert_eq!(first, UpsertOutcome { created: 1, updated: 0 });

        let second = storage
            .inbox_upsert_batch(&plugin.id, vec![item("e1", "Hi again")])
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome { created: 0, updated: 1 });

        let rows = storage
            .inbox_query(&plugin.id, InboxFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Hi again");
        assert_eq!(rows[0].priority, 3);
    }

    #[tokio::test]
    async fn mark_read_only_affects_owning_plugin() {
        let storage = Storage::open_in_memory().await.unwrap();
        let p1 = storage
            .plugin_insert("gmail".into(), "gmail".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();
        let p2 = storage
            .plugin_insert("slack".into(), "slack".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();

        storage
            .inbox_upsert_batch(&p1.id, vec![item("e1", "Hi")])
            .await
            .unwrap();
        let rows = storage.inbox_query(&p1.id, InboxFilter::default()).await.unwrap();
        let target_id = rows[0].id.clone();

        let changed = storage.inbox_mark_read(&p2.id, vec![target_id.clone()]).await.unwrap();
        assert_eq!(changed, 0);

        let changed = storage.inbox_mark_read(&p1.id, vec![target_id]).await.unwrap();
        assert_eq!(changed, 1);
    }
}
