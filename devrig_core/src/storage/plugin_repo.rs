use rusqlite::{params, OptionalExtension};

use super::conn::Storage;
use super::error::{translate_unique_violation, Result, StorageError};
use super::models::{now_ms, Plugin};

impl Storage {
    /// `id` is the manifest's own plugin id (e.g. `gmail`), not a
    /// generated surrogate: it is the value every other table's
    /// `plugin_id` foreign key carries, and the sandbox/host-bridge layer
    /// dispatches by this same string.
    pub async fn plugin_insert(
        &self,
        id: String,
        name: String,
        version: String,
        manifest_json: String,
        enabled: bool,
    ) -> Result<Plugin> {
        let ts = now_ms();
        let plugin = Plugin {
            id: id.clone(),
            name: name.clone(),
            version,
            manifest_json,
            enabled,
            installed_at: ts,
            updated_at: ts,
        };
        let row = plugin.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO plugins (id, name, version, manifest_json, enabled, installed_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id, row.name, row.version, row.manifest_json,
                    row.enabled as i64, row.installed_at, row.updated_at
                ],
            )
            .map_err(|e| translate_unique_violation(e, &row.name))?;
            Ok(())
        })
        .await?;
        Ok(plugin)
    }

    pub async fn plugin_get(&self, id: &str) -> Result<Plugin> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, version, manifest_json, enabled, installed_at, updated_at
                 FROM plugins WHERE id = ?1",
                params![id],
                row_to_plugin,
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("plugin {id}")))
        })
        .await
    }

    pub async fn plugin_get_by_name(&self, name: &str) -> Result<Option<Plugin>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, version, manifest_json, enabled, installed_at, updated_at
                     FROM plugins WHERE name = ?1",
                    params![name],
                    row_to_plugin,
                )
                .optional()?)
        })
        .await
    }

    pub async fn plugin_list(&self) -> Result<Vec<Plugin>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, name, version, manifest_json, enabled, installed_at, updated_at
                 FROM plugins ORDER BY installed_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_plugin)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    pub async fn plugin_set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let id = id.to_string();
        let ts = now_ms();
        let changed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "UPDATE plugins SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
                    params![enabled as i64, ts, id],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(StorageError::NotFound("plugin".into()));
        }
        Ok(())
    }

    pub async fn plugin_update_manifest(
        &self,
        id: &str,
        version: String,
        manifest_json: String,
    ) -> Result<()> {
        let id = id.to_string();
        let ts = now_ms();
        let changed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "UPDATE plugins SET version = ?1, manifest_json = ?2, updated_at = ?3 WHERE id = ?4",
                    params![version, manifest_json, ts, id],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(StorageError::NotFound("plugin".into()));
        }
        Ok(())
    }

    /// Delete a plugin and everything it cascades to (inbox items, sync
    /// state via `ON DELETE CASCADE`; `ai_operations.plugin_id` is set
    /// null per spec.md §3).
    pub async fn plugin_delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        let changed = self
            .with_conn(move |conn| Ok(conn.execute("DELETE FROM plugins WHERE id = ?1", params![id])?))
            .await?;
        if changed == 0 {
            return Err(StorageError::NotFound("plugin".into()));
        }
        Ok(())
    }
}

fn row_to_plugin(row: &rusqlite::Row) -> rusqlite::Result<Plugin> {
    Ok(Plugin {
        id: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        manifest_json: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
        installed_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_get_list_delete() {
        let storage = Storage::open_in_memory().await.unwrap();
        let plugin = storage
            .plugin_insert("gmail".into(), "gmail".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();

        let fetched = storage.plugin_get(&plugin.id).await.unwrap();
        assert_eq!(fetched.name, "gmail");

        let list = storage.plugin_list().await.unwrap();
        assert_eq!(list.len(), 1);

        storage.plugin_set_enabled(&plugin.id, false).await.unwrap();
        let fetched = storage.plugin_get(&plugin.id).await.unwrap();
        assert!(!fetched.enabled);

        storage.plugin_delete(&plugin.id).await.unwrap();
        assert!(storage.plugin_get(&plugin.id).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage
            .plugin_insert("gmail".into(), "gmail".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();
        let err = storage
            .plugin_insert("gmail".into(), "gmail".into(), "1.0.1".into(), "{}".into(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }
}
