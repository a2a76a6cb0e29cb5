use rusqlite::{params, OptionalExtension};

use super::conn::Storage;
use super::error::Result;

impl Storage {
    pub async fn setting_set(&self, key: String, value: String) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn setting_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_on_write() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.setting_set("theme".into(), "dark".into()).await.unwrap();
        storage.setting_set("theme".into(), "light".into()).await.unwrap();
        assert_eq!(storage.setting_get("theme").await.unwrap(), Some("light".to_string()));
    }
}
