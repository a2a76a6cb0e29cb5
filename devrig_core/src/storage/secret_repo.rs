use rusqlite::{params, OptionalExtension};

use super::conn::Storage;
use super::error::Result;
use super::models::{new_id, now_ms, Secret, SecretSummary};

impl Storage {
    pub async fn secret_upsert(&self, name: String, encrypted_value: String, provider: String) -> Result<Secret> {
        let existing = self.secret_get_by_name(&name).await?;
        let ts = now_ms();
        let secret = match existing {
            Some(existing) => Secret {
                updated_at: ts,
                encrypted_value: encrypted_value.clone(),
                provider: provider.clone(),
                ..existing
            },
            None => Secret {
                id: new_id(),
                name: name.clone(),
                encrypted_value: encrypted_value.clone(),
                provider: provider.clone(),
                created_at: ts,
                updated_at: ts,
            },
        };
        let row = secret.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO secrets (id, name, encrypted_value, provider, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6)
                 ON CONFLICT(name) DO UPDATE SET
                    encrypted_value = excluded.encrypted_value,
                    provider = excluded.provider,
                    updated_at = excluded.updated_at",
                params![row.id, row.name, row.encrypted_value, row.provider, row.created_at, row.updated_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(secret)
    }

    pub async fn secret_get_by_name(&self, name: &str) -> Result<Option<Secret>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, encrypted_value, provider, created_at, updated_at
                     FROM secrets WHERE name = ?1",
                    params![name],
                    row_to_secret,
                )
                .optional()?)
        })
        .await
    }

    /// List view — never exposes `encrypted_value`, per spec.md §3.
    pub async fn secret_list(&self) -> Result<Vec<SecretSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, name, provider, created_at, updated_at FROM secrets ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SecretSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    provider: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    pub async fn secret_delete(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM secrets WHERE name = ?1", params![name])?;
            Ok(())
        })
        .await
    }
}

fn row_to_secret(row: &rusqlite::Row) -> rusqlite::Result<Secret> {
    Ok(Secret {
        id: row.get(0)?,
        name: row.get(1)?,
        encrypted_value: row.get(2)?,
        provider: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_never_exposes_value() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage
            .secret_upsert("gmail.api_key".into(), "ciphertext".into(), "os-keychain".into())
            .await
            .unwrap();

        let list = storage.secret_list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "gmail.api_key");
    }
}
