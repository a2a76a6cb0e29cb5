use rusqlite::params;

use super::conn::Storage;
use super::error::Result;
use super::models::{new_id, now_ms, AiOperation};

/// Per-provider rollup over a time window.
#[derive(Debug, Clone, Default)]
pub struct ProviderUsage {
    pub provider: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub operation_count: i64,
}

/// Per-plugin rollup over a time window.
#[derive(Debug, Clone, Default)]
pub struct PluginUsage {
    pub plugin_id: String,
    pub cost_usd: f64,
    pub operation_count: i64,
}

impl Storage {
    pub async fn ai_operation_insert(&self, op: AiOperation) -> Result<AiOperation> {
        let row = AiOperation {
            id: if op.id.is_empty() { new_id() } else { op.id },
            created_at: if op.created_at == 0 { now_ms() } else { op.created_at },
            ..op
        };
        let insert = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO ai_operations (
                    id, provider, model, operation, plugin_id, pipeline_id,
                    inbox_item_id, execution_id, input_tokens, output_tokens,
                    cost_usd, duration_ms, created_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                params![
                    insert.id, insert.provider, insert.model, insert.operation,
                    insert.plugin_id, insert.pipeline_id, insert.inbox_item_id,
                    insert.execution_id, insert.input_tokens, insert.output_tokens,
                    insert.cost_usd, insert.duration_ms, insert.created_at,
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(row)
    }

    pub async fn ai_usage_by_provider_since(&self, since: i64) -> Result<Vec<ProviderUsage>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT provider, SUM(input_tokens), SUM(output_tokens), SUM(cost_usd), COUNT(*)
                 FROM ai_operations WHERE created_at >= ?1 GROUP BY provider",
            )?;
            let rows = stmt.query_map(params![since], |row| {
                Ok(ProviderUsage {
                    provider: row.get(0)?,
                    input_tokens: row.get(1)?,
                    output_tokens: row.get(2)?,
                    cost_usd: row.get(3)?,
                    operation_count: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    pub async fn ai_usage_by_plugin_since(&self, since: i64) -> Result<Vec<PluginUsage>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT plugin_id, SUM(cost_usd), COUNT(*)
                 FROM ai_operations WHERE created_at >= ?1 AND plugin_id IS NOT NULL
                 GROUP BY plugin_id",
            )?;
            let rows = stmt.query_map(params![since], |row| {
                Ok(PluginUsage {
                    plugin_id: row.get(0)?,
                    cost_usd: row.get(1)?,
                    operation_count: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    pub async fn ai_operation_count_since(&self, since: i64) -> Result<i64> {
        self.with_conn(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM ai_operations WHERE created_at >= ?1",
                params![since],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Daily cost for a provider/plugin-scoped window, bucketed by UTC day
    /// boundary (epoch-ms truncated to the day).
    pub async fn ai_usage_daily(
        &self,
        since: i64,
        until: i64,
        provider: Option<&str>,
        plugin_id: Option<&str>,
    ) -> Result<Vec<(i64, f64)>> {
        let provider = provider.map(|s| s.to_string());
        let plugin_id = plugin_id.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let mut sql = String::from(
                "SELECT (created_at / 86400000) * 86400000 AS day, SUM(cost_usd)
                 FROM ai_operations WHERE created_at >= ?1 AND created_at < ?2",
            );
            if provider.is_some() {
                sql.push_str(" AND provider = ?3");
            }
            if plugin_id.is_some() {
                sql.push_str(" AND plugin_id = ?4");
            }
            sql.push_str(" GROUP BY day ORDER BY day ASC");
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![since, until, provider, plugin_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Retention delete: remove every ledger row older than `cutoff`.
    pub async fn ai_operation_delete_before(&self, cutoff: i64) -> Result<usize> {
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM ai_operations WHERE created_at < ?1",
                params![cutoff],
            )?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(provider: &str, plugin_id: Option<&str>, cost: f64) -> AiOperation {
        AiOperation {
            id: String::new(),
            provider: provider.to_string(),
            model: "test-model".to_string(),
            operation: "classify".to_string(),
            plugin_id: plugin_id.map(|s| s.to_string()),
            pipeline_id: None,
            inbox_item_id: None,
            execution_id: None,
            input_tokens: 100,
            output_tokens: 50,
            cost_usd: cost,
            duration_ms: Some(120),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn rollups_group_correctly() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage
            .plugin_insert("gmail".into(), "gmail".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();
        storage
            .plugin_insert("slack".into(), "slack".into(), "1.0.0".into(), "{}".into(), true)
            .await
            .unwrap();
        storage.ai_operation_insert(op("mock", Some("gmail"), 0.01)).await.unwrap();
        storage.ai_operation_insert(op("mock", Some("gmail"), 0.02)).await.unwrap();
        storage.ai_operation_insert(op("openai", Some("slack"), 0.05)).await.unwrap();

        let by_provider = storage.ai_usage_by_provider_since(0).await.unwrap();
        let mock = by_provider.iter().find(|p| p.provider == "mock").unwrap();
        assert_eq!(mock.operation_count, 2);
        assert!((mock.cost_usd - 0.03).abs() < 1e-9);

        let by_plugin = storage.ai_usage_by_plugin_since(0).await.unwrap();
        let gmail = by_plugin.iter().find(|p| p.plugin_id == "gmail").unwrap();
        assert_eq!(gmail.operation_count, 2);

        assert_eq!(storage.ai_operation_count_since(0).await.unwrap(), 3);
    }
}
