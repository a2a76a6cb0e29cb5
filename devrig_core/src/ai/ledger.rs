use std::sync::Arc;

use crate::storage::{AiOperation, PluginUsage, ProviderUsage, Storage};

use super::error::ProviderError;

/// Thin facade over the `ai_operations` table's repository functions,
/// giving the AI subsystem one narrow seam into storage rather than
/// reaching for repository methods directly.
pub struct Ledger {
    storage: Arc<Storage>,
}

impl Ledger {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn record(&self, operation: AiOperation) -> Result<AiOperation, ProviderError> {
        self.storage
            .ai_operation_insert(operation)
            .await
            .map_err(|e| ProviderError::Unknown { status: None, message: e.to_string() })
    }

    pub async fn usage_by_provider_since(&self, since: i64) -> Result<Vec<ProviderUsage>, ProviderError> {
        self.storage
            .ai_usage_by_provider_since(since)
            .await
            .map_err(|e| ProviderError::Unknown { status: None, message: e.to_string() })
    }

    pub async fn usage_by_plugin_since(&self, since: i64) -> Result<Vec<PluginUsage>, ProviderError> {
        self.storage
            .ai_usage_by_plugin_since(since)
            .await
            .map_err(|e| ProviderError::Unknown { status: None, message: e.to_string() })
    }

    pub async fn operation_count_since(&self, since: i64) -> Result<i64, ProviderError> {
        self.storage
            .ai_operation_count_since(since)
            .await
            .map_err(|e| ProviderError::Unknown { status: None, message: e.to_string() })
    }

    pub async fn daily_usage(
        &self,
        since: i64,
        until: i64,
        provider: Option<&str>,
        plugin_id: Option<&str>,
    ) -> Result<Vec<(i64, f64)>, ProviderError> {
        self.storage
            .ai_usage_daily(since, until, provider, plugin_id)
            .await
            .map_err(|e| ProviderError::Unknown { status: None, message: e.to_string() })
    }

    pub async fn delete_before(&self, cutoff: i64) -> Result<usize, ProviderError> {
        self.storage
            .ai_operation_delete_before(cutoff)
            .await
            .map_err(|e| ProviderError::Unknown { status: None, message: e.to_string() })
    }
}
