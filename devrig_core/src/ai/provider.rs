//! `AiProvider` trait plus the two concrete providers shipped with this
//! runtime: a zero-config `MockProvider` (so the router is exercisable
//! offline, mirroring the teacher's bundled `calculator` example plugin
//! that needs no external service) and a generic `HttpProvider` that
//! shapes a vendor-neutral completion request, per spec.md §1's exclusion
//! of "specific LLM provider HTTP shapes".

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;

use super::error::ProviderError;

#[derive(Debug, Clone)]
pub struct AiResponse {
    pub output: Value,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub duration_ms: i64,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn models(&self) -> Vec<String>;
    async fn is_available(&self) -> bool;

    async fn classify(&self, model: &str, input: Value) -> Result<AiResponse, ProviderError>;
    async fn summarize(&self, model: &str, input: Value) -> Result<AiResponse, ProviderError>;
    async fn draft(&self, model: &str, input: Value) -> Result<AiResponse, ProviderError>;
    async fn complete(&self, model: &str, input: Value) -> Result<AiResponse, ProviderError>;
}

/// Deterministic offline provider. Echoes a canned response shaped by the
/// operation so the router, ledger, and sync scheduler's post-sync AI step
/// are exercisable without network access or a real API key.
pub struct MockProvider {
    id: String,
}

impl MockProvider {
    pub fn new() -> Self {
        Self { id: "mock".to_string() }
    }

    fn respond(&self, op: &str, input: &Value) -> AiResponse {
        let output = match op {
            "classify" => serde_json::json!({ "category": "general", "confidence": 0.5 }),
            "summarize" => serde_json::json!({
                "summary": input.get("title").cloned().unwrap_or(Value::String(String::new()))
            }),
            "draft" => serde_json::json!({ "draft": "Thanks, I'll take a look." }),
            _ => serde_json::json!({ "echo": input }),
        };
        AiResponse {
            output,
            input_tokens: 16,
            output_tokens: 8,
            cost_usd: 0.0,
            duration_ms: 1,
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Mock Provider"
    }

    fn models(&self) -> Vec<String> {
        vec!["mock-1".to_string()]
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn classify(&self, _model: &str, input: Value) -> Result<AiResponse, ProviderError> {
        Ok(self.respond("classify", &input))
    }

    async fn summarize(&self, _model: &str, input: Value) -> Result<AiResponse, ProviderError> {
        Ok(self.respond("summarize", &input))
    }

    async fn draft(&self, _model: &str, input: Value) -> Result<AiResponse, ProviderError> {
        Ok(self.respond("draft", &input))
    }

    async fn complete(&self, _model: &str, input: Value) -> Result<AiResponse, ProviderError> {
        Ok(self.respond("complete", &input))
    }
}

/// A generic JSON completion provider over HTTP, not tied to one vendor's
/// wire format. `api_key` is resolved once at construction; rotating the
/// backing secret requires constructing a fresh provider, which
/// invalidates this provider's cached `reqwest::Client` implicitly.
pub struct HttpProvider {
    id: String,
    name: String,
    endpoint: String,
    api_key: String,
    models: Vec<String>,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(id: String, name: String, endpoint: String, api_key: String, models: Vec<String>) -> Self {
        Self {
            id,
            name,
            endpoint,
            api_key,
            models,
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, model: &str, op: &str, input: Value) -> Result<AiResponse, ProviderError> {
        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": model, "operation": op, "input": input }))
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthenticationFailed);
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(ProviderError::InvalidRequest(status.to_string()));
        }
        if !status.is_success() {
            return Err(ProviderError::Unknown {
                status: Some(status.as_u16()),
                message: status.to_string(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        Ok(AiResponse {
            output: body.get("output").cloned().unwrap_or(Value::Null),
            input_tokens: body.get("inputTokens").and_then(Value::as_i64).unwrap_or(0),
            output_tokens: body.get("outputTokens").and_then(Value::as_i64).unwrap_or(0),
            cost_usd: body.get("costUsd").and_then(Value::as_f64).unwrap_or(0.0),
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }
}

#[async_trait]
impl AiProvider for HttpProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn classify(&self, model: &str, input: Value) -> Result<AiResponse, ProviderError> {
        self.call(model, "classify", input).await
    }

    async fn summarize(&self, model: &str, input: Value) -> Result<AiResponse, ProviderError> {
        self.call(model, "summarize", input).await
    }

    async fn draft(&self, model: &str, input: Value) -> Result<AiResponse, ProviderError> {
        self.call(model, "draft", input).await
    }

    async fn complete(&self, model: &str, input: Value) -> Result<AiResponse, ProviderError> {
        self.call(model, "complete", input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_is_always_available() {
        let provider = MockProvider::new();
        assert!(provider.is_available().await);
        let response = provider
            .classify("mock-1", serde_json::json!({"title": "hi"}))
            .await
            .unwrap();
        assert_eq!(response.output["category"], "general");
    }
}
