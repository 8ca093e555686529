use failsafe::futures::CircuitBreaker as _;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

use crate::circuit_breaker::{create_llm_circuit_breaker, LlmCircuitBreaker};
use crate::config::LlmSettings;
use crate::errors::AppError;
use crate::llm_cache::ResponseCache;

/// One completion request sent to the LLM service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    /// `data:` URL attached as an image part of the user message.
    pub image_data: Option<String>,
    /// Ask the service for a bare JSON object.
    pub json_mode: bool,
}

/// The external LLM collaborator: one request in, the raw completion text out.
pub trait LlmService: Send + Sync {
    fn complete(
        &self,
        request: &LlmRequest,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    breaker: LlmCircuitBreaker,
    cache: Option<ResponseCache>,
}

impl OpenAiClient {
    /// Creates a new `OpenAiClient`.
    ///
    /// The API key is read from `settings` once here and never logged.
    pub fn new(settings: &LlmSettings) -> Result<Self, AppError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = settings.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| AppError::StageCall(format!("Failed to create LLM client: {}", e)))?;

        let cache = (settings.cache_ttl_secs > 0)
            .then(|| ResponseCache::new(Duration::from_secs(settings.cache_ttl_secs), 10_000));

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            breaker: create_llm_circuit_breaker(),
            cache,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &LlmRequest) -> Value {
        let user_content = match &request.image_data {
            Some(data_url) => json!([
                { "type": "text", "text": request.user },
                { "type": "image_url", "image_url": { "url": data_url } }
            ]),
            None => json!(request.user),
        };

        let mut body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": user_content }
            ]
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    async fn send(&self, body: Value) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!("POST {} (model {})", url, self.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::StageCall(format!("LLM request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::StageCall(format!(
                "LLM service returned {}: {}",
                status, error_text
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::StageCall(format!("Failed to parse LLM service response: {}", e))
        })?;

        data.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::StageCall("LLM response missing choices[0].message.content".to_string())
            })
    }
}

impl LlmService for OpenAiClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, AppError> {
        let cache_key = ResponseCache::key(&self.model, request);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&cache_key).await {
                tracing::debug!("LLM cache HIT (validated)");
                return Ok(hit);
            }
        }

        let body = self.request_body(request);
        let content = self
            .breaker
            .call(self.send(body))
            .await
            .map_err(|e| match e {
                failsafe::Error::Inner(inner) => inner,
                failsafe::Error::Rejected => AppError::StageCall(
                    "LLM circuit breaker open, call rejected".to_string(),
                ),
            })?;

        if let Some(cache) = &self.cache {
            cache.insert(cache_key, &content).await;
        }

        Ok(content)
    }
}
