//! Failover LLM client: ordered endpoints, retry with jittered backoff, and
//! a response cache for deterministic-ish calls.
//!
//! Routing per call: build the candidate list from the health tracker
//! (healthy → unknown → degraded → unhealthy), then walk it round-robin until
//! `max_attempts` total attempts are spent. 5xx, timeouts, and empty content
//! back off and move to the next candidate; 4xx fails immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::adapter::ModelFamily;
use super::cache::ResponseCache;
use super::endpoint::{EndpointConfig, HealthTracker};
use super::{ChatMessage, ChatOptions, LlmClient, LlmError, LlmReply};

/// Retry policy across endpoints.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts across all candidates before giving up.
    pub max_attempts: u32,
    /// Base delay; attempt `n` sleeps `base · 2^n · (0.5 + jitter)`.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt after `attempt` failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(8));
        self.backoff_base.mul_f64(factor as f64 * (0.5 + jitter01()))
    }
}

/// Jitter in [0, 1) derived from the clock's sub-second noise.
fn jitter01() -> f64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
        .hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 10_000.0
}

/// Production LLM client with dual-endpoint failover.
pub struct FailoverClient {
    endpoints: Vec<EndpointConfig>,
    model: String,
    family: ModelFamily,
    retry: RetryPolicy,
    api_key: Option<String>,
    http: reqwest::Client,
    health: Arc<HealthTracker>,
    cache: Arc<ResponseCache>,
    /// Tool schemas included in every request when non-empty.
    tools: Vec<Value>,
}

impl FailoverClient {
    pub fn new(endpoints: Vec<EndpointConfig>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            family: ModelFamily::from_model_name(&model),
            endpoints,
            model,
            retry: RetryPolicy::default(),
            api_key: None,
            http: reqwest::Client::new(),
            health: Arc::new(HealthTracker::default()),
            cache: Arc::new(ResponseCache::default()),
            tools: Vec::new(),
        }
    }

    /// Builds the client from `LLM_ENDPOINTS`, `LLM_MODEL`, and `LLM_API_KEY`.
    pub fn from_env() -> Result<Self, LlmError> {
        let urls: Vec<String> = std::env::var("LLM_ENDPOINTS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if urls.is_empty() {
            return Err(LlmError::BadRequest(
                "LLM_ENDPOINTS is not set (comma-separated URLs)".to_string(),
            ));
        }
        let model = std::env::var("LLM_MODEL")
            .map_err(|_| LlmError::BadRequest("LLM_MODEL is not set".to_string()))?;
        let endpoints = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| EndpointConfig::new(url, format!("endpoint-{i}"), Duration::from_secs(120)))
            .collect();
        let mut client = Self::new(endpoints, model);
        client.api_key = std::env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
        Ok(client)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn health(&self) -> Arc<HealthTracker> {
        Arc::clone(&self.health)
    }

    pub fn endpoints(&self) -> &[EndpointConfig] {
        &self.endpoints
    }

    /// Starts the background health probe for this client's endpoints.
    pub fn start_health_probe(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        super::endpoint::spawn_health_probe(
            self.http.clone(),
            self.endpoints.clone(),
            Arc::clone(&self.health),
            interval,
        )
    }

    /// One request against one endpoint. `Transient` marks a retryable miss.
    async fn try_endpoint(
        &self,
        endpoint: &EndpointConfig,
        body: &Value,
    ) -> Result<LlmReply, LlmError> {
        let mut request = self
            .http
            .post(endpoint.chat_url())
            .timeout(endpoint.timeout)
            .json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Transient(format!("{}: {e}", endpoint.name)))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::BadRequest(format!(
                "{} returned {status}: {}",
                endpoint.name,
                text.chars().take(200).collect::<String>()
            )));
        }
        if !status.is_success() {
            return Err(LlmError::Transient(format!(
                "{} returned {status}",
                endpoint.name
            )));
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transient(format!("{}: invalid JSON body: {e}", endpoint.name)))?;
        self.family.extract(&json)
    }
}

#[async_trait]
impl LlmClient for FailoverClient {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<LlmReply, LlmError> {
        if self.endpoints.is_empty() {
            return Err(LlmError::BadRequest("no endpoints configured".to_string()));
        }

        let cache_key = if ResponseCache::cacheable(options) {
            let key = ResponseCache::key(messages, options);
            if let Some(hit) = self.cache.get(key) {
                tracing::debug!(key, "llm cache hit");
                return Ok(hit);
            }
            Some(key)
        } else {
            None
        };

        let body = self
            .family
            .request_body(&self.model, messages, options, &self.tools);
        let candidates = self.health.ordered(&self.endpoints);
        let mut last_error = String::new();

        for attempt in 0..self.retry.max_attempts {
            let endpoint = candidates[attempt as usize % candidates.len()];
            tracing::debug!(endpoint = %endpoint.name, attempt, "llm request");
            match self.try_endpoint(endpoint, &body).await {
                Ok(reply) => {
                    self.health.record_success(&endpoint.name);
                    if let Some(key) = cache_key {
                        self.cache.put(key, reply.clone());
                    }
                    return Ok(reply);
                }
                Err(LlmError::BadRequest(msg)) => {
                    // Not the endpoint's fault; do not retry elsewhere.
                    return Err(LlmError::BadRequest(msg));
                }
                Err(e) => {
                    self.health.record_failure(&endpoint.name);
                    last_error = e.to_string();
                    tracing::warn!(endpoint = %endpoint.name, attempt, error = %last_error, "llm attempt failed");
                    if attempt + 1 < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }
        Err(LlmError::Unavailable(format!(
            "all {} attempts failed; last error: {last_error}",
            self.retry.max_attempts
        )))
    }
}
