use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use envoy_common::{EnvoyError, Result};
use serde::{Deserialize, Serialize};

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::gemini::{GeminiClient, GeminiEndpoint};
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "gemini" or "openai" (any OpenAI-compatible endpoint)
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// Vertex AI project; when set, Gemini requests go through Vertex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_location() -> String {
    "us-central1".into()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: "gemini-2.0-flash-exp".into(),
            api_key: None,
            api_url: None,
            project: None,
            location: default_location(),
            timeout_ms: default_timeout_ms(),
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Resolve the credential from config or the provider's environment variables.
    ///
    /// Priority:
    /// 1. Explicit non-empty `api_key`
    /// 2. "gemini" -> GEMINI_API_KEY, then GOOGLE_API_KEY (Vertex: GOOGLE_ACCESS_TOKEN)
    /// 3. "openai" -> OPENAI_API_KEY
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        let env_vars: &[&str] = match (self.provider.as_str(), self.project.is_some()) {
            ("gemini", true) => &["GOOGLE_ACCESS_TOKEN"],
            ("gemini", false) => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            ("openai", _) => &["OPENAI_API_KEY"],
            _ => &[],
        };

        env_vars
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty())
    }

    fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Caps the number of generation requests in flight.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| EnvoyError::Generation(format!("Semaphore acquire failed: {e}")))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Build the provider client wrapped in retry and concurrency limits.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let base_client: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" => Box::new(OpenAiClient::with_timeout(
            config.api_url.clone(),
            config.model.clone(),
            config.resolve_api_key(),
            config.timeout(),
        )),
        "gemini" => {
            let credential = config.resolve_api_key().ok_or_else(|| {
                EnvoyError::Config(
                    "Gemini requires an API key (GEMINI_API_KEY) or, for Vertex AI, an access token (GOOGLE_ACCESS_TOKEN)"
                        .to_string(),
                )
            })?;
            let endpoint = match (&config.project, &config.api_url) {
                (Some(project), _) => GeminiEndpoint::Vertex {
                    project: project.clone(),
                    location: config.location.clone(),
                },
                (None, Some(url)) => GeminiEndpoint::AiStudio {
                    base_url: url.clone(),
                },
                (None, None) => GeminiEndpoint::ai_studio(),
            };
            Box::new(GeminiClient::new(
                endpoint,
                config.model.clone(),
                credential,
                config.timeout(),
            ))
        }
        other => {
            return Err(EnvoyError::Config(format!(
                "Unknown LLM provider: {other}"
            )));
        }
    };

    let retrying: Box<dyn LlmClient> =
        Box::new(RetryingClient::new(base_client, config.retry.clone()));

    let semaphored = SemaphoredClient::new(Arc::from(retrying), config.max_concurrent_requests);

    Ok(Arc::new(semaphored))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_CONFIG: &str = r#"
provider = "openai"
model = "llama3"
api_url = "http://localhost:11434"
max_concurrent_requests = 4

[retry]
max_retries = 5
initial_delay_ms = 1000
max_delay_ms = 60000
backoff_multiplier = 3.0
"#;

    #[test]
    fn deserialize_config_from_toml() {
        let config: LlmConfig = toml::from_str(TOML_CONFIG).unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:11434"));
        assert!(config.api_key.is_none());
        assert_eq!(config.max_concurrent_requests, 4);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay_ms, 1000);
    }

    #[test]
    fn deserialize_config_defaults() {
        let toml_str = r#"
provider = "gemini"
model = "gemini-2.0-flash-exp"
project = "acme"
"#;
        let config: LlmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.location, "us-central1");
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.max_concurrent_requests, 2);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.project.as_deref(), Some("acme"));
    }

    #[test]
    fn explicit_key_wins_over_environment() {
        let config = LlmConfig {
            api_key: Some("explicit".into()),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("explicit"));
    }

    #[test]
    fn build_openai_client_without_key() {
        let config = LlmConfig {
            provider: "openai".into(),
            model: "llama3".into(),
            ..Default::default()
        };
        let client = build_llm_client(&config).unwrap();
        assert_eq!(client.model_name(), "llama3");
    }

    #[test]
    fn build_gemini_client_with_key() {
        let config = LlmConfig {
            api_key: Some("AIza-test".into()),
            ..Default::default()
        };
        let client = build_llm_client(&config).unwrap();
        assert_eq!(client.model_name(), "gemini-2.0-flash-exp");
    }

    #[test]
    fn build_unknown_provider_fails() {
        let config = LlmConfig {
            provider: "bedrock".into(),
            api_key: Some("k".into()),
            ..Default::default()
        };
        assert!(matches!(
            build_llm_client(&config),
            Err(EnvoyError::Config(_))
        ));
    }

    #[tokio::test]
    async fn semaphored_client_limits_concurrency() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingClient {
            concurrent: Arc<AtomicU32>,
            max_seen: Arc<AtomicU32>,
        }

        #[async_trait]
        impl LlmClient for CountingClient {
            async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
                let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(LlmResponse {
                    content: "ok".to_string(),
                    model: "test".to_string(),
                    usage: None,
                    finish_reason: None,
                })
            }
            fn model_name(&self) -> &str {
                "test"
            }
        }

        let max_seen = Arc::new(AtomicU32::new(0));
        let inner = Arc::new(CountingClient {
            concurrent: Arc::new(AtomicU32::new(0)),
            max_seen: max_seen.clone(),
        });
        let semaphored = Arc::new(SemaphoredClient::new(inner, 2));

        let mut handles = vec![];
        for _ in 0..6 {
            let client = semaphored.clone();
            handles.push(tokio::spawn(async move {
                client.complete(LlmRequest::default()).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
