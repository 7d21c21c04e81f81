use std::time::Duration;

use async_trait::async_trait;
use envoy_common::{EnvoyError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// HTTP statuses worth another attempt.
const TRANSIENT_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn is_retryable(error: &EnvoyError) -> bool {
        match error {
            EnvoyError::Connection(_) => true,
            EnvoyError::Generation(msg) => {
                api_status(msg).is_some_and(|status| TRANSIENT_STATUSES.contains(&status))
            }
            _ => false,
        }
    }

    fn parse_retry_after(error_msg: &str) -> Option<u64> {
        // ASCII lowering keeps byte offsets aligned with the original text.
        let lower = error_msg.to_ascii_lowercase();
        let pos = lower.find("retry-after")?;
        error_msg[pos..]
            .split_whitespace()
            .skip(1)
            .find_map(|word| {
                word.trim_end_matches(|c: char| !c.is_ascii_digit())
                    .parse::<u64>()
                    .ok()
            })
            .map(|secs| secs.saturating_mul(1000))
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * jitter_fraction(attempt)) as u64;
        (base as u64)
            .saturating_add(jitter)
            .min(self.config.max_delay_ms)
    }
}

/// Status code following a backend's "API error " prefix.
fn api_status(msg: &str) -> Option<u16> {
    let (_, rest) = msg.split_once("API error ")?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Deterministic spread in [0, 1) derived from the attempt number.
fn jitter_fraction(attempt: u32) -> f64 {
    let x = attempt.wrapping_mul(2_654_435_761);
    (x % 100) as f64 / 100.0
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            let error = match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if attempt >= self.config.max_retries || !Self::is_retryable(&error) {
                return Err(error);
            }

            let error_msg = error.to_string();
            let delay = Self::parse_retry_after(&error_msg)
                .unwrap_or_else(|| self.compute_delay(attempt))
                .min(self.config.max_delay_ms);

            warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay,
                error = %error_msg,
                "Retrying generation request"
            );

            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_retry_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn transient_failures_are_retryable() {
        type C = RetryingClient<ScriptedClient>;
        assert!(C::is_retryable(&EnvoyError::Generation(
            "Gemini API error 429 Too Many Requests: RESOURCE_EXHAUSTED".into()
        )));
        assert!(C::is_retryable(&EnvoyError::Generation(
            "OpenAI API error 503 Service Unavailable".into()
        )));
        assert!(C::is_retryable(&EnvoyError::Connection("connection refused".into())));
        assert!(!C::is_retryable(&EnvoyError::Generation(
            "Gemini API error 401 Unauthorized".into()
        )));
        assert!(!C::is_retryable(&EnvoyError::Config("missing key".into())));
    }

    #[test]
    fn parse_retry_after_from_error() {
        let msg = "429 Too Many Requests, Retry-After: 5";
        assert_eq!(
            RetryingClient::<ScriptedClient>::parse_retry_after(msg),
            Some(5000)
        );
        assert_eq!(
            RetryingClient::<ScriptedClient>::parse_retry_after("503"),
            None
        );
    }

    #[test]
    fn retry_after_survives_non_ascii_text() {
        type C = RetryingClient<ScriptedClient>;
        assert_eq!(C::parse_retry_after("İİİİİİİİİİİİ retry-afterééé 1"), Some(1000));
        assert_eq!(C::parse_retry_after("ÉÉÉ Retry-After: 2"), Some(2000));
    }

    #[test]
    fn huge_retry_after_saturates() {
        type C = RetryingClient<ScriptedClient>;
        assert_eq!(
            C::parse_retry_after("retry-after: 18446744073709552"),
            Some(u64::MAX)
        );
    }

    #[test]
    fn status_digits_in_body_do_not_make_errors_transient() {
        type C = RetryingClient<ScriptedClient>;
        assert!(!C::is_retryable(&EnvoyError::Generation(
            "Gemini API error 400 Bad Request: maxOutputTokens: 500 exceeds limit".into()
        )));
        assert!(!C::is_retryable(&EnvoyError::Generation(
            "OpenAI API error 404 Not Found: model unavailable".into()
        )));
        assert!(!C::is_retryable(&EnvoyError::Generation(
            "Failed to parse Gemini response: expected value at line 503".into()
        )));
        assert!(C::is_retryable(&EnvoyError::Generation(
            "Gemini API error 503 Service Unavailable: try again".into()
        )));
        assert!(C::is_retryable(&EnvoyError::Generation(
            "OpenAI API error 408 Request Timeout".into()
        )));
    }

    #[tokio::test]
    async fn odd_retry_after_text_still_retries_within_cap() {
        let client = RetryingClient::new(
            ScriptedClient::failing_times(
                1,
                "Gemini API error 429 Too Many Requests: İİİ retry-after: 18446744073709552",
            ),
            fast_config(2),
        );
        let response = client.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn compute_delay_respects_max() {
        let client = RetryingClient::new(
            ScriptedClient::failing_times(0, ""),
            RetryConfig {
                max_retries: 5,
                initial_delay_ms: 500,
                max_delay_ms: 2000,
                backoff_multiplier: 10.0,
            },
        );
        assert!(client.compute_delay(5) <= 2000);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let client = RetryingClient::new(
            ScriptedClient::failing_times(2, "Gemini API error 503 Service Unavailable"),
            fast_config(3),
        );
        let response = client.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let client = RetryingClient::new(
            ScriptedClient::failing_times(10, "OpenAI API error 502 Bad Gateway"),
            fast_config(2),
        );
        assert!(client.complete(LlmRequest::default()).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let client = RetryingClient::new(
            ScriptedClient::failing_times(10, "Gemini API error 400 Bad Request"),
            fast_config(3),
        );
        assert!(client.complete(LlmRequest::default()).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 1.0,
        }
    }

    struct ScriptedClient {
        failures: u32,
        message: String,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn failing_times(failures: u32, message: &str) -> Self {
            Self {
                failures,
                message: message.to_string(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(EnvoyError::Generation(self.message.clone()));
            }
            Ok(LlmResponse {
                content: "ok".to_string(),
                model: "scripted".to_string(),
                usage: None,
                finish_reason: None,
            })
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
    }
}
