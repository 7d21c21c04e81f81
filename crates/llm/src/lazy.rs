//! Generation client constructed on first use.

use std::sync::Arc;

use async_trait::async_trait;
use envoy_common::Result;
use once_cell::sync::OnceCell;
use tracing::info;

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::config::{build_llm_client, LlmConfig};

/// Defers backend construction (credential lookup, HTTP client setup) until
/// the first request, then reuses the same client for every later call.
///
/// A failed construction is not cached; the next request tries again.
pub struct LazyLlmClient {
    config: LlmConfig,
    client: OnceCell<Arc<dyn LlmClient>>,
}

impl LazyLlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.client.get().is_some()
    }

    fn get(&self) -> Result<&Arc<dyn LlmClient>> {
        self.client.get_or_try_init(|| {
            info!(
                provider = %self.config.provider,
                model = %self.config.model,
                "Initializing generation client"
            );
            build_llm_client(&self.config)
        })
    }
}

#[async_trait]
impl LlmClient for LazyLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let client = self.get()?.clone();
        client.complete(request).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
