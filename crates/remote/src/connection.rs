//! Per-agent client for delegating tasks.

use async_trait::async_trait;
use envoy_common::{EnvoyError, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::protocol::{AgentCard, DelegationRequest, RawAgentResponse};

/// A remote agent the orchestrator can delegate to.
#[async_trait]
pub trait RemoteAgent: Send + Sync {
    /// The self-description obtained at discovery.
    fn card(&self) -> &AgentCard;

    /// Send one task and return the validated response payload.
    ///
    /// Fails with `Connection` when the agent cannot be reached and with
    /// `Protocol` when the reply is not a success envelope carrying a task.
    async fn send(&self, request: &DelegationRequest) -> Result<RawAgentResponse>;
}

/// JSON-RPC over HTTP connection to one agent endpoint.
///
/// Built once at discovery and reused for the process lifetime. The inner
/// `reqwest::Client` is shared across all agents.
pub struct HttpRemoteAgent {
    card: AgentCard,
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpRemoteAgent {
    pub fn new(card: AgentCard, endpoint: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            card,
            endpoint: endpoint.into(),
            http_client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteAgent for HttpRemoteAgent {
    fn card(&self) -> &AgentCard {
        &self.card
    }

    async fn send(&self, request: &DelegationRequest) -> Result<RawAgentResponse> {
        info!(
            agent = %self.card.name,
            message_id = %request.message_id,
            task_id = %request.task_id,
            context_id = %request.context_id,
            "Delegating task"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request.to_rpc())
            .send()
            .await
            .map_err(|e| {
                EnvoyError::Connection(format!("failed to reach {}: {e}", self.endpoint))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnvoyError::Connection(format!(
                "{} answered with HTTP {status}",
                self.endpoint
            )));
        }

        let body = response.text().await.map_err(|e| {
            EnvoyError::Connection(format!("failed to read response from {}: {e}", self.endpoint))
        })?;

        debug!(
            agent = %self.card.name,
            body_preview = %body.chars().take(200).collect::<String>(),
            "Raw agent response"
        );

        let envelope: Value = serde_json::from_str(&body)
            .map_err(|e| EnvoyError::Protocol(format!("response is not JSON: {e}")))?;

        RawAgentResponse::from_envelope(envelope)
    }
}
