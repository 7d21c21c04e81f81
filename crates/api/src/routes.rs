//! HTTP route handlers for the API.

use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use envoy_common::new_id;
use envoy_coordinator::{TurnRequest, TurnStage, TurnStatus, VerificationVerdict};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Requests larger than this are rejected before reaching the orchestrator.
const MAX_CONTENT_LENGTH: usize = 10_000;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub agents: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        agents: state.orchestrator.directory().len(),
    })
}

#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<AgentInfo>,
}

/// List the agents registered at discovery.
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<AgentsResponse> {
    let agents = state
        .orchestrator
        .directory()
        .iter()
        .map(|agent| AgentInfo {
            name: agent.name.clone(),
            description: agent.description.clone(),
            url: agent.endpoint.clone(),
            version: agent.version.clone(),
            skills: agent.skills.clone(),
        })
        .collect();

    Json(AgentsResponse { agents })
}

/// Message request body.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
    /// Reuse an existing conversation; a new one is started when absent
    #[serde(default)]
    pub session_id: Option<String>,
    /// Delegate to this agent instead of inferring one
    #[serde(default)]
    pub agent: Option<String>,
}

/// Message response body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub session_id: String,
    pub content: String,
    pub status: TurnStatus,
    pub agents: Vec<String>,
    pub stages: Vec<TurnStage>,
    pub verdicts: Vec<VerificationVerdict>,
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

fn validate_content(content: &str) -> Result<(), ErrorResponse> {
    if content.trim().is_empty() {
        return Err(ErrorResponse {
            error: "content must not be empty".into(),
            code: "EMPTY_CONTENT",
        });
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(ErrorResponse {
            error: format!("content exceeds {} bytes", MAX_CONTENT_LENGTH),
            code: "CONTENT_TOO_LARGE",
        });
    }
    Ok(())
}

/// Run one turn and return its final text with the pipeline trace.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ErrorResponse> {
    validate_content(&request.content)?;

    let session_id = request.session_id.unwrap_or_else(new_id);
    info!(
        session_id = %session_id,
        content_preview = %request.content.chars().take(50).collect::<String>(),
        "Received message"
    );

    let mut turn = TurnRequest::new(request.content, session_id.clone());
    if let Some(agent) = request.agent {
        turn = turn.with_agent(agent);
    }

    let outcome = state.orchestrator.handle_turn(turn).await;
    debug!(session_id = %session_id, status = ?outcome.status, "Turn finished");

    Ok(Json(MessageResponse {
        session_id,
        content: outcome.content,
        status: outcome.status,
        agents: outcome.agents,
        stages: outcome.stages,
        verdicts: outcome.verdicts,
    }))
}

/// Stream request body.
#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Run one turn as server-sent events: a progress event, then the completion.
///
/// Dropping the connection drops the turn and any in-flight delegation.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ErrorResponse> {
    validate_content(&request.content)?;

    let session_id = request.session_id.unwrap_or_else(new_id);
    info!(session_id = %session_id, "Streaming turn");

    let orchestrator = Arc::clone(&state.orchestrator);
    let content = request.content;
    let events = async_stream::stream! {
        let turn = orchestrator.stream(content, session_id);
        futures::pin_mut!(turn);
        while let Some(event) = turn.next().await {
            let name = if event.is_complete { "complete" } else { "progress" };
            match Event::default().event(name).json_data(&event) {
                Ok(sse) => yield Ok(sse),
                Err(e) => warn!(error = %e, "Failed to encode turn event"),
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_content() {
        let err = validate_content("   ").unwrap_err();
        assert_eq!(err.code, "EMPTY_CONTENT");
    }

    #[test]
    fn rejects_oversized_content() {
        let err = validate_content(&"a".repeat(MAX_CONTENT_LENGTH + 1)).unwrap_err();
        assert_eq!(err.code, "CONTENT_TOO_LARGE");
    }

    #[test]
    fn accepts_normal_content() {
        assert!(validate_content("What documents do I need to import coffee?").is_ok());
    }
}
