//! Model-assisted agent routing.
//!
//! Asks the generation backend which discovered agent should answer a query.
//! The model's choice is only a hint:
//!
//! - the agent name is validated against the directory through [`resolve`]
//! - the topic is validated against the known topics
//! - confidence is clamped to [0.0, 1.0]
//!
//! Any failure is returned to the caller, which falls back to keyword inference.

use std::sync::Arc;

use envoy_common::{EnvoyError, Result};
use envoy_llm::{LlmClient, LlmRequest};
use envoy_remote::AgentDirectory;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::parse::{extract_json_object, truncate_chars};
use crate::selection::{resolve, Topic};

const ROUTER_TEMPERATURE: f32 = 0.3;
const ROUTER_MAX_TOKENS: u32 = 200;

/// Queries longer than this are not sent to the router.
const MAX_INPUT_CONTENT_LENGTH: usize = 10_000;

const MAX_REASONING_LENGTH: usize = 500;

/// Phrases that suggest the query is trying to steer the router.
const INJECTION_PATTERNS: &[&str] = &[
    "ignore previous",
    "ignore all previous",
    "disregard previous",
    "new instructions",
    "system prompt",
    "you are now",
    "pretend you are",
    "jailbreak",
];

/// A validated routing choice.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    /// Name of a directory entry
    pub agent: String,
    pub topic: Option<Topic>,
    pub confidence: f32,
    pub reasoning: String,
}

pub struct LlmRouter {
    client: Arc<dyn LlmClient>,
}

impl LlmRouter {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    pub async fn route(&self, query: &str, directory: &AgentDirectory) -> Result<RouteDecision> {
        validate_input_content(query)?;
        if directory.is_empty() {
            return Err(EnvoyError::Config("no agents to route to".into()));
        }

        let prompt = build_prompt(query, &directory.summary());
        let request = LlmRequest::json_prompt(prompt, ROUTER_TEMPERATURE, ROUTER_MAX_TOKENS);
        let response = self.client.complete(request).await?;

        debug!(response = %response.content, "Router response");

        let decision = parse_response(&response.content, directory)?;
        info!(
            agent = %decision.agent,
            topic = ?decision.topic,
            confidence = %decision.confidence,
            "Model routing decision"
        );
        Ok(decision)
    }
}

fn build_prompt(query: &str, agents: &str) -> String {
    format!(
        r#"You are a request router for an orchestrator that delegates to specialist agents.

Available agents (one JSON object per line):
{agents}

Choose the single agent best suited to answer the user's query.

Respond ONLY with a JSON object, no other text:
{{"agent": "exact agent name", "topic": "imports|invoices|unknown", "confidence": 0.0-1.0, "reasoning": "brief explanation"}}

User query: "{query}""#
    )
}

/// Reject oversized input and log likely steering attempts.
fn validate_input_content(content: &str) -> Result<()> {
    if content.len() > MAX_INPUT_CONTENT_LENGTH {
        return Err(EnvoyError::Config(format!(
            "Input content exceeds maximum length of {} bytes",
            MAX_INPUT_CONTENT_LENGTH
        )));
    }

    let lower = content.to_lowercase();
    if let Some(pattern) = INJECTION_PATTERNS.iter().find(|p| lower.contains(**p)) {
        warn!(pattern = %pattern, "Query contains a possible prompt injection phrase");
    }
    Ok(())
}

fn parse_response(response: &str, directory: &AgentDirectory) -> Result<RouteDecision> {
    let json_str = extract_json_object(response).ok_or_else(|| {
        EnvoyError::Generation(format!(
            "No valid JSON found in router response: {}",
            response.chars().take(200).collect::<String>()
        ))
    })?;

    let parsed: Value = serde_json::from_str(json_str)
        .map_err(|e| EnvoyError::Generation(format!("Invalid router JSON: {e}")))?;

    let requested = parsed
        .get("agent")
        .and_then(Value::as_str)
        .ok_or_else(|| EnvoyError::Generation("router response has no agent".into()))?;
    let agent = resolve(requested, directory)?;

    let topic = parsed.get("topic").and_then(Value::as_str).and_then(Topic::parse);

    let confidence = parsed
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.5) as f32;

    let reasoning = parsed
        .get("reasoning")
        .and_then(Value::as_str)
        .map(|r| truncate_chars(r, MAX_REASONING_LENGTH))
        .unwrap_or_else(|| "No reasoning provided".to_string());

    Ok(RouteDecision {
        agent: agent.name.clone(),
        topic,
        confidence,
        reasoning,
    })
}
