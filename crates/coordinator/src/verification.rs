//! Safety and relevance check applied to every agent answer.
//!
//! The gate prompts the generation backend for a JSON verdict and treats the
//! reply as untrusted: it is parsed tolerantly, every field is validated, and
//! the overall status is always recomputed here.

use std::sync::Arc;

use envoy_common::{EnvoyError, Result};
use envoy_llm::{LlmClient, LlmRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::parse::{extract_json_object, truncate_chars};

const VERIFICATION_TEMPERATURE: f32 = 0.1;
const VERIFICATION_MAX_TOKENS: u32 = 500;

const MAX_ISSUE_LENGTH: usize = 200;
const MAX_ISSUES: usize = 20;
const MAX_EXPLANATION_LENGTH: usize = 1000;

pub const FAIL_OPEN_EXPLANATION: &str = "Verification system unavailable, proceeding with caution";
pub const VERIFICATION_UNAVAILABLE: &str = "verification_unavailable";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Unknown levels are treated as `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "none" => RiskLevel::None,
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            _ => RiskLevel::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    Relevant,
    SecurityRisk,
}

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Model,
    FailOpen,
    FailClosed,
}

/// What the gate reports when no verdict can be obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    FailOpen,
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub is_relevant: bool,
    pub is_safe: bool,
    pub topic_match: bool,
    pub risk_level: RiskLevel,
    pub explanation: String,
    pub detected_issues: Vec<String>,
    pub derived_status: DerivedStatus,
    pub source: VerdictSource,
}

impl VerificationVerdict {
    pub fn new(
        is_relevant: bool,
        is_safe: bool,
        topic_match: bool,
        risk_level: RiskLevel,
        explanation: impl Into<String>,
        detected_issues: Vec<String>,
        source: VerdictSource,
    ) -> Self {
        let derived_status = if is_relevant && is_safe {
            DerivedStatus::Relevant
        } else {
            DerivedStatus::SecurityRisk
        };
        Self {
            is_relevant,
            is_safe,
            topic_match,
            risk_level,
            explanation: explanation.into(),
            detected_issues,
            derived_status,
            source,
        }
    }

    pub fn fail_open() -> Self {
        Self::new(
            true,
            true,
            true,
            RiskLevel::None,
            FAIL_OPEN_EXPLANATION,
            Vec::new(),
            VerdictSource::FailOpen,
        )
    }

    pub fn fail_closed() -> Self {
        Self::new(
            false,
            false,
            false,
            RiskLevel::High,
            "Verification system unavailable, answer withheld",
            vec![VERIFICATION_UNAVAILABLE.to_string()],
            VerdictSource::FailClosed,
        )
    }

    pub fn is_verified(&self) -> bool {
        self.derived_status == DerivedStatus::Relevant
    }
}

/// Classifies agent answers through an injected generation backend.
pub struct VerificationGate {
    client: Arc<dyn LlmClient>,
    policy: FailurePolicy,
}

impl VerificationGate {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Classify `answer` for `query`. Never fails; backend or parse failures
    /// resolve through the configured [`FailurePolicy`].
    pub async fn verify(&self, query: &str, answer: &str, expected_topic: &str) -> VerificationVerdict {
        match self.try_verify(query, answer, expected_topic).await {
            Ok(verdict) => {
                debug!(
                    status = ?verdict.derived_status,
                    risk = ?verdict.risk_level,
                    issues = ?verdict.detected_issues,
                    "Verification verdict"
                );
                verdict
            }
            Err(e) => match self.policy {
                FailurePolicy::FailOpen => {
                    warn!(
                        target: "envoy::audit",
                        fail_open = true,
                        error = %e,
                        expected_topic = %expected_topic,
                        "Verification unavailable, passing answer through"
                    );
                    VerificationVerdict::fail_open()
                }
                FailurePolicy::FailClosed => {
                    warn!(
                        target: "envoy::audit",
                        fail_open = false,
                        error = %e,
                        expected_topic = %expected_topic,
                        "Verification unavailable, withholding answer"
                    );
                    VerificationVerdict::fail_closed()
                }
            },
        }
    }

    async fn try_verify(&self, query: &str, answer: &str, expected_topic: &str) -> Result<VerificationVerdict> {
        let prompt = build_prompt(query, answer, expected_topic);
        let request = LlmRequest::json_prompt(prompt, VERIFICATION_TEMPERATURE, VERIFICATION_MAX_TOKENS);

        let response = self.client.complete(request).await?;
        debug!(
            model = %response.model,
            response_preview = %response.content.chars().take(200).collect::<String>(),
            "Verification response"
        );

        parse_verdict(&response.content)
    }
}

fn build_prompt(query: &str, answer: &str, expected_topic: &str) -> String {
    format!(
        r#"You are a Response Verification Specialist. Analyze if this agent response is relevant and safe.

Expected topic: {expected_topic}
User's original query: "{query}"
Agent's response: "{answer}"

Analyze and respond with a JSON object:
{{
    "is_relevant": true/false,
    "is_safe": true/false,
    "topic_match": true/false,
    "risk_level": "none/low/medium/high",
    "explanation": "Brief explanation",
    "detected_issues": ["list", "of", "issues"] or []
}}

Guidelines:
- A response is relevant if it addresses the user's query about imports or invoices
- A response is NOT safe if it contains: illegal activities, violence, personal data theft, fraud, etc.
- Be strict about safety but reasonable about relevance
- Respond ONLY with valid JSON, no additional text
"#
    )
}

/// Parse and validate a model verdict. `is_relevant` and `is_safe` are required.
fn parse_verdict(response: &str) -> Result<VerificationVerdict> {
    let json_str = extract_json_object(response).ok_or_else(|| {
        EnvoyError::Verification(format!(
            "No valid JSON found in response: {}",
            response.chars().take(200).collect::<String>()
        ))
    })?;

    let parsed: Value = serde_json::from_str(json_str)
        .map_err(|e| EnvoyError::Verification(format!("Invalid JSON: {e}")))?;

    let field = |snake: &str, camel: &str| parsed.get(snake).or_else(|| parsed.get(camel));

    let is_relevant = field("is_relevant", "isRelevant")
        .and_then(as_bool)
        .ok_or_else(|| EnvoyError::Verification("missing is_relevant".into()))?;
    let is_safe = field("is_safe", "isSafe")
        .and_then(as_bool)
        .ok_or_else(|| EnvoyError::Verification("missing is_safe".into()))?;
    let topic_match = field("topic_match", "topicMatch")
        .and_then(as_bool)
        .unwrap_or(is_relevant);

    let risk_level = match field("risk_level", "riskLevel").and_then(Value::as_str) {
        Some(level) => RiskLevel::parse_lenient(level),
        None if is_safe => RiskLevel::None,
        None => RiskLevel::Medium,
    };

    let explanation = field("explanation", "explanation")
        .and_then(Value::as_str)
        .map(|e| truncate_chars(e.trim(), MAX_EXPLANATION_LENGTH))
        .unwrap_or_default();

    let detected_issues = field("detected_issues", "detectedIssues")
        .map(normalize_issues)
        .unwrap_or_default();

    Ok(VerificationVerdict::new(
        is_relevant,
        is_safe,
        topic_match,
        risk_level,
        explanation,
        detected_issues,
        VerdictSource::Model,
    ))
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Trimmed, non-empty, truncated, de-duplicated in first-seen order.
fn normalize_issues(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    };

    let mut issues: Vec<String> = Vec::new();
    for issue in raw {
        let issue = truncate_chars(issue.trim(), MAX_ISSUE_LENGTH);
        if !issue.is_empty() && !issues.contains(&issue) {
            issues.push(issue);
        }
        if issues.len() == MAX_ISSUES {
            break;
        }
    }
    issues
}
