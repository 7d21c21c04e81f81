//! User-facing text for verified answers, alerts and failures.

use envoy_common::EnvoyError;

use crate::verification::VerificationVerdict;

/// How a turn's answer reached the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Presented,
    Alerted,
}

pub fn verified(agent: &str, answer: &str) -> String {
    format!("✅ **Verified response from {agent}**\n\n{answer}")
}

/// Safe but off-topic answers are shown behind a warning.
pub fn relevance_warning(agent: &str, answer: &str, verdict: &VerificationVerdict) -> String {
    let mut text = format!(
        "⚠️ **Warning from {agent}**: The response may not be fully relevant to your query."
    );
    if !verdict.explanation.is_empty() {
        text.push(' ');
        text.push_str(&verdict.explanation);
    }
    text.push_str("\n\n");
    text.push_str(answer);
    text
}

pub fn security_alert(detected_issues: &[String]) -> String {
    let mut alert = String::from("🚨 **SECURITY ALERT** 🚨\n\n");
    alert.push_str(
        "I cannot process this request because it contains content outside my scope or potentially unsafe material.\n",
    );
    if !detected_issues.is_empty() {
        alert.push_str(&format!("\nIssues detected: {}\n", detected_issues.join(", ")));
    }
    alert.push_str("\nPlease rephrase your query focusing on topics related to:\n");
    alert.push_str("• Imports and customs processes in Colombia\n");
    alert.push_str("• Information about invoices and commercial documents\n");
    alert
}

/// Render a verdict. Unsafe answers are suppressed entirely.
pub fn present(agent: &str, answer: &str, verdict: &VerificationVerdict) -> (String, Presentation) {
    if !verdict.is_safe {
        (security_alert(&verdict.detected_issues), Presentation::Alerted)
    } else if !verdict.is_relevant {
        (relevance_warning(agent, answer, verdict), Presentation::Alerted)
    } else {
        (verified(agent, answer), Presentation::Presented)
    }
}

/// Text for a turn that ended before an answer existed.
pub fn failure(agent: &str, error: &EnvoyError) -> String {
    match error {
        EnvoyError::AgentNotFound { .. } => format!("Error: {error}"),
        _ => format!("Error communicating with {agent}: {error}"),
    }
}
