//! Wire types for the agent request/response protocol.
//!
//! Agents publish a self-description (the agent card) and accept JSON-RPC 2.0
//! `message/send` calls. Responses are kept as untyped JSON: only the
//! envelope is validated, everything inside `result` is read tolerantly by
//! the extractor.

use envoy_common::{EnvoyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SEND_MESSAGE_METHOD: &str = "message/send";

/// An agent's self-description, served at its well-known card path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<AgentSkill>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AgentCard {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            url: None,
            version: None,
            skills: Vec::new(),
        }
    }

    /// Parse a card body, rejecting cards without a usable name.
    pub fn parse(body: &str) -> Result<Self> {
        let card: AgentCard = serde_json::from_str(body)
            .map_err(|e| EnvoyError::Protocol(format!("malformed agent card: {e}")))?;
        if card.name.trim().is_empty() {
            return Err(EnvoyError::Protocol("agent card has an empty name".into()));
        }
        Ok(card)
    }
}

/// One task handed to a remote agent. Built per call, never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationRequest {
    pub agent_name: String,
    pub task_text: String,
    pub message_id: String,
    pub task_id: String,
    pub context_id: String,
}

impl DelegationRequest {
    /// A request with a fresh message id, correlated by the session's task and context ids.
    pub fn new(
        agent_name: impl Into<String>,
        task_text: impl Into<String>,
        task_id: impl Into<String>,
        context_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            task_text: task_text.into(),
            message_id: envoy_common::new_id(),
            task_id: task_id.into(),
            context_id: context_id.into(),
        }
    }

    /// The `params` envelope: a single user message with one text part.
    pub fn envelope(&self) -> Value {
        json!({
            "message": {
                "role": "user",
                "parts": [{"type": "text", "kind": "text", "text": self.task_text}],
                "messageId": self.message_id,
                "taskId": self.task_id,
                "contextId": self.context_id,
            }
        })
    }

    /// The full JSON-RPC call carrying the envelope.
    pub fn to_rpc(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": self.message_id,
            "method": SEND_MESSAGE_METHOD,
            "params": self.envelope(),
        })
    }
}

/// Payload returned by a remote agent.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAgentResponse {
    envelope: Value,
}

impl RawAgentResponse {
    /// Wrap a payload without validating its envelope.
    pub fn new(envelope: Value) -> Self {
        Self { envelope }
    }

    /// Accept only a success envelope whose `result` is a task object.
    pub fn from_envelope(envelope: Value) -> Result<Self> {
        let object = envelope.as_object().ok_or_else(|| {
            EnvoyError::Protocol("response is not a JSON object".into())
        })?;

        if let Some(error) = object.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(EnvoyError::Protocol(format!(
                "agent returned error {code}: {message}"
            )));
        }

        let result = object
            .get("result")
            .ok_or_else(|| EnvoyError::Protocol("response has no result".into()))?;

        if !result.is_object() {
            return Err(EnvoyError::Protocol("result is not a task object".into()));
        }

        if let Some(kind) = result.get("kind").and_then(Value::as_str) {
            if kind != "task" {
                return Err(EnvoyError::Protocol(format!(
                    "expected a task result, got '{kind}'"
                )));
            }
        }

        Ok(Self { envelope })
    }

    pub fn result(&self) -> Option<&Value> {
        self.envelope.get("result")
    }

    pub fn as_value(&self) -> &Value {
        &self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_ids_and_text() {
        let request = DelegationRequest::new("Imports_Agent", "What documents?", "task-1", "ctx-1");
        let envelope = request.envelope();

        let message = &envelope["message"];
        assert_eq!(message["role"], "user");
        assert_eq!(message["parts"][0]["type"], "text");
        assert_eq!(message["parts"][0]["text"], "What documents?");
        assert_eq!(message["taskId"], "task-1");
        assert_eq!(message["contextId"], "ctx-1");
        assert_eq!(message["messageId"], request.message_id.as_str());
    }

    #[test]
    fn rpc_wraps_envelope() {
        let request = DelegationRequest::new("A", "hi", "t", "c");
        let rpc = request.to_rpc();
        assert_eq!(rpc["jsonrpc"], "2.0");
        assert_eq!(rpc["method"], SEND_MESSAGE_METHOD);
        assert_eq!(rpc["id"], rpc["params"]["message"]["messageId"]);
    }

    #[test]
    fn message_ids_are_fresh_per_request() {
        let a = DelegationRequest::new("A", "hi", "t", "c");
        let b = DelegationRequest::new("A", "hi", "t", "c");
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.task_id, b.task_id);
    }

    #[test]
    fn card_parse_accepts_extra_fields() {
        let card = AgentCard::parse(
            r#"{"name":"Imports_Agent","description":"Customs help","version":"1.0","capabilities":{"streaming":false},"skills":[{"id":"dian","name":"DIAN"}]}"#,
        )
        .unwrap();
        assert_eq!(card.name, "Imports_Agent");
        assert_eq!(card.version.as_deref(), Some("1.0"));
        assert_eq!(card.skills[0].name, "DIAN");
    }

    #[test]
    fn card_parse_rejects_missing_or_empty_name() {
        assert!(AgentCard::parse(r#"{"description":"no name"}"#).is_err());
        assert!(AgentCard::parse(r#"{"name":"  "}"#).is_err());
        assert!(AgentCard::parse("<html>").is_err());
    }

    #[test]
    fn success_envelope_with_task_result() {
        let raw = RawAgentResponse::from_envelope(json!({
            "jsonrpc": "2.0", "id": "1",
            "result": {"kind": "task", "id": "t", "artifacts": []}
        }))
        .unwrap();
        assert!(raw.result().is_some());
    }

    #[test]
    fn result_without_kind_is_accepted() {
        assert!(RawAgentResponse::from_envelope(json!({"result": {"artifacts": []}})).is_ok());
    }

    #[test]
    fn error_envelope_is_protocol_error() {
        let err = RawAgentResponse::from_envelope(json!({
            "jsonrpc": "2.0", "id": "1",
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap_err();
        assert!(matches!(err, EnvoyError::Protocol(_)));
        assert!(err.to_string().contains("Method not found"));
    }

    #[test]
    fn non_task_results_are_protocol_errors() {
        for envelope in [
            json!({"result": {"kind": "message", "parts": []}}),
            json!({"result": "plain text"}),
            json!({"jsonrpc": "2.0"}),
            json!(["not", "an", "object"]),
        ] {
            assert!(matches!(
                RawAgentResponse::from_envelope(envelope),
                Err(EnvoyError::Protocol(_))
            ));
        }
    }
}
