//! Error types for Envoy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvoyError {
    #[error("Discovery failed for {endpoint}: {reason}")]
    Discovery { endpoint: String, reason: String },

    #[error("Agent '{requested}' not found. Available agents: {}", .available.join(", "))]
    AgentNotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EnvoyError {
    /// Whether the failure happened before a request reached its peer or while
    /// waiting on it, as opposed to a malformed answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, EnvoyError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, EnvoyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_not_found_lists_available_agents() {
        let err = EnvoyError::AgentNotFound {
            requested: "Shipping".into(),
            available: vec!["Imports_Agent".into(), "Invoices_Agent".into()],
        };
        assert_eq!(
            err.to_string(),
            "Agent 'Shipping' not found. Available agents: Imports_Agent, Invoices_Agent"
        );
    }

    #[test]
    fn agent_not_found_with_empty_directory() {
        let err = EnvoyError::AgentNotFound {
            requested: "Imports".into(),
            available: vec![],
        };
        assert_eq!(
            err.to_string(),
            "Agent 'Imports' not found. Available agents: "
        );
    }

    #[test]
    fn only_connection_errors_are_transport() {
        assert!(EnvoyError::Connection("refused".into()).is_transport());
        assert!(!EnvoyError::Protocol("bad envelope".into()).is_transport());
    }
}
