//! Discovery and lookup of remote agents.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use envoy_common::{EnvoyError, Result};
use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use crate::connection::{HttpRemoteAgent, RemoteAgent};
use crate::protocol::AgentCard;

pub const DEFAULT_CARD_PATH: &str = "/.well-known/agent.json";

/// Summary text used when discovery registered no agents.
pub const NO_AGENTS: &str = "No agents found";

/// A discovered agent and the connection used to reach it.
#[derive(Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub endpoint: String,
    pub version: Option<String>,
    pub skills: Vec<String>,
    pub connection: Arc<dyn RemoteAgent>,
}

impl AgentDescriptor {
    pub fn new(endpoint: impl Into<String>, connection: Arc<dyn RemoteAgent>) -> Self {
        let card = connection.card();
        Self {
            name: card.name.clone(),
            description: card.description.clone(),
            endpoint: endpoint.into(),
            version: card.version.clone(),
            skills: card.skills.iter().map(|s| s.name.clone()).collect(),
            connection,
        }
    }

    pub fn card(&self) -> &AgentCard {
        self.connection.card()
    }
}

impl fmt::Debug for AgentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("endpoint", &self.endpoint)
            .field("version", &self.version)
            .field("skills", &self.skills)
            .finish_non_exhaustive()
    }
}

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Upper bound for fetching one agent card.
    pub timeout: Duration,
    /// Path of the agent card relative to the endpoint.
    pub card_path: String,
    /// Upper bound for one delegation on the connections built here.
    pub request_timeout: Option<Duration>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            card_path: DEFAULT_CARD_PATH.to_string(),
            request_timeout: None,
        }
    }
}

/// Known agents keyed by name. Populated once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct AgentDirectory {
    agents: BTreeMap<String, AgentDescriptor>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from descriptors; on duplicate names the first wins.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = AgentDescriptor>) -> Self {
        let mut directory = Self::new();
        for descriptor in descriptors {
            directory.insert(descriptor);
        }
        directory
    }

    fn insert(&mut self, descriptor: AgentDescriptor) {
        if let Some(existing) = self.agents.get(&descriptor.name) {
            warn!(
                agent = %descriptor.name,
                kept = %existing.endpoint,
                skipped = %descriptor.endpoint,
                "Duplicate agent name, keeping first registration"
            );
            return;
        }
        self.agents.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// One `{"name","description"}` JSON object per line, or [`NO_AGENTS`].
    pub fn summary(&self) -> String {
        if self.agents.is_empty() {
            return NO_AGENTS.to_string();
        }
        self.agents
            .values()
            .map(|a| json!({"name": a.name, "description": a.description}).to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Fetch the card of every endpoint concurrently and register the ones that answer.
    ///
    /// Unreachable endpoints and malformed cards are logged and skipped;
    /// an empty directory is a valid result.
    pub async fn discover(endpoints: &[String], options: &DiscoveryOptions) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().unwrap_or_default();

        let fetches = endpoints.iter().map(|endpoint| {
            let http_client = http_client.clone();
            async move {
                let outcome = tokio::time::timeout(
                    options.timeout,
                    fetch_card(&http_client, endpoint, &options.card_path),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(EnvoyError::Discovery {
                        endpoint: endpoint.clone(),
                        reason: format!("timed out after {:?}", options.timeout),
                    })
                });
                (endpoint, outcome)
            }
        });

        let mut directory = Self::new();
        for (endpoint, outcome) in join_all(fetches).await {
            match outcome {
                Ok(card) => {
                    info!(agent = %card.name, endpoint = %endpoint, "Registered remote agent");
                    let connection = HttpRemoteAgent::new(card, endpoint.clone(), http_client.clone());
                    directory.insert(AgentDescriptor::new(endpoint.clone(), Arc::new(connection)));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Skipping agent endpoint");
                }
            }
        }

        info!(
            requested = endpoints.len(),
            registered = directory.len(),
            agents = ?directory.names(),
            "Agent discovery finished"
        );

        directory
    }
}

async fn fetch_card(http_client: &reqwest::Client, endpoint: &str, card_path: &str) -> Result<AgentCard> {
    let url = format!("{}{}", endpoint.trim_end_matches('/'), card_path);
    let discovery_error = |reason: String| EnvoyError::Discovery {
        endpoint: endpoint.to_string(),
        reason,
    };

    let response = http_client
        .get(&url)
        .send()
        .await
        .map_err(|e| discovery_error(format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(discovery_error(format!("card request returned HTTP {status}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| discovery_error(format!("failed to read card: {e}")))?;

    AgentCard::parse(&body).map_err(|e| discovery_error(e.to_string()))
}
