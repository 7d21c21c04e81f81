//! Configuration for the coordinator.
//!
//! # Security Features (SEC-005)
//!
//! - Config file permission validation on Unix systems
//! - Rejects world-readable files containing API keys
//! - Warns about API keys stored in config files

use std::time::Duration;

use envoy_llm::LlmConfig;
use envoy_remote::{DiscoveryOptions, DEFAULT_CARD_PATH};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::verification::FailurePolicy;

/// Main coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Remote agent endpoints and card fetching
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Per-call limits for delegated tasks
    #[serde(default)]
    pub delegation: DelegationConfig,

    /// Generation backend used by verification and routing
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Base URLs of the remote agents, in priority order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Timeout for fetching one agent card, in milliseconds
    #[serde(default = "default_discovery_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_card_path")]
    pub card_path: String,
}

fn default_endpoints() -> Vec<String> {
    vec![
        "http://localhost:8005".into(),
        "http://localhost:8006".into(),
    ]
}

fn default_discovery_timeout() -> u64 {
    30_000
}

fn default_card_path() -> String {
    DEFAULT_CARD_PATH.into()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            timeout_ms: default_discovery_timeout(),
            card_path: default_card_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Timeout for one `message/send` round trip, in milliseconds
    #[serde(default = "default_delegation_timeout")]
    pub timeout_ms: u64,
}

fn default_delegation_timeout() -> u64 {
    120_000
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_delegation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// What the gate reports when the generation backend fails
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Ask the generation backend to pick an agent before keyword inference
    #[serde(default)]
    pub use_llm: bool,
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Security (SEC-005)
    ///
    /// On Unix systems, this function validates that:
    /// - The file is a regular file (not a symlink)
    /// - The file is not world-readable if it contains an API key
    /// - Warns if API keys are stored in the config file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;

        if config.llm.api_key.is_some() {
            warn!(
                "API key found in config file '{}'. For better security, \
                 use environment variables instead (GEMINI_API_KEY, OPENAI_API_KEY).",
                path.display()
            );
        }

        Ok(config)
    }

    /// Load configuration from a TOML file without permission checks.
    ///
    /// Use this only for testing or when you've already validated the file.
    pub fn from_file_unchecked(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply deployment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// `ENVOY_AGENT_URLS` (comma-separated) replaces the endpoint list;
    /// `IMPORTS_AGENT_URL` and `INVOICES_AGENT_URL` then replace the first
    /// and second slot respectively.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(urls) = lookup("ENVOY_AGENT_URLS") {
            self.discovery.endpoints = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
            info!(endpoints = ?self.discovery.endpoints, "Agent endpoints from ENVOY_AGENT_URLS");
        }

        for (slot, key) in [(0, "IMPORTS_AGENT_URL"), (1, "INVOICES_AGENT_URL")] {
            if let Some(url) = lookup(key) {
                let url = url.trim().to_string();
                if slot < self.discovery.endpoints.len() {
                    self.discovery.endpoints[slot] = url;
                } else {
                    self.discovery.endpoints.push(url);
                }
            }
        }

        if let Some(model) = lookup("GEMINI_MODEL") {
            self.llm.model = model;
        }
        if let Some(project) = lookup("GOOGLE_CLOUD_PROJECT") {
            self.llm.project = Some(project);
        }
        if let Some(location) = lookup("GOOGLE_CLOUD_LOCATION") {
            self.llm.location = location;
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            timeout: Duration::from_millis(self.discovery.timeout_ms),
            card_path: self.discovery.card_path.clone(),
            request_timeout: Some(Duration::from_millis(self.delegation.timeout_ms)),
        }
    }
}

/// Validate config file permissions on Unix systems (SEC-005).
///
/// Requirements:
/// - File must be a regular file (not symlink, directory, etc.)
/// - File must not be world-writable (mode & 0o002 == 0)
/// - If file contains API key patterns, must not be world-readable
#[cfg(unix)]
fn validate_config_file_permissions(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). \
             This is a security risk. Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)?;
    let has_api_key = content
        .lines()
        .map(str::trim_start)
        .any(|line| line.starts_with("api_key") && line.contains('"'));

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             This is a security risk. Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}
