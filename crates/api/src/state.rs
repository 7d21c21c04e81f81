//! Application state for the API server.

use envoy_coordinator::{CoordinatorConfig, Orchestrator};
use std::sync::Arc;

/// Shared application state for the API server.
pub struct AppState {
    /// Orchestrator handling every turn; read-only after startup
    pub orchestrator: Arc<Orchestrator>,

    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            start_time: std::time::Instant::now(),
        }
    }

    /// Discover the configured agents and build the state around them.
    pub async fn connect(config: &CoordinatorConfig) -> Self {
        Self::new(Orchestrator::connect(config).await)
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
