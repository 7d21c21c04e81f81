//! Envoy API server binary.
//!
//! Usage:
//!   envoy-api --config envoy.toml
//!   envoy-api --port 8080 --bind 0.0.0.0
//!
//! # Environment Variables
//!
//! - `ENVOY_CONFIG` - Path to the TOML configuration file
//! - `ENVOY_BIND_ADDR` - Server bind address (default: 127.0.0.1)
//! - `IMPORTS_AGENT_URL`, `INVOICES_AGENT_URL`, `ENVOY_AGENT_URLS` - Agent endpoints
//! - `GEMINI_API_KEY` / `GOOGLE_API_KEY` / `OPENAI_API_KEY` - Generation credentials
//! - `GEMINI_MODEL`, `GOOGLE_CLOUD_PROJECT`, `GOOGLE_CLOUD_LOCATION` - Generation backend

use clap::Parser;
use envoy_api::{serve, AppState};
use envoy_coordinator::CoordinatorConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "envoy-api", version, about = "Envoy verified dispatch orchestrator")]
struct Args {
    /// Path to config.toml file
    #[arg(short, long, env = "ENVOY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Bind address
    #[arg(short, long, env = "ENVOY_BIND_ADDR", default_value = "127.0.0.1")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,envoy_api=debug,envoy_coordinator=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.bind == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0. This exposes the API to all network interfaces; \
             make sure a firewall or reverse proxy is in place."
        );
    }

    let mut config = if let Some(path) = &args.config {
        tracing::info!(path = %path.display(), "Loading configuration");
        CoordinatorConfig::from_file(path)?
    } else {
        tracing::info!("Using default configuration");
        CoordinatorConfig::default()
    };
    config.apply_env_overrides();

    tracing::info!(
        endpoints = ?config.discovery.endpoints,
        provider = %config.llm.provider,
        model = %config.llm.model,
        on_failure = ?config.verification.on_failure,
        "Discovering remote agents"
    );
    let state = AppState::connect(&config).await;

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    serve(Arc::new(state), addr).await?;

    Ok(())
}
