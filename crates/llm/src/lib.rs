//! Text-generation capability for Envoy.
//!
//! The orchestrator treats generation as an opaque `LlmClient`; this crate
//! provides the backends (Gemini, OpenAI-compatible) and the wrappers every
//! backend is composed with: retries, a concurrency cap, and lazy
//! construction.

pub mod client;
pub mod config;
pub mod gemini;
pub mod lazy;
pub mod openai;
pub mod retry;

pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, ResponseFormat, Role, TokenUsage};
pub use config::{build_llm_client, LlmConfig, SemaphoredClient};
pub use gemini::{GeminiClient, GeminiEndpoint};
pub use lazy::LazyLlmClient;
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
