//! Remote agent plumbing for Envoy.
//!
//! - [`directory`]: concurrent discovery of agent cards and name lookup
//! - [`connection`]: the `RemoteAgent` seam and its JSON-RPC/HTTP client
//! - [`protocol`]: agent cards, delegation requests, response envelopes
//! - [`extract`]: tolerant extraction of answer text from responses

pub mod connection;
pub mod directory;
pub mod extract;
pub mod protocol;

pub use connection::{HttpRemoteAgent, RemoteAgent};
pub use directory::{AgentDescriptor, AgentDirectory, DiscoveryOptions, DEFAULT_CARD_PATH, NO_AGENTS};
pub use extract::{extract, ExtractedAnswer, Fragment, FragmentSource, DATA_LABEL, NO_RESPONSE};
pub use protocol::{AgentCard, AgentSkill, DelegationRequest, RawAgentResponse};
