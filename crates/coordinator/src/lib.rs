//! Verified dispatch coordinator for Envoy.
//!
//! The coordinator receives a user query, picks the remote agent(s) able to
//! answer it, delegates the task and checks every answer before it reaches
//! the caller.
//!
//! # Architecture
//!
//! ```text
//! User Query
//!      │
//!      ▼
//! ┌──────────────────┐
//! │   Orchestrator   │  ◄── session store, selection / router
//! └────────┬─────────┘
//!          │ message/send
//!    ┌─────┴──────┐
//!    ▼            ▼
//! [Imports]   [Invoices]
//!  Agent        Agent
//!    │            │
//!    └─────┬──────┘
//!          ▼
//!  extract → verify → present | alert
//! ```

pub mod config;
pub mod orchestrator;
mod parse;
pub mod present;
pub mod router;
pub mod selection;
pub mod session;
pub mod verification;

pub use config::CoordinatorConfig;
pub use orchestrator::{Orchestrator, TurnOutcome, TurnRequest, TurnStage, TurnStatus};
pub use router::{LlmRouter, RouteDecision};
pub use selection::{infer_topic, resolve, Topic, TopicInference};
pub use session::{ConversationState, InMemorySessionStore, SessionStore};
pub use verification::{
    DerivedStatus, FailurePolicy, RiskLevel, VerdictSource, VerificationGate, VerificationVerdict,
};
