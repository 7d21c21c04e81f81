//! Common types shared across Envoy crates.
//!
//! This crate provides the error taxonomy every pipeline stage reports
//! through, and the event type callers receive from a streamed turn.

pub mod error;
pub mod event;

pub use error::{EnvoyError, Result};
pub use event::{new_id, TurnEvent, PROCESSING_UPDATE};
