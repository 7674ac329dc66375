//! # conductor-runtime
//!
//! Event-driven coordination on top of the orchestration registry.
//!
//! - [`Relay`]: delegates child tasks, notifies them, and folds child
//!   completions back into the parent's processing session, signalling
//!   orchestration completion exactly once
//! - [`RelayQueue`]: the single sequential drain loop every relay command
//!   passes through
//! - [`InboundRouter`]: turns verified webhook deliveries into relay commands
//! - [`sweeper`]: periodic retention purge of finished orchestrations
//!
//! Outbound calls go through the injected [`capabilities`] traits; this crate
//! never talks to the collaboration platform itself.

#![deny(unsafe_code)]

pub mod capabilities;
pub mod errors;
pub mod events;
pub mod queue;
pub mod relay;
pub mod router;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testutil;

pub use capabilities::{
    Capabilities, CapabilityError, ChildSpec, IssueCreator, PromptPoster, TriggerPoster,
};
pub use errors::{RelayError, Result};
pub use events::{ChildResult, RelayEvent};
pub use queue::{RelayCommand, RelayFailure, RelayQueue};
pub use relay::{CompletionOutcome, Relay};
pub use router::{InboundRouter, RouteOutcome};
pub use sweeper::{SweeperConfig, spawn_sweeper};
