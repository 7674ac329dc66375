//! # conductor-core
//!
//! Foundation types shared by every conductor crate.
//!
//! - **Branded IDs**: `IssueId`, `AgentSessionId`, `CommentId`, `FlowId`
//! - **Inbound deliveries**: the hand-off envelope between the gateway and
//!   the relay, plus the typed events parsed out of it
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod ids;
pub mod inbound;
pub mod logging;

pub use ids::{AgentSessionId, CommentId, FlowId, IssueId};
pub use inbound::{InboundDelivery, InboundEvent, InboundParseError};
