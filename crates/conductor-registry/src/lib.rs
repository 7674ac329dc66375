//! # conductor-registry
//!
//! In-memory store of orchestration state: which parent task owns which
//! child tasks, where each child is in its lifecycle, and the reverse
//! indices (child → parent, session → child) that let inbound events find
//! their orchestration in O(1).
//!
//! The registry performs no I/O. It is an explicitly owned value: create one
//! with [`Registry::new`], share it behind an `Arc`, and drop (or
//! [`Registry::clear`]) it to tear everything down.

#![deny(unsafe_code)]

pub mod errors;
pub mod registry;
pub mod types;

pub use errors::{RegistryError, Result};
pub use registry::Registry;
pub use types::{ChildRecord, ChildStatus, OrchestrationRecord, OrchestrationStatus};
