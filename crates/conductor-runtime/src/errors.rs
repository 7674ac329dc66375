//! Relay error types.

use conductor_registry::RegistryError;

/// Errors surfaced by relay operations.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RelayError {
    /// A registry mutation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An injected capability call failed.
    #[error("{capability} failed: {message}")]
    UpstreamFailure {
        /// Which capability failed.
        capability: &'static str,
        /// Error description.
        message: String,
    },

    /// A handler panicked inside the drain loop.
    #[error("handler panicked: {message}")]
    HandlerPanicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The relay queue's drain loop is gone.
    #[error("relay queue closed")]
    QueueClosed,
}

impl RelayError {
    pub(crate) fn upstream(capability: &'static str, message: impl Into<String>) -> Self {
        Self::UpstreamFailure {
            capability,
            message: message.into(),
        }
    }

    /// Short classifier for logs and failure events.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Registry(RegistryError::NotFound(_)) => "not_found",
            Self::Registry(RegistryError::AlreadyExists(_)) => "already_exists",
            Self::Registry(RegistryError::ChildOwnedElsewhere { .. }) => "child_owned_elsewhere",
            Self::UpstreamFailure { .. } => "upstream_failure",
            Self::HandlerPanicked { .. } => "handler_panicked",
            Self::QueueClosed => "queue_closed",
        }
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
