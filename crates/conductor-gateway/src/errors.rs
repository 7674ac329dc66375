//! Gateway error types.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors on the HTTP surface. Each maps to one status code.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No `X-Webhook-Signature` header.
    #[error("Missing signature")]
    MissingSignature,

    /// Request is structurally invalid.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Body is larger than the configured limit.
    #[error("Payload exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// No tenant verifier accepted the request.
    #[error("Unauthorized")]
    Unauthorized,

    /// Wrong HTTP method for the endpoint.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Listener could not be bound or served.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSignature | Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Why an authorization flow did not produce credentials.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthFlowError {
    /// No callback arrived in time.
    #[error("authorization timed out after {0:?}")]
    Timeout(Duration),

    /// A callback arrived without the required parameters.
    #[error("authorization callback missing required parameters")]
    InvalidCallback,

    /// The flow was dropped before it resolved.
    #[error("authorization flow cancelled")]
    Cancelled,

    /// The authorization URL could not be built.
    #[error("invalid authorization URL: {0}")]
    InvalidUrl(String),

    /// The registered callback side effect failed.
    #[error("callback handler failed: {0}")]
    Handler(String),
}

/// Tunnel start/stop failures. Never fatal to serving.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TunnelError {
    /// The tunnel could not be established.
    #[error("tunnel start failed: {0}")]
    Start(String),
    /// The tunnel could not be closed cleanly.
    #[error("tunnel stop failed: {0}")]
    Stop(String),
}
