//! Signed-event endpoint.

use axum::body::{Body, HttpBody};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use tracing::{debug, info, warn};

use crate::errors::GatewayError;
use crate::server::AppState;

/// Required signature header.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Optional timestamp header.
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// ANY /webhook
pub(crate) async fn webhook_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, GatewayError> {
    if method != Method::POST {
        return Err(GatewayError::MethodNotAllowed);
    }

    let limit = state.config.max_body_bytes;
    let declared = body.size_hint().lower();
    if !usize::try_from(declared).is_ok_and(|len| len <= limit) {
        debug!(declared, limit, "webhook body over limit");
        return Err(GatewayError::PayloadTooLarge(limit));
    }

    // Bodies of unknown length can still overrun the limit or be cut off
    // mid-stream; either way the client sent something unusable.
    let body = axum::body::to_bytes(body, limit).await.map_err(|e| {
        warn!(error = %e, "webhook body read failed");
        GatewayError::MalformedRequest(format!("failed to read body: {e}"))
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or(GatewayError::MissingSignature)?;
    let timestamp = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok());

    match state.tenants.dispatch(&body, signature, timestamp).await {
        Some(tenant) => {
            info!(tenant = %tenant, bytes = body.len(), "webhook delivered");
            Ok(StatusCode::OK)
        }
        None => {
            debug!(bytes = body.len(), "webhook matched no tenant");
            Err(GatewayError::Unauthorized)
        }
    }
}
