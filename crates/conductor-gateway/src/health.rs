//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the gateway is serving.
    pub status: &'static str,
    /// Seconds since the gateway was built.
    pub uptime_secs: u64,
    /// Registered tenant count.
    pub tenants: usize,
    /// Authorization flows awaiting a callback.
    pub pending_auth_flows: usize,
    /// URL the outside world should use.
    pub public_url: String,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    tenants: usize,
    pending_auth_flows: usize,
    public_url: String,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        tenants,
        pending_auth_flows,
        public_url,
    }
}
