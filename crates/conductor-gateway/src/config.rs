//! Gateway configuration.

use std::time::Duration;

use conductor_settings::ConductorSettings;

/// Everything the gateway needs to listen, authorize, and tunnel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Deployment is reachable from outside already; never start a tunnel.
    pub external_host: bool,
    /// Public URL override used when no tunnel is up.
    pub base_url: Option<String>,
    /// Tunnel credential. No credential, no tunnel.
    pub tunnel_auth_token: Option<String>,
    /// Authorization provider the flow URL points at.
    pub auth_provider_base_url: String,
    /// How long a pending authorization flow waits for its callback.
    pub auth_flow_timeout: Duration,
    /// Largest webhook body accepted.
    pub max_body_bytes: usize,
    /// Upper bound on waiting for in-flight requests at shutdown.
    pub shutdown_timeout: Duration,
}

impl GatewayConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ConductorSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            external_host: settings.server.external_host,
            base_url: settings.server.base_url.clone(),
            tunnel_auth_token: settings.tunnel.auth_token.clone(),
            auth_provider_base_url: settings.auth.provider_base_url.clone(),
            auth_flow_timeout: settings.auth.flow_timeout(),
            max_body_bytes: settings.server.max_body_bytes,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Whether a tunnel should be requested after listening.
    pub fn wants_tunnel(&self) -> bool {
        !self.external_host && self.tunnel_auth_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_settings(&ConductorSettings::default())
    }
}
