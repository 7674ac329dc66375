//! Settings types.
//!
//! All structs deserialize from camelCase JSON and fill missing keys from
//! their `Default` impls, so a partial user file is always valid.

use std::time::Duration;

use conductor_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConductorSettings {
    /// Listening endpoint settings.
    pub server: ServerSettings,
    /// Public forwarding tunnel settings.
    pub tunnel: TunnelSettings,
    /// Authorization redirect flow settings.
    pub auth: AuthSettings,
    /// Orchestration registry settings.
    pub registry: RegistrySettings,
    /// Relay settings.
    pub relay: RelaySettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl ConductorSettings {
    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> crate::Result<()> {
        if self.auth.flow_timeout_secs == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "auth.flowTimeoutSecs must be positive".into(),
            ));
        }
        if self.registry.purge_interval_secs == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "registry.purgeIntervalSecs must be positive".into(),
            ));
        }
        if self.relay.error_channel_capacity == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "relay.errorChannelCapacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Listening endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Port to listen on (`0` picks a free port).
    pub port: u16,
    /// Bind address.
    pub host: String,
    /// The deployment is reachable from outside already; never open a tunnel.
    pub external_host: bool,
    /// Public base URL override used when building callback URLs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Upper bound on a webhook body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3456,
            host: "127.0.0.1".to_string(),
            external_host: false,
            base_url: None,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Public forwarding tunnel settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TunnelSettings {
    /// Credential for the tunnel provider. No tunnel is opened without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Authorization redirect flow settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Default authorization-provider base URL.
    pub provider_base_url: String,
    /// How long a flow waits for its callback before being rejected.
    pub flow_timeout_secs: u64,
}

impl AuthSettings {
    /// Flow timeout as a [`Duration`].
    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            provider_base_url: "https://auth.conductor.dev".to_string(),
            flow_timeout_secs: 300,
        }
    }
}

/// Orchestration registry settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// Age after which finished orchestrations are purged.
    pub retention_hours: u64,
    /// How often the retention sweeper runs.
    pub purge_interval_secs: u64,
}

impl RegistrySettings {
    /// Retention age as a [`Duration`].
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    /// Sweep interval as a [`Duration`].
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            purge_interval_secs: 3600,
        }
    }
}

/// Relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Capacity of the relay queue's failure broadcast channel.
    pub error_channel_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            error_channel_capacity: 64,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter, overridden by `RUST_LOG`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl LoggingSettings {
    /// Install the global subscriber with this level and format.
    pub fn init_subscriber(&self) {
        conductor_core::logging::init_subscriber(&self.level, self.format);
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
