//! Periodic retention purge.

use std::sync::Arc;
use std::time::Duration;

use conductor_registry::Registry;
use conductor_settings::RegistrySettings;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How long finished orchestrations are kept and how often to check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Minimum age of a finished orchestration before it is purged.
    pub retention: Duration,
    /// Time between purge passes.
    pub interval: Duration,
}

impl SweeperConfig {
    /// Build from the `registry` settings section.
    pub fn from_settings(settings: &RegistrySettings) -> Self {
        Self {
            retention: settings.retention(),
            interval: settings.purge_interval(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::from_settings(&RegistrySettings::default())
    }
}

/// Spawn a task that purges finished orchestrations every `config.interval`
/// until `cancel` fires. The first pass runs one interval after spawning.
pub fn spawn_sweeper(
    registry: Arc<Registry>,
    config: SweeperConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = config.interval.max(Duration::from_secs(1));
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            retention_secs = config.retention.as_secs(),
            interval_secs = period.as_secs(),
            "retention sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = registry.purge_older_than(config.retention);
                    debug!(purged, remaining = registry.len(), "retention pass");
                }
                () = cancel.cancelled() => {
                    info!("retention sweeper stopped");
                    return;
                }
            }
        }
    })
}
