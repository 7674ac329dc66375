//! Routes verified webhook deliveries into the relay queue.

use std::sync::Arc;

use conductor_core::{InboundDelivery, InboundEvent};
use conductor_registry::Registry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::{RelayCommand, RelayQueue};

/// What happened to one delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Turned into a relay command.
    Queued,
    /// Well-formed but about an issue outside every orchestration.
    Ignored,
    /// Body could not be parsed, or the queue is closed.
    Rejected,
}

/// Maps [`InboundEvent`]s onto [`RelayCommand`]s.
pub struct InboundRouter {
    registry: Arc<Registry>,
    queue: Arc<RelayQueue>,
}

impl InboundRouter {
    /// Router feeding `queue`, consulting `registry` to skip untracked issues.
    pub fn new(registry: Arc<Registry>, queue: Arc<RelayQueue>) -> Self {
        Self { registry, queue }
    }

    /// Route a single delivery.
    pub fn route(&self, delivery: &InboundDelivery) -> RouteOutcome {
        let event = match delivery.parse_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(tenant = %delivery.tenant, error = %e, "undecodable delivery");
                return RouteOutcome::Rejected;
            }
        };

        let command = match event {
            InboundEvent::SessionCreated {
                issue_id,
                session_id,
                comment_id,
            } => {
                if !self.registry.is_child(&issue_id) {
                    debug!(tenant = %delivery.tenant, issue_id = %issue_id, "session on untracked issue ignored");
                    return RouteOutcome::Ignored;
                }
                RelayCommand::AttachSession {
                    child_id: issue_id,
                    session_id,
                    comment_id,
                }
            }
            // Resolved at dispatch time: the matching attach may still be queued.
            InboundEvent::SessionCompleted { session_id, result } => {
                RelayCommand::SessionCompleted { session_id, result }
            }
        };

        match self.queue.submit(command) {
            Ok(()) => RouteOutcome::Queued,
            Err(e) => {
                warn!(tenant = %delivery.tenant, error = %e, "delivery dropped");
                RouteOutcome::Rejected
            }
        }
    }

    /// Route deliveries from `rx` until it closes or `cancel` fires.
    pub async fn run(self, mut rx: mpsc::Receiver<InboundDelivery>, cancel: CancellationToken) {
        info!("inbound router started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                delivery = rx.recv() => match delivery {
                    Some(delivery) => {
                        let _ = self.route(&delivery);
                    }
                    None => break,
                },
            }
        }
        info!("inbound router stopped");
    }
}
