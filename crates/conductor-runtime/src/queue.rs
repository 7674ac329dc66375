//! Strictly ordered command queue in front of the relay.
//!
//! Commands are appended to an unbounded channel and consumed by one drain
//! task, which awaits each handler to completion before taking the next.
//! Commands submitted while the drain is busy join the same queue, so
//! dispatch order equals submission order and no two handlers ever run at
//! once. A failing or panicking command is logged and published as a
//! [`RelayFailure`]; the drain carries on with the next one.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use conductor_core::{AgentSessionId, CommentId, IssueId};
use conductor_settings::RelaySettings;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capabilities::ChildSpec;
use crate::errors::{RelayError, Result};
use crate::relay::Relay;

/// One unit of relay work.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayCommand {
    /// Create and register a child work item.
    Delegate {
        /// Owning parent.
        parent_id: IssueId,
        /// What to create.
        spec: ChildSpec,
    },
    /// Send a child its trigger comment.
    NotifyChildStarted {
        /// Owning parent.
        parent_id: IssueId,
        /// Child to trigger.
        child_id: IssueId,
        /// Context passed in the comment.
        context: String,
    },
    /// Record the session working on a child.
    AttachSession {
        /// Child issue.
        child_id: IssueId,
        /// Its session.
        session_id: AgentSessionId,
        /// Comment that opened the session.
        comment_id: Option<CommentId>,
    },
    /// A child finished; its parent is known.
    ChildCompleted {
        /// Owning parent.
        parent_id: IssueId,
        /// Finished child.
        child_id: IssueId,
        /// Result payload.
        result: Value,
    },
    /// A session finished; parent and child are resolved at dispatch time.
    SessionCompleted {
        /// Finished session.
        session_id: AgentSessionId,
        /// Result payload.
        result: Value,
    },
}

impl RelayCommand {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Delegate { .. } => "delegate",
            Self::NotifyChildStarted { .. } => "notify_child_started",
            Self::AttachSession { .. } => "attach_session",
            Self::ChildCompleted { .. } => "child_completed",
            Self::SessionCompleted { .. } => "session_completed",
        }
    }
}

/// A command that failed inside the drain loop.
#[derive(Clone, Debug)]
pub struct RelayFailure {
    /// [`RelayCommand::name`] of the failed command.
    pub command: &'static str,
    /// What went wrong.
    pub error: RelayError,
}

enum QueueMessage {
    Command(RelayCommand),
    Flush(oneshot::Sender<()>),
}

/// Handle to the relay's drain loop.
pub struct RelayQueue {
    tx: mpsc::UnboundedSender<QueueMessage>,
    failures: broadcast::Sender<RelayFailure>,
    worker_handle: JoinHandle<()>,
}

impl RelayQueue {
    /// Spawn the drain loop over `relay`.
    ///
    /// `error_capacity` bounds the failure broadcast buffer; slow failure
    /// subscribers lag rather than stall the drain.
    pub fn spawn(relay: Arc<Relay>, error_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failures, _) = broadcast::channel(error_capacity.max(1));
        let worker_handle = tokio::spawn(drain_worker(rx, relay, failures.clone()));
        Self {
            tx,
            failures,
            worker_handle,
        }
    }

    /// Spawn the drain loop with the configured failure channel capacity.
    pub fn from_settings(relay: Arc<Relay>, settings: &RelaySettings) -> Self {
        Self::spawn(relay, settings.error_channel_capacity)
    }

    /// Append a command without waiting for it to run.
    pub fn submit(&self, command: RelayCommand) -> Result<()> {
        self.tx
            .send(QueueMessage::Command(command))
            .map_err(|_| RelayError::QueueClosed)
    }

    /// Wait until every command submitted before this call has been handled.
    pub async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(QueueMessage::Flush(reply_tx))
            .map_err(|_| RelayError::QueueClosed)?;
        reply_rx.await.map_err(|_| RelayError::QueueClosed)
    }

    /// Subscribe to failures raised by queued commands.
    pub fn failures(&self) -> broadcast::Receiver<RelayFailure> {
        self.failures.subscribe()
    }

    /// Whether the drain loop has exited.
    pub fn is_closed(&self) -> bool {
        self.worker_handle.is_finished()
    }

    /// Stop accepting commands, let the drain finish what is queued, and
    /// wait for it to exit.
    pub async fn close(self) {
        let Self {
            tx, worker_handle, ..
        } = self;
        drop(tx);
        if let Err(e) = worker_handle.await {
            warn!(error = %e, "relay drain loop ended abnormally");
        }
    }
}

async fn drain_worker(
    mut rx: mpsc::UnboundedReceiver<QueueMessage>,
    relay: Arc<Relay>,
    failures: broadcast::Sender<RelayFailure>,
) {
    while let Some(message) = rx.recv().await {
        let command = match message {
            QueueMessage::Flush(reply) => {
                let _ = reply.send(());
                continue;
            }
            QueueMessage::Command(command) => command,
        };

        let name = command.name();
        let outcome = AssertUnwindSafe(dispatch(&relay, command))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(RelayError::HandlerPanicked {
                    message: panic_message(payload.as_ref()),
                })
            });
        if let Err(error) = outcome {
            warn!(command = name, kind = error.error_kind(), error = %error, "relay command failed");
            let _ = failures.send(RelayFailure {
                command: name,
                error,
            });
        }
    }
    debug!("relay drain loop stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

async fn dispatch(relay: &Relay, command: RelayCommand) -> Result<()> {
    match command {
        RelayCommand::Delegate { parent_id, spec } => {
            let _ = relay.delegate(&parent_id, &spec).await?;
        }
        RelayCommand::NotifyChildStarted {
            parent_id,
            child_id,
            context,
        } => relay.notify_child_started(&parent_id, &child_id, &context).await?,
        RelayCommand::AttachSession {
            child_id,
            session_id,
            comment_id,
        } => {
            let _ = relay.attach_child_session(&child_id, session_id, comment_id);
        }
        RelayCommand::ChildCompleted {
            parent_id,
            child_id,
            result,
        } => {
            let _ = relay.on_child_completed(&parent_id, &child_id, result).await?;
        }
        RelayCommand::SessionCompleted { session_id, result } => {
            let registry = relay.registry();
            let Some(child_id) = registry.issue_for_session(&session_id) else {
                debug!(session_id = %session_id, "completion for untracked session dropped");
                return Ok(());
            };
            let Some(parent_id) = registry.parent_of_child(&child_id) else {
                debug!(session_id = %session_id, child_id = %child_id, "completion for orphaned child dropped");
                return Ok(());
            };
            let _ = relay.on_child_completed(&parent_id, &child_id, result).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RelayEvent;
    use crate::testutil::FakePlatform;
    use assert_matches::assert_matches;
    use conductor_registry::Registry;
    use serde_json::json;
    use std::time::Duration;

    fn setup(children: &[&str]) -> (RelayQueue, Arc<Relay>, Arc<FakePlatform>) {
        let platform = Arc::new(FakePlatform::default());
        let registry = Arc::new(Registry::new());
        let _ = registry
            .create_orchestration(IssueId::from("P"), AgentSessionId::from("PS"), None)
            .unwrap();
        for child in children {
            registry
                .register_child(&IssueId::from("P"), IssueId::from(*child))
                .unwrap();
        }
        let relay = Arc::new(Relay::new(registry, platform.capabilities()));
        (RelayQueue::spawn(Arc::clone(&relay), 16), relay, platform)
    }

    fn completed(child: &str, n: u64) -> RelayCommand {
        RelayCommand::ChildCompleted {
            parent_id: IssueId::from("P"),
            child_id: IssueId::from(child),
            result: json!(n),
        }
    }

    fn notify(child: &str) -> RelayCommand {
        RelayCommand::NotifyChildStarted {
            parent_id: IssueId::from("P"),
            child_id: IssueId::from(child),
            context: "start".into(),
        }
    }

    #[tokio::test]
    async fn commands_run_in_submission_order() {
        let (queue, _relay, platform) = setup(&["C1", "C2", "C3"]);
        for (i, child) in ["C2", "C3", "C1"].into_iter().enumerate() {
            queue.submit(completed(child, i as u64)).unwrap();
        }
        queue.flush().await.unwrap();

        let order: Vec<String> = platform
            .prompts()
            .into_iter()
            .map(|(_, text)| text.split_whitespace().nth(2).unwrap_or_default().to_owned())
            .collect();
        assert_eq!(order, vec!["C2", "C3", "C1"]);
    }

    #[tokio::test]
    async fn failure_is_reported_and_drain_continues() {
        let (queue, relay, platform) = setup(&["C1"]);
        let mut failures = queue.failures();
        let mut events = relay.subscribe();
        platform.fail_triggers();

        queue.submit(notify("C1")).unwrap();
        queue.submit(completed("C1", 1)).unwrap();
        queue.flush().await.unwrap();

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.command, "notify_child_started");
        assert_eq!(failure.error.error_kind(), "upstream_failure");
        assert!(failures.try_recv().is_err());
        assert!(matches!(
            events.try_recv().unwrap(),
            RelayEvent::OrchestrationComplete { .. }
        ));
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_and_drain_continues() {
        let (queue, relay, platform) = setup(&["C1"]);
        let mut failures = queue.failures();
        platform.panic_on_creation();

        queue
            .submit(RelayCommand::Delegate {
                parent_id: IssueId::from("P"),
                spec: ChildSpec::new("Sub", ""),
            })
            .unwrap();
        queue.submit(completed("C1", 1)).unwrap();
        queue.flush().await.unwrap();

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.command, "delegate");
        assert_eq!(failure.error.error_kind(), "handler_panicked");
        assert_matches!(failure.error, RelayError::HandlerPanicked { ref message } if message.contains("blew up"));
        assert!(!queue.is_closed());
        assert!(relay.registry().child_record(&IssueId::from("C1")).unwrap().is_completed());
        assert_eq!(platform.prompts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_never_overlap_and_late_commands_join_the_drain() {
        let (queue, _relay, platform) = setup(&["C1", "C2", "C3"]);
        platform.slow_triggers();

        queue.submit(notify("C1")).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // C1's handler is parked mid-await.
        assert_eq!(platform.trigger_timeline(), vec!["enter C1"]);

        queue.submit(notify("C2")).unwrap();
        queue.submit(notify("C3")).unwrap();
        queue.flush().await.unwrap();

        assert_eq!(
            platform.trigger_timeline(),
            vec!["enter C1", "exit C1", "enter C2", "exit C2", "enter C3", "exit C3"]
        );
        assert!(!queue.is_closed());
    }

    #[tokio::test]
    async fn from_settings_uses_configured_capacity() {
        let platform = Arc::new(FakePlatform::default());
        let relay = Arc::new(Relay::new(Arc::new(Registry::new()), platform.capabilities()));
        let settings = RelaySettings {
            error_channel_capacity: 1,
        };
        let queue = RelayQueue::from_settings(relay, &settings);
        let mut failures = queue.failures();

        for child in ["X", "Y"] {
            queue
                .submit(RelayCommand::Delegate {
                    parent_id: IssueId::from(child),
                    spec: ChildSpec::new("t", ""),
                })
                .unwrap();
        }
        queue.flush().await.unwrap();

        // Capacity one: the first failure was overwritten.
        assert_matches!(failures.try_recv(), Err(broadcast::error::TryRecvError::Lagged(1)));
        assert_eq!(failures.try_recv().unwrap().error.error_kind(), "not_found");
    }

    #[tokio::test]
    async fn session_completion_resolves_through_registry() {
        let (queue, relay, platform) = setup(&["C1"]);
        queue
            .submit(RelayCommand::AttachSession {
                child_id: IssueId::from("C1"),
                session_id: AgentSessionId::from("child-session"),
                comment_id: None,
            })
            .unwrap();
        queue
            .submit(RelayCommand::SessionCompleted {
                session_id: AgentSessionId::from("child-session"),
                result: json!({"summary": "done"}),
            })
            .unwrap();
        queue.flush().await.unwrap();

        assert_eq!(platform.prompts().len(), 1);
        assert!(relay.registry().child_record(&IssueId::from("C1")).unwrap().is_completed());
    }

    #[tokio::test]
    async fn unknown_session_completion_is_ignored() {
        let (queue, _relay, platform) = setup(&["C1"]);
        let mut failures = queue.failures();
        queue
            .submit(RelayCommand::SessionCompleted {
                session_id: AgentSessionId::from("nobody"),
                result: json!(null),
            })
            .unwrap();
        queue.flush().await.unwrap();
        assert!(platform.prompts().is_empty());
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn delegate_through_queue() {
        let (queue, relay, _platform) = setup(&[]);
        queue
            .submit(RelayCommand::Delegate {
                parent_id: IssueId::from("P"),
                spec: ChildSpec::new("Sub", ""),
            })
            .unwrap();
        queue.flush().await.unwrap();
        assert_eq!(
            relay.registry().orchestration(&IssueId::from("P")).unwrap().children.len(),
            1
        );
    }

    #[tokio::test]
    async fn close_drains_pending_commands() {
        let (queue, relay, _platform) = setup(&["C1"]);
        queue.submit(completed("C1", 7)).unwrap();
        queue.close().await;
        assert!(relay.registry().child_record(&IssueId::from("C1")).unwrap().is_completed());
    }

    #[test]
    fn command_names() {
        assert_eq!(completed("C", 0).name(), "child_completed");
        assert_eq!(
            RelayCommand::SessionCompleted {
                session_id: AgentSessionId::from("s"),
                result: Value::Null,
            }
            .name(),
            "session_completed"
        );
    }
}
