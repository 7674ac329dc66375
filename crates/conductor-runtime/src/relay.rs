//! The relay: registry transitions in, outbound calls and events out.
//!
//! `on_child_completed` serializes its complete → prompt → scan → signal
//! sequence per parent with a tokio mutex, so two completions for the same
//! orchestration never interleave even on the multi-threaded runtime.
//! Unrelated orchestrations proceed independently. A parent's mutex exists
//! only while some completion holds or awaits it.

use std::sync::Arc;

use conductor_core::{AgentSessionId, CommentId, IssueId};
use conductor_registry::{OrchestrationRecord, OrchestrationStatus, Registry, RegistryError};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::capabilities::{Capabilities, ChildSpec};
use crate::errors::{RelayError, Result};
use crate::events::RelayEvent;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What `on_child_completed` did with a completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The child is not tracked under that parent; nothing changed.
    Untracked,
    /// The child was recorded complete; siblings are still outstanding.
    Recorded,
    /// This completion finished the orchestration and the signal was emitted.
    OrchestrationComplete,
}

/// Coordinates child delegation and completion relay for every orchestration
/// in one registry.
pub struct Relay {
    registry: Arc<Registry>,
    capabilities: Capabilities,
    events: broadcast::Sender<RelayEvent>,
    locks: DashMap<IssueId, Arc<Mutex<()>>>,
}

impl Relay {
    /// Build a relay over `registry` using the injected capabilities.
    pub fn new(registry: Arc<Registry>, capabilities: Capabilities) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            capabilities,
            events,
            locks: DashMap::new(),
        }
    }

    /// The registry this relay drives.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Subscribe to relay events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Create a child work item for `parent_id` and register it.
    ///
    /// Nothing is registered if creation fails.
    pub async fn delegate(&self, parent_id: &IssueId, spec: &ChildSpec) -> Result<IssueId> {
        if !self.registry.is_parent(parent_id) {
            return Err(RegistryError::NotFound(parent_id.clone()).into());
        }

        let child_id = self
            .capabilities
            .issues
            .create_child_work_item(parent_id, spec)
            .await
            .map_err(|e| {
                warn!(parent_id = %parent_id, error = %e, retryable = e.retryable, "child creation failed");
                RelayError::upstream("create_child_work_item", e.message)
            })?;

        if let Err(e) = self.registry.register_child(parent_id, child_id.clone()) {
            warn!(parent_id = %parent_id, child_id = %child_id, error = %e, "created child could not be registered");
            return Err(e.into());
        }

        info!(parent_id = %parent_id, child_id = %child_id, "child delegated");
        self.emit(RelayEvent::ChildCreated {
            parent_id: parent_id.clone(),
            child_id: child_id.clone(),
        });
        Ok(child_id)
    }

    /// Post the trigger comment that starts a child's own processing.
    ///
    /// Failure is logged and returned; registry state is never touched.
    pub async fn notify_child_started(
        &self,
        parent_id: &IssueId,
        child_id: &IssueId,
        context: &str,
    ) -> Result<()> {
        if let Err(e) = self
            .capabilities
            .triggers
            .post_trigger_comment(child_id, context)
            .await
        {
            warn!(parent_id = %parent_id, child_id = %child_id, error = %e, "trigger comment failed");
            return Err(RelayError::upstream("post_trigger_comment", e.message));
        }

        debug!(parent_id = %parent_id, child_id = %child_id, "child triggered");
        self.emit(RelayEvent::ChildStarted {
            parent_id: parent_id.clone(),
            child_id: child_id.clone(),
        });
        Ok(())
    }

    /// Record a child session against its work item.
    pub fn attach_child_session(
        &self,
        child_id: &IssueId,
        session_id: AgentSessionId,
        comment_id: Option<CommentId>,
    ) -> bool {
        let attached = self
            .registry
            .attach_child_session(child_id, session_id, comment_id);
        if !attached {
            debug!(child_id = %child_id, "session for untracked issue ignored");
        }
        attached
    }

    /// Fold a child's result back into its parent.
    ///
    /// Records the completion, prompts the parent session with the result,
    /// then checks whether every child is done. The orchestration-complete
    /// signal is emitted at most once per orchestration. A failed prompt is
    /// returned as [`RelayError::UpstreamFailure`] after the completion scan
    /// has run; the recorded completion is not rolled back.
    pub async fn on_child_completed(
        &self,
        parent_id: &IssueId,
        child_id: &IssueId,
        result: Value,
    ) -> Result<CompletionOutcome> {
        if !self.registry.is_parent(parent_id) {
            debug!(parent_id = %parent_id, child_id = %child_id, "completion for untracked parent dropped");
            return Ok(CompletionOutcome::Untracked);
        }

        // Declared first so it drops after the lock, even on unwind.
        let _release = LockRelease {
            locks: &self.locks,
            parent_id,
        };
        let lock = self.lock_for(parent_id);
        let _guard = lock.lock().await;
        self.complete_serialized(parent_id, child_id, result).await
    }

    /// Abandon an orchestration. Returns `false` if it was not active.
    pub fn fail_orchestration(&self, parent_id: &IssueId) -> bool {
        self.registry.mark_orchestration_failed(parent_id)
    }

    async fn complete_serialized(
        &self,
        parent_id: &IssueId,
        child_id: &IssueId,
        result: Value,
    ) -> Result<CompletionOutcome> {
        if self.registry.parent_of_child(child_id).as_ref() != Some(parent_id) {
            debug!(parent_id = %parent_id, child_id = %child_id, "completion for untracked child dropped");
            return Ok(CompletionOutcome::Untracked);
        }
        let Some(record) = self.registry.complete_child(child_id, result) else {
            debug!(parent_id = %parent_id, child_id = %child_id, "completion for untracked child dropped");
            return Ok(CompletionOutcome::Untracked);
        };

        let prompted = self.prompt_parent(&record, child_id).await;

        let outcome = match self.registry.orchestration(parent_id) {
            Some(current)
                if current.status == OrchestrationStatus::Active
                    && current.all_children_completed() =>
            {
                if self.registry.mark_orchestration_complete(parent_id) {
                    info!(parent_id = %parent_id, children = current.children.len(), "orchestration complete");
                    self.emit(RelayEvent::orchestration_complete(&current));
                    CompletionOutcome::OrchestrationComplete
                } else {
                    CompletionOutcome::Recorded
                }
            }
            _ => CompletionOutcome::Recorded,
        };

        prompted.map(|()| outcome)
    }

    async fn prompt_parent(&self, record: &OrchestrationRecord, child_id: &IssueId) -> Result<()> {
        let content = completion_prompt(record, child_id);
        match self
            .capabilities
            .prompts
            .post_prompt(&record.parent_session_id, &content)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(parent_id = %record.parent_id, session_id = %record.parent_session_id, "parent session declined prompt");
                Err(RelayError::upstream("post_prompt", "session declined the prompt"))
            }
            Err(e) => {
                warn!(parent_id = %record.parent_id, session_id = %record.parent_session_id, error = %e, "prompt delivery failed");
                Err(RelayError::upstream("post_prompt", e.message))
            }
        }
    }

    fn lock_for(&self, parent_id: &IssueId) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(parent_id.clone()).or_default())
    }

    fn emit(&self, event: RelayEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Drops a parent's mutex once no caller holds or awaits it.
struct LockRelease<'a> {
    locks: &'a DashMap<IssueId, Arc<Mutex<()>>>,
    parent_id: &'a IssueId,
}

impl Drop for LockRelease<'_> {
    fn drop(&mut self) {
        let _ = self
            .locks
            .remove_if(self.parent_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Prompt text telling the parent session one of its children finished.
fn completion_prompt(record: &OrchestrationRecord, child_id: &IssueId) -> String {
    let result = record
        .child_state
        .get(child_id)
        .and_then(|c| c.result.as_ref())
        .map_or_else(String::new, |value| match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        });
    format!(
        "Child task {child_id} completed ({done}/{total} children done).\n\nResult:\n{result}",
        done = record.completed_count(),
        total = record.children.len(),
    )
}
