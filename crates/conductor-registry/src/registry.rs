//! The orchestration registry.
//!
//! All state lives behind one `RwLock`. Every mutation, including the
//! reverse-index bookkeeping that accompanies it, happens inside a single
//! write guard, so the primary map and the indices can never be observed out
//! of step. Methods return cloned snapshots; callers never hold a reference
//! into the registry across an `.await`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use conductor_core::{AgentSessionId, CommentId, IssueId};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{RegistryError, Result};
use crate::types::{ChildRecord, ChildStatus, OrchestrationRecord, OrchestrationStatus};

#[derive(Default)]
struct RegistryState {
    orchestrations: HashMap<IssueId, OrchestrationRecord>,
    /// child issue → parent issue
    child_to_parent: HashMap<IssueId, IssueId>,
    /// agent session → child issue
    session_to_child: HashMap<AgentSessionId, IssueId>,
}

impl RegistryState {
    fn child_mut(&mut self, child_id: &IssueId) -> Option<(&mut OrchestrationRecord, IssueId)> {
        let parent_id = self.child_to_parent.get(child_id)?.clone();
        let record = self.orchestrations.get_mut(&parent_id)?;
        Some((record, parent_id))
    }

    fn remove_orchestration(&mut self, parent_id: &IssueId) -> Option<OrchestrationRecord> {
        let record = self.orchestrations.remove(parent_id)?;
        for child in record.child_state.values() {
            let _ = self.child_to_parent.remove(&child.issue_id);
            // The session may have moved on to a child elsewhere.
            if let Some(session) = child
                .agent_session_id
                .as_ref()
                .filter(|s| self.session_to_child.get(*s) == Some(&child.issue_id))
            {
                let _ = self.session_to_child.remove(session);
            }
        }
        Some(record)
    }
}

/// In-memory store of orchestrations and their children.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Start tracking a parent task.
    ///
    /// Fails with [`RegistryError::AlreadyExists`] if the parent is tracked.
    pub fn create_orchestration(
        &self,
        parent_id: IssueId,
        parent_session_id: AgentSessionId,
        parent_comment_id: Option<CommentId>,
    ) -> Result<OrchestrationRecord> {
        let mut state = self.state.write();
        if state.orchestrations.contains_key(&parent_id) {
            return Err(RegistryError::AlreadyExists(parent_id));
        }
        let record = OrchestrationRecord::new(
            parent_id.clone(),
            parent_session_id,
            parent_comment_id,
            Utc::now(),
        );
        let _ = state.orchestrations.insert(parent_id.clone(), record.clone());
        info!(parent_id = %parent_id, "orchestration created");
        Ok(record)
    }

    /// Add a child under a parent.
    ///
    /// Registering the same child twice is a no-op that leaves its state alone.
    pub fn register_child(&self, parent_id: &IssueId, child_id: IssueId) -> Result<()> {
        let mut state = self.state.write();
        if !state.orchestrations.contains_key(parent_id) {
            return Err(RegistryError::NotFound(parent_id.clone()));
        }
        if let Some(owner) = state.child_to_parent.get(&child_id) {
            if owner == parent_id {
                debug!(parent_id = %parent_id, child_id = %child_id, "child already registered");
                return Ok(());
            }
            return Err(RegistryError::ChildOwnedElsewhere {
                child: child_id,
                owner: owner.clone(),
            });
        }

        let _ = state
            .child_to_parent
            .insert(child_id.clone(), parent_id.clone());
        let Some(record) = state.orchestrations.get_mut(parent_id) else {
            return Err(RegistryError::NotFound(parent_id.clone()));
        };
        let now = Utc::now();
        record.children.push(child_id.clone());
        let _ = record
            .child_state
            .insert(child_id.clone(), ChildRecord::new(child_id.clone(), now));
        record.updated_at = now;
        info!(parent_id = %parent_id, child_id = %child_id, "child registered");
        Ok(())
    }

    /// Record the processing session working on a child.
    ///
    /// Returns `false` (and does nothing) when the child is not tracked:
    /// sessions routinely start on issues outside any orchestration. A
    /// pending child moves to `InProgress`; finished children keep their
    /// status. A session belongs to one child at a time: if it was attached
    /// to another child, that child loses it.
    pub fn attach_child_session(
        &self,
        child_id: &IssueId,
        session_id: AgentSessionId,
        comment_id: Option<CommentId>,
    ) -> bool {
        let mut state = self.state.write();
        if !state.child_to_parent.contains_key(child_id) {
            return false;
        }
        let previous_owner = state
            .session_to_child
            .get(&session_id)
            .filter(|owner| *owner != child_id)
            .cloned();
        if let Some(owner) = previous_owner {
            if let Some(child) = state
                .child_mut(&owner)
                .and_then(|(record, _)| record.child_state.get_mut(&owner))
            {
                child.agent_session_id = None;
            }
            debug!(child_id = %owner, session_id = %session_id, "session detached from previous child");
        }

        let Some((record, parent_id)) = state.child_mut(child_id) else {
            return false;
        };
        let Some(child) = record.child_state.get_mut(child_id) else {
            return false;
        };

        let previous = child.agent_session_id.replace(session_id.clone());
        if comment_id.is_some() {
            child.comment_id = comment_id;
        }
        if child.status == ChildStatus::Pending {
            child.status = ChildStatus::InProgress;
        }
        record.updated_at = Utc::now();

        if let Some(previous) = previous.filter(|p| *p != session_id) {
            let _ = state.session_to_child.remove(&previous);
        }
        let _ = state
            .session_to_child
            .insert(session_id.clone(), child_id.clone());
        debug!(parent_id = %parent_id, child_id = %child_id, session_id = %session_id, "child session attached");
        true
    }

    /// Mark a child completed with its result.
    ///
    /// Returns a snapshot of the updated parent record, or `None` when the
    /// child is not tracked. Completing again overwrites the result and
    /// timestamp.
    pub fn complete_child(&self, child_id: &IssueId, result: Value) -> Option<OrchestrationRecord> {
        let mut state = self.state.write();
        let (record, parent_id) = state.child_mut(child_id)?;
        let child = record.child_state.get_mut(child_id)?;

        let now = Utc::now();
        child.status = ChildStatus::Completed;
        child.result = Some(result);
        child.completed_at = Some(now);
        record.updated_at = now;
        info!(
            parent_id = %parent_id,
            child_id = %child_id,
            completed = record.completed_count(),
            total = record.children.len(),
            "child completed"
        );
        Some(record.clone())
    }

    /// Mark a child failed.
    ///
    /// A completed child is left untouched. Returns the parent snapshot, or
    /// `None` when the child is not tracked.
    pub fn fail_child(&self, child_id: &IssueId) -> Option<OrchestrationRecord> {
        let mut state = self.state.write();
        let (record, parent_id) = state.child_mut(child_id)?;
        let child = record.child_state.get_mut(child_id)?;
        if child.status != ChildStatus::Completed {
            child.status = ChildStatus::Failed;
            record.updated_at = Utc::now();
            info!(parent_id = %parent_id, child_id = %child_id, "child failed");
        }
        Some(record.clone())
    }

    /// Move an active orchestration to `Completed`.
    ///
    /// Returns `true` only for the call that performed the transition;
    /// `updated_at` is bumped only then.
    pub fn mark_orchestration_complete(&self, parent_id: &IssueId) -> bool {
        self.transition(parent_id, OrchestrationStatus::Completed)
    }

    /// Move an active orchestration to `Failed`.
    pub fn mark_orchestration_failed(&self, parent_id: &IssueId) -> bool {
        self.transition(parent_id, OrchestrationStatus::Failed)
    }

    fn transition(&self, parent_id: &IssueId, to: OrchestrationStatus) -> bool {
        let mut state = self.state.write();
        let Some(record) = state.orchestrations.get_mut(parent_id) else {
            return false;
        };
        if record.status != OrchestrationStatus::Active {
            return false;
        }
        record.status = to;
        record.updated_at = Utc::now();
        info!(parent_id = %parent_id, status = ?to, "orchestration finished");
        true
    }

    /// Purge finished orchestrations last updated more than `age` ago.
    ///
    /// Active orchestrations are never purged. Returns the number removed.
    pub fn purge_older_than(&self, age: Duration) -> usize {
        let cutoff = TimeDelta::from_std(age)
            .ok()
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.purge_finished_before(cutoff)
    }

    /// Purge finished orchestrations whose `updated_at` precedes `cutoff`.
    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.write();
        let expired: Vec<IssueId> = state
            .orchestrations
            .values()
            .filter(|r| r.status.is_terminal() && r.updated_at < cutoff)
            .map(|r| r.parent_id.clone())
            .collect();

        for parent_id in &expired {
            let _ = state.remove_orchestration(parent_id);
            debug!(parent_id = %parent_id, "orchestration purged");
        }
        if !expired.is_empty() {
            info!(purged = expired.len(), "purged finished orchestrations");
        }
        expired.len()
    }

    /// Drop every orchestration and index entry.
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = RegistryState::default();
    }

    // ── Lookups ─────────────────────────────────────────────────────

    /// Parent owning a child.
    pub fn parent_of_child(&self, child_id: &IssueId) -> Option<IssueId> {
        self.state.read().child_to_parent.get(child_id).cloned()
    }

    /// Snapshot of a parent's orchestration.
    pub fn orchestration(&self, parent_id: &IssueId) -> Option<OrchestrationRecord> {
        self.state.read().orchestrations.get(parent_id).cloned()
    }

    /// Child issue a processing session is attached to.
    pub fn issue_for_session(&self, session_id: &AgentSessionId) -> Option<IssueId> {
        self.state.read().session_to_child.get(session_id).cloned()
    }

    /// Snapshot of one child's record.
    pub fn child_record(&self, child_id: &IssueId) -> Option<ChildRecord> {
        let state = self.state.read();
        let parent_id = state.child_to_parent.get(child_id)?;
        state
            .orchestrations
            .get(parent_id)?
            .child_state
            .get(child_id)
            .cloned()
    }

    /// Whether an orchestration exists for the issue.
    pub fn is_parent(&self, issue_id: &IssueId) -> bool {
        self.state.read().orchestrations.contains_key(issue_id)
    }

    /// Whether the issue is a tracked child.
    pub fn is_child(&self, issue_id: &IssueId) -> bool {
        self.state.read().child_to_parent.contains_key(issue_id)
    }

    /// Snapshot of every orchestration.
    pub fn orchestrations(&self) -> Vec<OrchestrationRecord> {
        self.state.read().orchestrations.values().cloned().collect()
    }

    /// Number of tracked orchestrations.
    pub fn len(&self) -> usize {
        self.state.read().orchestrations.len()
    }

    /// Whether no orchestrations are tracked.
    pub fn is_empty(&self) -> bool {
        self.state.read().orchestrations.is_empty()
    }

    #[cfg(test)]
    fn set_updated_at(&self, parent_id: &IssueId, at: DateTime<Utc>) {
        if let Some(record) = self.state.write().orchestrations.get_mut(parent_id) {
            record.updated_at = at;
        }
    }
}
