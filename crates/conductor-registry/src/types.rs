//! Orchestration and child records.

use chrono::{DateTime, Utc};
use conductor_core::{AgentSessionId, CommentId, IssueId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Aggregate lifecycle of an orchestration.
///
/// Transitions only `Active → Completed` or `Active → Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    /// Children are still being delegated or worked on.
    Active,
    /// Every child completed and the completion signal was emitted.
    Completed,
    /// The orchestration was abandoned.
    Failed,
}

impl OrchestrationStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Lifecycle of a single child task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStatus {
    /// Registered, no processing session yet.
    Pending,
    /// A processing session is attached.
    InProgress,
    /// Finished with a result.
    Completed,
    /// Finished without a result.
    Failed,
}

/// State of one delegated child task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRecord {
    /// The child's issue.
    pub issue_id: IssueId,
    /// Processing session working on the child.
    pub agent_session_id: Option<AgentSessionId>,
    /// Comment that started the child session.
    pub comment_id: Option<CommentId>,
    /// Current status.
    pub status: ChildStatus,
    /// Result payload; set together with `completed_at`.
    pub result: Option<Value>,
    /// When the child was registered.
    pub created_at: DateTime<Utc>,
    /// When the child completed; set together with `result`.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ChildRecord {
    pub(crate) fn new(issue_id: IssueId, now: DateTime<Utc>) -> Self {
        Self {
            issue_id,
            agent_session_id: None,
            comment_id: None,
            status: ChildStatus::Pending,
            result: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Whether the child has finished successfully.
    pub fn is_completed(&self) -> bool {
        self.status == ChildStatus::Completed
    }
}

/// One parent task and the children it delegated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRecord {
    /// The parent's issue.
    pub parent_id: IssueId,
    /// The parent's processing session; prompts are posted here.
    pub parent_session_id: AgentSessionId,
    /// Comment the parent session was started from.
    pub parent_comment_id: Option<CommentId>,
    /// Child issue IDs in registration order.
    pub children: Vec<IssueId>,
    /// Per-child state.
    pub child_state: HashMap<IssueId, ChildRecord>,
    /// Aggregate status.
    pub status: OrchestrationStatus,
    /// When the orchestration was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation of this record or any of its children.
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationRecord {
    pub(crate) fn new(
        parent_id: IssueId,
        parent_session_id: AgentSessionId,
        parent_comment_id: Option<CommentId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            parent_id,
            parent_session_id,
            parent_comment_id,
            children: Vec::new(),
            child_state: HashMap::new(),
            status: OrchestrationStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// `true` when there is at least one child and every child completed.
    pub fn all_children_completed(&self) -> bool {
        !self.children.is_empty()
            && self
                .children
                .iter()
                .all(|id| self.child_state.get(id).is_some_and(ChildRecord::is_completed))
    }

    /// Child records in registration order.
    pub fn children_in_order(&self) -> impl Iterator<Item = &ChildRecord> {
        self.children.iter().filter_map(|id| self.child_state.get(id))
    }

    /// Number of children that completed.
    pub fn completed_count(&self) -> usize {
        self.child_state.values().filter(|c| c.is_completed()).count()
    }
}
