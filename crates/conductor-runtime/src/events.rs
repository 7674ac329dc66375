//! Events the relay publishes on its broadcast channel.

use chrono::{DateTime, Utc};
use conductor_core::{AgentSessionId, IssueId};
use conductor_registry::{ChildRecord, OrchestrationRecord};
use serde::Serialize;
use serde_json::Value;

/// Final result of one child, as carried by the completion signal.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildResult {
    /// The child's issue.
    pub issue_id: IssueId,
    /// Result payload.
    pub result: Value,
    /// When the child completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ChildRecord> for ChildResult {
    fn from(child: &ChildRecord) -> Self {
        Self {
            issue_id: child.issue_id.clone(),
            result: child.result.clone().unwrap_or(Value::Null),
            completed_at: child.completed_at,
        }
    }
}

/// Lifecycle notifications emitted by the relay.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayEvent {
    /// A child work item was created and registered.
    ChildCreated {
        /// Owning parent.
        parent_id: IssueId,
        /// New child.
        child_id: IssueId,
    },
    /// A child was sent its trigger comment.
    ChildStarted {
        /// Owning parent.
        parent_id: IssueId,
        /// Triggered child.
        child_id: IssueId,
    },
    /// Every child of an orchestration completed. Emitted once per
    /// orchestration.
    OrchestrationComplete {
        /// The finished parent.
        parent_id: IssueId,
        /// The parent's processing session.
        parent_session_id: AgentSessionId,
        /// One entry per child, in registration order.
        results: Vec<ChildResult>,
    },
}

impl RelayEvent {
    pub(crate) fn orchestration_complete(record: &OrchestrationRecord) -> Self {
        Self::OrchestrationComplete {
            parent_id: record.parent_id.clone(),
            parent_session_id: record.parent_session_id.clone(),
            results: record.children_in_order().map(ChildResult::from).collect(),
        }
    }

    /// The parent this event concerns.
    pub fn parent_id(&self) -> &IssueId {
        match self {
            Self::ChildCreated { parent_id, .. }
            | Self::ChildStarted { parent_id, .. }
            | Self::OrchestrationComplete { parent_id, .. } => parent_id,
        }
    }
}
