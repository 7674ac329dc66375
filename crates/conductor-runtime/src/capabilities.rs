//! Outbound capabilities the relay consumes.
//!
//! The relay never calls the collaboration platform directly. The process
//! holder injects implementations of these traits; retry policy, if any,
//! lives inside them.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{AgentSessionId, IssueId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure reported by an injected capability.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CapabilityError {
    /// Human-readable description.
    pub message: String,
    /// Whether the capability considers the call worth retrying.
    pub retryable: bool,
}

impl CapabilityError {
    /// A non-retryable failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// A failure the caller may retry.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Description of a child work item to create.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSpec {
    /// Work item title.
    pub title: String,
    /// Work item body.
    #[serde(default)]
    pub description: String,
    /// Free-form fields passed through to the issue creator.
    #[serde(default)]
    pub metadata: Value,
}

impl ChildSpec {
    /// Spec with a title and description and no metadata.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            metadata: Value::Null,
        }
    }
}

/// Creates child work items on the collaboration platform.
#[async_trait]
pub trait IssueCreator: Send + Sync {
    /// Materialize a child work item under `parent_id`, returning its ID.
    async fn create_child_work_item(
        &self,
        parent_id: &IssueId,
        spec: &ChildSpec,
    ) -> Result<IssueId, CapabilityError>;
}

/// Posts the comment that kicks off a child's own processing.
#[async_trait]
pub trait TriggerPoster: Send + Sync {
    /// Post a trigger comment carrying `context` on the child work item.
    async fn post_trigger_comment(
        &self,
        child_id: &IssueId,
        context: &str,
    ) -> Result<(), CapabilityError>;
}

/// Delivers prompts into a processing session.
#[async_trait]
pub trait PromptPoster: Send + Sync {
    /// Post `content` into the session. `Ok(false)` means the session
    /// declined it.
    async fn post_prompt(
        &self,
        session_id: &AgentSessionId,
        content: &str,
    ) -> Result<bool, CapabilityError>;
}

/// The bundle of capabilities a [`Relay`](crate::Relay) is built with.
#[derive(Clone)]
pub struct Capabilities {
    /// Child work item creation.
    pub issues: Arc<dyn IssueCreator>,
    /// Trigger comments on children.
    pub triggers: Arc<dyn TriggerPoster>,
    /// Prompts into the parent's session.
    pub prompts: Arc<dyn PromptPoster>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_error_constructors() {
        assert!(!CapabilityError::new("boom").retryable);
        let e = CapabilityError::retryable("rate limited");
        assert!(e.retryable);
        assert_eq!(e.to_string(), "rate limited");
    }

    #[test]
    fn child_spec_deserializes_with_defaults() {
        let spec: ChildSpec = serde_json::from_str(r#"{"title":"Write tests"}"#).unwrap();
        assert_eq!(spec.title, "Write tests");
        assert!(spec.description.is_empty());
        assert!(spec.metadata.is_null());
    }
}
