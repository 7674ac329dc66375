//! Inbound deliveries: the hand-off between the gateway and the relay.
//!
//! The gateway never interprets a webhook body. Once a tenant's verifier has
//! accepted a request it forwards the raw bytes as an [`InboundDelivery`];
//! whoever owns the receiving end parses the body into an [`InboundEvent`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::{AgentSessionId, CommentId, IssueId};

/// A verified webhook body, tagged with the tenant that accepted it.
#[derive(Clone, Debug)]
pub struct InboundDelivery {
    /// Opaque token of the tenant whose verifier matched.
    pub tenant: String,
    /// Raw request body.
    pub body: Bytes,
    /// When the gateway accepted the request.
    pub received_at: DateTime<Utc>,
}

impl InboundDelivery {
    /// Wrap a verified body for the given tenant, stamped with the current time.
    pub fn new(tenant: impl Into<String>, body: Bytes) -> Self {
        Self {
            tenant: tenant.into(),
            body,
            received_at: Utc::now(),
        }
    }

    /// Parse the body as an [`InboundEvent`].
    pub fn parse_event(&self) -> Result<InboundEvent, InboundParseError> {
        InboundEvent::parse(&self.body)
    }
}

/// Agent-session lifecycle events carried in webhook bodies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    /// An agent session was opened on an issue.
    SessionCreated {
        /// Issue the session belongs to.
        issue_id: IssueId,
        /// The new session.
        session_id: AgentSessionId,
        /// Comment that triggered the session, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment_id: Option<CommentId>,
    },
    /// An agent session finished its work and produced a result.
    SessionCompleted {
        /// The finished session.
        session_id: AgentSessionId,
        /// Opaque result payload.
        #[serde(default)]
        result: Value,
    },
}

impl InboundEvent {
    /// Parse a JSON body.
    pub fn parse(body: &[u8]) -> Result<Self, InboundParseError> {
        if body.is_empty() {
            return Err(InboundParseError::Empty);
        }
        serde_json::from_slice(body).map_err(InboundParseError::Json)
    }

    /// Session the event refers to.
    pub fn session_id(&self) -> &AgentSessionId {
        match self {
            Self::SessionCreated { session_id, .. } | Self::SessionCompleted { session_id, .. } => {
                session_id
            }
        }
    }
}

/// Failure to interpret an inbound body.
#[derive(Debug, Error)]
pub enum InboundParseError {
    /// The body was empty.
    #[error("empty event body")]
    Empty,
    /// The body was not a recognised event envelope.
    #[error("malformed event body: {0}")]
    Json(#[source] serde_json::Error),
}
