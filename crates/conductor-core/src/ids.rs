//! Branded ID newtypes for type safety.
//!
//! External identifiers (issues, agent sessions, comments) are opaque strings
//! handed to us by the collaboration platform, so they are only ever built
//! from existing values. Identifiers the conductor mints itself (authorization
//! flows) are UUID v7 strings with a short prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(
    /// Identifier of an issue (work item) on the collaboration platform.
    ///
    /// Parent tasks and child tasks are both issues.
    IssueId
);
branded_id!(
    /// Identifier of an agent processing session attached to an issue.
    AgentSessionId
);
branded_id!(
    /// Identifier of a comment on an issue.
    CommentId
);
branded_id!(
    /// Identifier of a pending authorization flow.
    FlowId
);

impl FlowId {
    /// Mint a fresh, time-ordered flow ID.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("flow_{}", Uuid::now_v7()))
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}
