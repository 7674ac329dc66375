//! Registry error types.

use conductor_core::IssueId;
use thiserror::Error;

/// Errors returned by [`Registry`](crate::Registry) mutations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No orchestration exists for the parent.
    #[error("no orchestration for parent {0}")]
    NotFound(IssueId),
    /// An orchestration already exists for the parent.
    #[error("orchestration already exists for parent {0}")]
    AlreadyExists(IssueId),
    /// The child is already tracked under a different parent.
    #[error("child {child} already belongs to parent {owner}")]
    ChildOwnedElsewhere {
        /// Child that was being registered.
        child: IssueId,
        /// Parent currently owning the child.
        owner: IssueId,
    },
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            RegistryError::NotFound(IssueId::from("P")).to_string(),
            "no orchestration for parent P"
        );
        let err = RegistryError::ChildOwnedElsewhere {
            child: IssueId::from("C"),
            owner: IssueId::from("P"),
        };
        assert_eq!(err.to_string(), "child C already belongs to parent P");
    }
}
