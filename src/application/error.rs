//! Engine-level error taxonomy.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::error::DomainError;

use super::batch::BatchFailure;
use super::remote::RemoteError;

/// What a mutation can fail with.
///
/// Validation variants are decided locally and never reach the network;
/// `Remote` failures roll optimistic state back and leave the touched
/// partitions stale.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("category name must not be empty")]
    EmptyName,
    #[error("category name `{name}` is already in use at this scope")]
    DuplicateName { name: String },
    #[error("reassignment target is missing from the current scope")]
    MissingReassignTarget,
    #[error("category `{id}` is not cached at any scope")]
    UnknownCategory { id: Uuid },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl EngineError {
    /// Whether the failure was decided locally, before any network call.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::EmptyName
            | Self::DuplicateName { .. }
            | Self::MissingReassignTarget
            | Self::UnknownCategory { .. } => true,
            Self::Domain(domain) => matches!(domain, DomainError::Validation { .. }),
            Self::Remote(_) => false,
        }
    }
}

/// Some cascade sub-requests failed while the primary operation
/// succeeded.
///
/// This is data on a successful report, not an error: the touched
/// partitions are invalidated instead of trusted, and the next read
/// converges on the remote authority.
#[derive(Debug, Clone)]
pub struct PartialCascadeFailure {
    pub attempted: usize,
    pub failures: Vec<BatchFailure>,
}

impl PartialCascadeFailure {
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for PartialCascadeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} cascade sub-requests failed",
            self.failures.len(),
            self.attempted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_classification() {
        assert!(EngineError::EmptyName.is_validation());
        assert!(
            EngineError::DuplicateName {
                name: "Drinks".to_string()
            }
            .is_validation()
        );
        assert!(EngineError::MissingReassignTarget.is_validation());
        assert!(EngineError::Domain(DomainError::validation("bad price")).is_validation());
        assert!(!EngineError::Remote(RemoteError::NotFound).is_validation());
    }

    #[test]
    fn partial_failure_formats_counts() {
        let partial = PartialCascadeFailure {
            attempted: 7,
            failures: vec![
                BatchFailure {
                    id: Uuid::new_v4(),
                    error: RemoteError::network("offline"),
                },
                BatchFailure {
                    id: Uuid::new_v4(),
                    error: RemoteError::server(502, "bad gateway"),
                },
            ],
        };
        assert_eq!(partial.to_string(), "2 of 7 cascade sub-requests failed");
        assert_eq!(partial.failed_count(), 2);
    }
}
