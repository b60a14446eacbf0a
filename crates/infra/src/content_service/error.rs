use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgepress_core::{Classify, ContentKey, DomainError, Fault, FaultKind, IssueNumber};

use crate::batch::PartialBatchError;
use crate::saga::TransactionError;
use crate::storage::StorageError;

/// Failure taxonomy of content operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rejected input; nothing was started.
    Validation,
    /// Stale version or taken issue; re-read and resubmit.
    Conflict,
    NotFound,
    /// Retryable remote failure.
    TransientIo,
    /// Permanent blob store failure.
    Storage,
    /// A transaction step failed and was fully rolled back.
    TransactionStep,
    /// A transaction step failed and some compensations failed too.
    Rollback,
    /// Some items of a batch failed.
    PartialBatch,
    /// Files are gone but the record persists.
    Reconciliation,
    Internal,
}

/// Content service error.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("content item {0} not found")]
    NotFound(ContentKey),

    /// Pre-check: another item already uses the issue number.
    #[error("issue {issue} is already used by item {owner}")]
    IssueTaken { issue: IssueNumber, owner: ContentKey },

    /// The record store's unique constraint rejected the write.
    #[error("issue {issue} was claimed concurrently: {source}")]
    IssueConflict { issue: IssueNumber, source: Fault },

    #[error("version conflict on item {key}: expected version {expected}, {}", describe_actual(.actual))]
    VersionConflict {
        key: ContentKey,
        expected: u64,
        /// `None` when the version-checked write matched zero rows.
        actual: Option<u64>,
    },

    #[error("record store failure: {0}")]
    Record(#[source] Fault),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transaction(Box<TransactionError<ContentError>>),

    /// A step failed and undoing its own partial work failed as well.
    #[error("{failure}; undoing the step's partial work failed: {cleanup}")]
    CleanupFailed {
        failure: Box<ContentError>,
        cleanup: Box<ContentError>,
    },

    #[error(
        "files of item {key} were deleted but the record persists; manual reconciliation required: {source}"
    )]
    RecordDeleteFailed { key: ContentKey, source: Fault },
}

fn describe_actual(actual: &Option<u64>) -> String {
    match actual {
        Some(v) => format!("found {v}"),
        None => "row changed concurrently".to_string(),
    }
}

impl ContentError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ContentError::Validation(_) => ErrorCategory::Validation,
            ContentError::NotFound(_) => ErrorCategory::NotFound,
            ContentError::IssueTaken { .. }
            | ContentError::IssueConflict { .. }
            | ContentError::VersionConflict { .. } => ErrorCategory::Conflict,
            ContentError::Record(fault) if fault.transient => ErrorCategory::TransientIo,
            ContentError::Record(_) => ErrorCategory::Internal,
            ContentError::Storage(StorageError::PartialBatch(_)) => ErrorCategory::PartialBatch,
            ContentError::Storage(err) if err.is_transient() => ErrorCategory::TransientIo,
            ContentError::Storage(_) => ErrorCategory::Storage,
            ContentError::Transaction(err) if err.requires_manual_cleanup() => ErrorCategory::Rollback,
            ContentError::Transaction(_) => ErrorCategory::TransactionStep,
            ContentError::CleanupFailed { .. } => ErrorCategory::Rollback,
            ContentError::RecordDeleteFailed { .. } => ErrorCategory::Reconciliation,
        }
    }

    /// Whether the caller should re-read and resubmit, looking through transaction failures.
    pub fn is_conflict(&self) -> bool {
        match self {
            ContentError::Transaction(err) => err.step_error().is_some_and(ContentError::is_conflict),
            other => other.category() == ErrorCategory::Conflict,
        }
    }

    /// The error that actually stopped the operation, unwrapping transaction failures.
    pub fn root(&self) -> &ContentError {
        match self {
            ContentError::Transaction(err) => err.step_error().map(ContentError::root).unwrap_or(self),
            other => other,
        }
    }

    /// Partial-batch details, if a batch inside this operation partially failed.
    pub fn partial_batch(&self) -> Option<&PartialBatchError> {
        match self.root() {
            ContentError::Storage(StorageError::PartialBatch(err)) => Some(err),
            _ => None,
        }
    }
}

impl Classify for ContentError {
    fn fault_kind(&self) -> FaultKind {
        match self {
            ContentError::Validation(_) => FaultKind::InvalidRequest,
            ContentError::NotFound(_) => FaultKind::NotFound,
            ContentError::IssueTaken { .. } | ContentError::IssueConflict { .. } => FaultKind::UniqueViolation,
            ContentError::VersionConflict { .. } => FaultKind::Conflict,
            ContentError::Record(fault) | ContentError::RecordDeleteFailed { source: fault, .. } => fault.kind,
            ContentError::Storage(err) => err.fault_kind(),
            ContentError::CleanupFailed { failure, .. } => failure.fault_kind(),
            ContentError::Transaction(err) => err
                .step_error()
                .map(Classify::fault_kind)
                .unwrap_or(FaultKind::Internal),
        }
    }

    // Orchestrated operations are never retried as a whole.
    fn is_transient(&self) -> bool {
        match self {
            ContentError::Record(fault) => fault.transient,
            ContentError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<DomainError> for ContentError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ContentError::Validation(msg),
        }
    }
}

impl From<TransactionError<ContentError>> for ContentError {
    fn from(err: TransactionError<ContentError>) -> Self {
        ContentError::Transaction(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::{RollbackError, RollbackFailure, RollbackOutcome, StepFailure};

    fn issue(n: u32) -> IssueNumber {
        IssueNumber::new(n).unwrap()
    }

    fn failed_step(error: ContentError, rollback: RollbackOutcome<ContentError>) -> ContentError {
        TransactionError::StepFailed(Box::new(StepFailure {
            step: "update-record".to_string(),
            error,
            rollback,
        }))
        .into()
    }

    #[test]
    fn version_race_inside_a_step_is_still_a_conflict() {
        let key = ContentKey::new();
        let err = failed_step(
            ContentError::VersionConflict {
                key,
                expected: 2,
                actual: None,
            },
            RollbackOutcome::Complete,
        );

        assert!(err.is_conflict());
        assert_eq!(err.category(), ErrorCategory::TransactionStep);
        assert!(matches!(err.root(), ContentError::VersionConflict { actual: None, .. }));
        assert!(err.to_string().contains("row changed concurrently"));
    }

    #[test]
    fn partial_rollback_is_its_own_category() {
        let err = failed_step(
            ContentError::Record(Fault::internal("boom")),
            RollbackOutcome::Partial(vec![RollbackFailure {
                step: "move-files".to_string(),
                error: RollbackError::Failed(ContentError::Record(Fault::internal("still boom"))),
            }]),
        );

        assert_eq!(err.category(), ErrorCategory::Rollback);
        assert!(!err.is_conflict());
        assert!(err.to_string().contains("manual cleanup may be required"));
    }

    #[test]
    fn categories_follow_the_taxonomy() {
        let key = ContentKey::new();
        assert_eq!(
            ContentError::from(DomainError::validation("title cannot be empty")).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            ContentError::IssueTaken {
                issue: issue(3),
                owner: key
            }
            .category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            ContentError::Record(Fault::transient(FaultKind::Timeout, "slow")).category(),
            ErrorCategory::TransientIo
        );
        assert_eq!(
            ContentError::RecordDeleteFailed {
                key,
                source: Fault::internal("boom")
            }
            .category(),
            ErrorCategory::Reconciliation
        );
        assert_eq!(
            ContentError::Storage(StorageError::PartialBatch(PartialBatchError {
                succeeded: 1,
                failed: 1,
                total: 2,
                details: vec!["#1: not found".to_string()],
            }))
            .category(),
            ErrorCategory::PartialBatch
        );
    }

    #[test]
    fn pre_check_and_constraint_conflicts_read_differently() {
        let owner = ContentKey::new();
        let pre = ContentError::IssueTaken { issue: issue(7), owner };
        let authoritative = ContentError::IssueConflict {
            issue: issue(7),
            source: Fault::permanent(FaultKind::UniqueViolation, "duplicate key"),
        };

        assert!(pre.to_string().contains("already used"));
        assert!(authoritative.to_string().contains("claimed concurrently"));
        assert_eq!(pre.fault_kind(), authoritative.fault_kind());
    }
}
