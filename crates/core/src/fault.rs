//! Boundary fault model.
//!
//! Every call that crosses into the blob store or the record store returns a
//! [`Fault`] on failure. A fault carries three things:
//!
//! - a machine-readable [`FaultKind`]
//! - a technical message (for logs, never for end users)
//! - a transient flag, which feeds the default retry predicate
//!
//! Retry and batch machinery only ever inspect faults through [`Classify`], so
//! higher-level error types that wrap a fault can stay retryable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable classification of a remote failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Connection reset, DNS failure, broken pipe.
    Network,
    /// The remote call did not answer in time.
    Timeout,
    /// The remote side throttled the caller.
    RateLimited,
    /// The remote side is temporarily unable to serve (5xx, pool exhausted).
    Unavailable,
    /// The addressed object or row does not exist.
    NotFound,
    /// A uniqueness constraint rejected the write.
    UniqueViolation,
    /// A conditional write did not match.
    Conflict,
    /// Credentials were rejected.
    PermissionDenied,
    /// The request itself was malformed (too many keys, bad path).
    InvalidRequest,
    /// Anything else.
    Internal,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Network => "network",
            FaultKind::Timeout => "timeout",
            FaultKind::RateLimited => "rate_limited",
            FaultKind::Unavailable => "unavailable",
            FaultKind::NotFound => "not_found",
            FaultKind::UniqueViolation => "unique_violation",
            FaultKind::Conflict => "conflict",
            FaultKind::PermissionDenied => "permission_denied",
            FaultKind::InvalidRequest => "invalid_request",
            FaultKind::Internal => "internal",
        }
    }

    /// Whether faults of this kind are transient unless the adapter says otherwise.
    pub fn is_transient_by_default(&self) -> bool {
        matches!(
            self,
            FaultKind::Network | FaultKind::Timeout | FaultKind::RateLimited | FaultKind::Unavailable
        )
    }
}

impl core::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure reported by a remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub transient: bool,
}

impl Fault {
    /// Create a fault whose transient flag follows the kind's default.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: kind.is_transient_by_default(),
        }
    }

    /// Create a fault that is always considered transient.
    pub fn transient(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: true,
        }
    }

    /// Create a fault that is never considered transient.
    pub fn permanent(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::permanent(FaultKind::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::permanent(FaultKind::NotFound, message)
    }
}

/// Read-only view of a failure used by retry and batch policies.
pub trait Classify {
    fn fault_kind(&self) -> FaultKind;

    fn is_transient(&self) -> bool;
}

impl Classify for Fault {
    fn fault_kind(&self) -> FaultKind {
        self.kind
    }

    fn is_transient(&self) -> bool {
        self.transient
    }
}
