//! Incident reporting for states that need a human.
//!
//! The content service never crashes on an inconsistent end state. It reports
//! an [`Incident`] and returns a typed error. Where incidents go (a log line,
//! an error tracker, a ticket queue) is decided by the [`IncidentReporter`]
//! the service was built with.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// A transaction failed and some compensations failed too.
    PartialRollback,
    /// Files were deleted but the record delete failed.
    OrphanedRecord,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::PartialRollback => "partial_rollback",
            IncidentKind::OrphanedRecord => "orphaned_record",
        }
    }
}

/// Something that requires manual reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub kind: IncidentKind,
    pub summary: String,
    /// Operation-specific details (keys, paths, failed steps).
    pub context: JsonValue,
}

impl Incident {
    pub fn new(kind: IncidentKind, summary: impl Into<String>, context: JsonValue) -> Self {
        Self {
            kind,
            summary: summary.into(),
            context,
        }
    }
}

pub trait IncidentReporter: Send + Sync {
    fn report(&self, incident: &Incident);
}

/// Drops every incident.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl IncidentReporter for NoopReporter {
    fn report(&self, _incident: &Incident) {}
}

/// Emits every incident as an `error!` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl IncidentReporter for TracingReporter {
    fn report(&self, incident: &Incident) {
        error!(
            incident = incident.kind.as_str(),
            context = %incident.context,
            "{}",
            incident.summary
        );
    }
}

/// Keeps every incident in memory. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    incidents: Mutex<Vec<Incident>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl IncidentReporter for RecordingReporter {
    fn report(&self, incident: &Incident) {
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(incident.clone());
    }
}
