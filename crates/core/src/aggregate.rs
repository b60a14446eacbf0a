//! Aggregate root trait and optimistic concurrency expectations.

/// Aggregate root marker + minimal interface.
///
/// Anything the record store owns and mutates through version-checked writes
/// implements this.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Starts at 1 on creation and grows by exactly 1 per successful mutation.
    fn version(&self) -> u64;
}

/// The version a writer last read; a write only applies while the stored
/// aggregate is still at that version.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpectedVersion(pub u64);

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }

    /// Whether `aggregate` is still at the expected version.
    pub fn matches_aggregate<A: AggregateRoot>(self, aggregate: &A) -> bool {
        self.matches(aggregate.version())
    }
}
