//! `forgepress-core`: foundation building blocks shared by every forgepress crate.
//!
//! This crate contains **pure** primitives (no IO): the domain error model, the
//! boundary fault carried by every remote call, identifiers and optimistic
//! concurrency expectations.

pub mod aggregate;
pub mod error;
pub mod fault;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use fault::{Classify, Fault, FaultKind};
pub use id::{ContentKey, IssueNumber};
