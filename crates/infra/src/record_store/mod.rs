//! Record store boundary.
//!
//! Content items are persisted as rows keyed by [`forgepress_core::ContentKey`]
//! with a unique issue number and an integer version. Every mutation goes
//! through a version-conditioned write.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryRecordStore, RecordCall, RecordOp};
pub use postgres::PostgresRecordStore;
pub use r#trait::RecordStore;
