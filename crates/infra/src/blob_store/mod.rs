//! Blob/object store boundary.
//!
//! The store is consumed only through the opaque operations of [`BlobStore`];
//! wire protocols live in adapters. Retries, chunking and batching are the
//! gateway's job (`crate::storage`), never the adapter's.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::{BlobCall, BlobOp, InMemoryBlobStore};
pub use r#trait::{BlobEntry, BlobStore, SortBy};
