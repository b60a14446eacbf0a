use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use forgepress_core::Fault;

/// One entry returned by a listing.
///
/// `name` is relative to the listed prefix. Folder placeholders are reported
/// with `is_leaf == false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEntry {
    pub name: String,
    pub is_leaf: bool,
}

impl BlobEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_leaf: true,
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_leaf: false,
        }
    }
}

/// Ordering requested from a listing.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    NameAsc,
    NameDesc,
}

/// Path-addressed object store.
///
/// The `BlobStore` is the **opaque remote** holding content files. Paths are
/// plain strings (`issues/12/pages/001.png`); there is no real folder
/// hierarchy, only shared prefixes.
///
/// ## Failure Model
///
/// Every operation returns a [`Fault`] on failure. Adapters classify what they
/// see (timeouts and 5xx are transient, missing objects are `not_found`, ...)
/// and never retry on their own: retry, chunking and fan-out belong to
/// `StorageGateway`.
///
/// ## Implementation Requirements
///
/// Implementations must:
/// - treat `remove` of an absent path as success (deletes are idempotent)
/// - reject `move_object` when the source is missing
/// - answer `list` with every object below the prefix in one call, capped at `limit`
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path`. With `overwrite == false` an existing object is a conflict.
    async fn upload(&self, path: &str, bytes: &[u8], overwrite: bool) -> Result<(), Fault>;

    /// Remove every listed path in one call.
    async fn remove(&self, paths: &[String]) -> Result<(), Fault>;

    /// List everything stored below `prefix`, folder placeholders included.
    async fn list(&self, prefix: &str, limit: usize, sort_by: SortBy) -> Result<Vec<BlobEntry>, Fault>;

    /// Server-side move. Stores without native moves answer `invalid_request`.
    async fn move_object(&self, from: &str, to: &str) -> Result<(), Fault>;

    /// Server-side copy; the source stays in place.
    async fn copy_object(&self, from: &str, to: &str) -> Result<(), Fault>;
}

#[async_trait]
impl<S> BlobStore for Arc<S>
where
    S: BlobStore + ?Sized,
{
    async fn upload(&self, path: &str, bytes: &[u8], overwrite: bool) -> Result<(), Fault> {
        (**self).upload(path, bytes, overwrite).await
    }

    async fn remove(&self, paths: &[String]) -> Result<(), Fault> {
        (**self).remove(paths).await
    }

    async fn list(&self, prefix: &str, limit: usize, sort_by: SortBy) -> Result<Vec<BlobEntry>, Fault> {
        (**self).list(prefix, limit, sort_by).await
    }

    async fn move_object(&self, from: &str, to: &str) -> Result<(), Fault> {
        (**self).move_object(from, to).await
    }

    async fn copy_object(&self, from: &str, to: &str) -> Result<(), Fault> {
        (**self).copy_object(from, to).await
    }
}
