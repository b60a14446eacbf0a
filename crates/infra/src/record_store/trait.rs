use std::sync::Arc;

use async_trait::async_trait;

use forgepress_content::{ContentItem, ContentPatch};
use forgepress_core::{ContentKey, Fault, IssueNumber};

/// Row-oriented persistence for content items.
///
/// ## Optimistic Concurrency
///
/// `update_where` is the only mutation of an existing row. It matches on
/// `(key, version)` and bumps the version by exactly one in the same write.
/// A stale `expected_version` therefore matches zero rows and returns
/// `Ok(None)`; callers turn that into a conflict.
///
/// ## Uniqueness
///
/// The issue number is unique across rows. `insert` and `update_where` report
/// a clash as a [`Fault`] of kind `unique_violation`, which is the
/// authoritative answer even when a caller pre-checked with `select_by_issue`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select_by_id(&self, key: ContentKey) -> Result<Option<ContentItem>, Fault>;

    async fn select_by_issue(&self, issue: IssueNumber) -> Result<Option<ContentItem>, Fault>;

    /// Insert a new row and return it as stored.
    async fn insert(&self, item: ContentItem) -> Result<ContentItem, Fault>;

    /// Apply `patch` if and only if the row is still at `expected_version`.
    async fn update_where(
        &self,
        key: ContentKey,
        expected_version: u64,
        patch: &ContentPatch,
    ) -> Result<Option<ContentItem>, Fault>;

    /// Delete a row. Deleting an absent row is not an error.
    async fn delete_by_id(&self, key: ContentKey) -> Result<(), Fault>;
}

#[async_trait]
impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    async fn select_by_id(&self, key: ContentKey) -> Result<Option<ContentItem>, Fault> {
        (**self).select_by_id(key).await
    }

    async fn select_by_issue(&self, issue: IssueNumber) -> Result<Option<ContentItem>, Fault> {
        (**self).select_by_issue(issue).await
    }

    async fn insert(&self, item: ContentItem) -> Result<ContentItem, Fault> {
        (**self).insert(item).await
    }

    async fn update_where(
        &self,
        key: ContentKey,
        expected_version: u64,
        patch: &ContentPatch,
    ) -> Result<Option<ContentItem>, Fault> {
        (**self).update_where(key, expected_version, patch).await
    }

    async fn delete_by_id(&self, key: ContentKey) -> Result<(), Fault> {
        (**self).delete_by_id(key).await
    }
}
