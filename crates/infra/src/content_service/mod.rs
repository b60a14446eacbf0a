//! Content service: orchestration of record and file changes.
//!
//! Every operation that touches both the blob store and the record store is
//! either a two-step transaction (`upload_with_files`, `rename`) or ordered so
//! that the recoverable failure comes first (`delete`, storage before record).
//!
//! | Operation | Steps | Conflict checks |
//! |-----------|-------|-----------------|
//! | `create` | insert | issue pre-check, unique constraint |
//! | `upload_with_files` | `upload-files` → `create-record` | via `create` |
//! | `rename` | `move-files` → `update-record` | version pre-check, issue pre-check, version-matched write |
//! | `delete` | list + delete files, then delete record | none |

mod error;

pub use error::{ContentError, ErrorCategory};

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use forgepress_content::{
    ContentFile, ContentItem, ContentPatch, ContentPaths, FileMove, NewContentItem, validate_title,
};
use forgepress_core::{ContentKey, ExpectedVersion, Fault, FaultKind, IssueNumber};

use crate::batch::PartialBatchError;
use crate::blob_store::BlobStore;
use crate::config::ContentServiceConfig;
use crate::record_store::RecordStore;
use crate::reporting::{Incident, IncidentKind, IncidentReporter, NoopReporter};
use crate::saga::{
    RollbackError, RollbackFailure, RollbackOutcome, Step, StepFailure, TransactionCoordinator,
    TransactionError,
};
use crate::storage::{StorageError, StorageGateway};

/// Keeps content records and their files consistent.
pub struct ContentService<B, R> {
    storage: StorageGateway<B>,
    records: R,
    paths: ContentPaths,
    reporter: Arc<dyn IncidentReporter>,
}

impl<B, R> core::fmt::Debug for ContentService<B, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContentService")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl<B, R> ContentService<B, R>
where
    B: BlobStore,
    R: RecordStore,
{
    pub fn new(storage: StorageGateway<B>, records: R) -> Self {
        Self {
            storage,
            records,
            paths: ContentPaths::default(),
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn with_config(mut self, config: &ContentServiceConfig) -> Self {
        self.paths = config.paths();
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn IncidentReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn paths(&self) -> &ContentPaths {
        &self.paths
    }

    pub fn storage(&self) -> &StorageGateway<B> {
        &self.storage
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    pub async fn get(&self, key: ContentKey) -> Result<ContentItem, ContentError> {
        self.records
            .select_by_id(key)
            .await
            .map_err(ContentError::Record)?
            .ok_or(ContentError::NotFound(key))
    }

    /// Insert a new item at version 1.
    #[instrument(skip(self, item), fields(issue = %item.issue))]
    pub async fn create(&self, item: NewContentItem) -> Result<ContentItem, ContentError> {
        item.validate()?;
        self.ensure_issue_free(item.issue, None).await?;

        let issue = item.issue;
        let row = item.into_item(ContentKey::new(), Utc::now());
        let created = self.records.insert(row).await.map_err(|fault| {
            if fault.kind == FaultKind::UniqueViolation {
                ContentError::IssueConflict { issue, source: fault }
            } else {
                ContentError::Record(fault)
            }
        })?;

        info!(key = %created.key, issue = %created.issue, "content item created");
        Ok(created)
    }

    /// Upload `files` into the item's pages folder, then create the record.
    ///
    /// Files are uploaded one after another. The first failing upload stops the
    /// step, which then deletes the files it already wrote; a later failure
    /// deletes them through the step's compensation. Files that were never
    /// written are never deleted.
    #[instrument(skip(self, item, files), fields(issue = %item.issue, files = files.len()))]
    pub async fn upload_with_files(
        &self,
        item: NewContentItem,
        files: Vec<ContentFile>,
    ) -> Result<ContentItem, ContentError> {
        item.validate()?;
        for file in &files {
            file.validate()?;
        }

        let uploaded: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let created: Mutex<Option<ContentItem>> = Mutex::new(None);

        {
            let (item, files, uploaded, created) = (&item, &files, &uploaded, &created);
            let tx: TransactionCoordinator<'_, ContentError> =
                TransactionCoordinator::new("upload-with-files");

            tx.add_step(Step::new(
                "upload-files",
                move || async move {
                    for file in files {
                        let path = self.paths.page_path(item.issue, &file.name);
                        if let Err(err) = self.storage.upload(&path, &file.bytes).await {
                            let written = std::mem::take(&mut *uploaded.lock().await);
                            let cleanup = self.discard_uploads(written).await;
                            return Err(after_cleanup(err.into(), cleanup));
                        }
                        uploaded.lock().await.push(path);
                    }
                    Ok(())
                },
                move || async move {
                    let written = std::mem::take(&mut *uploaded.lock().await);
                    self.discard_uploads(written).await
                },
            ))?;

            tx.add_step(Step::without_compensation("create-record", move || async move {
                let row = self.create(item.clone()).await?;
                *created.lock().await = Some(row);
                Ok(())
            }))?;

            tx.execute()
                .await
                .map_err(|err| self.transaction_failed(err, json!({ "issue": item.issue.get() })))?;
        }

        created
            .into_inner()
            .ok_or_else(|| ContentError::Record(Fault::internal("create-record step produced no row")))
    }

    /// Move an item to `new_issue` (and optionally retitle it) under optimistic concurrency.
    ///
    /// When neither the issue nor the title changes, the stored row is returned
    /// as-is: no write happens and the version stays the same.
    #[instrument(skip(self, new_title), fields(key = %key, new_issue = %new_issue))]
    pub async fn rename(
        &self,
        key: ContentKey,
        new_issue: IssueNumber,
        expected_version: u64,
        new_title: Option<String>,
    ) -> Result<ContentItem, ContentError> {
        if let Some(title) = &new_title {
            validate_title(title)?;
        }

        let current = self.get(key).await?;
        if !ExpectedVersion(expected_version).matches_aggregate(&current) {
            return Err(ContentError::VersionConflict {
                key,
                expected: expected_version,
                actual: Some(current.version),
            });
        }

        let issue_changes = new_issue != current.issue;
        if issue_changes {
            self.ensure_issue_free(new_issue, Some(key)).await?;
        }

        let patch = ContentPatch {
            issue: issue_changes.then_some(new_issue),
            title: new_title
                .map(|t| t.trim().to_string())
                .filter(|t| *t != current.title),
        };
        if patch.is_empty() {
            debug!("nothing to change");
            return Ok(current);
        }

        let realized: Mutex<Vec<FileMove>> = Mutex::new(Vec::new());
        let updated: Mutex<Option<ContentItem>> = Mutex::new(None);

        {
            let (current, patch, realized, updated) = (&current, &patch, &realized, &updated);
            let tx: TransactionCoordinator<'_, ContentError> = TransactionCoordinator::new("rename");

            tx.add_step(Step::new(
                "move-files",
                move || async move {
                    if !issue_changes {
                        return Ok(());
                    }
                    let listed = self
                        .storage
                        .list_recursive(&self.paths.pages_dir(current.issue))
                        .await?;
                    let moves = self.paths.plan_page_moves(&listed, current.issue, new_issue);
                    debug!(count = moves.len(), "moving files");

                    let outcome = self.storage.move_many_settled(moves).await;
                    if outcome.is_complete() {
                        realized.lock().await.extend(outcome.successes);
                        return Ok(());
                    }

                    let failure = StorageError::PartialBatch(PartialBatchError::from_outcome(&outcome));
                    warn!(
                        moved = outcome.successes.len(),
                        failed = outcome.failures.len(),
                        "move incomplete, moving realized pairs back"
                    );
                    let cleanup = self.move_back(outcome.successes).await;
                    Err(after_cleanup(failure.into(), cleanup))
                },
                move || async move {
                    let moved = std::mem::take(&mut *realized.lock().await);
                    self.move_back(moved).await
                },
            ))?;

            tx.add_step(Step::without_compensation("update-record", move || async move {
                let row = self
                    .records
                    .update_where(key, expected_version, patch)
                    .await
                    .map_err(|fault| {
                        if fault.kind == FaultKind::UniqueViolation {
                            ContentError::IssueConflict {
                                issue: new_issue,
                                source: fault,
                            }
                        } else {
                            ContentError::Record(fault)
                        }
                    })?
                    .ok_or(ContentError::VersionConflict {
                        key,
                        expected: expected_version,
                        actual: None,
                    })?;
                *updated.lock().await = Some(row);
                Ok(())
            }))?;

            tx.execute().await.map_err(|err| {
                self.transaction_failed(
                    err,
                    json!({
                        "key": key.to_string(),
                        "from_issue": current.issue.get(),
                        "to_issue": new_issue.get(),
                    }),
                )
            })?;
        }

        let renamed = updated
            .into_inner()
            .ok_or_else(|| ContentError::Record(Fault::internal("update-record step produced no row")))?;
        info!(version = renamed.version, "content item renamed");
        Ok(renamed)
    }

    /// Delete every file of the item, then its record.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: ContentKey) -> Result<(), ContentError> {
        let current = self.get(key).await?;

        let files = self
            .storage
            .list_recursive(&self.paths.item_root(current.issue))
            .await?;
        let removed = self.storage.delete_many(files).await?;

        if let Err(fault) = self.records.delete_by_id(key).await {
            let err = ContentError::RecordDeleteFailed { key, source: fault };
            self.reporter.report(&Incident::new(
                IncidentKind::OrphanedRecord,
                err.to_string(),
                json!({
                    "key": key.to_string(),
                    "issue": current.issue.get(),
                    "files_removed": removed,
                }),
            ));
            return Err(err);
        }

        info!(issue = %current.issue, files = removed, "content item deleted");
        Ok(())
    }

    /// Delete files an interrupted upload already wrote.
    async fn discard_uploads(&self, written: Vec<String>) -> Result<(), ContentError> {
        if !written.is_empty() {
            debug!(count = written.len(), "deleting uploaded files");
            self.storage.delete_many(written).await?;
        }
        Ok(())
    }

    /// Reverse every realized move.
    async fn move_back(&self, moved: Vec<FileMove>) -> Result<(), ContentError> {
        let back: Vec<FileMove> = moved.iter().map(FileMove::reversed).collect();
        if !back.is_empty() {
            debug!(count = back.len(), "moving files back");
            self.storage.move_many(back).await?;
        }
        Ok(())
    }

    /// Pre-check that no other item uses `issue`. Best effort: the insert or update decides.
    async fn ensure_issue_free(
        &self,
        issue: IssueNumber,
        except: Option<ContentKey>,
    ) -> Result<(), ContentError> {
        match self
            .records
            .select_by_issue(issue)
            .await
            .map_err(ContentError::Record)?
        {
            Some(owner) if Some(owner.key) != except => Err(ContentError::IssueTaken {
                issue,
                owner: owner.key,
            }),
            _ => Ok(()),
        }
    }

    fn transaction_failed(
        &self,
        err: TransactionError<ContentError>,
        context: serde_json::Value,
    ) -> ContentError {
        let err = fold_step_cleanup(err);
        if err.requires_manual_cleanup() {
            let mut context = context;
            context["failed_step"] = json!(err.failed_step());
            self.reporter.report(&Incident::new(
                IncidentKind::PartialRollback,
                err.to_string(),
                context,
            ));
        } else {
            warn!(step = err.failed_step(), error = %err, "transaction rolled back");
        }
        err.into()
    }
}

/// The step's own error, or both errors when undoing its partial work failed too.
fn after_cleanup(failure: ContentError, cleanup: Result<(), ContentError>) -> ContentError {
    match cleanup {
        Ok(()) => failure,
        Err(cleanup) => {
            error!(error = %failure, cleanup = %cleanup, "step could not undo its partial work");
            ContentError::CleanupFailed {
                failure: Box::new(failure),
                cleanup: Box::new(cleanup),
            }
        }
    }
}

/// A step that could not undo its own partial work counts as a failed
/// compensation of that step, ahead of the compensations of earlier steps.
fn fold_step_cleanup(err: TransactionError<ContentError>) -> TransactionError<ContentError> {
    let failure = match err {
        TransactionError::StepFailed(failure) => failure,
        other => return other,
    };
    let StepFailure {
        step,
        error,
        rollback,
    } = *failure;

    let (error, rollback) = match error {
        ContentError::CleanupFailed { failure, cleanup } => {
            let own = RollbackFailure {
                step: step.clone(),
                error: RollbackError::Failed(*cleanup),
            };
            let failures = match rollback {
                RollbackOutcome::Complete => vec![own],
                RollbackOutcome::Partial(mut earlier) => {
                    earlier.insert(0, own);
                    earlier
                }
            };
            (*failure, RollbackOutcome::Partial(failures))
        }
        other => (other, rollback),
    };

    TransactionError::StepFailed(Box::new(StepFailure {
        step,
        error,
        rollback,
    }))
}
