use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use forgepress_content::{ContentItem, ContentPatch};
use forgepress_core::{ContentKey, ExpectedVersion, Fault, FaultKind, IssueNumber};

use super::r#trait::RecordStore;
use crate::fault_plan::{FaultPlan, FaultRule};

/// Operation kinds of [`RecordStore`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RecordOp {
    SelectById,
    SelectByIssue,
    Insert,
    Update,
    Delete,
}

/// One recorded call against an [`InMemoryRecordStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordCall {
    SelectById(ContentKey),
    SelectByIssue(IssueNumber),
    Insert(ContentKey),
    Update { key: ContentKey, expected_version: u64 },
    Delete(ContentKey),
}

impl RecordCall {
    pub fn op(&self) -> RecordOp {
        match self {
            RecordCall::SelectById(_) => RecordOp::SelectById,
            RecordCall::SelectByIssue(_) => RecordOp::SelectByIssue,
            RecordCall::Insert(_) => RecordOp::Insert,
            RecordCall::Update { .. } => RecordOp::Update,
            RecordCall::Delete(_) => RecordOp::Delete,
        }
    }
}

/// In-memory record store enforcing issue uniqueness and version-matched updates.
///
/// Intended for tests/dev. Fault rules are matched against the row key.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    rows: RwLock<HashMap<ContentKey, ContentItem>>,
    calls: Mutex<Vec<RecordCall>>,
    faults: FaultPlan<RecordOp>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row as-is, bypassing uniqueness checks and the call log.
    pub fn seed(&self, item: ContentItem) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.key, item);
    }

    pub fn fail_when(&self, rule: FaultRule<RecordOp>) {
        self.faults.push(rule);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn row(&self, key: ContentKey) -> Option<ContentItem> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> Vec<RecordCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn calls_for(&self, op: RecordOp) -> Vec<RecordCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.op() == op)
            .collect()
    }

    fn enter(&self, call: RecordCall, target: &str) -> Result<(), Fault> {
        let op = call.op();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        self.faults.check(op, &[target])
    }

    fn issue_taken(
        rows: &HashMap<ContentKey, ContentItem>,
        issue: IssueNumber,
        except: Option<ContentKey>,
    ) -> bool {
        rows.values()
            .any(|row| row.issue == issue && Some(row.key) != except)
    }

    fn unique_violation(issue: IssueNumber) -> Fault {
        Fault::permanent(
            FaultKind::UniqueViolation,
            format!("duplicate key value violates unique constraint on issue ({issue})"),
        )
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn select_by_id(&self, key: ContentKey) -> Result<Option<ContentItem>, Fault> {
        self.enter(RecordCall::SelectById(key), &key.to_string())?;
        let rows = self
            .rows
            .read()
            .map_err(|_| Fault::internal("record store lock poisoned"))?;
        Ok(rows.get(&key).cloned())
    }

    async fn select_by_issue(&self, issue: IssueNumber) -> Result<Option<ContentItem>, Fault> {
        self.enter(RecordCall::SelectByIssue(issue), &issue.to_string())?;
        let rows = self
            .rows
            .read()
            .map_err(|_| Fault::internal("record store lock poisoned"))?;
        Ok(rows.values().find(|row| row.issue == issue).cloned())
    }

    async fn insert(&self, item: ContentItem) -> Result<ContentItem, Fault> {
        self.enter(RecordCall::Insert(item.key), &item.key.to_string())?;
        let mut rows = self
            .rows
            .write()
            .map_err(|_| Fault::internal("record store lock poisoned"))?;

        if rows.contains_key(&item.key) {
            return Err(Fault::permanent(
                FaultKind::UniqueViolation,
                format!("duplicate key value violates primary key ({})", item.key),
            ));
        }
        if Self::issue_taken(&rows, item.issue, None) {
            return Err(Self::unique_violation(item.issue));
        }
        rows.insert(item.key, item.clone());
        Ok(item)
    }

    async fn update_where(
        &self,
        key: ContentKey,
        expected_version: u64,
        patch: &ContentPatch,
    ) -> Result<Option<ContentItem>, Fault> {
        self.enter(
            RecordCall::Update {
                key,
                expected_version,
            },
            &key.to_string(),
        )?;
        let mut rows = self
            .rows
            .write()
            .map_err(|_| Fault::internal("record store lock poisoned"))?;

        let matched = rows
            .get(&key)
            .is_some_and(|row| ExpectedVersion(expected_version).matches_aggregate(row));
        if !matched {
            return Ok(None);
        }
        if let Some(issue) = patch.issue {
            if Self::issue_taken(&rows, issue, Some(key)) {
                return Err(Self::unique_violation(issue));
            }
        }

        let Some(row) = rows.get_mut(&key) else {
            return Ok(None);
        };
        row.apply_patch(patch, Utc::now());
        Ok(Some(row.clone()))
    }

    async fn delete_by_id(&self, key: ContentKey) -> Result<(), Fault> {
        self.enter(RecordCall::Delete(key), &key.to_string())?;
        let mut rows = self
            .rows
            .write()
            .map_err(|_| Fault::internal("record store lock poisoned"))?;
        rows.remove(&key);
        Ok(())
    }
}
