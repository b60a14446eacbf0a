use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use forgepress_core::{Fault, FaultKind};

use super::r#trait::{BlobEntry, BlobStore, SortBy};
use crate::fault_plan::{FaultPlan, FaultRule};

/// Operation kinds of [`BlobStore`], used to script faults and filter the call log.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlobOp {
    Upload,
    Remove,
    List,
    Move,
    Copy,
}

/// One recorded call against an [`InMemoryBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobCall {
    Upload { path: String, overwrite: bool },
    Remove { paths: Vec<String> },
    List { prefix: String, limit: usize },
    Move { from: String, to: String },
    Copy { from: String, to: String },
}

impl BlobCall {
    pub fn op(&self) -> BlobOp {
        match self {
            BlobCall::Upload { .. } => BlobOp::Upload,
            BlobCall::Remove { .. } => BlobOp::Remove,
            BlobCall::List { .. } => BlobOp::List,
            BlobCall::Move { .. } => BlobOp::Move,
            BlobCall::Copy { .. } => BlobOp::Copy,
        }
    }
}

/// In-memory blob store.
///
/// Intended for tests/dev. Every call is logged (failed ones included) and
/// can be made to fail through [`FaultRule`]s. An optional per-call latency
/// makes concurrency observable under a paused tokio clock.
#[derive(Debug)]
pub struct InMemoryBlobStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    calls: Mutex<Vec<BlobCall>>,
    faults: FaultPlan<BlobOp>,
    native_move: bool,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            faults: FaultPlan::default(),
            native_move: true,
            latency: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a store with no server-side move (`move_object` is rejected).
    pub fn without_native_move(mut self) -> Self {
        self.native_move = false;
        self
    }

    /// Suspend every call for `latency` before it takes effect.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seed an object without logging a call.
    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), bytes.into());
    }

    pub fn fail_when(&self, rule: FaultRule<BlobOp>) {
        self.faults.push(rule);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<BlobCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn calls_for(&self, op: BlobOp) -> Vec<BlobCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.op() == op)
            .collect()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: BlobCall, targets: &[&str]) -> Result<(), Fault> {
        let op = call.op();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);

        if let Some(latency) = self.latency {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        self.faults.check(op, targets)
    }

    fn write_objects(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>, Fault> {
        self.objects
            .write()
            .map_err(|_| Fault::internal("blob store lock poisoned"))
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8], overwrite: bool) -> Result<(), Fault> {
        self.enter(
            BlobCall::Upload {
                path: path.to_string(),
                overwrite,
            },
            &[path],
        )
        .await?;

        let mut objects = self.write_objects()?;
        if !overwrite && objects.contains_key(path) {
            return Err(Fault::permanent(
                FaultKind::Conflict,
                format!("object '{path}' already exists"),
            ));
        }
        objects.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> Result<(), Fault> {
        let targets: Vec<&str> = paths.iter().map(String::as_str).collect();
        self.enter(
            BlobCall::Remove {
                paths: paths.to_vec(),
            },
            &targets,
        )
        .await?;

        let mut objects = self.write_objects()?;
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize, sort_by: SortBy) -> Result<Vec<BlobEntry>, Fault> {
        self.enter(
            BlobCall::List {
                prefix: prefix.to_string(),
                limit,
            },
            &[prefix],
        )
        .await?;

        let folder = prefix.trim_end_matches('/');
        let objects = self
            .objects
            .read()
            .map_err(|_| Fault::internal("blob store lock poisoned"))?;

        let mut folders = BTreeSet::new();
        let mut entries = Vec::new();
        for path in objects.keys() {
            let rest = if folder.is_empty() {
                Some(path.as_str())
            } else {
                path.strip_prefix(folder).and_then(|r| r.strip_prefix('/'))
            };
            let Some(rest) = rest else { continue };

            // Every intermediate folder shows up once as a placeholder.
            let mut end = 0;
            while let Some(pos) = rest[end..].find('/') {
                end += pos;
                folders.insert(rest[..end].to_string());
                end += 1;
            }
            entries.push(BlobEntry::file(rest));
        }
        entries.extend(folders.into_iter().map(BlobEntry::folder));

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        if sort_by == SortBy::NameDesc {
            entries.reverse();
        }
        entries.truncate(limit);
        Ok(entries)
    }

    async fn move_object(&self, from: &str, to: &str) -> Result<(), Fault> {
        self.enter(
            BlobCall::Move {
                from: from.to_string(),
                to: to.to_string(),
            },
            &[from, to],
        )
        .await?;

        if !self.native_move {
            return Err(Fault::permanent(
                FaultKind::InvalidRequest,
                "move is not supported by this store",
            ));
        }

        let mut objects = self.write_objects()?;
        if objects.contains_key(to) {
            return Err(Fault::permanent(
                FaultKind::Conflict,
                format!("destination '{to}' already exists"),
            ));
        }
        let bytes = objects
            .remove(from)
            .ok_or_else(|| Fault::not_found(format!("object '{from}' not found")))?;
        objects.insert(to.to_string(), bytes);
        Ok(())
    }

    async fn copy_object(&self, from: &str, to: &str) -> Result<(), Fault> {
        self.enter(
            BlobCall::Copy {
                from: from.to_string(),
                to: to.to_string(),
            },
            &[from, to],
        )
        .await?;

        let mut objects = self.write_objects()?;
        let bytes = objects
            .get(from)
            .cloned()
            .ok_or_else(|| Fault::not_found(format!("object '{from}' not found")))?;
        objects.insert(to.to_string(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[BlobEntry]) -> Vec<(&str, bool)> {
        entries.iter().map(|e| (e.name.as_str(), e.is_leaf)).collect()
    }

    #[tokio::test]
    async fn list_returns_all_descendants_with_folder_placeholders() {
        let store = InMemoryBlobStore::new();
        store.insert("issues/1/pages/001.png", vec![1]);
        store.insert("issues/1/pages/002.png", vec![2]);
        store.insert("issues/10/pages/001.png", vec![3]);

        let entries = store.list("issues/1", 100, SortBy::NameAsc).await.unwrap();
        assert_eq!(
            names(&entries),
            vec![("pages", false), ("pages/001.png", true), ("pages/002.png", true)]
        );

        let capped = store.list("issues/1/", 1, SortBy::NameDesc).await.unwrap();
        assert_eq!(names(&capped), vec![("pages/002.png", true)]);
    }

    #[tokio::test]
    async fn upload_without_overwrite_conflicts() {
        let store = InMemoryBlobStore::new();
        store.upload("a/1", b"x", false).await.unwrap();

        let err = store.upload("a/1", b"y", false).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::Conflict);

        store.upload("a/1", b"y", true).await.unwrap();
        assert_eq!(store.get("a/1"), Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = InMemoryBlobStore::new();
        store.insert("a/1", vec![1]);

        store.remove(&["a/1".to_string(), "a/2".to_string()]).await.unwrap();
        store.remove(&["a/1".to_string()]).await.unwrap();

        assert!(store.paths().is_empty());
        assert_eq!(store.calls_for(BlobOp::Remove).len(), 2);
    }

    #[tokio::test]
    async fn move_requires_source_and_free_destination() {
        let store = InMemoryBlobStore::new();
        store.insert("a/1", vec![1]);
        store.insert("b/1", vec![9]);

        assert_eq!(store.move_object("a/2", "b/2").await.unwrap_err().kind, FaultKind::NotFound);
        assert_eq!(store.move_object("a/1", "b/1").await.unwrap_err().kind, FaultKind::Conflict);

        store.move_object("a/1", "c/1").await.unwrap();
        assert!(!store.contains("a/1"));
        assert_eq!(store.get("c/1"), Some(vec![1]));
    }

    #[tokio::test]
    async fn store_without_native_move_rejects_moves_but_copies() {
        let store = InMemoryBlobStore::new().without_native_move();
        store.insert("a/1", vec![1]);

        let err = store.move_object("a/1", "b/1").await.unwrap_err();
        assert_eq!(err.kind, FaultKind::InvalidRequest);
        assert!(store.contains("a/1"));

        store.copy_object("a/1", "b/1").await.unwrap();
        assert!(store.contains("a/1"));
        assert!(store.contains("b/1"));
    }

    #[tokio::test]
    async fn scripted_faults_are_logged_as_calls() {
        let store = InMemoryBlobStore::new();
        store.fail_when(
            FaultRule::new(BlobOp::Upload, Fault::transient(FaultKind::Timeout, "slow")).times(1),
        );

        assert!(store.upload("a/1", b"x", true).await.is_err());
        assert!(store.upload("a/1", b"x", true).await.is_ok());
        assert_eq!(store.calls().len(), 2);
    }
}
