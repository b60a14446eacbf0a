//! Blob-store layout of a content item's files.
//!
//! ```text
//! {root}/{issue}/pages/{file name}
//! ```
//!
//! Everything an item owns lives under `{root}/{issue}`, so deleting the item
//! means deleting that prefix and renaming the issue means moving its pages.

use serde::{Deserialize, Serialize};

use forgepress_core::IssueNumber;

/// Default top-level folder for content files.
pub const DEFAULT_ROOT: &str = "issues";

const PAGES_DIR: &str = "pages";

/// Derives file paths for content items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPaths {
    root: String,
}

impl Default for ContentPaths {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl ContentPaths {
    pub fn new(root: impl Into<String>) -> Self {
        let root: String = root.into();
        Self {
            root: root.trim_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Folder holding everything that belongs to `issue`.
    pub fn item_root(&self, issue: IssueNumber) -> String {
        format!("{}/{}", self.root, issue)
    }

    pub fn pages_dir(&self, issue: IssueNumber) -> String {
        format!("{}/{}/{}", self.root, issue, PAGES_DIR)
    }

    pub fn page_path(&self, issue: IssueNumber, name: &str) -> String {
        format!("{}/{}", self.pages_dir(issue), name)
    }

    /// Pair every page path of `from` with its location under `to`.
    ///
    /// Paths outside `from`'s pages folder are not part of a rename and are skipped.
    pub fn plan_page_moves(
        &self,
        paths: &[String],
        from: IssueNumber,
        to: IssueNumber,
    ) -> Vec<FileMove> {
        let old_dir = self.pages_dir(from);
        let new_dir = self.pages_dir(to);
        paths
            .iter()
            .filter_map(|path| rebase(path, &old_dir, &new_dir))
            .collect()
    }
}

/// Move `path` from below `old_dir` to below `new_dir`.
pub fn rebase(path: &str, old_dir: &str, new_dir: &str) -> Option<FileMove> {
    let rest = path.strip_prefix(old_dir)?.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    Some(FileMove::new(path, format!("{new_dir}/{rest}")))
}

/// One source → destination pair of a move.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMove {
    pub from: String,
    pub to: String,
}

impl FileMove {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The move that undoes this one.
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

impl core::fmt::Display for FileMove {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
