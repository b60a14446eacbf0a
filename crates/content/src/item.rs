use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgepress_core::{AggregateRoot, ContentKey, DomainError, DomainResult, IssueNumber};

/// Longest title accepted, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Aggregate root: a versioned content item owned by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub key: ContentKey,
    pub issue: IssueNumber,
    pub title: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRoot for ContentItem {
    type Id = ContentKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl ContentItem {
    /// Apply a patch as one mutation: fields change and the version grows by exactly 1.
    pub fn apply_patch(&mut self, patch: &ContentPatch, now: DateTime<Utc>) {
        if let Some(issue) = patch.issue {
            self.issue = issue;
        }
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        self.version += 1;
        self.updated_at = now;
    }
}

/// Input for creating a content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContentItem {
    pub issue: IssueNumber,
    pub title: String,
}

impl NewContentItem {
    pub fn new(issue: IssueNumber, title: impl Into<String>) -> Self {
        Self {
            issue,
            title: title.into(),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        validate_title(&self.title)
    }

    /// Materialize the item at version 1.
    pub fn into_item(self, key: ContentKey, now: DateTime<Utc>) -> ContentItem {
        ContentItem {
            key,
            issue: self.issue,
            title: self.title.trim().to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by a version-checked write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPatch {
    pub issue: Option<IssueNumber>,
    pub title: Option<String>,
}

impl ContentPatch {
    pub fn is_empty(&self) -> bool {
        self.issue.is_none() && self.title.is_none()
    }
}

/// A file attached to a content item (one page of the issue).
#[derive(Clone, PartialEq, Eq)]
pub struct ContentFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ContentFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// File names become the last path segment, so they must not escape the folder.
    pub fn validate(&self) -> DomainResult<()> {
        let name = self.name.as_str();
        if name.trim().is_empty() {
            return Err(DomainError::validation("file name cannot be empty"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(DomainError::validation(format!(
                "file name '{name}' must not contain path separators"
            )));
        }
        if name == "." || name == ".." {
            return Err(DomainError::validation(format!("file name '{name}' is reserved")));
        }
        Ok(())
    }
}

// Payloads can be megabytes; keep debug output readable.
impl core::fmt::Debug for ContentFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContentFile")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn validate_title(title: &str) -> DomainResult<()> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("title cannot be empty"));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(DomainError::validation(format!(
            "title cannot exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}
