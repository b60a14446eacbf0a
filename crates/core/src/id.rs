//! Strongly-typed identifiers used across forgepress.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Stable row key of a content item in the record store.
///
/// Never changes for the lifetime of an item; renames change the
/// [`IssueNumber`], not the key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(Uuid);

impl ContentKey {
    /// Create a new key.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing keys explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContentKey {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for ContentKey {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<ContentKey> for Uuid {
    fn from(value: ContentKey) -> Self {
        value.0
    }
}

impl FromStr for ContentKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("ContentKey: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Public, unique, numeric issue identifier of a content item.
///
/// Determines the storage folder of the item's files, so changing it moves files.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct IssueNumber(u32);

impl IssueNumber {
    pub fn new(value: u32) -> DomainResult<Self> {
        if value == 0 {
            return Err(DomainError::invalid_id("IssueNumber: must be greater than zero"));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for IssueNumber {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IssueNumber> for u32 {
    fn from(value: IssueNumber) -> Self {
        value.0
    }
}

impl core::fmt::Display for IssueNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for IssueNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u32>()
            .map_err(|e| DomainError::invalid_id(format!("IssueNumber: {e}")))?;
        Self::new(value)
    }
}
