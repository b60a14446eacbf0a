//! Content domain module.
//!
//! This crate contains the rules for versioned content items and the layout of
//! their files in the blob store, implemented purely as deterministic domain
//! logic (no IO, no HTTP, no storage).

pub mod item;
pub mod paths;

pub use item::{validate_title, ContentFile, ContentItem, ContentPatch, NewContentItem, MAX_TITLE_LEN};
pub use paths::{rebase, ContentPaths, FileMove, DEFAULT_ROOT};
