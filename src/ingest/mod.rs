//! Input ingestion.
//!
//! - `enumerate`: read-only scan of the input folder, split by extension
//! - `archive`: idempotent copy of accepted originals into the raw archive
//!
//! The archive is append-only across runs. An existing file with the same
//! name is reused as-is, without comparing content.

pub mod archive;
pub mod enumerate;

pub use archive::{ArchiveOutcome, ContentStore, FileCopier, MetadataPreservingCopier};
pub use enumerate::{list_images, ImageEntry, SUPPORTED_EXTENSIONS};
