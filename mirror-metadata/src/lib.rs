//! Durable per-artifact metadata for the crates mirror.
//!
//! One SQLite file holds the `crate` table (one row per name and version,
//! with checksum and the yanked, downloaded and forbidden flags) and the
//! `update_history` ledger of upstream index commits already applied.
//! Both the request path and the index syncer write through
//! [`MetadataStore`].

pub mod db;
pub mod error;
pub mod key;
pub mod record;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{MetadataError, Result};
pub use key::ArtifactKey;
pub use record::{ArtifactRecord, HistoryEntry, HistoryStatus, MetadataStats, RecordDelta};
pub use store::MetadataStore;
