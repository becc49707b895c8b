use crate::key::ArtifactKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the `crate` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: i64,
    pub name: String,
    pub version: String,
    /// SHA-256 published by the origin index, when known.
    pub checksum: Option<String>,
    pub yanked: bool,
    /// Set only once the blob is durably committed to the artifact store.
    pub downloaded: bool,
    /// Local policy block; the coordinator refuses the key outright.
    pub forbidden: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

/// Change to one record carried by an upstream history entry.
///
/// `None` leaves the stored value untouched, so replaying the same delta
/// is idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDelta {
    pub key: ArtifactKey,
    pub checksum: Option<String>,
    pub yanked: Option<bool>,
    pub forbidden: Option<bool>,
}

impl RecordDelta {
    pub fn new(key: ArtifactKey) -> Self {
        Self {
            key,
            checksum: None,
            yanked: None,
            forbidden: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_yanked(mut self, yanked: bool) -> Self {
        self.yanked = Some(yanked);
        self
    }

    pub fn with_forbidden(mut self, forbidden: bool) -> Self {
        self.forbidden = Some(forbidden);
        self
    }
}

/// One upstream index commit and the record changes it introduces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub commit_id: String,
    pub timestamp: DateTime<Utc>,
    pub deltas: Vec<RecordDelta>,
}

/// Result of appending to the update-history ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Applied,
    /// The commit id was already in the ledger; nothing was appended.
    AlreadyApplied,
}

/// Aggregate counts over the `crate` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MetadataStats {
    pub total: i64,
    pub downloaded: i64,
    pub yanked: i64,
    pub forbidden: i64,
}
