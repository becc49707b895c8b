use crate::error::Result;
use crate::key::ArtifactKey;
use crate::record::{ArtifactRecord, HistoryEntry, HistoryStatus, MetadataStats, RecordDelta};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteExecutor, SqlitePool, Transaction};
use std::path::Path;
use tracing::{debug, instrument};

/// Durable table of artifact records plus the applied-commit ledger.
///
/// Cheap to clone; every clone shares one connection pool. Uniqueness of
/// `(name, version)` and of `commit_id` is enforced by unique indexes, and
/// every write is a single insert-or-update statement, so concurrent callers
/// for the same key never create a second row.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or initialise on first run) the database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = crate::db::open_pool(db_path).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn get_record(&self, key: &ArtifactKey) -> Result<Option<ArtifactRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT id, name, version, checksum, yanked, downloaded, forbidden, last_update
             FROM crate WHERE name = ? AND version = ?",
        )
        .bind(key.name())
        .bind(key.version())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// Create the record if absent, otherwise update the flags the delta carries.
    ///
    /// Never touches `downloaded`.
    pub async fn upsert_record(&self, delta: &RecordDelta) -> Result<()> {
        upsert_with(&self.pool, delta, Utc::now()).await
    }

    /// Set `downloaded` and refresh `last_update`, creating the row if the
    /// key was fetched before the index ever mentioned it.
    #[instrument(skip(self), fields(artifact = %key))]
    pub async fn mark_downloaded(&self, key: &ArtifactKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO crate (name, version, downloaded, last_update) VALUES (?, ?, 1, ?)
             ON CONFLICT(name, version) DO UPDATE SET
                 downloaded = 1,
                 last_update = excluded.last_update",
        )
        .bind(key.name())
        .bind(key.version())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!("Marked artifact as downloaded");
        Ok(())
    }

    /// Append a commit to the ledger; a duplicate id is reported, not an error.
    pub async fn record_history_entry(
        &self,
        commit_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<HistoryStatus> {
        record_with(&self.pool, commit_id, timestamp).await
    }

    /// Most recently applied commit, the resume point for index syncing.
    pub async fn last_applied_commit(&self) -> Result<Option<String>> {
        let commit_id = sqlx::query_scalar::<_, String>(
            "SELECT commit_id FROM update_history ORDER BY rowid DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(commit_id)
    }

    /// Apply every delta of `entry` and append its commit in one transaction.
    ///
    /// Either the whole entry lands, including its ledger row, or nothing
    /// does and the next sync retries it.
    #[instrument(skip(self, entry), fields(commit_id = %entry.commit_id, deltas = entry.deltas.len()))]
    pub async fn apply_history_entry(&self, entry: &HistoryEntry) -> Result<HistoryStatus> {
        let mut tx: Transaction<'_, Sqlite> = self.pool.begin().await?;
        let now = Utc::now();

        for delta in &entry.deltas {
            upsert_with(&mut *tx, delta, now).await?;
        }
        let status = record_with(&mut *tx, &entry.commit_id, entry.timestamp).await?;

        tx.commit().await?;
        Ok(status)
    }

    /// Keys that are neither downloaded nor forbidden, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<ArtifactKey>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT name, version FROM crate WHERE downloaded = 0 AND forbidden = 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, version)| ArtifactKey::new(name, version))
            .collect())
    }

    pub async fn stats(&self) -> Result<MetadataStats> {
        let stats = sqlx::query_as::<_, MetadataStats>(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(downloaded), 0) AS downloaded,
                    COALESCE(SUM(yanked), 0) AS yanked,
                    COALESCE(SUM(forbidden), 0) AS forbidden
             FROM crate",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }
}

async fn upsert_with<'e, E>(executor: E, delta: &RecordDelta, now: DateTime<Utc>) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let now = now.timestamp();

    sqlx::query(
        "INSERT INTO crate (name, version, checksum, yanked, forbidden, last_update)
         VALUES (?, ?, ?, COALESCE(?, 0), COALESCE(?, 0), ?)
         ON CONFLICT(name, version) DO UPDATE SET
             checksum = COALESCE(?, checksum),
             yanked = COALESCE(?, yanked),
             forbidden = COALESCE(?, forbidden),
             last_update = ?",
    )
    .bind(delta.key.name())
    .bind(delta.key.version())
    .bind(delta.checksum.as_deref())
    .bind(delta.yanked)
    .bind(delta.forbidden)
    .bind(now)
    .bind(delta.checksum.as_deref())
    .bind(delta.yanked)
    .bind(delta.forbidden)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

async fn record_with<'e, E>(
    executor: E,
    commit_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<HistoryStatus>
where
    E: SqliteExecutor<'e>,
{
    let result =
        sqlx::query("INSERT OR IGNORE INTO update_history (commit_id, timestamp) VALUES (?, ?)")
            .bind(commit_id)
            .bind(timestamp.timestamp())
            .execute(executor)
            .await?;

    if result.rows_affected() == 0 {
        debug!(commit_id = %commit_id, "Commit already applied");
        Ok(HistoryStatus::AlreadyApplied)
    } else {
        Ok(HistoryStatus::Applied)
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    name: String,
    version: String,
    checksum: Option<String>,
    yanked: bool,
    downloaded: bool,
    forbidden: bool,
    last_update: Option<i64>,
}

impl From<RecordRow> for ArtifactRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            version: row.version,
            checksum: row.checksum,
            yanked: row.yanked,
            downloaded: row.downloaded,
            forbidden: row.forbidden,
            last_update: row.last_update.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        }
    }
}
