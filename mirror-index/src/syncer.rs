use crate::error::{IndexError, Result};
use crate::history::IndexHistory;
use mirror_metadata::{HistoryEntry, HistoryStatus, MetadataStore};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, instrument};

/// Entries buffered between the blocking history reader and the store.
const ENTRY_BUFFER: usize = 4;

/// Counters for one completed sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub applied: usize,
    pub already_applied: usize,
    pub deltas: usize,
    pub last_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another pass held the history; this call did nothing.
    AlreadyRunning,
}

/// Brings the metadata store up to date with upstream index history.
///
/// Each entry is applied in its own transaction together with its ledger
/// row, so an aborted pass resumes at the first unapplied commit.
pub struct IndexSyncer<H> {
    store: MetadataStore,
    history: Arc<Mutex<H>>,
}

impl<H> Clone for IndexSyncer<H> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            history: Arc::clone(&self.history),
        }
    }
}

impl<H: IndexHistory> IndexSyncer<H> {
    pub fn new(store: MetadataStore, history: H) -> Self {
        Self {
            store,
            history: Arc::new(Mutex::new(history)),
        }
    }

    /// Run one pass. Never overlaps itself: a call made while another pass
    /// is running returns [`SyncOutcome::AlreadyRunning`] immediately.
    #[instrument(skip(self))]
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        let Ok(history) = Arc::clone(&self.history).try_lock_owned() else {
            info!("Index sync already running; skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let since = self.store.last_applied_commit().await?;
        info!(since = since.as_deref().unwrap_or("<none>"), "Starting index sync");

        let (tx, mut rx) = mpsc::channel::<Result<HistoryEntry>>(ENTRY_BUFFER);
        let producer = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut history = history;
            if !history.has_local_clone() {
                history.bootstrap()?;
            }
            for entry in history.entries_since(since.as_deref())? {
                let failed = entry.is_err();
                if tx.blocking_send(entry).is_err() || failed {
                    break;
                }
            }
            Ok(history)
        });

        let mut report = SyncReport::default();
        let mut failure: Option<IndexError> = None;
        while let Some(item) = rx.recv().await {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            match self.store.apply_history_entry(&entry).await {
                Ok(HistoryStatus::Applied) => {
                    report.applied += 1;
                    report.deltas += entry.deltas.len();
                    report.last_commit = Some(entry.commit_id);
                }
                Ok(HistoryStatus::AlreadyApplied) => report.already_applied += 1,
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            }
        }
        // Unblocks a producer parked on a full channel.
        drop(rx);

        let produced = producer
            .await
            .map_err(|e| IndexError::Channel(e.to_string()))?;
        if let Some(e) = failure {
            error!(error = %e, applied = report.applied, "Index sync aborted");
            return Err(e);
        }
        let mut history = produced?;

        tokio::task::spawn_blocking(move || history.after_sync())
            .await
            .map_err(|e| IndexError::Channel(e.to_string()))??;

        info!(
            applied = report.applied,
            already_applied = report.already_applied,
            deltas = report.deltas,
            "Index sync finished"
        );
        Ok(SyncOutcome::Completed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::EntryIter;
    use chrono::{TimeZone, Utc};
    use mirror_metadata::test_utils::create_test_store;
    use mirror_metadata::{ArtifactKey, ArtifactRecord, MetadataStats, RecordDelta};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeHistory {
        cloned: bool,
        bootstraps: Arc<AtomicUsize>,
        entries: Vec<HistoryEntry>,
        fail_at: Option<usize>,
    }

    impl FakeHistory {
        fn new(entries: Vec<HistoryEntry>) -> Self {
            Self {
                cloned: true,
                bootstraps: Arc::new(AtomicUsize::new(0)),
                entries,
                fail_at: None,
            }
        }
    }

    impl IndexHistory for FakeHistory {
        fn has_local_clone(&self) -> bool {
            self.cloned
        }

        fn bootstrap(&mut self) -> Result<()> {
            self.bootstraps.fetch_add(1, Ordering::SeqCst);
            self.cloned = true;
            Ok(())
        }

        fn entries_since(&mut self, since: Option<&str>) -> Result<EntryIter<'_>> {
            let start = since
                .and_then(|id| self.entries.iter().position(|e| e.commit_id == id))
                .map_or(0, |idx| idx + 1);
            let fail_at = self.fail_at;
            Ok(Box::new(
                self.entries
                    .clone()
                    .into_iter()
                    .enumerate()
                    .skip(start)
                    .map(move |(idx, entry)| match fail_at {
                        Some(at) if at == idx => Err(IndexError::Channel("boom".into())),
                        _ => Ok(entry),
                    }),
            ))
        }
    }

    fn commit(id: &str, deltas: Vec<RecordDelta>) -> HistoryEntry {
        HistoryEntry {
            commit_id: id.to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            deltas,
        }
    }

    fn history() -> Vec<HistoryEntry> {
        vec![
            commit("c1", vec![RecordDelta::new(ArtifactKey::new("foo", "1.0.0")).with_checksum("aa")]),
            commit("c2", vec![RecordDelta::new(ArtifactKey::new("bar", "0.1.0")).with_checksum("bb")]),
            commit("c3", vec![RecordDelta::new(ArtifactKey::new("foo", "1.0.0")).with_yanked(true)]),
        ]
    }

    #[tokio::test]
    async fn test_sync_applies_history_in_order() {
        let store = create_test_store().await;
        let syncer = IndexSyncer::new(store.clone(), FakeHistory::new(history()));

        let outcome = syncer.sync_once().await.unwrap();
        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected a completed pass");
        };
        assert_eq!(report.applied, 3);
        assert_eq!(report.last_commit.as_deref(), Some("c3"));

        let foo = store
            .get_record(&ArtifactKey::new("foo", "1.0.0"))
            .await
            .unwrap()
            .unwrap();
        assert!(foo.yanked);
        assert_eq!(foo.checksum.as_deref(), Some("aa"));
        assert_eq!(store.last_applied_commit().await.unwrap().as_deref(), Some("c3"));
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let store = create_test_store().await;
        let syncer = IndexSyncer::new(store.clone(), FakeHistory::new(history()));

        syncer.sync_once().await.unwrap();
        let outcome = syncer.sync_once().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Completed(SyncReport::default()));
    }

    #[tokio::test]
    async fn test_failed_entry_is_retried_next_pass() {
        let store = create_test_store().await;
        let mut fake = FakeHistory::new(history());
        fake.fail_at = Some(1);
        let syncer = IndexSyncer::new(store.clone(), fake);

        assert!(syncer.sync_once().await.is_err());
        assert_eq!(store.last_applied_commit().await.unwrap().as_deref(), Some("c1"));
        assert!(store
            .get_record(&ArtifactKey::new("bar", "0.1.0"))
            .await
            .unwrap()
            .is_none());

        syncer.history.lock().await.fail_at = None;
        let SyncOutcome::Completed(report) = syncer.sync_once().await.unwrap() else {
            panic!("expected a completed pass");
        };
        assert_eq!(report.applied, 2);
        assert_eq!(store.last_applied_commit().await.unwrap().as_deref(), Some("c3"));
    }

    /// Everything a sync writes, minus the wall-clock `last_update`.
    async fn snapshot(store: &MetadataStore) -> (Vec<Option<ArtifactRecord>>, MetadataStats, Option<String>) {
        let mut records = Vec::new();
        for (name, version) in [("foo", "1.0.0"), ("bar", "0.1.0")] {
            let record = store
                .get_record(&ArtifactKey::new(name, version))
                .await
                .unwrap()
                .map(|r| ArtifactRecord {
                    last_update: None,
                    ..r
                });
            records.push(record);
        }
        (
            records,
            store.stats().await.unwrap(),
            store.last_applied_commit().await.unwrap(),
        )
    }

    #[tokio::test]
    async fn test_restarted_sync_matches_uninterrupted_run() {
        let temp_dir = TempDir::new().unwrap();

        let whole_path = temp_dir.path().join("whole.db");
        let whole = MetadataStore::open(&whole_path).await.unwrap();
        IndexSyncer::new(whole.clone(), FakeHistory::new(history()))
            .sync_once()
            .await
            .unwrap();
        let expected = snapshot(&whole).await;
        whole.close().await;

        // First process stops after c1.
        let split_path = temp_dir.path().join("split.db");
        {
            let store = MetadataStore::open(&split_path).await.unwrap();
            let mut fake = FakeHistory::new(history());
            fake.fail_at = Some(1);
            let syncer = IndexSyncer::new(store.clone(), fake);
            assert!(syncer.sync_once().await.is_err());
            drop(syncer);
            store.close().await;
        }

        let store = MetadataStore::open(&split_path).await.unwrap();
        assert_eq!(store.last_applied_commit().await.unwrap().as_deref(), Some("c1"));
        let SyncOutcome::Completed(report) = IndexSyncer::new(store.clone(), FakeHistory::new(history()))
            .sync_once()
            .await
            .unwrap()
        else {
            panic!("expected a completed pass");
        };
        assert_eq!(report.applied, 2);
        assert_eq!(report.already_applied, 0);

        assert_eq!(snapshot(&store).await, expected);
        for entry in history() {
            assert_eq!(
                store
                    .record_history_entry(&entry.commit_id, entry.timestamp)
                    .await
                    .unwrap(),
                HistoryStatus::AlreadyApplied,
                "{} missing from the ledger",
                entry.commit_id
            );
        }
        assert_eq!(store.last_applied_commit().await.unwrap().as_deref(), Some("c3"));
        store.close().await;
    }

    #[tokio::test]
    async fn test_missing_clone_bootstraps_once() {
        let store = create_test_store().await;
        let mut fake = FakeHistory::new(history());
        fake.cloned = false;
        let bootstraps = Arc::clone(&fake.bootstraps);
        let syncer = IndexSyncer::new(store, fake);

        syncer.sync_once().await.unwrap();
        syncer.sync_once().await.unwrap();
        assert_eq!(bootstraps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let store = create_test_store().await;
        let syncer = IndexSyncer::new(store.clone(), FakeHistory::new(history()));

        let held = Arc::clone(&syncer.history).try_lock_owned().unwrap();
        assert_eq!(syncer.sync_once().await.unwrap(), SyncOutcome::AlreadyRunning);
        drop(held);

        assert!(store.last_applied_commit().await.unwrap().is_none());
    }
}
