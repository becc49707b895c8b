//! Cache-coherent fetch path.
//!
//! [`FetchCoordinator::get_artifact`] answers from the artifact store when
//! it can and otherwise runs at most one origin fetch per key at a time.
//! Requests arriving while a fetch is outstanding join it and observe the
//! same result. The fetch itself runs in a detached task, so a requester
//! hanging up never cancels the download or the commit to disk.

use crate::artifact_store::{ArtifactStore, WriteOutcome};
use crate::upstream::{Origin, UpstreamError};
use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use mirror_metadata::{ArtifactKey, MetadataStore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Failure outcomes of [`FetchCoordinator::get_artifact`].
///
/// Cloneable so every waiter on a shared fetch receives the same value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(ArtifactKey),

    #[error("{0} is forbidden")]
    Forbidden(ArtifactKey),

    #[error("origin returned {0}")]
    Origin(StatusCode),

    #[error("origin unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Successful outcomes of [`FetchCoordinator::get_artifact`].
#[derive(Debug)]
pub enum ArtifactOutcome {
    /// Served from disk; the file is open for streaming.
    CacheHit(tokio::fs::File),
    /// Fetched from the origin by this request or one it joined. The buffer
    /// is shared with every other waiter.
    Fetched(Bytes),
}

type FetchResult = Result<Bytes, FetchError>;
type InFlight = watch::Receiver<Option<FetchResult>>;

/// Counters from [`FetchCoordinator::prefetch_pending`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    pub fetched: usize,
    pub already_cached: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: ArtifactStore,
    metadata: MetadataStore,
    origin: Arc<dyn Origin>,
    verify_checksums: bool,
    in_flight: Mutex<HashMap<ArtifactKey, InFlight>>,
}

/// Leader-side handle on an in-flight entry. The entry is removed before
/// waiters are woken, whether the leader resolves or unwinds.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: ArtifactKey,
    tx: watch::Sender<Option<FetchResult>>,
    released: bool,
}

impl InFlightGuard {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.in_flight_map().remove(&self.key);
        }
    }

    fn resolve(mut self, result: FetchResult) {
        self.release();
        // Nobody may be listening any more; the commit already happened.
        let _ = self.tx.send(Some(result));
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl FetchCoordinator {
    pub fn new(
        store: ArtifactStore,
        metadata: MetadataStore,
        origin: Arc<dyn Origin>,
        verify_checksums: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                metadata,
                origin,
                verify_checksums,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.inner.store
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.inner.metadata
    }

    /// Number of keys with an outstanding origin fetch.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight_map().len()
    }

    #[instrument(skip(self, key), fields(artifact = %key))]
    pub async fn get_artifact(&self, key: &ArtifactKey) -> Result<ArtifactOutcome, FetchError> {
        let record = self.inner.metadata.get_record(key).await.map_err(storage)?;
        if record.as_ref().is_some_and(|r| r.forbidden) {
            info!("Refusing forbidden artifact");
            return Err(FetchError::Forbidden(key.clone()));
        }

        if let Some(file) = self.inner.store.read(key).await.map_err(storage)? {
            debug!("Cache hit");
            return Ok(ArtifactOutcome::CacheHit(file));
        }

        let checksum = record.and_then(|r| r.checksum);
        let mut in_flight = self.join_or_lead(key, checksum);
        let resolved = in_flight
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FetchError::Storage("fetch task ended without a result".into()))?;

        match resolved.as_ref() {
            Some(result) => result.clone().map(ArtifactOutcome::Fetched),
            None => Err(FetchError::Storage("fetch resolved without a result".into())),
        }
    }

    /// Join the outstanding fetch for `key`, or register one and spawn its
    /// leader task.
    fn join_or_lead(&self, key: &ArtifactKey, checksum: Option<String>) -> InFlight {
        let mut map = self.inner.in_flight_map();
        if let Some(existing) = map.get(key) {
            debug!("Joining in-flight fetch");
            return existing.clone();
        }

        let (tx, rx) = watch::channel(None);
        map.insert(key.clone(), rx.clone());
        drop(map);

        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            tx,
            released: false,
        };
        tokio::spawn(async move {
            let result = guard.inner.fetch_and_commit(&guard.key, checksum).await;
            guard.resolve(result);
        });

        rx
    }

    /// Fetch every record that is neither downloaded nor forbidden, sharing
    /// single-flight with live requests.
    pub async fn prefetch_pending(&self, concurrency: usize) -> Result<PrefetchReport, FetchError> {
        let pending = self.inner.metadata.list_pending().await.map_err(storage)?;
        info!(pending = pending.len(), concurrency, "Prefetching pending artifacts");

        // Each outcome is dropped as soon as it is counted, so open cache
        // files and fetched buffers never outlive the concurrency window.
        let report = stream::iter(pending)
            .map(|key| async move {
                let outcome = self.get_artifact(&key).await;
                (key, outcome)
            })
            .buffer_unordered(concurrency.max(1))
            .fold(PrefetchReport::default(), |mut report, (key, outcome)| async move {
                match outcome {
                    Ok(ArtifactOutcome::Fetched(_)) => report.fetched += 1,
                    Ok(ArtifactOutcome::CacheHit(file)) => {
                        drop(file);
                        report.already_cached += 1;
                        if let Err(e) = self.inner.metadata.mark_downloaded(&key).await {
                            warn!(artifact = %key, error = %e, "Failed to mark cached artifact downloaded");
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(artifact = %key, error = %e, "Prefetch failed");
                    }
                }
                report
            })
            .await;

        info!(
            fetched = report.fetched,
            already_cached = report.already_cached,
            failed = report.failed,
            "Prefetch finished"
        );
        Ok(report)
    }

    /// Mark every blob present in the artifact store as downloaded.
    pub async fn reconcile(&self) -> Result<usize, FetchError> {
        let keys = self.inner.store.scan().await.map_err(storage)?;
        for key in &keys {
            self.inner.metadata.mark_downloaded(key).await.map_err(storage)?;
        }
        info!(artifacts = keys.len(), "Reconciled artifact store with metadata");
        Ok(keys.len())
    }
}

impl Inner {
    fn in_flight_map(&self) -> std::sync::MutexGuard<'_, HashMap<ArtifactKey, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch_and_commit(&self, key: &ArtifactKey, checksum: Option<String>) -> FetchResult {
        // A previous leader may have committed between our miss and our registration.
        if self.store.exists(key).await {
            return self.store.read_bytes(key).await.map_err(storage);
        }

        let bytes = self.origin.fetch(key).await.map_err(|e| match e {
            UpstreamError::NotFound => {
                info!(artifact = %key, "Artifact not found at origin");
                FetchError::NotFound(key.clone())
            }
            UpstreamError::Status(status) => {
                warn!(artifact = %key, status = %status, "Origin returned an error");
                FetchError::Origin(status)
            }
            UpstreamError::Transport(msg) => FetchError::UpstreamUnavailable(msg),
        })?;

        if self.verify_checksums {
            if let Some(expected) = checksum.as_deref() {
                let actual = format!("{:x}", Sha256::digest(&bytes));
                if !actual.eq_ignore_ascii_case(expected) {
                    warn!(
                        artifact = %key,
                        expected = %expected,
                        actual = %actual,
                        "Checksum mismatch; discarding artifact"
                    );
                    return Err(FetchError::Origin(StatusCode::BAD_GATEWAY));
                }
            }
        }

        match self.store.write(key, bytes.clone()).await {
            Ok(WriteOutcome::Committed) => debug!(artifact = %key, "Artifact committed"),
            Ok(WriteOutcome::AlreadyPresent) => {
                debug!(artifact = %key, "Artifact already committed by another writer")
            }
            Err(e) => {
                // The store already removed anything of ours; a blob now at
                // the final name came from another writer and stays.
                error!(artifact = %key, error = %e, "Failed to store artifact");
                return Err(storage(e));
            }
        }

        if let Err(e) = self.metadata.mark_downloaded(key).await {
            warn!(artifact = %key, error = %e, "Failed to mark artifact downloaded");
        }

        Ok(bytes)
    }
}

fn storage(err: impl std::fmt::Display) -> FetchError {
    FetchError::Storage(err.to_string())
}
