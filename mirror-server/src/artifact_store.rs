//! Filesystem cache of artifact bytes.
//!
//! Layout: `<root>/<name>/<name>@<version>`. Blobs are written to a hidden
//! temporary file in the same directory and published with a no-clobber
//! rename, so a reader sees either nothing or a complete blob.

use bytes::Bytes;
use mirror_metadata::ArtifactKey;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

const TEMP_PREFIX: &str = ".";
const TEMP_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed,
    /// A complete blob already occupied the name; the new bytes were dropped.
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.name()).join(key.to_string())
    }

    pub async fn exists(&self, key: &ArtifactKey) -> bool {
        tokio::fs::metadata(self.path_for(key))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Open the stored blob for streaming, or `None` on a miss.
    pub async fn read(&self, key: &ArtifactKey) -> io::Result<Option<tokio::fs::File>> {
        match tokio::fs::File::open(self.path_for(key)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn read_bytes(&self, key: &ArtifactKey) -> io::Result<Bytes> {
        tokio::fs::read(self.path_for(key)).await.map(Bytes::from)
    }

    /// Durably store `bytes` under `key`.
    ///
    /// The name directory is created on first use. An existing blob is
    /// never overwritten. On failure nothing of this write stays visible.
    pub async fn write(&self, key: &ArtifactKey, bytes: Bytes) -> io::Result<WriteOutcome> {
        self.write_with(key, bytes, publish).await
    }

    async fn write_with(
        &self,
        key: &ArtifactKey,
        bytes: Bytes,
        publish: PublishFn,
    ) -> io::Result<WriteOutcome> {
        let path = self.path_for(key);
        let result = tokio::task::spawn_blocking(move || write_atomic(&path, &bytes, publish))
            .await
            .map_err(io::Error::other)?;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(WriteFailure::Unpublished(e)) => Err(e),
            Err(WriteFailure::Published(e)) => {
                // Our blob is visible but may not survive a crash.
                self.delete(key).await;
                Err(e)
            }
        }
    }

    /// Best-effort removal; failures are logged.
    pub async fn delete(&self, key: &ArtifactKey) {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
        }
    }

    /// Every complete blob under the root. Temporary files and anything
    /// not matching the layout are skipped.
    pub async fn scan(&self) -> io::Result<Vec<ArtifactKey>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_root(&root))
            .await
            .map_err(io::Error::other)?
    }
}

/// How a failed write left the final name.
#[derive(Debug)]
enum WriteFailure {
    /// Nothing of ours reached the final name; whatever is there belongs to
    /// another writer.
    Unpublished(io::Error),
    /// Our blob was published but could not be made durable.
    Published(io::Error),
}

type PublishFn = fn(NamedTempFile, &Path) -> Result<WriteOutcome, WriteFailure>;

fn write_atomic(path: &Path, bytes: &[u8], publish: PublishFn) -> Result<WriteOutcome, WriteFailure> {
    if path.is_file() {
        return Ok(WriteOutcome::AlreadyPresent);
    }
    stage(path, bytes)
        .map_err(WriteFailure::Unpublished)
        .and_then(|temp| publish(temp, path))
}

/// Write `bytes` to a synced temporary file beside `path`. The temporary
/// file is removed when dropped unpublished.
fn stage(path: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("artifact path has no parent"))?;
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    Ok(temp)
}

fn publish(temp: NamedTempFile, path: &Path) -> Result<WriteOutcome, WriteFailure> {
    match temp.persist_noclobber(path) {
        Ok(_) => {
            sync_parent(path).map_err(WriteFailure::Published)?;
            Ok(WriteOutcome::Committed)
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            Ok(WriteOutcome::AlreadyPresent)
        }
        Err(e) => Err(WriteFailure::Unpublished(e.error)),
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) => std::fs::File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn scan_root(root: &Path) -> io::Result<Vec<ArtifactKey>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    for entry in WalkDir::new(root).min_depth(2).max_depth(2) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if file_name.starts_with(TEMP_PREFIX) {
            continue;
        }
        let dir_name = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str());

        match (file_name.split_once('@'), dir_name) {
            (Some((name, version)), Some(dir)) if name == dir && !version.is_empty() => {
                keys.push(ArtifactKey::new(name, version));
            }
            _ => debug!(path = %entry.path().display(), "Skipping unrecognised file in cache"),
        }
    }
    keys.sort();
    Ok(keys)
}
