//! Git working copy of the upstream registry index.

use crate::error::{IndexError, Result};
use crate::history::{EntryIter, IndexHistory};
use crate::parse::{is_index_file, parse_index_file, RegistryConfig, CONFIG_FILE};
use chrono::{DateTime, Utc};
use git2::{
    Delta, ObjectType, Oid, Repository, ResetType, Signature, Sort, TreeWalkMode, TreeWalkResult,
};
use mirror_metadata::{HistoryEntry, RecordDelta};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const REMOTE: &str = "origin";
const COMMITTER_NAME: &str = "crates-mirror";
const COMMITTER_EMAIL: &str = "crates-mirror@localhost";

/// [`IndexHistory`] backed by a git clone of the registry index.
pub struct GitIndexHistory {
    upstream_url: String,
    path: PathBuf,
    rewrite: Option<RegistryConfig>,
}

impl GitIndexHistory {
    pub fn new(upstream_url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            path: path.into(),
            rewrite: None,
        }
    }

    /// Rewrite and commit `config.json` after every successful sync so
    /// cargo clients of the mirrored index download through this mirror.
    pub fn with_config_rewrite(mut self, config: RegistryConfig) -> Self {
        self.rewrite = Some(config);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(&self.path).map_err(|_| IndexError::NoLocalClone(self.path.clone()))
    }

    /// Fetch the remote and hard reset the checked-out branch onto it.
    ///
    /// Discards any local config commit, so upstream changes to
    /// `config.json` never conflict with the rewrite.
    fn fetch_and_reset(&self, repo: &Repository) -> Result<Oid> {
        let branch = repo
            .head()?
            .shorthand()
            .map(str::to_string)
            .ok_or_else(|| git2::Error::from_str("HEAD is not a named branch"))?;

        info!(path = %self.path.display(), branch = %branch, "Fetching index updates");
        repo.find_remote(REMOTE)?
            .fetch(&[] as &[&str], None, None)?;

        let remote_head = repo.refname_to_id(&format!("refs/remotes/{REMOTE}/{branch}"))?;
        let target = repo.find_object(remote_head, None)?;
        repo.reset(&target, ResetType::Hard, None)?;
        debug!(head = %remote_head, "Index reset to remote head");

        Ok(remote_head)
    }
}

impl IndexHistory for GitIndexHistory {
    fn has_local_clone(&self) -> bool {
        Repository::open(&self.path).is_ok()
    }

    fn bootstrap(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        warn!(
            url = %self.upstream_url,
            path = %self.path.display(),
            "Cloning upstream index, which may take a while"
        );
        Repository::clone(&self.upstream_url, &self.path)?;
        info!("Index clone finished");
        Ok(())
    }

    fn entries_since(&mut self, since: Option<&str>) -> Result<EntryIter<'_>> {
        let repo = self.open()?;
        let head = self.fetch_and_reset(&repo)?;

        let resume = match since {
            None => None,
            Some(id) => match Oid::from_str(id).and_then(|oid| repo.find_commit(oid)) {
                Ok(commit) => Some(commit.id()),
                Err(e) => {
                    warn!(
                        commit_id = %id,
                        error = %e,
                        "Resume point not in index history; taking a full snapshot"
                    );
                    None
                }
            },
        };

        let Some(resume) = resume else {
            info!(head = %head, "Taking index snapshot");
            return Ok(Box::new(std::iter::once_with(move || snapshot_entry(&repo, head))));
        };

        let mut walk = repo.revwalk()?;
        walk.push(head)?;
        walk.hide(resume)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        let commits = walk.collect::<std::result::Result<Vec<_>, _>>()?;

        info!(count = commits.len(), since = %resume, "New index commits");
        Ok(Box::new(
            commits
                .into_iter()
                .map(move |oid| commit_entry(&repo, oid)),
        ))
    }

    fn after_sync(&mut self) -> Result<()> {
        let Some(config) = &self.rewrite else {
            return Ok(());
        };

        let repo = self.open()?;
        let config_path = self.path.join(CONFIG_FILE);
        let contents = format!("{}\n", serde_json::to_string_pretty(config)?);
        if std::fs::read_to_string(&config_path).ok().as_deref() == Some(contents.as_str()) {
            return Ok(());
        }
        std::fs::write(&config_path, contents)?;

        let mut index = repo.index()?;
        index.add_path(Path::new(CONFIG_FILE))?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let parent = repo.head()?.peel_to_commit()?;
        let signature = Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;
        let commit = repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            "Point index at local mirror",
            &tree,
            &[&parent],
        )?;

        info!(commit = %commit, dl = %config.dl, "Committed mirror registry config");
        Ok(())
    }
}

fn commit_time(repo: &Repository, oid: Oid) -> Result<DateTime<Utc>> {
    let seconds = repo.find_commit(oid)?.time().seconds();
    Ok(DateTime::from_timestamp(seconds, 0).unwrap_or_else(Utc::now))
}

fn blob_text(repo: &Repository, oid: Oid) -> Result<String> {
    let blob = repo.find_blob(oid)?;
    Ok(String::from_utf8_lossy(blob.content()).into_owned())
}

/// Every version line of every index file at `head`, as one entry.
fn snapshot_entry(repo: &Repository, head: Oid) -> Result<HistoryEntry> {
    let tree = repo.find_commit(head)?.tree()?;

    let mut files = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(ObjectType::Blob) {
            if let Some(name) = entry.name() {
                files.push((format!("{root}{name}"), entry.id()));
            }
        }
        TreeWalkResult::Ok
    })?;

    let mut deltas = Vec::new();
    for (path, oid) in files.iter().filter(|(path, _)| is_index_file(path)) {
        deltas.extend(parse_index_file(path, &blob_text(repo, *oid)?, |_| true));
    }

    info!(files = files.len(), versions = deltas.len(), "Index snapshot parsed");
    Ok(HistoryEntry {
        commit_id: head.to_string(),
        timestamp: commit_time(repo, head)?,
        deltas,
    })
}

/// Lines added or changed by `oid` relative to its first parent.
fn commit_entry(repo: &Repository, oid: Oid) -> Result<HistoryEntry> {
    let commit = repo.find_commit(oid)?;
    let tree = commit.tree()?;
    let parent_tree = match commit.parent_count() {
        0 => None,
        _ => Some(commit.parent(0)?.tree()?),
    };
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

    let mut deltas: Vec<RecordDelta> = Vec::new();
    for file in diff.deltas() {
        let path = file
            .new_file()
            .path()
            .or_else(|| file.old_file().path())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_index_file(&path) {
            continue;
        }

        match file.status() {
            Delta::Deleted => {
                info!(path = %path, "Index file deleted upstream; records kept");
            }
            Delta::Added => {
                let text = blob_text(repo, file.new_file().id())?;
                deltas.extend(parse_index_file(&path, &text, |_| true));
            }
            Delta::Modified | Delta::Renamed | Delta::Copied | Delta::Typechange => {
                let old = blob_text(repo, file.old_file().id())?;
                let new = blob_text(repo, file.new_file().id())?;
                let previous: HashSet<&str> = old.lines().collect();
                deltas.extend(parse_index_file(&path, &new, |line| {
                    !previous.contains(line)
                }));
            }
            _ => {}
        }
    }

    debug!(commit = %oid, deltas = deltas.len(), "Index commit parsed");
    Ok(HistoryEntry {
        commit_id: oid.to_string(),
        timestamp: commit_time(repo, oid)?,
        deltas,
    })
}
