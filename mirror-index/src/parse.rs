//! Parsing of registry index files.
//!
//! Every index file holds one JSON object per line, one line per published
//! version of a single crate. Only the fields the metadata store tracks are
//! read; everything else on the line is ignored.

use crate::error::{IndexError, Result};
use mirror_metadata::{ArtifactKey, RecordDelta};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Name of the registry configuration file at the root of the index.
pub const CONFIG_FILE: &str = "config.json";

#[derive(Deserialize)]
struct IndexLine {
    name: String,
    vers: String,
    #[serde(default)]
    cksum: Option<String>,
    #[serde(default)]
    yanked: bool,
}

/// Registry configuration served from the index root.
///
/// `dl` is the download prefix cargo appends `/{crate}/{version}/download`
/// to; `api` is the web API used for publishing and search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub dl: String,
    pub api: String,
}

impl RegistryConfig {
    /// Configuration pointing downloads at a mirror reachable at `public_url`.
    pub fn for_mirror(public_url: &str, api: &str) -> Self {
        Self {
            dl: format!("{}/api/v1/crates", public_url.trim_end_matches('/')),
            api: api.to_string(),
        }
    }
}

/// True for paths that carry crate metadata rather than registry plumbing.
pub fn is_index_file(path: &str) -> bool {
    path != CONFIG_FILE && !path.split('/').any(|segment| segment.starts_with('.'))
}

/// Parse one line of an index file. `line` is 1-based.
pub fn parse_index_line(path: &str, line: usize, text: &str) -> Result<RecordDelta> {
    let parsed: IndexLine = serde_json::from_str(text).map_err(|source| IndexError::Parse {
        path: path.to_string(),
        line,
        source,
    })?;

    let mut delta =
        RecordDelta::new(ArtifactKey::new(parsed.name, parsed.vers)).with_yanked(parsed.yanked);
    if let Some(cksum) = parsed.cksum.filter(|c| !c.is_empty()) {
        delta = delta.with_checksum(cksum);
    }
    Ok(delta)
}

/// Parse every non-blank line of `contents` accepted by `keep`.
///
/// Malformed lines are logged and skipped so one bad line never blocks the
/// rest of the index.
pub fn parse_index_file<F>(path: &str, contents: &str, mut keep: F) -> Vec<RecordDelta>
where
    F: FnMut(&str) -> bool,
{
    contents
        .lines()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty() && keep(*text))
        .filter_map(|(idx, text)| match parse_index_line(path, idx + 1, text) {
            Ok(delta) => Some(delta),
            Err(e) => {
                warn!(error = %e, "Skipping malformed index line");
                None
            }
        })
        .collect()
}
