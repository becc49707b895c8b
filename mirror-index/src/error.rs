use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] mirror_metadata::MetadataError),

    #[error("Malformed index line {path}:{line}: {source}")]
    Parse {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode registry config: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("History producer stopped: {0}")]
    Channel(String),

    #[error("No local index clone at {}", .0.display())]
    NoLocalClone(PathBuf),
}
