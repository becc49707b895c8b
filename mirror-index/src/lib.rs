//! Upstream index mirroring for the crates mirror.
//!
//! [`IndexSyncer`] pulls new history entries from an [`IndexHistory`]
//! source (in production a git clone of the registry index, see
//! [`GitIndexHistory`]) and applies them to the metadata store, one
//! transaction per upstream commit.

pub mod error;
pub mod git;
pub mod history;
pub mod parse;
pub mod syncer;

pub use error::{IndexError, Result};
pub use git::GitIndexHistory;
pub use history::{EntryIter, IndexHistory};
pub use parse::RegistryConfig;
pub use syncer::{IndexSyncer, SyncOutcome, SyncReport};
