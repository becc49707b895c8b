use crate::error::Result;
use mirror_metadata::HistoryEntry;

/// Lazily produced, ordered history entries, oldest first.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<HistoryEntry>> + Send + 'a>;

/// Source of upstream index history.
///
/// Implementations do blocking work (network fetches, object-database
/// reads) and are always driven from a blocking thread by
/// [`IndexSyncer`](crate::IndexSyncer).
pub trait IndexHistory: Send + 'static {
    /// Whether a local working copy exists yet.
    fn has_local_clone(&self) -> bool;

    /// One-time clone of the upstream index.
    fn bootstrap(&mut self) -> Result<()>;

    /// Advance to the newest upstream history and yield every entry after
    /// `since`. With no resume point the whole current state is yielded.
    fn entries_since(&mut self, since: Option<&str>) -> Result<EntryIter<'_>>;

    /// Hook run after a pass applied all of its entries.
    fn after_sync(&mut self) -> Result<()> {
        Ok(())
    }
}
