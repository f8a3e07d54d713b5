//! Snapshot iteration of the current cache contents.

use std::sync::Arc;

use gridnotify_core::{CacheEntry, Result};

/// Receives segment completion signals from an entry iteration.
pub trait SegmentCompletionListener: Send + Sync {
    /// Reports that every entry of `segment` has been handed out.
    ///
    /// `sent_last_entry` is `true` when the entry most recently returned by
    /// the iterator was the segment's last one; the listener then waits until
    /// that entry has been processed before acting on the completion.
    fn segment_transferred(&self, segment: usize, sent_last_entry: bool);
}

/// A lazily evaluated stream of snapshot entries.
pub type EntryStream<K, V> = Box<dyn Iterator<Item = CacheEntry<K, V>> + Send>;

/// Produces the entries a listener registered with `include_current_state`
/// is told about.
///
/// In a distributed cache the stream covers the entries of every segment,
/// each read from its primary owner, and reports segment completion to
/// `listener` as iteration progresses. A key returned twice is reported once.
pub trait EntryRetriever<K, V>: Send + Sync {
    /// Starts an iteration.
    fn retrieve_entries(
        &self,
        listener: Arc<dyn SegmentCompletionListener>,
    ) -> Result<EntryStream<K, V>>;
}
