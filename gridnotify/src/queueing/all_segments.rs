use std::sync::Arc;

use gridnotify_core::Result;

use crate::event::{CacheEvent, CacheKey, CacheValue};
use crate::listener::ListenerInvocation;
use crate::queueing::tracker::KeyTracker;
use crate::queueing::{
    Interception, KeyState, PendingEntry, QueueingSegmentListener, ReplayQueue,
};
use crate::retrieval::SegmentCompletionListener;

/// Holds every live event until the whole transfer has finished.
///
/// Used for local, replicated and invalidation caches, where the snapshot is
/// not produced segment by segment.
pub struct QueueingAllSegmentListener<K, V> {
    tracker: KeyTracker<K, V>,
    queue: ReplayQueue<K, V>,
}

impl<K: CacheKey, V: CacheValue> QueueingAllSegmentListener<K, V> {
    /// Creates a listener for a fresh transfer.
    pub fn new() -> Self {
        Self {
            tracker: KeyTracker::new(),
            queue: ReplayQueue::new(),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Default for QueueingAllSegmentListener<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> SegmentCompletionListener for QueueingAllSegmentListener<K, V> {
    fn segment_transferred(&self, segment: usize, sent_last_entry: bool) {
        tracing::trace!(segment, sent_last_entry, "segment transferred");
    }
}

impl<K: CacheKey, V: CacheValue> QueueingSegmentListener<K, V>
    for QueueingAllSegmentListener<K, V>
{
    fn mark_key_as_processing(&self, key: &K) -> KeyState<V> {
        self.tracker.mark_visited(key)
    }

    fn notified_key(&self, _key: &K) {}

    fn record_event(&self, event: &CacheEvent<K, V>, evaluated: bool) -> bool {
        self.tracker.absorb(event, evaluated)
    }

    fn handle_event(
        &self,
        event: CacheEvent<K, V>,
        invocation: Arc<ListenerInvocation<K, V>>,
    ) -> Interception<K, V> {
        if self.tracker.is_complete() {
            return Interception::Deliver(event);
        }
        self.queue.offer(event, invocation)
    }

    fn find_created_entries(&self) -> Vec<(K, PendingEntry<V>)> {
        self.tracker.take_pending()
    }

    fn transfer_complete(&self) -> Result<()> {
        let outcome = self.queue.drain();
        self.tracker.complete();
        tracing::debug!("initial state transfer complete");
        outcome
    }

    fn is_complete(&self) -> bool {
        self.tracker.is_complete()
    }
}
