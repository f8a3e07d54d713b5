use std::sync::{Arc, Mutex, PoisonError};

use gridnotify_core::{GridError, Result};

use crate::event::{CacheEvent, CacheKey, CacheValue};
use crate::listener::ListenerInvocation;
use crate::queueing::tracker::{KeyTracker, TransferPhase};
use crate::queueing::{
    Interception, KeyState, PendingEntry, QueueingSegmentListener, ReplayQueue,
};
use crate::retrieval::SegmentCompletionListener;
use crate::topology::Topology;

/// Holds live events per hash segment and releases each segment's events
/// once the snapshot has moved past it.
///
/// A segment whose completion is reported together with its last entry is
/// released on the following [`notified_key`](QueueingSegmentListener::notified_key),
/// after the snapshot event for that entry has been raised. Segments never
/// reported complete are released by
/// [`transfer_complete`](QueueingSegmentListener::transfer_complete).
pub struct DistributedQueueingSegmentListener<K, V> {
    tracker: KeyTracker<K, V>,
    topology: Arc<dyn Topology<K>>,
    segments: Vec<ReplayQueue<K, V>>,
    completing: ReplayQueue<K, V>,
    deferred: Mutex<Vec<usize>>,
    replay_error: Mutex<Option<GridError>>,
}

impl<K: CacheKey, V: CacheValue> DistributedQueueingSegmentListener<K, V> {
    /// Creates a listener with one queue per segment of `topology`.
    pub fn new(topology: Arc<dyn Topology<K>>) -> Self {
        let segments = (0..topology.num_segments())
            .map(|_| ReplayQueue::new())
            .collect();
        Self {
            tracker: KeyTracker::new(),
            topology,
            segments,
            completing: ReplayQueue::new(),
            deferred: Mutex::new(Vec::new()),
            replay_error: Mutex::new(None),
        }
    }

    fn complete_segment(&self, segment: usize) {
        let Some(queue) = self.segments.get(segment) else {
            tracing::debug!(segment, "completion reported for unknown segment");
            return;
        };
        tracing::trace!(segment, "releasing queued events for segment");
        if let Err(err) = queue.drain() {
            self.record_error(err);
        }
    }

    fn record_error(&self, err: GridError) {
        self.replay_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(err);
    }

    fn take_deferred(&self) -> Vec<usize> {
        std::mem::take(&mut *self.deferred.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<K: CacheKey, V: CacheValue> SegmentCompletionListener
    for DistributedQueueingSegmentListener<K, V>
{
    fn segment_transferred(&self, segment: usize, sent_last_entry: bool) {
        if sent_last_entry {
            self.deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(segment);
        } else {
            self.complete_segment(segment);
        }
    }
}

impl<K: CacheKey, V: CacheValue> QueueingSegmentListener<K, V>
    for DistributedQueueingSegmentListener<K, V>
{
    fn mark_key_as_processing(&self, key: &K) -> KeyState<V> {
        self.tracker.mark_visited(key)
    }

    fn notified_key(&self, _key: &K) {
        for segment in self.take_deferred() {
            self.complete_segment(segment);
        }
    }

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
        let Some(key) = event.key() else {
            return Interception::Deliver(event);
        };
        let segment = self.topology.segment_of(key);
        let Some(queue) = self.segments.get(segment) else {
            return Interception::Deliver(event);
        };
        if self.tracker.phase() == TransferPhase::Completing && queue.is_closed() {
            // Keys promoted after the iteration still have their created
            // event outstanding.
            return self.completing.offer(event, invocation);
        }
        queue.offer(event, invocation)
    }

    fn find_created_entries(&self) -> Vec<(K, PendingEntry<V>)> {
        self.tracker.take_pending()
    }

    fn transfer_complete(&self) -> Result<()> {
        for segment in self.take_deferred() {
            self.complete_segment(segment);
        }
        for (segment, queue) in self.segments.iter().enumerate() {
            if !queue.is_closed() {
                self.complete_segment(segment);
            }
        }
        if let Err(err) = self.completing.drain() {
            self.record_error(err);
        }
        self.tracker.complete();
        tracing::debug!(
            segments = self.segments.len(),
            "initial state transfer complete"
        );
        match self
            .replay_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn is_complete(&self) -> bool {
        self.tracker.is_complete()
    }
}
