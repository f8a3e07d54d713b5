//! Live-event queueing while a listener receives its initial state.
//!
//! When a listener registers with `include_current_state`, existing entries
//! are replayed as created events while the cache keeps changing. A
//! [`QueueingSegmentListener`] sits between the live notification path and
//! the listener for the duration of that transfer and guarantees that every
//! key is reported exactly once with its latest value, and that live events
//! for already reported keys reach the listener only after the snapshot
//! events they depend on.
//!
//! Two strategies exist: [`QueueingAllSegmentListener`] holds back every live
//! event until the whole transfer ends, and
//! [`DistributedQueueingSegmentListener`] releases the events of each hash
//! segment as soon as that segment has been transferred.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use gridnotify_core::{GridError, Metadata, Result};

use crate::event::CacheEvent;
use crate::listener::ListenerInvocation;
use crate::retrieval::SegmentCompletionListener;

mod all_segments;
mod distributed;
mod tracker;

pub use all_segments::QueueingAllSegmentListener;
pub use distributed::DistributedQueueingSegmentListener;

/// Value and metadata recorded for a key changed before the snapshot
/// iteration reached it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry<V> {
    value: Option<V>,
    metadata: Option<Metadata>,
    evaluated: bool,
}

impl<V> PendingEntry<V> {
    /// Returns the recorded value.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Returns the recorded metadata.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Returns `true` if the value came from an event that already went
    /// through the listener's filter and converter.
    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    /// Splits the entry into value and metadata.
    pub fn into_parts(self) -> (Option<V>, Option<Metadata>) {
        (self.value, self.metadata)
    }
}

/// State of a key during a transfer, as returned by
/// [`QueueingSegmentListener::mark_key_as_processing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyState<V> {
    /// Neither iterated nor changed so far.
    Unvisited,
    /// Changed before the iteration reached it; the newer value must be
    /// reported instead of the iterated one.
    Pending(PendingEntry<V>),
    /// Already reported.
    Visited,
    /// Removed before the iteration reached it; nothing is reported.
    RemovedDuringTransfer,
}

/// What became of a live event offered to a transfer.
#[derive(Debug)]
pub enum Interception<K, V> {
    /// The event is held and replayed after the transfer reaches it.
    Queued,
    /// The event must be delivered right away.
    Deliver(CacheEvent<K, V>),
}

impl<K, V> Interception<K, V> {
    /// Returns `true` unless the caller has to deliver the event itself.
    pub fn is_intercepted(&self) -> bool {
        !matches!(self, Self::Deliver(_))
    }
}

/// Coordinates one listener's snapshot with concurrent live events.
pub trait QueueingSegmentListener<K, V>: SegmentCompletionListener {
    /// Marks `key` as reported by the snapshot and returns its prior state.
    ///
    /// Calling it twice for the same key returns
    /// [`KeyState::Visited`] the second time.
    fn mark_key_as_processing(&self, key: &K) -> KeyState<V>;

    /// Signals that the snapshot event for `key` has been raised.
    fn notified_key(&self, key: &K);

    /// Folds a live event into the snapshot state of its key.
    ///
    /// Returns `true` if the snapshot will report the key, in which case the
    /// event must not reach the listener. Every entry mutation is expected
    /// here, whatever the listener subscribed to or filters out; `evaluated`
    /// tells whether the event already went through the listener's pipeline.
    fn record_event(&self, event: &CacheEvent<K, V>, evaluated: bool) -> bool;

    /// Offers an already filtered and converted live event that the snapshot
    /// does not cover. It is held until the transfer has reported its key.
    fn handle_event(
        &self,
        event: CacheEvent<K, V>,
        invocation: Arc<ListenerInvocation<K, V>>,
    ) -> Interception<K, V>;

    /// Returns keys first seen through live events during the iteration,
    /// each exactly once, and marks them reported.
    fn find_created_entries(&self) -> Vec<(K, PendingEntry<V>)>;

    /// Releases every held event in arrival order and ends the transfer.
    ///
    /// Listener failures during replay do not stop the replay; the first one
    /// is returned once everything has been released.
    fn transfer_complete(&self) -> Result<()>;

    /// Returns `true` once [`transfer_complete`](Self::transfer_complete) has run.
    fn is_complete(&self) -> bool;
}

struct QueuedEvent<K, V> {
    event: CacheEvent<K, V>,
    invocation: Arc<ListenerInvocation<K, V>>,
}

struct QueueState<K, V> {
    events: VecDeque<QueuedEvent<K, V>>,
    closed: bool,
}

/// A FIFO of held events that closes itself once drained.
///
/// Events are popped one at a time and replayed outside the lock. An event
/// offered while the drain is running lands behind the ones already queued,
/// so arrival order is kept; once the queue is empty it closes and further
/// offers are handed back for direct delivery.
pub(crate) struct ReplayQueue<K, V> {
    state: Mutex<QueueState<K, V>>,
}

impl<K, V> ReplayQueue<K, V>
where
    K: crate::event::CacheKey,
    V: crate::event::CacheValue,
{
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                closed: false,
            }),
        }
    }

    pub(crate) fn offer(
        &self,
        event: CacheEvent<K, V>,
        invocation: Arc<ListenerInvocation<K, V>>,
    ) -> Interception<K, V> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Interception::Deliver(event);
        }
        state.events.push_back(QueuedEvent { event, invocation });
        Interception::Queued
    }

    /// Replays held events until the queue is empty, then closes it.
    pub(crate) fn drain(&self) -> Result<()> {
        let mut first_error: Option<GridError> = None;
        loop {
            let next = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                match state.events.pop_front() {
                    Some(queued) => queued,
                    None => {
                        state.closed = true;
                        break;
                    }
                }
            };
            if let Err(err) = next.invocation.deliver(next.event, true) {
                tracing::warn!(
                    listener = %next.invocation.id(),
                    error = %err,
                    "queued event replay failed"
                );
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }
}
