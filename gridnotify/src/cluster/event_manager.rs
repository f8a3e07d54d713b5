use std::sync::Arc;

use dashmap::DashMap;
use gridnotify_core::{GridError, MemberId, Result, TransactionId};

use crate::cluster::ClusterTransport;
use crate::event::{CacheEvent, CacheKey, CacheValue};
use crate::listener::ListenerId;

struct PendingForward<K, V> {
    target: MemberId,
    listener_id: ListenerId,
    event: CacheEvent<K, V>,
}

/// Sends events raised for remote cluster listeners to their origins.
///
/// Events outside a transaction are sent right away. Events raised inside a
/// transaction are held until it completes and then sent in one batch per
/// origin and listener, or dropped on rollback.
pub struct ClusterEventManager<K, V> {
    transport: Arc<dyn ClusterTransport<K, V>>,
    pending: DashMap<TransactionId, Vec<PendingForward<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> ClusterEventManager<K, V> {
    /// Creates a manager sending through `transport`.
    pub fn new(transport: Arc<dyn ClusterTransport<K, V>>) -> Self {
        Self {
            transport,
            pending: DashMap::new(),
        }
    }

    /// Sends or holds one event for the listener `listener_id` on `target`.
    pub fn add_event(
        &self,
        target: MemberId,
        listener_id: ListenerId,
        event: CacheEvent<K, V>,
    ) -> Result<()> {
        match event.transaction() {
            Some(tx) => {
                self.pending.entry(tx).or_default().push(PendingForward {
                    target,
                    listener_id,
                    event,
                });
                Ok(())
            }
            None => self.transport.send_events(target, listener_id, vec![event]),
        }
    }

    /// Flushes (`committed`) or drops the events held for `tx`.
    ///
    /// Every batch is attempted; the first send failure is returned.
    pub fn transaction_completed(&self, tx: TransactionId, committed: bool) -> Result<()> {
        let Some((_, forwards)) = self.pending.remove(&tx) else {
            return Ok(());
        };
        if !committed {
            tracing::debug!(transaction = %tx, dropped = forwards.len(), "discarding cluster events of rolled back transaction");
            return Ok(());
        }

        let mut batches: Vec<(MemberId, ListenerId, Vec<CacheEvent<K, V>>)> = Vec::new();
        for forward in forwards {
            match batches
                .iter_mut()
                .find(|(target, id, _)| *target == forward.target && *id == forward.listener_id)
            {
                Some((_, _, events)) => events.push(forward.event),
                None => batches.push((forward.target, forward.listener_id, vec![forward.event])),
            }
        }

        let mut first_error: Option<GridError> = None;
        for (target, listener_id, events) in batches {
            let count = events.len();
            if let Err(err) = self.transport.send_events(target, listener_id, events) {
                tracing::warn!(
                    transaction = %tx,
                    target = %target,
                    listener = %listener_id,
                    error = %err,
                    "failed to send cluster events"
                );
                first_error.get_or_insert(err);
            } else {
                tracing::trace!(transaction = %tx, target = %target, events = count, "sent cluster events");
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Returns the number of transactions with held events.
    pub fn pending_transactions(&self) -> usize {
        self.pending.len()
    }
}
