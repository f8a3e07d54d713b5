//! Per-registration wrapper around a listener callback.

use std::sync::{Arc, PoisonError, RwLock};

use gridnotify_core::Result;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::event::{CacheEvent, CacheKey, CacheValue, EventType};
use crate::listener::{EventCallback, EventPipeline, ListenerId, ListenerSettings, ListenerStats};
use crate::queueing::{Interception, QueueingSegmentListener};

/// How an invocation treats events while an initial state transfer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationKind {
    /// Events go straight to the callback.
    Immediate,
    /// Events pass through the active transfer, if any.
    QueueAware,
    /// Cluster listener on its origin member: post events only, passed
    /// through the active transfer like [`QueueAware`](Self::QueueAware).
    ClusterForced,
}

/// Off-thread delivery for listeners registered with `sync(false)`.
///
/// A single blocking worker consumes the channel, so callbacks of one
/// invocation never run concurrently and see events in order.
struct AsyncDelivery<K, V> {
    sender: mpsc::UnboundedSender<CacheEvent<K, V>>,
}

impl<K: CacheKey, V: CacheValue> AsyncDelivery<K, V> {
    fn spawn(
        handle: &Handle,
        id: ListenerId,
        callback: EventCallback<K, V>,
        stats: Arc<ListenerStats>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<CacheEvent<K, V>>();
        handle.spawn_blocking(move || {
            while let Some(event) = receiver.blocking_recv() {
                match callback(&event) {
                    Ok(()) => stats.record_delivery(),
                    Err(err) => {
                        stats.record_error();
                        tracing::warn!(listener = %id, error = %err, "async listener failed");
                    }
                }
            }
            tracing::trace!(listener = %id, "async delivery worker stopped");
        });
        Self { sender }
    }
}

/// One callback of one registered listener, bound to a single event type.
///
/// The notifier keeps invocations in per-event-type lists. Every invocation
/// of a registration shares the same [`ListenerId`].
pub struct ListenerInvocation<K, V> {
    id: ListenerId,
    event_type: EventType,
    callback: EventCallback<K, V>,
    settings: ListenerSettings,
    pipeline: EventPipeline<K, V>,
    kind: InvocationKind,
    transfer: RwLock<Option<Arc<dyn QueueingSegmentListener<K, V>>>>,
    stats: Arc<ListenerStats>,
    async_delivery: Option<AsyncDelivery<K, V>>,
}

impl<K: CacheKey, V: CacheValue> ListenerInvocation<K, V> {
    /// Creates an invocation. When `dispatcher` is set and the listener is not
    /// sync, callbacks run on the runtime's blocking pool.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ListenerId,
        event_type: EventType,
        callback: EventCallback<K, V>,
        settings: ListenerSettings,
        pipeline: EventPipeline<K, V>,
        kind: InvocationKind,
        stats: Arc<ListenerStats>,
        dispatcher: Option<Handle>,
    ) -> Self {
        let async_delivery = match dispatcher {
            Some(handle) if !settings.is_sync() => Some(AsyncDelivery::spawn(
                &handle,
                id,
                Arc::clone(&callback),
                Arc::clone(&stats),
            )),
            _ => None,
        };
        Self {
            id,
            event_type,
            callback,
            settings,
            pipeline,
            kind,
            transfer: RwLock::new(None),
            stats,
            async_delivery,
        }
    }

    /// Returns the registration ID.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns the event type this invocation handles.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Returns how the invocation interacts with state transfers.
    pub fn kind(&self) -> InvocationKind {
        self.kind
    }

    /// Returns the registration settings.
    pub fn settings(&self) -> ListenerSettings {
        self.settings
    }

    /// Returns the filter and converter stage.
    pub fn pipeline(&self) -> &EventPipeline<K, V> {
        &self.pipeline
    }

    /// Returns `true` if the listener observes the phase of `event`.
    pub fn should_invoke(&self, event: &CacheEvent<K, V>) -> bool {
        self.settings.observation().accepts(event.is_pre())
    }

    /// Applies observation, primary-owner gating, filter and converter.
    ///
    /// Returns `Ok(None)` if the listener must not see the event.
    pub fn evaluate(
        &self,
        event: CacheEvent<K, V>,
        is_local_primary_owner: bool,
    ) -> Result<Option<CacheEvent<K, V>>> {
        if !self.should_invoke(&event) {
            return Ok(None);
        }
        if self.settings.is_only_primary() && !is_local_primary_owner {
            return Ok(None);
        }
        self.pipeline.apply(event)
    }

    /// Evaluates a raw event and delivers it if it passes.
    pub fn invoke(self: &Arc<Self>, event: CacheEvent<K, V>, is_local_primary_owner: bool) -> Result<()> {
        match self.evaluate(event, is_local_primary_owner) {
            Ok(Some(event)) => self.deliver(event, false),
            Ok(None) => Ok(()),
            Err(err) => {
                self.stats.record_error();
                Err(err)
            }
        }
    }

    /// Delivers an already evaluated event.
    ///
    /// Unless `skip_queue` is set, a queue-aware invocation first offers the
    /// event to its active transfer, which may hold it.
    pub fn deliver(self: &Arc<Self>, event: CacheEvent<K, V>, skip_queue: bool) -> Result<()> {
        let event = if skip_queue || self.kind == InvocationKind::Immediate {
            event
        } else {
            match self.active_transfer() {
                Some(transfer) => match transfer.handle_event(event, Arc::clone(self)) {
                    Interception::Queued => {
                        self.stats.record_queued();
                        return Ok(());
                    }
                    Interception::Deliver(event) => event,
                },
                None => event,
            }
        };
        self.call(event)
    }

    fn call(&self, event: CacheEvent<K, V>) -> Result<()> {
        if let Some(delivery) = &self.async_delivery {
            if delivery.sender.send(event).is_err() {
                tracing::debug!(listener = %self.id, "async delivery worker gone, event dropped");
            }
            return Ok(());
        }
        match (self.callback)(&event) {
            Ok(()) => {
                self.stats.record_delivery();
                Ok(())
            }
            Err(err) => {
                self.stats.record_error();
                tracing::debug!(
                    listener = %self.id,
                    event_type = %self.event_type,
                    error = %err,
                    "listener callback failed"
                );
                Err(err)
            }
        }
    }

    fn active_transfer(&self) -> Option<Arc<dyn QueueingSegmentListener<K, V>>> {
        self.transfer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn attach_transfer(&self, transfer: Arc<dyn QueueingSegmentListener<K, V>>) {
        *self.transfer.write().unwrap_or_else(PoisonError::into_inner) = Some(transfer);
    }

    pub(crate) fn detach_transfer(&self) {
        *self.transfer.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns `true` while an initial state transfer is attached.
    pub fn is_transferring(&self) -> bool {
        self.transfer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<K, V> std::fmt::Debug for ListenerInvocation<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerInvocation")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .field("async", &self.async_delivery.is_some())
            .finish()
    }
}
