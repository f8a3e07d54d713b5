//! The per-cache notification hub.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gridnotify_core::{CacheEntry, GridError, MemberId, Metadata, Result, TransactionId};
use tokio::runtime::Handle;

use crate::cluster::{
    ClusterCommand, ClusterEventManager, ClusterListenerDescriptor, ClusterTransport,
    RemoteClusterListener, ReplicationHelper,
};
use crate::config::NotifierConfig;
use crate::context::{CommandFlags, InvocationContext};
use crate::event::{AvailabilityMode, CacheEvent, CacheKey, CacheValue, EventType};
use crate::listener::registry::ListenerRegistry;
use crate::listener::{
    CacheEventConverter, CacheEventFilter, CacheEventFilterConverter, CacheListener,
    EventPipeline, FilterIndexingProvider, InvocationKind, ListenerId, ListenerInvocation,
    ListenerStats, Observation,
};
use crate::queueing::{
    DistributedQueueingSegmentListener, KeyState, QueueingAllSegmentListener,
    QueueingSegmentListener,
};
use crate::retrieval::{EntryRetriever, SegmentCompletionListener};
use crate::topology::{LocalTopology, Topology};

type Invocations<K, V> = [Arc<ListenerInvocation<K, V>>];

/// Lifecycle state of a [`CacheNotifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifierStatus {
    /// Created but not started; local notifications already work.
    Initializing,
    /// Started; cluster commands are accepted.
    Running,
    /// Stopped; every listener has been dropped.
    Stopped,
}

impl NotifierStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Running => 1,
            Self::Stopped => 2,
        }
    }
}

/// A running initial state transfer.
struct ActiveTransfer<K, V> {
    transfer: Arc<dyn QueueingSegmentListener<K, V>>,
    /// Keys primary-owned elsewhere reach a replicated cluster listener as
    /// forwarded events, so only locally primary writes are recorded here.
    primary_only: bool,
}

/// Dispatches cache change events to registered listeners.
///
/// One notifier exists per cache and member. The storage layer calls the
/// `notify_*` methods once per mutation phase; listeners are registered with
/// [`add_listener`](Self::add_listener) and its variants.
pub struct CacheNotifier<K, V> {
    config: NotifierConfig,
    topology: Arc<dyn Topology<K>>,
    retriever: Option<Arc<dyn EntryRetriever<K, V>>>,
    replication: Option<ReplicationHelper<K, V>>,
    event_manager: Option<Arc<ClusterEventManager<K, V>>>,
    index_providers: Vec<Arc<dyn FilterIndexingProvider<K, V>>>,
    registry: ListenerRegistry<K, V>,
    cluster_listeners: DashMap<ListenerId, ClusterListenerDescriptor<K, V>>,
    remote_listeners: DashMap<ListenerId, ClusterListenerDescriptor<K, V>>,
    transfers: DashMap<ListenerId, ActiveTransfer<K, V>>,
    dispatcher: Option<Handle>,
    stats: Arc<ListenerStats>,
    status: AtomicU8,
}

impl<K: CacheKey, V: CacheValue> CacheNotifier<K, V> {
    /// Creates a new builder for a notifier using `config`.
    pub fn builder(config: NotifierConfig) -> CacheNotifierBuilder<K, V> {
        CacheNotifierBuilder::new(config)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Returns the member this notifier runs on.
    pub fn local_member(&self) -> MemberId {
        self.topology.local_member()
    }

    /// Returns the lifecycle state.
    pub fn status(&self) -> NotifierStatus {
        NotifierStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Returns `true` between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.status() == NotifierStatus::Running
    }

    /// Returns delivery counters aggregated over every listener.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Starts accepting cluster commands.
    pub fn start(&self) {
        self.status
            .store(NotifierStatus::Running.as_u8(), Ordering::Release);
        tracing::info!(
            cache = %self.config.cache_name(),
            mode = %self.config.cache_mode(),
            member = %self.local_member(),
            "cache notifier started"
        );
    }

    /// Stops the notifier and drops every local and remote listener.
    pub fn stop(&self) {
        self.status
            .store(NotifierStatus::Stopped.as_u8(), Ordering::Release);
        let listeners = self.registry.listener_ids().len();
        self.registry.clear();
        self.cluster_listeners.clear();
        self.remote_listeners.clear();
        tracing::info!(cache = %self.config.cache_name(), listeners, "cache notifier stopped");
    }

    /// Returns `true` if any listener handles `event_type`.
    pub fn has_listener(&self, event_type: EventType) -> bool {
        self.registry.has_listener(event_type)
    }

    /// Returns the IDs of every registered listener, including remote
    /// cluster listener copies.
    pub fn listeners(&self) -> Vec<ListenerId> {
        self.registry.listener_ids()
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.listener_ids().len()
    }

    /// Returns `true` if `id` is a cluster listener registered on this member.
    pub fn is_cluster_listener(&self, id: ListenerId) -> bool {
        self.cluster_listeners.contains_key(&id)
    }

    /// Returns `true` if `id` is a remote copy of another member's cluster
    /// listener.
    pub fn is_remote_listener(&self, id: ListenerId) -> bool {
        self.remote_listeners.contains_key(&id)
    }

    // ---- entry notifications ----

    /// Notifies listeners that `key` was created.
    pub fn notify_cache_entry_created(
        &self,
        key: K,
        value: Option<V>,
        metadata: Option<Metadata>,
        pre: bool,
        ctx: &InvocationContext,
        command: Option<&CommandFlags>,
    ) -> Result<()> {
        self.notify_entry(EventType::Created, key, pre, ctx, command, |event| {
            event.with_value(value).with_metadata(metadata)
        })
    }

    /// Notifies listeners that the value of `key` changed.
    #[allow(clippy::too_many_arguments)]
    pub fn notify_cache_entry_modified(
        &self,
        key: K,
        value: Option<V>,
        metadata: Option<Metadata>,
        previous_value: Option<V>,
        previous_metadata: Option<Metadata>,
        pre: bool,
        ctx: &InvocationContext,
        command: Option<&CommandFlags>,
    ) -> Result<()> {
        self.notify_entry(EventType::Modified, key, pre, ctx, command, |event| {
            event
                .with_value(value)
                .with_metadata(metadata)
                .with_old_value(previous_value)
                .with_old_metadata(previous_metadata)
        })
    }

    /// Notifies listeners that `key` was removed.
    ///
    /// The pre event still carries the value being removed; the post event
    /// only has it as the old value.
    pub fn notify_cache_entry_removed(
        &self,
        key: K,
        previous_value: Option<V>,
        previous_metadata: Option<Metadata>,
        pre: bool,
        ctx: &InvocationContext,
        command: Option<&CommandFlags>,
    ) -> Result<()> {
        self.notify_entry(EventType::Removed, key, pre, ctx, command, |event| {
            let value = if pre { previous_value.clone() } else { None };
            event
                .with_value(value)
                .with_old_value(previous_value)
                .with_old_metadata(previous_metadata)
        })
    }

    /// Notifies listeners that `key` was read.
    pub fn notify_cache_entry_visited(
        &self,
        key: K,
        value: Option<V>,
        pre: bool,
        ctx: &InvocationContext,
        command: Option<&CommandFlags>,
    ) -> Result<()> {
        self.notify_entry(EventType::Visited, key, pre, ctx, command, |event| {
            event.with_value(value)
        })
    }

    /// Notifies listeners that `entries` were evicted, one post event each.
    pub fn notify_cache_entries_evicted(
        &self,
        entries: Vec<CacheEntry<K, V>>,
        ctx: &InvocationContext,
        command: Option<&CommandFlags>,
    ) -> Result<()> {
        if !self.registry.has_listener(EventType::Evicted) {
            return Ok(());
        }
        for entry in entries {
            let (key, value, metadata) = entry.into_parts();
            self.notify_entry(EventType::Evicted, key, false, ctx, command, |event| {
                event.with_value(Some(value)).with_metadata(metadata)
            })?;
        }
        Ok(())
    }

    /// Notifies listeners that `key` expired.
    pub fn notify_cache_entry_expired(
        &self,
        key: K,
        value: Option<V>,
        metadata: Option<Metadata>,
        ctx: &InvocationContext,
    ) -> Result<()> {
        self.notify_entry(EventType::Expired, key, false, ctx, None, |event| {
            event
                .with_value(value.clone())
                .with_old_value(value)
                .with_metadata(metadata)
        })
    }

    /// Notifies listeners that `key` was loaded back from a store.
    pub fn notify_cache_entry_activated(
        &self,
        key: K,
        value: Option<V>,
        pre: bool,
        ctx: &InvocationContext,
        command: Option<&CommandFlags>,
    ) -> Result<()> {
        self.notify_entry(EventType::Activated, key, pre, ctx, command, |event| {
            event.with_value(value)
        })
    }

    /// Notifies listeners that `key` was written out to a store.
    pub fn notify_cache_entry_passivated(
        &self,
        key: K,
        value: Option<V>,
        pre: bool,
        command: Option<&CommandFlags>,
    ) -> Result<()> {
        let ctx = InvocationContext::local();
        self.notify_entry(EventType::Passivated, key, pre, &ctx, command, |event| {
            event.with_value(value)
        })
    }

    /// Notifies listeners that `key` was loaded from a store.
    pub fn notify_cache_entry_loaded(
        &self,
        key: K,
        value: Option<V>,
        pre: bool,
        ctx: &InvocationContext,
        command: Option<&CommandFlags>,
    ) -> Result<()> {
        self.notify_entry(EventType::Loaded, key, pre, ctx, command, |event| {
            event.with_value(value)
        })
    }

    /// Notifies listeners that `key` was invalidated.
    pub fn notify_cache_entry_invalidated(
        &self,
        key: K,
        value: Option<V>,
        metadata: Option<Metadata>,
        pre: bool,
        ctx: &InvocationContext,
        command: Option<&CommandFlags>,
    ) -> Result<()> {
        self.notify_entry(EventType::Invalidated, key, pre, ctx, command, |event| {
            event.with_value(value).with_metadata(metadata)
        })
    }

    fn notify_entry<F>(
        &self,
        event_type: EventType,
        key: K,
        pre: bool,
        ctx: &InvocationContext,
        command: Option<&CommandFlags>,
        fill: F,
    ) -> Result<()>
    where
        F: FnOnce(CacheEvent<K, V>) -> CacheEvent<K, V>,
    {
        let listeners = self.registry.snapshot(event_type);
        let transferring = !self.transfers.is_empty();
        if (listeners.is_empty() && !transferring) || !self.notification_allowed(command) {
            return Ok(());
        }
        if !self.is_local_commit(&key) {
            tracing::trace!(event_type = %event_type, "not on the commit path of the key, skipping");
            return Ok(());
        }
        let primary = self.is_local_primary(&key);
        let event = fill(CacheEvent::entry(event_type, key, pre))
            .with_origin_local(ctx.is_origin_local())
            .with_transaction(ctx.transaction())
            .with_retried(command.is_some_and(CommandFlags::is_retried));
        let covered = if transferring {
            self.record_in_transfers(&event, primary)
        } else {
            Vec::new()
        };
        for invocation in listeners.iter() {
            if covered.contains(&invocation.id()) {
                continue;
            }
            invocation.invoke(event.clone(), primary)?;
        }
        Ok(())
    }

    fn dispatch(listeners: &Invocations<K, V>, event: CacheEvent<K, V>, primary: bool) -> Result<()> {
        for invocation in listeners {
            invocation.invoke(event.clone(), primary)?;
        }
        Ok(())
    }

    /// Feeds a raw entry event to every running transfer, ahead of any
    /// listener's own gating, and returns the listeners whose snapshot now
    /// covers it.
    fn record_in_transfers(&self, event: &CacheEvent<K, V>, primary: bool) -> Vec<ListenerId> {
        if !event.event_type().changes_entry_state() {
            return Vec::new();
        }
        let mut covered = Vec::new();
        for active in self.transfers.iter() {
            if active.primary_only && !primary {
                continue;
            }
            if active.transfer.record_event(event, false) {
                if !event.is_pre() {
                    self.stats.record_absorbed();
                }
                covered.push(*active.key());
            }
        }
        covered
    }

    fn notification_allowed(&self, command: Option<&CommandFlags>) -> bool {
        self.status() != NotifierStatus::Stopped
            && !command.is_some_and(CommandFlags::skips_notification)
    }

    fn is_local_commit(&self, key: &K) -> bool {
        !self.config.cache_mode().is_distributed() || self.topology.is_local_owner(key)
    }

    fn is_local_primary(&self, key: &K) -> bool {
        !self.config.cache_mode().is_clustered() || self.topology.is_local_primary(key)
    }

    // ---- non-entry notifications ----

    /// Notifies listeners that a transaction touched this cache for the first
    /// time.
    pub fn notify_transaction_registered(
        &self,
        transaction: TransactionId,
        origin_local: bool,
    ) -> Result<()> {
        self.notify_global(CacheEvent::transaction_registered(transaction, origin_local))
    }

    /// Notifies listeners that a transaction finished and releases the
    /// cluster events it held.
    pub fn notify_transaction_completed(
        &self,
        transaction: TransactionId,
        successful: bool,
        ctx: &InvocationContext,
    ) -> Result<()> {
        let flushed = match &self.event_manager {
            Some(manager) => manager.transaction_completed(transaction, successful),
            None => Ok(()),
        };
        self.notify_global(CacheEvent::transaction_completed(
            transaction,
            successful,
            ctx.is_origin_local(),
        ))?;
        flushed
    }

    /// Notifies listeners of a membership change.
    pub fn notify_topology_changed(
        &self,
        old_members: Vec<MemberId>,
        new_members: Vec<MemberId>,
        topology_id: u64,
        pre: bool,
    ) -> Result<()> {
        self.notify_global(CacheEvent::topology(
            EventType::TopologyChanged,
            old_members,
            new_members,
            topology_id,
            pre,
        ))
    }

    /// Notifies listeners that data was rebalanced between members.
    pub fn notify_data_rehashed(
        &self,
        old_members: Vec<MemberId>,
        new_members: Vec<MemberId>,
        topology_id: u64,
        pre: bool,
    ) -> Result<()> {
        self.notify_global(CacheEvent::topology(
            EventType::DataRehashed,
            old_members,
            new_members,
            topology_id,
            pre,
        ))
    }

    /// Notifies listeners that the availability mode changed.
    pub fn notify_partition_status_changed(
        &self,
        mode: AvailabilityMode,
        pre: bool,
    ) -> Result<()> {
        self.notify_global(CacheEvent::partition_status_changed(mode, pre))
    }

    fn notify_global(&self, event: CacheEvent<K, V>) -> Result<()> {
        let listeners = self.registry.snapshot(event.event_type());
        if listeners.is_empty() || self.status() == NotifierStatus::Stopped {
            return Ok(());
        }
        Self::dispatch(&listeners, event, true)
    }

    // ---- registration ----

    /// Registers a listener without filter or converter.
    #[tracing::instrument(skip_all, fields(cache = %self.config.cache_name()))]
    pub async fn add_listener(&self, listener: CacheListener<K, V>) -> Result<ListenerId> {
        self.register(listener, EventPipeline::Passthrough).await
    }

    /// Registers a listener behind an optional filter and converter.
    #[tracing::instrument(skip_all, fields(cache = %self.config.cache_name()))]
    pub async fn add_filtered_listener(
        &self,
        listener: CacheListener<K, V>,
        filter: Option<Arc<dyn CacheEventFilter<K, V>>>,
        converter: Option<Arc<dyn CacheEventConverter<K, V>>>,
    ) -> Result<ListenerId> {
        self.register(listener, EventPipeline::new(filter, converter))
            .await
    }

    /// Registers a listener behind a combined filter and converter.
    #[tracing::instrument(skip_all, fields(cache = %self.config.cache_name()))]
    pub async fn add_filter_converter_listener(
        &self,
        listener: CacheListener<K, V>,
        filter_converter: Arc<dyn CacheEventFilterConverter<K, V>>,
    ) -> Result<ListenerId> {
        self.register(listener, EventPipeline::combined(filter_converter))
            .await
    }

    async fn register(
        &self,
        listener: CacheListener<K, V>,
        pipeline: EventPipeline<K, V>,
    ) -> Result<ListenerId> {
        if self.status() == NotifierStatus::Stopped {
            return Err(GridError::Registration(format!(
                "notifier of cache {} is stopped",
                self.config.cache_name()
            )));
        }
        let (callbacks, settings) = listener.into_parts();
        if callbacks.is_empty() {
            return Err(GridError::Registration(
                "listener has no event callbacks".to_string(),
            ));
        }

        let mode = self.config.cache_mode();
        let replicate = settings.is_clustered() && mode.is_distributed();
        if settings.is_clustered() {
            if mode.is_invalidation() {
                return Err(GridError::Registration(
                    "cluster listeners are not supported in invalidation mode".to_string(),
                ));
            }
            if settings.observation() == Observation::Pre {
                return Err(GridError::Registration(
                    "cluster listeners cannot observe pre events only".to_string(),
                ));
            }
        }
        let replication = match (&self.replication, replicate) {
            (Some(helper), true) => Some(helper),
            (None, true) => {
                return Err(GridError::Registration(
                    "cluster listeners need a cluster transport".to_string(),
                ))
            }
            (_, false) => None,
        };
        let transfer_state =
            settings.includes_current_state() && callbacks.contains_key(&EventType::Created);
        let retriever = match (&self.retriever, transfer_state) {
            (Some(retriever), true) => Some(Arc::clone(retriever)),
            (None, true) => {
                return Err(GridError::Registration(
                    "include_current_state needs an entry retriever".to_string(),
                ))
            }
            (_, false) => None,
        };
        let pipeline = self.index_pipeline(pipeline)?;

        let (settings, kind) = if settings.is_clustered() {
            let settings = settings.with_observation(Observation::Post);
            let settings = if replicate {
                settings.with_only_primary(true)
            } else {
                settings
            };
            (settings, InvocationKind::ClusterForced)
        } else if settings.includes_current_state() {
            (settings, InvocationKind::QueueAware)
        } else {
            (settings, InvocationKind::Immediate)
        };

        let id = ListenerId::new();
        let interests: Vec<EventType> = callbacks.keys().copied().collect();

        if let Some(helper) = replication {
            let descriptor = ClusterListenerDescriptor::new(
                id,
                self.local_member(),
                interests.clone(),
                pipeline.clone(),
                settings.is_sync(),
            );
            helper
                .install(descriptor.clone(), self.config.replication_timeout())
                .await?;
            self.cluster_listeners.insert(id, descriptor);
        }

        let invocations: Vec<Arc<ListenerInvocation<K, V>>> = callbacks
            .into_iter()
            .map(|(event_type, callback)| {
                Arc::new(ListenerInvocation::new(
                    id,
                    event_type,
                    callback,
                    settings,
                    pipeline.clone(),
                    kind,
                    Arc::clone(&self.stats),
                    self.dispatcher.clone(),
                ))
            })
            .collect();

        match retriever {
            Some(retriever) => {
                let (transfer, completion) = self.new_transfer();
                self.transfers.insert(
                    id,
                    ActiveTransfer {
                        transfer: Arc::clone(&transfer),
                        primary_only: replicate,
                    },
                );
                for invocation in &invocations {
                    invocation.attach_transfer(Arc::clone(&transfer));
                }
                self.registry.add(&invocations);
                let outcome = self.transfer_initial_state(
                    id,
                    &invocations,
                    &transfer,
                    completion,
                    retriever.as_ref(),
                );
                self.transfers.remove(&id);
                for invocation in &invocations {
                    invocation.detach_transfer();
                }
                if let Err(err) = outcome {
                    tracing::warn!(
                        listener = %id,
                        error = %err,
                        "initial state transfer failed, removing listener"
                    );
                    if let Err(cleanup) = self.remove_listener(id).await {
                        tracing::warn!(listener = %id, error = %cleanup, "failed to clean up listener");
                    }
                    return Err(err);
                }
            }
            None => self.registry.add(&invocations),
        }

        tracing::info!(
            listener = %id,
            clustered = settings.is_clustered(),
            include_current_state = transfer_state,
            interests = interests.len(),
            "listener added"
        );
        Ok(id)
    }

    fn index_pipeline(&self, pipeline: EventPipeline<K, V>) -> Result<EventPipeline<K, V>> {
        let Some(filter) = pipeline.filter().cloned() else {
            return Ok(pipeline);
        };
        let Some(kind) = filter.indexing_kind().map(str::to_owned) else {
            return Ok(pipeline);
        };
        let provider = self
            .index_providers
            .iter()
            .find(|provider| provider.kind() == kind)
            .ok_or_else(|| {
                GridError::Registration(format!(
                    "no filter indexing provider registered for {kind}"
                ))
            })?;
        let indexed = provider.index_filter(filter)?;
        tracing::debug!(kind = %kind, "filter routed through indexing provider");
        Ok(pipeline.with_filter(indexed))
    }

    fn new_transfer(
        &self,
    ) -> (
        Arc<dyn QueueingSegmentListener<K, V>>,
        Arc<dyn SegmentCompletionListener>,
    ) {
        if self.config.cache_mode().is_distributed() {
            let transfer = Arc::new(DistributedQueueingSegmentListener::new(Arc::clone(
                &self.topology,
            )));
            let completion: Arc<dyn SegmentCompletionListener> = transfer.clone();
            let queueing: Arc<dyn QueueingSegmentListener<K, V>> = transfer;
            (queueing, completion)
        } else {
            let transfer = Arc::new(QueueingAllSegmentListener::new());
            let completion: Arc<dyn SegmentCompletionListener> = transfer.clone();
            let queueing: Arc<dyn QueueingSegmentListener<K, V>> = transfer;
            (queueing, completion)
        }
    }

    /// Replays the current contents as created events, then releases held
    /// events. Delivery failures do not stop the replay; the first one is
    /// returned.
    fn transfer_initial_state(
        &self,
        id: ListenerId,
        invocations: &Invocations<K, V>,
        transfer: &Arc<dyn QueueingSegmentListener<K, V>>,
        completion: Arc<dyn SegmentCompletionListener>,
        retriever: &dyn EntryRetriever<K, V>,
    ) -> Result<()> {
        let created: Vec<Arc<ListenerInvocation<K, V>>> = invocations
            .iter()
            .filter(|invocation| invocation.event_type() == EventType::Created)
            .cloned()
            .collect();

        let entries = match retriever.retrieve_entries(completion) {
            Ok(entries) => entries,
            Err(err) => {
                if let Err(release) = transfer.transfer_complete() {
                    tracing::warn!(listener = %id, error = %release, "failed to release held events");
                }
                return Err(err);
            }
        };

        let mut first_error: Option<GridError> = None;
        let mut replayed = 0usize;
        for entry in entries {
            let (key, value, metadata) = entry.into_parts();
            match transfer.mark_key_as_processing(&key) {
                KeyState::Unvisited => {
                    self.raise_initial(&created, &key, Some(value), metadata, false, &mut first_error);
                    replayed += 1;
                }
                KeyState::Pending(pending) => {
                    let evaluated = pending.is_evaluated();
                    let (value, metadata) = pending.into_parts();
                    self.raise_initial(&created, &key, value, metadata, evaluated, &mut first_error);
                    replayed += 1;
                }
                KeyState::Visited | KeyState::RemovedDuringTransfer => {
                    tracing::trace!(listener = %id, "skipping already handled key");
                }
            }
            transfer.notified_key(&key);
        }

        let late = transfer.find_created_entries();
        let late_count = late.len();
        for (key, pending) in late {
            let evaluated = pending.is_evaluated();
            let (value, metadata) = pending.into_parts();
            self.raise_initial(&created, &key, value, metadata, evaluated, &mut first_error);
        }

        if let Err(err) = transfer.transfer_complete() {
            first_error.get_or_insert(err);
        }
        tracing::debug!(
            listener = %id,
            entries = replayed,
            created_during_transfer = late_count,
            "initial state delivered"
        );
        first_error.map_or(Ok(()), Err)
    }

    /// Raises the snapshot created event(s) for one key. `evaluated` values
    /// come from forwarded events that already went through the pipeline.
    fn raise_initial(
        &self,
        created: &Invocations<K, V>,
        key: &K,
        value: Option<V>,
        metadata: Option<Metadata>,
        evaluated: bool,
        first_error: &mut Option<GridError>,
    ) {
        for invocation in created {
            let observation = invocation.settings().observation();
            if observation.accepts(true) {
                let pre = CacheEvent::entry(EventType::Created, key.clone(), true);
                Self::replay(invocation, pre, false, first_error);
            }
            if observation.accepts(false) {
                let post = CacheEvent::entry(EventType::Created, key.clone(), false)
                    .with_value(value.clone())
                    .with_metadata(metadata.clone());
                Self::replay(invocation, post, evaluated, first_error);
            }
        }
    }

    fn replay(
        invocation: &Arc<ListenerInvocation<K, V>>,
        event: CacheEvent<K, V>,
        evaluated: bool,
        first_error: &mut Option<GridError>,
    ) {
        let outcome = if evaluated {
            invocation.deliver(event, true)
        } else {
            match invocation.evaluate(event, true) {
                Ok(Some(event)) => invocation.deliver(event, true),
                Ok(None) => Ok(()),
                Err(err) => Err(err),
            }
        };
        if let Err(err) = outcome {
            tracing::warn!(listener = %invocation.id(), error = %err, "initial state delivery failed");
            first_error.get_or_insert(err);
        }
    }

    /// Unregisters a listener. Cluster listeners are removed from every
    /// member before this returns.
    ///
    /// Returns `false` if no listener was registered under `id`.
    #[tracing::instrument(skip_all, fields(cache = %self.config.cache_name(), listener = %id))]
    pub async fn remove_listener(&self, id: ListenerId) -> Result<bool> {
        let removed = self.registry.remove(id);
        self.transfers.remove(&id);
        for invocation in &removed {
            invocation.detach_transfer();
        }
        let cluster = self.cluster_listeners.remove(&id);
        if cluster.is_some() {
            if let Some(helper) = &self.replication {
                helper.remove(id, self.config.removal_timeout()).await?;
            }
        }
        let found = !removed.is_empty() || cluster.is_some();
        if found {
            tracing::info!(clustered = cluster.is_some(), "listener removed");
        } else {
            tracing::debug!("no listener registered under id");
        }
        Ok(found)
    }

    // ---- cluster ----

    /// Delivers events forwarded by a remote member to the local cluster
    /// listener `listener_id`.
    ///
    /// Events were already filtered and converted remotely. A failing
    /// invocation does not stop delivery of the remaining events; the first
    /// failure is returned.
    pub fn notify_cluster_listeners(
        &self,
        events: Vec<CacheEvent<K, V>>,
        listener_id: ListenerId,
    ) -> Result<()> {
        let mut first_error: Option<GridError> = None;
        for event in events {
            let covered = self
                .transfers
                .get(&listener_id)
                .is_some_and(|active| active.transfer.record_event(&event, true));
            if covered {
                self.stats.record_absorbed();
                continue;
            }
            let invocations = self.registry.invocations_for(listener_id, event.event_type());
            if invocations.is_empty() {
                tracing::trace!(
                    listener = %listener_id,
                    event_type = %event.event_type(),
                    "no local invocation for forwarded event"
                );
                continue;
            }
            for invocation in &invocations {
                if let Err(err) = invocation.deliver(event.clone(), false) {
                    tracing::warn!(listener = %listener_id, error = %err, "cluster listener failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Applies a command sent by another member.
    pub fn handle_cluster_command(&self, command: ClusterCommand<K, V>) -> Result<()> {
        if !self.is_running() {
            return Err(GridError::CacheNotStarted(format!(
                "cache {} is not running on {}",
                self.config.cache_name(),
                self.local_member()
            )));
        }
        match command {
            ClusterCommand::InstallListener(descriptor) => {
                self.install_remote_listener(descriptor).map(|_| ())
            }
            ClusterCommand::RemoveListener(id) => {
                self.remove_remote_listener(id);
                Ok(())
            }
        }
    }

    fn install_remote_listener(&self, descriptor: ClusterListenerDescriptor<K, V>) -> Result<bool> {
        let id = descriptor.listener_id();
        let origin = descriptor.origin();
        if origin == self.local_member() || self.registry.contains(id) {
            tracing::debug!(listener = %id, "cluster listener already present");
            return Ok(false);
        }
        let manager = self.event_manager.as_ref().ok_or_else(|| {
            GridError::Registration("remote cluster listeners need a cluster transport".to_string())
        })?;
        match self.remote_listeners.entry(id) {
            Entry::Occupied(_) => {
                tracing::debug!(listener = %id, "cluster listener already present");
                return Ok(false);
            }
            Entry::Vacant(slot) => {
                slot.insert(descriptor.clone());
            }
        }

        let pipeline = descriptor.pipeline().clone();
        let forwarder = RemoteClusterListener::new(descriptor, Arc::clone(manager));
        let (callbacks, settings) = forwarder.into_listener().into_parts();
        let invocations: Vec<Arc<ListenerInvocation<K, V>>> = callbacks
            .into_iter()
            .map(|(event_type, callback)| {
                Arc::new(ListenerInvocation::new(
                    id,
                    event_type,
                    callback,
                    settings,
                    pipeline.clone(),
                    InvocationKind::Immediate,
                    Arc::clone(&self.stats),
                    self.dispatcher.clone(),
                ))
            })
            .collect();
        self.registry.add(&invocations);
        tracing::info!(listener = %id, origin = %origin, "remote cluster listener installed");
        Ok(true)
    }

    fn remove_remote_listener(&self, id: ListenerId) -> bool {
        let known = self.remote_listeners.remove(&id).is_some();
        let removed = !self.registry.remove(id).is_empty();
        if known || removed {
            tracing::info!(listener = %id, "remote cluster listener removed");
        }
        known || removed
    }

    /// Drops remote cluster listeners whose origin is not in `members`.
    ///
    /// Returns the number of listeners removed.
    pub fn on_view_changed(&self, members: &[MemberId]) -> usize {
        let departed: Vec<(ListenerId, MemberId)> = self
            .remote_listeners
            .iter()
            .filter(|entry| !members.contains(&entry.value().origin()))
            .map(|entry| (*entry.key(), entry.value().origin()))
            .collect();
        for (id, origin) in &departed {
            self.remove_remote_listener(*id);
            tracing::info!(listener = %id, origin = %origin, "origin left, cluster listener removed");
        }
        departed.len()
    }

    /// Returns every cluster listener known here, registered locally or
    /// installed for another member, for a joining member to install.
    pub fn cluster_listener_definitions(&self) -> Vec<ClusterListenerDescriptor<K, V>> {
        self.cluster_listeners
            .iter()
            .chain(self.remote_listeners.iter())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Installs definitions fetched from an existing member. Listeners
    /// already present and ones originating here are skipped.
    ///
    /// Returns the number of listeners installed.
    pub fn install_cluster_listeners(
        &self,
        definitions: Vec<ClusterListenerDescriptor<K, V>>,
    ) -> Result<usize> {
        let mut installed = 0;
        for descriptor in definitions {
            if self.install_remote_listener(descriptor)? {
                installed += 1;
            }
        }
        tracing::debug!(installed, "cluster listener definitions applied");
        Ok(installed)
    }
}

impl<K, V> std::fmt::Debug for CacheNotifier<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNotifier")
            .field("config", &self.config)
            .field("status", &NotifierStatus::from_u8(self.status.load(Ordering::Relaxed)))
            .field("cluster_listeners", &self.cluster_listeners.len())
            .field("remote_listeners", &self.remote_listeners.len())
            .finish()
    }
}

/// Builder for [`CacheNotifier`].
pub struct CacheNotifierBuilder<K, V> {
    config: NotifierConfig,
    topology: Option<Arc<dyn Topology<K>>>,
    retriever: Option<Arc<dyn EntryRetriever<K, V>>>,
    transport: Option<Arc<dyn ClusterTransport<K, V>>>,
    index_providers: Vec<Arc<dyn FilterIndexingProvider<K, V>>>,
    runtime: Option<Handle>,
}

impl<K: CacheKey, V: CacheValue> CacheNotifierBuilder<K, V> {
    fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            topology: None,
            retriever: None,
            transport: None,
            index_providers: Vec::new(),
            runtime: None,
        }
    }

    /// Sets the segment and ownership view. Required for clustered caches.
    pub fn topology(mut self, topology: Arc<dyn Topology<K>>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Sets the source of snapshot entries for `include_current_state`.
    pub fn entry_retriever(mut self, retriever: Arc<dyn EntryRetriever<K, V>>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Sets the member-to-member transport used by cluster listeners.
    pub fn transport(mut self, transport: Arc<dyn ClusterTransport<K, V>>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Adds a provider for filters advertising an indexing kind.
    pub fn index_provider(mut self, provider: Arc<dyn FilterIndexingProvider<K, V>>) -> Self {
        self.index_providers.push(provider);
        self
    }

    /// Sets the runtime async listeners run on. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Builds the notifier in [`NotifierStatus::Initializing`] state.
    pub fn build(self) -> Result<CacheNotifier<K, V>> {
        let mode = self.config.cache_mode();
        let topology: Arc<dyn Topology<K>> = match self.topology {
            Some(topology) => topology,
            None if mode.is_clustered() => {
                return Err(GridError::Configuration(format!(
                    "{mode} cache {} needs a topology",
                    self.config.cache_name()
                )))
            }
            None => Arc::new(LocalTopology::new()),
        };
        if mode.is_distributed() && topology.num_segments() != self.config.num_segments() {
            return Err(GridError::Configuration(format!(
                "cache {} is configured with {} segments but its topology has {}",
                self.config.cache_name(),
                self.config.num_segments(),
                topology.num_segments()
            )));
        }
        let dispatcher = if self.config.async_dispatch() {
            self.runtime.or_else(|| Handle::try_current().ok())
        } else {
            None
        };
        if self.config.async_dispatch() && dispatcher.is_none() {
            tracing::debug!("no runtime available, async listeners run on the notifying thread");
        }
        let replication = self
            .transport
            .as_ref()
            .map(|transport| ReplicationHelper::new(Arc::clone(transport), Arc::clone(&topology)));
        let event_manager = self
            .transport
            .map(|transport| Arc::new(ClusterEventManager::new(transport)));

        Ok(CacheNotifier {
            config: self.config,
            topology,
            retriever: self.retriever,
            replication,
            event_manager,
            index_providers: self.index_providers,
            registry: ListenerRegistry::new(),
            cluster_listeners: DashMap::new(),
            remote_listeners: DashMap::new(),
            transfers: DashMap::new(),
            dispatcher,
            stats: Arc::new(ListenerStats::new()),
            status: AtomicU8::new(NotifierStatus::Initializing.as_u8()),
        })
    }
}
