//! Closure-based cache listener definitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use gridnotify_core::Result;

use crate::event::{CacheEvent, EventType};
use crate::listener::{ListenerSettings, Observation};

/// A callback invoked with each event of one type.
///
/// Returning an error from a synchronous listener propagates the error to the
/// operation that raised the event.
pub type EventCallback<K, V> = Arc<dyn Fn(&CacheEvent<K, V>) -> Result<()> + Send + Sync>;

/// A listener made of per-event-type callbacks and registration settings.
///
/// Use [`CacheListener::builder`] to create a new instance.
///
/// # Example
///
/// ```ignore
/// let listener = CacheListener::<String, i32>::builder()
///     .on_created(|event| {
///         println!("created {:?}", event.key());
///         Ok(())
///     })
///     .observation(Observation::Post)
///     .include_current_state(true)
///     .build();
/// let id = notifier.add_listener(listener).await?;
/// ```
pub struct CacheListener<K, V> {
    callbacks: BTreeMap<EventType, EventCallback<K, V>>,
    settings: ListenerSettings,
}

impl<K, V> CacheListener<K, V> {
    /// Creates a new builder for constructing a `CacheListener`.
    pub fn builder() -> CacheListenerBuilder<K, V> {
        CacheListenerBuilder::new()
    }

    /// Returns the registration settings.
    pub fn settings(&self) -> ListenerSettings {
        self.settings
    }

    /// Returns the event types this listener has callbacks for.
    pub fn interests(&self) -> impl Iterator<Item = EventType> + '_ {
        self.callbacks.keys().copied()
    }

    /// Returns `true` if the listener has a callback for `event_type`.
    pub fn is_interested_in(&self, event_type: EventType) -> bool {
        self.callbacks.contains_key(&event_type)
    }

    /// Returns the callback registered for `event_type`.
    pub fn callback(&self, event_type: EventType) -> Option<&EventCallback<K, V>> {
        self.callbacks.get(&event_type)
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<EventType, EventCallback<K, V>>, ListenerSettings) {
        (self.callbacks, self.settings)
    }
}

impl<K, V> Clone for CacheListener<K, V> {
    fn clone(&self) -> Self {
        Self {
            callbacks: self.callbacks.clone(),
            settings: self.settings,
        }
    }
}

impl<K, V> std::fmt::Debug for CacheListener<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheListener")
            .field("interests", &self.callbacks.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Builder for creating [`CacheListener`] instances.
pub struct CacheListenerBuilder<K, V> {
    callbacks: BTreeMap<EventType, EventCallback<K, V>>,
    settings: ListenerSettings,
}

impl<K, V> CacheListenerBuilder<K, V> {
    fn new() -> Self {
        Self {
            callbacks: BTreeMap::new(),
            settings: ListenerSettings::default(),
        }
    }

    /// Sets the callback for one event type, replacing any earlier one.
    pub fn on<F>(mut self, event_type: EventType, f: F) -> Self
    where
        F: Fn(&CacheEvent<K, V>) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.insert(event_type, Arc::new(f));
        self
    }

    /// Sets one shared callback for several event types.
    pub fn on_types<F>(mut self, event_types: impl IntoIterator<Item = EventType>, f: F) -> Self
    where
        F: Fn(&CacheEvent<K, V>) -> Result<()> + Send + Sync + 'static,
    {
        let callback: EventCallback<K, V> = Arc::new(f);
        for event_type in event_types {
            self.callbacks.insert(event_type, Arc::clone(&callback));
        }
        self
    }

    /// Sets the handler for entry created events.
    pub fn on_created<F>(self, f: F) -> Self
    where
        F: Fn(&CacheEvent<K, V>) -> Result<()> + Send + Sync + 'static,
    {
        self.on(EventType::Created, f)
    }

    /// Sets the handler for entry modified events.
    pub fn on_modified<F>(self, f: F) -> Self
    where
        F: Fn(&CacheEvent<K, V>) -> Result<()> + Send + Sync + 'static,
    {
        self.on(EventType::Modified, f)
    }

    /// Sets the handler for entry removed events.
    pub fn on_removed<F>(self, f: F) -> Self
    where
        F: Fn(&CacheEvent<K, V>) -> Result<()> + Send + Sync + 'static,
    {
        self.on(EventType::Removed, f)
    }

    /// Sets the handler for entry expired events.
    pub fn on_expired<F>(self, f: F) -> Self
    where
        F: Fn(&CacheEvent<K, V>) -> Result<()> + Send + Sync + 'static,
    {
        self.on(EventType::Expired, f)
    }

    /// Sets the handler for transaction completion events.
    pub fn on_transaction_completed<F>(self, f: F) -> Self
    where
        F: Fn(&CacheEvent<K, V>) -> Result<()> + Send + Sync + 'static,
    {
        self.on(EventType::TransactionCompleted, f)
    }

    /// Sets the handler for topology change events.
    pub fn on_topology_changed<F>(self, f: F) -> Self
    where
        F: Fn(&CacheEvent<K, V>) -> Result<()> + Send + Sync + 'static,
    {
        self.on(EventType::TopologyChanged, f)
    }

    /// Sets which mutation phase the listener observes.
    pub fn observation(mut self, observation: Observation) -> Self {
        self.settings = self.settings.with_observation(observation);
        self
    }

    /// Makes the listener cluster-wide.
    pub fn clustered(mut self, clustered: bool) -> Self {
        self.settings = self.settings.with_clustered(clustered);
        self
    }

    /// Restricts delivery to the primary owner of each key.
    pub fn only_primary(mut self, only_primary: bool) -> Self {
        self.settings = self.settings.with_only_primary(only_primary);
        self
    }

    /// Requests a snapshot of existing entries as created events.
    pub fn include_current_state(mut self, include: bool) -> Self {
        self.settings = self.settings.with_include_current_state(include);
        self
    }

    /// Chooses between invocation on the notifying thread (`true`) and
    /// off-thread dispatch.
    pub fn sync(mut self, sync: bool) -> Self {
        self.settings = self.settings.with_sync(sync);
        self
    }

    /// Builds the [`CacheListener`].
    pub fn build(self) -> CacheListener<K, V> {
        CacheListener {
            callbacks: self.callbacks,
            settings: self.settings,
        }
    }
}

impl<K, V> Default for CacheListenerBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for CacheListenerBuilder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheListenerBuilder")
            .field("settings", &self.settings)
            .finish()
    }
}
