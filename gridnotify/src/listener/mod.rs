//! Listener definitions, filters and per-registration invocation wrappers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod cache_listener;
mod filter;
mod invocation;
pub(crate) mod registry;

pub use cache_listener::{CacheListener, CacheListenerBuilder, EventCallback};
pub use filter::{
    CacheEventConverter, CacheEventFilter, CacheEventFilterConverter, EventPipeline,
    FilterConverted, FilterIndexingProvider,
};
pub use invocation::{InvocationKind, ListenerInvocation};

/// Unique identifier for a listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new unique listener ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a listener ID from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Which phase of a mutation a listener wants to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Observation {
    /// Only events raised before the change is applied.
    Pre,
    /// Only events raised after the change is applied.
    #[default]
    Post,
    /// Both phases.
    Both,
}

impl Observation {
    /// Returns `true` if an event with the given phase should be delivered.
    pub fn accepts(self, pre: bool) -> bool {
        match self {
            Self::Pre => pre,
            Self::Post => !pre,
            Self::Both => true,
        }
    }
}

/// Registration settings declared by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSettings {
    observation: Observation,
    clustered: bool,
    only_primary: bool,
    include_current_state: bool,
    sync: bool,
}

impl ListenerSettings {
    /// Returns the observation phase.
    pub fn observation(&self) -> Observation {
        self.observation
    }

    /// Returns `true` for cluster-wide listeners.
    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    /// Returns `true` if the listener only wants events on the primary owner
    /// of the key.
    pub fn is_only_primary(&self) -> bool {
        self.only_primary
    }

    /// Returns `true` if the listener first receives a snapshot of the
    /// current contents as created events.
    pub fn includes_current_state(&self) -> bool {
        self.include_current_state
    }

    /// Returns `true` if the listener is invoked on the notifying thread.
    pub fn is_sync(&self) -> bool {
        self.sync
    }

    pub(crate) fn with_observation(mut self, observation: Observation) -> Self {
        self.observation = observation;
        self
    }

    pub(crate) fn with_clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    pub(crate) fn with_only_primary(mut self, only_primary: bool) -> Self {
        self.only_primary = only_primary;
        self
    }

    pub(crate) fn with_include_current_state(mut self, include: bool) -> Self {
        self.include_current_state = include;
        self
    }

    pub(crate) fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            observation: Observation::Both,
            clustered: false,
            only_primary: false,
            include_current_state: false,
            sync: true,
        }
    }
}

/// Counters shared by every invocation registered on a notifier.
#[derive(Debug, Default)]
pub struct ListenerStats {
    delivered: AtomicU64,
    queued: AtomicU64,
    absorbed: AtomicU64,
    errors: AtomicU64,
}

impl ListenerStats {
    /// Creates new listener statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the delivered counter.
    pub fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the counter of events queued behind a state transfer.
    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the counter of events folded into a pending snapshot entry.
    pub fn record_absorbed(&self) {
        self.absorbed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the error counter.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of callbacks invoked.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Returns the number of events queued behind a state transfer.
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Returns the number of events absorbed into a pending snapshot entry.
    pub fn absorbed(&self) -> u64 {
        self.absorbed.load(Ordering::Relaxed)
    }

    /// Returns the number of errors encountered.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_id_uniqueness() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_listener_id_display() {
        let id = ListenerId::new();
        assert!(id.to_string().starts_with("listener-"));
        assert_eq!(ListenerId::from_uuid(id.as_uuid()), id);
    }

    #[test]
    fn test_observation_accepts() {
        assert!(Observation::Pre.accepts(true));
        assert!(!Observation::Pre.accepts(false));
        assert!(Observation::Post.accepts(false));
        assert!(!Observation::Post.accepts(true));
        assert!(Observation::Both.accepts(true));
        assert!(Observation::Both.accepts(false));
    }

    #[test]
    fn test_default_settings() {
        let settings = ListenerSettings::default();
        assert_eq!(settings.observation(), Observation::Both);
        assert!(!settings.is_clustered());
        assert!(!settings.is_only_primary());
        assert!(!settings.includes_current_state());
        assert!(settings.is_sync());
    }

    #[test]
    fn test_listener_stats() {
        let stats = ListenerStats::new();
        assert_eq!(stats.delivered(), 0);

        stats.record_delivery();
        stats.record_delivery();
        stats.record_queued();
        stats.record_absorbed();
        stats.record_error();

        assert_eq!(stats.delivered(), 2);
        assert_eq!(stats.queued(), 1);
        assert_eq!(stats.absorbed(), 1);
        assert_eq!(stats.errors(), 1);
    }

    #[test]
    fn test_listener_id_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ListenerId>();
        assert_send_sync::<ListenerStats>();
    }
}
