//! Cache event model.
//!
//! A [`CacheEvent`] is built once per raw notification call and is not mutated
//! after it has been handed to listeners. Converters produce a copy with a
//! replaced value through [`CacheEvent::with_value`].

use std::fmt::Debug;
use std::hash::Hash;

use gridnotify_core::{Metadata, MemberId, TransactionId};

/// Bound for cache keys flowing through the notifier.
pub trait CacheKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bound for cache values flowing through the notifier.
pub trait CacheValue: Clone + Debug + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Debug + Send + Sync + 'static {}

/// Type of a cache event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// An entry was created.
    Created,
    /// An existing entry was updated.
    Modified,
    /// An entry was removed.
    Removed,
    /// An entry was read.
    Visited,
    /// An entry expired.
    Expired,
    /// An entry was loaded back from a cache store after passivation.
    Activated,
    /// An entry was written to a cache store and dropped from memory.
    Passivated,
    /// An entry was loaded from a cache loader.
    Loaded,
    /// An entry was invalidated.
    Invalidated,
    /// An entry was evicted.
    Evicted,
    /// A transaction was registered with the cache.
    TransactionRegistered,
    /// A transaction completed (committed or rolled back).
    TransactionCompleted,
    /// The cluster topology changed.
    TopologyChanged,
    /// Data was rehashed after a topology change.
    DataRehashed,
    /// The availability of the cache partition changed.
    PartitionStatusChanged,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 15] = [
        EventType::Created,
        EventType::Modified,
        EventType::Removed,
        EventType::Visited,
        EventType::Expired,
        EventType::Activated,
        EventType::Passivated,
        EventType::Loaded,
        EventType::Invalidated,
        EventType::Evicted,
        EventType::TransactionRegistered,
        EventType::TransactionCompleted,
        EventType::TopologyChanged,
        EventType::DataRehashed,
        EventType::PartitionStatusChanged,
    ];

    /// Returns `true` for events that carry a key.
    pub fn is_entry_event(self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::Modified
                | Self::Removed
                | Self::Visited
                | Self::Expired
                | Self::Activated
                | Self::Passivated
                | Self::Loaded
                | Self::Invalidated
                | Self::Evicted
        )
    }

    /// Returns `true` for events that change whether or with which value an
    /// entry exists.
    pub fn changes_entry_state(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Modified | Self::Removed | Self::Expired
        )
    }

    /// Returns `true` for events that end the existence of an entry.
    pub fn is_removal(self) -> bool {
        matches!(self, Self::Removed | Self::Expired)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "CACHE_ENTRY_CREATED",
            Self::Modified => "CACHE_ENTRY_MODIFIED",
            Self::Removed => "CACHE_ENTRY_REMOVED",
            Self::Visited => "CACHE_ENTRY_VISITED",
            Self::Expired => "CACHE_ENTRY_EXPIRED",
            Self::Activated => "CACHE_ENTRY_ACTIVATED",
            Self::Passivated => "CACHE_ENTRY_PASSIVATED",
            Self::Loaded => "CACHE_ENTRY_LOADED",
            Self::Invalidated => "CACHE_ENTRY_INVALIDATED",
            Self::Evicted => "CACHE_ENTRY_EVICTED",
            Self::TransactionRegistered => "TRANSACTION_REGISTERED",
            Self::TransactionCompleted => "TRANSACTION_COMPLETED",
            Self::TopologyChanged => "TOPOLOGY_CHANGED",
            Self::DataRehashed => "DATA_REHASHED",
            Self::PartitionStatusChanged => "PARTITION_STATUS_CHANGED",
        };
        f.write_str(name)
    }
}

/// Availability of the local partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvailabilityMode {
    /// Reads and writes are allowed.
    Available,
    /// The partition lost members and only serves a degraded view.
    Degraded,
}

/// Event-type specific contents of a [`CacheEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload<K, V> {
    /// An entry-level event.
    Entry {
        /// The affected key.
        key: K,
        /// The value after the change (or the current value for pre events
        /// of non-mutating types).
        value: Option<V>,
        /// The value before the change.
        old_value: Option<V>,
        /// Metadata after the change.
        metadata: Option<Metadata>,
        /// Metadata before the change.
        old_metadata: Option<Metadata>,
    },
    /// Transaction boundary.
    Transaction {
        /// Whether the transaction committed. Always `true` for registration.
        successful: bool,
    },
    /// Topology change or rehash.
    Topology {
        /// Members before the change.
        old_members: Vec<MemberId>,
        /// Members after the change.
        new_members: Vec<MemberId>,
        /// Topology generation.
        topology_id: u64,
    },
    /// Partition availability change.
    PartitionStatus {
        /// The new availability mode.
        mode: AvailabilityMode,
    },
}

/// A notification delivered to cache listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent<K, V> {
    event_type: EventType,
    pre: bool,
    origin_local: bool,
    transaction: Option<TransactionId>,
    retried: bool,
    payload: EventPayload<K, V>,
}

impl<K, V> CacheEvent<K, V> {
    /// Creates an entry event with no values attached.
    pub fn entry(event_type: EventType, key: K, pre: bool) -> Self {
        debug_assert!(event_type.is_entry_event());
        Self {
            event_type,
            pre,
            origin_local: true,
            transaction: None,
            retried: false,
            payload: EventPayload::Entry {
                key,
                value: None,
                old_value: None,
                metadata: None,
                old_metadata: None,
            },
        }
    }

    /// Creates a transaction registration event.
    pub fn transaction_registered(transaction: TransactionId, origin_local: bool) -> Self {
        Self {
            event_type: EventType::TransactionRegistered,
            pre: false,
            origin_local,
            transaction: Some(transaction),
            retried: false,
            payload: EventPayload::Transaction { successful: true },
        }
    }

    /// Creates a transaction completion event.
    pub fn transaction_completed(
        transaction: TransactionId,
        successful: bool,
        origin_local: bool,
    ) -> Self {
        Self {
            event_type: EventType::TransactionCompleted,
            pre: false,
            origin_local,
            transaction: Some(transaction),
            retried: false,
            payload: EventPayload::Transaction { successful },
        }
    }

    /// Creates a topology event. `event_type` must be
    /// [`EventType::TopologyChanged`] or [`EventType::DataRehashed`].
    pub fn topology(
        event_type: EventType,
        old_members: Vec<MemberId>,
        new_members: Vec<MemberId>,
        topology_id: u64,
        pre: bool,
    ) -> Self {
        debug_assert!(matches!(
            event_type,
            EventType::TopologyChanged | EventType::DataRehashed
        ));
        Self {
            event_type,
            pre,
            origin_local: true,
            transaction: None,
            retried: false,
            payload: EventPayload::Topology {
                old_members,
                new_members,
                topology_id,
            },
        }
    }

    /// Creates a partition availability event.
    pub fn partition_status_changed(mode: AvailabilityMode, pre: bool) -> Self {
        Self {
            event_type: EventType::PartitionStatusChanged,
            pre,
            origin_local: true,
            transaction: None,
            retried: false,
            payload: EventPayload::PartitionStatus { mode },
        }
    }

    /// Sets the new value of an entry event.
    pub fn with_value(mut self, new_value: Option<V>) -> Self {
        if let EventPayload::Entry { ref mut value, .. } = self.payload {
            *value = new_value;
        }
        self
    }

    /// Sets the previous value of an entry event.
    pub fn with_old_value(mut self, previous: Option<V>) -> Self {
        if let EventPayload::Entry {
            ref mut old_value, ..
        } = self.payload
        {
            *old_value = previous;
        }
        self
    }

    /// Sets the metadata of an entry event.
    pub fn with_metadata(mut self, new_metadata: Option<Metadata>) -> Self {
        if let EventPayload::Entry {
            ref mut metadata, ..
        } = self.payload
        {
            *metadata = new_metadata;
        }
        self
    }

    /// Sets the previous metadata of an entry event.
    pub fn with_old_metadata(mut self, previous: Option<Metadata>) -> Self {
        if let EventPayload::Entry {
            ref mut old_metadata,
            ..
        } = self.payload
        {
            *old_metadata = previous;
        }
        self
    }

    /// Sets the owning transaction.
    pub fn with_transaction(mut self, transaction: Option<TransactionId>) -> Self {
        self.transaction = transaction;
        self
    }

    /// Sets whether the mutation originated on this member.
    pub fn with_origin_local(mut self, origin_local: bool) -> Self {
        self.origin_local = origin_local;
        self
    }

    /// Sets whether the command producing this event was retried.
    pub fn with_retried(mut self, retried: bool) -> Self {
        self.retried = retried;
        self
    }

    /// Returns the event type.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Returns `true` if the event is raised before the change is applied.
    pub fn is_pre(&self) -> bool {
        self.pre
    }

    /// Returns `true` if the mutation originated on this member.
    pub fn is_origin_local(&self) -> bool {
        self.origin_local
    }

    /// Returns the owning transaction, if any.
    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    /// Returns `true` if the command producing this event was retried.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Returns the event payload.
    pub fn payload(&self) -> &EventPayload<K, V> {
        &self.payload
    }

    /// Returns the key of an entry event.
    pub fn key(&self) -> Option<&K> {
        match &self.payload {
            EventPayload::Entry { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Returns the new value of an entry event.
    pub fn value(&self) -> Option<&V> {
        match &self.payload {
            EventPayload::Entry { value, .. } => value.as_ref(),
            _ => None,
        }
    }

    /// Returns the previous value of an entry event.
    pub fn old_value(&self) -> Option<&V> {
        match &self.payload {
            EventPayload::Entry { old_value, .. } => old_value.as_ref(),
            _ => None,
        }
    }

    /// Returns the metadata of an entry event.
    pub fn metadata(&self) -> Option<&Metadata> {
        match &self.payload {
            EventPayload::Entry { metadata, .. } => metadata.as_ref(),
            _ => None,
        }
    }

    /// Returns the previous metadata of an entry event.
    pub fn old_metadata(&self) -> Option<&Metadata> {
        match &self.payload {
            EventPayload::Entry { old_metadata, .. } => old_metadata.as_ref(),
            _ => None,
        }
    }

    /// Returns whether a transaction event reports success.
    pub fn is_transaction_successful(&self) -> Option<bool> {
        match &self.payload {
            EventPayload::Transaction { successful } => Some(*successful),
            _ => None,
        }
    }
}

impl<K: Clone, V: Clone> CacheEvent<K, V> {
    /// Returns a copy of this event whose value is replaced, leaving every
    /// other field intact.
    pub fn cloned_with_value(&self, value: Option<V>) -> Self {
        self.clone().with_value(value)
    }
}
