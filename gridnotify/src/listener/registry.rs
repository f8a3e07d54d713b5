//! Copy-on-write invocation lists, one per event type.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::event::{CacheKey, CacheValue, EventType};
use crate::listener::{ListenerId, ListenerInvocation};

type InvocationList<K, V> = Arc<Vec<Arc<ListenerInvocation<K, V>>>>;

/// Notification paths take a snapshot of the list for their event type and
/// iterate it without holding a lock, so registration changes never block or
/// disturb an in-flight notification.
pub(crate) struct ListenerRegistry<K, V> {
    lists: HashMap<EventType, RwLock<InvocationList<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> ListenerRegistry<K, V> {
    pub(crate) fn new() -> Self {
        let lists = EventType::ALL
            .iter()
            .map(|event_type| (*event_type, RwLock::new(Arc::new(Vec::new()))))
            .collect();
        Self { lists }
    }

    pub(crate) fn snapshot(&self, event_type: EventType) -> InvocationList<K, V> {
        self.lists
            .get(&event_type)
            .map(|list| Arc::clone(&list.read().unwrap_or_else(PoisonError::into_inner)))
            .unwrap_or_default()
    }

    pub(crate) fn add(&self, invocations: &[Arc<ListenerInvocation<K, V>>]) {
        for invocation in invocations {
            if let Some(list) = self.lists.get(&invocation.event_type()) {
                let mut guard = list.write().unwrap_or_else(PoisonError::into_inner);
                let mut updated = Vec::with_capacity(guard.len() + 1);
                updated.extend(guard.iter().cloned());
                updated.push(Arc::clone(invocation));
                *guard = Arc::new(updated);
            }
        }
    }

    /// Removes every invocation of `id` and returns them.
    pub(crate) fn remove(&self, id: ListenerId) -> Vec<Arc<ListenerInvocation<K, V>>> {
        let mut removed = Vec::new();
        for list in self.lists.values() {
            let mut guard = list.write().unwrap_or_else(PoisonError::into_inner);
            if !guard.iter().any(|inv| inv.id() == id) {
                continue;
            }
            let (gone, kept): (Vec<_>, Vec<_>) =
                guard.iter().cloned().partition(|inv| inv.id() == id);
            removed.extend(gone);
            *guard = Arc::new(kept);
        }
        removed
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.lists.values().any(|list| {
            list.read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(|inv| inv.id() == id)
        })
    }

    pub(crate) fn invocations_for(
        &self,
        id: ListenerId,
        event_type: EventType,
    ) -> Vec<Arc<ListenerInvocation<K, V>>> {
        self.snapshot(event_type)
            .iter()
            .filter(|inv| inv.id() == id)
            .cloned()
            .collect()
    }

    pub(crate) fn has_listener(&self, event_type: EventType) -> bool {
        !self.snapshot(event_type).is_empty()
    }

    /// Returns the distinct registration IDs in first-registered order.
    pub(crate) fn listener_ids(&self) -> Vec<ListenerId> {
        let mut ids = Vec::new();
        for event_type in EventType::ALL {
            for inv in self.snapshot(event_type).iter() {
                if !ids.contains(&inv.id()) {
                    ids.push(inv.id());
                }
            }
        }
        ids
    }

    pub(crate) fn clear(&self) {
        for list in self.lists.values() {
            *list.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());
        }
    }
}
