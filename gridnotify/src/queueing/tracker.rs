//! Per-key visit tracking shared by the queueing strategies.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gridnotify_core::Metadata;

use crate::event::{CacheEvent, CacheKey, CacheValue};
use crate::queueing::{KeyState, PendingEntry};

const PHASE_ACTIVE: u8 = 0;
const PHASE_COMPLETING: u8 = 1;
const PHASE_COMPLETE: u8 = 2;

/// Lifecycle of one transfer.
///
/// `Completing` is entered when the pending entries are collected after the
/// iteration. From then on no new key is absorbed, only already pending keys
/// may still be refreshed before they are promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferPhase {
    Active,
    Completing,
    Complete,
}

#[derive(Debug, Clone)]
enum Slot<V> {
    Pending(PendingEntry<V>),
    Visited,
    Removed,
}

/// A slot plus a unique stamp. Compare-and-swap compares stamps only, so
/// values never need to be comparable.
#[derive(Debug, Clone)]
struct Tracked<V> {
    stamp: u64,
    slot: Slot<V>,
}

/// What an absorbed event leaves behind for its key.
enum Update<V> {
    Pending(PendingEntry<V>),
    Removed,
}

/// Concurrent map from key to visit state. A key missing from the map is
/// unvisited.
pub(crate) struct KeyTracker<K, V> {
    states: DashMap<K, Tracked<V>>,
    phase: AtomicU8,
    stamps: AtomicU64,
}

impl<K: CacheKey, V: CacheValue> KeyTracker<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            states: DashMap::new(),
            phase: AtomicU8::new(PHASE_ACTIVE),
            stamps: AtomicU64::new(0),
        }
    }

    pub(crate) fn phase(&self) -> TransferPhase {
        match self.phase.load(Ordering::Acquire) {
            PHASE_ACTIVE => TransferPhase::Active,
            PHASE_COMPLETING => TransferPhase::Completing,
            _ => TransferPhase::Complete,
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.phase() == TransferPhase::Complete
    }

    fn tracked(&self, slot: Slot<V>) -> Tracked<V> {
        Tracked {
            stamp: self.stamps.fetch_add(1, Ordering::Relaxed),
            slot,
        }
    }

    /// Marks `key` as visited and returns what it was before.
    pub(crate) fn mark_visited(&self, key: &K) -> KeyState<V> {
        let visited = self.tracked(Slot::Visited);
        match self.states.insert(key.clone(), visited) {
            None => KeyState::Unvisited,
            Some(previous) => match previous.slot {
                Slot::Pending(entry) => KeyState::Pending(entry),
                Slot::Visited => KeyState::Visited,
                Slot::Removed => KeyState::RemovedDuringTransfer,
            },
        }
    }

    /// Tries to fold a live event into the tracked state.
    ///
    /// Returns `true` if the event is absorbed, in which case the caller must
    /// neither queue nor deliver it. Only entry mutations are absorbed. A pre
    /// event for a key not yet visited is absorbed without changing state,
    /// since the matching post event carries the value that matters.
    pub(crate) fn absorb(&self, event: &CacheEvent<K, V>, evaluated: bool) -> bool {
        if !event.event_type().changes_entry_state() || self.phase() != TransferPhase::Active {
            return false;
        }
        let Some(key) = event.key() else {
            return false;
        };
        if event.is_pre() {
            return !matches!(
                self.states.get(key).map(|t| matches!(t.slot, Slot::Visited)),
                Some(true)
            );
        }
        let update = if event.event_type().is_removal() {
            Update::Removed
        } else {
            Update::Pending(PendingEntry::new(
                event.value().cloned(),
                event.metadata().cloned(),
                evaluated,
            ))
        };
        self.add_event(key, update)
    }

    fn add_event(&self, key: &K, update: Update<V>) -> bool {
        let replacement = self.tracked(match update {
            Update::Pending(entry) => Slot::Pending(entry),
            Update::Removed => Slot::Removed,
        });
        loop {
            let phase = self.phase();
            if phase == TransferPhase::Complete {
                return false;
            }
            let current = self.states.get(key).map(|t| {
                let refreshable = match t.slot {
                    Slot::Pending(_) => true,
                    Slot::Removed => phase == TransferPhase::Active,
                    Slot::Visited => false,
                };
                (t.stamp, refreshable)
            });
            match current {
                None => {
                    if phase != TransferPhase::Active {
                        return false;
                    }
                    if !self.put_if_absent(key, replacement.clone()) {
                        continue;
                    }
                    if self.phase() == TransferPhase::Active {
                        return true;
                    }
                    // Collection may have started before the insert became
                    // visible. Take the entry back unless it was already
                    // promoted or superseded.
                    let stamp = replacement.stamp;
                    return self
                        .states
                        .remove_if(key, |_, t| t.stamp == stamp)
                        .is_none();
                }
                Some((_, false)) => return false,
                Some((stamp, true)) => {
                    if self.compare_and_set(key, stamp, replacement.clone()) {
                        return true;
                    }
                }
            }
        }
    }

    fn put_if_absent(&self, key: &K, value: Tracked<V>) -> bool {
        match self.states.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(value);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    fn compare_and_set(&self, key: &K, expected: u64, value: Tracked<V>) -> bool {
        match self.states.get_mut(key) {
            Some(mut current) if current.stamp == expected => {
                *current = value;
                true
            }
            _ => false,
        }
    }

    /// Enters the completing phase and promotes every pending key to visited,
    /// returning the values they held.
    pub(crate) fn take_pending(&self) -> Vec<(K, PendingEntry<V>)> {
        let _ = self.phase.compare_exchange(
            PHASE_ACTIVE,
            PHASE_COMPLETING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        let candidates: Vec<(K, u64)> = self
            .states
            .iter()
            .filter(|t| matches!(t.value().slot, Slot::Pending(_)))
            .map(|t| (t.key().clone(), t.value().stamp))
            .collect();

        let mut created = Vec::with_capacity(candidates.len());
        for (key, mut stamp) in candidates {
            loop {
                let Some(mut current) = self.states.get_mut(&key) else {
                    break;
                };
                if current.stamp != stamp {
                    if matches!(current.slot, Slot::Pending(_)) {
                        stamp = current.stamp;
                        drop(current);
                        continue;
                    }
                    break;
                }
                let visited = Tracked {
                    stamp: self.stamps.fetch_add(1, Ordering::Relaxed),
                    slot: Slot::Visited,
                };
                if let Slot::Pending(entry) = std::mem::replace(&mut *current, visited).slot {
                    created.push((key.clone(), entry));
                }
                break;
            }
        }
        created
    }

    /// Marks the transfer complete and drops all tracked state.
    pub(crate) fn complete(&self) {
        self.phase.store(PHASE_COMPLETE, Ordering::Release);
        self.states.clear();
    }

    #[cfg(test)]
    pub(crate) fn tracked_len(&self) -> usize {
        self.states.len()
    }
}

impl<V> PendingEntry<V> {
    pub(crate) fn new(value: Option<V>, metadata: Option<Metadata>, evaluated: bool) -> Self {
        Self {
            value,
            metadata,
            evaluated,
        }
    }
}
