//! Cluster membership and key ownership.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{PoisonError, RwLock};

use gridnotify_core::MemberId;

/// Answers membership and ownership queries for the current topology.
///
/// Implementations must be cheap to call; the notifier consults them on
/// every entry notification.
pub trait Topology<K>: Send + Sync {
    /// Returns the local member.
    fn local_member(&self) -> MemberId;

    /// Returns the current members, in join order.
    fn members(&self) -> Vec<MemberId>;

    /// Returns the number of hash segments.
    fn num_segments(&self) -> usize;

    /// Maps a key to its segment.
    fn segment_of(&self, key: &K) -> usize;

    /// Returns the owners of a segment, primary first.
    fn owners(&self, segment: usize) -> Vec<MemberId>;

    /// Returns the primary owner of a segment.
    fn primary_owner(&self, segment: usize) -> Option<MemberId> {
        self.owners(segment).first().copied()
    }

    /// Returns `true` if the local member owns `key`.
    fn is_local_owner(&self, key: &K) -> bool {
        let local = self.local_member();
        self.owners(self.segment_of(key)).contains(&local)
    }

    /// Returns `true` if the local member is the primary owner of `key`.
    fn is_local_primary(&self, key: &K) -> bool {
        self.primary_owner(self.segment_of(key)) == Some(self.local_member())
    }
}

/// Topology of a single, non-clustered member.
#[derive(Debug, Clone, Copy)]
pub struct LocalTopology {
    member: MemberId,
}

impl LocalTopology {
    /// Creates a topology for a fresh local member.
    pub fn new() -> Self {
        Self {
            member: MemberId::new(),
        }
    }

    /// Creates a topology for a given member.
    pub fn with_member(member: MemberId) -> Self {
        Self { member }
    }
}

impl Default for LocalTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Topology<K> for LocalTopology {
    fn local_member(&self) -> MemberId {
        self.member
    }

    fn members(&self) -> Vec<MemberId> {
        vec![self.member]
    }

    fn num_segments(&self) -> usize {
        1
    }

    fn segment_of(&self, _key: &K) -> usize {
        0
    }

    fn owners(&self, _segment: usize) -> Vec<MemberId> {
        vec![self.member]
    }
}

/// Hash-based topology with round-robin segment ownership.
///
/// Segment `s` is owned by `num_owners` consecutive members starting at
/// member `s % members.len()`. The member list can be replaced when the view
/// changes.
#[derive(Debug)]
pub struct HashTopology<K> {
    local: MemberId,
    members: RwLock<Vec<MemberId>>,
    num_segments: usize,
    num_owners: usize,
    _key: PhantomData<fn(&K)>,
}

impl<K> HashTopology<K> {
    /// Creates a topology where the first member is the local one.
    pub fn new(members: Vec<MemberId>, num_segments: usize, num_owners: usize) -> Self {
        let local = members.first().copied().unwrap_or_default();
        Self::for_member(local, members, num_segments, num_owners)
    }

    /// Creates a topology as seen from `local`.
    pub fn for_member(
        local: MemberId,
        members: Vec<MemberId>,
        num_segments: usize,
        num_owners: usize,
    ) -> Self {
        Self {
            local,
            members: RwLock::new(members),
            num_segments: num_segments.max(1),
            num_owners: num_owners.max(1),
            _key: PhantomData,
        }
    }

    /// Replaces the member list.
    pub fn set_members(&self, members: Vec<MemberId>) {
        *self.members.write().unwrap_or_else(PoisonError::into_inner) = members;
    }
}

impl<K: Hash> Topology<K> for HashTopology<K> {
    fn local_member(&self) -> MemberId {
        self.local
    }

    fn members(&self) -> Vec<MemberId> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn num_segments(&self) -> usize {
        self.num_segments
    }

    fn segment_of(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.num_segments as u64) as usize
    }

    fn owners(&self, segment: usize) -> Vec<MemberId> {
        let members = self.members.read().unwrap_or_else(PoisonError::into_inner);
        if members.is_empty() {
            return Vec::new();
        }
        let count = self.num_owners.min(members.len());
        (0..count)
            .map(|i| members[(segment + i) % members.len()])
            .collect()
    }
}
