//! Cluster listener replication and remote event forwarding.
//!
//! A cluster listener lives on one member (its origin). In a distributed
//! cache every other member runs a [`RemoteClusterListener`] for it, which
//! forwards the events it sees as primary owner back to the origin through
//! the [`ClusterEventManager`].

use async_trait::async_trait;
use gridnotify_core::{MemberId, Result};

use crate::event::{CacheEvent, EventType};
use crate::listener::{EventPipeline, ListenerId};

mod event_manager;
mod remote_listener;
mod replication;

pub use event_manager::ClusterEventManager;
pub use remote_listener::RemoteClusterListener;
pub(crate) use replication::ReplicationHelper;

/// What a remote member needs to install a cluster listener for its origin.
pub struct ClusterListenerDescriptor<K, V> {
    listener_id: ListenerId,
    origin: MemberId,
    interests: Vec<EventType>,
    pipeline: EventPipeline<K, V>,
    sync: bool,
}

impl<K, V> ClusterListenerDescriptor<K, V> {
    /// Creates a descriptor.
    pub fn new(
        listener_id: ListenerId,
        origin: MemberId,
        interests: Vec<EventType>,
        pipeline: EventPipeline<K, V>,
        sync: bool,
    ) -> Self {
        Self {
            listener_id,
            origin,
            interests,
            pipeline,
            sync,
        }
    }

    /// Returns the listener ID shared by the origin and all remote copies.
    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    /// Returns the member the listener was registered on.
    pub fn origin(&self) -> MemberId {
        self.origin
    }

    /// Returns the event types the listener handles.
    pub fn interests(&self) -> &[EventType] {
        &self.interests
    }

    /// Returns the filter and converter evaluated on the remote member.
    pub fn pipeline(&self) -> &EventPipeline<K, V> {
        &self.pipeline
    }

    /// Returns `true` if the origin listener is synchronous.
    pub fn is_sync(&self) -> bool {
        self.sync
    }
}

impl<K, V> Clone for ClusterListenerDescriptor<K, V> {
    fn clone(&self) -> Self {
        Self {
            listener_id: self.listener_id,
            origin: self.origin,
            interests: self.interests.clone(),
            pipeline: self.pipeline.clone(),
            sync: self.sync,
        }
    }
}

impl<K, V> std::fmt::Debug for ClusterListenerDescriptor<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterListenerDescriptor")
            .field("listener_id", &self.listener_id)
            .field("origin", &self.origin)
            .field("interests", &self.interests)
            .field("pipeline", &self.pipeline)
            .field("sync", &self.sync)
            .finish()
    }
}

/// Commands exchanged between members to manage cluster listeners.
pub enum ClusterCommand<K, V> {
    /// Install a remote copy of a cluster listener.
    InstallListener(ClusterListenerDescriptor<K, V>),
    /// Remove every copy of a cluster listener.
    RemoveListener(ListenerId),
}

impl<K, V> ClusterCommand<K, V> {
    /// Returns the listener the command refers to.
    pub fn listener_id(&self) -> ListenerId {
        match self {
            Self::InstallListener(descriptor) => descriptor.listener_id(),
            Self::RemoveListener(id) => *id,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::InstallListener(_) => "install-listener",
            Self::RemoveListener(_) => "remove-listener",
        }
    }
}

impl<K, V> Clone for ClusterCommand<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::InstallListener(descriptor) => Self::InstallListener(descriptor.clone()),
            Self::RemoveListener(id) => Self::RemoveListener(*id),
        }
    }
}

impl<K, V> std::fmt::Debug for ClusterCommand<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InstallListener(descriptor) => {
                f.debug_tuple("InstallListener").field(descriptor).finish()
            }
            Self::RemoveListener(id) => f.debug_tuple("RemoveListener").field(id).finish(),
        }
    }
}

/// Member-to-member messaging used by cluster listeners.
///
/// `submit` delivers a command to the notifier of the target member, which
/// applies it with [`CacheNotifier::handle_cluster_command`](crate::CacheNotifier::handle_cluster_command).
/// A member that has not started the cache yet answers with
/// [`GridError::CacheNotStarted`](gridnotify_core::GridError::CacheNotStarted).
#[async_trait]
pub trait ClusterTransport<K, V>: Send + Sync {
    /// Sends a command to one member and waits for it to be applied.
    async fn submit(&self, target: MemberId, command: ClusterCommand<K, V>) -> Result<()>;

    /// Forwards events to the origin of a cluster listener, which hands them
    /// to [`CacheNotifier::notify_cluster_listeners`](crate::CacheNotifier::notify_cluster_listeners).
    fn send_events(
        &self,
        target: MemberId,
        listener_id: ListenerId,
        events: Vec<CacheEvent<K, V>>,
    ) -> Result<()>;
}
