use std::sync::Arc;

use gridnotify_core::{MemberId, Result};

use crate::cluster::{ClusterEventManager, ClusterListenerDescriptor};
use crate::event::{CacheEvent, CacheKey, CacheValue};
use crate::listener::{CacheListener, ListenerId, Observation};

/// Stand-in for a cluster listener on a member other than its origin.
///
/// It sees post events for keys this member is primary owner of, after the
/// descriptor's filter and converter ran, and hands them to the
/// [`ClusterEventManager`] for delivery to the origin.
pub struct RemoteClusterListener<K, V> {
    descriptor: ClusterListenerDescriptor<K, V>,
    manager: Arc<ClusterEventManager<K, V>>,
}

impl<K: CacheKey, V: CacheValue> RemoteClusterListener<K, V> {
    /// Creates a forwarder for `descriptor`.
    pub fn new(
        descriptor: ClusterListenerDescriptor<K, V>,
        manager: Arc<ClusterEventManager<K, V>>,
    ) -> Self {
        Self {
            descriptor,
            manager,
        }
    }

    /// Returns the descriptor this forwarder was installed from.
    pub fn descriptor(&self) -> &ClusterListenerDescriptor<K, V> {
        &self.descriptor
    }

    /// Returns the ID of the forwarded listener.
    pub fn listener_id(&self) -> ListenerId {
        self.descriptor.listener_id()
    }

    /// Returns the member events are forwarded to.
    pub fn origin(&self) -> MemberId {
        self.descriptor.origin()
    }

    /// Forwards one event to the origin.
    pub fn forward(&self, event: &CacheEvent<K, V>) -> Result<()> {
        self.manager
            .add_event(self.origin(), self.listener_id(), event.clone())
    }

    /// Builds a local listener with one forwarding callback per interest.
    pub fn into_listener(self) -> CacheListener<K, V> {
        let interests = self.descriptor.interests().to_vec();
        let sync = self.descriptor.is_sync();
        let forwarder = Arc::new(self);
        let mut builder = CacheListener::builder()
            .observation(Observation::Post)
            .only_primary(true)
            .sync(sync);
        for event_type in interests {
            let forwarder = Arc::clone(&forwarder);
            builder = builder.on(event_type, move |event| forwarder.forward(event));
        }
        builder.build()
    }
}
