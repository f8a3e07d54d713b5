use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use gridnotify_core::{GridError, MemberId, Result};
use tokio::time::Instant;

use crate::cluster::{ClusterCommand, ClusterListenerDescriptor, ClusterTransport};
use crate::event::{CacheKey, CacheValue};
use crate::listener::ListenerId;
use crate::topology::Topology;

/// Broadcasts cluster listener commands to every other member.
///
/// All members of the current view are contacted in parallel. When the round
/// finishes, the view is read again and members that joined in the meantime
/// get the same command, until a round finds nobody new. The whole exchange
/// shares one deadline.
pub(crate) struct ReplicationHelper<K, V> {
    transport: Arc<dyn ClusterTransport<K, V>>,
    topology: Arc<dyn Topology<K>>,
}

impl<K: CacheKey, V: CacheValue> ReplicationHelper<K, V> {
    pub(crate) fn new(
        transport: Arc<dyn ClusterTransport<K, V>>,
        topology: Arc<dyn Topology<K>>,
    ) -> Self {
        Self {
            transport,
            topology,
        }
    }

    pub(crate) async fn install(
        &self,
        descriptor: ClusterListenerDescriptor<K, V>,
        timeout: Duration,
    ) -> Result<()> {
        let listener_id = descriptor.listener_id();
        self.broadcast(ClusterCommand::InstallListener(descriptor), timeout, |member, err| {
            GridError::Replication(format!(
                "{member} failed to install cluster listener {listener_id}: {err}"
            ))
        })
        .await
    }

    pub(crate) async fn remove(&self, listener_id: ListenerId, timeout: Duration) -> Result<()> {
        self.broadcast(ClusterCommand::RemoveListener(listener_id), timeout, |member, err| {
            GridError::ListenerManagement(format!(
                "{member} failed to remove cluster listener {listener_id}: {err}"
            ))
        })
        .await
    }

    async fn broadcast<F>(
        &self,
        command: ClusterCommand<K, V>,
        timeout: Duration,
        on_failure: F,
    ) -> Result<()>
    where
        F: Fn(MemberId, GridError) -> GridError,
    {
        let deadline = Instant::now() + timeout;
        let mut contacted: HashSet<MemberId> = HashSet::new();
        contacted.insert(self.topology.local_member());
        let mut round = 0u32;

        loop {
            let targets: Vec<MemberId> = self
                .topology
                .members()
                .into_iter()
                .filter(|member| contacted.insert(*member))
                .collect();
            if targets.is_empty() {
                return Ok(());
            }
            round += 1;
            tracing::debug!(
                command = command.name(),
                listener = %command.listener_id(),
                round,
                targets = targets.len(),
                "broadcasting cluster command"
            );

            let submissions: Vec<_> = targets
                .into_iter()
                .map(|member| {
                    let transport = Arc::clone(&self.transport);
                    let command = command.clone();
                    async move {
                        let outcome =
                            tokio::time::timeout_at(deadline, transport.submit(member, command))
                                .await;
                        (member, outcome)
                    }
                })
                .collect();

            let mut silent = 0usize;
            let mut failure: Option<GridError> = None;
            for (member, outcome) in join_all(submissions).await {
                match outcome {
                    Err(_) => silent += 1,
                    Ok(Ok(())) => {
                        tracing::trace!(
                            member = %member,
                            command = command.name(),
                            "cluster command applied"
                        );
                    }
                    Ok(Err(GridError::CacheNotStarted(reason))) => {
                        tracing::debug!(
                            member = %member,
                            reason = %reason,
                            "cache not started on member, it will fetch listeners on start"
                        );
                    }
                    Ok(Err(err @ GridError::Timeout(_))) => {
                        failure.get_or_insert(err);
                    }
                    Ok(Err(err)) => {
                        failure.get_or_insert_with(|| on_failure(member, err));
                    }
                }
            }
            if let Some(err) = failure {
                return Err(err);
            }
            if silent > 0 {
                return Err(GridError::Timeout(format!(
                    "{silent} member(s) did not acknowledge {} for {} within {timeout:?}",
                    command.name(),
                    command.listener_id(),
                )));
            }
        }
    }
}
