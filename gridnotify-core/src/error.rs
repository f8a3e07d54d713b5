//! Error types for notification operations.

use std::io;
use thiserror::Error;

/// The main error type for listener registration and event delivery.
#[derive(Debug, Error)]
pub enum GridError {
    /// The listener registration is invalid (bad setting combination,
    /// missing index provider, unknown event type).
    #[error("registration error: {0}")]
    Registration(String),

    /// Replicating a cluster listener to a remote member failed.
    #[error("replication error: {0}")]
    Replication(String),

    /// A cluster-wide operation did not complete before its deadline.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// A filter, converter or listener callback failed while handling an event.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Adding or removing a listener across the cluster failed.
    #[error("listener management error: {0}")]
    ListenerManagement(String),

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The topology collaborator could not answer an ownership query.
    #[error("topology error: {0}")]
    Topology(String),

    /// The target cache has not been started on the member yet.
    #[error("cache not started: {0}")]
    CacheNotStarted(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GridError {
    /// Returns `true` if the failed operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Shorthand for a delivery error raised from a listener callback.
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery(message.into())
    }
}

/// A specialized `Result` type for notification operations.
pub type Result<T> = std::result::Result<T, GridError>;
