//! Change notifications for a clustered in-memory key/value cache.
//!
//! The storage layer reports every mutation to a [`CacheNotifier`], which
//! evaluates each registered listener's filter and converter and invokes its
//! callbacks. Listeners can ask for the cache's current contents on
//! registration (`include_current_state`); the snapshot and the live events
//! racing with it are reconciled so each key is reported as created once,
//! with its latest value, and every later change follows in order.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gridnotify::{CacheListener, CacheNotifier, InvocationContext, NotifierConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NotifierConfig::builder().cache_name("orders").build()?;
//!     let notifier = CacheNotifier::<String, u64>::builder(config).build()?;
//!     notifier.start();
//!
//!     let listener = CacheListener::builder()
//!         .on_created(|event| {
//!             println!("created {:?} = {:?}", event.key(), event.value());
//!             Ok(())
//!         })
//!         .build();
//!     let id = notifier.add_listener(listener).await?;
//!
//!     // Called by the storage layer around each write.
//!     let ctx = InvocationContext::local();
//!     notifier.notify_cache_entry_created("o-1".into(), Some(42), None, true, &ctx, None)?;
//!     notifier.notify_cache_entry_created("o-1".into(), Some(42), None, false, &ctx, None)?;
//!
//!     notifier.remove_listener(id).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Cluster Listeners
//!
//! In a [`CacheMode::Distributed`] cache a listener built with
//! `clustered(true)` is installed on every member before registration
//! returns. Each member forwards the post events of the keys it is primary
//! owner of to the registering member through a [`ClusterTransport`].
//!
//! # Feature Flags
//!
//! | Flag | Purpose |
//! |------|---------|
//! | `config-file` | Load [`NotifierConfig`] from a TOML file |

#![warn(missing_docs)]

pub mod cluster;
pub mod config;
mod config_file;
pub mod context;
pub mod event;
pub mod listener;
mod notifier;
pub mod queueing;
pub mod retrieval;
pub mod topology;

pub use gridnotify_core as core;
pub use gridnotify_core::{CacheEntry, GridError, MemberId, Metadata, Result, TransactionId};

pub use cluster::{
    ClusterCommand, ClusterEventManager, ClusterListenerDescriptor, ClusterTransport,
    RemoteClusterListener,
};
pub use config::{CacheMode, ConfigError, NotifierConfig, NotifierConfigBuilder};
pub use config_file::FileConfig;
pub use context::{CommandFlags, InvocationContext};
pub use event::{AvailabilityMode, CacheEvent, CacheKey, CacheValue, EventPayload, EventType};
pub use listener::{
    CacheEventConverter, CacheEventFilter, CacheEventFilterConverter, CacheListener,
    CacheListenerBuilder, EventPipeline, FilterConverted, FilterIndexingProvider, ListenerId,
    ListenerSettings, ListenerStats, Observation,
};
pub use notifier::{CacheNotifier, CacheNotifierBuilder, NotifierStatus};
pub use queueing::{
    DistributedQueueingSegmentListener, KeyState, PendingEntry, QueueingAllSegmentListener,
    QueueingSegmentListener,
};
pub use retrieval::{EntryRetriever, EntryStream, SegmentCompletionListener};
pub use topology::{HashTopology, LocalTopology, Topology};
