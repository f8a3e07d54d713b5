//! Core types shared by the gridnotify change-notification engine.

#![warn(missing_docs)]

pub mod entry;
pub mod error;
pub mod identity;

pub use entry::{CacheEntry, Metadata};
pub use error::{GridError, Result};
pub use identity::{MemberId, TransactionId};
