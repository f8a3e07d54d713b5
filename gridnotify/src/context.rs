//! Invocation context and command flags passed in by the storage layer.

use gridnotify_core::TransactionId;

/// Describes where a mutation comes from and which transaction it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationContext {
    origin_local: bool,
    transaction: Option<TransactionId>,
}

impl InvocationContext {
    /// Context for a mutation issued on this member.
    pub fn local() -> Self {
        Self {
            origin_local: true,
            transaction: None,
        }
    }

    /// Context for a mutation replicated from another member.
    pub fn remote() -> Self {
        Self {
            origin_local: false,
            transaction: None,
        }
    }

    /// Attaches a transaction to the context.
    pub fn with_transaction(mut self, transaction: TransactionId) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Returns `true` if the mutation was issued on this member.
    pub fn is_origin_local(&self) -> bool {
        self.origin_local
    }

    /// Returns `true` if the mutation runs inside a transaction.
    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Returns the transaction, if any.
    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::local()
    }
}

/// The subset of a write command the notifier looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags {
    skip_listener_notification: bool,
    retried: bool,
}

impl CommandFlags {
    /// Flags for a plain command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppresses listener notification for the command.
    pub fn skip_listener_notification(mut self) -> Self {
        self.skip_listener_notification = true;
        self
    }

    /// Marks the command as a retry of an earlier attempt.
    pub fn retried(mut self) -> Self {
        self.retried = true;
        self
    }

    /// Returns `true` if listener notification is suppressed.
    pub fn skips_notification(&self) -> bool {
        self.skip_listener_notification
    }

    /// Returns `true` if the command was retried.
    pub fn is_retried(&self) -> bool {
        self.retried
    }
}
