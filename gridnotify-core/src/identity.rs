//! Cluster member and transaction identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a member of the data grid cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(Uuid);

impl MemberId {
    /// Creates a new random member ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a member ID from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// Identifies the transaction a mutation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    origin: MemberId,
    sequence: u64,
}

impl TransactionId {
    /// Creates a transaction ID scoped to the originating member.
    pub fn new(origin: MemberId, sequence: u64) -> Self {
        Self { origin, sequence }
    }

    /// Returns the member that started the transaction.
    pub fn origin(&self) -> MemberId {
        self.origin
    }

    /// Returns the member-local sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx-{}:{}", self.origin.0, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_id_uniqueness() {
        assert_ne!(MemberId::new(), MemberId::new());
    }

    #[test]
    fn test_member_id_display() {
        assert!(MemberId::new().to_string().starts_with("member-"));
    }

    #[test]
    fn test_transaction_id_equality() {
        let origin = MemberId::new();
        assert_eq!(TransactionId::new(origin, 1), TransactionId::new(origin, 1));
        assert_ne!(TransactionId::new(origin, 1), TransactionId::new(origin, 2));
        assert_eq!(TransactionId::new(origin, 9).origin(), origin);
    }
}
