//! Per-request policies
//!
//! Consistency and Durability are passed through to the serving node. The
//! router only looks at consistency to decide which nodes may serve a read.

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Read staleness policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Consistency {
    /// Any node may serve the read
    #[default]
    NoneRequired,
    /// Only the master may serve the read
    Absolute,
    /// Any replica except the master may serve the read
    NoneRequiredNoMaster,
    /// A node whose replication lag is within the bound may serve the read
    Time {
        /// Maximum tolerated lag behind the master
        permissible_lag_ms: u64,
        /// How long the node may wait to catch up
        timeout_ms: u64,
    },
    /// A node that has replayed at least the given version may serve the read
    Version {
        /// Version the node must have seen
        version: Version,
        /// How long the node may wait to catch up
        timeout_ms: u64,
    },
}

impl Consistency {
    /// Parse the configuration name of a simple consistency policy
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none_required" => Some(Consistency::NoneRequired),
            "absolute" => Some(Consistency::Absolute),
            "none_required_no_master" => Some(Consistency::NoneRequiredNoMaster),
            _ => None,
        }
    }

    /// Whether only the master can satisfy this policy
    pub fn requires_master(&self) -> bool {
        matches!(self, Consistency::Absolute)
    }
}

/// Local disk synchronization policy for a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncPolicy {
    /// Write and fsync
    Sync,
    /// Write to the OS, no fsync
    WriteNoSync,
    /// Neither write nor fsync at commit
    NoSync,
}

/// How many replicas must acknowledge a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaAckPolicy {
    /// Every electable replica
    All,
    /// No replica
    None,
    /// A simple majority of electable replicas
    SimpleMajority,
}

/// Write acknowledgment policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Durability {
    /// Sync policy on the master
    pub master_sync: SyncPolicy,
    /// Sync policy on replicas
    pub replica_sync: SyncPolicy,
    /// Replica acknowledgment requirement
    pub replica_ack: ReplicaAckPolicy,
}

impl Durability {
    /// Sync on master, no sync on replicas, majority ack
    pub const COMMIT_SYNC: Durability = Durability {
        master_sync: SyncPolicy::Sync,
        replica_sync: SyncPolicy::NoSync,
        replica_ack: ReplicaAckPolicy::SimpleMajority,
    };

    /// No sync anywhere, majority ack
    pub const COMMIT_NO_SYNC: Durability = Durability {
        master_sync: SyncPolicy::NoSync,
        replica_sync: SyncPolicy::NoSync,
        replica_ack: ReplicaAckPolicy::SimpleMajority,
    };

    /// Write without sync, majority ack
    pub const COMMIT_WRITE_NO_SYNC: Durability = Durability {
        master_sync: SyncPolicy::WriteNoSync,
        replica_sync: SyncPolicy::WriteNoSync,
        replica_ack: ReplicaAckPolicy::SimpleMajority,
    };

    /// Parse the configuration name of a predefined durability
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "commit_sync" => Some(Durability::COMMIT_SYNC),
            "commit_no_sync" => Some(Durability::COMMIT_NO_SYNC),
            "commit_write_no_sync" => Some(Durability::COMMIT_WRITE_NO_SYNC),
            _ => None,
        }
    }

    /// Acknowledgments required from a group of `replication_factor` nodes,
    /// counting the master
    pub fn required_acks(&self, replication_factor: u32) -> u32 {
        match self.replica_ack {
            ReplicaAckPolicy::All => replication_factor,
            ReplicaAckPolicy::None => 1,
            ReplicaAckPolicy::SimpleMajority => replication_factor / 2 + 1,
        }
    }
}

impl Default for Durability {
    fn default() -> Self {
        Durability::COMMIT_NO_SYNC
    }
}

/// Which pre-operation state a write result carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReturnChoice {
    /// Neither previous value nor version
    #[default]
    None,
    /// Previous value only
    Value,
    /// Previous version only
    Version,
    /// Previous value and version
    All,
}

impl ReturnChoice {
    /// Whether the previous value is returned
    pub fn returns_value(self) -> bool {
        matches!(self, ReturnChoice::Value | ReturnChoice::All)
    }

    /// Whether the previous version is returned
    pub fn returns_version(self) -> bool {
        matches!(self, ReturnChoice::Version | ReturnChoice::All)
    }
}
