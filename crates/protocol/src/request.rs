//! Request and response envelopes

use shardline_core::{Consistency, Durability, Error, PartitionId};
use std::time::Duration;

use crate::operation::Operation;
use crate::result::OperationResult;

/// A request addressed to the rep group owning `partition`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Operation to perform
    pub operation: Operation,
    /// Target partition
    pub partition: PartitionId,
    /// Sequence number of the sender's topology snapshot
    pub topo_seq: u64,
    /// Remaining time budget for this attempt
    pub timeout_ms: u64,
    /// Read consistency; ignored by writes
    pub consistency: Consistency,
    /// Write durability; ignored by reads
    pub durability: Durability,
    /// Credentials presented by the client
    pub auth_token: Option<String>,
}

impl Request {
    /// Create a request with default policies
    pub fn new(operation: Operation, partition: PartitionId) -> Self {
        Self {
            operation,
            partition,
            topo_seq: 0,
            timeout_ms: 5_000,
            consistency: Consistency::default(),
            durability: Durability::default(),
            auth_token: None,
        }
    }

    /// Remaining budget as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A rep group's answer to a [`Request`]
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Sequence number of the server's topology
    pub topo_seq: u64,
    /// Highest VLSN the serving node has applied
    pub node_vlsn: u64,
    /// Operation result or the fault that prevented it
    pub result: Result<OperationResult, Error>,
}

impl Response {
    /// A successful response
    pub fn ok(topo_seq: u64, node_vlsn: u64, result: OperationResult) -> Self {
        Self {
            topo_seq,
            node_vlsn,
            result: Ok(result),
        }
    }

    /// A failed response
    pub fn fault(topo_seq: u64, node_vlsn: u64, error: Error) -> Self {
        Self {
            topo_seq,
            node_vlsn,
            result: Err(error),
        }
    }
}
