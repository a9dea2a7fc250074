//! Partition routing and node selection
//!
//! Routing is a pure decision function over a topology snapshot:
//!
//! ```text
//! key ──route──▶ PartitionId ──resolve──▶ RepGroupId ──select_node──▶ RepNodeId
//! ```
//!
//! `route` hashes the encoded major path with xxh3 and a fixed seed. The
//! hash must never change: it has to agree with where the data physically
//! lives, across process restarts and client versions.

use shardline_core::{
    Consistency, Error, Key, MessageCatalog, MessageId, PartitionId, RepGroupId, RepNodeId, Result,
};
use smallvec::SmallVec;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::state::LoadOracle;
use crate::topology::Topology;

/// Seed of the partition hash. Changing it relocates every key.
pub const PARTITION_HASH_SEED: u64 = 0x5348_4152_444C_494E;

/// Default per-node in-flight request limit
pub const DEFAULT_MAX_ACTIVE_REQUESTS: usize = 100;

/// Map an encoded major path to a partition out of `partition_count`
#[inline]
pub fn partition_for(major_path_bytes: &[u8], partition_count: u32) -> PartitionId {
    let hash = xxh3_64_with_seed(major_path_bytes, PARTITION_HASH_SEED);
    PartitionId::new((hash % u64::from(partition_count.max(1))) as u32 + 1)
}

/// What a request needs from the serving node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// A read under the given consistency
    Read(Consistency),
    /// A write; always served by the master
    Write,
}

impl Access {
    fn requires_master(&self) -> bool {
        match self {
            Access::Write => true,
            Access::Read(c) => c.requires_master(),
        }
    }
}

/// Router over one topology snapshot
#[derive(Debug, Clone)]
pub struct PartitionRouter {
    topology: Arc<Topology>,
    messages: Arc<MessageCatalog>,
    max_active_requests: usize,
}

impl PartitionRouter {
    /// Create a router over `topology`
    pub fn new(topology: Arc<Topology>, messages: Arc<MessageCatalog>) -> Self {
        Self {
            topology,
            messages,
            max_active_requests: DEFAULT_MAX_ACTIVE_REQUESTS,
        }
    }

    /// Set the per-node in-flight request limit
    pub fn with_max_active_requests(mut self, limit: usize) -> Self {
        self.max_active_requests = limit.max(1);
        self
    }

    /// Snapshot this router decides over
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Partition owning `key`. Depends only on the major path.
    #[inline]
    pub fn route(&self, key: &Key) -> PartitionId {
        partition_for(&key.major_path_bytes(), self.topology.partition_count())
    }

    /// Rep group owning `partition`.
    ///
    /// # Errors
    ///
    /// `TopologyStale` if the snapshot does not know the partition. Callers
    /// refresh and retry.
    pub fn resolve(&self, partition: PartitionId) -> Result<RepGroupId> {
        self.topology.group_for(partition).ok_or_else(|| {
            Error::topology_stale(
                Some(partition),
                self.messages
                    .format(MessageId::PartitionNotInTopology, &[&partition]),
            )
        })
    }

    /// Route and resolve in one step
    pub fn group_for_key(&self, key: &Key) -> Result<(PartitionId, RepGroupId)> {
        let partition = self.route(key);
        Ok((partition, self.resolve(partition)?))
    }

    /// Choose the node that should serve a request to `group`.
    ///
    /// Writes and absolute reads go to the master. Other reads go to the
    /// least loaded node that satisfies the consistency policy. Nodes in
    /// `excluded` already failed this request and are skipped.
    ///
    /// # Errors
    ///
    /// - `TopologyStale` if the group is unknown
    /// - `ConsistencyNotMet` if no member satisfies the policy
    /// - `NodeUnavailable` if every qualifying node is unreachable
    /// - `RequestLimitExceeded` if every reachable node is at its limit
    pub fn select_node(
        &self,
        group: RepGroupId,
        access: Access,
        oracle: &dyn LoadOracle,
        excluded: &[RepNodeId],
    ) -> Result<RepNodeId> {
        let rep_group = self.topology.rep_group(group).ok_or_else(|| {
            Error::topology_stale(
                None,
                self.messages.format(MessageId::GroupNotInTopology, &[&group]),
            )
        })?;

        let master = oracle.master_of(group);
        let qualifying: SmallVec<[RepNodeId; 4]> = rep_group
            .node_ids()
            .filter(|n| satisfies(*n, access, master, oracle))
            .collect();

        if qualifying.is_empty() {
            if access.requires_master() {
                return Err(self.no_node(group, access));
            }
            return Err(Error::ConsistencyNotMet {
                message: self.messages.format(
                    MessageId::ConsistencyUnsatisfiable,
                    &[&group, &format!("{:?}", access)],
                ),
            });
        }

        let reachable: SmallVec<[RepNodeId; 4]> = qualifying
            .into_iter()
            .filter(|n| !excluded.contains(n) && oracle.is_available(*n))
            .collect();
        if reachable.is_empty() {
            return Err(self.no_node(group, access));
        }

        reachable
            .iter()
            .copied()
            .filter(|n| oracle.active_requests(*n) < self.max_active_requests)
            .min_by_key(|n| (oracle.active_requests(*n), n.node_number()))
            .ok_or_else(|| Error::RequestLimitExceeded {
                message: self.messages.format(
                    MessageId::AllNodesBusy,
                    &[&group, &self.max_active_requests],
                ),
            })
    }

    fn no_node(&self, group: RepGroupId, access: Access) -> Error {
        Error::NodeUnavailable {
            node: group.to_string(),
            message: self
                .messages
                .format(MessageId::NoNodeAvailable, &[&group, &format!("{:?}", access)]),
        }
    }
}

fn satisfies(
    node: RepNodeId,
    access: Access,
    master: Option<RepNodeId>,
    oracle: &dyn LoadOracle,
) -> bool {
    let is_master = master == Some(node);
    match access {
        Access::Write | Access::Read(Consistency::Absolute) => is_master,
        Access::Read(Consistency::NoneRequired) => true,
        Access::Read(Consistency::NoneRequiredNoMaster) => !is_master,
        Access::Read(Consistency::Time {
            permissible_lag_ms, ..
        }) => is_master || oracle.replica_lag_ms(node).is_some_and(|l| l <= permissible_lag_ms),
        Access::Read(Consistency::Version { version, .. }) => {
            is_master
                || oracle
                    .replicated_vlsn(node)
                    .is_some_and(|v| v >= version.vlsn())
        }
    }
}
