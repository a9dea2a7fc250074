//! Topology snapshot
//!
//! A [`Topology`] is an immutable, versioned description of the store:
//! datacenters, storage nodes, replication groups with their nodes, and the
//! partition map. Component maps are arenas indexed by the 1-based number
//! of each id, so routing lookups are a bounds check and an index.
//!
//! Invariant: every partition maps to exactly one existing rep group.
//! Snapshots are never mutated; a change produces a new snapshot with a
//! higher sequence number.

use serde::{Deserialize, Serialize};
use shardline_core::{
    DatacenterId, Error, PartitionId, RepGroupId, RepNodeId, Result, StorageNodeId,
};

/// A datacenter (zone)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    /// Identifier
    pub id: DatacenterId,
    /// Human readable name
    pub name: String,
    /// Number of replicas each group keeps in this datacenter
    pub replication_factor: u32,
}

/// A storage node (host)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    /// Identifier
    pub id: StorageNodeId,
    /// Datacenter the host lives in
    pub datacenter: DatacenterId,
    /// Host name
    pub hostname: String,
    /// Service port
    pub port: u16,
}

/// A replication node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepNode {
    /// Identifier
    pub id: RepNodeId,
    /// Host running this node
    pub storage_node: StorageNodeId,
}

/// A replication group and its nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepGroup {
    /// Identifier
    pub id: RepGroupId,
    /// Member nodes, ordered by node number
    pub nodes: Vec<RepNode>,
}

impl RepGroup {
    /// Look up a member node
    pub fn node(&self, id: RepNodeId) -> Option<&RepNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of every member node
    pub fn node_ids(&self) -> impl Iterator<Item = RepNodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }
}

/// Immutable topology snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    store_name: String,
    sequence_number: u64,
    datacenters: Vec<Datacenter>,
    storage_nodes: Vec<StorageNode>,
    /// Indexed by `RepGroupId::index()`
    rep_groups: Vec<RepGroup>,
    /// Indexed by `PartitionId::index()`
    partitions: Vec<RepGroupId>,
}

impl Topology {
    pub(crate) fn from_parts(
        store_name: String,
        sequence_number: u64,
        datacenters: Vec<Datacenter>,
        storage_nodes: Vec<StorageNode>,
        rep_groups: Vec<RepGroup>,
        partitions: Vec<RepGroupId>,
    ) -> Result<Self> {
        let topology = Topology {
            store_name,
            sequence_number,
            datacenters,
            storage_nodes,
            rep_groups,
            partitions,
        };
        topology.validate()?;
        Ok(topology)
    }

    /// Store name
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Monotonic sequence number; a higher number is a newer snapshot
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Number of partitions. Fixed for the lifetime of a store.
    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Number of rep groups
    pub fn group_count(&self) -> usize {
        self.rep_groups.len()
    }

    /// Rep group owning `partition`, if the partition is known
    #[inline]
    pub fn group_for(&self, partition: PartitionId) -> Option<RepGroupId> {
        if partition.number() == 0 {
            return None;
        }
        self.partitions.get(partition.index()).copied()
    }

    /// Look up a rep group
    #[inline]
    pub fn rep_group(&self, id: RepGroupId) -> Option<&RepGroup> {
        if id.number() == 0 {
            return None;
        }
        self.rep_groups.get(id.index())
    }

    /// All rep groups in id order
    pub fn rep_groups(&self) -> &[RepGroup] {
        &self.rep_groups
    }

    /// Look up a rep node
    pub fn rep_node(&self, id: RepNodeId) -> Option<&RepNode> {
        self.rep_group(id.group_id()).and_then(|g| g.node(id))
    }

    /// Look up a datacenter
    pub fn datacenter(&self, id: DatacenterId) -> Option<&Datacenter> {
        self.datacenters.iter().find(|d| d.id == id)
    }

    /// Look up a storage node
    pub fn storage_node(&self, id: StorageNodeId) -> Option<&StorageNode> {
        self.storage_nodes.iter().find(|s| s.id == id)
    }

    /// Every partition id in order
    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        (1..=self.partition_count()).map(PartitionId::new)
    }

    /// Partitions owned by `group`, in partition order
    pub fn partitions_of(&self, group: RepGroupId) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, g)| **g == group)
            .map(|(i, _)| PartitionId::new(i as u32 + 1))
            .collect()
    }

    /// A new snapshot with `partition` reassigned to `group`.
    ///
    /// The returned snapshot carries the next sequence number.
    pub fn with_partition_moved(&self, partition: PartitionId, group: RepGroupId) -> Result<Self> {
        if self.group_for(partition).is_none() {
            return Err(Error::illegal_argument(format!(
                "unknown partition {}",
                partition
            )));
        }
        if self.rep_group(group).is_none() {
            return Err(Error::illegal_argument(format!("unknown rep group {}", group)));
        }

        let mut next = self.clone();
        next.partitions[partition.index()] = group;
        next.sequence_number += 1;
        Ok(next)
    }

    /// Serialize as a JSON snapshot
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Load and validate a JSON snapshot
    pub fn from_json(json: &str) -> Result<Self> {
        let topology: Topology =
            serde_json::from_str(json).map_err(|e| Error::serialization(e.to_string()))?;
        topology.validate()?;
        Ok(topology)
    }

    /// Check arena layout and the partition map invariant
    pub fn validate(&self) -> Result<()> {
        if self.partitions.is_empty() {
            return Err(Error::config("topology has no partitions"));
        }
        if self.rep_groups.is_empty() {
            return Err(Error::config("topology has no rep groups"));
        }

        for (i, group) in self.rep_groups.iter().enumerate() {
            if group.id.index() != i || group.id.number() == 0 {
                return Err(Error::config(format!(
                    "rep group {} stored at slot {}",
                    group.id, i
                )));
            }
            if group.nodes.is_empty() {
                return Err(Error::config(format!("rep group {} has no nodes", group.id)));
            }
            for node in &group.nodes {
                if node.id.group_id() != group.id {
                    return Err(Error::config(format!(
                        "rep node {} listed under {}",
                        node.id, group.id
                    )));
                }
            }
        }

        for (i, group) in self.partitions.iter().enumerate() {
            if self.rep_group(*group).is_none() {
                return Err(Error::config(format!(
                    "partition p{} maps to unknown rep group {}",
                    i + 1,
                    group
                )));
            }
        }

        Ok(())
    }
}
