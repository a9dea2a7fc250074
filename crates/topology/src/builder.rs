//! Topology construction
//!
//! Lays out a single-datacenter store with one storage node per rep node
//! and distributes partitions across groups round-robin. Individual
//! partitions can be pinned to a group with [`TopologyBuilder::assign`].

use rustc_hash::FxHashMap;
use shardline_core::{DatacenterId, PartitionId, RepGroupId, RepNodeId, Result, StorageNodeId};

use crate::topology::{Datacenter, RepGroup, RepNode, StorageNode, Topology};

/// Default partition count
pub const DEFAULT_PARTITIONS: u32 = 10;

/// Builder for [`Topology`]
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    store_name: String,
    sequence_number: u64,
    partitions: u32,
    groups: u32,
    nodes_per_group: u32,
    base_port: u16,
    overrides: FxHashMap<PartitionId, RepGroupId>,
}

impl TopologyBuilder {
    /// Start a builder for the named store
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            sequence_number: 1,
            partitions: DEFAULT_PARTITIONS,
            groups: 1,
            nodes_per_group: 3,
            base_port: 5000,
            overrides: FxHashMap::default(),
        }
    }

    /// Set the partition count
    pub fn partitions(mut self, count: u32) -> Self {
        self.partitions = count;
        self
    }

    /// Set the number of rep groups and nodes in each
    pub fn rep_groups(mut self, groups: u32, nodes_per_group: u32) -> Self {
        self.groups = groups;
        self.nodes_per_group = nodes_per_group;
        self
    }

    /// Set the initial sequence number
    pub fn sequence_number(mut self, seq: u64) -> Self {
        self.sequence_number = seq;
        self
    }

    /// Pin a partition to a group instead of the round-robin default
    pub fn assign(mut self, partition: PartitionId, group: RepGroupId) -> Self {
        self.overrides.insert(partition, group);
        self
    }

    /// Build and validate the snapshot
    pub fn build(self) -> Result<Topology> {
        let dc = DatacenterId::new(1);
        let datacenters = vec![Datacenter {
            id: dc,
            name: "dc1".to_string(),
            replication_factor: self.nodes_per_group,
        }];

        let mut storage_nodes = Vec::new();
        let mut rep_groups = Vec::with_capacity(self.groups as usize);
        for g in 1..=self.groups {
            let mut nodes = Vec::with_capacity(self.nodes_per_group as usize);
            for n in 1..=self.nodes_per_group {
                let sn = StorageNodeId::new(storage_nodes.len() as u32 + 1);
                storage_nodes.push(StorageNode {
                    id: sn,
                    datacenter: dc,
                    hostname: format!("node{:02}", sn.number()),
                    port: self.base_port,
                });
                nodes.push(RepNode {
                    id: RepNodeId::new(g, n),
                    storage_node: sn,
                });
            }
            rep_groups.push(RepGroup {
                id: RepGroupId::new(g),
                nodes,
            });
        }

        let groups = self.groups.max(1);
        let partitions = (1..=self.partitions)
            .map(|p| {
                let pid = PartitionId::new(p);
                self.overrides
                    .get(&pid)
                    .copied()
                    .unwrap_or_else(|| RepGroupId::new((p - 1) % groups + 1))
            })
            .collect();

        Topology::from_parts(
            self.store_name,
            self.sequence_number,
            datacenters,
            storage_nodes,
            rep_groups,
            partitions,
        )
    }
}
