//! Topology and routing for Shardline
//!
//! - [`Topology`]: immutable snapshot of datacenters, storage nodes, rep
//!   groups and the partition map, laid out as arenas
//! - [`TopologyBuilder`]: constructs snapshots with round-robin placement
//! - [`TopologyHandle`]: atomically swapped current snapshot
//! - [`PartitionRouter`]: key → partition → group → node decisions
//! - [`RepNodeStateTable`]: default [`LoadOracle`] fed by the dispatcher

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod handle;
pub mod router;
pub mod state;
pub mod topology;

pub use builder::TopologyBuilder;
pub use handle::{TopologyHandle, TopologySource};
pub use router::{partition_for, Access, PartitionRouter, PARTITION_HASH_SEED};
pub use state::{ActiveRequestGuard, LoadOracle, RepNodeStateTable, RepNodeStats};
pub use topology::{Datacenter, RepGroup, RepNode, StorageNode, Topology};
