//! Shardline - client operation layer for a partitioned, replicated
//! key/value store
//!
//! Keys carry a major path, which decides the partition, and a minor path,
//! which orders records inside it. Every operation is routed to the rep
//! group owning its partition, sent in a versioned binary frame, and
//! retried under a bounded policy when the fault is transient.
//!
//! # Quick Start
//!
//! ```ignore
//! use shardline::{ClientConfig, Key, KvStore, LocalCluster, TopologyBuilder};
//! use std::sync::Arc;
//!
//! let topology = TopologyBuilder::new("demo").partitions(16).rep_groups(3, 3).build()?;
//! let cluster = Arc::new(LocalCluster::new(topology.clone()));
//! let store = KvStore::connect(topology, cluster.clone(), cluster, ClientConfig::default())?;
//!
//! let key = Key::parse("/user/42/-/email")?;
//! let version = store.put(&key, "ada@example.com")?;
//! assert!(store.put_if_absent(&key, "other")?.is_none());
//! ```
//!
//! # Architecture
//!
//! | Crate | Contents |
//! |-------|----------|
//! | `shardline-core` | keys, values, versions, ids, policies, errors |
//! | `shardline-topology` | topology snapshots, routing, node selection |
//! | `shardline-protocol` | operations, results, wire codec, transport |
//! | `shardline-node` | in-memory rep groups and an in-process cluster |
//! | `shardline-client` | dispatcher, retry, key/value API, iterators |

pub use shardline_client::*;
pub use shardline_core::*;
pub use shardline_node::{LocalCluster, RepGroupService};
pub use shardline_protocol::{
    BatchOperation, ExecuteOutcome, IterateSpec, MultiKeySpec, Operation, OperationResult,
    RetryClass, ScanBatch, ScanEntry, SerialVersion, Transport, WriteResult,
};
pub use shardline_topology::{
    LoadOracle, PartitionRouter, RepNodeStateTable, Topology, TopologyBuilder, TopologyHandle,
    TopologySource,
};
