//! Reference rep groups for Shardline
//!
//! An in-memory implementation of the server side of the operation
//! protocol, used to run the client end to end:
//! - [`PartitionStore`]: ordered records of one partition
//! - [`execute`]: conditional writes, atomic batches, multi-key reads, scans
//! - [`RepGroupService`]: the partitions of one rep group, plus migration
//! - [`LocalCluster`]: every group of a topology behind a [`Transport`]
//!
//! [`Transport`]: shardline_protocol::Transport

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod executor;
pub mod service;
pub mod store;

pub use cluster::LocalCluster;
pub use executor::execute;
pub use service::RepGroupService;
pub use store::{PartitionStore, Record, VersionClock, WriteSet};
