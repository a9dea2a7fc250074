//! Core types for Shardline
//!
//! This crate defines the foundational value types used by every layer:
//! - Key: hierarchical key with a major path (placement) and minor path (ordering)
//! - KeyRange / Depth / Direction: range-scoping for multi-key reads
//! - Value: opaque byte payload
//! - Version: opaque token identifying one committed state of a key
//! - ResourceId family: datacenters, storage nodes, rep groups, rep nodes, partitions
//! - Consistency / Durability / ReturnChoice: per-request policies
//! - Error: the single error enum shared by all crates
//! - MessageCatalog: explicitly constructed table of runtime error messages
//! - Limits: client-side argument limits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod limits;
pub mod messages;
pub mod policy;
pub mod resource_id;
pub mod value;
pub mod version;

pub use error::{Error, ErrorKind, Result};
pub use key::{Depth, Direction, Key, KeyRange};
pub use limits::Limits;
pub use messages::{MessageCatalog, MessageId};
pub use policy::{Consistency, Durability, ReplicaAckPolicy, ReturnChoice, SyncPolicy};
pub use resource_id::{
    AdminId, DatacenterId, PartitionId, RepGroupId, RepNodeId, ResourceId, StorageNodeId,
};
pub use value::{KeyValueVersion, KeyVersion, Value, ValueVersion};
pub use version::Version;

/// Re-exported so callers can build [`Version`]s without a direct uuid dependency
pub use uuid::Uuid;
