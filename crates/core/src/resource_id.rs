//! Resource identifiers
//!
//! Immutable, comparable identifiers for the components of a store
//! topology. Each carries a small 1-based number so topology maps can be
//! laid out as arenas indexed by that number.
//!
//! | Kind | String form |
//! |------|-------------|
//! | Datacenter | `dc3` |
//! | StorageNode | `sn12` |
//! | RepGroup | `rg2` |
//! | RepNode | `rg2-rn3` |
//! | Partition | `p17` |
//! | Admin | `admin1` |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

macro_rules! numeric_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Create an id from its 1-based number
            pub const fn new(number: u32) -> Self {
                $name(number)
            }

            /// The 1-based number
            #[inline]
            pub const fn number(&self) -> u32 {
                self.0
            }

            /// Zero-based arena slot for this id
            #[inline]
            pub const fn index(&self) -> usize {
                (self.0 as usize).saturating_sub(1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_number(s, $prefix).map($name)
            }
        }
    };
}

numeric_id!(
    /// Datacenter (zone) identifier
    DatacenterId,
    "dc"
);
numeric_id!(
    /// Storage node (host) identifier
    StorageNodeId,
    "sn"
);
numeric_id!(
    /// Replication group (shard) identifier
    RepGroupId,
    "rg"
);
numeric_id!(
    /// Partition identifier
    PartitionId,
    "p"
);
numeric_id!(
    /// Admin service instance identifier
    AdminId,
    "admin"
);

/// Replication node identifier: a node number within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepNodeId {
    group: u32,
    node: u32,
}

impl RepNodeId {
    /// Create a rep node id from group and node numbers
    pub const fn new(group: u32, node: u32) -> Self {
        Self { group, node }
    }

    /// The group this node belongs to
    pub const fn group_id(&self) -> RepGroupId {
        RepGroupId::new(self.group)
    }

    /// Node number within the group
    pub const fn node_number(&self) -> u32 {
        self.node
    }
}

impl fmt::Display for RepNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rg{}-rn{}", self.group, self.node)
    }
}

impl FromStr for RepNodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, node) = s
            .split_once('-')
            .ok_or_else(|| Error::illegal_argument(format!("invalid rep node id: {:?}", s)))?;
        Ok(RepNodeId {
            group: parse_number(group, "rg")?,
            node: parse_number(node, "rn")?,
        })
    }
}

/// Discriminated resource identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceId {
    /// A datacenter
    Datacenter(DatacenterId),
    /// A storage node
    StorageNode(StorageNodeId),
    /// A replication group
    RepGroup(RepGroupId),
    /// A replication node
    RepNode(RepNodeId),
    /// A partition
    Partition(PartitionId),
    /// An admin instance
    Admin(AdminId),
}

impl ResourceId {
    /// Parse any resource id from its string form.
    ///
    /// Prefixes are checked longest-first so `rg1-rn2` is not read as a group
    /// and `admin1` is not confused with anything shorter.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.starts_with("admin") {
            s.parse().map(ResourceId::Admin)
        } else if s.starts_with("rg") && s.contains('-') {
            s.parse().map(ResourceId::RepNode)
        } else if s.starts_with("rg") {
            s.parse().map(ResourceId::RepGroup)
        } else if s.starts_with("dc") {
            s.parse().map(ResourceId::Datacenter)
        } else if s.starts_with("sn") {
            s.parse().map(ResourceId::StorageNode)
        } else if s.starts_with('p') {
            s.parse().map(ResourceId::Partition)
        } else {
            Err(Error::illegal_argument(format!(
                "unknown resource id: {:?}",
                s
            )))
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Datacenter(id) => id.fmt(f),
            ResourceId::StorageNode(id) => id.fmt(f),
            ResourceId::RepGroup(id) => id.fmt(f),
            ResourceId::RepNode(id) => id.fmt(f),
            ResourceId::Partition(id) => id.fmt(f),
            ResourceId::Admin(id) => id.fmt(f),
        }
    }
}

fn parse_number(s: &str, prefix: &str) -> Result<u32, Error> {
    let digits = s
        .strip_prefix(prefix)
        .ok_or_else(|| {
            Error::illegal_argument(format!("expected prefix {:?} in {:?}", prefix, s))
        })?;
    let n: u32 = digits
        .parse()
        .map_err(|_| Error::illegal_argument(format!("invalid id number in {:?}", s)))?;
    if n == 0 {
        return Err(Error::illegal_argument(format!(
            "resource numbers start at 1: {:?}",
            s
        )));
    }
    Ok(n)
}
