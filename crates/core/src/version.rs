//! Version tokens
//!
//! Every successful write produces a [`Version`]. Conditional operations
//! (`put_if_version`, `delete_if_version`) consume one.
//!
//! ## Comparison
//!
//! Versions are compared for equality only. There is deliberately no
//! `Ord`: a version identifies a committed state, it does not say which of
//! two states is newer. The store may also reassign a key's version during
//! partition migration without any application write, so an unchanged
//! version is not proof that nothing touched the key.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Encoded size of a version in bytes
pub const VERSION_BYTES: usize = 24;

/// Opaque version token
///
/// Identifies the replication group that committed the state (by the
/// group's UUID) and the group-local replicated sequence number (VLSN) of
/// the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    group_uuid: Uuid,
    vlsn: u64,
}

impl Version {
    /// Create a version for the given group and sequence number
    pub const fn new(group_uuid: Uuid, vlsn: u64) -> Self {
        Self { group_uuid, vlsn }
    }

    /// UUID of the replication group that issued this version
    pub fn group_uuid(&self) -> Uuid {
        self.group_uuid
    }

    /// Replicated sequence number of the commit
    ///
    /// Useful for version-based read consistency, NOT for ordering versions
    /// issued by different groups.
    #[inline]
    pub const fn vlsn(&self) -> u64 {
        self.vlsn
    }

    /// Fixed-width encoding: 16 UUID bytes followed by the VLSN (LE)
    pub fn to_bytes(&self) -> [u8; VERSION_BYTES] {
        let mut bytes = [0u8; VERSION_BYTES];
        bytes[0..16].copy_from_slice(self.group_uuid.as_bytes());
        bytes[16..24].copy_from_slice(&self.vlsn.to_le_bytes());
        bytes
    }

    /// Decode a version from [`Version::to_bytes`] output
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != VERSION_BYTES {
            return Err(Error::serialization(format!(
                "version must be {} bytes, got {}",
                VERSION_BYTES,
                bytes.len()
            )));
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[0..16]);
        let mut vlsn = [0u8; 8];
        vlsn.copy_from_slice(&bytes[16..24]);
        Ok(Self {
            group_uuid: Uuid::from_bytes(uuid),
            vlsn: u64::from_le_bytes(vlsn),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_uuid.simple(), self.vlsn)
    }
}
