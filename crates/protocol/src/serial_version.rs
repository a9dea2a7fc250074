//! Protocol serial versions
//!
//! Every frame carries the serial version it was encoded at. A field added
//! in a later version is only written and read when the frame's version is
//! at least that version; older peers never see it and readers of older
//! frames substitute the field's default.
//!
//! | Version | Adds |
//! |---------|------|
//! | V1 | baseline operation set |
//! | V2 | table id on single-key operations and results; `TableIterate` |

use shardline_core::{Error, Result};
use std::fmt;

/// Wire protocol revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SerialVersion(u16);

impl SerialVersion {
    /// Baseline protocol
    pub const V1: SerialVersion = SerialVersion(1);
    /// Adds table ids and table iteration
    pub const V2: SerialVersion = SerialVersion(2);

    /// Oldest version this build can speak
    pub const MINIMUM: SerialVersion = SerialVersion::V1;
    /// Newest version this build can speak
    pub const CURRENT: SerialVersion = SerialVersion::V2;

    /// Validate a raw version number
    pub fn new(raw: u16) -> Result<Self> {
        let v = SerialVersion(raw);
        if v < Self::MINIMUM || v > Self::CURRENT {
            return Err(Error::UnsupportedOperation {
                serial_version: raw,
                reason: format!(
                    "supported serial versions are {} through {}",
                    Self::MINIMUM.0,
                    Self::CURRENT.0
                ),
            });
        }
        Ok(v)
    }

    /// Raw number
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Whether single-key operations carry a table id
    #[inline]
    pub fn has_table_id(self) -> bool {
        self >= Self::V2
    }

    /// Whether `TableIterate` can be encoded
    #[inline]
    pub fn has_table_iterate(self) -> bool {
        self >= Self::V2
    }

    /// Highest version both sides speak
    pub fn negotiate(client_max: SerialVersion, server_max: SerialVersion) -> Result<Self> {
        let agreed = client_max.min(server_max);
        if agreed < Self::MINIMUM {
            return Err(Error::UnsupportedOperation {
                serial_version: agreed.0,
                reason: "peer protocol is too old".to_string(),
            });
        }
        Ok(agreed)
    }
}

impl Default for SerialVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for SerialVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
