//! Opaque values and the versioned read shapes built on them

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::key::Key;
use crate::version::Version;

/// Opaque value bytes
///
/// The operation layer never interprets value contents; typed bindings
/// live above it.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Value(Vec<u8>);

impl Value {
    /// Wrap raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Value(bytes)
    }

    /// Empty value
    pub fn empty() -> Self {
        Value(Vec::new())
    }

    /// Borrow the bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the value has no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if self.0.len() <= 64 => write!(f, "Value({:?})", s),
            _ => write!(f, "Value({} bytes)", self.0.len()),
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value(bytes.to_vec())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value(s.into_bytes())
    }
}

/// A value with the version of the state it was read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueVersion {
    /// Stored value
    pub value: Value,
    /// Version of the stored value
    pub version: Version,
}

impl ValueVersion {
    /// Pair a value with its version
    pub fn new(value: Value, version: Version) -> Self {
        Self { value, version }
    }
}

/// A record returned by multi-key reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueVersion {
    /// Record key
    pub key: Key,
    /// Stored value
    pub value: Value,
    /// Version of the stored value
    pub version: Version,
}

/// A key-only record returned by key reads and key iterators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersion {
    /// Record key
    pub key: Key,
    /// Version of the stored value
    pub version: Version,
}
