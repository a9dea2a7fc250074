//! Per-partition record storage
//!
//! A [`PartitionStore`] is an ordered map from encoded key bytes to the
//! current record. Byte order of encoded keys is hierarchical order, so
//! every descendant of a key sits in the contiguous run of entries whose
//! encoding starts with that key's encoding.
//!
//! Writes are staged in a [`WriteSet`] and applied in one step, which is
//! what makes an execute batch all-or-nothing.

use shardline_core::{Key, Value, Version};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Current state of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Decoded key, kept to avoid re-parsing on scans
    pub key: Key,
    /// Stored value
    pub value: Value,
    /// Version issued when this state was written
    pub version: Version,
    /// Table the record belongs to
    pub table_id: Option<u64>,
}

/// Issues versions for one rep group
#[derive(Debug)]
pub struct VersionClock {
    group_uuid: Uuid,
    vlsn: AtomicU64,
}

impl VersionClock {
    /// Clock for a fresh group
    pub fn new() -> Self {
        Self::with_uuid(Uuid::new_v4())
    }

    /// Clock with a fixed group identity
    pub fn with_uuid(group_uuid: Uuid) -> Self {
        Self {
            group_uuid,
            vlsn: AtomicU64::new(0),
        }
    }

    /// Identity stamped into every issued version
    pub fn group_uuid(&self) -> Uuid {
        self.group_uuid
    }

    /// Highest VLSN issued so far
    pub fn current_vlsn(&self) -> u64 {
        self.vlsn.load(Ordering::Acquire)
    }

    /// Issue the next version
    pub fn issue(&self) -> Version {
        let vlsn = self.vlsn.fetch_add(1, Ordering::AcqRel) + 1;
        Version::new(self.group_uuid, vlsn)
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered record map for one partition
#[derive(Debug, Default, Clone)]
pub struct PartitionStore {
    records: BTreeMap<Vec<u8>, Record>,
}

impl PartitionStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record stored under an encoded key
    pub fn get(&self, encoded: &[u8]) -> Option<&Record> {
        self.records.get(encoded)
    }

    /// Records whose encoding starts with `prefix`, ascending.
    ///
    /// With `after` set, only records strictly greater than it are returned.
    pub fn scan_forward<'a>(
        &'a self,
        prefix: &[u8],
        after: Option<&[u8]>,
    ) -> impl Iterator<Item = &'a Record> + 'a {
        let lower = match after {
            Some(after) if after >= prefix => Bound::Excluded(after.to_vec()),
            _ => Bound::Included(prefix.to_vec()),
        };
        let prefix = prefix.to_vec();
        self.records
            .range((lower, Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .map(|(_, r)| r)
    }

    /// Records whose encoding starts with `prefix`, descending.
    ///
    /// With `before` set, only records strictly less than it are returned.
    pub fn scan_reverse<'a>(
        &'a self,
        prefix: &[u8],
        before: Option<&[u8]>,
    ) -> impl Iterator<Item = &'a Record> + 'a {
        let upper = match before {
            // A resume point below the prefix leaves nothing to scan
            Some(before) if before < prefix => Bound::Excluded(prefix.to_vec()),
            Some(before) => Bound::Excluded(before.to_vec()),
            None => Bound::Unbounded,
        };
        let skip_prefix = prefix.to_vec();
        let take_prefix = prefix.to_vec();
        self.records
            .range((Bound::Included(prefix.to_vec()), upper))
            .rev()
            .skip_while(move |(k, _)| !k.starts_with(&skip_prefix))
            .take_while(move |(k, _)| k.starts_with(&take_prefix))
            .map(|(_, r)| r)
    }

    /// Every record, ascending
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Apply staged changes; `None` removes the key
    pub fn apply(&mut self, changes: Vec<(Vec<u8>, Option<Record>)>) {
        for (encoded, change) in changes {
            match change {
                Some(record) => {
                    self.records.insert(encoded, record);
                }
                None => {
                    self.records.remove(&encoded);
                }
            }
        }
    }

    /// Remove every record, returning them in key order
    pub fn drain(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.records).into_values().collect()
    }

    /// Insert a record as-is
    pub fn insert(&mut self, record: Record) {
        self.records.insert(record.key.to_bytes(), record);
    }
}

/// Uncommitted changes layered over a store
///
/// Reads see staged changes first, so later operations in a batch observe
/// earlier ones. Nothing reaches the store until [`WriteSet::into_changes`]
/// is applied.
#[derive(Debug)]
pub struct WriteSet<'s> {
    store: &'s PartitionStore,
    staged: BTreeMap<Vec<u8>, Option<Record>>,
}

impl<'s> WriteSet<'s> {
    /// Empty write set over `store`
    pub fn new(store: &'s PartitionStore) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
        }
    }

    /// Current record under `encoded`, including staged changes
    pub fn current(&self, encoded: &[u8]) -> Option<&Record> {
        match self.staged.get(encoded) {
            Some(staged) => staged.as_ref(),
            None => self.store.get(encoded),
        }
    }

    /// Stage a write
    pub fn put(&mut self, encoded: Vec<u8>, record: Record) {
        self.staged.insert(encoded, Some(record));
    }

    /// Stage a removal
    pub fn remove(&mut self, encoded: Vec<u8>) {
        self.staged.insert(encoded, None);
    }

    /// Number of staged changes
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Release the store borrow and hand back the staged changes
    pub fn into_changes(self) -> Vec<(Vec<u8>, Option<Record>)> {
        self.staged.into_iter().collect()
    }
}
