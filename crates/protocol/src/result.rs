//! Result model
//!
//! [`OperationResult`] mirrors [`Operation`](crate::Operation) variant for
//! variant. Results are built once by the executing node and never mutated.
//!
//! Conditional failures are data: a `PutIfAbsent` on a present key yields
//! `WriteResult { success: false, new_version: None, .. }`, not an error.
//! Likewise an aborted execute batch is [`ExecuteOutcome::Aborted`].

use shardline_core::{Key, KeyValueVersion, KeyVersion, Value, ValueVersion, Version};

/// Outcome of a single-key write or delete
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteResult {
    /// Whether the write took effect
    pub success: bool,
    /// Version of the new state; `None` for deletes and failed conditions
    pub new_version: Option<Version>,
    /// Value before the operation, when requested and the key existed
    pub previous_value: Option<Value>,
    /// Version before the operation, when requested and the key existed
    pub previous_version: Option<Version>,
    /// Table of the written record; decoded from V2
    pub table_id: Option<u64>,
}

impl WriteResult {
    /// A successful write producing `version`
    pub fn written(version: Version) -> Self {
        Self {
            success: true,
            new_version: Some(version),
            ..Default::default()
        }
    }

    /// A conditional failure or a delete of an absent key
    pub fn unsuccessful() -> Self {
        Self::default()
    }

    /// A successful delete
    pub fn deleted() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }
}

/// One record of a scan batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Record key
    pub key: Key,
    /// Record version
    pub version: Version,
    /// Record value; `None` for keys-only scans
    pub value: Option<Value>,
}

/// One batch of a resumable scan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanBatch {
    /// Records in the requested order
    pub entries: Vec<ScanEntry>,
    /// Whether the partition holds more records past the last entry
    pub has_more: bool,
}

impl ScanBatch {
    /// Key to resume after, if the batch is non-empty
    pub fn last_key(&self) -> Option<&Key> {
        self.entries.last().map(|e| &e.key)
    }
}

/// Outcome of an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// Every abort condition held; all effects are visible
    Committed(Vec<OperationResult>),
    /// An operation with `abort_if_unsuccessful` failed; no effect is visible
    Aborted {
        /// Zero-based index of the failing operation
        failed_index: usize,
        /// That operation's result, including any requested previous state
        failed_result: Box<OperationResult>,
    },
}

impl ExecuteOutcome {
    /// Whether the batch committed
    pub fn is_committed(&self) -> bool {
        matches!(self, ExecuteOutcome::Committed(_))
    }
}

/// Result of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Result of `Get`
    Get {
        /// Record, if present
        record: Option<ValueVersion>,
        /// Table of the record; decoded from V2
        table_id: Option<u64>,
    },
    /// Result of `Put`
    Put(WriteResult),
    /// Result of `PutIfAbsent`
    PutIfAbsent(WriteResult),
    /// Result of `PutIfPresent`
    PutIfPresent(WriteResult),
    /// Result of `PutIfVersion`
    PutIfVersion(WriteResult),
    /// Result of `Delete`
    Delete(WriteResult),
    /// Result of `DeleteIfVersion`
    DeleteIfVersion(WriteResult),
    /// Result of `MultiGetKeys`, in key order
    MultiGetKeys(Vec<KeyVersion>),
    /// Result of `MultiGetValues`, in key order
    MultiGetValues(Vec<KeyValueVersion>),
    /// Result of `MultiDelete`: number of records removed
    MultiDelete(u64),
    /// Result of `Iterate`
    Iterate(ScanBatch),
    /// Result of `TableIterate`
    TableIterate(ScanBatch),
    /// Result of `Execute`
    Execute(ExecuteOutcome),
}

impl OperationResult {
    /// Whether the operation succeeded.
    ///
    /// Reads always succeed; writes report their condition; an execute
    /// succeeds when it committed.
    pub fn is_success(&self) -> bool {
        match self {
            OperationResult::Put(w)
            | OperationResult::PutIfAbsent(w)
            | OperationResult::PutIfPresent(w)
            | OperationResult::PutIfVersion(w)
            | OperationResult::Delete(w)
            | OperationResult::DeleteIfVersion(w) => w.success,
            OperationResult::Execute(outcome) => outcome.is_committed(),
            OperationResult::Get { .. }
            | OperationResult::MultiGetKeys(_)
            | OperationResult::MultiGetValues(_)
            | OperationResult::MultiDelete(_)
            | OperationResult::Iterate(_)
            | OperationResult::TableIterate(_) => true,
        }
    }

    /// Write result of a single-key write or delete
    pub fn as_write(&self) -> Option<&WriteResult> {
        match self {
            OperationResult::Put(w)
            | OperationResult::PutIfAbsent(w)
            | OperationResult::PutIfPresent(w)
            | OperationResult::PutIfVersion(w)
            | OperationResult::Delete(w)
            | OperationResult::DeleteIfVersion(w) => Some(w),
            _ => None,
        }
    }

    /// Consume into a write result
    pub fn into_write(self) -> Option<WriteResult> {
        match self {
            OperationResult::Put(w)
            | OperationResult::PutIfAbsent(w)
            | OperationResult::PutIfPresent(w)
            | OperationResult::PutIfVersion(w)
            | OperationResult::Delete(w)
            | OperationResult::DeleteIfVersion(w) => Some(w),
            _ => None,
        }
    }

    /// Consume into a scan batch
    pub fn into_scan_batch(self) -> Option<ScanBatch> {
        match self {
            OperationResult::Iterate(b) | OperationResult::TableIterate(b) => Some(b),
            _ => None,
        }
    }

    /// Variant name for diagnostics
    pub fn variant_name(&self) -> &'static str {
        match self {
            OperationResult::Get { .. } => "get",
            OperationResult::Put(_) => "put",
            OperationResult::PutIfAbsent(_) => "put_if_absent",
            OperationResult::PutIfPresent(_) => "put_if_present",
            OperationResult::PutIfVersion(_) => "put_if_version",
            OperationResult::Delete(_) => "delete",
            OperationResult::DeleteIfVersion(_) => "delete_if_version",
            OperationResult::MultiGetKeys(_) => "multi_get_keys",
            OperationResult::MultiGetValues(_) => "multi_get",
            OperationResult::MultiDelete(_) => "multi_delete",
            OperationResult::Iterate(_) => "iterate",
            OperationResult::TableIterate(_) => "table_iterate",
            OperationResult::Execute(_) => "execute",
        }
    }
}
