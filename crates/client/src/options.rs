//! Per-call options and write outcomes
//!
//! Fields left as `None` fall back to the [`ClientConfig`] defaults.

use shardline_core::{
    Consistency, Depth, Direction, Durability, Key, KeyRange, ReturnChoice, Value, Version,
};
use shardline_protocol::{ExecuteOutcome, IterateSpec, OperationResult, WriteResult};
use std::time::Duration;

use crate::config::ClientConfig;
use crate::dispatcher::RequestPolicy;

/// Options of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Read consistency
    pub consistency: Option<Consistency>,
    /// Call timeout
    pub timeout: Option<Duration>,
}

impl ReadOptions {
    /// All defaults from configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the consistency
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn resolve(&self, config: &ClientConfig) -> (RequestPolicy, Duration) {
        let policy = RequestPolicy {
            consistency: self
                .consistency
                .unwrap_or_else(|| config.consistency().unwrap_or_default()),
            durability: Durability::default(),
        };
        (policy, self.timeout.unwrap_or_else(|| config.request_timeout()))
    }
}

/// Options of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Previous state to return
    pub return_choice: ReturnChoice,
    /// Write durability
    pub durability: Option<Durability>,
    /// Call timeout
    pub timeout: Option<Duration>,
}

impl WriteOptions {
    /// All defaults from configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the return choice
    pub fn with_return_choice(mut self, choice: ReturnChoice) -> Self {
        self.return_choice = choice;
        self
    }

    /// Set the durability
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = Some(durability);
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn resolve(&self, config: &ClientConfig) -> (RequestPolicy, Duration) {
        let policy = RequestPolicy {
            consistency: Consistency::default(),
            durability: self
                .durability
                .unwrap_or_else(|| config.durability().unwrap_or_default()),
        };
        (policy, self.timeout.unwrap_or_else(|| config.request_timeout()))
    }
}

/// State of a key before a write, as selected by the return choice
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreviousState {
    /// Previous value
    pub value: Option<Value>,
    /// Previous version
    pub version: Option<Version>,
}

impl PreviousState {
    /// Whether nothing was returned
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.version.is_none()
    }
}

/// Outcome of a single-key write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Whether the write took effect
    pub success: bool,
    /// Version of the new state; `None` for deletes and failed conditions
    pub version: Option<Version>,
    /// State before the write, when requested and the key existed
    pub previous: PreviousState,
    /// Attempts made
    pub attempts: usize,
    /// A conditional write failed after being retried.
    ///
    /// The failure may stem from this call's own earlier attempt having
    /// committed. Only the caller can tell.
    pub ambiguous: bool,
}

impl WriteOutcome {
    pub(crate) fn from_result(result: WriteResult, attempts: usize, retry_ambiguous: bool) -> Self {
        Self {
            success: result.success,
            version: result.new_version,
            previous: PreviousState {
                value: result.previous_value,
                version: result.previous_version,
            },
            attempts,
            ambiguous: retry_ambiguous && attempts > 1 && !result.success,
        }
    }
}

/// Outcome of an execute batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Committed results or the member that aborted the batch
    pub outcome: ExecuteOutcome,
    /// Attempts made
    pub attempts: usize,
    /// A conditional member failed after the batch was retried.
    ///
    /// An earlier attempt may have committed and caused the failure.
    pub ambiguous: bool,
}

impl BatchOutcome {
    pub(crate) fn from_outcome(
        outcome: ExecuteOutcome,
        attempts: usize,
        retry_ambiguous: bool,
    ) -> Self {
        let failed = match &outcome {
            ExecuteOutcome::Aborted { .. } => true,
            ExecuteOutcome::Committed(results) => {
                !results.iter().all(OperationResult::is_success)
            }
        };
        Self {
            outcome,
            attempts,
            ambiguous: retry_ambiguous && attempts > 1 && failed,
        }
    }

    /// Whether every member was applied
    pub fn is_committed(&self) -> bool {
        self.outcome.is_committed()
    }
}

/// Options of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Subtree root. Partition iterators need a complete major path; store
    /// scans accept a partial one or none.
    pub parent: Option<Key>,
    /// Restriction on the first component below the parent
    pub range: Option<KeyRange>,
    /// Depth of the subtree
    pub depth: Depth,
    /// Record order
    pub direction: Direction,
    /// Records per batch
    pub batch_size: Option<u32>,
    /// Return keys and versions only
    pub keys_only: bool,
    /// Only records of this table
    pub table_id: Option<u64>,
    /// Read consistency and per-batch timeout
    pub read: ReadOptions,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            parent: None,
            range: None,
            depth: Depth::default(),
            direction: Direction::Unordered,
            batch_size: None,
            keys_only: false,
            table_id: None,
            read: ReadOptions::default(),
        }
    }
}

impl ScanOptions {
    /// Unordered scan of everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan below `parent`
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Restrict the first component below the parent
    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Set the depth
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    /// Set the direction
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Return keys and versions only
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Restrict to one table
    pub fn with_table_id(mut self, table_id: u64) -> Self {
        self.table_id = Some(table_id);
        self
    }

    /// Set read options
    pub fn with_read_options(mut self, read: ReadOptions) -> Self {
        self.read = read;
        self
    }

    pub(crate) fn to_spec(&self, config: &ClientConfig) -> IterateSpec {
        IterateSpec {
            parent: self.parent.clone(),
            range: self.range.clone(),
            depth: self.depth,
            direction: self.direction,
            batch_size: self.batch_size.unwrap_or(config.iteration.batch_size),
            resume_key: None,
            keys_only: self.keys_only,
            within_major_path: false,
        }
    }
}
