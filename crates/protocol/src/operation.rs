//! Operation model
//!
//! [`Operation`] is the closed set of requests a client can send to a rep
//! group. Every variant is matched exhaustively at dispatch and at the
//! codec; adding a variant is a protocol change gated by a serial version.

use shardline_core::{
    Depth, Direction, Error, Key, KeyRange, Limits, MessageCatalog, MessageId, Result,
    ReturnChoice, Value, Version,
};

/// Wire tag of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Single-key read
    Get = 0x01,
    /// Unconditional write
    Put = 0x02,
    /// Write if the key is absent
    PutIfAbsent = 0x03,
    /// Write if the key is present
    PutIfPresent = 0x04,
    /// Write if the current version matches
    PutIfVersion = 0x05,
    /// Unconditional delete
    Delete = 0x06,
    /// Delete if the current version matches
    DeleteIfVersion = 0x07,
    /// Keys and versions of a subtree
    MultiGetKeys = 0x08,
    /// Records of a subtree
    MultiGetValues = 0x09,
    /// Delete a subtree
    MultiDelete = 0x0A,
    /// One batch of a resumable scan
    Iterate = 0x0B,
    /// One batch of a resumable scan restricted to a table
    TableIterate = 0x0C,
    /// Atomic same-partition batch
    Execute = 0x0D,
}

impl OpCode {
    /// Decode a wire tag
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => OpCode::Get,
            0x02 => OpCode::Put,
            0x03 => OpCode::PutIfAbsent,
            0x04 => OpCode::PutIfPresent,
            0x05 => OpCode::PutIfVersion,
            0x06 => OpCode::Delete,
            0x07 => OpCode::DeleteIfVersion,
            0x08 => OpCode::MultiGetKeys,
            0x09 => OpCode::MultiGetValues,
            0x0A => OpCode::MultiDelete,
            0x0B => OpCode::Iterate,
            0x0C => OpCode::TableIterate,
            0x0D => OpCode::Execute,
            _ => return None,
        })
    }

    /// Lower-case operation name used in logs and messages
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Get => "get",
            OpCode::Put => "put",
            OpCode::PutIfAbsent => "put_if_absent",
            OpCode::PutIfPresent => "put_if_present",
            OpCode::PutIfVersion => "put_if_version",
            OpCode::Delete => "delete",
            OpCode::DeleteIfVersion => "delete_if_version",
            OpCode::MultiGetKeys => "multi_get_keys",
            OpCode::MultiGetValues => "multi_get",
            OpCode::MultiDelete => "multi_delete",
            OpCode::Iterate => "iterate",
            OpCode::TableIterate => "table_iterate",
            OpCode::Execute => "execute",
        }
    }
}

/// How an operation behaves when re-issued after an unknown outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryClass {
    /// Never mutates state
    ReadOnly,
    /// Re-issuing converges on the same observable state
    Idempotent,
    /// A retry may report a conditional failure caused by its own earlier
    /// attempt; the caller must be told
    Ambiguous,
}

/// Subtree selection for multi-key operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiKeySpec {
    /// Subtree root; must carry a complete major path
    pub parent: Key,
    /// Restriction on the first component below the parent
    pub range: Option<KeyRange>,
    /// Depth of the subtree
    pub depth: Depth,
}

impl MultiKeySpec {
    /// Whole subtree below and including `parent`
    pub fn new(parent: Key) -> Self {
        Self {
            parent,
            range: None,
            depth: Depth::default(),
        }
    }

    /// Restrict by range
    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Restrict by depth
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    /// Whether `key` falls in this subtree. Only keys sharing the parent's
    /// major path qualify.
    pub fn contains(&self, key: &Key) -> bool {
        key.is_in_minor_scope(&self.parent, self.range.as_ref(), self.depth)
    }
}

/// One batch of a resumable scan over a single partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterateSpec {
    /// Subtree root; `None` scans the whole partition. May be a partial
    /// major path.
    pub parent: Option<Key>,
    /// Restriction on the first component below the parent
    pub range: Option<KeyRange>,
    /// Depth of the subtree
    pub depth: Depth,
    /// Order of returned records
    pub direction: Direction,
    /// Maximum records in the batch
    pub batch_size: u32,
    /// Last key of the previous batch; the batch starts strictly after it
    pub resume_key: Option<Key>,
    /// Return keys and versions only
    pub keys_only: bool,
    /// The parent is a complete major path; descendants extend it through
    /// the minor path only
    pub within_major_path: bool,
}

impl IterateSpec {
    /// Scan of the whole partition
    pub fn new(direction: Direction, batch_size: u32) -> Self {
        Self {
            parent: None,
            range: None,
            depth: Depth::default(),
            direction,
            batch_size,
            resume_key: None,
            keys_only: false,
            within_major_path: false,
        }
    }

    /// Whether `key` falls in the scanned subtree
    pub fn contains(&self, key: &Key) -> bool {
        match &self.parent {
            None => true,
            Some(parent) if self.within_major_path => {
                key.is_in_minor_scope(parent, self.range.as_ref(), self.depth)
            }
            Some(parent) => key.is_in_scope(parent, self.range.as_ref(), self.depth),
        }
    }
}

/// An operation inside an execute batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOperation {
    /// The write to perform
    pub operation: Operation,
    /// Abort the whole batch if this operation does not succeed
    pub abort_if_unsuccessful: bool,
}

impl BatchOperation {
    /// Wrap an operation
    pub fn new(operation: Operation, abort_if_unsuccessful: bool) -> Self {
        Self {
            operation,
            abort_if_unsuccessful,
        }
    }
}

/// A request to a rep group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read one record
    Get {
        /// Key to read
        key: Key,
        /// Owning table; encoded from V2
        table_id: Option<u64>,
    },
    /// Write unconditionally
    Put {
        /// Key to write
        key: Key,
        /// New value
        value: Value,
        /// Previous state to return
        return_choice: ReturnChoice,
        /// Owning table; encoded from V2
        table_id: Option<u64>,
    },
    /// Write only if the key is absent
    PutIfAbsent {
        /// Key to write
        key: Key,
        /// New value
        value: Value,
        /// Previous state to return
        return_choice: ReturnChoice,
        /// Owning table; encoded from V2
        table_id: Option<u64>,
    },
    /// Write only if the key is present
    PutIfPresent {
        /// Key to write
        key: Key,
        /// New value
        value: Value,
        /// Previous state to return
        return_choice: ReturnChoice,
        /// Owning table; encoded from V2
        table_id: Option<u64>,
    },
    /// Write only if the current version equals `match_version`
    PutIfVersion {
        /// Key to write
        key: Key,
        /// New value
        value: Value,
        /// Required current version
        match_version: Version,
        /// Previous state to return
        return_choice: ReturnChoice,
        /// Owning table; encoded from V2
        table_id: Option<u64>,
    },
    /// Delete unconditionally
    Delete {
        /// Key to delete
        key: Key,
        /// Previous state to return
        return_choice: ReturnChoice,
        /// Owning table; encoded from V2
        table_id: Option<u64>,
    },
    /// Delete only if the current version equals `match_version`
    DeleteIfVersion {
        /// Key to delete
        key: Key,
        /// Required current version
        match_version: Version,
        /// Previous state to return
        return_choice: ReturnChoice,
        /// Owning table; encoded from V2
        table_id: Option<u64>,
    },
    /// Keys and versions of a subtree
    MultiGetKeys(MultiKeySpec),
    /// Records of a subtree
    MultiGetValues(MultiKeySpec),
    /// Delete a subtree
    MultiDelete(MultiKeySpec),
    /// One batch of a scan
    Iterate(IterateSpec),
    /// One batch of a scan restricted to records of one table. V2 only.
    TableIterate {
        /// Table to scan
        table_id: u64,
        /// Scan parameters
        spec: IterateSpec,
    },
    /// Atomic batch of writes sharing one major path
    Execute(Vec<BatchOperation>),
}

impl Operation {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Read `key`
    pub fn get(key: Key) -> Self {
        Operation::Get { key, table_id: None }
    }

    /// Write `value` at `key`
    pub fn put(key: Key, value: impl Into<Value>) -> Self {
        Operation::Put {
            key,
            value: value.into(),
            return_choice: ReturnChoice::None,
            table_id: None,
        }
    }

    /// Write `value` at `key` if absent
    pub fn put_if_absent(key: Key, value: impl Into<Value>) -> Self {
        Operation::PutIfAbsent {
            key,
            value: value.into(),
            return_choice: ReturnChoice::None,
            table_id: None,
        }
    }

    /// Write `value` at `key` if present
    pub fn put_if_present(key: Key, value: impl Into<Value>) -> Self {
        Operation::PutIfPresent {
            key,
            value: value.into(),
            return_choice: ReturnChoice::None,
            table_id: None,
        }
    }

    /// Write `value` at `key` if its version is `match_version`
    pub fn put_if_version(key: Key, value: impl Into<Value>, match_version: Version) -> Self {
        Operation::PutIfVersion {
            key,
            value: value.into(),
            match_version,
            return_choice: ReturnChoice::None,
            table_id: None,
        }
    }

    /// Delete `key`
    pub fn delete(key: Key) -> Self {
        Operation::Delete {
            key,
            return_choice: ReturnChoice::None,
            table_id: None,
        }
    }

    /// Delete `key` if its version is `match_version`
    pub fn delete_if_version(key: Key, match_version: Version) -> Self {
        Operation::DeleteIfVersion {
            key,
            match_version,
            return_choice: ReturnChoice::None,
            table_id: None,
        }
    }

    /// Set the return choice of a single-key write. No effect on other
    /// operations.
    pub fn with_return_choice(mut self, choice: ReturnChoice) -> Self {
        match &mut self {
            Operation::Put { return_choice, .. }
            | Operation::PutIfAbsent { return_choice, .. }
            | Operation::PutIfPresent { return_choice, .. }
            | Operation::PutIfVersion { return_choice, .. }
            | Operation::Delete { return_choice, .. }
            | Operation::DeleteIfVersion { return_choice, .. } => *return_choice = choice,
            _ => {}
        }
        self
    }

    /// Set the table id of a single-key operation. No effect on others.
    pub fn with_table_id(mut self, id: u64) -> Self {
        match &mut self {
            Operation::Get { table_id, .. }
            | Operation::Put { table_id, .. }
            | Operation::PutIfAbsent { table_id, .. }
            | Operation::PutIfPresent { table_id, .. }
            | Operation::PutIfVersion { table_id, .. }
            | Operation::Delete { table_id, .. }
            | Operation::DeleteIfVersion { table_id, .. } => *table_id = Some(id),
            _ => {}
        }
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Wire tag
    pub fn opcode(&self) -> OpCode {
        match self {
            Operation::Get { .. } => OpCode::Get,
            Operation::Put { .. } => OpCode::Put,
            Operation::PutIfAbsent { .. } => OpCode::PutIfAbsent,
            Operation::PutIfPresent { .. } => OpCode::PutIfPresent,
            Operation::PutIfVersion { .. } => OpCode::PutIfVersion,
            Operation::Delete { .. } => OpCode::Delete,
            Operation::DeleteIfVersion { .. } => OpCode::DeleteIfVersion,
            Operation::MultiGetKeys(_) => OpCode::MultiGetKeys,
            Operation::MultiGetValues(_) => OpCode::MultiGetValues,
            Operation::MultiDelete(_) => OpCode::MultiDelete,
            Operation::Iterate(_) => OpCode::Iterate,
            Operation::TableIterate { .. } => OpCode::TableIterate,
            Operation::Execute(_) => OpCode::Execute,
        }
    }

    /// Key that determines the target partition.
    ///
    /// `None` for scans without a parent, whose partition is chosen by the
    /// caller, and for an empty batch.
    pub fn routing_key(&self) -> Option<&Key> {
        match self {
            Operation::Get { key, .. }
            | Operation::Put { key, .. }
            | Operation::PutIfAbsent { key, .. }
            | Operation::PutIfPresent { key, .. }
            | Operation::PutIfVersion { key, .. }
            | Operation::Delete { key, .. }
            | Operation::DeleteIfVersion { key, .. } => Some(key),
            Operation::MultiGetKeys(spec)
            | Operation::MultiGetValues(spec)
            | Operation::MultiDelete(spec) => Some(&spec.parent),
            Operation::Iterate(_) | Operation::TableIterate { .. } => None,
            Operation::Execute(ops) => ops.first().and_then(|b| b.operation.routing_key()),
        }
    }

    /// Return choice of a single-key write
    pub fn return_choice(&self) -> ReturnChoice {
        match self {
            Operation::Put { return_choice, .. }
            | Operation::PutIfAbsent { return_choice, .. }
            | Operation::PutIfPresent { return_choice, .. }
            | Operation::PutIfVersion { return_choice, .. }
            | Operation::Delete { return_choice, .. }
            | Operation::DeleteIfVersion { return_choice, .. } => *return_choice,
            _ => ReturnChoice::None,
        }
    }

    /// Table id carried by the operation
    pub fn table_id(&self) -> Option<u64> {
        match self {
            Operation::Get { table_id, .. }
            | Operation::Put { table_id, .. }
            | Operation::PutIfAbsent { table_id, .. }
            | Operation::PutIfPresent { table_id, .. }
            | Operation::PutIfVersion { table_id, .. }
            | Operation::Delete { table_id, .. }
            | Operation::DeleteIfVersion { table_id, .. } => *table_id,
            Operation::TableIterate { table_id, .. } => Some(*table_id),
            _ => None,
        }
    }

    /// Whether the operation may mutate state
    pub fn is_write(&self) -> bool {
        self.retry_class() != RetryClass::ReadOnly
    }

    /// Whether the operation may appear inside an execute batch
    pub fn allowed_in_batch(&self) -> bool {
        matches!(
            self,
            Operation::Put { .. }
                | Operation::PutIfAbsent { .. }
                | Operation::PutIfPresent { .. }
                | Operation::PutIfVersion { .. }
                | Operation::Delete { .. }
                | Operation::DeleteIfVersion { .. }
        )
    }

    /// Behaviour under retry
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Operation::Get { .. }
            | Operation::MultiGetKeys(_)
            | Operation::MultiGetValues(_)
            | Operation::Iterate(_)
            | Operation::TableIterate { .. } => RetryClass::ReadOnly,

            Operation::Put { .. } | Operation::Delete { .. } | Operation::MultiDelete(_) => {
                RetryClass::Idempotent
            }

            Operation::PutIfAbsent { .. }
            | Operation::PutIfPresent { .. }
            | Operation::PutIfVersion { .. }
            | Operation::DeleteIfVersion { .. } => RetryClass::Ambiguous,

            Operation::Execute(ops) => {
                if ops
                    .iter()
                    .any(|b| b.operation.retry_class() == RetryClass::Ambiguous)
                {
                    RetryClass::Ambiguous
                } else {
                    RetryClass::Idempotent
                }
            }
        }
    }
}

/// Client-side argument checks run before any network call.
///
/// Single-key keys and values are checked against `limits`; an execute
/// batch must be non-empty, within the operation limit, contain only
/// single-key writes, and share one major path.
pub fn validate_operation(
    operation: &Operation,
    limits: &Limits,
    messages: &MessageCatalog,
) -> Result<()> {
    match operation {
        Operation::Get { key, .. }
        | Operation::Delete { key, .. }
        | Operation::DeleteIfVersion { key, .. } => limits.validate_key(key),
        Operation::Put { key, value, .. }
        | Operation::PutIfAbsent { key, value, .. }
        | Operation::PutIfPresent { key, value, .. }
        | Operation::PutIfVersion { key, value, .. } => {
            limits.validate_key(key)?;
            limits.validate_value(value)
        }
        Operation::MultiGetKeys(spec)
        | Operation::MultiGetValues(spec)
        | Operation::MultiDelete(spec) => limits.validate_key(&spec.parent),
        Operation::Iterate(spec) | Operation::TableIterate { spec, .. } => {
            limits.validate_batch_size(spec.batch_size as usize)
        }
        Operation::Execute(ops) => validate_batch(ops, limits, messages),
    }
}

fn validate_batch(
    ops: &[BatchOperation],
    limits: &Limits,
    messages: &MessageCatalog,
) -> Result<()> {
    let first = match ops.first() {
        None => return Err(Error::illegal_argument(messages.format(MessageId::EmptyBatch, &[]))),
        Some(first) => first,
    };
    if ops.len() > limits.max_batch_operations {
        return Err(Error::illegal_argument(messages.format(
            MessageId::BatchTooLarge,
            &[&ops.len(), &limits.max_batch_operations],
        )));
    }

    let first_key = first.operation.routing_key();
    for (i, batch_op) in ops.iter().enumerate() {
        let op = &batch_op.operation;
        if !op.allowed_in_batch() {
            return Err(Error::illegal_argument(
                messages.format(MessageId::NotAllowedInBatch, &[&op.opcode().name()]),
            ));
        }
        validate_operation(op, limits, messages)?;

        match (first_key, op.routing_key()) {
            (Some(a), Some(b)) if a.same_major_path(b) => {}
            _ => {
                return Err(Error::illegal_argument(
                    messages.format(MessageId::BatchSpansPartitions, &[&0, &i]),
                ))
            }
        }
    }
    Ok(())
}
