//! Key/value API
//!
//! [`KvStore`] is the entry point applications use. Every call is a single
//! request routed by its key, retried under the configured policy.
//!
//! # Example
//!
//! ```ignore
//! let store = KvStore::connect(topology, source, transport, ClientConfig::default())?;
//! let key = Key::parse("/user/42/-/email")?;
//!
//! let v1 = store.put(&key, "a@example.com")?;
//! assert!(store.put_if_absent(&key, "b@example.com")?.is_none());
//! store.put_if_version(&key, "c@example.com", v1.unwrap())?;
//! ```

use shardline_core::{Error, Key, KeyValueVersion, KeyVersion, Result, Value, ValueVersion, Version};
use shardline_protocol::{
    BatchOperation, MultiKeySpec, Operation, OperationResult, RetryClass, Transport,
};
use shardline_topology::{Topology, TopologySource};
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::dispatcher::RequestDispatcher;
use crate::iterator::{PartitionIterator, StoreIterator};
use crate::options::{BatchOutcome, ReadOptions, ScanOptions, WriteOptions, WriteOutcome};
use crate::parallel::ParallelScanIterator;

/// Client handle to a store
#[derive(Debug, Clone)]
pub struct KvStore {
    dispatcher: Arc<RequestDispatcher>,
}

impl KvStore {
    /// Wrap an existing dispatcher
    pub fn new(dispatcher: Arc<RequestDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Build a dispatcher and wrap it
    pub fn connect(
        topology: Topology,
        source: Arc<dyn TopologySource>,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self> {
        let dispatcher = RequestDispatcher::new(topology, source, transport, config)?;
        Ok(Self::new(Arc::new(dispatcher)))
    }

    /// Underlying dispatcher
    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current value and version of `key`
    pub fn get(&self, key: &Key) -> Result<Option<ValueVersion>> {
        self.get_with(key, &ReadOptions::default())
    }

    /// [`get`](Self::get) with explicit options
    pub fn get_with(&self, key: &Key, options: &ReadOptions) -> Result<Option<ValueVersion>> {
        match self.read(Operation::get(key.clone()), options)? {
            OperationResult::Get { record, .. } => Ok(record),
            other => Err(unexpected("get", &other)),
        }
    }

    /// Records of a subtree in key order, read as one snapshot
    pub fn multi_get(
        &self,
        spec: &MultiKeySpec,
        options: &ReadOptions,
    ) -> Result<Vec<KeyValueVersion>> {
        match self.read(Operation::MultiGetValues(spec.clone()), options)? {
            OperationResult::MultiGetValues(records) => Ok(records),
            other => Err(unexpected("multi_get", &other)),
        }
    }

    /// Keys and versions of a subtree in key order
    pub fn multi_get_keys(
        &self,
        spec: &MultiKeySpec,
        options: &ReadOptions,
    ) -> Result<Vec<KeyVersion>> {
        match self.read(Operation::MultiGetKeys(spec.clone()), options)? {
            OperationResult::MultiGetKeys(keys) => Ok(keys),
            other => Err(unexpected("multi_get_keys", &other)),
        }
    }

    fn read(&self, operation: Operation, options: &ReadOptions) -> Result<OperationResult> {
        let (policy, timeout) = options.resolve(self.dispatcher.config());
        Ok(self.dispatcher.dispatch(&operation, policy, timeout)?.result)
    }

    // =========================================================================
    // Single-key writes
    // =========================================================================

    /// Write unconditionally; returns the new version
    pub fn put(&self, key: &Key, value: impl Into<Value>) -> Result<Option<Version>> {
        Ok(self.put_returning(key, value, &WriteOptions::default())?.version)
    }

    /// Write only if `key` is absent; `None` if it was present
    pub fn put_if_absent(&self, key: &Key, value: impl Into<Value>) -> Result<Option<Version>> {
        Ok(self
            .put_if_absent_returning(key, value, &WriteOptions::default())?
            .version)
    }

    /// Write only if `key` is present; `None` if it was absent
    pub fn put_if_present(&self, key: &Key, value: impl Into<Value>) -> Result<Option<Version>> {
        Ok(self
            .put_if_present_returning(key, value, &WriteOptions::default())?
            .version)
    }

    /// Write only if the current version is `match_version`
    pub fn put_if_version(
        &self,
        key: &Key,
        value: impl Into<Value>,
        match_version: Version,
    ) -> Result<Option<Version>> {
        Ok(self
            .put_if_version_returning(key, value, match_version, &WriteOptions::default())?
            .version)
    }

    /// Delete `key`; false if it was already absent
    pub fn delete(&self, key: &Key) -> Result<bool> {
        Ok(self.delete_returning(key, &WriteOptions::default())?.success)
    }

    /// Delete `key` only if the current version is `match_version`
    pub fn delete_if_version(&self, key: &Key, match_version: Version) -> Result<bool> {
        Ok(self
            .delete_if_version_returning(key, match_version, &WriteOptions::default())?
            .success)
    }

    /// [`put`](Self::put) with options and the full outcome
    pub fn put_returning(
        &self,
        key: &Key,
        value: impl Into<Value>,
        options: &WriteOptions,
    ) -> Result<WriteOutcome> {
        self.write(Operation::put(key.clone(), value), options)
    }

    /// [`put_if_absent`](Self::put_if_absent) with options and the full outcome
    pub fn put_if_absent_returning(
        &self,
        key: &Key,
        value: impl Into<Value>,
        options: &WriteOptions,
    ) -> Result<WriteOutcome> {
        self.write(Operation::put_if_absent(key.clone(), value), options)
    }

    /// [`put_if_present`](Self::put_if_present) with options and the full outcome
    pub fn put_if_present_returning(
        &self,
        key: &Key,
        value: impl Into<Value>,
        options: &WriteOptions,
    ) -> Result<WriteOutcome> {
        self.write(Operation::put_if_present(key.clone(), value), options)
    }

    /// [`put_if_version`](Self::put_if_version) with options and the full outcome
    pub fn put_if_version_returning(
        &self,
        key: &Key,
        value: impl Into<Value>,
        match_version: Version,
        options: &WriteOptions,
    ) -> Result<WriteOutcome> {
        self.write(
            Operation::put_if_version(key.clone(), value, match_version),
            options,
        )
    }

    /// [`delete`](Self::delete) with options and the full outcome
    pub fn delete_returning(&self, key: &Key, options: &WriteOptions) -> Result<WriteOutcome> {
        self.write(Operation::delete(key.clone()), options)
    }

    /// [`delete_if_version`](Self::delete_if_version) with options and the
    /// full outcome
    pub fn delete_if_version_returning(
        &self,
        key: &Key,
        match_version: Version,
        options: &WriteOptions,
    ) -> Result<WriteOutcome> {
        self.write(
            Operation::delete_if_version(key.clone(), match_version),
            options,
        )
    }

    /// Perform any single-key write.
    ///
    /// The return choice of `options` replaces the operation's own.
    pub fn write(&self, operation: Operation, options: &WriteOptions) -> Result<WriteOutcome> {
        if !operation.allowed_in_batch() {
            return Err(Error::illegal_argument(format!(
                "{} is not a single-key write",
                operation.opcode().name()
            )));
        }
        let operation = operation.with_return_choice(options.return_choice);
        let ambiguous_class = operation.retry_class() == RetryClass::Ambiguous;
        let (policy, timeout) = options.resolve(self.dispatcher.config());
        let dispatched = self.dispatcher.dispatch(&operation, policy, timeout)?;
        match dispatched.result {
            OperationResult::Put(result)
            | OperationResult::PutIfAbsent(result)
            | OperationResult::PutIfPresent(result)
            | OperationResult::PutIfVersion(result)
            | OperationResult::Delete(result)
            | OperationResult::DeleteIfVersion(result) => Ok(WriteOutcome::from_result(
                result,
                dispatched.attempts,
                ambiguous_class,
            )),
            other => Err(unexpected("write", &other)),
        }
    }

    // =========================================================================
    // Multi-key writes
    // =========================================================================

    /// Delete a subtree; returns the number of records removed
    pub fn multi_delete(&self, spec: &MultiKeySpec, options: &WriteOptions) -> Result<u64> {
        let (policy, timeout) = options.resolve(self.dispatcher.config());
        let op = Operation::MultiDelete(spec.clone());
        match self.dispatcher.dispatch(&op, policy, timeout)?.result {
            OperationResult::MultiDelete(count) => Ok(count),
            other => Err(unexpected("multi_delete", &other)),
        }
    }

    /// Apply writes sharing one major path atomically.
    ///
    /// An aborted batch is returned as
    /// [`ExecuteOutcome::Aborted`](shardline_protocol::ExecuteOutcome::Aborted), not as
    /// an error, and is never retried. A batch lost in flight is resent, so
    /// a conditional failure after a retry is flagged as ambiguous.
    pub fn execute(
        &self,
        operations: Vec<BatchOperation>,
        options: &WriteOptions,
    ) -> Result<BatchOutcome> {
        let (policy, timeout) = options.resolve(self.dispatcher.config());
        let op = Operation::Execute(operations);
        let ambiguous_class = op.retry_class() == RetryClass::Ambiguous;
        let dispatched = self.dispatcher.dispatch(&op, policy, timeout)?;
        match dispatched.result {
            OperationResult::Execute(outcome) => Ok(BatchOutcome::from_outcome(
                outcome,
                dispatched.attempts,
                ambiguous_class,
            )),
            other => Err(unexpected("execute", &other)),
        }
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Batched scan below a parent key with a complete major path
    pub fn partition_iterator(&self, options: &ScanOptions) -> Result<PartitionIterator> {
        PartitionIterator::new(Arc::clone(&self.dispatcher), options)
    }

    /// Unordered scan of the store, one partition at a time
    pub fn store_iterator(&self, options: ScanOptions) -> Result<StoreIterator> {
        StoreIterator::new(Arc::clone(&self.dispatcher), options)
    }

    /// Unordered scan of the store fanned out across shards
    pub fn parallel_scan(&self, options: ScanOptions) -> Result<ParallelScanIterator> {
        ParallelScanIterator::start(Arc::clone(&self.dispatcher), options)
    }
}

fn unexpected(call: &str, result: &OperationResult) -> Error {
    Error::serialization(format!(
        "{} answered with a {} result",
        call,
        result.variant_name()
    ))
}
