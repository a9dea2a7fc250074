//! Resumable iterators
//!
//! Records are fetched one batch per request. After each batch the last key
//! becomes the resume key of the next request, so a forward or reverse scan
//! keeps key order across batch boundaries.
//!
//! A failed batch surfaces as [`Error::IterationFault`] carrying the resume
//! key in use. The iterator is left untouched, so advancing it again
//! retries the same batch.

use shardline_core::{Direction, Error, PartitionId, Result};
use shardline_protocol::{IterateSpec, Operation, ScanEntry};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::dispatcher::{RequestDispatcher, RequestPolicy};
use crate::options::ScanOptions;

/// Batched scan of one partition
pub struct PartitionIterator {
    dispatcher: Arc<RequestDispatcher>,
    partition: PartitionId,
    spec: IterateSpec,
    table_id: Option<u64>,
    policy: RequestPolicy,
    timeout: Duration,
    buffer: VecDeque<ScanEntry>,
    batches: usize,
    exhausted: bool,
}

impl PartitionIterator {
    /// Scan below a parent key with a complete major path.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` when no parent is given.
    pub fn new(dispatcher: Arc<RequestDispatcher>, options: &ScanOptions) -> Result<Self> {
        let parent = options.parent.as_ref().ok_or_else(|| {
            Error::illegal_argument("a partition iterator needs a parent key")
        })?;
        let partition = dispatcher.router().route(parent);
        let mut it = Self::for_partition(dispatcher, partition, options);
        // Longer major paths hash elsewhere; a colocated one is not a child
        it.spec.within_major_path = true;
        Ok(it)
    }

    /// Scan of an explicit partition
    pub fn for_partition(
        dispatcher: Arc<RequestDispatcher>,
        partition: PartitionId,
        options: &ScanOptions,
    ) -> Self {
        let spec = options.to_spec(dispatcher.config());
        let (policy, timeout) = options.read.resolve(dispatcher.config());
        Self {
            dispatcher,
            partition,
            spec,
            table_id: options.table_id,
            policy,
            timeout,
            buffer: VecDeque::new(),
            batches: 0,
            exhausted: false,
        }
    }

    /// Partition being scanned
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Batches fetched so far
    pub fn batches_fetched(&self) -> usize {
        self.batches
    }

    /// Fetch the next batch into the buffer.
    ///
    /// Returns the number of records fetched. Zero means the partition is
    /// exhausted.
    pub(crate) fn fetch_batch(&mut self) -> Result<usize> {
        if self.exhausted {
            return Ok(0);
        }
        let operation = match self.table_id {
            Some(table_id) => Operation::TableIterate {
                table_id,
                spec: self.spec.clone(),
            },
            None => Operation::Iterate(self.spec.clone()),
        };
        let dispatched = self
            .dispatcher
            .dispatch_to(self.partition, &operation, self.policy, self.timeout)
            .map_err(|e| Error::iteration_fault(self.spec.resume_key.clone(), e))?;
        let batch = dispatched.result.into_scan_batch().ok_or_else(|| {
            Error::iteration_fault(
                self.spec.resume_key.clone(),
                Error::serialization("scan answered with a non-scan result"),
            )
        })?;

        self.batches += 1;
        let fetched = batch.entries.len();
        if let Some(last) = batch.last_key() {
            self.spec.resume_key = Some(last.clone());
        }
        self.exhausted = !batch.has_more || fetched == 0;
        debug!(
            partition = %self.partition,
            records = fetched,
            more = !self.exhausted,
            "Fetched scan batch"
        );
        self.buffer.extend(batch.entries);
        Ok(fetched)
    }

    /// Take the buffered records of the last fetch
    pub(crate) fn take_buffered(&mut self) -> Vec<ScanEntry> {
        self.buffer.drain(..).collect()
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }
}

impl Iterator for PartitionIterator {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch_batch() {
                return Some(Err(e));
            }
        }
    }
}

impl std::fmt::Debug for PartitionIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionIterator")
            .field("partition", &self.partition)
            .field("resume_key", &self.spec.resume_key)
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// Unordered scan of the whole store, one partition at a time
pub struct StoreIterator {
    dispatcher: Arc<RequestDispatcher>,
    options: ScanOptions,
    pending: VecDeque<PartitionId>,
    current: Option<PartitionIterator>,
}

impl StoreIterator {
    /// Scan every partition of the current topology.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` unless the direction is `Unordered`.
    pub fn new(dispatcher: Arc<RequestDispatcher>, options: ScanOptions) -> Result<Self> {
        if options.direction != Direction::Unordered {
            return Err(Error::illegal_argument(format!(
                "store iteration must be unordered, got {:?}",
                options.direction
            )));
        }
        let pending = dispatcher.topology().partition_ids().collect();
        Ok(Self {
            dispatcher,
            options,
            pending,
            current: None,
        })
    }

    /// Partitions not yet started
    pub fn remaining_partitions(&self) -> usize {
        self.pending.len()
    }
}

impl Iterator for StoreIterator {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = self.current.as_mut() {
                match current.next() {
                    Some(item) => return Some(item),
                    None => self.current = None,
                }
            }
            let partition = self.pending.pop_front()?;
            self.current = Some(PartitionIterator::for_partition(
                Arc::clone(&self.dispatcher),
                partition,
                &self.options,
            ));
        }
    }
}

impl std::fmt::Debug for StoreIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreIterator")
            .field("current", &self.current)
            .field("pending", &self.pending.len())
            .finish()
    }
}
