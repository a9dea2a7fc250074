//! Parallel store scan
//!
//! Partitions are grouped by the shard (rep group) hosting them. Worker
//! threads take whole shards off a shared queue and stream batches back
//! through a bounded channel, so at most `max_results_batches` batches are
//! buffered no matter how fast the workers are.
//!
//! # Cancellation
//!
//! [`ParallelScanIterator::close`] raises a flag checked before every
//! request and drops the receiving end of the channel, which wakes any
//! worker blocked on a full channel. Dropping the iterator closes it.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use shardline_core::{Direction, Error, PartitionId, RepGroupId, Result};
use shardline_protocol::ScanEntry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::dispatcher::RequestDispatcher;
use crate::iterator::PartitionIterator;
use crate::options::ScanOptions;

/// Consecutive failed batches after which a worker abandons a partition
const MAX_CONSECUTIVE_FAILURES: usize = 3;

/// Progress of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMetrics {
    /// Partition scanned
    pub partition: PartitionId,
    /// Shard that served it
    pub shard: RepGroupId,
    /// Records delivered so far
    pub records: u64,
    /// Time spent fetching batches
    pub scan_time: Duration,
    /// Whether the partition has been fully scanned
    pub complete: bool,
}

/// Progress of one shard, summed over its partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardMetrics {
    /// Shard
    pub shard: RepGroupId,
    /// Records delivered so far
    pub records: u64,
    /// Time spent fetching batches
    pub scan_time: Duration,
    /// Partitions fully scanned
    pub partitions_complete: usize,
}

#[derive(Debug)]
struct Shard {
    id: RepGroupId,
    partitions: Vec<PartitionId>,
}

enum WorkerMessage {
    Batch(Vec<ScanEntry>),
    Failed(Error),
}

struct ScanContext {
    dispatcher: Arc<RequestDispatcher>,
    options: ScanOptions,
    queue: Mutex<VecDeque<Shard>>,
    metrics: Mutex<FxHashMap<PartitionId, PartitionMetrics>>,
    closed: AtomicBool,
}

/// Unordered scan fanned out across shards
pub struct ParallelScanIterator {
    context: Arc<ScanContext>,
    receiver: Option<Receiver<WorkerMessage>>,
    workers: Vec<JoinHandle<()>>,
    buffer: VecDeque<ScanEntry>,
}

impl ParallelScanIterator {
    /// Start scanning every partition of the current topology.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` unless the direction is `Unordered`.
    pub fn start(dispatcher: Arc<RequestDispatcher>, options: ScanOptions) -> Result<Self> {
        if options.direction != Direction::Unordered {
            return Err(Error::illegal_argument(format!(
                "parallel scans must be unordered, got {:?}",
                options.direction
            )));
        }

        let topology = dispatcher.topology();
        let shards: VecDeque<Shard> = topology
            .rep_groups()
            .iter()
            .map(|g| Shard {
                id: g.id,
                partitions: topology.partitions_of(g.id),
            })
            .filter(|s| !s.partitions.is_empty())
            .collect();

        let iteration = &dispatcher.config().iteration;
        let workers = iteration.workers_for(shards.len());
        let capacity = iteration.results_buffer_for(workers);

        let metrics = shards
            .iter()
            .flat_map(|s| {
                s.partitions.iter().map(move |p| {
                    (
                        *p,
                        PartitionMetrics {
                            partition: *p,
                            shard: s.id,
                            records: 0,
                            scan_time: Duration::ZERO,
                            complete: false,
                        },
                    )
                })
            })
            .collect();

        info!(
            shards = shards.len(),
            workers = workers,
            buffer = capacity,
            "Starting parallel scan"
        );

        let context = Arc::new(ScanContext {
            dispatcher,
            options,
            queue: Mutex::new(shards),
            metrics: Mutex::new(metrics),
            closed: AtomicBool::new(false),
        });

        let (sender, receiver) = mpsc::sync_channel(capacity);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let context = Arc::clone(&context);
            let sender = sender.clone();
            let handle = thread::Builder::new()
                .name(format!("shardline-scan-{}", index))
                .spawn(move || run_worker(index, &context, &sender))
                .map_err(|e| Error::RemoteFault {
                    message: format!("failed to spawn scan worker: {}", e),
                    remote: false,
                })?;
            handles.push(handle);
        }

        Ok(Self {
            context,
            receiver: Some(receiver),
            workers: handles,
            buffer: VecDeque::new(),
        })
    }

    /// Stop the scan. Batches not yet delivered are discarded.
    pub fn close(&mut self) {
        if self.context.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.receiver = None;
        self.buffer.clear();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Scan worker panicked");
            }
        }
        debug!("Parallel scan closed");
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.context.closed.load(Ordering::Acquire)
    }

    /// Progress per partition, ascending
    pub fn partition_metrics(&self) -> Vec<PartitionMetrics> {
        let mut all: Vec<PartitionMetrics> =
            self.context.metrics.lock().values().copied().collect();
        all.sort_by_key(|m| m.partition);
        all
    }

    /// Progress per shard, ascending
    pub fn shard_metrics(&self) -> Vec<ShardMetrics> {
        let mut shards: FxHashMap<RepGroupId, ShardMetrics> = FxHashMap::default();
        for m in self.context.metrics.lock().values() {
            let entry = shards.entry(m.shard).or_insert(ShardMetrics {
                shard: m.shard,
                records: 0,
                scan_time: Duration::ZERO,
                partitions_complete: 0,
            });
            entry.records += m.records;
            entry.scan_time += m.scan_time;
            if m.complete {
                entry.partitions_complete += 1;
            }
        }
        let mut all: Vec<ShardMetrics> = shards.into_values().collect();
        all.sort_by_key(|m| m.shard);
        all
    }
}

impl Iterator for ParallelScanIterator {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            let message = self.receiver.as_ref()?.recv();
            match message {
                Ok(WorkerMessage::Batch(entries)) => self.buffer.extend(entries),
                Ok(WorkerMessage::Failed(e)) => return Some(Err(e)),
                Err(_) => {
                    // Every worker finished and dropped its sender
                    self.receiver = None;
                    for handle in self.workers.drain(..) {
                        if handle.join().is_err() {
                            warn!("Scan worker panicked");
                        }
                    }
                    return None;
                }
            }
        }
    }
}

impl Drop for ParallelScanIterator {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ParallelScanIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelScanIterator")
            .field("workers", &self.workers.len())
            .field("buffered", &self.buffer.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run_worker(index: usize, context: &ScanContext, sender: &SyncSender<WorkerMessage>) {
    debug!(worker = index, "Scan worker started");
    loop {
        if context.closed.load(Ordering::Acquire) {
            break;
        }
        let shard = match context.queue.lock().pop_front() {
            Some(shard) => shard,
            None => break,
        };
        debug!(worker = index, shard = %shard.id, "Scanning shard");
        for partition in &shard.partitions {
            if !scan_partition(*partition, context, sender) {
                debug!(worker = index, "Scan worker stopping");
                return;
            }
        }
    }
    debug!(worker = index, "Scan worker finished");
}

/// Stream one partition. Returns false once the scan was closed.
fn scan_partition(
    partition: PartitionId,
    context: &ScanContext,
    sender: &SyncSender<WorkerMessage>,
) -> bool {
    let mut it = PartitionIterator::for_partition(
        Arc::clone(&context.dispatcher),
        partition,
        &context.options,
    );
    let mut failures = 0;

    while !it.is_exhausted() {
        if context.closed.load(Ordering::Acquire) {
            return false;
        }
        let started = Instant::now();
        let fetched = it.fetch_batch();
        let elapsed = started.elapsed();

        let message = match fetched {
            Ok(count) => {
                failures = 0;
                if let Some(m) = context.metrics.lock().get_mut(&partition) {
                    m.records += count as u64;
                    m.scan_time += elapsed;
                }
                let entries = it.take_buffered();
                if entries.is_empty() {
                    continue;
                }
                WorkerMessage::Batch(entries)
            }
            Err(e) => {
                failures += 1;
                if let Some(m) = context.metrics.lock().get_mut(&partition) {
                    m.scan_time += elapsed;
                }
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!(partition = %partition, error = %e, "Abandoning partition");
                    return sender.send(WorkerMessage::Failed(e)).is_ok();
                }
                WorkerMessage::Failed(e)
            }
        };
        if sender.send(message).is_err() {
            return false;
        }
    }

    if let Some(m) = context.metrics.lock().get_mut(&partition) {
        m.complete = true;
    }
    true
}
