//! Rep group service
//!
//! A [`RepGroupService`] owns the partitions placed on one rep group and
//! answers [`Request`]s for them. Each hosted partition sits behind its own
//! mutex; requests for different partitions never contend.
//!
//! A request for a partition the group does not host is answered with
//! `TopologyStale`, telling the client its partition map is out of date.

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use shardline_core::{
    Consistency, Error, Limits, MessageCatalog, MessageId, PartitionId, RepGroupId, Result,
};
use shardline_protocol::{validate_operation, OperationResult, Request, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::executor;
use crate::store::{PartitionStore, Record, VersionClock};

/// Partitions hosted by one rep group
pub struct RepGroupService {
    id: RepGroupId,
    clock: VersionClock,
    partitions: RwLock<FxHashMap<PartitionId, Arc<Mutex<PartitionStore>>>>,
    topo_seq: AtomicU64,
    limits: Limits,
    messages: Arc<MessageCatalog>,
}

impl RepGroupService {
    /// Service with no partitions
    pub fn new(id: RepGroupId, messages: Arc<MessageCatalog>) -> Self {
        Self {
            id,
            clock: VersionClock::new(),
            partitions: RwLock::new(FxHashMap::default()),
            topo_seq: AtomicU64::new(0),
            limits: Limits::default(),
            messages,
        }
    }

    /// Override the argument limits enforced on incoming operations
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Group identifier
    pub fn id(&self) -> RepGroupId {
        self.id
    }

    /// Highest VLSN this group has issued
    pub fn vlsn(&self) -> u64 {
        self.clock.current_vlsn()
    }

    /// Topology sequence number reported in responses
    pub fn topology_sequence(&self) -> u64 {
        self.topo_seq.load(Ordering::Acquire)
    }

    /// Record the topology sequence number this group runs under
    pub fn set_topology_sequence(&self, seq: u64) {
        self.topo_seq.fetch_max(seq, Ordering::AcqRel);
    }

    /// Start hosting an empty partition
    pub fn host_partition(&self, partition: PartitionId) {
        self.partitions
            .write()
            .entry(partition)
            .or_insert_with(|| Arc::new(Mutex::new(PartitionStore::new())));
    }

    /// Whether `partition` is hosted here
    pub fn hosts(&self, partition: PartitionId) -> bool {
        self.partitions.read().contains_key(&partition)
    }

    /// Hosted partitions, ascending
    pub fn hosted_partitions(&self) -> Vec<PartitionId> {
        let mut ids: Vec<PartitionId> = self.partitions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of records in a hosted partition
    pub fn record_count(&self, partition: PartitionId) -> Option<usize> {
        self.partitions
            .read()
            .get(&partition)
            .map(|store| store.lock().len())
    }

    /// Answer one request
    pub fn handle(&self, request: &Request) -> Response {
        let result = self.process(request);
        if let Err(e) = &result {
            debug!(group = %self.id, partition = %request.partition, error = %e, "Request failed");
        }
        Response {
            topo_seq: self.topology_sequence(),
            node_vlsn: self.vlsn(),
            result,
        }
    }

    fn process(&self, request: &Request) -> Result<OperationResult> {
        validate_operation(&request.operation, &self.limits, &self.messages)?;

        if !request.operation.is_write() {
            self.check_consistency(&request.consistency)?;
        }

        let store = self.store(request.partition)?;
        let mut guard = store.lock();
        executor::execute(&mut guard, &request.operation, &self.clock)
    }

    fn check_consistency(&self, consistency: &Consistency) -> Result<()> {
        if let Consistency::Version { version, .. } = consistency {
            if version.group_uuid() == self.clock.group_uuid()
                && version.vlsn() > self.clock.current_vlsn()
            {
                return Err(Error::ConsistencyNotMet {
                    message: self.messages.format(
                        MessageId::ConsistencyUnsatisfiable,
                        &[&self.id, &format!("version at vlsn {}", version.vlsn())],
                    ),
                });
            }
        }
        Ok(())
    }

    fn store(&self, partition: PartitionId) -> Result<Arc<Mutex<PartitionStore>>> {
        self.partitions.read().get(&partition).cloned().ok_or_else(|| {
            Error::topology_stale(
                Some(partition),
                self.messages
                    .format(MessageId::PartitionNotHosted, &[&partition, &self.id]),
            )
        })
    }

    /// Stop hosting `partition` and hand back its records
    pub fn release_partition(&self, partition: PartitionId) -> Result<Vec<Record>> {
        let store = self.partitions.write().remove(&partition).ok_or_else(|| {
            Error::topology_stale(
                Some(partition),
                self.messages
                    .format(MessageId::PartitionNotHosted, &[&partition, &self.id]),
            )
        })?;
        let records = store.lock().drain();
        Ok(records)
    }

    /// Host `partition` with `records`, issuing each a version from this group
    pub fn adopt_partition(&self, partition: PartitionId, records: Vec<Record>) -> usize {
        let mut store = PartitionStore::new();
        let count = records.len();
        for mut record in records {
            record.version = self.clock.issue();
            store.insert(record);
        }
        self.partitions
            .write()
            .insert(partition, Arc::new(Mutex::new(store)));
        count
    }

    /// Move `partition` and its records to `destination`.
    ///
    /// Every moved record gets a new version from the destination group, so
    /// versions read before the move no longer match.
    pub fn migrate_partition_to(
        &self,
        partition: PartitionId,
        destination: &RepGroupService,
    ) -> Result<usize> {
        if destination.id == self.id {
            return Err(Error::illegal_argument(format!(
                "{} already hosts {}",
                self.id, partition
            )));
        }
        let records = self.release_partition(partition)?;
        let moved = destination.adopt_partition(partition, records);
        info!(
            partition = %partition,
            from = %self.id,
            to = %destination.id,
            records = moved,
            "Migrated partition"
        );
        Ok(moved)
    }
}

impl std::fmt::Debug for RepGroupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepGroupService")
            .field("id", &self.id)
            .field("partitions", &self.hosted_partitions())
            .field("vlsn", &self.vlsn())
            .finish()
    }
}
