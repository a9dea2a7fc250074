//! In-process cluster
//!
//! [`LocalCluster`] wires one [`RepGroupService`] per rep group of a
//! topology and implements [`Transport`] over them, so a client can run
//! against a complete store without sockets. It also serves as the
//! client's [`TopologySource`].
//!
//! Nodes of a group share the group's state; marking a node unavailable
//! makes the transport refuse frames addressed to it and reduces the
//! acknowledgments available to writes on its group.

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use shardline_core::{
    Error, MessageCatalog, PartitionId, RepGroupId, RepNodeId, Result,
};
use shardline_protocol::{
    decode_request, encode_response, Request, Response, SerialVersion, Transport,
};
use shardline_topology::{Topology, TopologySource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::service::RepGroupService;

/// Every rep group of a topology, in one process
pub struct LocalCluster {
    topology: RwLock<Arc<Topology>>,
    groups: FxHashMap<RepGroupId, Arc<RepGroupService>>,
    unavailable: RwLock<FxHashSet<RepNodeId>>,
    auth_token: RwLock<Option<String>>,
    serial_version: RwLock<SerialVersion>,
    latency: RwLock<Option<Duration>>,
    requests: AtomicU64,
}

impl LocalCluster {
    /// Start a service for every group and host each partition where the
    /// topology places it
    pub fn new(topology: Topology) -> Self {
        Self::with_messages(topology, Arc::new(MessageCatalog::default()))
    }

    /// Like [`LocalCluster::new`] with a custom message table
    pub fn with_messages(topology: Topology, messages: Arc<MessageCatalog>) -> Self {
        let mut groups = FxHashMap::default();
        for group in topology.rep_groups() {
            let svc = RepGroupService::new(group.id, Arc::clone(&messages));
            svc.set_topology_sequence(topology.sequence_number());
            for partition in topology.partitions_of(group.id) {
                svc.host_partition(partition);
            }
            groups.insert(group.id, Arc::new(svc));
        }

        info!(
            store = topology.store_name(),
            groups = groups.len(),
            partitions = topology.partition_count(),
            "Started local cluster"
        );

        Self {
            topology: RwLock::new(Arc::new(topology)),
            groups,
            unavailable: RwLock::new(FxHashSet::default()),
            auth_token: RwLock::new(None),
            serial_version: RwLock::new(SerialVersion::CURRENT),
            latency: RwLock::new(None),
            requests: AtomicU64::new(0),
        }
    }

    /// Current topology
    pub fn topology(&self) -> Arc<Topology> {
        Arc::clone(&self.topology.read())
    }

    /// Service of one group
    pub fn group(&self, id: RepGroupId) -> Option<Arc<RepGroupService>> {
        self.groups.get(&id).cloned()
    }

    /// Frames received so far, including refused ones
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Refuse frames addressed to `node`
    pub fn mark_unavailable(&self, node: RepNodeId) {
        warn!(node = %node, "Node taken down");
        self.unavailable.write().insert(node);
    }

    /// Accept frames addressed to `node` again
    pub fn mark_available(&self, node: RepNodeId) {
        info!(node = %node, "Node back up");
        self.unavailable.write().remove(&node);
    }

    /// Require every request to present `token`; `None` disables the check
    pub fn require_auth_token(&self, token: Option<String>) {
        *self.auth_token.write() = token;
    }

    /// Newest serial version the nodes speak
    pub fn set_serial_version(&self, version: SerialVersion) {
        *self.serial_version.write() = version;
    }

    /// Delay every reply by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Move `partition` to `to`, re-issuing record versions there, and
    /// publish a topology with a higher sequence number.
    pub fn migrate_partition(&self, partition: PartitionId, to: RepGroupId) -> Result<usize> {
        let mut topology = self.topology.write();
        let from = topology.group_for(partition).ok_or_else(|| {
            Error::topology_stale(Some(partition), format!("{} is not placed", partition))
        })?;
        let source = self.require_group(from)?;
        let destination = self.require_group(to)?;

        let next = topology.with_partition_moved(partition, to)?;
        let moved = source.migrate_partition_to(partition, &destination)?;

        let seq = next.sequence_number();
        *topology = Arc::new(next);
        for svc in self.groups.values() {
            svc.set_topology_sequence(seq);
        }
        Ok(moved)
    }

    fn require_group(&self, id: RepGroupId) -> Result<Arc<RepGroupService>> {
        self.group(id)
            .ok_or_else(|| Error::topology_stale(None, format!("{} is not running", id)))
    }

    fn is_unavailable(&self, node: RepNodeId) -> bool {
        self.unavailable.read().contains(&node)
    }

    /// Group members that are currently accepting frames
    fn available_members(&self, group: RepGroupId) -> (u32, u32) {
        let topology = self.topology();
        let Some(rg) = topology.rep_group(group) else {
            return (0, 0);
        };
        let total = rg.nodes.len() as u32;
        let up = rg.node_ids().filter(|n| !self.is_unavailable(*n)).count() as u32;
        (up, total)
    }

    fn check_auth(&self, request: &Request) -> Result<()> {
        let required = self.auth_token.read();
        match (required.as_deref(), request.auth_token.as_deref()) {
            (None, _) => Ok(()),
            (Some(_), None) => Err(Error::AuthenticationRequired {
                message: "request carries no credentials".to_string(),
            }),
            (Some(expected), Some(given)) if expected == given => Ok(()),
            (Some(_), Some(_)) => Err(Error::AuthenticationRequired {
                message: "credentials are no longer valid".to_string(),
            }),
        }
    }

    fn check_durability(&self, request: &Request, group: RepGroupId) -> Result<()> {
        if !request.operation.is_write() {
            return Ok(());
        }
        let (available, total) = self.available_members(group);
        let required = request.durability.required_acks(total);
        if available < required {
            return Err(Error::DurabilityNotMet {
                required,
                available,
                message: format!("{} has {} of {} nodes up", group, available, total),
            });
        }
        Ok(())
    }

    fn serve(&self, target: RepNodeId, request: &Request) -> Response {
        let group = target.group_id();
        let svc = match self.groups.get(&group) {
            Some(svc) => svc,
            None => {
                return Response::fault(
                    self.topology().sequence_number(),
                    0,
                    Error::topology_stale(
                        Some(request.partition),
                        format!("{} is not running", group),
                    ),
                )
            }
        };

        let precheck = self
            .check_auth(request)
            .and_then(|_| self.check_durability(request, group));
        match precheck {
            Ok(()) => svc.handle(request),
            Err(e) => Response::fault(svc.topology_sequence(), svc.vlsn(), e),
        }
    }
}

impl Transport for LocalCluster {
    fn send(&self, target: RepNodeId, frame: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if self.is_unavailable(target) {
            return Err(Error::node_unavailable(target, "node is down"));
        }

        if let Some(latency) = *self.latency.read() {
            if latency > timeout {
                std::thread::sleep(timeout);
                return Err(Error::RequestTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                    message: format!("{} did not reply in time", target),
                });
            }
            std::thread::sleep(latency);
        }

        let (request, version) = decode_request(&frame)?;
        let server_max = *self.serial_version.read();
        if version > server_max {
            return Err(Error::UnsupportedOperation {
                serial_version: version.get(),
                reason: format!("{} speaks at most {}", target, server_max),
            });
        }

        debug!(
            node = %target,
            partition = %request.partition,
            op = request.operation.opcode().name(),
            "Serving request"
        );
        let response = self.serve(target, &request);
        encode_response(&response, version)
    }

    fn server_serial_version(&self, target: RepNodeId) -> Result<SerialVersion> {
        if self.is_unavailable(target) {
            return Err(Error::node_unavailable(target, "node is down"));
        }
        Ok(*self.serial_version.read())
    }
}

impl TopologySource for LocalCluster {
    fn fetch(&self) -> Result<Topology> {
        Ok(self.topology().as_ref().clone())
    }
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("sequence_number", &self.topology().sequence_number())
            .field("groups", &self.groups.len())
            .finish()
    }
}
