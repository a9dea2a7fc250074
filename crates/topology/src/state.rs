//! Per-node liveness and load
//!
//! The router never performs I/O. Everything it knows about a node beyond
//! the topology comes through the [`LoadOracle`] trait. [`RepNodeStateTable`]
//! is the default oracle, fed by the dispatcher as responses and failures
//! arrive.
//!
//! # Concurrency
//!
//! - Node state lives in a `DashMap`, so updates to different nodes do not
//!   contend.
//! - The active-request counter is an `Arc<AtomicUsize>` shared with the
//!   [`ActiveRequestGuard`], which decrements it on drop.
//! - Nodes the table has never heard of are treated as available.

use dashmap::DashMap;
use shardline_core::{RepGroupId, RepNodeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::topology::Topology;

/// Liveness and load information consulted by node selection
pub trait LoadOracle: Send + Sync {
    /// Whether the node is believed reachable
    fn is_available(&self, node: RepNodeId) -> bool;

    /// Current master of the group, if known
    fn master_of(&self, group: RepGroupId) -> Option<RepNodeId>;

    /// Requests currently in flight to the node
    fn active_requests(&self, node: RepNodeId) -> usize;

    /// Reported replication lag behind the master
    fn replica_lag_ms(&self, node: RepNodeId) -> Option<u64>;

    /// Highest VLSN the node has replayed
    fn replicated_vlsn(&self, node: RepNodeId) -> Option<u64>;
}

#[derive(Debug)]
struct RepNodeState {
    available: bool,
    lag_ms: Option<u64>,
    vlsn: Option<u64>,
    active: Arc<AtomicUsize>,
    requests: u64,
    errors: u64,
    total_latency: Duration,
}

impl Default for RepNodeState {
    fn default() -> Self {
        Self {
            available: true,
            lag_ms: None,
            vlsn: None,
            active: Arc::new(AtomicUsize::new(0)),
            requests: 0,
            errors: 0,
            total_latency: Duration::ZERO,
        }
    }
}

/// Point-in-time statistics for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepNodeStats {
    /// Believed reachable
    pub available: bool,
    /// Requests in flight
    pub active_requests: usize,
    /// Completed requests
    pub requests: u64,
    /// Failed requests
    pub errors: u64,
    /// Mean latency of completed requests
    pub average_latency: Option<Duration>,
}

/// Decrements a node's active-request count when dropped
#[derive(Debug)]
pub struct ActiveRequestGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Default [`LoadOracle`]: a lock-sharded table of node state
#[derive(Debug, Default)]
pub struct RepNodeStateTable {
    nodes: DashMap<RepNodeId, RepNodeState>,
    masters: DashMap<RepGroupId, RepNodeId>,
}

impl RepNodeStateTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the first node of every group as master
    pub fn seeded_from(topology: &Topology) -> Self {
        let table = Self::new();
        table.seed_masters(topology);
        table
    }

    /// Record the first node of each group as master where none is known
    pub fn seed_masters(&self, topology: &Topology) {
        for group in topology.rep_groups() {
            if let Some(first) = group.nodes.first() {
                self.masters.entry(group.id).or_insert(first.id);
            }
        }
    }

    /// Mark a node reachable
    pub fn mark_available(&self, node: RepNodeId) {
        let mut state = self.nodes.entry(node).or_default();
        if !state.available {
            debug!(node = %node, "Node available again");
        }
        state.available = true;
    }

    /// Mark a node unreachable
    pub fn mark_unavailable(&self, node: RepNodeId) {
        let mut state = self.nodes.entry(node).or_default();
        if state.available {
            warn!(node = %node, "Marking node unavailable");
        }
        state.available = false;
    }

    /// Record the master of a group
    pub fn set_master(&self, group: RepGroupId, node: RepNodeId) {
        if self.masters.insert(group, node) != Some(node) {
            debug!(group = %group, master = %node, "Master changed");
        }
    }

    /// Record a replica's lag behind its master
    pub fn record_lag(&self, node: RepNodeId, lag_ms: u64) {
        self.nodes.entry(node).or_default().lag_ms = Some(lag_ms);
    }

    /// Record the highest VLSN a node has replayed
    pub fn record_vlsn(&self, node: RepNodeId, vlsn: u64) {
        let mut state = self.nodes.entry(node).or_default();
        state.vlsn = Some(state.vlsn.map_or(vlsn, |v| v.max(vlsn)));
    }

    /// Count a request as in flight until the guard is dropped
    pub fn begin_request(&self, node: RepNodeId) -> ActiveRequestGuard {
        let counter = Arc::clone(&self.nodes.entry(node).or_default().active);
        counter.fetch_add(1, Ordering::AcqRel);
        ActiveRequestGuard { counter }
    }

    /// Record a completed request
    pub fn record_success(&self, node: RepNodeId, latency: Duration) {
        let mut state = self.nodes.entry(node).or_default();
        state.requests += 1;
        state.total_latency += latency;
        state.available = true;
    }

    /// Record a failed request
    pub fn record_error(&self, node: RepNodeId) {
        self.nodes.entry(node).or_default().errors += 1;
    }

    /// Statistics for a node
    pub fn stats(&self, node: RepNodeId) -> RepNodeStats {
        match self.nodes.get(&node) {
            None => RepNodeStats {
                available: true,
                ..Default::default()
            },
            Some(s) => RepNodeStats {
                available: s.available,
                active_requests: s.active.load(Ordering::Acquire),
                requests: s.requests,
                errors: s.errors,
                average_latency: if s.requests == 0 {
                    None
                } else {
                    Some(s.total_latency / s.requests as u32)
                },
            },
        }
    }
}

impl LoadOracle for RepNodeStateTable {
    fn is_available(&self, node: RepNodeId) -> bool {
        self.nodes.get(&node).map_or(true, |s| s.available)
    }

    fn master_of(&self, group: RepGroupId) -> Option<RepNodeId> {
        self.masters.get(&group).map(|m| *m)
    }

    fn active_requests(&self, node: RepNodeId) -> usize {
        self.nodes
            .get(&node)
            .map_or(0, |s| s.active.load(Ordering::Acquire))
    }

    fn replica_lag_ms(&self, node: RepNodeId) -> Option<u64> {
        self.nodes.get(&node).and_then(|s| s.lag_ms)
    }

    fn replicated_vlsn(&self, node: RepNodeId) -> Option<u64> {
        self.nodes.get(&node).and_then(|s| s.vlsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TopologyBuilder;

    #[test]
    fn test_unknown_node_is_available() {
        let table = RepNodeStateTable::new();
        assert!(table.is_available(RepNodeId::new(1, 1)));
        assert_eq!(table.active_requests(RepNodeId::new(1, 1)), 0);
    }

    #[test]
    fn test_availability_toggle() {
        let table = RepNodeStateTable::new();
        let rn = RepNodeId::new(1, 2);
        table.mark_unavailable(rn);
        assert!(!table.is_available(rn));
        table.mark_available(rn);
        assert!(table.is_available(rn));
    }

    #[test]
    fn test_active_request_guard() {
        let table = RepNodeStateTable::new();
        let rn = RepNodeId::new(1, 1);
        let g1 = table.begin_request(rn);
        let g2 = table.begin_request(rn);
        assert_eq!(table.active_requests(rn), 2);
        drop(g1);
        assert_eq!(table.active_requests(rn), 1);
        drop(g2);
        assert_eq!(table.active_requests(rn), 0);
    }

    #[test]
    fn test_seeded_masters() {
        let t = TopologyBuilder::new("s").rep_groups(2, 3).build().unwrap();
        let table = RepNodeStateTable::seeded_from(&t);
        assert_eq!(table.master_of(RepGroupId::new(2)), Some(RepNodeId::new(2, 1)));

        table.set_master(RepGroupId::new(2), RepNodeId::new(2, 3));
        table.seed_masters(&t);
        assert_eq!(table.master_of(RepGroupId::new(2)), Some(RepNodeId::new(2, 3)));
    }

    #[test]
    fn test_stats() {
        let table = RepNodeStateTable::new();
        let rn = RepNodeId::new(1, 1);
        table.record_success(rn, Duration::from_millis(10));
        table.record_success(rn, Duration::from_millis(30));
        table.record_error(rn);
        let stats = table.stats(rn);
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.average_latency, Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_vlsn_is_monotonic() {
        let table = RepNodeStateTable::new();
        let rn = RepNodeId::new(1, 2);
        table.record_vlsn(rn, 10);
        table.record_vlsn(rn, 7);
        assert_eq!(table.replicated_vlsn(rn), Some(10));
    }
}
