//! Shared topology snapshot
//!
//! [`TopologyHandle`] is the single mutable shared resource of the client:
//! readers clone an `Arc<Topology>` and work on that snapshot; a refresh
//! swaps the whole snapshot. Nothing is ever mutated in place, so a reader
//! never observes a partially updated map.

use parking_lot::RwLock;
use shardline_core::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::topology::Topology;

/// Supplier of topology snapshots, typically the admin service
pub trait TopologySource: Send + Sync {
    /// Fetch the newest snapshot available
    fn fetch(&self) -> Result<Topology>;
}

/// Atomically swappable topology snapshot
#[derive(Debug)]
pub struct TopologyHandle {
    current: RwLock<Arc<Topology>>,
}

impl TopologyHandle {
    /// Create a handle holding `initial`
    pub fn new(initial: Topology) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Current snapshot
    ///
    /// The lock is held only for the `Arc` clone.
    #[inline]
    pub fn current(&self) -> Arc<Topology> {
        Arc::clone(&self.current.read())
    }

    /// Sequence number of the current snapshot
    pub fn sequence_number(&self) -> u64 {
        self.current.read().sequence_number()
    }

    /// Replace the snapshot if `topology` is newer.
    ///
    /// Returns whether the snapshot was installed.
    pub fn install(&self, topology: Topology) -> bool {
        let mut current = self.current.write();
        if topology.sequence_number() <= current.sequence_number() {
            debug!(
                offered = topology.sequence_number(),
                current = current.sequence_number(),
                "Ignoring topology that is not newer"
            );
            return false;
        }
        info!(
            from = current.sequence_number(),
            to = topology.sequence_number(),
            "Installed new topology"
        );
        *current = Arc::new(topology);
        true
    }

    /// Fetch from `source` and install if newer
    pub fn refresh_from(&self, source: &dyn TopologySource) -> Result<bool> {
        let fetched = source.fetch()?;
        Ok(self.install(fetched))
    }
}

impl TopologySource for TopologyHandle {
    fn fetch(&self) -> Result<Topology> {
        Ok((*self.current()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TopologyBuilder;
    use shardline_core::{PartitionId, RepGroupId};
    use std::thread;

    fn topology(seq: u64) -> Topology {
        TopologyBuilder::new("s")
            .partitions(4)
            .rep_groups(2, 1)
            .sequence_number(seq)
            .build()
            .unwrap()
    }

    #[test]
    fn test_install_only_newer() {
        let handle = TopologyHandle::new(topology(5));
        assert!(!handle.install(topology(5)));
        assert!(!handle.install(topology(3)));
        assert!(handle.install(topology(6)));
        assert_eq!(handle.sequence_number(), 6);
    }

    #[test]
    fn test_refresh_from_source() {
        let admin = TopologyHandle::new(topology(1));
        let client = TopologyHandle::new(topology(1));

        let moved = admin
            .current()
            .with_partition_moved(PartitionId::new(1), RepGroupId::new(2))
            .unwrap();
        assert!(admin.install(moved));

        assert!(client.refresh_from(&admin).unwrap());
        assert_eq!(
            client.current().group_for(PartitionId::new(1)),
            Some(RepGroupId::new(2))
        );
        // Second refresh is a no-op
        assert!(!client.refresh_from(&admin).unwrap());
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let handle = Arc::new(TopologyHandle::new(topology(1)));
        let snapshot = handle.current();
        handle.install(topology(2));
        assert_eq!(snapshot.sequence_number(), 1);
        assert_eq!(handle.current().sequence_number(), 2);
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let handle = Arc::new(TopologyHandle::new(topology(1)));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let t = handle.current();
                        assert_eq!(t.partition_count(), 4);
                        assert!(t.validate().is_ok());
                    }
                })
            })
            .collect();

        for seq in 2..50 {
            handle.install(topology(seq));
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(handle.sequence_number(), 49);
    }
}
