//! Shared fixtures for the integration suites.
//!
//! Import via `mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

pub use shardline::*;

// ============================================================================
// Logging
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route tracing output to the test harness, once per process
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// Fault injection
// ============================================================================

/// Transport that loses frames on demand in front of a [`LocalCluster`]
pub struct FaultyTransport {
    inner: Arc<LocalCluster>,
    lose_requests: AtomicUsize,
    lose_replies: AtomicUsize,
    sends: AtomicUsize,
}

impl FaultyTransport {
    pub fn new(inner: Arc<LocalCluster>) -> Self {
        Self {
            inner,
            lose_requests: AtomicUsize::new(0),
            lose_replies: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
        }
    }

    /// The next `n` frames never reach the server
    pub fn lose_next_requests(&self, n: usize) {
        self.lose_requests.store(n, Ordering::SeqCst);
    }

    /// The next `n` frames are served, then the reply is lost
    pub fn lose_next_replies(&self, n: usize) {
        self.lose_replies.store(n, Ordering::SeqCst);
    }

    /// Frames handed to this transport so far
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Transport for FaultyTransport {
    fn send(&self, target: RepNodeId, frame: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.lose_requests) {
            return Err(Error::RequestTimeout {
                timeout_ms: timeout.as_millis() as u64,
                message: format!("request to {} lost", target),
            });
        }
        let reply = self.inner.send(target, frame, timeout)?;
        if take_one(&self.lose_replies) {
            return Err(Error::RequestTimeout {
                timeout_ms: timeout.as_millis() as u64,
                message: format!("reply from {} lost", target),
            });
        }
        Ok(reply)
    }

    fn server_serial_version(&self, target: RepNodeId) -> Result<SerialVersion> {
        self.inner.server_serial_version(target)
    }
}

// ============================================================================
// TestCluster
// ============================================================================

pub const PARTITIONS: u32 = 12;
pub const GROUPS: u32 = 3;
pub const NODES_PER_GROUP: u32 = 3;
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

pub fn topology() -> Topology {
    TopologyBuilder::new("it")
        .partitions(PARTITIONS)
        .rep_groups(GROUPS, NODES_PER_GROUP)
        .build()
        .expect("valid topology")
}

/// Retry policy with short delays so fault tests run fast
pub fn fast_retry() -> RetryConfig {
    RetryConfig::default()
        .with_retry_delay_ms(1)
        .with_min_remaining_ms(1)
}

pub fn test_config() -> ClientConfig {
    ClientConfig::default()
        .with_retry(fast_retry())
        .with_request_timeout(TEST_TIMEOUT)
}

/// A local cluster, a fault-injecting transport in front of it, and a
/// client talking through that transport
pub struct TestCluster {
    pub cluster: Arc<LocalCluster>,
    pub transport: Arc<FaultyTransport>,
    pub store: KvStore,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        init_tracing();
        let cluster = Arc::new(LocalCluster::new(topology()));
        let transport = Arc::new(FaultyTransport::new(Arc::clone(&cluster)));
        let store = KvStore::connect(topology(), cluster.clone(), transport.clone(), config)
            .expect("valid client config");
        Self {
            cluster,
            transport,
            store,
        }
    }

    /// A second client against the same cluster
    pub fn another_client(&self, config: ClientConfig) -> KvStore {
        KvStore::connect(
            topology(),
            self.cluster.clone(),
            self.transport.clone(),
            config,
        )
        .expect("valid client config")
    }

    /// Group currently owning `key`, as the cluster sees it
    pub fn group_of(&self, key: &Key) -> RepGroupId {
        let topology = self.cluster.topology();
        let router = PartitionRouter::new(topology, Arc::new(MessageCatalog::default()));
        router.group_for_key(key).expect("routable key").1
    }

    /// Partition owning `key`
    pub fn partition_of(&self, key: &Key) -> PartitionId {
        self.store.dispatcher().router().route(key)
    }

    /// Master node of the group owning `key`
    pub fn master_of(&self, key: &Key) -> RepNodeId {
        RepNodeId::new(self.group_of(key).number(), 1)
    }

    /// Some group other than the one owning `key`
    pub fn other_group(&self, key: &Key) -> RepGroupId {
        let owner = self.group_of(key);
        (1..=GROUPS)
            .map(RepGroupId::new)
            .find(|g| *g != owner)
            .expect("more than one group")
    }
}

pub fn key(path: &str) -> Key {
    Key::parse(path).expect("valid key")
}
