//! Client operation layer for Shardline
//!
//! - [`KvStore`]: single-key reads and conditional writes, multi-key reads
//!   and deletes, atomic `execute`, iterators
//! - [`RequestDispatcher`]: routing, serial version negotiation, topology
//!   refresh, re-authentication
//! - [`with_retry`]: bounded retry of transient faults against a fixed
//!   deadline
//! - [`PartitionIterator`], [`StoreIterator`], [`ParallelScanIterator`]:
//!   resumable scans
//! - [`ClientConfig`]: `shardline.toml` configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod iterator;
pub mod options;
pub mod parallel;
pub mod retry;
pub mod store;

pub use config::{
    ClientConfig, IterationConfig, RequestLimitsConfig, RetryConfig, CONFIG_FILE_NAME,
};
pub use dispatcher::{Dispatched, ReauthenticateHandler, RequestDispatcher, RequestPolicy};
pub use iterator::{PartitionIterator, StoreIterator};
pub use options::{
    BatchOutcome, PreviousState, ReadOptions, ScanOptions, WriteOptions, WriteOutcome,
};
pub use parallel::{ParallelScanIterator, PartitionMetrics, ShardMetrics};
pub use retry::{with_retry, Deadline, RetryOutcome};
pub use store::KvStore;
