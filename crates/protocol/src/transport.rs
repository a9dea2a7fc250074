//! Transport seam between the dispatcher and rep nodes
//!
//! The dispatcher hands a transport an encoded request frame and gets an
//! encoded response frame back. Anything that can move bytes to a rep node
//! (an in-process cluster, a socket pool) implements [`Transport`].

use shardline_core::{RepNodeId, Result};
use std::time::Duration;

use crate::serial_version::SerialVersion;

/// Moves frames to rep nodes
pub trait Transport: Send + Sync {
    /// Deliver `frame` to `target` and wait up to `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// - `NodeUnavailable` if the node cannot be reached
    /// - `RequestTimeout` if no reply arrives in time
    ///
    /// A timeout says nothing about whether the request was applied.
    fn send(&self, target: RepNodeId, frame: Vec<u8>, timeout: Duration) -> Result<Vec<u8>>;

    /// Newest serial version `target` speaks
    fn server_serial_version(&self, target: RepNodeId) -> Result<SerialVersion>;
}
