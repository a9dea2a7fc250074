//! Error types for Shardline
//!
//! Every crate returns [`Error`]. Variants carry structured fields so the
//! retry wrapper and dispatcher can classify a failure with an exhaustive
//! match instead of string inspection.
//!
//! # Categories
//!
//! | Category | Variants | Retried by the wrapper |
//! |----------|----------|------------------------|
//! | Programming error | `IllegalArgument`, `UnsupportedOperation` | never |
//! | Topology | `TopologyStale` | after a topology refresh |
//! | Transient / remote | `ConsistencyNotMet`, `DurabilityNotMet`, `RequestTimeout`, `RequestLimitExceeded`, `NodeUnavailable`, `RemoteFault` | yes, within budget |
//! | Security | `AuthenticationRequired`, `Unauthorized` | never (re-auth hook may re-issue once) |
//! | Iteration | `IterationFault` | caller decides |
//! | Infrastructure | `Serialization`, `Config` | never |
//!
//! Conditional-write failures and aborted `execute` batches are NOT errors:
//! they are carried as data in operation results.

use thiserror::Error;

use crate::key::Key;
use crate::resource_id::{PartitionId, RepNodeId};

/// Result type alias for Shardline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the operation layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    // ==================== Programming errors ====================
    /// Malformed arguments detected before any network call
    #[error("illegal argument: {reason}")]
    IllegalArgument {
        /// What was wrong
        reason: String,
    },

    /// A feature that cannot be expressed at the negotiated protocol version
    #[error("unsupported at serial version {serial_version}: {reason}")]
    UnsupportedOperation {
        /// Negotiated serial version
        serial_version: u16,
        /// What was unsupported
        reason: String,
    },

    // ==================== Topology ====================
    /// The topology snapshot on hand does not match the store
    ///
    /// Callers refresh the topology and retry; this is never permanent.
    #[error("topology stale: {message}")]
    TopologyStale {
        /// Partition being resolved, when known
        partition: Option<PartitionId>,
        /// Description
        message: String,
    },

    // ==================== Transient / remote ====================
    /// The requested read consistency could not be met in time
    #[error("consistency not met: {message}")]
    ConsistencyNotMet {
        /// Description
        message: String,
    },

    /// Not enough replicas acknowledged the write
    #[error("durability not met: {available} of {required} acknowledgments: {message}")]
    DurabilityNotMet {
        /// Acknowledgments required
        required: u32,
        /// Acknowledgments available
        available: u32,
        /// Description
        message: String,
    },

    /// The request did not complete within its timeout
    #[error("request timed out after {timeout_ms}ms: {message}")]
    RequestTimeout {
        /// Timeout budget of the request
        timeout_ms: u64,
        /// Description
        message: String,
    },

    /// Every candidate node is at its active-request limit
    #[error("request limit exceeded: {message}")]
    RequestLimitExceeded {
        /// Description
        message: String,
    },

    /// A node could not be reached
    #[error("node unavailable: {node}: {message}")]
    NodeUnavailable {
        /// Node that failed, formatted, or the group when no node was chosen
        node: String,
        /// Description
        message: String,
    },

    /// A generic fault, raised remotely or in the local dispatch path
    #[error("{} fault: {message}", fault_origin(.remote))]
    RemoteFault {
        /// Description
        message: String,
        /// Whether the fault originated on the server
        remote: bool,
    },

    // ==================== Security ====================
    /// The request carried no or expired credentials
    #[error("authentication required: {message}")]
    AuthenticationRequired {
        /// Description
        message: String,
    },

    /// The authenticated user may not perform the request
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Description
        message: String,
    },

    // ==================== Iteration ====================
    /// A batch fetch failed; the iterator may still be advanced
    #[error("iteration failed at resume key {}: {source}", display_resume_key(.resume_key))]
    IterationFault {
        /// Resume key in use when the batch failed
        resume_key: Option<Key>,
        /// Underlying failure
        source: Box<Error>,
    },

    // ==================== Infrastructure ====================
    /// Encoding or decoding failure
    #[error("serialization error: {reason}")]
    Serialization {
        /// What failed
        reason: String,
    },

    /// Invalid configuration
    #[error("configuration error: {reason}")]
    Config {
        /// What was invalid
        reason: String,
    },
}

fn fault_origin(remote: &bool) -> &'static str {
    if *remote {
        "remote"
    } else {
        "local"
    }
}

fn display_resume_key(key: &Option<Key>) -> String {
    match key {
        Some(k) => k.to_string(),
        None => "<start>".to_string(),
    }
}

/// Fieldless discriminant of [`Error`], for logging and matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::IllegalArgument`]
    IllegalArgument,
    /// See [`Error::UnsupportedOperation`]
    UnsupportedOperation,
    /// See [`Error::TopologyStale`]
    TopologyStale,
    /// See [`Error::ConsistencyNotMet`]
    ConsistencyNotMet,
    /// See [`Error::DurabilityNotMet`]
    DurabilityNotMet,
    /// See [`Error::RequestTimeout`]
    RequestTimeout,
    /// See [`Error::RequestLimitExceeded`]
    RequestLimitExceeded,
    /// See [`Error::NodeUnavailable`]
    NodeUnavailable,
    /// See [`Error::RemoteFault`]
    RemoteFault,
    /// See [`Error::AuthenticationRequired`]
    AuthenticationRequired,
    /// See [`Error::Unauthorized`]
    Unauthorized,
    /// See [`Error::IterationFault`]
    IterationFault,
    /// See [`Error::Serialization`]
    Serialization,
    /// See [`Error::Config`]
    Config,
}

impl Error {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create an `IllegalArgument` error
    pub fn illegal_argument(reason: impl Into<String>) -> Self {
        Error::IllegalArgument {
            reason: reason.into(),
        }
    }

    /// Create a `Serialization` error
    pub fn serialization(reason: impl Into<String>) -> Self {
        Error::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a `Config` error
    pub fn config(reason: impl Into<String>) -> Self {
        Error::Config {
            reason: reason.into(),
        }
    }

    /// Create a `TopologyStale` error
    pub fn topology_stale(partition: Option<PartitionId>, message: impl Into<String>) -> Self {
        Error::TopologyStale {
            partition,
            message: message.into(),
        }
    }

    /// Create a `NodeUnavailable` error for a specific node
    pub fn node_unavailable(node: RepNodeId, message: impl Into<String>) -> Self {
        Error::NodeUnavailable {
            node: node.to_string(),
            message: message.into(),
        }
    }

    /// Create a `RemoteFault` that originated on the server
    pub fn remote_fault(message: impl Into<String>) -> Self {
        Error::RemoteFault {
            message: message.into(),
            remote: true,
        }
    }

    /// Wrap a batch failure with the resume key that was in use
    pub fn iteration_fault(resume_key: Option<Key>, source: Error) -> Self {
        Error::IterationFault {
            resume_key,
            source: Box::new(source),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Fieldless discriminant
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IllegalArgument { .. } => ErrorKind::IllegalArgument,
            Error::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Error::TopologyStale { .. } => ErrorKind::TopologyStale,
            Error::ConsistencyNotMet { .. } => ErrorKind::ConsistencyNotMet,
            Error::DurabilityNotMet { .. } => ErrorKind::DurabilityNotMet,
            Error::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            Error::RequestLimitExceeded { .. } => ErrorKind::RequestLimitExceeded,
            Error::NodeUnavailable { .. } => ErrorKind::NodeUnavailable,
            Error::RemoteFault { .. } => ErrorKind::RemoteFault,
            Error::AuthenticationRequired { .. } => ErrorKind::AuthenticationRequired,
            Error::Unauthorized { .. } => ErrorKind::Unauthorized,
            Error::IterationFault { .. } => ErrorKind::IterationFault,
            Error::Serialization { .. } => ErrorKind::Serialization,
            Error::Config { .. } => ErrorKind::Config,
        }
    }

    /// Whether this is a transient fault the retry wrapper may re-issue
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConsistencyNotMet { .. }
            | Error::DurabilityNotMet { .. }
            | Error::RequestTimeout { .. }
            | Error::RequestLimitExceeded { .. }
            | Error::NodeUnavailable { .. }
            | Error::RemoteFault { .. } => true,

            Error::IllegalArgument { .. }
            | Error::UnsupportedOperation { .. }
            | Error::TopologyStale { .. }
            | Error::AuthenticationRequired { .. }
            | Error::Unauthorized { .. }
            | Error::IterationFault { .. }
            | Error::Serialization { .. }
            | Error::Config { .. } => false,
        }
    }

    /// Whether this is an authentication or authorization failure
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationRequired { .. } | Error::Unauthorized { .. }
        )
    }

    /// Whether the caller should refresh its topology and retry
    pub fn is_topology_stale(&self) -> bool {
        matches!(self, Error::TopologyStale { .. })
    }

    /// Innermost error, looking through iteration faults
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::IterationFault { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
