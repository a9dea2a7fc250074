//! Operation protocol for Shardline
//!
//! - [`Operation`] / [`OperationResult`]: the closed operation and result sets
//! - [`Request`] / [`Response`]: envelopes carrying routing and policy fields
//! - [`codec`]: versioned, checksummed binary frames
//! - [`SerialVersion`]: protocol revisions and field gating
//! - [`Transport`]: byte-level seam to rep nodes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod operation;
pub mod request;
pub mod result;
pub mod serial_version;
pub mod transport;

pub use codec::{
    decode_frame, decode_request, decode_response, encode_frame, encode_request, encode_response,
    MAX_FRAME_LEN,
};
pub use operation::{
    validate_operation, BatchOperation, IterateSpec, MultiKeySpec, OpCode, Operation, RetryClass,
};
pub use request::{Request, Response};
pub use result::{ExecuteOutcome, OperationResult, ScanBatch, ScanEntry, WriteResult};
pub use serial_version::SerialVersion;
pub use transport::Transport;
