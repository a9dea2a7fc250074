//! Versioned binary codec
//!
//! # Frame Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────┬──────────┐
//! │ Length (4 bytes)│ Serial Ver (2)   │ Payload (variable)  │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────┴──────────┘
//! ```
//!
//! Length counts everything after the length field. The CRC covers the
//! serial version and payload. All integers are little-endian.
//!
//! # Field Gating
//!
//! Fields introduced after V1 are written only when the frame's serial
//! version includes them. Encoding at an older version silently drops
//! them; decoding an older frame yields their default (`table_id = None`).
//! An operation that cannot be expressed at all at the frame's version
//! (`TableIterate` at V1) fails with `UnsupportedOperation`.
//!
//! # Common Encodings
//!
//! ```text
//! Key        : [len u32][Key::to_bytes()]
//! Value      : [len u32][bytes]
//! Version    : [24 bytes]
//! Option<T>  : [0u8] | [1u8][T]
//! String     : [len u32][UTF-8]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use shardline_core::version::VERSION_BYTES;
use shardline_core::{
    Consistency, Depth, Direction, Durability, Error, Key, KeyRange, KeyValueVersion, KeyVersion,
    PartitionId, ReplicaAckPolicy, Result, ReturnChoice, SyncPolicy, Value, ValueVersion, Version,
};
use std::io::{self, Cursor, Read};
use tracing::warn;

use crate::operation::{BatchOperation, IterateSpec, MultiKeySpec, OpCode, Operation};
use crate::request::{Request, Response};
use crate::result::{ExecuteOutcome, OperationResult, ScanBatch, ScanEntry, WriteResult};
use crate::serial_version::SerialVersion;

/// Largest accepted frame, excluding the length field
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const LEN_BYTES: usize = 4;
const SERIAL_BYTES: usize = 2;
const CRC_BYTES: usize = 4;

/// Response status bytes
const STATUS_OK: u8 = 0x00;
const STATUS_FAULT: u8 = 0x01;

/// Execute outcome bytes
const OUTCOME_COMMITTED: u8 = 0x00;
const OUTCOME_ABORTED: u8 = 0x01;

/// KeyRange tag bytes
const RANGE_BOUNDED: u8 = 0x01;
const RANGE_PREFIX: u8 = 0x02;

/// Error code bytes
const ERR_ILLEGAL_ARGUMENT: u8 = 0x01;
const ERR_UNSUPPORTED: u8 = 0x02;
const ERR_TOPOLOGY_STALE: u8 = 0x03;
const ERR_CONSISTENCY: u8 = 0x04;
const ERR_DURABILITY: u8 = 0x05;
const ERR_TIMEOUT: u8 = 0x06;
const ERR_REQUEST_LIMIT: u8 = 0x07;
const ERR_NODE_UNAVAILABLE: u8 = 0x08;
const ERR_REMOTE_FAULT: u8 = 0x09;
const ERR_AUTH_REQUIRED: u8 = 0x0A;
const ERR_UNAUTHORIZED: u8 = 0x0B;
const ERR_SERIALIZATION: u8 = 0x0C;

// ============================================================================
// Frames
// ============================================================================

/// Wrap `payload` in a frame at `version`
pub fn encode_frame(version: SerialVersion, payload: &[u8]) -> Result<Vec<u8>> {
    let body_len = SERIAL_BYTES + payload.len() + CRC_BYTES;
    if body_len > MAX_FRAME_LEN {
        return Err(Error::serialization(format!(
            "frame of {} bytes exceeds limit of {}",
            body_len, MAX_FRAME_LEN
        )));
    }

    let mut frame = Vec::with_capacity(LEN_BYTES + body_len);
    frame.write_u32::<LittleEndian>(body_len as u32).map_err(io_error)?;
    frame.write_u16::<LittleEndian>(version.get()).map_err(io_error)?;
    frame.extend_from_slice(payload);

    let mut hasher = Hasher::new();
    hasher.update(&frame[LEN_BYTES..]);
    frame.write_u32::<LittleEndian>(hasher.finalize()).map_err(io_error)?;
    Ok(frame)
}

/// Validate a frame and return its serial version and payload
pub fn decode_frame(frame: &[u8]) -> Result<(SerialVersion, &[u8])> {
    if frame.len() < LEN_BYTES + SERIAL_BYTES + CRC_BYTES {
        return Err(Error::serialization("frame too short"));
    }
    let body_len = (&frame[..LEN_BYTES]).read_u32::<LittleEndian>().map_err(io_error)? as usize;
    if body_len > MAX_FRAME_LEN {
        return Err(Error::serialization(format!(
            "frame length {} exceeds limit of {}",
            body_len, MAX_FRAME_LEN
        )));
    }
    if frame.len() != LEN_BYTES + body_len {
        return Err(Error::serialization(format!(
            "frame length mismatch: header says {}, got {}",
            body_len,
            frame.len() - LEN_BYTES
        )));
    }

    let crc_start = frame.len() - CRC_BYTES;
    let stored = (&frame[crc_start..]).read_u32::<LittleEndian>().map_err(io_error)?;
    let mut hasher = Hasher::new();
    hasher.update(&frame[LEN_BYTES..crc_start]);
    let computed = hasher.finalize();
    if stored != computed {
        warn!(stored, computed, "Rejecting frame with bad checksum");
        return Err(Error::serialization(format!(
            "frame checksum mismatch: stored {:08x}, computed {:08x}",
            stored, computed
        )));
    }

    let raw = (&frame[LEN_BYTES..LEN_BYTES + SERIAL_BYTES])
        .read_u16::<LittleEndian>()
        .map_err(io_error)?;
    let version = SerialVersion::new(raw)?;
    Ok((version, &frame[LEN_BYTES + SERIAL_BYTES..crc_start]))
}

// ============================================================================
// Requests and responses
// ============================================================================

/// Encode a request frame at `version`
pub fn encode_request(request: &Request, version: SerialVersion) -> Result<Vec<u8>> {
    let mut enc = Encoder::new(version);
    enc.operation(&request.operation)?;
    enc.u32(request.partition.number())?;
    enc.u64(request.topo_seq)?;
    enc.u64(request.timeout_ms)?;
    enc.consistency(&request.consistency)?;
    enc.durability(&request.durability)?;
    enc.option(request.auth_token.as_deref(), |e, s| e.string(s))?;
    encode_frame(version, &enc.buf)
}

/// Decode a request frame
pub fn decode_request(frame: &[u8]) -> Result<(Request, SerialVersion)> {
    let (version, payload) = decode_frame(frame)?;
    let mut dec = Decoder::new(payload, version);
    let operation = dec.operation(true)?;
    let partition = PartitionId::new(dec.u32()?);
    let topo_seq = dec.u64()?;
    let timeout_ms = dec.u64()?;
    let consistency = dec.consistency()?;
    let durability = dec.durability()?;
    let auth_token = dec.option(|d| d.string())?;
    dec.finish()?;

    Ok((
        Request {
            operation,
            partition,
            topo_seq,
            timeout_ms,
            consistency,
            durability,
            auth_token,
        },
        version,
    ))
}

/// Encode a response frame at `version`
pub fn encode_response(response: &Response, version: SerialVersion) -> Result<Vec<u8>> {
    let mut enc = Encoder::new(version);
    enc.u64(response.topo_seq)?;
    enc.u64(response.node_vlsn)?;
    match &response.result {
        Ok(result) => {
            enc.u8(STATUS_OK)?;
            enc.result(result)?;
        }
        Err(error) => {
            enc.u8(STATUS_FAULT)?;
            enc.error(error)?;
        }
    }
    encode_frame(version, &enc.buf)
}

/// Decode a response frame
pub fn decode_response(frame: &[u8]) -> Result<(Response, SerialVersion)> {
    let (version, payload) = decode_frame(frame)?;
    let mut dec = Decoder::new(payload, version);
    let topo_seq = dec.u64()?;
    let node_vlsn = dec.u64()?;
    let result = match dec.u8()? {
        STATUS_OK => Ok(dec.result(true)?),
        STATUS_FAULT => Err(dec.error()?),
        other => return Err(Error::serialization(format!("invalid status byte {:#04x}", other))),
    };
    dec.finish()?;

    Ok((
        Response {
            topo_seq,
            node_vlsn,
            result,
        },
        version,
    ))
}

fn io_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::serialization("payload truncated"),
        _ => Error::serialization(e.to_string()),
    }
}

fn unsupported(version: SerialVersion, what: &str) -> Error {
    Error::UnsupportedOperation {
        serial_version: version.get(),
        reason: format!("{} requires serial version {}", what, SerialVersion::V2),
    }
}

// ============================================================================
// Encoder
// ============================================================================

struct Encoder {
    buf: Vec<u8>,
    version: SerialVersion,
}

impl Encoder {
    fn new(version: SerialVersion) -> Self {
        Self {
            buf: Vec::with_capacity(128),
            version,
        }
    }

    fn u8(&mut self, v: u8) -> Result<()> {
        self.buf.write_u8(v).map_err(io_error)
    }

    fn u16(&mut self, v: u16) -> Result<()> {
        self.buf.write_u16::<LittleEndian>(v).map_err(io_error)
    }

    fn u32(&mut self, v: u32) -> Result<()> {
        self.buf.write_u32::<LittleEndian>(v).map_err(io_error)
    }

    fn u64(&mut self, v: u64) -> Result<()> {
        self.buf.write_u64::<LittleEndian>(v).map_err(io_error)
    }

    fn bool(&mut self, v: bool) -> Result<()> {
        self.u8(v as u8)
    }

    fn len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len)
            .map_err(|_| Error::serialization(format!("length {} does not fit in u32", len)))?;
        self.u32(len)
    }

    fn bytes(&mut self, b: &[u8]) -> Result<()> {
        self.len(b.len())?;
        self.buf.extend_from_slice(b);
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<()> {
        self.bytes(s.as_bytes())
    }

    fn option<T: ?Sized>(
        &mut self,
        v: Option<&T>,
        f: impl FnOnce(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        match v {
            None => self.u8(0),
            Some(inner) => {
                self.u8(1)?;
                f(self, inner)
            }
        }
    }

    fn key(&mut self, key: &Key) -> Result<()> {
        self.bytes(&key.to_bytes())
    }

    fn value(&mut self, value: &Value) -> Result<()> {
        self.bytes(value.as_bytes())
    }

    fn version(&mut self, version: &Version) -> Result<()> {
        self.buf.extend_from_slice(&version.to_bytes());
        Ok(())
    }

    fn table_id(&mut self, table_id: Option<u64>) -> Result<()> {
        if self.version.has_table_id() {
            self.option(table_id.as_ref(), |e, id| e.u64(*id))?;
        }
        Ok(())
    }

    fn return_choice(&mut self, rc: ReturnChoice) -> Result<()> {
        self.u8(match rc {
            ReturnChoice::None => 0,
            ReturnChoice::Value => 1,
            ReturnChoice::Version => 2,
            ReturnChoice::All => 3,
        })
    }

    fn depth(&mut self, depth: Depth) -> Result<()> {
        self.u8(match depth {
            Depth::ChildrenOnly => 0,
            Depth::ParentAndChildren => 1,
            Depth::DescendantsOnly => 2,
            Depth::ParentAndDescendants => 3,
        })
    }

    fn direction(&mut self, direction: Direction) -> Result<()> {
        self.u8(match direction {
            Direction::Forward => 0,
            Direction::Reverse => 1,
            Direction::Unordered => 2,
        })
    }

    fn key_range(&mut self, range: &KeyRange) -> Result<()> {
        match range {
            KeyRange::Bounded {
                start,
                start_inclusive,
                end,
                end_inclusive,
            } => {
                self.u8(RANGE_BOUNDED)?;
                self.option(start.as_deref(), |e, s| e.string(s))?;
                self.bool(*start_inclusive)?;
                self.option(end.as_deref(), |e, s| e.string(s))?;
                self.bool(*end_inclusive)
            }
            KeyRange::Prefix(p) => {
                self.u8(RANGE_PREFIX)?;
                self.string(p)
            }
        }
    }

    fn consistency(&mut self, c: &Consistency) -> Result<()> {
        match c {
            Consistency::NoneRequired => self.u8(0),
            Consistency::Absolute => self.u8(1),
            Consistency::NoneRequiredNoMaster => self.u8(2),
            Consistency::Time {
                permissible_lag_ms,
                timeout_ms,
            } => {
                self.u8(3)?;
                self.u64(*permissible_lag_ms)?;
                self.u64(*timeout_ms)
            }
            Consistency::Version {
                version,
                timeout_ms,
            } => {
                self.u8(4)?;
                self.version(version)?;
                self.u64(*timeout_ms)
            }
        }
    }

    fn durability(&mut self, d: &Durability) -> Result<()> {
        let sync = |s: SyncPolicy| match s {
            SyncPolicy::Sync => 0,
            SyncPolicy::WriteNoSync => 1,
            SyncPolicy::NoSync => 2,
        };
        self.u8(sync(d.master_sync))?;
        self.u8(sync(d.replica_sync))?;
        self.u8(match d.replica_ack {
            ReplicaAckPolicy::All => 0,
            ReplicaAckPolicy::None => 1,
            ReplicaAckPolicy::SimpleMajority => 2,
        })
    }

    fn multi_key_spec(&mut self, spec: &MultiKeySpec) -> Result<()> {
        self.key(&spec.parent)?;
        self.option(spec.range.as_ref(), |e, r| e.key_range(r))?;
        self.depth(spec.depth)
    }

    fn iterate_spec(&mut self, spec: &IterateSpec) -> Result<()> {
        self.option(spec.parent.as_ref(), |e, k| e.key(k))?;
        self.option(spec.range.as_ref(), |e, r| e.key_range(r))?;
        self.depth(spec.depth)?;
        self.direction(spec.direction)?;
        self.u32(spec.batch_size)?;
        self.option(spec.resume_key.as_ref(), |e, k| e.key(k))?;
        self.bool(spec.keys_only)?;
        self.bool(spec.within_major_path)
    }

    fn operation(&mut self, op: &Operation) -> Result<()> {
        if let Operation::TableIterate { .. } = op {
            if !self.version.has_table_iterate() {
                return Err(unsupported(self.version, "table iteration"));
            }
        }

        self.u8(op.opcode() as u8)?;
        match op {
            Operation::Get { key, table_id } => {
                self.key(key)?;
                self.table_id(*table_id)
            }
            Operation::Put {
                key,
                value,
                return_choice,
                table_id,
            }
            | Operation::PutIfAbsent {
                key,
                value,
                return_choice,
                table_id,
            }
            | Operation::PutIfPresent {
                key,
                value,
                return_choice,
                table_id,
            } => {
                self.key(key)?;
                self.value(value)?;
                self.return_choice(*return_choice)?;
                self.table_id(*table_id)
            }
            Operation::PutIfVersion {
                key,
                value,
                match_version,
                return_choice,
                table_id,
            } => {
                self.key(key)?;
                self.value(value)?;
                self.version(match_version)?;
                self.return_choice(*return_choice)?;
                self.table_id(*table_id)
            }
            Operation::Delete {
                key,
                return_choice,
                table_id,
            } => {
                self.key(key)?;
                self.return_choice(*return_choice)?;
                self.table_id(*table_id)
            }
            Operation::DeleteIfVersion {
                key,
                match_version,
                return_choice,
                table_id,
            } => {
                self.key(key)?;
                self.version(match_version)?;
                self.return_choice(*return_choice)?;
                self.table_id(*table_id)
            }
            Operation::MultiGetKeys(spec)
            | Operation::MultiGetValues(spec)
            | Operation::MultiDelete(spec) => self.multi_key_spec(spec),
            Operation::Iterate(spec) => self.iterate_spec(spec),
            Operation::TableIterate { table_id, spec } => {
                self.u64(*table_id)?;
                self.iterate_spec(spec)
            }
            Operation::Execute(ops) => {
                self.len(ops.len())?;
                for batch_op in ops {
                    self.bool(batch_op.abort_if_unsuccessful)?;
                    self.operation(&batch_op.operation)?;
                }
                Ok(())
            }
        }
    }

    fn write_result(&mut self, w: &WriteResult) -> Result<()> {
        self.bool(w.success)?;
        self.option(w.new_version.as_ref(), |e, v| e.version(v))?;
        self.option(w.previous_value.as_ref(), |e, v| e.value(v))?;
        self.option(w.previous_version.as_ref(), |e, v| e.version(v))?;
        self.table_id(w.table_id)
    }

    fn scan_batch(&mut self, batch: &ScanBatch) -> Result<()> {
        self.len(batch.entries.len())?;
        for entry in &batch.entries {
            self.key(&entry.key)?;
            self.version(&entry.version)?;
            self.option(entry.value.as_ref(), |e, v| e.value(v))?;
        }
        self.bool(batch.has_more)
    }

    fn result(&mut self, result: &OperationResult) -> Result<()> {
        if let OperationResult::TableIterate(_) = result {
            if !self.version.has_table_iterate() {
                return Err(unsupported(self.version, "table iteration"));
            }
        }

        let tag = match result {
            OperationResult::Get { .. } => OpCode::Get,
            OperationResult::Put(_) => OpCode::Put,
            OperationResult::PutIfAbsent(_) => OpCode::PutIfAbsent,
            OperationResult::PutIfPresent(_) => OpCode::PutIfPresent,
            OperationResult::PutIfVersion(_) => OpCode::PutIfVersion,
            OperationResult::Delete(_) => OpCode::Delete,
            OperationResult::DeleteIfVersion(_) => OpCode::DeleteIfVersion,
            OperationResult::MultiGetKeys(_) => OpCode::MultiGetKeys,
            OperationResult::MultiGetValues(_) => OpCode::MultiGetValues,
            OperationResult::MultiDelete(_) => OpCode::MultiDelete,
            OperationResult::Iterate(_) => OpCode::Iterate,
            OperationResult::TableIterate(_) => OpCode::TableIterate,
            OperationResult::Execute(_) => OpCode::Execute,
        };
        self.u8(tag as u8)?;

        match result {
            OperationResult::Get { record, table_id } => {
                self.option(record.as_ref(), |e, vv| {
                    e.value(&vv.value)?;
                    e.version(&vv.version)
                })?;
                self.table_id(*table_id)
            }
            OperationResult::Put(w)
            | OperationResult::PutIfAbsent(w)
            | OperationResult::PutIfPresent(w)
            | OperationResult::PutIfVersion(w)
            | OperationResult::Delete(w)
            | OperationResult::DeleteIfVersion(w) => self.write_result(w),
            OperationResult::MultiGetKeys(keys) => {
                self.len(keys.len())?;
                for kv in keys {
                    self.key(&kv.key)?;
                    self.version(&kv.version)?;
                }
                Ok(())
            }
            OperationResult::MultiGetValues(records) => {
                self.len(records.len())?;
                for r in records {
                    self.key(&r.key)?;
                    self.value(&r.value)?;
                    self.version(&r.version)?;
                }
                Ok(())
            }
            OperationResult::MultiDelete(count) => self.u64(*count),
            OperationResult::Iterate(batch) | OperationResult::TableIterate(batch) => {
                self.scan_batch(batch)
            }
            OperationResult::Execute(ExecuteOutcome::Committed(results)) => {
                self.u8(OUTCOME_COMMITTED)?;
                self.len(results.len())?;
                for r in results {
                    self.result(r)?;
                }
                Ok(())
            }
            OperationResult::Execute(ExecuteOutcome::Aborted {
                failed_index,
                failed_result,
            }) => {
                self.u8(OUTCOME_ABORTED)?;
                self.len(*failed_index)?;
                self.result(failed_result)
            }
        }
    }

    fn error(&mut self, error: &Error) -> Result<()> {
        match error {
            Error::IllegalArgument { reason } => {
                self.u8(ERR_ILLEGAL_ARGUMENT)?;
                self.string(reason)
            }
            Error::UnsupportedOperation {
                serial_version,
                reason,
            } => {
                self.u8(ERR_UNSUPPORTED)?;
                self.u16(*serial_version)?;
                self.string(reason)
            }
            Error::TopologyStale { partition, message } => {
                self.u8(ERR_TOPOLOGY_STALE)?;
                self.option(partition.as_ref(), |e, p| e.u32(p.number()))?;
                self.string(message)
            }
            Error::ConsistencyNotMet { message } => {
                self.u8(ERR_CONSISTENCY)?;
                self.string(message)
            }
            Error::DurabilityNotMet {
                required,
                available,
                message,
            } => {
                self.u8(ERR_DURABILITY)?;
                self.u32(*required)?;
                self.u32(*available)?;
                self.string(message)
            }
            Error::RequestTimeout {
                timeout_ms,
                message,
            } => {
                self.u8(ERR_TIMEOUT)?;
                self.u64(*timeout_ms)?;
                self.string(message)
            }
            Error::RequestLimitExceeded { message } => {
                self.u8(ERR_REQUEST_LIMIT)?;
                self.string(message)
            }
            Error::NodeUnavailable { node, message } => {
                self.u8(ERR_NODE_UNAVAILABLE)?;
                self.string(node)?;
                self.string(message)
            }
            Error::RemoteFault { message, .. } => {
                self.u8(ERR_REMOTE_FAULT)?;
                self.string(message)
            }
            Error::AuthenticationRequired { message } => {
                self.u8(ERR_AUTH_REQUIRED)?;
                self.string(message)
            }
            Error::Unauthorized { message } => {
                self.u8(ERR_UNAUTHORIZED)?;
                self.string(message)
            }
            Error::Serialization { reason } => {
                self.u8(ERR_SERIALIZATION)?;
                self.string(reason)
            }
            // Client-side kinds have no wire form
            Error::IterationFault { .. } | Error::Config { .. } => {
                self.u8(ERR_REMOTE_FAULT)?;
                self.string(&error.to_string())
            }
        }
    }
}

// ============================================================================
// Decoder
// ============================================================================

struct Decoder<'a> {
    cursor: Cursor<&'a [u8]>,
    version: SerialVersion,
}

impl<'a> Decoder<'a> {
    fn new(payload: &'a [u8], version: SerialVersion) -> Self {
        Self {
            cursor: Cursor::new(payload),
            version,
        }
    }

    fn finish(&self) -> Result<()> {
        let consumed = self.cursor.position() as usize;
        let total = self.cursor.get_ref().len();
        if consumed != total {
            return Err(Error::serialization(format!(
                "{} trailing bytes after payload",
                total - consumed
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(io_error)
    }

    fn u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<LittleEndian>().map_err(io_error)
    }

    fn u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(io_error)
    }

    fn u64(&mut self) -> Result<u64> {
        self.cursor.read_u64::<LittleEndian>().map_err(io_error)
    }

    fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::serialization(format!("invalid bool byte {:#04x}", other))),
        }
    }

    fn len(&mut self) -> Result<usize> {
        let len = self.u32()? as usize;
        let remaining = self.cursor.get_ref().len() - self.cursor.position() as usize;
        if len > remaining {
            return Err(Error::serialization(format!(
                "length {} exceeds remaining {} bytes",
                len, remaining
            )));
        }
        Ok(len)
    }

    fn count(&mut self) -> Result<usize> {
        // Counts are not byte lengths; bound them by what could still follow
        self.len()
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.len()?;
        let mut out = vec![0u8; len];
        self.cursor.read_exact(&mut out).map_err(io_error)?;
        Ok(out)
    }

    fn string(&mut self) -> Result<String> {
        String::from_utf8(self.bytes()?)
            .map_err(|e| Error::serialization(format!("string is not UTF-8: {}", e)))
    }

    fn option<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<Option<T>> {
        match self.u8()? {
            0 => Ok(None),
            1 => f(self).map(Some),
            other => Err(Error::serialization(format!(
                "invalid option byte {:#04x}",
                other
            ))),
        }
    }

    fn key(&mut self) -> Result<Key> {
        Key::from_bytes(&self.bytes()?)
    }

    fn value(&mut self) -> Result<Value> {
        Ok(Value::new(self.bytes()?))
    }

    fn version(&mut self) -> Result<Version> {
        let mut raw = [0u8; VERSION_BYTES];
        self.cursor.read_exact(&mut raw).map_err(io_error)?;
        Version::from_bytes(&raw)
    }

    fn table_id(&mut self) -> Result<Option<u64>> {
        if self.version.has_table_id() {
            self.option(|d| d.u64())
        } else {
            Ok(None)
        }
    }

    fn return_choice(&mut self) -> Result<ReturnChoice> {
        Ok(match self.u8()? {
            0 => ReturnChoice::None,
            1 => ReturnChoice::Value,
            2 => ReturnChoice::Version,
            3 => ReturnChoice::All,
            other => return Err(invalid("return choice", other)),
        })
    }

    fn depth(&mut self) -> Result<Depth> {
        Ok(match self.u8()? {
            0 => Depth::ChildrenOnly,
            1 => Depth::ParentAndChildren,
            2 => Depth::DescendantsOnly,
            3 => Depth::ParentAndDescendants,
            other => return Err(invalid("depth", other)),
        })
    }

    fn direction(&mut self) -> Result<Direction> {
        Ok(match self.u8()? {
            0 => Direction::Forward,
            1 => Direction::Reverse,
            2 => Direction::Unordered,
            other => return Err(invalid("direction", other)),
        })
    }

    fn key_range(&mut self) -> Result<KeyRange> {
        match self.u8()? {
            RANGE_BOUNDED => Ok(KeyRange::Bounded {
                start: self.option(|d| d.string())?,
                start_inclusive: self.bool()?,
                end: self.option(|d| d.string())?,
                end_inclusive: self.bool()?,
            }),
            RANGE_PREFIX => Ok(KeyRange::Prefix(self.string()?)),
            other => Err(invalid("key range", other)),
        }
    }

    fn consistency(&mut self) -> Result<Consistency> {
        Ok(match self.u8()? {
            0 => Consistency::NoneRequired,
            1 => Consistency::Absolute,
            2 => Consistency::NoneRequiredNoMaster,
            3 => Consistency::Time {
                permissible_lag_ms: self.u64()?,
                timeout_ms: self.u64()?,
            },
            4 => Consistency::Version {
                version: self.version()?,
                timeout_ms: self.u64()?,
            },
            other => return Err(invalid("consistency", other)),
        })
    }

    fn durability(&mut self) -> Result<Durability> {
        let sync = |b: u8| match b {
            0 => Ok(SyncPolicy::Sync),
            1 => Ok(SyncPolicy::WriteNoSync),
            2 => Ok(SyncPolicy::NoSync),
            other => Err(invalid("sync policy", other)),
        };
        let master_sync = sync(self.u8()?)?;
        let replica_sync = sync(self.u8()?)?;
        let replica_ack = match self.u8()? {
            0 => ReplicaAckPolicy::All,
            1 => ReplicaAckPolicy::None,
            2 => ReplicaAckPolicy::SimpleMajority,
            other => return Err(invalid("replica ack policy", other)),
        };
        Ok(Durability {
            master_sync,
            replica_sync,
            replica_ack,
        })
    }

    fn multi_key_spec(&mut self) -> Result<MultiKeySpec> {
        Ok(MultiKeySpec {
            parent: self.key()?,
            range: self.option(|d| d.key_range())?,
            depth: self.depth()?,
        })
    }

    fn iterate_spec(&mut self) -> Result<IterateSpec> {
        Ok(IterateSpec {
            parent: self.option(|d| d.key())?,
            range: self.option(|d| d.key_range())?,
            depth: self.depth()?,
            direction: self.direction()?,
            batch_size: self.u32()?,
            resume_key: self.option(|d| d.key())?,
            keys_only: self.bool()?,
            within_major_path: self.bool()?,
        })
    }

    /// `top_level` is false inside an execute batch, where nesting is rejected
    fn operation(&mut self, top_level: bool) -> Result<Operation> {
        let tag = self.u8()?;
        let opcode = OpCode::from_u8(tag).ok_or_else(|| invalid("opcode", tag))?;

        Ok(match opcode {
            OpCode::Get => Operation::Get {
                key: self.key()?,
                table_id: self.table_id()?,
            },
            OpCode::Put => Operation::Put {
                key: self.key()?,
                value: self.value()?,
                return_choice: self.return_choice()?,
                table_id: self.table_id()?,
            },
            OpCode::PutIfAbsent => Operation::PutIfAbsent {
                key: self.key()?,
                value: self.value()?,
                return_choice: self.return_choice()?,
                table_id: self.table_id()?,
            },
            OpCode::PutIfPresent => Operation::PutIfPresent {
                key: self.key()?,
                value: self.value()?,
                return_choice: self.return_choice()?,
                table_id: self.table_id()?,
            },
            OpCode::PutIfVersion => Operation::PutIfVersion {
                key: self.key()?,
                value: self.value()?,
                match_version: self.version()?,
                return_choice: self.return_choice()?,
                table_id: self.table_id()?,
            },
            OpCode::Delete => Operation::Delete {
                key: self.key()?,
                return_choice: self.return_choice()?,
                table_id: self.table_id()?,
            },
            OpCode::DeleteIfVersion => Operation::DeleteIfVersion {
                key: self.key()?,
                match_version: self.version()?,
                return_choice: self.return_choice()?,
                table_id: self.table_id()?,
            },
            OpCode::MultiGetKeys => Operation::MultiGetKeys(self.multi_key_spec()?),
            OpCode::MultiGetValues => Operation::MultiGetValues(self.multi_key_spec()?),
            OpCode::MultiDelete => Operation::MultiDelete(self.multi_key_spec()?),
            OpCode::Iterate => Operation::Iterate(self.iterate_spec()?),
            OpCode::TableIterate => {
                if !self.version.has_table_iterate() {
                    return Err(unsupported(self.version, "table iteration"));
                }
                Operation::TableIterate {
                    table_id: self.u64()?,
                    spec: self.iterate_spec()?,
                }
            }
            OpCode::Execute => {
                if !top_level {
                    return Err(Error::serialization("nested execute batch"));
                }
                let count = self.count()?;
                let mut ops = Vec::with_capacity(count);
                for _ in 0..count {
                    let abort_if_unsuccessful = self.bool()?;
                    let operation = self.operation(false)?;
                    ops.push(BatchOperation {
                        operation,
                        abort_if_unsuccessful,
                    });
                }
                Operation::Execute(ops)
            }
        })
    }

    fn write_result(&mut self) -> Result<WriteResult> {
        Ok(WriteResult {
            success: self.bool()?,
            new_version: self.option(|d| d.version())?,
            previous_value: self.option(|d| d.value())?,
            previous_version: self.option(|d| d.version())?,
            table_id: self.table_id()?,
        })
    }

    fn scan_batch(&mut self) -> Result<ScanBatch> {
        let count = self.count()?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(ScanEntry {
                key: self.key()?,
                version: self.version()?,
                value: self.option(|d| d.value())?,
            });
        }
        Ok(ScanBatch {
            entries,
            has_more: self.bool()?,
        })
    }

    fn result(&mut self, top_level: bool) -> Result<OperationResult> {
        let tag = self.u8()?;
        let opcode = OpCode::from_u8(tag).ok_or_else(|| invalid("result tag", tag))?;

        Ok(match opcode {
            OpCode::Get => OperationResult::Get {
                record: self.option(|d| {
                    Ok(ValueVersion {
                        value: d.value()?,
                        version: d.version()?,
                    })
                })?,
                table_id: self.table_id()?,
            },
            OpCode::Put => OperationResult::Put(self.write_result()?),
            OpCode::PutIfAbsent => OperationResult::PutIfAbsent(self.write_result()?),
            OpCode::PutIfPresent => OperationResult::PutIfPresent(self.write_result()?),
            OpCode::PutIfVersion => OperationResult::PutIfVersion(self.write_result()?),
            OpCode::Delete => OperationResult::Delete(self.write_result()?),
            OpCode::DeleteIfVersion => OperationResult::DeleteIfVersion(self.write_result()?),
            OpCode::MultiGetKeys => {
                let count = self.count()?;
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(KeyVersion {
                        key: self.key()?,
                        version: self.version()?,
                    });
                }
                OperationResult::MultiGetKeys(keys)
            }
            OpCode::MultiGetValues => {
                let count = self.count()?;
                let mut records = Vec::with_capacity(count);
                for _ in 0..count {
                    records.push(KeyValueVersion {
                        key: self.key()?,
                        value: self.value()?,
                        version: self.version()?,
                    });
                }
                OperationResult::MultiGetValues(records)
            }
            OpCode::MultiDelete => OperationResult::MultiDelete(self.u64()?),
            OpCode::Iterate => OperationResult::Iterate(self.scan_batch()?),
            OpCode::TableIterate => {
                if !self.version.has_table_iterate() {
                    return Err(unsupported(self.version, "table iteration"));
                }
                OperationResult::TableIterate(self.scan_batch()?)
            }
            OpCode::Execute => {
                if !top_level {
                    return Err(Error::serialization("nested execute result"));
                }
                match self.u8()? {
                    OUTCOME_COMMITTED => {
                        let count = self.count()?;
                        let mut results = Vec::with_capacity(count);
                        for _ in 0..count {
                            results.push(self.result(false)?);
                        }
                        OperationResult::Execute(ExecuteOutcome::Committed(results))
                    }
                    OUTCOME_ABORTED => {
                        let failed_index = self.u32()? as usize;
                        let failed_result = Box::new(self.result(false)?);
                        OperationResult::Execute(ExecuteOutcome::Aborted {
                            failed_index,
                            failed_result,
                        })
                    }
                    other => return Err(invalid("execute outcome", other)),
                }
            }
        })
    }

    fn error(&mut self) -> Result<Error> {
        Ok(match self.u8()? {
            ERR_ILLEGAL_ARGUMENT => Error::IllegalArgument {
                reason: self.string()?,
            },
            ERR_UNSUPPORTED => Error::UnsupportedOperation {
                serial_version: self.u16()?,
                reason: self.string()?,
            },
            ERR_TOPOLOGY_STALE => Error::TopologyStale {
                partition: self.option(|d| d.u32().map(PartitionId::new))?,
                message: self.string()?,
            },
            ERR_CONSISTENCY => Error::ConsistencyNotMet {
                message: self.string()?,
            },
            ERR_DURABILITY => Error::DurabilityNotMet {
                required: self.u32()?,
                available: self.u32()?,
                message: self.string()?,
            },
            ERR_TIMEOUT => Error::RequestTimeout {
                timeout_ms: self.u64()?,
                message: self.string()?,
            },
            ERR_REQUEST_LIMIT => Error::RequestLimitExceeded {
                message: self.string()?,
            },
            ERR_NODE_UNAVAILABLE => Error::NodeUnavailable {
                node: self.string()?,
                message: self.string()?,
            },
            ERR_REMOTE_FAULT => Error::remote_fault(self.string()?),
            ERR_AUTH_REQUIRED => Error::AuthenticationRequired {
                message: self.string()?,
            },
            ERR_UNAUTHORIZED => Error::Unauthorized {
                message: self.string()?,
            },
            ERR_SERIALIZATION => Error::Serialization {
                reason: self.string()?,
            },
            other => return Err(invalid("error code", other)),
        })
    }
}

fn invalid(what: &str, byte: u8) -> Error {
    Error::serialization(format!("invalid {} byte {:#04x}", what, byte))
}
