//! # Message Descriptors
//!
//! The runtime moves three kinds of messages, each represented by a
//! value-typed descriptor sharing a common header:
//!
//! - [`EvtDesc`] — fire-and-forget events, one-to-many.
//! - [`CmdDesc`] — request/response commands, one-to-one, synchronous.
//! - [`DatDesc`] — reliable byte payloads, one-to-one, with flow control.
//!
//! ## Design Considerations
//!
//! - **Value semantics**: queues and transports store copies, never borrows.
//!   A descriptor handed to a callback is the runtime's copy; the poster's
//!   original is untouched.
//! - **Serializable**: descriptors derive Serde and expose a compact bincode
//!   codec ([`EvtDesc::to_bytes`] and friends) so byte-framing backends can
//!   move them without a bespoke wire format.
//! - **Stamped**: the runtime stamps every descriptor it accepts with a
//!   process-global sequence id and a monotonic timestamp; see
//!   [`MsgCommon`].
//!
//! ## Terminal Statuses
//!
//! A command's terminal statuses (success / failed / timeout) are write-once:
//! [`CmdDesc::finish`] refuses to overwrite a terminal status, and the
//! refusal is an internal-invariant error, not a recoverable condition.

use crate::error::{IocError, Result};
use serde::{Deserialize, Serialize};

/// Opaque event identifier. The runtime imposes no scheme on these.
pub type EvtId = u64;

/// Opaque command identifier.
pub type CmdId = u64;

/// Bookkeeping header shared by every descriptor kind.
///
/// `seq_id` is a process-global monotonically increasing sequence number
/// assigned when the runtime accepts the descriptor; `timestamp_ns` is a
/// monotonic clock reading (nanoseconds since the runtime's epoch). Both are
/// zero on a freshly constructed descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCommon {
    /// Process-global sequence number, assigned on acceptance.
    pub seq_id: u64,
    /// Monotonic timestamp in nanoseconds, assigned on acceptance.
    pub timestamp_ns: u64,
}

/// An event descriptor: identifier, scalar value, optional payload buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvtDesc {
    /// Common bookkeeping header.
    pub common: MsgCommon,
    /// Which event this is.
    pub evt_id: EvtId,
    /// Scalar event value.
    pub value: u64,
    /// Optional payload buffer, copied along with the descriptor.
    pub payload: Option<Vec<u8>>,
}

impl EvtDesc {
    /// Create an event descriptor with the given id and value.
    pub fn new(evt_id: EvtId, value: u64) -> Self {
        Self {
            common: MsgCommon::default(),
            evt_id,
            value,
            payload: None,
        }
    }

    /// Attach a payload buffer.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Approximate in-memory size in bytes, for accounting.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>() + self.payload.as_ref().map_or(0, Vec::len)
    }

    /// Serialize to bytes with the runtime's compact codec.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| IocError::bug("event descriptor not serializable"))
    }

    /// Deserialize from bytes produced by [`EvtDesc::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|_| IocError::InvalidParam)
    }
}

/// Lifecycle status of a command descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmdStatus {
    /// Freshly constructed, not yet submitted.
    #[default]
    Initialized,
    /// Queued toward an executor.
    Pending,
    /// An executor is running it.
    Processing,
    /// Terminal: executed successfully.
    Success,
    /// Terminal: the executor reported failure.
    Failed,
    /// Terminal: the initiator's wait expired first.
    Timeout,
}

impl CmdStatus {
    /// Whether this status is terminal (write-once).
    pub fn is_terminal(self) -> bool {
        matches!(self, CmdStatus::Success | CmdStatus::Failed | CmdStatus::Timeout)
    }
}

/// Result code convention: zero for success, executor-defined otherwise.
pub const CMD_RESULT_OK: i64 = 0;

/// A command descriptor: request in, response out, one executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmdDesc {
    /// Common bookkeeping header.
    pub common: MsgCommon,
    /// Which command to execute.
    pub cmd_id: CmdId,
    /// Lifecycle status; terminal values are write-once.
    pub status: CmdStatus,
    /// Result code, [`CMD_RESULT_OK`] on success.
    pub result: i64,
    /// Request payload.
    pub input: Vec<u8>,
    /// Response payload, written by the executor.
    pub output: Vec<u8>,
    /// Advisory wall-clock budget in milliseconds; the enforced bound comes
    /// from the call's options.
    pub timeout_ms: u64,
}

impl CmdDesc {
    /// Create a command descriptor for `cmd_id` with no input.
    pub fn new(cmd_id: CmdId) -> Self {
        Self {
            cmd_id,
            ..Self::default()
        }
    }

    /// Attach a request payload.
    pub fn with_input(mut self, input: Vec<u8>) -> Self {
        self.input = input;
        self
    }

    /// Move this descriptor to a terminal status with the given result code.
    ///
    /// Terminal statuses are write-once: finishing an already-finished
    /// descriptor is an internal invariant violation.
    pub fn finish(&mut self, status: CmdStatus, result: i64) -> Result<()> {
        if self.status.is_terminal() {
            return Err(IocError::bug("terminal command status rewritten"));
        }
        if !status.is_terminal() {
            return Err(IocError::bug("finish called with non-terminal status"));
        }
        self.status = status;
        self.result = result;
        Ok(())
    }

    /// Serialize to bytes with the runtime's compact codec.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| IocError::bug("command descriptor not serializable"))
    }

    /// Deserialize from bytes produced by [`CmdDesc::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|_| IocError::InvalidParam)
    }
}

/// Lifecycle status of a data descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatStatus {
    /// Freshly constructed.
    #[default]
    Initialized,
    /// Handed to the transport.
    Sent,
    /// Delivered to the receiving end.
    Received,
    /// The transport reported failure.
    Failed,
}

/// A data descriptor: an owned byte payload plus bookkeeping.
///
/// A descriptor with an empty payload is "zero data" and is rejected by the
/// send path before any backend is consulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatDesc {
    /// Common bookkeeping header.
    pub common: MsgCommon,
    /// Lifecycle status.
    pub status: DatStatus,
    /// Result code, zero for success.
    pub result: i64,
    /// The payload bytes.
    pub payload: Vec<u8>,
}

impl DatDesc {
    /// Create a data descriptor owning `payload`.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// Whether this descriptor carries no payload at all.
    pub fn is_zero_data(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Alias of [`DatDesc::is_zero_data`] for collection-style call sites.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialize to bytes with the runtime's compact codec.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| IocError::bug("data descriptor not serializable"))
    }

    /// Deserialize from bytes produced by [`DatDesc::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|_| IocError::InvalidParam)
    }
}
