// Licensed under the Apache-2.0 license

use core::fmt;

use thiserror::Error;

use crate::link::LinkError;
use crate::message::{FramingError, OpResult, StatusResponse};

/// Why the device refused a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The device answered with an OP_RESULT message instead of STATUS.
    OpResult(OpResult),
    /// STATUS carrying an error result.
    Status(StatusResponse),
    /// STATUS acknowledging the wrong number of packets.
    PacketCount { expected: u16, actual: u16 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::OpResult(op_result) => write!(f, "OP_RESULT {op_result}"),
            Rejection::Status(status) => write!(f, "STATUS {}", status.op_result),
            Rejection::PacketCount { expected, actual } => {
                write!(f, "device counted {actual} packets, expected {expected}")
            }
        }
    }
}

/// Outcome of a single send-and-await attempt that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("no response before the deadline")]
    Timeout,
    #[error(transparent)]
    Link(LinkError),
    #[error("malformed response: {error} (raw {raw:02x?})")]
    Malformed { error: FramingError, raw: Vec<u8> },
    #[error("rejected: {reason} (raw {raw:02x?})")]
    Rejected { reason: Rejection, raw: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("image needs {chunks} chunks, the device counts at most {max}")]
    ImageTooLarge { chunks: usize, max: usize },
    #[error("invalid session options: {0}")]
    InvalidOptions(&'static str),
    #[error("START failed: {0}")]
    StartFailed(AttemptFailure),
    #[error("chunk {seq} failed after {attempts} attempts, last: {last}")]
    ChunkFailed {
        seq: u16,
        attempts: usize,
        last: AttemptFailure,
    },
    #[error("update cancelled")]
    Cancelled,
    #[error("event {event} is not valid in state {state}")]
    UnexpectedEvent {
        state: &'static str,
        event: &'static str,
    },
}
