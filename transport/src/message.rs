// Licensed under the Apache-2.0 license

//! Bootloader update protocol messages.
//!
//! Every message starts with a type byte and a length byte (the length of the
//! whole message) and ends with a big-endian CRC-16 over all preceding bytes.
//!
//! ```text
//! START / CANCEL  type len crc16                          4 bytes
//! DATA            type len seq(LE) payload[128] crc16     134 bytes
//! STATUS          type len op_result active count(BE) crc16  8 bytes
//! OP_RESULT       type len op_result crc16                5 bytes
//! ```

use core::fmt;
use core::mem::size_of;

use crc::{Crc, NoTable, CRC_16_IBM_3740};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;
use zerocopy::byteorder::{BigEndian, LittleEndian, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::link::LINK_FILL_BYTE;

/// Size of the chunk carried by every DATA message.
pub const PACKET_PAYLOAD_SIZE: usize = 128;
/// Filler for the unused tail of the final chunk.
pub const CHUNK_FILL_BYTE: u8 = 0xFF;

const CRC16_SIZE: usize = size_of::<u16>();

/// CRC-16 with polynomial 0x1021, initial value 0xFFFF and no final XOR.
pub const MESSAGE_CRC: Crc<u16, NoTable> = Crc::<u16, NoTable>::new(&CRC_16_IBM_3740);

pub fn crc16(data: &[u8]) -> u16 {
    MESSAGE_CRC.checksum(data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    None = 0x00,
    FwugStart = 0x01,
    FwugData = 0x02,
    FwugStatus = 0x03,
    FwugCancel = 0x04,
    ReqData = 0x05,
    Data = 0x06,
    Cmd = 0x07,
    OpResult = 0x08,
}

impl MessageType {
    /// Fixed size of the message, for the types used by the update protocol.
    pub const fn message_size(self) -> Option<usize> {
        match self {
            MessageType::FwugStart | MessageType::FwugCancel => Some(size_of::<ControlMessage>()),
            MessageType::FwugData => Some(size_of::<DataMessage>()),
            MessageType::FwugStatus => Some(size_of::<StatusMessage>()),
            MessageType::OpResult => Some(size_of::<OpResultMessage>()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpResultCode {
    NoErr = 0x00,
    GenericErr = 0xE1,
    CrcErr = 0xE2,
    AuthErr = 0xE3,
    UnknownMsgErr = 0xE4,
}

/// Operation result reported by the device. Codes outside the protocol table
/// are kept as received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpResult {
    Code(OpResultCode),
    Unknown(u8),
}

impl OpResult {
    pub const SUCCESS: OpResult = OpResult::Code(OpResultCode::NoErr);

    pub fn raw(self) -> u8 {
        match self {
            OpResult::Code(code) => code.into(),
            OpResult::Unknown(raw) => raw,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl From<u8> for OpResult {
    fn from(raw: u8) -> Self {
        OpResultCode::try_from(raw).map_or(OpResult::Unknown(raw), OpResult::Code)
    }
}

impl From<OpResultCode> for OpResult {
    fn from(code: OpResultCode) -> Self {
        OpResult::Code(code)
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpResult::Code(code) => write!(f, "{code:?} ({:#04x})", self.raw()),
            OpResult::Unknown(raw) => write!(f, "unknown result {raw:#04x}"),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MessageHeader {
    pub msg_type: u8,
    pub length: u8,
}

impl MessageHeader {
    fn new(msg_type: MessageType, length: u8) -> Self {
        Self {
            msg_type: msg_type.into(),
            length,
        }
    }
}

/// Length byte of a message type. Fails to compile for messages longer than
/// a length byte can describe.
const fn length_byte(size: usize) -> u8 {
    assert!(size <= u8::MAX as usize, "message too long for its length byte");
    size as u8
}

/// START and CANCEL carry no fields.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ControlMessage {
    pub header: MessageHeader,
    pub crc: U16<BigEndian>,
}

#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DataMessage {
    pub header: MessageHeader,
    pub seq: U16<LittleEndian>,
    pub payload: [u8; PACKET_PAYLOAD_SIZE],
    pub crc: U16<BigEndian>,
}

#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct StatusMessage {
    pub header: MessageHeader,
    pub op_result: u8,
    pub active: u8,
    pub packets_received: U16<BigEndian>,
    pub crc: U16<BigEndian>,
}

#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct OpResultMessage {
    pub header: MessageHeader,
    pub op_result: u8,
    pub crc: U16<BigEndian>,
}

const _: () = assert!(size_of::<ControlMessage>() == 4);
const _: () = assert!(size_of::<DataMessage>() == 134);
const _: () = assert!(size_of::<StatusMessage>() == 8);
const _: () = assert!(size_of::<OpResultMessage>() == 5);

const CONTROL_LENGTH: u8 = length_byte(size_of::<ControlMessage>());
const DATA_LENGTH: u8 = length_byte(size_of::<DataMessage>());
const STATUS_LENGTH: u8 = length_byte(size_of::<StatusMessage>());
const OP_RESULT_LENGTH: u8 = length_byte(size_of::<OpResultMessage>());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("DATA payload must be {expected} bytes, got {len}")]
    PayloadSize { len: usize, expected: usize },
    #[error("message of {len} bytes does not fit a {max}-byte link frame")]
    FrameTooLong { len: usize, max: usize },
    #[error("message truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    #[error("unexpected {0:?} message")]
    UnexpectedType(MessageType),
    #[error("{msg_type:?} message declares length {declared}, expected {expected}")]
    UnexpectedLength {
        msg_type: MessageType,
        declared: usize,
        expected: usize,
    },
    #[error("non-filler byte at offset {offset} after the message")]
    TrailingBytes { offset: usize },
    #[error("CRC-16 mismatch: message carries {received:#06x}, computed {computed:#06x}")]
    CrcMismatch { received: u16, computed: u16 },
}

/// CRC trailer of a message whose last two bytes are the trailer itself.
fn trailer_crc(message: &[u8]) -> u16 {
    crc16(&message[..message.len() - CRC16_SIZE])
}

fn control_message(msg_type: MessageType) -> Vec<u8> {
    let mut message = ControlMessage {
        header: MessageHeader::new(msg_type, CONTROL_LENGTH),
        crc: U16::new(0),
    };
    message.crc = U16::new(trailer_crc(message.as_bytes()));
    message.as_bytes().to_vec()
}

pub fn build_start() -> Vec<u8> {
    control_message(MessageType::FwugStart)
}

pub fn build_cancel() -> Vec<u8> {
    control_message(MessageType::FwugCancel)
}

/// Builds a DATA message from a chunk of exactly [`PACKET_PAYLOAD_SIZE`] bytes.
pub fn build_data(seq: u16, chunk: &[u8]) -> Result<Vec<u8>, FramingError> {
    let payload: &[u8; PACKET_PAYLOAD_SIZE] =
        chunk.try_into().map_err(|_| FramingError::PayloadSize {
            len: chunk.len(),
            expected: PACKET_PAYLOAD_SIZE,
        })?;
    Ok(data_message(seq, payload))
}

pub(crate) fn data_message(seq: u16, payload: &[u8; PACKET_PAYLOAD_SIZE]) -> Vec<u8> {
    let mut message = DataMessage {
        header: MessageHeader::new(MessageType::FwugData, DATA_LENGTH),
        seq: U16::new(seq),
        payload: *payload,
        crc: U16::new(0),
    };
    message.crc = U16::new(trailer_crc(message.as_bytes()));
    message.as_bytes().to_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResponse {
    pub op_result: OpResult,
    pub active: bool,
    pub packets_received: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceResponse {
    Status(StatusResponse),
    OpResult(OpResult),
}

impl fmt::Display for DeviceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceResponse::Status(status) => write!(
                f,
                "STATUS {{ result: {}, active: {}, packets received: {} }}",
                status.op_result, status.active, status.packets_received
            ),
            DeviceResponse::OpResult(op_result) => write!(f, "OP_RESULT {{ result: {op_result} }}"),
        }
    }
}

/// Messages sent by the host, as seen by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    Start,
    Cancel,
    Data {
        seq: u16,
        payload: [u8; PACKET_PAYLOAD_SIZE],
    },
}

/// Validates the framing of the message at the start of `bytes`.
///
/// Only link filler may follow the message. Returns the message type and the
/// exact message bytes.
fn unframe(bytes: &[u8], check_crc: bool) -> Result<(MessageType, &[u8]), FramingError> {
    let header_size = size_of::<MessageHeader>();
    if bytes.len() < header_size {
        return Err(FramingError::Truncated {
            needed: header_size,
            actual: bytes.len(),
        });
    }
    let msg_type =
        MessageType::try_from(bytes[0]).map_err(|_| FramingError::UnknownType(bytes[0]))?;
    let expected = msg_type
        .message_size()
        .ok_or(FramingError::UnexpectedType(msg_type))?;
    let declared = usize::from(bytes[1]);
    if declared != expected {
        return Err(FramingError::UnexpectedLength {
            msg_type,
            declared,
            expected,
        });
    }
    if bytes.len() < expected {
        return Err(FramingError::Truncated {
            needed: expected,
            actual: bytes.len(),
        });
    }

    let (message, rest) = bytes.split_at(expected);
    if let Some(pos) = rest.iter().position(|b| *b != LINK_FILL_BYTE) {
        return Err(FramingError::TrailingBytes {
            offset: expected + pos,
        });
    }
    if check_crc {
        let received = u16::from_be_bytes([message[expected - 2], message[expected - 1]]);
        let computed = trailer_crc(message);
        if received != computed {
            return Err(FramingError::CrcMismatch { received, computed });
        }
    }
    Ok((msg_type, message))
}

fn read_message<T: FromBytes>(message: &[u8]) -> Result<T, FramingError> {
    T::read_from_bytes(message).map_err(|_| FramingError::Truncated {
        needed: size_of::<T>(),
        actual: message.len(),
    })
}

/// Parses a device response, checking its CRC-16 trailer.
pub fn parse_response(bytes: &[u8]) -> Result<DeviceResponse, FramingError> {
    decode_response(bytes, true)
}

/// Parses a device response without checking its CRC-16 trailer.
pub fn parse_response_unchecked(bytes: &[u8]) -> Result<DeviceResponse, FramingError> {
    decode_response(bytes, false)
}

fn decode_response(bytes: &[u8], check_crc: bool) -> Result<DeviceResponse, FramingError> {
    let (msg_type, message) = unframe(bytes, check_crc)?;
    match msg_type {
        MessageType::FwugStatus => {
            let status: StatusMessage = read_message(message)?;
            Ok(DeviceResponse::Status(StatusResponse {
                op_result: status.op_result.into(),
                active: status.active != 0,
                packets_received: status.packets_received.get(),
            }))
        }
        MessageType::OpResult => {
            let result: OpResultMessage = read_message(message)?;
            Ok(DeviceResponse::OpResult(result.op_result.into()))
        }
        other => Err(FramingError::UnexpectedType(other)),
    }
}

/// Parses a host message the way the bootloader does.
pub fn parse_request(bytes: &[u8]) -> Result<HostMessage, FramingError> {
    let (msg_type, message) = unframe(bytes, true)?;
    match msg_type {
        MessageType::FwugStart => Ok(HostMessage::Start),
        MessageType::FwugCancel => Ok(HostMessage::Cancel),
        MessageType::FwugData => {
            let data: DataMessage = read_message(message)?;
            Ok(HostMessage::Data {
                seq: data.seq.get(),
                payload: data.payload,
            })
        }
        other => Err(FramingError::UnexpectedType(other)),
    }
}

pub fn encode_status(status: &StatusResponse) -> Vec<u8> {
    let mut message = StatusMessage {
        header: MessageHeader::new(MessageType::FwugStatus, STATUS_LENGTH),
        op_result: status.op_result.raw(),
        active: status.active.into(),
        packets_received: U16::new(status.packets_received),
        crc: U16::new(0),
    };
    message.crc = U16::new(trailer_crc(message.as_bytes()));
    message.as_bytes().to_vec()
}

pub fn encode_op_result(op_result: OpResult) -> Vec<u8> {
    let mut message = OpResultMessage {
        header: MessageHeader::new(MessageType::OpResult, OP_RESULT_LENGTH),
        op_result: op_result.raw(),
        crc: U16::new(0),
    };
    message.crc = U16::new(trailer_crc(message.as_bytes()));
    message.as_bytes().to_vec()
}
