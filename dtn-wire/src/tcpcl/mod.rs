//! TCP convergence layer, version 3 (RFC 7242).
//!
//! [`RxStateMachine`] turns an arbitrary chunking of the received byte stream into [`Message`]s,
//! the functions in [`tx`] produce the exact inverse byte layouts and [`TcpclCodec`] wraps both
//! for use with `tokio_util::codec`.

use bytes::{BufMut, Bytes};
use thiserror::Error;

use crate::sdnv::SdnvError;

mod codec;
pub use codec::TcpclCodec;

mod rx;
pub use rx::{ContactHeaderState, DataSegmentState, RxState, RxStateMachine};

pub mod tx;

/// The contact header magic: "dtn!" in US-ASCII.
pub const MAGIC: [u8; 4] = *b"dtn!";
/// The protocol version carried in the contact header.
pub const VERSION: u8 = 3;
/// Default receive limit for a single data segment.
pub const DEFAULT_MAX_RX_BUNDLE_SIZE: u64 = 10_000_000;
/// Longest local EID accepted in a received contact header.
pub const MAX_EID_LEN: usize = 1024;

/// Message type codes, carried in the high nibble of the message type byte.
pub mod message_type {
    /// A bundle or part of one.
    pub const DATA_SEGMENT: u8 = 0x1;
    /// Cumulative acknowledgement of received payload bytes.
    pub const ACK_SEGMENT: u8 = 0x2;
    /// The receiver declines the bundle being sent.
    pub const REFUSE_BUNDLE: u8 = 0x3;
    pub const KEEPALIVE: u8 = 0x4;
    /// Session end, optionally with a reason and a reconnect delay.
    pub const SHUTDOWN: u8 = 0x5;
    /// Announces the length of the next bundle.
    pub const LENGTH: u8 = 0x6;
}

/// Data segment flag: first segment of a bundle.
pub const SEGMENT_START: u8 = 0x2;
/// Data segment flag: last segment of a bundle.
pub const SEGMENT_END: u8 = 0x1;

/// Shutdown flag: a reason code byte follows.
pub const SHUTDOWN_HAS_REASON: u8 = 0x2;
/// Shutdown flag: a reconnect delay SDNV follows.
pub const SHUTDOWN_HAS_DELAY: u8 = 0x1;

/// Errors of [`TcpclCodec`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}

/// Malformed input. The receive state machine resets to the start of a contact header after
/// reporting one, so the connection's framing can no longer be trusted.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ProtocolViolation {
    #[error("invalid local EID length SDNV: {0}")]
    EidLength(SdnvError),
    #[error("local EID of {len} bytes exceeds the limit of {max} bytes")]
    EidTooLong { len: u64, max: usize },
    #[error("invalid data segment length SDNV: {0}")]
    SegmentLength(SdnvError),
    #[error("data segment of {len} bytes exceeds the receive limit of {max} bytes")]
    SegmentTooLarge { len: u64, max: u64 },
    #[error("invalid ack segment SDNV: {0}")]
    AckSegment(SdnvError),
    #[error("invalid length message SDNV: {0}")]
    Length(SdnvError),
    #[error("invalid shutdown reconnection delay SDNV: {0}")]
    ShutdownDelay(SdnvError),
    #[error("unknown message type byte {0:#04x}")]
    UnknownMessageType(u8),
}

/// Contact header flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ContactFlags(u8);

impl ContactFlags {
    /// The sender wants ACK segments for the data it sends.
    pub const REQUEST_ACK: Self = Self(0x1);
    pub const REACTIVE_FRAGMENTATION: Self = Self(0x2);
    /// The sender understands REFUSE_BUNDLE.
    pub const SUPPORT_REFUSAL: Self = Self(0x4);
    /// The sender wants a LENGTH message before each bundle.
    pub const REQUEST_LENGTH: Self = Self(0x8);

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Keeps unknown bits as they are.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ContactFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The contact header exchanged by both sides when a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactHeader {
    pub flags: ContactFlags,
    /// Keepalive interval in seconds. Zero disables keepalives.
    pub keepalive_interval: u16,
    /// The sender's endpoint identifier, e.g. `ipn:1.0`.
    pub local_eid: String,
}

/// A DATA_SEGMENT message. A bundle sent whole has both `start` and `end` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub start: bool,
    pub end: bool,
    pub payload: Bytes,
}

/// Reason carried in the flags nibble of a REFUSE_BUNDLE message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalCode {
    Unknown,
    /// The bundle was already received in full.
    CompletelyReceived,
    ResourcesExhausted,
    /// The receiver asks for the bundle to be sent again.
    Retransmit,
    /// An unassigned code, preserved as received.
    Other(u8),
}

impl From<u8> for RefusalCode {
    fn from(code: u8) -> Self {
        match code {
            0x0 => Self::Unknown,
            0x1 => Self::CompletelyReceived,
            0x2 => Self::ResourcesExhausted,
            0x3 => Self::Retransmit,
            other => Self::Other(other),
        }
    }
}

impl From<RefusalCode> for u8 {
    fn from(code: RefusalCode) -> Self {
        match code {
            RefusalCode::Unknown => 0x0,
            RefusalCode::CompletelyReceived => 0x1,
            RefusalCode::ResourcesExhausted => 0x2,
            RefusalCode::Retransmit => 0x3,
            RefusalCode::Other(other) => other & 0x0f,
        }
    }
}

/// Reason code of a SHUTDOWN message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Nothing was received for longer than the negotiated idle period.
    IdleTimeout,
    VersionMismatch,
    Busy,
    /// An unassigned code, preserved as received.
    Other(u8),
}

impl From<u8> for ShutdownReason {
    fn from(code: u8) -> Self {
        match code {
            0x0 => Self::IdleTimeout,
            0x1 => Self::VersionMismatch,
            0x2 => Self::Busy,
            other => Self::Other(other),
        }
    }
}

impl From<ShutdownReason> for u8 {
    fn from(reason: ShutdownReason) -> Self {
        match reason {
            ShutdownReason::IdleTimeout => 0x0,
            ShutdownReason::VersionMismatch => 0x1,
            ShutdownReason::Busy => 0x2,
            ShutdownReason::Other(other) => other,
        }
    }
}

/// A SHUTDOWN message. A field that is `None` was not present on the wire; a shutdown without a
/// reason carries no assigned reason code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Shutdown {
    pub reason: Option<ShutdownReason>,
    /// Requested delay before reconnecting, in seconds.
    pub reconnect_delay: Option<u32>,
}

/// A decoded TCPCL message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ContactHeader(ContactHeader),
    DataSegment(DataSegment),
    /// Cumulative number of payload bytes acknowledged.
    Ack(u32),
    Refuse(RefusalCode),
    Keepalive,
    Shutdown(Shutdown),
    /// Length of the next bundle.
    Length(u32),
}

impl Message {
    /// Encodes the full message into `dst`.
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        match self {
            Self::ContactHeader(header) => tx::encode_contact_header(header, dst),
            Self::DataSegment(segment) => {
                tx::encode_data_segment_header(
                    segment.start,
                    segment.end,
                    segment.payload.len() as u32,
                    dst,
                );
                dst.put_slice(&segment.payload);
            }
            Self::Ack(acked) => tx::encode_ack(*acked, dst),
            Self::Refuse(code) => tx::encode_refusal(*code, dst),
            Self::Keepalive => tx::encode_keepalive(dst),
            Self::Shutdown(shutdown) => tx::encode_shutdown(shutdown, dst),
            Self::Length(len) => tx::encode_length(*len, dst),
        }
    }
}
