use bytes::BytesMut;
use tracing::{debug, trace};

use super::{
    message_type, ContactFlags, ContactHeader, DataSegment, Message, ProtocolViolation, Shutdown,
    ShutdownReason, DEFAULT_MAX_RX_BUNDLE_SIZE, MAGIC, SEGMENT_END, SEGMENT_START,
    MAX_EID_LEN, SHUTDOWN_HAS_DELAY, SHUTDOWN_HAS_REASON, VERSION,
};
use crate::sdnv::SdnvAccumulator;

/// Position inside the contact header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactHeaderState {
    Sync1,
    Sync2,
    Sync3,
    Sync4,
    Version,
    Flags,
    KeepaliveHigh,
    KeepaliveLow,
    EidLength,
    Eid,
}

/// Position inside a data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSegmentState {
    Length,
    Contents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    ContactHeader(ContactHeaderState),
    MessageType,
    DataSegment(DataSegmentState),
    Ack,
    Length,
    ShutdownReason,
    ShutdownDelay,
}

impl Default for RxState {
    fn default() -> Self {
        Self::ContactHeader(ContactHeaderState::Sync1)
    }
}

/// Byte-level receive state machine for one TCPCL session.
///
/// Input can be fed in chunks of any size; every complete message (or protocol violation) is
/// reported through the callback in stream order. A SHUTDOWN message or a violation returns the
/// machine to the start of a contact header, ready for the next session.
#[derive(Debug)]
pub struct RxStateMachine {
    state: RxState,
    max_rx_bundle_size: u64,
    sdnv: SdnvAccumulator,

    flags: ContactFlags,
    keepalive_interval: u16,
    eid_len: usize,
    eid: Vec<u8>,

    segment_start: bool,
    segment_end: bool,
    segment_len: usize,
    segment: BytesMut,

    shutdown_has_delay: bool,
    shutdown_reason: Option<ShutdownReason>,
}

impl Default for RxStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RxStateMachine {
    pub fn new() -> Self {
        Self {
            state: RxState::default(),
            max_rx_bundle_size: DEFAULT_MAX_RX_BUNDLE_SIZE,
            sdnv: SdnvAccumulator::new_u32(),
            flags: ContactFlags::empty(),
            keepalive_interval: 0,
            eid_len: 0,
            eid: Vec::new(),
            segment_start: false,
            segment_end: false,
            segment_len: 0,
            segment: BytesMut::new(),
            shutdown_has_delay: false,
            shutdown_reason: None,
        }
    }

    /// Sets the largest data segment accepted before reporting
    /// [`ProtocolViolation::SegmentTooLarge`].
    pub fn with_max_rx_bundle_size(mut self, max: u64) -> Self {
        self.max_rx_bundle_size = max;
        self
    }

    pub fn max_rx_bundle_size(&self) -> u64 {
        self.max_rx_bundle_size
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Discards any partial message and waits for a new contact header.
    pub fn reset(&mut self) {
        self.state = RxState::default();
        self.sdnv.reset();
        self.eid.clear();
        self.segment.clear();
    }

    /// Feeds received bytes through the state machine.
    pub fn feed<F>(&mut self, mut input: &[u8], mut on_message: F)
    where
        F: FnMut(Result<Message, ProtocolViolation>),
    {
        while let Some((&byte, rest)) = input.split_first() {
            if self.state == RxState::DataSegment(DataSegmentState::Contents) {
                // Bulk copy, leaving the segment's final byte to the dispatcher so completion is
                // always handled in one place.
                let remaining = self.segment_len - self.segment.len();
                if remaining > 1 {
                    let n = input.len().min(remaining - 1);
                    self.segment.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    continue;
                }
            }

            input = rest;
            self.dispatch(byte, &mut on_message);
        }
    }

    fn dispatch<F>(&mut self, byte: u8, on_message: &mut F)
    where
        F: FnMut(Result<Message, ProtocolViolation>),
    {
        match self.state {
            RxState::ContactHeader(state) => self.contact_header_byte(state, byte, on_message),
            RxState::MessageType => self.message_type_byte(byte, on_message),
            RxState::DataSegment(DataSegmentState::Length) => match self.sdnv.push(byte) {
                Ok(Some(len)) => {
                    if len > self.max_rx_bundle_size {
                        let max = self.max_rx_bundle_size;
                        self.violation(ProtocolViolation::SegmentTooLarge { len, max }, on_message);
                    } else if len == 0 {
                        self.state = RxState::MessageType;
                        self.deliver_segment(on_message);
                    } else {
                        self.segment_len = len as usize;
                        self.segment.reserve(self.segment_len);
                        self.state = RxState::DataSegment(DataSegmentState::Contents);
                    }
                }
                Ok(None) => {}
                Err(e) => self.violation(ProtocolViolation::SegmentLength(e), on_message),
            },
            RxState::DataSegment(DataSegmentState::Contents) => {
                self.segment.extend_from_slice(&[byte]);
                if self.segment.len() == self.segment_len {
                    self.state = RxState::MessageType;
                    self.deliver_segment(on_message);
                }
            }
            RxState::Ack => match self.sdnv.push(byte) {
                Ok(Some(acked)) => {
                    self.state = RxState::MessageType;
                    on_message(Ok(Message::Ack(acked as u32)));
                }
                Ok(None) => {}
                Err(e) => self.violation(ProtocolViolation::AckSegment(e), on_message),
            },
            RxState::Length => match self.sdnv.push(byte) {
                Ok(Some(len)) => {
                    self.state = RxState::MessageType;
                    on_message(Ok(Message::Length(len as u32)));
                }
                Ok(None) => {}
                Err(e) => self.violation(ProtocolViolation::Length(e), on_message),
            },
            RxState::ShutdownReason => {
                self.shutdown_reason = Some(byte.into());
                if self.shutdown_has_delay {
                    self.state = RxState::ShutdownDelay;
                } else {
                    self.deliver_shutdown(None, on_message);
                }
            }
            RxState::ShutdownDelay => match self.sdnv.push(byte) {
                Ok(Some(delay)) => self.deliver_shutdown(Some(delay as u32), on_message),
                Ok(None) => {}
                Err(e) => self.violation(ProtocolViolation::ShutdownDelay(e), on_message),
            },
        }
    }

    fn contact_header_byte<F>(&mut self, state: ContactHeaderState, byte: u8, on_message: &mut F)
    where
        F: FnMut(Result<Message, ProtocolViolation>),
    {
        use ContactHeaderState::*;

        let next = match state {
            Sync1 if byte == MAGIC[0] => Sync2,
            Sync1 => Sync1,
            Sync2 if byte == MAGIC[1] => Sync3,
            Sync3 if byte == MAGIC[2] => Sync4,
            Sync4 if byte == MAGIC[3] => Version,
            Version if byte == VERSION => Flags,
            // A mismatch that is itself the first magic byte may start a new marker
            Sync2 | Sync3 | Sync4 | Version if byte == MAGIC[0] => Sync2,
            Sync2 | Sync3 | Sync4 => Sync1,
            Version => {
                debug!(version = byte, "unsupported TCPCL version, resyncing");
                Sync1
            }
            Flags => {
                self.flags = ContactFlags::from_bits(byte);
                KeepaliveHigh
            }
            KeepaliveHigh => {
                self.keepalive_interval = (byte as u16) << 8;
                KeepaliveLow
            }
            KeepaliveLow => {
                self.keepalive_interval |= byte as u16;
                self.sdnv.reset();
                EidLength
            }
            EidLength => match self.sdnv.push(byte) {
                Ok(Some(len)) if len > MAX_EID_LEN as u64 => {
                    let violation = ProtocolViolation::EidTooLong { len, max: MAX_EID_LEN };
                    self.violation(violation, on_message);
                    return;
                }
                Ok(Some(len)) => {
                    self.eid.clear();
                    self.eid_len = len as usize;
                    if self.eid_len == 0 {
                        self.deliver_contact_header(on_message);
                        return;
                    }
                    Eid
                }
                Ok(None) => EidLength,
                Err(e) => {
                    self.violation(ProtocolViolation::EidLength(e), on_message);
                    return;
                }
            },
            Eid => {
                self.eid.push(byte);
                if self.eid.len() == self.eid_len {
                    self.deliver_contact_header(on_message);
                    return;
                }
                Eid
            }
        };

        self.state = RxState::ContactHeader(next);
    }

    fn message_type_byte<F>(&mut self, byte: u8, on_message: &mut F)
    where
        F: FnMut(Result<Message, ProtocolViolation>),
    {
        let code = byte >> 4;
        let flags = byte & 0x0f;
        self.sdnv.reset();

        match code {
            message_type::DATA_SEGMENT => {
                self.segment_start = flags & SEGMENT_START != 0;
                self.segment_end = flags & SEGMENT_END != 0;
                self.segment_len = 0;
                self.segment.clear();
                self.state = RxState::DataSegment(DataSegmentState::Length);
            }
            message_type::ACK_SEGMENT => self.state = RxState::Ack,
            message_type::REFUSE_BUNDLE => on_message(Ok(Message::Refuse(flags.into()))),
            message_type::KEEPALIVE => on_message(Ok(Message::Keepalive)),
            message_type::LENGTH => self.state = RxState::Length,
            message_type::SHUTDOWN => {
                self.shutdown_has_delay = flags & SHUTDOWN_HAS_DELAY != 0;
                self.shutdown_reason = None;
                if flags & SHUTDOWN_HAS_REASON != 0 {
                    self.state = RxState::ShutdownReason;
                } else if self.shutdown_has_delay {
                    self.state = RxState::ShutdownDelay;
                } else {
                    self.deliver_shutdown(None, on_message);
                }
            }
            _ => self.violation(ProtocolViolation::UnknownMessageType(byte), on_message),
        }
    }

    fn deliver_contact_header<F>(&mut self, on_message: &mut F)
    where
        F: FnMut(Result<Message, ProtocolViolation>),
    {
        let header = ContactHeader {
            flags: self.flags,
            keepalive_interval: self.keepalive_interval,
            local_eid: String::from_utf8_lossy(&self.eid).into_owned(),
        };
        self.eid.clear();
        self.state = RxState::MessageType;

        trace!(?header, "received contact header");
        on_message(Ok(Message::ContactHeader(header)));
    }

    fn deliver_segment<F>(&mut self, on_message: &mut F)
    where
        F: FnMut(Result<Message, ProtocolViolation>),
    {
        let segment = DataSegment {
            start: self.segment_start,
            end: self.segment_end,
            payload: self.segment.split().freeze(),
        };

        on_message(Ok(Message::DataSegment(segment)));
    }

    fn deliver_shutdown<F>(&mut self, reconnect_delay: Option<u32>, on_message: &mut F)
    where
        F: FnMut(Result<Message, ProtocolViolation>),
    {
        let shutdown = Shutdown { reason: self.shutdown_reason.take(), reconnect_delay };
        self.reset();
        on_message(Ok(Message::Shutdown(shutdown)));
    }

    fn violation<F>(&mut self, violation: ProtocolViolation, on_message: &mut F)
    where
        F: FnMut(Result<Message, ProtocolViolation>),
    {
        debug!(%violation, state = ?self.state, "TCPCL protocol violation, resetting");
        self.reset();
        on_message(Err(violation));
    }
}
