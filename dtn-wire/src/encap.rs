//! CCSDS Encapsulation Packet framing (CCSDS 133.1-B).
//!
//! The first header byte carries the packet version number (always 7), the encapsulated
//! protocol id and a 2-bit "length of length" selecting a 1, 2, 4 or 8 byte header:
//!
//! | header | layout after byte 0                                           | max payload   |
//! |--------|---------------------------------------------------------------|---------------|
//! | 1      | none, idle packet only                                        | 0             |
//! | 2      | total length (u8)                                             | 253           |
//! | 4      | user defined + protocol id ext, total length (u16 BE)         | 65 531        |
//! | 8      | user defined + protocol id ext, 2 reserved, total length (u32 BE) | 2^32 - 9  |
//!
//! The length field counts the whole packet, header included.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Packet version number of an encapsulation packet.
pub const PACKET_VERSION: u8 = 7;
/// Largest payload an encapsulation packet can carry.
pub const MAX_PAYLOAD_LEN: u64 = u32::MAX as u64 - 8;
/// Largest header size.
pub const MAX_HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Unexpected first header byte {0:#04x}")]
    InvalidFirstByte(u8),
    #[error("Invalid encapsulation header")]
    InvalidHeader,
    #[error("Payload of {0} bytes is too large to encapsulate")]
    PayloadTooLarge(u64),
    #[error("Idle packets cannot carry a payload")]
    IdleWithPayload,
    #[error("Only idle packets may be empty")]
    EmptyNonIdle,
}

/// The encapsulated protocol, as registered with SANA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Idle,
    Ltp,
    Bp,
}

impl PacketType {
    pub const fn protocol_id(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Ltp => 1,
            Self::Bp => 4,
        }
    }

    /// First header byte with a zero length of length.
    const fn first_byte(&self) -> u8 {
        (PACKET_VERSION << 5) | (self.protocol_id() << 2)
    }
}

/// A decoded encapsulation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncapHeader {
    /// Header size in bytes: 1, 2, 4 or 8.
    pub header_len: u8,
    pub user_defined: u8,
    pub payload_len: u32,
}

/// Returns the header size needed to encapsulate `payload_len` bytes as `packet_type`.
pub fn header_len(packet_type: PacketType, payload_len: u64) -> Result<usize, Error> {
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge(payload_len));
    }

    match (packet_type, payload_len) {
        (PacketType::Idle, 0) => Ok(1),
        (PacketType::Idle, _) => Err(Error::IdleWithPayload),
        (_, 0) => Err(Error::EmptyNonIdle),
        (_, 1..=253) => Ok(2),
        (_, 254..=65_531) => Ok(4),
        _ => Ok(8),
    }
}

/// Encodes the header for a `payload_len` byte payload into `dst`, returning the header size.
pub fn encode_header<B: BufMut>(
    packet_type: PacketType,
    payload_len: u64,
    dst: &mut B,
) -> Result<usize, Error> {
    let header_len = header_len(packet_type, payload_len)?;
    let length_of_length = header_len.trailing_zeros() as u8;
    let total = payload_len + header_len as u64;

    dst.put_u8(packet_type.first_byte() | length_of_length);

    match header_len {
        2 => dst.put_u8(total as u8),
        4 => {
            dst.put_u8(0);
            dst.put_u16(total as u16);
        }
        8 => {
            dst.put_u8(0);
            dst.put_u16(0);
            dst.put_u32(total as u32);
        }
        _ => {}
    }

    Ok(header_len)
}

/// Determines the header size from the first header byte, checking it matches `packet_type`.
/// An idle packet header is always accepted.
pub fn header_len_from_first_byte(packet_type: PacketType, first: u8) -> Result<usize, Error> {
    if first == PacketType::Idle.first_byte() {
        return Ok(1);
    }

    let length_of_length = first & 0x3;
    if length_of_length == 0 || first != packet_type.first_byte() | length_of_length {
        return Err(Error::InvalidFirstByte(first));
    }

    Ok(1 << length_of_length)
}

/// Decodes a complete header from the front of `src`. Returns `Ok(None)` if `src` does not yet
/// hold the whole header.
pub fn decode_header(packet_type: PacketType, src: &[u8]) -> Result<Option<EncapHeader>, Error> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };

    let header_len = header_len_from_first_byte(packet_type, first)?;
    if src.len() < header_len {
        return Ok(None);
    }

    let mut rest = &src[1..header_len];
    let (user_defined, total) = match header_len {
        1 => return Ok(Some(EncapHeader { header_len: 1, user_defined: 0, payload_len: 0 })),
        2 => (0, rest.get_u8() as u32),
        4 | 8 => {
            let udf_ext = rest.get_u8();
            if udf_ext & 0x0f != 0 {
                return Err(Error::InvalidHeader);
            }
            if header_len == 8 {
                if rest.get_u16() != 0 {
                    return Err(Error::InvalidHeader);
                }
                (udf_ext >> 4, rest.get_u32())
            } else {
                (udf_ext >> 4, rest.get_u16() as u32)
            }
        }
        _ => return Err(Error::InvalidHeader),
    };

    let payload_len = total.checked_sub(header_len as u32).ok_or(Error::InvalidHeader)?;

    Ok(Some(EncapHeader { header_len: header_len as u8, user_defined, payload_len }))
}

#[derive(Debug, Clone, Copy)]
enum State {
    Header,
    Payload(EncapHeader),
}

/// Stream codec for encapsulation packets of one protocol.
///
/// Decoded frames contain the payload only, or the header followed by the payload when
/// [`keep_header`](Self::keep_header) is set. Idle packets are consumed silently. Each decoded
/// frame is handed out only when the reader polls for it, so a reader that stops polling pauses
/// the stream.
#[derive(Debug)]
pub struct EncapCodec {
    packet_type: PacketType,
    keep_header: bool,
    max_payload_len: u64,
    state: State,
}

impl EncapCodec {
    pub fn new(packet_type: PacketType) -> Self {
        Self { packet_type, keep_header: false, max_payload_len: MAX_PAYLOAD_LEN, state: State::Header }
    }

    /// Keeps the encapsulation header in decoded frames.
    pub fn keep_header(mut self, keep: bool) -> Self {
        self.keep_header = keep;
        self
    }

    /// Rejects decoded packets carrying more than `max` bytes.
    pub fn with_max_payload_len(mut self, max: u64) -> Self {
        self.max_payload_len = max;
        self
    }
}

impl Decoder for EncapCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Header => {
                    let Some(header) = decode_header(self.packet_type, src)? else {
                        return Ok(None);
                    };

                    if header.header_len == 1 {
                        // Idle packet
                        src.advance(1);
                        continue;
                    }

                    if header.payload_len as u64 > self.max_payload_len {
                        return Err(Error::PayloadTooLarge(header.payload_len as u64));
                    }

                    if !self.keep_header {
                        src.advance(header.header_len as usize);
                    }
                    self.state = State::Payload(header);
                }
                State::Payload(header) => {
                    let mut frame_len = header.payload_len as usize;
                    if self.keep_header {
                        frame_len += header.header_len as usize;
                    }

                    if src.len() < frame_len {
                        src.reserve(frame_len - src.len());
                        return Ok(None);
                    }

                    self.state = State::Header;
                    return Ok(Some(src.split_to(frame_len).freeze()));
                }
            }
        }
    }
}

impl Encoder<Bytes> for EncapCodec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(MAX_HEADER_LEN + item.len());
        encode_header(self.packet_type, item.len() as u64, dst)?;
        dst.put(item);

        Ok(())
    }
}
