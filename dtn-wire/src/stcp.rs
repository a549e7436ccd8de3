//! Simple TCP convergence layer framing: a 4 byte big-endian length followed by exactly that
//! many bytes of bundle. A zero length frame is a keepalive.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// The keepalive frame.
pub const KEEPALIVE: [u8; HEADER_LEN] = [0; HEADER_LEN];

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(u64),
}

/// Returns the length prefix for a bundle of `len` bytes.
pub fn header(len: u32) -> [u8; HEADER_LEN] {
    len.to_be_bytes()
}

#[derive(Default)]
enum State {
    #[default]
    Header,
    Payload(u32),
}

pub struct StcpCodec {
    /// The current state of the decoder.
    state: State,
    max_frame_len: u32,
}

impl Default for StcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl StcpCodec {
    pub fn new() -> Self {
        Self { state: State::Header, max_frame_len: u32::MAX }
    }

    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        Self { state: State::Header, max_frame_len }
    }
}

impl Decoder for StcpCodec {
    /// A bundle, or an empty buffer for a keepalive.
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Header => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }

                    let len = src.get_u32();
                    if len > self.max_frame_len {
                        return Err(Error::FrameTooLarge(len as u64));
                    }

                    self.state = State::Payload(len);
                }
                State::Payload(len) => {
                    if src.len() < len as usize {
                        return Ok(None);
                    }

                    self.state = State::Header;
                    return Ok(Some(src.split_to(len as usize).freeze()));
                }
            }
        }
    }
}

impl Encoder<Bytes> for StcpCodec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = u32::try_from(item.len()).map_err(|_| Error::FrameTooLarge(item.len() as u64))?;

        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32(len);
        dst.put(item);

        Ok(())
    }
}
