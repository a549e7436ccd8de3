use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Error, Message, ProtocolViolation, RxStateMachine};

/// `tokio_util` codec for a TCPCL session.
///
/// Decoding drains everything buffered into the [`RxStateMachine`] and hands out the resulting
/// messages one at a time. A protocol violation is returned as an error in its stream position.
#[derive(Debug, Default)]
pub struct TcpclCodec {
    rx: RxStateMachine,
    pending: VecDeque<Result<Message, ProtocolViolation>>,
}

impl TcpclCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec that rejects data segments larger than `max` bytes.
    pub fn with_max_rx_bundle_size(max: u64) -> Self {
        Self { rx: RxStateMachine::new().with_max_rx_bundle_size(max), pending: VecDeque::new() }
    }

    /// Returns the underlying receive state machine.
    pub fn rx(&self) -> &RxStateMachine {
        &self.rx
    }
}

impl Decoder for TcpclCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.pending.is_empty() && !src.is_empty() {
            let pending = &mut self.pending;
            self.rx.feed(src, |m| pending.push_back(m));
            src.advance(src.len());
        }

        match self.pending.pop_front() {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(violation)) => Err(violation.into()),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for TcpclCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}
