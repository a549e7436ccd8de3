//! Message encoders. Each function appends exactly one message to `dst`.

use bytes::BufMut;

use super::{
    message_type, ContactHeader, RefusalCode, Shutdown, MAGIC, SEGMENT_END,
    SEGMENT_START, SHUTDOWN_HAS_DELAY, SHUTDOWN_HAS_REASON, VERSION,
};
use crate::sdnv;

/// Maximum size of a data segment header: type byte plus a 5 byte SDNV.
pub const MAX_DATA_SEGMENT_HEADER_LEN: usize = 1 + sdnv::MAX_LEN_U32;

#[inline]
const fn type_byte(code: u8, flags: u8) -> u8 {
    (code << 4) | (flags & 0x0f)
}

pub fn encode_contact_header<B: BufMut>(header: &ContactHeader, dst: &mut B) {
    dst.put_slice(&MAGIC);
    dst.put_u8(VERSION);
    dst.put_u8(header.flags.bits());
    dst.put_u16(header.keepalive_interval);
    sdnv::encode_u32(header.local_eid.len() as u32, dst);
    dst.put_slice(header.local_eid.as_bytes());
}

/// Encodes only the type byte and length of a data segment, so the payload can be written from
/// its own buffer. Returns the number of header bytes written.
pub fn encode_data_segment_header<B: BufMut>(
    start: bool,
    end: bool,
    payload_len: u32,
    dst: &mut B,
) -> usize {
    let mut flags = 0;
    if start {
        flags |= SEGMENT_START;
    }
    if end {
        flags |= SEGMENT_END;
    }

    dst.put_u8(type_byte(message_type::DATA_SEGMENT, flags));
    1 + sdnv::encode_u32(payload_len, dst)
}

pub fn encode_ack<B: BufMut>(acked: u32, dst: &mut B) {
    dst.put_u8(type_byte(message_type::ACK_SEGMENT, 0));
    sdnv::encode_u32(acked, dst);
}

pub fn encode_refusal<B: BufMut>(code: RefusalCode, dst: &mut B) {
    dst.put_u8(type_byte(message_type::REFUSE_BUNDLE, code.into()));
}

pub fn encode_keepalive<B: BufMut>(dst: &mut B) {
    dst.put_u8(type_byte(message_type::KEEPALIVE, 0));
}

pub fn encode_length<B: BufMut>(next_bundle_len: u32, dst: &mut B) {
    dst.put_u8(type_byte(message_type::LENGTH, 0));
    sdnv::encode_u32(next_bundle_len, dst);
}

pub fn encode_shutdown<B: BufMut>(shutdown: &Shutdown, dst: &mut B) {
    let mut flags = 0;
    if shutdown.reason.is_some() {
        flags |= SHUTDOWN_HAS_REASON;
    }
    if shutdown.reconnect_delay.is_some() {
        flags |= SHUTDOWN_HAS_DELAY;
    }

    dst.put_u8(type_byte(message_type::SHUTDOWN, flags));
    if let Some(reason) = shutdown.reason {
        dst.put_u8(reason.into());
    }
    if let Some(delay) = shutdown.reconnect_delay {
        sdnv::encode_u32(delay, dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcpcl::{ContactFlags, ShutdownReason};

    #[test]
    fn contact_header_layout() {
        let mut buf = Vec::new();
        encode_contact_header(
            &ContactHeader {
                flags: ContactFlags::REQUEST_ACK,
                keepalive_interval: 0x1234,
                local_eid: "ipn:1.0".to_owned(),
            },
            &mut buf,
        );

        assert_eq!(&buf[..4], b"dtn!");
        assert_eq!(buf[4], 3);
        assert_eq!(buf[5], 0x1);
        assert_eq!(&buf[6..8], &[0x12, 0x34]);
        assert_eq!(buf[8], 7);
        assert_eq!(&buf[9..], b"ipn:1.0");
    }

    #[test]
    fn single_byte_messages() {
        let mut buf = Vec::new();
        encode_keepalive(&mut buf);
        encode_refusal(RefusalCode::ResourcesExhausted, &mut buf);
        encode_shutdown(&Shutdown::default(), &mut buf);
        assert_eq!(buf, [0x40, 0x32, 0x50]);
    }

    #[test]
    fn data_segment_header_length() {
        let mut buf = Vec::new();
        assert_eq!(encode_data_segment_header(true, true, 200, &mut buf), 3);
        assert_eq!(buf, [0x13, 0x81, 0x48]);

        buf.clear();
        assert_eq!(encode_data_segment_header(false, false, u32::MAX, &mut buf), 6);
        assert_eq!(buf.len(), MAX_DATA_SEGMENT_HEADER_LEN);
        assert_eq!(buf[0], 0x10);
    }

    #[test]
    fn shutdown_with_reason_and_delay() {
        let mut buf = Vec::new();
        encode_shutdown(
            &Shutdown { reason: Some(ShutdownReason::Busy), reconnect_delay: Some(300) },
            &mut buf,
        );
        assert_eq!(buf, [0x53, 0x02, 0x82, 0x2c]);
    }
}
