//! Self-Delimiting Numeric Values (RFC 6256).
//!
//! An SDNV is a big-endian base-128 integer: every byte carries 7 bits of the value and all
//! bytes but the last have the continuation bit (`0x80`) set.

use bytes::BufMut;
use thiserror::Error;

/// Maximum encoded length of a `u32` SDNV.
pub const MAX_LEN_U32: usize = 5;
/// Maximum encoded length of a `u64` SDNV.
pub const MAX_LEN_U64: usize = 10;

const CONTINUATION: u8 = 0x80;
const VALUE_MASK: u8 = 0x7f;

/// Reasons an SDNV cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum SdnvError {
    /// The input ended before a byte with a clear high bit.
    #[error("SDNV is incomplete")]
    Incomplete,
    /// More bytes than the target integer can ever need.
    #[error("SDNV is longer than {0} bytes")]
    TooLong(usize),
    #[error("SDNV value does not fit the target integer")]
    Overflow,
}

/// Returns the number of bytes `value` occupies when encoded.
#[inline]
pub const fn encoded_len_u32(value: u32) -> usize {
    encoded_len_u64(value as u64)
}

/// Returns the number of bytes `value` occupies when encoded.
#[inline]
pub const fn encoded_len_u64(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Encodes `value` into `dst`, returning the number of bytes written (1 to 5).
pub fn encode_u32<B: BufMut>(value: u32, dst: &mut B) -> usize {
    encode_u64(value as u64, dst)
}

/// Encodes `value` into `dst`, returning the number of bytes written (1 to 10).
pub fn encode_u64<B: BufMut>(value: u64, dst: &mut B) -> usize {
    let len = encoded_len_u64(value);

    for i in (1..len).rev() {
        dst.put_u8(CONTINUATION | ((value >> (7 * i)) as u8 & VALUE_MASK));
    }
    dst.put_u8(value as u8 & VALUE_MASK);

    len
}

/// Decodes a `u32` SDNV from the front of `src`, returning the value and the number of bytes
/// consumed.
pub fn decode_u32(src: &[u8]) -> Result<(u32, usize), SdnvError> {
    decode(src, MAX_LEN_U32, u32::MAX as u64).map(|(value, len)| (value as u32, len))
}

/// Decodes a `u64` SDNV from the front of `src`, returning the value and the number of bytes
/// consumed.
pub fn decode_u64(src: &[u8]) -> Result<(u64, usize), SdnvError> {
    decode(src, MAX_LEN_U64, u64::MAX)
}

fn decode(src: &[u8], max_len: usize, max_value: u64) -> Result<(u64, usize), SdnvError> {
    let mut acc = SdnvAccumulator::with_limits(max_len, max_value);

    for (i, byte) in src.iter().enumerate() {
        if let Some(value) = acc.push(*byte)? {
            return Ok((value, i + 1));
        }
    }

    Err(SdnvError::Incomplete)
}

/// Incremental SDNV decoder fed one byte at a time, for byte-oriented state machines.
#[derive(Debug, Clone)]
pub struct SdnvAccumulator {
    value: u64,
    len: usize,
    max_len: usize,
    max_value: u64,
}

impl SdnvAccumulator {
    /// Creates an accumulator for `u32` values.
    pub const fn new_u32() -> Self {
        Self::with_limits(MAX_LEN_U32, u32::MAX as u64)
    }

    /// Creates an accumulator for `u64` values.
    pub const fn new_u64() -> Self {
        Self::with_limits(MAX_LEN_U64, u64::MAX)
    }

    const fn with_limits(max_len: usize, max_value: u64) -> Self {
        Self { value: 0, len: 0, max_len, max_value }
    }

    /// Feeds one byte. Returns `Ok(Some(value))` once the terminating byte is seen, after which
    /// the accumulator is ready for the next value.
    pub fn push(&mut self, byte: u8) -> Result<Option<u64>, SdnvError> {
        if self.value > (self.max_value >> 7) {
            self.reset();
            return Err(SdnvError::Overflow);
        }

        self.value = (self.value << 7) | (byte & VALUE_MASK) as u64;
        self.len += 1;

        if byte & CONTINUATION == 0 {
            let value = self.value;
            self.reset();
            if value > self.max_value {
                return Err(SdnvError::Overflow);
            }
            return Ok(Some(value));
        }

        if self.len >= self.max_len {
            let max_len = self.max_len;
            self.reset();
            return Err(SdnvError::TooLong(max_len));
        }

        Ok(None)
    }

    /// Discards any partially accumulated value.
    pub fn reset(&mut self) {
        self.value = 0;
        self.len = 0;
    }

    /// Returns the number of bytes of the value accumulated so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARIES: &[(u32, usize)] = &[
        (0, 1),
        (1, 1),
        (127, 1),
        (128, 2),
        (16_383, 2),
        (16_384, 3),
        (2_097_151, 3),
        (2_097_152, 4),
        (268_435_455, 4),
        (268_435_456, 5),
        (u32::MAX - 2, 5),
        (u32::MAX - 1, 5),
        (u32::MAX, 5),
    ];

    #[test]
    fn u32_boundaries() {
        for &(value, len) in BOUNDARIES {
            let mut buf = Vec::new();
            assert_eq!(encode_u32(value, &mut buf), len, "value {value}");
            assert_eq!(buf.len(), len);
            assert_eq!(encoded_len_u32(value), len);
            assert_eq!(decode_u32(&buf), Ok((value, len)));

            // Continuation bit on every byte but the last
            assert!(buf[..len - 1].iter().all(|b| b & 0x80 != 0));
            assert_eq!(buf[len - 1] & 0x80, 0);
        }
    }

    #[test]
    fn known_encodings() {
        let mut buf = Vec::new();
        encode_u32(0xABC, &mut buf);
        assert_eq!(buf, [0x95, 0x3c]);

        buf.clear();
        encode_u32(1234, &mut buf);
        assert_eq!(buf, [0x89, 0x52]);

        buf.clear();
        encode_u64(u64::MAX, &mut buf);
        assert_eq!(buf.len(), MAX_LEN_U64);
        assert_eq!(buf[0], 0x81);
        assert_eq!(decode_u64(&buf), Ok((u64::MAX, MAX_LEN_U64)));
    }

    #[test]
    fn decode_stops_at_terminator() {
        assert_eq!(decode_u32(&[0x81, 0x00, 0xff, 0xff]), Ok((128, 2)));
    }

    #[test]
    fn decode_failures() {
        assert_eq!(decode_u32(&[]), Err(SdnvError::Incomplete));
        assert_eq!(decode_u32(&[0x81, 0x80]), Err(SdnvError::Incomplete));
        assert_eq!(decode_u32(&[0x80; 6]), Err(SdnvError::TooLong(MAX_LEN_U32)));
        assert_eq!(decode_u32(&[0x90, 0x80, 0x80, 0x80, 0x00]), Err(SdnvError::Overflow));
        assert_eq!(decode_u64(&[0x80; 11]), Err(SdnvError::TooLong(MAX_LEN_U64)));
    }

    #[test]
    fn accumulator_resets_between_values() {
        let mut acc = SdnvAccumulator::new_u32();
        let mut values = Vec::new();

        for byte in [0x81, 0x00, 0x05, 0xff, 0x7f] {
            if let Some(value) = acc.push(byte).unwrap() {
                values.push(value);
            }
        }

        assert_eq!(values, [128, 5, 16_383]);
        assert!(acc.is_empty());
    }
}
