//! Class-prefixed variable-length integer codec.
//!
//! The leading run of `1` bits in the first byte selects a size class;
//! the remaining bits of that byte plus the continuation bytes carry the
//! value big-endian:
//!
//! ```text
//! 0vvvvvvv                              1 byte,  values 0..=127
//! 10vvvvvv vvvvvvvv                     2 bytes, values ..=16383
//! 110vvvvv vvvvvvvv vvvvvvvv           3 bytes, values ..=2^21-1
//! 1110vvvv (3 bytes)                    4 bytes, values ..=2^28-1
//! 1111nnnn (n+1 bytes)                  extended, n+1 big-endian bytes
//! ```
//!
//! The signed form reserves the first payload bit as the sign and stores
//! the magnitude, so each class holds one bit less (63, 8191, 2^20-1,
//! 2^27-1; in the extended form the sign is the top bit of the first
//! continuation byte). Encoding always picks the smallest class that
//! fits; decoding rejects non-minimal and over-length input as
//! malformed and truncated input as incomplete.

use crate::error::UnpackError;
use bytes::{BufMut, BytesMut};

/// Encode an unsigned integer into the smallest class that fits.
pub fn put_uint(buf: &mut BytesMut, value: u64) {
    if value < 128 {
        buf.put_u8(value as u8);
    } else if value < 16384 {
        buf.put_u8(0x80 | (value >> 8) as u8);
        buf.put_u8(value as u8);
    } else if value < (1 << 21) {
        buf.put_u8(0xC0 | (value >> 16) as u8);
        buf.put_u8((value >> 8) as u8);
        buf.put_u8(value as u8);
    } else if value < (1 << 28) {
        buf.put_u8(0xE0 | (value >> 24) as u8);
        buf.put_u8((value >> 16) as u8);
        buf.put_u8((value >> 8) as u8);
        buf.put_u8(value as u8);
    } else {
        let extra = byte_len(value);
        buf.put_u8(0xF0 | (extra - 1) as u8);
        for i in (0..extra).rev() {
            buf.put_u8((value >> (8 * i)) as u8);
        }
    }
}

/// Encode a signed integer as sign bit plus magnitude.
pub fn put_int(buf: &mut BytesMut, value: i64) {
    let neg = value < 0;
    let magnitude = value.unsigned_abs();
    let sign = u64::from(neg);
    if magnitude < 64 {
        buf.put_u8((sign << 6 | magnitude) as u8);
    } else if magnitude < 8192 {
        let v = sign << 13 | magnitude;
        buf.put_u8(0x80 | (v >> 8) as u8);
        buf.put_u8(v as u8);
    } else if magnitude < (1 << 20) {
        let v = sign << 20 | magnitude;
        buf.put_u8(0xC0 | (v >> 16) as u8);
        buf.put_u8((v >> 8) as u8);
        buf.put_u8(v as u8);
    } else if magnitude < (1 << 27) {
        let v = sign << 27 | magnitude;
        buf.put_u8(0xE0 | (v >> 24) as u8);
        buf.put_u8((v >> 16) as u8);
        buf.put_u8((v >> 8) as u8);
        buf.put_u8(v as u8);
    } else {
        // One extra bit for the sign; i64::MIN needs 9 continuation bytes.
        let bits = 64 - magnitude.leading_zeros() as usize;
        let extra = (bits + 8) / 8;
        buf.put_u8(0xF0 | (extra - 1) as u8);
        let top_shift = 8 * (extra - 1);
        let top = if top_shift >= 64 {
            0
        } else {
            (magnitude >> top_shift) as u8
        };
        buf.put_u8(if neg { 0x80 | top } else { top });
        for i in (0..extra - 1).rev() {
            buf.put_u8((magnitude >> (8 * i)) as u8);
        }
    }
}

/// Decode an unsigned integer from the front of `input`, consuming it.
pub fn get_uint(input: &mut &[u8]) -> Result<u64, UnpackError> {
    let data = *input;
    let head = match data.first() {
        Some(&b) => b,
        None => return Err(UnpackError::Incomplete),
    };

    let (len, value) = if head < 0x80 {
        (1, head as u64)
    } else if head < 0xC0 {
        if data.len() < 2 {
            return Err(UnpackError::Incomplete);
        }
        let v = ((head & 0x3F) as u64) << 8 | data[1] as u64;
        if v < 128 {
            return Err(UnpackError::Malformed("uint varint not minimal"));
        }
        (2, v)
    } else if head < 0xE0 {
        if data.len() < 3 {
            return Err(UnpackError::Incomplete);
        }
        let v = ((head & 0x1F) as u64) << 16 | (data[1] as u64) << 8 | data[2] as u64;
        if v < 16384 {
            return Err(UnpackError::Malformed("uint varint not minimal"));
        }
        (3, v)
    } else if head < 0xF0 {
        if data.len() < 4 {
            return Err(UnpackError::Incomplete);
        }
        let v = ((head & 0x0F) as u64) << 24
            | (data[1] as u64) << 16
            | (data[2] as u64) << 8
            | data[3] as u64;
        if v < (1 << 21) {
            return Err(UnpackError::Malformed("uint varint not minimal"));
        }
        (4, v)
    } else {
        let extra = (head & 0x0F) as usize + 1;
        if extra > 8 {
            return Err(UnpackError::Malformed("uint varint too long"));
        }
        if data.len() < 1 + extra {
            return Err(UnpackError::Incomplete);
        }
        let mut v = 0u64;
        for &b in &data[1..1 + extra] {
            v = v << 8 | b as u64;
        }
        if v < (1 << 28) {
            return Err(UnpackError::Malformed("uint varint not minimal"));
        }
        let bits = 64 - v.leading_zeros() as usize;
        if (bits + 7) / 8 != extra {
            return Err(UnpackError::Malformed("uint varint not minimal"));
        }
        (1 + extra, v)
    };

    *input = &data[len..];
    Ok(value)
}

/// Decode a signed integer from the front of `input`, consuming it.
pub fn get_int(input: &mut &[u8]) -> Result<i64, UnpackError> {
    let data = *input;
    let head = match data.first() {
        Some(&b) => b,
        None => return Err(UnpackError::Incomplete),
    };

    let (len, neg, magnitude) = if head < 0x80 {
        (1, head & 0x40 != 0, (head & 0x3F) as u64)
    } else if head < 0xC0 {
        if data.len() < 2 {
            return Err(UnpackError::Incomplete);
        }
        let v = ((head & 0x3F) as u64) << 8 | data[1] as u64;
        let m = v & ((1 << 13) - 1);
        if m < 64 {
            return Err(UnpackError::Malformed("int varint not minimal"));
        }
        (2, v & (1 << 13) != 0, m)
    } else if head < 0xE0 {
        if data.len() < 3 {
            return Err(UnpackError::Incomplete);
        }
        let v = ((head & 0x1F) as u64) << 16 | (data[1] as u64) << 8 | data[2] as u64;
        let m = v & ((1 << 20) - 1);
        if m < 8192 {
            return Err(UnpackError::Malformed("int varint not minimal"));
        }
        (3, v & (1 << 20) != 0, m)
    } else if head < 0xF0 {
        if data.len() < 4 {
            return Err(UnpackError::Incomplete);
        }
        let v = ((head & 0x0F) as u64) << 24
            | (data[1] as u64) << 16
            | (data[2] as u64) << 8
            | data[3] as u64;
        let m = v & ((1 << 27) - 1);
        if m < (1 << 20) {
            return Err(UnpackError::Malformed("int varint not minimal"));
        }
        (4, v & (1 << 27) != 0, m)
    } else {
        let extra = (head & 0x0F) as usize + 1;
        if extra > 9 {
            return Err(UnpackError::Malformed("int varint too long"));
        }
        if data.len() < 1 + extra {
            return Err(UnpackError::Incomplete);
        }
        let neg = data[1] & 0x80 != 0;
        // Up to 71 magnitude bits on the wire; accumulate wide, then bound.
        let mut acc: u128 = (data[1] & 0x7F) as u128;
        for &b in &data[2..1 + extra] {
            acc = acc << 8 | b as u128;
        }
        let limit = if neg { 1u128 << 63 } else { (1u128 << 63) - 1 };
        if acc > limit {
            return Err(UnpackError::Malformed("int varint overflow"));
        }
        let m = acc as u64;
        if m < (1 << 27) {
            return Err(UnpackError::Malformed("int varint not minimal"));
        }
        let bits = 64 - m.leading_zeros() as usize;
        if (bits + 8) / 8 != extra {
            return Err(UnpackError::Malformed("int varint not minimal"));
        }
        (1 + extra, neg, m)
    };

    // Sign-magnitude; a magnitude of 2^63 wraps back to i64::MIN.
    let value = if neg {
        (magnitude as i64).wrapping_neg()
    } else {
        magnitude as i64
    };
    *input = &data[len..];
    Ok(value)
}

fn byte_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    ((bits + 7) / 8).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_uint(value: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_uint(&mut buf, value);
        buf.to_vec()
    }

    fn encode_int(value: i64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_int(&mut buf, value);
        buf.to_vec()
    }

    fn decode_uint(bytes: &[u8]) -> Result<u64, UnpackError> {
        let mut input = bytes;
        let v = get_uint(&mut input)?;
        assert!(input.is_empty(), "decoder left {} bytes", input.len());
        Ok(v)
    }

    fn decode_int(bytes: &[u8]) -> Result<i64, UnpackError> {
        let mut input = bytes;
        let v = get_int(&mut input)?;
        assert!(input.is_empty(), "decoder left {} bytes", input.len());
        Ok(v)
    }

    #[test]
    fn test_uint_class_boundaries() {
        let cases: &[(u64, usize)] = &[
            (0, 1),
            (63, 1),
            (64, 1),
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 3),
            ((1 << 21) - 1, 3),
            (1 << 21, 4),
            ((1 << 28) - 1, 4),
            (1 << 28, 5),
            ((1 << 36) - 1, 6),
            (u64::MAX, 9),
        ];
        for &(value, expected_len) in cases {
            let bytes = encode_uint(value);
            assert_eq!(bytes.len(), expected_len, "length for {}", value);
            assert_eq!(decode_uint(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_uint_exact_bytes() {
        assert_eq!(encode_uint(0), [0x00]);
        assert_eq!(encode_uint(127), [0x7F]);
        // Two-byte class carries the 0b10 prefix.
        assert_eq!(encode_uint(128), [0x80, 0x80]);
        assert_eq!(encode_uint(16383), [0xBF, 0xFF]);
        assert_eq!(encode_uint(16384), [0xC0, 0x40, 0x00]);
        assert_eq!(encode_uint(1 << 28), [0xF3, 0x10, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_int_class_boundaries() {
        let cases: &[(i64, usize)] = &[
            (0, 1),
            (63, 1),
            (-63, 1),
            (64, 2),
            (-64, 2),
            (8191, 2),
            (-8191, 2),
            (8192, 3),
            ((1 << 20) - 1, 3),
            (1 << 20, 4),
            ((1 << 27) - 1, 4),
            (1 << 27, 5),
            (i64::MAX, 9),
            (i64::MIN, 10),
        ];
        for &(value, expected_len) in cases {
            let bytes = encode_int(value);
            assert_eq!(bytes.len(), expected_len, "length for {}", value);
            assert_eq!(decode_int(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_int_sign_bit_placement() {
        // One-byte class: 0b0s_vvvvvv.
        assert_eq!(encode_int(5), [0x05]);
        assert_eq!(encode_int(-5), [0x45]);
        // Two-byte class: sign is the first payload bit after the 0b10 prefix.
        assert_eq!(encode_int(64), [0x80, 0x40]);
        assert_eq!(encode_int(-64), [0xA0, 0x40]);
    }

    #[test]
    fn test_incomplete_input() {
        assert_eq!(decode_uint(&[]), Err(UnpackError::Incomplete));
        assert_eq!(decode_uint(&[0x80]), Err(UnpackError::Incomplete));
        assert_eq!(decode_uint(&[0xC1, 0x00]), Err(UnpackError::Incomplete));
        assert_eq!(decode_uint(&[0xF7, 0x01, 0x02]), Err(UnpackError::Incomplete));
        assert_eq!(decode_int(&[]), Err(UnpackError::Incomplete));
        assert_eq!(decode_int(&[0xE0, 0x10, 0x00]), Err(UnpackError::Incomplete));
    }

    #[test]
    fn test_non_minimal_rejected() {
        // Value 5 padded into the two-byte class.
        assert!(matches!(
            decode_uint(&[0x80, 0x05]),
            Err(UnpackError::Malformed(_))
        ));
        // Value 200 padded into the three-byte class.
        assert!(matches!(
            decode_uint(&[0xC0, 0x00, 0xC8]),
            Err(UnpackError::Malformed(_))
        ));
        // Extended class with a leading zero byte.
        assert!(matches!(
            decode_uint(&[0xF4, 0x00, 0x10, 0x00, 0x00, 0x00]),
            Err(UnpackError::Malformed(_))
        ));
        // Magnitude 5 padded into the two-byte signed class.
        assert!(matches!(
            decode_int(&[0x80, 0x05]),
            Err(UnpackError::Malformed(_))
        ));
    }

    #[test]
    fn test_over_length_rejected() {
        // 10 continuation bytes cannot be a u64.
        assert!(matches!(
            decode_uint(&[0xF9, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]),
            Err(UnpackError::Malformed(_))
        ));
        // Positive magnitude 2^63 overflows i64.
        let mut bytes = vec![0xF8, 0x00];
        bytes.extend_from_slice(&(1u64 << 63).to_be_bytes()[..8]);
        assert!(matches!(
            decode_int(&bytes),
            Err(UnpackError::Malformed(_))
        ));
    }

    #[test]
    fn test_consumes_exactly_its_bytes() {
        let mut buf = BytesMut::new();
        put_uint(&mut buf, 300);
        put_int(&mut buf, -70000);
        put_uint(&mut buf, 7);
        let bytes = buf.freeze();
        let mut input: &[u8] = &bytes;
        assert_eq!(get_uint(&mut input).unwrap(), 300);
        assert_eq!(get_int(&mut input).unwrap(), -70000);
        assert_eq!(get_uint(&mut input).unwrap(), 7);
        assert!(input.is_empty());
    }

    #[test]
    fn test_random_round_trips() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..4000 {
            // Shift spreads samples across every size class.
            let value = rng.gen::<u64>() >> rng.gen_range(0..64);
            assert_eq!(decode_uint(&encode_uint(value)).unwrap(), value);

            let signed = (rng.gen::<i64>() >> rng.gen_range(0..64)).wrapping_neg();
            assert_eq!(decode_int(&encode_int(signed)).unwrap(), signed);
        }
    }
}
