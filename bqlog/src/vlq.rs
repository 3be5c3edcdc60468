//! Prefix-coded variable length integers (`VLQ`) and `ZigZag` signed mapping.
//!
//! Unlike LEB128-style continuation-bit varints, the length of a `VLQ`-encoded
//! value is determined entirely by its first byte, which lets a decoder know
//! how many bytes to read before inspecting any of them. Up to 8 data bytes
//! follow a single prefix byte (9 bytes total for the largest values).

use thiserror::Error;

/// Errors that can occur while decoding a `VLQ` value.
#[derive(Error, Clone, Debug)]
pub enum Error {
    /// The source ended before a complete value could be read.
    #[error("the source reached its end while decoding a VLQ value")]
    UnexpectedEnd,
    /// The decoded value does not fit in the requested integral type.
    #[error("the decoded VLQ value overflows the target integral type")]
    Overflow,
}

/// The upper bound (exclusive) of the first-byte value for each encoded
/// length, from 1 byte up to 8 bytes. The 9-byte form has no bound: any first
/// byte of `0xFF` with 8 trailing bytes.
const THRESHOLDS: [u64; 8] = [
    0x80,                  // 1 byte:  7 bits of payload
    0x80 + (1 << 7),       // 2 bytes: 6 + 8 bits
    0x80 + (1 << 7) + (1 << 14),
    0x80 + (1 << 7) + (1 << 14) + (1 << 21),
    0x80 + (1 << 7) + (1 << 14) + (1 << 21) + (1 << 28),
    0x80 + (1 << 7) + (1 << 14) + (1 << 21) + (1 << 28) + (1 << 35),
    0x80 + (1 << 7) + (1 << 14) + (1 << 21) + (1 << 28) + (1 << 35) + (1 << 42),
    0x80 + (1 << 7) + (1 << 14) + (1 << 21) + (1 << 28) + (1 << 35) + (1 << 42) + (1 << 49),
];

/// Returns the number of bytes a `VLQ`-encoded `value` would occupy.
pub(crate) fn encode_length(value: u64) -> usize {
    for (i, threshold) in THRESHOLDS.iter().enumerate() {
        if value < *threshold {
            return i + 1;
        }
    }
    9
}

/// Encodes `value` as `VLQ` bytes, appending them to `out`.
pub(crate) fn encode(value: u64, out: &mut Vec<u8>) {
    let len = encode_length(value);
    if len == 9 {
        out.push(0xFF);
        out.extend_from_slice(&value.to_le_bytes());
        return;
    }

    let base: u64 = THRESHOLDS[..len - 1].iter().sum();
    let biased = value - base;

    // The first byte carries `len - 1` leading one-bits followed by a zero
    // bit (except for the 1-byte form, whose top bit is always zero), then
    // the high bits of the biased payload.
    let payload_bits = 8 - len;
    let prefix_mask: u8 = if len == 1 { 0 } else { !(0xFFu8 >> (len - 1)) };
    let first = prefix_mask | ((biased >> (8 * (len - 1))) as u8 & (0xFF >> len));
    out.push(first);
    for i in (0..len - 1).rev() {
        out.push((biased >> (8 * i)) as u8);
    }
    let _ = payload_bits;
}

/// Decodes a `VLQ`-encoded `u64` from the front of `bytes`, returning the
/// value and the number of bytes consumed.
pub(crate) fn decode(bytes: &[u8]) -> Result<(u64, usize), Error> {
    let first = *bytes.first().ok_or(Error::UnexpectedEnd)?;
    let len = (first.leading_ones() as usize + 1).min(9);
    if bytes.len() < len {
        return Err(Error::UnexpectedEnd);
    }

    if len == 9 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[1..9]);
        return Ok((u64::from_le_bytes(raw), 9));
    }

    let base: u64 = THRESHOLDS[..len - 1].iter().sum();
    let mut biased = (first & (0xFFu8 >> len)) as u64;
    for &byte in &bytes[1..len] {
        biased = (biased << 8) | byte as u64;
    }

    Ok((base + biased, len))
}

/// Maps a signed integer to an unsigned one so that small-magnitude values
/// (both positive and negative) encode compactly: `0, -1, 1, -2, 2, ...` maps
/// to `0, 1, 2, 3, 4, ...`.
#[inline]
pub(crate) fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// The inverse of [`zigzag_encode`].
#[inline]
pub(crate) fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_small() {
        for value in [0u64, 1, 0x7F, 0x80, 0xFF, 200, 16384] {
            let mut buf = Vec::new();
            encode(value, &mut buf);
            assert_eq!(buf.len(), encode_length(value));
            let (decoded, len) = decode(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(len, buf.len());
        }
    }

    #[test]
    fn test_roundtrip_large() {
        for value in [u32::MAX as u64, u64::MAX, u64::MAX - 1, 1u64 << 40] {
            let mut buf = Vec::new();
            encode(value, &mut buf);
            let (decoded, len) = decode(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(len, buf.len());
        }
    }

    #[test]
    fn test_unexpected_end() {
        let mut buf = Vec::new();
        encode(u64::MAX, &mut buf);
        assert!(matches!(decode(&buf[..buf.len() - 1]), Err(Error::UnexpectedEnd)));
        assert!(matches!(decode(&[]), Err(Error::UnexpectedEnd)));
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        for value in [0i64, -1, 1, -2, 2, i64::MIN, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(value)), value);
        }
    }
}
