//! Utilities for encoding and decoding hex-formatted data.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors which can be produced while decoding a hex string.
#[derive(Copy, Clone, Debug, Error, Serialize, Deserialize)]
pub enum DecodeError {
    #[error("hex decode error: output buffer length != half input length")]
    BadOutputLength,

    #[error("hex decode error: input contains non-hex character")]
    InvalidCharacter,

    #[error("hex decode error: input string length must be even")]
    OddInputLength,
}

/// Convert a byte slice to an owned hex string. If you simply need to display
/// a byte slice as hex, use [`display`] instead, which avoids the allocation.
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(encode_nibble(b >> 4));
        out.push(encode_nibble(b & 0x0f));
    }
    out
}

/// Decode a hex string into a fixed-length output buffer.
pub fn decode_to_slice(hex: &str, out: &mut [u8]) -> Result<(), DecodeError> {
    let hex = hex.as_bytes();
    if hex.len() % 2 != 0 {
        return Err(DecodeError::OddInputLength);
    }
    if hex.len() != out.len() * 2 {
        return Err(DecodeError::BadOutputLength);
    }
    for (src, dst) in hex.chunks_exact(2).zip(out.iter_mut()) {
        let hi = decode_nibble(src[0])?;
        let lo = decode_nibble(src[1])?;
        *dst = (hi << 4) | lo;
    }
    Ok(())
}

/// Try to decode a hex string to owned bytes (`Vec<u8>`).
pub fn decode(hex: &str) -> Result<Vec<u8>, DecodeError> {
    let mut out = vec![0u8; hex.len() / 2];
    decode_to_slice(hex, &mut out).map(|()| out)
}

/// Get a [`HexDisplay`] which provides `Debug` and `Display` impls for the
/// given byte slice. Useful for displaying a hex value without allocating.
#[inline]
pub fn display(bytes: &[u8]) -> HexDisplay<'_> {
    HexDisplay(bytes)
}

pub struct HexDisplay<'a>(&'a [u8]);

impl fmt::Display for HexDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HexDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

const fn encode_nibble(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        10..=15 => (b'a' + nibble - 10) as char,
        _ => unreachable!(),
    }
}

const fn decode_nibble(c: u8) -> Result<u8, DecodeError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(DecodeError::InvalidCharacter),
    }
}

#[cfg(test)]
mod test {
    use proptest::arbitrary::any;
    use proptest::{prop_assert_eq, proptest};

    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        proptest!(|(bytes in any::<Vec<u8>>())| {
            let encoded = encode(&bytes);
            let decoded = decode(&encoded).unwrap();
            prop_assert_eq!(bytes, decoded);
        });
    }

    #[test]
    fn decode_rejects_bad_inputs() {
        assert!(decode("abc").is_err());
        assert!(decode("zz").is_err());
        assert!(decode("0xff").is_err());
        assert_eq!(decode("DEADbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn display_matches_encode() {
        let bytes = [0u8, 1, 0xab, 0xff];
        assert_eq!(display(&bytes).to_string(), encode(&bytes));
    }
}
