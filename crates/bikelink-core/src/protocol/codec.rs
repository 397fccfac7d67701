//! Big-endian field codec shared by both exchanges.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("{field}: expected {expected} bytes, got {actual}")]
    Truncated {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub fn encode_u32_be(value: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, value);
    buf
}

/// Decode the first four bytes of `bytes`. Trailing bytes are ignored.
pub fn decode_u32_be(field: &'static str, bytes: &[u8]) -> Result<u32, EncodingError> {
    if bytes.len() < 4 {
        return Err(EncodingError::Truncated {
            field,
            expected: 4,
            actual: bytes.len(),
        });
    }
    Ok(BigEndian::read_u32(&bytes[..4]))
}

pub fn encode_u8(value: u8) -> [u8; 1] {
    [value]
}

pub fn decode_u8(field: &'static str, bytes: &[u8]) -> Result<u8, EncodingError> {
    bytes.first().copied().ok_or(EncodingError::Truncated {
        field,
        expected: 1,
        actual: 0,
    })
}
