//! Fixed-width messages written to the device.

use super::codec::{EncodingError, decode_u8, decode_u32_be, encode_u32_be};
use super::constants::{LOG_BLOCK_COUNT, METADATA_VERSION};

/// Firmware metadata header (9 bytes).
///
/// Sent to the METADATA attribute before any ciphertext. `length` and `crc32`
/// describe the unpadded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataHeader {
    pub version: u8,
    pub length: u32,
    pub crc32: u32,
}

impl MetadataHeader {
    pub const SIZE: usize = 9;

    pub fn new(length: u32, crc32: u32) -> Self {
        Self {
            version: METADATA_VERSION,
            length,
            crc32,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version;
        buf[1..5].copy_from_slice(&encode_u32_be(self.length));
        buf[5..9].copy_from_slice(&encode_u32_be(self.crc32));
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, EncodingError> {
        if data.len() < Self::SIZE {
            return Err(EncodingError::Truncated {
                field: "metadata header",
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            version: data[0],
            length: decode_u32_be("metadata length", &data[1..5])?,
            crc32: decode_u32_be("metadata crc", &data[5..9])?,
        })
    }
}

/// Log block request (5 bytes): big-endian offset followed by a record count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogBlockRequest {
    pub offset: u32,
    pub block_count: u8,
}

impl LogBlockRequest {
    pub const SIZE: usize = 5;

    pub fn new(offset: u32) -> Self {
        Self {
            offset,
            block_count: LOG_BLOCK_COUNT,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&encode_u32_be(self.offset));
        buf[4] = self.block_count;
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, EncodingError> {
        if data.len() < Self::SIZE {
            return Err(EncodingError::Truncated {
                field: "log block request",
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            offset: decode_u32_be("log block offset", &data[..4])?,
            block_count: decode_u8("log block count", &data[4..])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_header_layout() {
        let header = MetadataHeader::new(0x0002FCC8, 0xCBF43926);
        assert_eq!(
            header.to_bytes(),
            [0x00, 0x00, 0x02, 0xFC, 0xC8, 0xCB, 0xF4, 0x39, 0x26]
        );
        assert_eq!(MetadataHeader::from_bytes(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn test_metadata_header_too_short() {
        assert!(MetadataHeader::from_bytes(&[0; 8]).is_err());
    }

    #[test]
    fn test_log_block_request_layout() {
        let req = LogBlockRequest::new(0x0102_0304);
        assert_eq!(req.to_bytes(), [0x01, 0x02, 0x03, 0x04, 0xFF]);

        let parsed = LogBlockRequest::from_bytes(&[0, 0, 0, 16, 255]).unwrap();
        assert_eq!(parsed.offset, 16);
        assert_eq!(parsed.block_count, LOG_BLOCK_COUNT);
    }
}
