//! Firmware image loading and chunking.

use std::path::Path;

use crc::{CRC_32_ISO_HDLC, Crc};
use thiserror::Error;
use tracing::info;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("Image too large: {0} bytes does not fit a 32-bit length")]
    TooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard CRC-32 (ISO-HDLC, as used by zlib).
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Raw firmware image, immutable once loaded.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    crc32: u32,
}

impl FirmwareImage {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FirmwareError> {
        if u32::try_from(data.len()).is_err() {
            return Err(FirmwareError::TooLarge(data.len()));
        }
        let crc32 = crc32(&data);
        Ok(Self { data, crc32 })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FirmwareError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let image = Self::from_bytes(data)?;
        info!(
            path = %path.display(),
            len = image.length(),
            crc = %format!("0x{:08x}", image.crc32),
            "Loaded firmware image"
        );
        Ok(image)
    }

    /// Unpadded length.
    pub fn length(&self) -> u32 {
        // Bounded in from_bytes.
        self.data.len() as u32
    }

    /// CRC-32 over the unpadded bytes.
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Iterator over contiguous, non-overlapping chunks of at most `chunk_size`
/// bytes. Only the last chunk may be shorter. A zero chunk size is treated as 1.
#[derive(Debug, Clone)]
pub struct ChunkIterator<'a> {
    data: &'a [u8],
    chunk_size: usize,
    offset: usize,
}

impl<'a> ChunkIterator<'a> {
    pub fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            data,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }

    /// Total number of chunks, including a trailing partial one.
    pub fn total(&self) -> usize {
        self.data.len().div_ceil(self.chunk_size)
    }

    /// Byte offset of the next chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for ChunkIterator<'a> {
    /// (byte offset, chunk)
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let start = self.offset;
        let end = (start + self.chunk_size).min(self.data.len());
        self.offset = end;
        Some((start, &self.data[start..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::MAX_CHUNK_SIZE;
    use std::io::Write;

    #[test]
    fn test_crc32_vectors() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn test_chunk_iterator() {
        for len in [0usize, 16, 240, 256, 480, 496, 1000] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let iter = ChunkIterator::new(&data, MAX_CHUNK_SIZE);
            assert_eq!(iter.total(), len.div_ceil(MAX_CHUNK_SIZE));

            let chunks: Vec<_> = iter.collect();
            assert_eq!(chunks.len(), len.div_ceil(MAX_CHUNK_SIZE));

            let mut expected_offset = 0;
            let mut joined = Vec::new();
            for (i, (offset, chunk)) in chunks.iter().enumerate() {
                assert_eq!(*offset, expected_offset);
                assert!(chunk.len() <= MAX_CHUNK_SIZE);
                if i + 1 < chunks.len() {
                    assert_eq!(chunk.len(), MAX_CHUNK_SIZE);
                }
                expected_offset += chunk.len();
                joined.extend_from_slice(chunk);
            }
            assert_eq!(joined, data);
        }
    }

    #[test]
    fn test_zero_chunk_size_yields_single_bytes() {
        let iter = ChunkIterator::new(b"abc", 0);
        assert_eq!(iter.total(), 3);
        let chunks: Vec<_> = iter.map(|(_, c)| c).collect();
        assert_eq!(chunks, [b"a", b"b", b"c"]);
    }

    #[test]
    fn test_image_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"123456789").unwrap();

        let image = FirmwareImage::from_file(file.path()).unwrap();
        assert_eq!(image.length(), 9);
        assert_eq!(image.crc32(), 0xCBF43926);
        assert_eq!(image.raw_data(), b"123456789");
    }

    #[test]
    fn test_image_missing_file() {
        assert!(matches!(
            FirmwareImage::from_file("/nonexistent/firmware.bin"),
            Err(FirmwareError::Io(_))
        ));
    }
}
