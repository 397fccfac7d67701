//! Vendor firmware ("ware") headers.
//!
//! Three kinds of plaintext image are recognised:
//!
//! - Main firmware begins with a 40-byte little-endian header. Its CRC is
//!   computed the way the controller's CRC peripheral does it: over 32-bit
//!   little-endian words, MSB first, poly 0x04C11DB7, init 0xFFFFFFFF, with the
//!   `crc` and `length` fields replaced by 0xFFFFFFFF.
//! - BLE firmware begins with a 44-byte `"OAD NVM1"` image header. Its CRC is
//!   the standard CRC-32 over everything after the `crc` field, up to `len`.
//! - Anything else is taken to be a boot-loader: a version word and a
//!   word-wise CRC of everything before it sit in the last eight bytes.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use crc::{CRC_32_MPEG_2, Crc, Digest};
use thiserror::Error;

use super::firmware::crc32;

const WORD_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

#[derive(Error, Debug)]
pub enum WareError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid magic: expected 0x{expected:08X}, got 0x{actual:08X}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("Invalid BLE ware magic: {0:02x?}")]
    InvalidBleMagic([u8; 8]),
    #[error("Ware length 0x{length:08X} extends beyond file size 0x{file_size:08X}")]
    LengthBeyondFile { length: u32, file_size: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WareHeader {
    pub magic: u32,
    pub version: u32,
    pub crc: u32,
    pub length: u32,
    pub date: [u8; 12],
    pub time: [u8; 12],
}

/// Outcome of checking an image against its ware header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WareVerification {
    pub stored: u32,
    pub computed: u32,
}

impl WareVerification {
    pub fn is_ok(&self) -> bool {
        self.stored == self.computed
    }
}

impl WareHeader {
    pub const SIZE: usize = 40;
    pub const MAGIC: u32 = 0xAA55_AA55;

    pub fn from_bytes(data: &[u8]) -> Result<Self, WareError> {
        if data.len() < Self::SIZE {
            return Err(WareError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != Self::MAGIC {
            return Err(WareError::InvalidMagic {
                expected: Self::MAGIC,
                actual: magic,
            });
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        let crc = cursor.read_u32::<LittleEndian>()?;
        let length = cursor.read_u32::<LittleEndian>()?;

        let mut date = [0u8; 12];
        let mut time = [0u8; 12];
        date.copy_from_slice(&data[16..28]);
        time.copy_from_slice(&data[28..40]);

        Ok(Self {
            magic,
            version,
            crc,
            length,
            date,
            time,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        for word in [self.magic, self.version, self.crc, self.length] {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf.extend_from_slice(&self.date);
        buf.extend_from_slice(&self.time);
        buf
    }

    /// Build date as text, trimmed at the first NUL or 0xFF.
    pub fn date_str(&self) -> String {
        field_str(&self.date)
    }

    pub fn time_str(&self) -> String {
        field_str(&self.time)
    }

    /// Compute the CRC of `image` as described by this header.
    ///
    /// `image` is the whole file, header included.
    pub fn compute_crc(&self, image: &[u8]) -> Result<u32, WareError> {
        let length = self.length as usize;
        if length > image.len() {
            return Err(WareError::LengthBeyondFile {
                length: self.length,
                file_size: image.len(),
            });
        }
        if length < Self::SIZE {
            return Err(WareError::BufferTooSmall {
                expected: Self::SIZE,
                actual: length,
            });
        }

        let mut blank = self.clone();
        blank.crc = u32::MAX;
        blank.length = u32::MAX;

        let mut digest = WORD_CRC.digest();
        update_words(&mut digest, &blank.to_bytes());

        // The body is consumed in whole words; a trailing partial word takes
        // its missing bytes from whatever follows in the file.
        let body_end = (length.div_ceil(4) * 4).min(image.len());
        let mut body = image[Self::SIZE..body_end].to_vec();
        body.resize((length - Self::SIZE).div_ceil(4) * 4, 0);
        update_words(&mut digest, &body);

        Ok(digest.finalize())
    }

    pub fn verify(&self, image: &[u8]) -> Result<WareVerification, WareError> {
        Ok(WareVerification {
            stored: self.crc,
            computed: self.compute_crc(image)?,
        })
    }
}

/// BLE firmware image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleWareHeader {
    pub crc: u32,
    pub meta_ver: u8,
    pub bim_ver: u8,
    pub tech_type: u16,
    pub crc_stat: u8,
    pub img_cp_stat: u8,
    pub img_no: u8,
    pub img_type: u8,
    pub img_vld: u32,
    /// Image length covered by the CRC, header included.
    pub len: u32,
    pub prg_entry: u32,
    pub soft_ver: u32,
    pub img_end_addr: u32,
    pub hdr_len: u16,
}

impl BleWareHeader {
    pub const SIZE: usize = 44;
    pub const MAGIC: &'static [u8; 8] = b"OAD NVM1";
    /// Bytes before the CRC-covered region (magic and `crc`).
    const CRC_START: usize = 12;

    pub fn from_bytes(data: &[u8]) -> Result<Self, WareError> {
        if data.len() < Self::SIZE {
            return Err(WareError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[..8]);
        if &magic != Self::MAGIC {
            return Err(WareError::InvalidBleMagic(magic));
        }

        let mut cursor = Cursor::new(&data[8..Self::SIZE]);
        Ok(Self {
            crc: cursor.read_u32::<LittleEndian>()?,
            meta_ver: cursor.read_u8()?,
            bim_ver: cursor.read_u8()?,
            tech_type: cursor.read_u16::<LittleEndian>()?,
            crc_stat: cursor.read_u8()?,
            img_cp_stat: cursor.read_u8()?,
            img_no: cursor.read_u8()?,
            img_type: cursor.read_u8()?,
            img_vld: cursor.read_u32::<LittleEndian>()?,
            len: cursor.read_u32::<LittleEndian>()?,
            prg_entry: cursor.read_u32::<LittleEndian>()?,
            soft_ver: cursor.read_u32::<LittleEndian>()?,
            img_end_addr: cursor.read_u32::<LittleEndian>()?,
            hdr_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// CRC-32 over `image[12..len]`.
    pub fn compute_crc(&self, image: &[u8]) -> Result<u32, WareError> {
        let length = self.len as usize;
        if length > image.len() {
            return Err(WareError::LengthBeyondFile {
                length: self.len,
                file_size: image.len(),
            });
        }
        if length < Self::CRC_START {
            return Err(WareError::BufferTooSmall {
                expected: Self::CRC_START,
                actual: length,
            });
        }
        Ok(crc32(&image[Self::CRC_START..length]))
    }

    pub fn verify(&self, image: &[u8]) -> Result<WareVerification, WareError> {
        Ok(WareVerification {
            stored: self.crc,
            computed: self.compute_crc(image)?,
        })
    }
}

/// Trailer of a boot-loader image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderTrailer {
    /// Three version characters, most significant first.
    pub version: String,
    pub verification: WareVerification,
}

impl BootloaderTrailer {
    pub const SIZE: usize = 8;

    /// Read the trailer and check the word-wise CRC of everything before the
    /// stored CRC.
    pub fn verify(image: &[u8]) -> Result<Self, WareError> {
        if image.len() < Self::SIZE {
            return Err(WareError::BufferTooSmall {
                expected: Self::SIZE,
                actual: image.len(),
            });
        }
        let crc_at = image.len() - 4;
        let version_word = &image[crc_at - 4..crc_at];
        let version = [version_word[3], version_word[2], version_word[1]]
            .iter()
            .map(|&b| b as char)
            .collect();
        let stored = u32::from_le_bytes([
            image[crc_at],
            image[crc_at + 1],
            image[crc_at + 2],
            image[crc_at + 3],
        ]);

        // A trailing partial word borrows bytes from the stored CRC.
        let mut digest = WORD_CRC.digest();
        update_words(&mut digest, &image[..crc_at.div_ceil(4) * 4]);

        Ok(Self {
            version,
            verification: WareVerification {
                stored,
                computed: digest.finalize(),
            },
        })
    }
}

/// Header found at the start of a plaintext image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WareImage {
    Main(WareHeader),
    Ble(BleWareHeader),
    /// No header; see [`BootloaderTrailer`].
    Bootloader,
}

impl WareImage {
    pub fn detect(data: &[u8]) -> Self {
        if let Ok(header) = WareHeader::from_bytes(data) {
            WareImage::Main(header)
        } else if let Ok(header) = BleWareHeader::from_bytes(data) {
            WareImage::Ble(header)
        } else {
            WareImage::Bootloader
        }
    }
}

fn update_words(digest: &mut Digest<'_, u32>, data: &[u8]) {
    for word in data.chunks_exact(4) {
        let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        digest.update(&value.to_be_bytes());
    }
}

fn field_str(field: &[u8]) -> String {
    let end = field
        .iter()
        .position(|&b| b == 0 || b == 0xFF)
        .unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
