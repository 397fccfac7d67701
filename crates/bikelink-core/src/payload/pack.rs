//! PACK firmware bundle container.
//!
//! Layout (little-endian):
//! - 12-byte header: `"PACK"`, entry table offset, entry table length in bytes
//! - file payloads, each zero-padded to a 4-byte boundary
//! - entry table of 64-byte records: `filename[56]`, offset, length

use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Not a PACK file")]
    InvalidMagic,
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Entry table length {0} is not a multiple of the entry size")]
    BadTableLength(u32),
    #[error("Entry table offset 0x{0:08X} overlaps the header")]
    TableOverlapsHeader(u32),
    #[error("Entry {name}: range 0x{offset:08X}+0x{length:08X} lies outside the file")]
    EntryOutOfBounds {
        name: String,
        offset: u32,
        length: u32,
    },
    #[error("File name too long for a PACK entry: {0}")]
    NameTooLong(String),
    #[error("Pack too large for 32-bit offsets")]
    TooLarge,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    pub name: String,
    pub offset: u32,
    pub length: u32,
}

impl PackEntry {
    pub const SIZE: usize = 64;
    pub const NAME_LEN: usize = 56;
}

/// Parsed PACK bundle.
#[derive(Debug)]
pub struct Pack {
    data: Vec<u8>,
    entries: Vec<PackEntry>,
}

impl Pack {
    pub const MAGIC: &'static [u8; 4] = b"PACK";
    pub const HEADER_SIZE: usize = 12;

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PackError> {
        Self::parse(std::fs::read(path)?)
    }

    pub fn parse(data: Vec<u8>) -> Result<Self, PackError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(PackError::BufferTooSmall {
                expected: Self::HEADER_SIZE,
                actual: data.len(),
            });
        }
        if &data[..4] != Self::MAGIC {
            return Err(PackError::InvalidMagic);
        }

        let mut cursor = Cursor::new(&data[4..]);
        let table_offset = cursor.read_u32::<LittleEndian>()?;
        let table_length = cursor.read_u32::<LittleEndian>()?;
        if (table_offset as usize) < Self::HEADER_SIZE {
            return Err(PackError::TableOverlapsHeader(table_offset));
        }
        let table_offset = table_offset as usize;
        if table_length as usize % PackEntry::SIZE != 0 {
            return Err(PackError::BadTableLength(table_length));
        }

        let table_end = table_offset + table_length as usize;
        if table_end > data.len() {
            return Err(PackError::BufferTooSmall {
                expected: table_end,
                actual: data.len(),
            });
        }

        let mut entries = Vec::new();
        for record in data[table_offset..table_end].chunks_exact(PackEntry::SIZE) {
            let name_end = record[..PackEntry::NAME_LEN]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(PackEntry::NAME_LEN);
            let name = String::from_utf8_lossy(&record[..name_end]).into_owned();

            let mut cursor = Cursor::new(&record[PackEntry::NAME_LEN..]);
            let offset = cursor.read_u32::<LittleEndian>()?;
            let length = cursor.read_u32::<LittleEndian>()?;

            if offset as usize + length as usize > data.len() {
                return Err(PackError::EntryOutOfBounds {
                    name,
                    offset,
                    length,
                });
            }
            debug!(name = %name, offset, length, "PACK entry");
            entries.push(PackEntry {
                name,
                offset,
                length,
            });
        }

        Ok(Self { data, entries })
    }

    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    /// Contents of `entry`, or `None` if its range lies outside this bundle.
    pub fn data(&self, entry: &PackEntry) -> Option<&[u8]> {
        let start = entry.offset as usize;
        let end = start.checked_add(entry.length as usize)?;
        self.data.get(start..end)
    }

    /// Look up an entry's contents by file name.
    pub fn entry_data(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| self.data(e))
    }
}

/// Builder producing a PACK bundle in memory.
#[derive(Debug, Default)]
pub struct PackBuilder {
    files: Vec<(String, Vec<u8>)>,
}

impl PackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, data: Vec<u8>) -> Result<&mut Self, PackError> {
        let name = name.into();
        if name.len() > PackEntry::NAME_LEN {
            return Err(PackError::NameTooLong(name));
        }
        self.files.push((name, data));
        Ok(self)
    }

    pub fn build(&self) -> Result<Vec<u8>, PackError> {
        let mut out = vec![0u8; Pack::HEADER_SIZE];
        let mut table = Vec::with_capacity(self.files.len() * PackEntry::SIZE);

        for (name, data) in &self.files {
            let offset = u32::try_from(out.len()).map_err(|_| PackError::TooLarge)?;
            let length = u32::try_from(data.len()).map_err(|_| PackError::TooLarge)?;
            out.extend_from_slice(data);
            out.resize(out.len().div_ceil(4) * 4, 0);

            let mut record = [0u8; PackEntry::SIZE];
            record[..name.len()].copy_from_slice(name.as_bytes());
            record[56..60].copy_from_slice(&offset.to_le_bytes());
            record[60..64].copy_from_slice(&length.to_le_bytes());
            table.extend_from_slice(&record);
        }

        let table_offset = u32::try_from(out.len()).map_err(|_| PackError::TooLarge)?;
        let table_length = u32::try_from(table.len()).map_err(|_| PackError::TooLarge)?;
        out.extend_from_slice(&table);

        out[..4].copy_from_slice(Pack::MAGIC);
        out[4..8].copy_from_slice(&table_offset.to_le_bytes());
        out[8..12].copy_from_slice(&table_length.to_le_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_layout() {
        let mut builder = PackBuilder::new();
        builder.add("main.bin", vec![1, 2, 3, 4, 5]).unwrap();
        builder.add("ble.bin", vec![9; 8]).unwrap();
        let bytes = builder.build().unwrap();

        assert_eq!(&bytes[..4], b"PACK");
        // 12 header + 5 (+3 pad) + 8 = 28
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 28);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 128);
        assert_eq!(&bytes[17..20], &[0, 0, 0]);
        assert_eq!(bytes.len(), 28 + 128);
    }

    #[test]
    fn test_parse_built_pack() {
        let mut builder = PackBuilder::new();
        builder.add("main.bin", b"mainware".to_vec()).unwrap();
        builder.add("ble.bin", b"oad".to_vec()).unwrap();
        let pack = Pack::parse(builder.build().unwrap()).unwrap();

        let names: Vec<_> = pack.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["main.bin", "ble.bin"]);
        assert_eq!(pack.entries()[0].offset, 12);
        assert_eq!(pack.entries()[1].offset, 20);
        assert_eq!(pack.entry_data("ble.bin").unwrap(), b"oad");
        assert!(pack.entry_data("missing").is_none());
    }

    #[test]
    fn test_full_length_name() {
        let name = "n".repeat(PackEntry::NAME_LEN);
        let mut builder = PackBuilder::new();
        builder.add(name.clone(), vec![1]).unwrap();
        let pack = Pack::parse(builder.build().unwrap()).unwrap();
        assert_eq!(pack.entries()[0].name, name);

        assert!(matches!(
            PackBuilder::new().add("n".repeat(57), vec![]),
            Err(PackError::NameTooLong(_))
        ));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            Pack::parse(b"NOPE\0\0\0\0\0\0\0\0".to_vec()),
            Err(PackError::InvalidMagic)
        ));
        assert!(matches!(
            Pack::parse(b"PACK".to_vec()),
            Err(PackError::BufferTooSmall { .. })
        ));

        let mut builder = PackBuilder::new();
        builder.add("a", vec![1, 2, 3, 4]).unwrap();
        let mut bytes = builder.build().unwrap();
        let len_field = bytes.len() - 4;
        bytes[len_field..].copy_from_slice(&0x1000u32.to_le_bytes());
        assert!(matches!(
            Pack::parse(bytes),
            Err(PackError::EntryOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_table_overlapping_header_rejected() {
        let mut bytes = b"PACK".to_vec();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&64u32.to_le_bytes());
        bytes.resize(64, 0);
        assert!(matches!(
            Pack::parse(bytes),
            Err(PackError::TableOverlapsHeader(0))
        ));
    }

    #[test]
    fn test_foreign_entry_is_none() {
        let mut builder = PackBuilder::new();
        builder.add("a", vec![1, 2, 3, 4]).unwrap();
        let pack = Pack::parse(builder.build().unwrap()).unwrap();
        assert_eq!(pack.data(&pack.entries()[0]).unwrap(), &[1, 2, 3, 4]);

        let foreign = PackEntry {
            name: "b".into(),
            offset: 0x1000,
            length: 16,
        };
        assert!(pack.data(&foreign).is_none());
        let huge = PackEntry {
            name: "c".into(),
            offset: u32::MAX,
            length: u32::MAX,
        };
        assert!(pack.data(&huge).is_none());
    }
}
