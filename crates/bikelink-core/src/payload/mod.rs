//! Payload handling module.
//!
//! Provides loading and chunking for firmware images, plus inspection of the
//! vendor ware header and the PACK bundle container.

pub mod firmware;
pub mod pack;
pub mod ware;

pub use firmware::{ChunkIterator, FirmwareError, FirmwareImage, crc32};
pub use pack::{Pack, PackBuilder, PackEntry, PackError};
pub use ware::{BleWareHeader, BootloaderTrailer, WareError, WareHeader, WareImage, WareVerification};
