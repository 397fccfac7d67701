//! Protocol constants.
//!
//! Attribute UUIDs are kept verbatim for wire compatibility.

use uuid::{Uuid, uuid};

// Firmware service
pub const FIRMWARE_SERVICE_UUID: Uuid = uuid!("6acc5510-e631-4069-944d-b8ca7598ad50");
pub const FIRMWARE_METADATA_UUID: Uuid = uuid!("6acc5511-e631-4069-944d-b8ca7598ad50");
pub const FIRMWARE_BLOCK_UUID: Uuid = uuid!("6acc5512-e631-4069-944d-b8ca7598ad50");

// Maintenance service
pub const MAINTENANCE_SERVICE_UUID: Uuid = uuid!("6acc55c0-e631-4069-944d-b8ca7598ad50");
pub const LOG_MODE_UUID: Uuid = uuid!("6acc55c1-e631-4069-944d-b8ca7598ad50");
pub const LOG_SIZE_UUID: Uuid = uuid!("6acc55c2-e631-4069-944d-b8ca7598ad50");
pub const LOG_BLOCK_UUID: Uuid = uuid!("6acc55c3-e631-4069-944d-b8ca7598ad50");

/// Cipher block size in bytes.
pub const CIPHER_BLOCK_SIZE: usize = 16;
/// Fill byte used to pad the image up to a cipher block boundary.
pub const PAD_BYTE: u8 = 0xFF;
/// Maximum ciphertext bytes per BLOCK write.
pub const MAX_CHUNK_SIZE: usize = 240;

/// Version byte at the start of the metadata header.
pub const METADATA_VERSION: u8 = 0;

/// Device log record size in bytes.
pub const LOG_RECORD_SIZE: usize = 16;
/// Records requested per LOG_BLOCK request ("as many as the device wants").
pub const LOG_BLOCK_COUNT: u8 = 255;
