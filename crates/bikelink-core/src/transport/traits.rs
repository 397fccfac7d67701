//! Attribute channel abstraction.
//!
//! Defines the `AttributeChannel` trait the protocols drive, allowing
//! different implementations (btleplug, mock, etc.). The channel handed to a
//! protocol must already be authenticated.

use std::fmt;
use std::future::Future;

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::constants::*;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Write to {attribute} failed: {message}")]
    WriteFailed { attribute: Attribute, message: String },

    #[error("Read from {attribute} failed: {message}")]
    ReadFailed { attribute: Attribute, message: String },

    #[error("Characteristic {0} not found on device")]
    CharacteristicNotFound(Attribute),

    #[error("Device disconnected")]
    Disconnected,

    #[error("No Bluetooth adapter found")]
    NoAdapter,

    #[error("No matching device found")]
    DeviceNotFound,

    #[error("Cancelled")]
    Cancelled,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Bluetooth error: {0}")]
    Btle(#[from] btleplug::Error),
}

/// Addressable endpoints of the maintenance protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// 9-byte firmware metadata header (write).
    FirmwareMetadata,
    /// Ciphertext chunk of at most 240 bytes (write).
    FirmwareBlock,
    /// 1-byte log mode (read).
    LogMode,
    /// 4-byte big-endian log size (read).
    LogSize,
    /// 5-byte request (write), then a variable ASCII block (read).
    LogBlock,
}

impl Attribute {
    pub const ALL: [Attribute; 5] = [
        Attribute::FirmwareMetadata,
        Attribute::FirmwareBlock,
        Attribute::LogMode,
        Attribute::LogSize,
        Attribute::LogBlock,
    ];

    pub fn service_uuid(&self) -> Uuid {
        match self {
            Attribute::FirmwareMetadata | Attribute::FirmwareBlock => FIRMWARE_SERVICE_UUID,
            Attribute::LogMode | Attribute::LogSize | Attribute::LogBlock => {
                MAINTENANCE_SERVICE_UUID
            }
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Attribute::FirmwareMetadata => FIRMWARE_METADATA_UUID,
            Attribute::FirmwareBlock => FIRMWARE_BLOCK_UUID,
            Attribute::LogMode => LOG_MODE_UUID,
            Attribute::LogSize => LOG_SIZE_UUID,
            Attribute::LogBlock => LOG_BLOCK_UUID,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Attribute::FirmwareMetadata => "METADATA",
            Attribute::FirmwareBlock => "BLOCK",
            Attribute::LogMode => "LOG_MODE",
            Attribute::LogSize => "LOG_SIZE",
            Attribute::LogBlock => "LOG_BLOCK",
        };
        f.write_str(name)
    }
}

/// Request/response channel against named attributes.
///
/// Both operations suspend until the transport completes or fails. No
/// implicit retries.
pub trait AttributeChannel: Send {
    /// Write `data` to `attribute`.
    fn write(
        &mut self,
        attribute: Attribute,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Read the current value of `attribute`.
    fn read(
        &mut self,
        attribute: Attribute,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}
