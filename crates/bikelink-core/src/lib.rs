//! bikelink-core: host side of a vehicle control unit's wireless maintenance
//! protocol.
//!
//! Two exchanges run over an authenticated GATT-style attribute channel:
//! pushing an AES-128-ECB encrypted firmware image in 240-byte chunks, and
//! reading the paged diagnostic log buffer as ASCII text.
//!
//! # Architecture
//!
//! - **Protocol**: Constants, big-endian codec, fixed-width headers
//! - **Cipher**: Padding, encryption and metadata header derivation
//! - **Payload**: Firmware images, ware header and PACK bundle inspection
//! - **Transport**: Attribute channel abstraction (btleplug, mock)
//! - **State**: Named protocol states
//! - **Update / Logs**: The two protocol state machines
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Thin orchestrator (authenticate, confirm, run, cancel)
//!
//! # Limitations
//!
//! Ciphertext carries no authentication tag and the device is never asked to
//! confirm what it received. The CRC in the metadata header covers the
//! plaintext only.
//!
//! # Example
//!
//! ```no_run
//! use bikelink_core::{EncryptionKey, FirmwareTransfer, MockChannel, NullObserver};
//! use bikelink_core::payload::FirmwareImage;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let key = EncryptionKey::from_hex("000102030405060708090a0b0c0d0e0f")?;
//! let image = FirmwareImage::from_file("mainware.bin")?;
//! let mut channel = MockChannel::new();
//!
//! let mut transfer = FirmwareTransfer::new(&image, &key);
//! let report = transfer.run(&mut channel, &NullObserver).await?;
//! println!("sent {} chunks", report.chunks);
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod events;
pub mod logs;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;
pub mod update;

// Re-exports for convenience
pub use cipher::{CipherError, EncryptionKey};
pub use events::{Event, NullObserver, Observer, Phase, TracingObserver};
pub use logs::{LogCapture, LogError, LogRetrieval, OffsetAdvance, PartialLog};
pub use payload::{FirmwareImage, Pack, WareHeader};
pub use protocol::{LogBlockRequest, MetadataHeader};
pub use session::{Authenticator, Session, SessionConfig, SessionError};
pub use state::{LogState, TransferState};
pub use transport::{Attribute, AttributeChannel, BtleChannel, MockChannel, TransportError};
pub use update::{FirmwareTransfer, TransferError, TransferReport};
