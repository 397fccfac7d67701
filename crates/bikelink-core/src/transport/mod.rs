//! Transport layer module.

pub mod btle;
pub mod mock;
pub mod traits;

pub use btle::{BtleChannel, default_adapter, find_peripheral, matches_device};
pub use mock::MockChannel;
pub use traits::{Attribute, AttributeChannel, TransportError};
