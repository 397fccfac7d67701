//! Protocol module - wire layouts for the update and log exchanges.

pub mod codec;
pub mod constants;
pub mod header;

pub use codec::{EncodingError, decode_u8, decode_u32_be, encode_u8, encode_u32_be};
pub use constants::*;
pub use header::{LogBlockRequest, MetadataHeader};
