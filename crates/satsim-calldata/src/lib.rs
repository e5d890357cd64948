//! Satsim Calldata - the flat binary protocol spoken across the module boundary.
//!
//! Every host callback and every module entrypoint exchanges plain byte
//! buffers. This crate defines how those buffers are laid out:
//! - [`BinaryWriter`] builds a buffer (big-endian, length/count prefixed)
//! - [`BinaryReader`] consumes one sequentially
//! - [`selector`] derives method selectors from signatures
//! - [`Event`] and the event-list codec returned by `getEvents`

pub mod error;
pub mod event;
pub mod reader;
pub mod selector;
pub mod writer;

pub use error::CalldataError;
pub use event::{decode_events, encode_events, Event};
pub use reader::BinaryReader;
pub use selector::{selector, Selector};
pub use writer::BinaryWriter;

/// Encoded width of an address.
pub const ADDRESS_BYTE_LENGTH: usize = 32;
/// Encoded width of a u256.
pub const U256_BYTE_LENGTH: usize = 32;
/// Encoded width of a selector.
pub const SELECTOR_BYTE_LENGTH: usize = 4;
