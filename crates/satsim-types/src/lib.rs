//! Satsim Types - Core type definitions for the SATSIM contract harness.
//!
//! This crate provides the fundamental types shared by every layer:
//! - Addresses (32-byte, hex encoded)
//! - Hashes (32-byte, blake3 digests)
//! - U256 (256-bit unsigned integer used for storage slots and values)
//! - Network selector

pub mod address;
pub mod hash;
pub mod u256;
pub mod network;
pub mod error;

#[cfg(feature = "serde")]
mod serialization;

pub use address::Address;
pub use hash::Hash;
pub use u256::U256;
pub use network::Network;
pub use error::TypesError;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Address, Hash, Network, TypesError, U256};
}
