//! Object layout of the module's managed heap.
//!
//! Every managed object carries a runtime header ending immediately before
//! its pointer: class id at `ptr - 8`, payload size in bytes at `ptr - 4`.
//! Typed arrays are 12-byte views over a separate `ArrayBuffer`.

use crate::error::VmError;

/// Class id of `ArrayBuffer`.
pub const ARRAY_BUFFER_ID: u32 = 1;
/// Class id of `String`.
pub const STRING_ID: u32 = 2;
/// Class id of `Uint8Array` in modules built with the default runtime.
pub const DEFAULT_UINT8_ARRAY_ID: u32 = 13;

/// Size of a typed-array view object.
pub const TYPED_ARRAY_HEADER_SIZE: u32 = 12;
/// Offset of the payload size word, counted backwards from the pointer.
pub const RT_SIZE_OFFSET: u32 = 4;
/// Offset of the class id word, counted backwards from the pointer.
pub const RT_ID_OFFSET: u32 = 8;

/// `{buffer, dataStart, byteLength}` view header, little-endian words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedArrayHeader {
    pub buffer: u32,
    pub data_start: u32,
    pub byte_length: u32,
}

impl TypedArrayHeader {
    /// View covering a whole buffer.
    pub fn over(buffer: u32, byte_length: u32) -> Self {
        Self {
            buffer,
            data_start: buffer,
            byte_length,
        }
    }

    pub fn encode(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.buffer.to_le_bytes());
        out[4..8].copy_from_slice(&self.data_start.to_le_bytes());
        out[8..12].copy_from_slice(&self.byte_length.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, VmError> {
        if bytes.len() < 12 {
            return Err(VmError::Protocol(format!(
                "typed array header needs 12 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            buffer: read_u32_le(&bytes[0..4]),
            data_start: read_u32_le(&bytes[4..8]),
            byte_length: read_u32_le(&bytes[8..12]),
        })
    }
}

/// Read a little-endian u32 from the first four bytes of `bytes`.
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

/// Decode UTF-16LE code units, replacing unpaired surrogates.
pub fn decode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

pub fn encode_utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}
