use crate::error::CalldataError;
use crate::selector::Selector;
use bytes::{BufMut, BytesMut};
use satsim_types::{Address, Hash, U256};

/// Sequential calldata encoder.
///
/// Fixed-width writes are infallible. Writes carrying a length or count
/// prefix fail with [`CalldataError::LengthOverflow`] when the value does not
/// fit the prefix width.
#[derive(Debug, Default, Clone)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(value as u8)
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64(value);
        self
    }

    pub fn write_u256(&mut self, value: &U256) -> &mut Self {
        self.buf.put_slice(&value.to_be_bytes());
        self
    }

    pub fn write_address(&mut self, address: &Address) -> &mut Self {
        self.buf.put_slice(address.as_bytes());
        self
    }

    pub fn write_hash(&mut self, hash: &Hash) -> &mut Self {
        self.buf.put_slice(hash.as_bytes());
        self
    }

    pub fn write_selector(&mut self, selector: Selector) -> &mut Self {
        self.write_u32(selector)
    }

    /// Raw bytes, no prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Bytes preceded by a u32 length.
    pub fn write_bytes_with_length(&mut self, bytes: &[u8]) -> Result<&mut Self, CalldataError> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| CalldataError::LengthOverflow(bytes.len()))?;
        self.write_u32(len);
        Ok(self.write_bytes(bytes))
    }

    /// UTF-8 string preceded by a u16 length.
    pub fn write_string_with_length(&mut self, value: &str) -> Result<&mut Self, CalldataError> {
        self.write_count(value.len())?;
        Ok(self.write_bytes(value.as_bytes()))
    }

    pub fn write_address_array(&mut self, addresses: &[Address]) -> Result<&mut Self, CalldataError> {
        self.write_count(addresses.len())?;
        for address in addresses {
            self.write_address(address);
        }
        Ok(self)
    }

    pub fn write_u256_array(&mut self, values: &[U256]) -> Result<&mut Self, CalldataError> {
        self.write_count(values.len())?;
        for value in values {
            self.write_u256(value);
        }
        Ok(self)
    }

    /// Tuple of u256 values. Same layout as an array, kept distinct so call
    /// sites read like the method signature they encode.
    pub fn write_tuple(&mut self, values: &[U256]) -> Result<&mut Self, CalldataError> {
        self.write_u256_array(values)
    }

    fn write_count(&mut self, count: usize) -> Result<(), CalldataError> {
        let count = u16::try_from(count).map_err(|_| CalldataError::LengthOverflow(count))?;
        self.write_u16(count);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_is_big_endian() {
        let mut w = BinaryWriter::new();
        w.write_u16(0x0102).write_u32(0x03040506).write_u64(7);
        assert_eq!(
            w.into_vec(),
            vec![1, 2, 3, 4, 5, 6, 0, 0, 0, 0, 0, 0, 0, 7]
        );
    }

    #[test]
    fn test_bytes_with_length_prefix() {
        let mut w = BinaryWriter::new();
        w.write_bytes_with_length(b"abc").unwrap();
        assert_eq!(w.into_vec(), vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_string_prefix_is_u16() {
        let mut w = BinaryWriter::new();
        w.write_string_with_length("hi").unwrap();
        assert_eq!(w.into_vec(), vec![0, 2, b'h', b'i']);
    }

    #[test]
    fn test_array_count_overflow() {
        let values = vec![U256::ZERO; u16::MAX as usize + 1];
        let mut w = BinaryWriter::new();
        assert_eq!(
            w.write_u256_array(&values).unwrap_err(),
            CalldataError::LengthOverflow(u16::MAX as usize + 1)
        );
    }

    #[test]
    fn test_address_and_u256_width() {
        let mut w = BinaryWriter::new();
        w.write_address(&Address::from_bytes([1; 32]))
            .write_u256(&U256::from_u64(1));
        assert_eq!(w.len(), 64);
        assert_eq!(w.as_slice()[63], 1);
    }
}
