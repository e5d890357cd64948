use crate::error::CalldataError;
use crate::selector::Selector;
use bytes::Buf;
use satsim_types::{Address, Hash, U256};

/// Sequential calldata decoder over a borrowed buffer.
///
/// Every read checks the remaining length first, so a truncated buffer
/// yields [`CalldataError::UnexpectedEnd`] instead of a panic.
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    buf: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<(), CalldataError> {
        if self.buf.remaining() < needed {
            return Err(CalldataError::UnexpectedEnd {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CalldataError> {
        self.ensure(len)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CalldataError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CalldataError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, CalldataError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CalldataError::InvalidBool(other)),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, CalldataError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, CalldataError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64, CalldataError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn read_u256(&mut self) -> Result<U256, CalldataError> {
        Ok(U256::from_be_bytes(self.take_array::<32>()?))
    }

    pub fn read_address(&mut self) -> Result<Address, CalldataError> {
        Ok(Address::from_bytes(self.take_array::<32>()?))
    }

    pub fn read_hash(&mut self) -> Result<Hash, CalldataError> {
        Ok(Hash::from_bytes(self.take_array::<32>()?))
    }

    pub fn read_selector(&mut self) -> Result<Selector, CalldataError> {
        self.read_u32()
    }

    /// Exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CalldataError> {
        Ok(self.take(len)?.to_vec())
    }

    /// Bytes preceded by a u32 length.
    pub fn read_bytes_with_length(&mut self) -> Result<Vec<u8>, CalldataError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// UTF-8 string preceded by a u16 length.
    pub fn read_string_with_length(&mut self) -> Result<String, CalldataError> {
        let len = self.read_u16()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CalldataError::InvalidUtf8)
    }

    pub fn read_address_array(&mut self) -> Result<Vec<Address>, CalldataError> {
        let count = self.read_u16()? as usize;
        (0..count).map(|_| self.read_address()).collect()
    }

    pub fn read_u256_array(&mut self) -> Result<Vec<U256>, CalldataError> {
        let count = self.read_u16()? as usize;
        (0..count).map(|_| self.read_u256()).collect()
    }

    pub fn read_tuple(&mut self) -> Result<Vec<U256>, CalldataError> {
        self.read_u256_array()
    }

    /// Everything left in the buffer.
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let rest = self.buf.to_vec();
        self.buf = &[];
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BinaryWriter;

    #[test]
    fn test_truncated_u64() {
        let mut r = BinaryReader::new(&[0, 0, 1]);
        assert_eq!(
            r.read_u64(),
            Err(CalldataError::UnexpectedEnd { needed: 8, remaining: 3 })
        );
    }

    #[test]
    fn test_invalid_bool() {
        let mut r = BinaryReader::new(&[2]);
        assert_eq!(r.read_bool(), Err(CalldataError::InvalidBool(2)));
    }

    #[test]
    fn test_length_prefix_longer_than_buffer() {
        let mut r = BinaryReader::new(&[0, 0, 0, 9, 1, 2]);
        assert_eq!(
            r.read_bytes_with_length(),
            Err(CalldataError::UnexpectedEnd { needed: 9, remaining: 2 })
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let mut r = BinaryReader::new(&[0, 2, 0xff, 0xfe]);
        assert_eq!(r.read_string_with_length(), Err(CalldataError::InvalidUtf8));
    }

    #[test]
    fn test_mixed_sequence() {
        let target = Address::from_seed(b"target");
        let mut w = BinaryWriter::new();
        w.write_selector(0xdeadbeef)
            .write_address(&target)
            .write_bool(true)
            .write_u256(&U256::from_u64(5));
        w.write_bytes_with_length(&[9, 9]).unwrap();
        let encoded = w.into_vec();

        let mut r = BinaryReader::new(&encoded);
        assert_eq!(r.read_selector().unwrap(), 0xdeadbeef);
        assert_eq!(r.read_address().unwrap(), target);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u256().unwrap(), U256::from_u64(5));
        assert_eq!(r.read_bytes_with_length().unwrap(), vec![9, 9]);
        assert!(r.is_empty());
    }

    #[test]
    fn test_read_remaining_drains() {
        let mut r = BinaryReader::new(&[0, 0, 0, 1, 7, 8]);
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.read_remaining(), vec![7, 8]);
        assert_eq!(r.remaining(), 0);
    }
}
