use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// Domain tag mixed into concrete contract addresses so they never equal
/// the virtual (hash) form they were derived from.
const CONTRACT_ADDRESS_DOMAIN: &[u8] = b"satsim/contract-address";

/// 32-byte account or contract address.
/// Display format: `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 32]);

impl Address {
    pub const ZERO: Self = Self([0u8; 32]);
    pub const LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from a byte slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| TypesError::InvalidAddressLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Deterministic address from an arbitrary seed.
    /// `address = blake3(seed)`
    pub fn from_seed(seed: &[u8]) -> Self {
        Self(*blake3::hash(seed).as_bytes())
    }

    /// Concrete contract address for a virtual address.
    /// `address = blake3(domain || virtual)`
    pub fn from_virtual(virtual_address: &crate::Hash) -> Self {
        let digest = crate::Hash::compute_multi(&[
            CONTRACT_ADDRESS_DOMAIN,
            virtual_address.as_bytes(),
        ]);
        Self(*digest.as_bytes())
    }

    /// Check if this is the zero address
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Convert to hex string without 0x prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form used in log lines: first and last four bytes.
    pub fn short(&self) -> String {
        format!("0x{}..{}", hex::encode(&self.0[..4]), hex::encode(&self.0[28..]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| TypesError::InvalidAddressFormat(s.to_string()))?;
        let bytes = hex::decode(digits)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
