use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// A blake3 digest.
///
/// Deployment salts and virtual contract addresses are both carried as
/// `Hash`; the concrete 20-byte address is derived from the latter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const ZERO: Self = Self([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        <[u8; 32]>::try_from(slice)
            .map(Self)
            .map_err(|_| TypesError::InvalidHashLength(slice.len()))
    }

    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Digest of `parts` fed to one hasher in order, equal to hashing their
    /// concatenation.
    pub fn compute_multi(parts: &[&[u8]]) -> Self {
        let digest = parts
            .iter()
            .fold(blake3::Hasher::new(), |mut hasher, part| {
                hasher.update(part);
                hasher
            })
            .finalize();
        Self(*digest.as_bytes())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&format_args!("{self}")).finish()
    }
}

/// Accepts 64 hex digits with or without a `0x` prefix.
impl FromStr for Hash {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        Self::from_slice(&hex::decode(digits)?)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
