use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// 256-bit unsigned integer used for storage keys and values.
///
/// Stored as 4 x u64 in little-endian limb order. On the wire it is always
/// 32 big-endian bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct U256([u64; 4]);

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl U256 {
    pub const ZERO: Self = Self([0, 0, 0, 0]);
    pub const ONE: Self = Self([1, 0, 0, 0]);
    pub const MAX: Self = Self([u64::MAX; 4]);

    pub const fn from_limbs(limbs: [u64; 4]) -> Self {
        Self(limbs)
    }

    pub const fn from_u64(val: u64) -> Self {
        Self([val, 0, 0, 0])
    }

    pub const fn from_u128(val: u128) -> Self {
        Self([val as u64, (val >> 64) as u64, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&l| l == 0)
    }

    /// Checked addition
    pub fn checked_add(&self, rhs: &Self) -> Option<Self> {
        let mut result = [0u64; 4];
        let mut carry = false;
        for (i, slot) in result.iter_mut().enumerate() {
            let (sum1, o1) = self.0[i].overflowing_add(rhs.0[i]);
            let (sum2, o2) = sum1.overflowing_add(carry as u64);
            *slot = sum2;
            carry = o1 || o2;
        }
        (!carry).then_some(Self(result))
    }

    /// Multiply by a single limb, returning `None` on overflow.
    fn checked_mul_small(&self, rhs: u64) -> Option<Self> {
        let mut result = [0u64; 4];
        let mut carry = 0u128;
        for (i, slot) in result.iter_mut().enumerate() {
            let product = (self.0[i] as u128) * (rhs as u128) + carry;
            *slot = product as u64;
            carry = product >> 64;
        }
        (carry == 0).then_some(Self(result))
    }

    /// Divide by a single non-zero limb, returning quotient and remainder.
    fn div_rem_small(&self, rhs: u64) -> (Self, u64) {
        let mut quotient = [0u64; 4];
        let mut rem = 0u128;
        for i in (0..4).rev() {
            let cur = (rem << 64) | self.0[i] as u128;
            quotient[i] = (cur / rhs as u128) as u64;
            rem = cur % rhs as u128;
        }
        (Self(quotient), rem as u64)
    }

    /// Convert to big-endian bytes
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for i in 0..4 {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&self.0[3 - i].to_be_bytes());
        }
        bytes
    }

    /// Convert from big-endian bytes
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        let mut limbs = [0u64; 4];
        for i in 0..4 {
            let mut limb = [0u8; 8];
            limb.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            limbs[3 - i] = u64::from_be_bytes(limb);
        }
        Self(limbs)
    }

    /// Convert to little-endian bytes
    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut bytes = self.to_be_bytes();
        bytes.reverse();
        bytes
    }

    /// Convert from little-endian bytes
    pub fn from_le_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Self::from_be_bytes(bytes)
    }

    /// Parse from decimal string
    pub fn from_decimal_str(s: &str) -> Result<Self, TypesError> {
        if s.is_empty() {
            return Err(TypesError::InvalidU256String(s.to_string()));
        }
        let mut result = Self::ZERO;
        for c in s.chars() {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| TypesError::InvalidU256String(s.to_string()))?;
            result = result
                .checked_mul_small(10)
                .and_then(|r| r.checked_add(&Self::from_u64(digit as u64)))
                .ok_or(TypesError::U256Overflow)?;
        }
        Ok(result)
    }
}

impl From<u64> for U256 {
    fn from(val: u64) -> Self {
        Self::from_u64(val)
    }
}

impl From<u128> for U256 {
    fn from(val: u128) -> Self {
        Self::from_u128(val)
    }
}

impl From<u32> for U256 {
    fn from(val: u32) -> Self {
        Self::from_u64(val as u64)
    }
}

impl TryFrom<U256> for u64 {
    type Error = TypesError;

    fn try_from(value: U256) -> Result<Self, Self::Error> {
        if value.0[1] != 0 || value.0[2] != 0 || value.0[3] != 0 {
            Err(TypesError::U256Overflow)
        } else {
            Ok(value.0[0])
        }
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        let mut n = *self;
        let mut digits = Vec::new();
        while !n.is_zero() {
            let (q, r) = n.div_rem_small(10);
            digits.push(b'0' + r as u8);
            n = q;
        }
        digits.reverse();
        f.write_str(&String::from_utf8_lossy(&digits))
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U256({})", self)
    }
}

impl fmt::LowerHex for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl FromStr for U256 {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(digits) => {
                let digits = if digits.len() % 2 == 1 {
                    format!("0{digits}")
                } else {
                    digits.to_string()
                };
                let bytes = hex::decode(digits)?;
                if bytes.len() > 32 {
                    return Err(TypesError::U256Overflow);
                }
                let mut padded = [0u8; 32];
                padded[32 - bytes.len()..].copy_from_slice(&bytes);
                Ok(Self::from_be_bytes(padded))
            }
            None => Self::from_decimal_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_u256_checked_add() {
        let a = U256::from_u64(100);
        let b = U256::from_u64(50);
        assert_eq!(a.checked_add(&b), Some(U256::from_u64(150)));
        assert_eq!(U256::MAX.checked_add(&U256::ONE), None);
    }

    #[test]
    fn test_u256_carry_across_limbs() {
        let a = U256::from_u64(u64::MAX);
        assert_eq!(a.checked_add(&U256::ONE), Some(U256::from_limbs([0, 1, 0, 0])));
    }

    #[test]
    fn test_u256_ordering() {
        assert!(U256::from_limbs([0, 1, 0, 0]) > U256::from_u64(u64::MAX));
        assert!(U256::ZERO < U256::ONE);
    }

    #[test]
    fn test_u256_be_bytes() {
        let v = U256::from_u64(5);
        let bytes = v.to_be_bytes();
        assert_eq!(bytes[31], 5);
        assert!(bytes[..31].iter().all(|&b| b == 0));
        assert_eq!(U256::from_be_bytes(bytes), v);
        assert_eq!(v.to_le_bytes()[0], 5);
    }

    #[test]
    fn test_u256_display_and_parse() {
        let v: U256 = "123456789012345678901234567890".parse().unwrap();
        assert_eq!(v.to_string(), "123456789012345678901234567890");
        assert_eq!("0x2a".parse::<U256>().unwrap(), U256::from_u64(42));
        assert_eq!("0xa".parse::<U256>().unwrap(), U256::from_u64(10));
        assert!("12a".parse::<U256>().is_err());
        assert!("".parse::<U256>().is_err());
    }

    #[test]
    fn test_u256_max_display() {
        let max = U256::MAX.to_string();
        assert_eq!(max.parse::<U256>().unwrap(), U256::MAX);
    }

    proptest! {
        #[test]
        fn prop_u128_arithmetic_matches(a in any::<u64>(), b in any::<u64>()) {
            let sum = U256::from_u64(a).checked_add(&U256::from_u64(b)).unwrap();
            prop_assert_eq!(sum, U256::from_u128(a as u128 + b as u128));
            prop_assert_eq!(sum.to_string(), (a as u128 + b as u128).to_string());
        }
    }
}
