/// 4-byte method selector prefixed to method calldata.
pub type Selector = u32;

/// Derive the selector for a method signature: the first four bytes of
/// `blake3(signature)`, read big-endian.
pub fn selector(signature: &str) -> Selector {
    let digest = blake3::hash(signature.as_bytes());
    let bytes = digest.as_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_is_stable_and_distinct() {
        assert_eq!(selector("transfer(address,uint256)"), selector("transfer(address,uint256)"));
        assert_ne!(selector("transfer(address,uint256)"), selector("approve(address,uint256)"));
    }

    #[test]
    fn test_selector_prefix_of_digest() {
        let digest = blake3::hash(b"increment()");
        assert_eq!(selector("increment()").to_be_bytes(), digest.as_bytes()[..4]);
    }
}
