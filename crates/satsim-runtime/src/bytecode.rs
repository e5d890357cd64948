//! Bytecode store keyed by contract address.

use bytes::Bytes;
use satsim_types::Address;
use satsim_vm::VmError;
use std::cell::RefCell;
use std::collections::HashMap;

/// Module bytecode for every known contract. The first write for an
/// address wins; bytecode never changes once set.
#[derive(Debug, Default)]
pub struct BytecodeStore {
    codes: RefCell<HashMap<Address, Bytes>>,
}

impl BytecodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_bytecode(&self, address: &Address) -> Result<Bytes, VmError> {
        self.codes
            .borrow()
            .get(address)
            .cloned()
            .ok_or_else(|| VmError::NotFound(format!("bytecode for {address}")))
    }

    /// Returns false, leaving the stored code untouched, if `address`
    /// already has bytecode.
    pub fn set_bytecode(&self, address: Address, bytecode: impl Into<Bytes>) -> bool {
        let mut codes = self.codes.borrow_mut();
        if codes.contains_key(&address) {
            return false;
        }
        codes.insert(address, bytecode.into());
        true
    }

    /// Forget the code stored for `address`.
    pub fn remove(&self, address: &Address) -> Option<Bytes> {
        self.codes.borrow_mut().remove(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.codes.borrow().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.codes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.codes.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_wins() {
        let store = BytecodeStore::new();
        let address = Address::from_seed(b"token");
        assert!(store.set_bytecode(address, vec![1, 2, 3]));
        assert!(!store.set_bytecode(address, vec![9]));
        assert_eq!(store.get_bytecode(&address).unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_bytecode() {
        let store = BytecodeStore::new();
        let err = store.get_bytecode(&Address::ZERO).unwrap_err();
        assert!(matches!(err, VmError::NotFound(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_allows_a_new_first_write() {
        let store = BytecodeStore::new();
        let address = Address::from_seed(b"child");
        store.set_bytecode(address, vec![1]);
        assert_eq!(store.remove(&address).unwrap().as_ref(), &[1]);
        assert!(!store.contains(&address));
        assert!(store.remove(&address).is_none());
        assert!(store.set_bytecode(address, vec![2]));
    }
}
