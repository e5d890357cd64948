use satsim_types::{Address, Hash};

/// Address of a contract deployed by `deployer` from `bytecode` with `salt`.
///
/// Returns the virtual address (hash of the three inputs) and the concrete
/// address derived from it. Deterministic: the same inputs always give the
/// same pair.
pub fn derive_contract_address(deployer: &Address, bytecode: &[u8], salt: &Hash) -> (Hash, Address) {
    let virtual_address = Hash::compute_multi(&[deployer.as_bytes(), bytecode, salt.as_bytes()]);
    (virtual_address, Address::from_virtual(&virtual_address))
}
