mod common;

use common::*;
use satsim_runtime::{ContractParams, RuntimeStatus, VmError};
use satsim_types::{Address, U256};

#[test]
fn deploy_registers_and_loads() {
    let h = Harness::new();
    let contract = h.deploy("token", storage_module());
    assert_eq!(contract.status(), RuntimeStatus::Loaded);
    assert_eq!(contract.deployer(), deployer());
    assert!(h.registry.contains(&contract.address()));
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.engine.live_instances(), 1);
}

#[test]
fn duplicate_registration_is_rejected() {
    let h = Harness::new();
    let contract = h.deploy("token", storage_module());
    let err = h.registry.register(contract.clone()).unwrap_err();
    assert_eq!(err, VmError::AlreadyRegistered(contract.address()));

    let again = h.registry.deploy_contract(ContractParams::new(contract.address(), deployer()));
    assert!(matches!(again, Err(VmError::AlreadyRegistered(_))));
}

#[test]
fn unknown_contract_is_not_found() {
    let h = Harness::new();
    let err = h.registry.get_contract(&Address::from_seed(b"nobody")).unwrap_err();
    assert!(matches!(err, VmError::NotFound(_)));
    assert!(h.registry.delete_contract(&Address::ZERO).is_err());
}

#[test]
fn missing_bytecode_fails_to_load() {
    let h = Harness::new();
    let contract = h
        .registry
        .create_contract(ContractParams::new(Address::from_seed(b"empty"), deployer()));
    assert!(matches!(contract.init(), Err(VmError::NotFound(_))));
}

#[test]
fn bytecode_first_write_wins() {
    let h = Harness::new();
    let address = Address::from_seed(b"code");
    assert!(h.registry.set_bytecode(address, b"first".to_vec()));
    assert!(!h.registry.set_bytecode(address, b"second".to_vec()));
    assert_eq!(h.registry.get_bytecode(&address).unwrap().as_ref(), b"first");
}

#[test]
fn delete_disposes_and_forgets() {
    let h = Harness::new();
    let contract = h.deploy("token", storage_module());
    h.registry.delete_contract(&contract.address()).unwrap();
    assert!(contract.is_disposed());
    assert!(!h.registry.contains(&contract.address()));
    assert_eq!(h.engine.live_instances(), 0);
}

#[test]
fn disposed_contract_refuses_calls_until_init() {
    let h = Harness::new();
    let contract = h.deploy("token", storage_module());
    h.registry.dispose();
    assert_eq!(
        contract.read_view(0).unwrap_err(),
        VmError::Disposed(contract.address())
    );

    h.registry.init().unwrap();
    assert!(contract.read_view(0).unwrap().is_ok());
}

#[test]
fn backup_and_restore_all() {
    let h = Harness::new();
    let contract = h.deploy_with(h.params("token", storage_module()).with_preserve_state(true));
    contract.read_method(SET, &set_calldata(1, 5)).unwrap();
    h.registry.backup_all();
    contract.read_method(SET, &set_calldata(1, 9)).unwrap();
    assert_eq!(contract.get_storage(&U256::ONE), U256::from_u64(9));

    h.registry.restore_all();
    assert_eq!(contract.get_storage(&U256::ONE), U256::from_u64(5));
    // The backup survives a restore
    contract.read_method(SET, &set_calldata(1, 11)).unwrap();
    h.registry.restore_all();
    assert_eq!(contract.get_storage(&U256::ONE), U256::from_u64(5));
}

#[test]
fn cleanup_is_idempotent() {
    let h = Harness::new();
    h.deploy("a", storage_module());
    h.deploy("b", storage_module());
    assert_eq!(h.engine.live_instances(), 2);

    h.registry.cleanup();
    assert!(h.registry.is_cleaned_up());
    assert_eq!(h.engine.live_instances(), 0);
    h.registry.cleanup();
    assert_eq!(h.engine.live_instances(), 0);
}

#[test]
fn clear_contracts_empties_registry() {
    let h = Harness::new();
    let contract = h.deploy("a", storage_module());
    h.registry.clear_contracts();
    assert!(h.registry.is_empty());
    assert!(contract.is_disposed());
}

#[test]
fn mine_block_advances_height_and_time() {
    let h = Harness::new();
    let start = h.registry.block_context();
    assert_eq!(h.registry.mine_block(), start.block_number + 1);
    assert_eq!(
        h.registry.timestamp(),
        start.timestamp + satsim_runtime::BLOCK_INTERVAL_SECS
    );
}
