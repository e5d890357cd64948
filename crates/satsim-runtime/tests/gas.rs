mod common;

use common::*;
use satsim_runtime::VmError;
use satsim_vm::GasSchedule;

#[test]
fn used_gas_covers_entrypoint_and_host_charges() {
    let h = Harness::new();
    let schedule = GasSchedule::default();
    let contract = h.deploy("token", storage_module());

    let response = contract.read_method(SET, &set_calldata(1, 5)).unwrap();
    assert_eq!(response.used_gas, schedule.entrypoint + schedule.storage_write);

    let response = contract.read_method(INCREMENT, &word(1)).unwrap();
    assert_eq!(
        response.used_gas,
        schedule.entrypoint + schedule.storage_read + schedule.storage_write
    );
}

#[test]
fn failed_calls_are_charged() {
    let h = Harness::new();
    let contract = h.deploy("token", storage_module());
    let response = contract.read_method(FAIL, &[]).unwrap();
    assert!(response.error.is_some());
    assert_eq!(response.used_gas, GasSchedule::default().entrypoint);
}

#[test]
fn running_out_of_gas_is_a_failure_at_the_limit() {
    let h = Harness::new();
    let schedule = GasSchedule::default();
    let limit = schedule.entrypoint + 1_000;
    let contract = h.deploy_with(h.params("token", storage_module()).with_gas_limit(limit));

    let response = contract.read_method(SET, &set_calldata(1, 5)).unwrap();
    assert!(matches!(response.error, Some(VmError::Execution(_))));
    assert_eq!(response.used_gas, limit);
}

#[test]
fn callee_gas_is_reported_to_the_caller() {
    let h = Harness::new();
    let schedule = GasSchedule::default();
    let proxy = h.deploy("proxy", proxy_module());
    let token = h.deploy("token", storage_module());

    let response = proxy
        .read_method(
            FORWARD,
            &forward(&token.address(), &call_data(SET, &set_calldata(1, 1))),
        )
        .unwrap();
    // The caller pays for its own entrypoint and call only
    assert_eq!(response.used_gas, schedule.entrypoint + schedule.call_base);
}

#[test]
fn disposal_freezes_gas() {
    let h = Harness::new();
    let contract = h.deploy("token", storage_module());
    contract.read_method(SET, &set_calldata(1, 5)).unwrap();
    let used = contract.gas_used();
    contract.dispose();
    assert_eq!(contract.gas_used(), used);
    assert!(contract.read_view(0).is_err());
}
