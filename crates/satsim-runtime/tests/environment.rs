mod common;

use common::*;
use satsim_runtime::Environment;
use satsim_types::{Address, Network};

fn pushed(response: &[u8]) -> Environment {
    Environment::decode(response).unwrap()
}

#[test]
fn registry_context_is_pushed() {
    let h = Harness::new();
    let contract = h.deploy("token", storage_module());
    let sender = Address::from_seed(b"alice");
    h.registry.set_sender(sender);
    h.registry.set_origin(sender);
    h.registry.set_network(Network::Testnet);
    h.registry.mine_block();

    let env = pushed(&contract.read_view(ENVIRONMENT).unwrap().response);
    assert_eq!(env.sender, sender);
    assert_eq!(env.origin, sender);
    assert_eq!(env.owner, deployer());
    assert_eq!(env.address, contract.address());
    assert_eq!(env.block_number, h.registry.block_number());
    assert_eq!(env.timestamp, h.registry.timestamp());
    assert_eq!(env.network, Network::Testnet);
}

#[test]
fn explicit_sender_and_origin_override_defaults() {
    let h = Harness::new();
    let contract = h.deploy("token", storage_module());
    let bob = Address::from_seed(b"bob");
    let carol = Address::from_seed(b"carol");

    let env = pushed(
        &contract
            .read_view_from(ENVIRONMENT, bob, carol)
            .unwrap()
            .response,
    );
    assert_eq!(env.sender, bob);
    assert_eq!(env.origin, carol);
}

#[test]
fn callee_sees_caller_as_sender_and_keeps_origin() {
    let h = Harness::new();
    let proxy = h.deploy("proxy", proxy_module());
    let token = h.deploy("token", storage_module());
    let user = Address::from_seed(b"user");

    let response = proxy
        .read_method_from(
            FORWARD,
            &forward(&token.address(), &call_data(ENVIRONMENT, &[])),
            user,
            user,
        )
        .unwrap();
    let env = pushed(&response.response);
    assert_eq!(env.sender, proxy.address());
    assert_eq!(env.origin, user);
}
