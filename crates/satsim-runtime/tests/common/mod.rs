#![allow(dead_code)]

use satsim_calldata::{BinaryReader, BinaryWriter, Event};
use satsim_runtime::{ContractParams, ContractRuntime, HarnessConfig, Registry};
use satsim_types::{Address, U256};
use satsim_vm::{EngineError, Invocation, MockEngine, MockModule, VmError};
use std::rc::Rc;

pub const SET: u32 = 1;
pub const INCREMENT: u32 = 2;
pub const TOUCH: u32 = 9;
pub const FAIL: u32 = 13;
pub const LOG: u32 = 14;
/// View selector that writes storage.
pub const MUTATING_VIEW: u32 = 0xbad;
/// View selector that returns the pushed environment.
pub const ENVIRONMENT: u32 = 0xe0;

pub const FORWARD: u32 = 1;
pub const FORWARD_TWICE: u32 = 2;
pub const DEPLOY: u32 = 3;
pub const STORE_AND_FORWARD: u32 = 4;
pub const FORWARD_BOTH: u32 = 5;

pub fn deployer() -> Address {
    Address::from_seed(b"deployer")
}

pub struct Harness {
    pub engine: Rc<MockEngine>,
    pub registry: Rc<Registry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(HarnessConfig::default())
    }

    pub fn with_config(config: HarnessConfig) -> Self {
        let engine = Rc::new(MockEngine::new());
        let registry = Registry::new(engine.clone(), config);
        Self { engine, registry }
    }

    pub fn params(&self, name: &str, module: MockModule) -> ContractParams {
        let bytecode = format!("module:{name}").into_bytes();
        self.engine.install(bytecode.clone(), module);
        ContractParams::new(Address::from_seed(name.as_bytes()), deployer()).with_bytecode(bytecode)
    }

    pub fn deploy(&self, name: &str, module: MockModule) -> Rc<ContractRuntime> {
        self.deploy_with(self.params(name, module))
    }

    pub fn deploy_with(&self, params: ContractParams) -> Rc<ContractRuntime> {
        self.registry.deploy_contract(params).unwrap()
    }
}

fn calldata_error(e: satsim_calldata::CalldataError) -> EngineError {
    VmError::from(e).into()
}

pub fn word(value: u64) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.write_u256(&U256::from_u64(value));
    writer.into_vec()
}

pub fn set_calldata(slot: u64, value: u64) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer
        .write_u256(&U256::from_u64(slot))
        .write_u256(&U256::from_u64(value));
    writer.into_vec()
}

pub fn read_word(bytes: &[u8]) -> U256 {
    BinaryReader::new(bytes).read_u256().unwrap()
}

/// Key/value contract.
///
/// Methods: `SET` (slot, value), `INCREMENT` (slot) returning the new value,
/// `TOUCH` emitting an event, `FAIL` aborting, `LOG` logging a line.
/// A view with selector `n` returns slot `n`.
pub fn storage_module() -> MockModule {
    MockModule::new(|ctx, invocation| match invocation {
        Invocation::Method { selector, calldata } => {
            let mut reader = BinaryReader::new(&calldata);
            match selector {
                SET => {
                    let slot = reader.read_u256().map_err(calldata_error)?;
                    let value = reader.read_u256().map_err(calldata_error)?;
                    ctx.store(&slot, &value)?;
                    Ok(Vec::new())
                }
                INCREMENT => {
                    let slot = reader.read_u256().map_err(calldata_error)?;
                    let next = ctx.load(&slot)?.checked_add(&U256::ONE).unwrap_or(U256::ZERO);
                    ctx.store(&slot, &next)?;
                    Ok(next.to_be_bytes().to_vec())
                }
                TOUCH => {
                    ctx.emit(Event::new("Touched", calldata.clone()))?;
                    Ok(Vec::new())
                }
                FAIL => Err(ctx.abort("forced failure", "storage.ts", 42, 7)),
                LOG => {
                    ctx.log("hello from the module")?;
                    Ok(Vec::new())
                }
                other => Err(ctx.abort(&format!("unknown selector {other}"), "storage.ts", 1, 1)),
            }
        }
        Invocation::View { selector } => match selector {
            MUTATING_VIEW => {
                ctx.store(&U256::ONE, &U256::from_u64(99))?;
                Ok(Vec::new())
            }
            ENVIRONMENT => Ok(ctx.environment()),
            slot => Ok(ctx.load(&U256::from(slot))?.to_be_bytes().to_vec()),
        },
    })
}

/// Forwarding contract.
///
/// `FORWARD` calldata is a target address followed by the data to send it
/// (selector then calldata). `FORWARD_TWICE` sends the same data twice.
/// `DEPLOY` calldata is a template address followed by a salt.
/// `STORE_AND_FORWARD` writes a slot, then forwards. `FORWARD_BOTH` makes
/// two calls in order, each a target and length-prefixed data.
pub fn proxy_module() -> MockModule {
    MockModule::new(|ctx, invocation| match invocation {
        Invocation::Method { selector, calldata } => {
            let mut reader = BinaryReader::new(&calldata);
            match selector {
                FORWARD | FORWARD_TWICE => {
                    let target = reader.read_address().map_err(calldata_error)?;
                    let data = reader.read_remaining();
                    let (_, mut response) = ctx.call(&target, &data)?;
                    if selector == FORWARD_TWICE {
                        response = ctx.call(&target, &data)?.1;
                    }
                    Ok(response)
                }
                STORE_AND_FORWARD => {
                    let slot = reader.read_u256().map_err(calldata_error)?;
                    let value = reader.read_u256().map_err(calldata_error)?;
                    ctx.store(&slot, &value)?;
                    let target = reader.read_address().map_err(calldata_error)?;
                    let data = reader.read_remaining();
                    Ok(ctx.call(&target, &data)?.1)
                }
                FORWARD_BOTH => {
                    let mut last = Vec::new();
                    for _ in 0..2 {
                        let target = reader.read_address().map_err(calldata_error)?;
                        let data = reader.read_bytes_with_length().map_err(calldata_error)?;
                        last = ctx.call(&target, &data)?.1;
                    }
                    Ok(last)
                }
                DEPLOY => {
                    let template = reader.read_address().map_err(calldata_error)?;
                    let salt = reader.read_hash().map_err(calldata_error)?;
                    let (virtual_address, address) = ctx.deploy(&template, &salt)?;
                    let mut writer = BinaryWriter::new();
                    writer.write_hash(&virtual_address).write_address(&address);
                    Ok(writer.into_vec())
                }
                other => Err(ctx.abort(&format!("unknown selector {other}"), "proxy.ts", 1, 1)),
            }
        }
        Invocation::View { .. } => Ok(Vec::new()),
    })
}

/// Data for a cross-contract call: selector followed by calldata.
pub fn call_data(selector: u32, calldata: &[u8]) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.write_selector(selector).write_bytes(calldata);
    writer.into_vec()
}

/// `FORWARD` calldata for a proxy.
pub fn forward(target: &Address, data: &[u8]) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.write_address(target).write_bytes(data);
    writer.into_vec()
}

/// `STORE_AND_FORWARD` calldata for a proxy.
pub fn store_and_forward(slot: u64, value: u64, target: &Address, data: &[u8]) -> Vec<u8> {
    let mut calldata = set_calldata(slot, value);
    calldata.extend(forward(target, data));
    calldata
}

/// `FORWARD_BOTH` calldata for a proxy.
pub fn forward_both(first: (&Address, &[u8]), second: (&Address, &[u8])) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    for (target, data) in [first, second] {
        writer.write_address(target);
        writer.write_bytes_with_length(data).unwrap();
    }
    writer.into_vec()
}
