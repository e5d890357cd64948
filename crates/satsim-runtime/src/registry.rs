//! Contract registry.
//!
//! The registry is the explicit context shared by every runtime it creates:
//! it owns the engine handle, the bytecode store, the live contracts and the
//! current block, sender and origin. Runtimes reach it through a weak handle.

use crate::bytecode::BytecodeStore;
use crate::config::HarnessConfig;
use crate::contract::{ContractParams, ContractRuntime, RuntimeServices};
use crate::BLOCK_INTERVAL_SECS;
use bytes::Bytes;
use satsim_types::{Address, Network};
use satsim_vm::{BindingTable, VmEngine, VmError, WasmRuntime};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::{debug, info};

/// Block and caller defaults pushed into every environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub block_number: u64,
    pub timestamp: u64,
    pub sender: Address,
    pub origin: Address,
    pub network: Network,
}

impl BlockContext {
    fn genesis(network: Network) -> Self {
        Self {
            block_number: 1,
            timestamp: 0,
            sender: Address::ZERO,
            origin: Address::ZERO,
            network,
        }
    }
}

/// What a contract runtime needs from its registry.
pub trait ContractResolver {
    fn resolve(&self, address: &Address) -> Result<Rc<ContractRuntime>, VmError>;
    fn contains(&self, address: &Address) -> bool;
    fn register(&self, contract: Rc<ContractRuntime>) -> Result<(), VmError>;
    fn context(&self) -> BlockContext;
}

pub struct Registry {
    me: Weak<Registry>,
    engine: Rc<dyn VmEngine>,
    bytecodes: Rc<BytecodeStore>,
    config: Rc<HarnessConfig>,
    contracts: RefCell<BTreeMap<Address, Rc<ContractRuntime>>>,
    context: RefCell<BlockContext>,
    cleaned_up: Cell<bool>,
}

impl Registry {
    pub fn new(engine: Rc<dyn VmEngine>, config: HarnessConfig) -> Rc<Self> {
        let context = BlockContext::genesis(config.network);
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            engine,
            bytecodes: Rc::new(BytecodeStore::new()),
            config: Rc::new(config),
            contracts: RefCell::new(BTreeMap::new()),
            context: RefCell::new(context),
            cleaned_up: Cell::new(false),
        })
    }

    /// Registry backed by the wasmtime engine.
    pub fn with_wasmtime(config: HarnessConfig) -> Result<Rc<Self>, VmError> {
        let bindings = Rc::new(BindingTable::new());
        let engine = WasmRuntime::new(config.wasm_runtime_config(), bindings)?;
        Ok(Self::new(Rc::new(engine), config))
    }

    pub fn engine(&self) -> Rc<dyn VmEngine> {
        self.engine.clone()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn services(&self) -> RuntimeServices {
        let resolver: Weak<dyn ContractResolver> = self.me.clone();
        RuntimeServices {
            engine: self.engine.clone(),
            bytecodes: self.bytecodes.clone(),
            resolver,
            config: self.config.clone(),
        }
    }

    // ----- bytecode -----

    pub fn get_bytecode(&self, address: &Address) -> Result<Bytes, VmError> {
        self.bytecodes.get_bytecode(address)
    }

    /// First write wins. Returns false if `address` already had bytecode.
    pub fn set_bytecode(&self, address: Address, bytecode: impl Into<Bytes>) -> bool {
        self.bytecodes.set_bytecode(address, bytecode)
    }

    // ----- contracts -----

    /// Build a runtime wired to this registry. It is not registered.
    pub fn create_contract(&self, params: ContractParams) -> Rc<ContractRuntime> {
        if let Some(bytecode) = params.bytecode.clone() {
            if !self.bytecodes.set_bytecode(params.address, bytecode) {
                debug!(contract = %params.address, "bytecode already known, keeping stored code");
            }
        }
        ContractRuntime::new(params, self.services())
    }

    /// Create, load and register a contract in one step.
    pub fn deploy_contract(&self, params: ContractParams) -> Result<Rc<ContractRuntime>, VmError> {
        if self.contains(&params.address) {
            return Err(VmError::AlreadyRegistered(params.address));
        }
        let contract = self.create_contract(params);
        contract.init()?;
        self.register(contract.clone())?;
        Ok(contract)
    }

    /// Fails if a contract is already registered at the same address.
    pub fn register(&self, contract: Rc<ContractRuntime>) -> Result<(), VmError> {
        let address = contract.address();
        let mut contracts = self.contracts.borrow_mut();
        if contracts.contains_key(&address) {
            return Err(VmError::AlreadyRegistered(address));
        }
        contracts.insert(address, contract);
        Ok(())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.contracts.borrow().contains_key(address)
    }

    pub fn get_contract(&self, address: &Address) -> Result<Rc<ContractRuntime>, VmError> {
        self.contracts
            .borrow()
            .get(address)
            .cloned()
            .ok_or_else(|| VmError::NotFound(format!("contract {address}")))
    }

    /// Remove and dispose a contract.
    pub fn delete_contract(&self, address: &Address) -> Result<(), VmError> {
        let contract = self
            .contracts
            .borrow_mut()
            .remove(address)
            .ok_or_else(|| VmError::NotFound(format!("contract {address}")))?;
        contract.dispose();
        Ok(())
    }

    pub fn contract_addresses(&self) -> Vec<Address> {
        self.contracts.borrow().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.contracts.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.borrow().is_empty()
    }

    /// Dispose and forget every contract.
    pub fn clear_contracts(&self) {
        let contracts = std::mem::take(&mut *self.contracts.borrow_mut());
        for contract in contracts.values() {
            contract.dispose();
        }
    }

    fn snapshot(&self) -> Vec<Rc<ContractRuntime>> {
        self.contracts.borrow().values().cloned().collect()
    }

    pub fn backup_all(&self) {
        for contract in self.snapshot() {
            contract.backup_states();
        }
    }

    pub fn restore_all(&self) {
        for contract in self.snapshot() {
            contract.restore_states();
        }
    }

    // ----- lifecycle -----

    /// (Re)load every registered contract.
    pub fn init(&self) -> Result<(), VmError> {
        self.cleaned_up.set(false);
        for contract in self.snapshot() {
            contract.init()?;
        }
        Ok(())
    }

    /// Dispose every registered contract. They stay registered.
    pub fn dispose(&self) {
        for contract in self.snapshot() {
            contract.dispose();
        }
    }

    /// Release the engine's global resources. Idempotent.
    pub fn cleanup(&self) {
        if self.cleaned_up.replace(true) {
            return;
        }
        self.dispose();
        self.engine.destroy_all();
        self.engine.bindings().clear();
        info!(contracts = self.len(), "registry cleaned up");
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.get()
    }

    // ----- block context -----

    pub fn block_context(&self) -> BlockContext {
        self.context.borrow().clone()
    }

    pub fn block_number(&self) -> u64 {
        self.context.borrow().block_number
    }

    pub fn set_block_number(&self, block_number: u64) {
        self.context.borrow_mut().block_number = block_number;
    }

    pub fn timestamp(&self) -> u64 {
        self.context.borrow().timestamp
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.context.borrow_mut().timestamp = timestamp;
    }

    pub fn sender(&self) -> Address {
        self.context.borrow().sender
    }

    pub fn set_sender(&self, sender: Address) {
        self.context.borrow_mut().sender = sender;
    }

    pub fn origin(&self) -> Address {
        self.context.borrow().origin
    }

    pub fn set_origin(&self, origin: Address) {
        self.context.borrow_mut().origin = origin;
    }

    pub fn network(&self) -> Network {
        self.context.borrow().network
    }

    pub fn set_network(&self, network: Network) {
        self.context.borrow_mut().network = network;
    }

    /// Advance one block.
    pub fn mine_block(&self) -> u64 {
        let mut context = self.context.borrow_mut();
        context.block_number += 1;
        context.timestamp += BLOCK_INTERVAL_SECS;
        context.block_number
    }
}

impl ContractResolver for Registry {
    fn resolve(&self, address: &Address) -> Result<Rc<ContractRuntime>, VmError> {
        self.get_contract(address)
    }

    fn contains(&self, address: &Address) -> bool {
        Registry::contains(self, address)
    }

    fn register(&self, contract: Rc<ContractRuntime>) -> Result<(), VmError> {
        Registry::register(self, contract)
    }

    fn context(&self) -> BlockContext {
        self.block_context()
    }
}
