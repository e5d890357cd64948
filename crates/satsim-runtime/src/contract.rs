//! Per-contract runtime.
//!
//! A `ContractRuntime` owns one contract's storage, event log, call stack,
//! gas counter and host bridge. It implements the host callbacks its module
//! raises, and it drives the module through the bridge on every entrypoint.

use crate::address::derive_contract_address;
use crate::bytecode::BytecodeStore;
use crate::config::HarnessConfig;
use crate::environment::Environment;
use crate::reentrancy::CallScope;
use crate::registry::ContractResolver;
use crate::response::{CallResponse, CrossCallResponse};
use bytes::Bytes;
use satsim_calldata::{decode_events, BinaryReader, BinaryWriter, Event, Selector};
use satsim_types::{Address, Hash, U256};
use satsim_vm::{GasCounter, GasObserver, HostBridge, HostCallbacks, VmEngine, VmError};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

/// Contract storage: slot to value.
pub type Storage = BTreeMap<U256, U256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    /// Created but never loaded
    Uninitialized,
    /// Loaded at least once and usable
    Loaded,
    /// Disposed; entrypoints fail until `init` is called again
    Disposed,
}

/// A contract deployed by this one from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub template: Address,
    pub virtual_address: Hash,
    pub address: Address,
}

/// Parameters for a new contract runtime.
#[derive(Debug, Clone)]
pub struct ContractParams {
    pub address: Address,
    pub deployer: Address,
    /// Stored under `address` unless bytecode is already known for it
    pub bytecode: Option<Bytes>,
    /// Falls back to the configured default
    pub gas_limit: Option<u64>,
    /// Keep storage across entrypoint invocations
    pub preserve_state: bool,
}

impl ContractParams {
    pub fn new(address: Address, deployer: Address) -> Self {
        Self {
            address,
            deployer,
            bytecode: None,
            gas_limit: None,
            preserve_state: false,
        }
    }

    pub fn with_bytecode(mut self, bytecode: impl Into<Bytes>) -> Self {
        self.bytecode = Some(bytecode.into());
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_preserve_state(mut self, preserve_state: bool) -> Self {
        self.preserve_state = preserve_state;
        self
    }
}

/// Shared pieces every runtime of a registry is wired to.
#[derive(Clone)]
pub(crate) struct RuntimeServices {
    pub engine: Rc<dyn VmEngine>,
    pub bytecodes: Rc<BytecodeStore>,
    pub resolver: Weak<dyn ContractResolver>,
    pub config: Rc<HarnessConfig>,
}

enum Entry<'a> {
    Method { selector: Selector, calldata: &'a [u8] },
    View { selector: Selector },
}

/// Callees that returned successfully during the current invocation, with
/// their storage from before the call. Restored newest first on failure.
type Journal = Vec<(Rc<ContractRuntime>, Storage)>;

#[derive(Default)]
struct ContractState {
    storage: Storage,
    backup: Option<Storage>,
    events: Vec<Event>,
    call_stack: Vec<Address>,
    environment: Environment,
    deployments: Vec<Deployment>,
    journal: Journal,
    preserve_state: bool,
}

pub struct ContractRuntime {
    address: Address,
    deployer: Address,
    gas_limit: u64,
    services: RuntimeServices,
    bridge: HostBridge,
    gas: Rc<GasCounter>,
    state: RefCell<ContractState>,
    status: Cell<RuntimeStatus>,
    depth: Cell<usize>,
}

impl std::fmt::Debug for ContractRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRuntime")
            .field("address", &self.address)
            .field("deployer", &self.deployer)
            .field("gas_limit", &self.gas_limit)
            .field("status", &self.status.get())
            .field("depth", &self.depth.get())
            .finish_non_exhaustive()
    }
}

impl ContractRuntime {
    pub(crate) fn new(params: ContractParams, services: RuntimeServices) -> Rc<Self> {
        let gas_limit = params
            .gas_limit
            .unwrap_or(services.config.gas.default_gas_limit);

        Rc::new_cyclic(|me: &Weak<ContractRuntime>| {
            let callbacks: Weak<dyn HostCallbacks> = me.clone();
            let gas = Rc::new(GasCounter::new());
            let sink = gas.clone();
            let observer: GasObserver = Rc::new(move |used: u64| sink.record(used));
            let bridge = HostBridge::new(
                services.engine.clone(),
                params.address,
                callbacks,
                services.config.bridge_config(),
            )
            .with_gas_observer(observer);

            Self {
                address: params.address,
                deployer: params.deployer,
                gas_limit,
                services,
                bridge,
                gas,
                state: RefCell::new(ContractState {
                    preserve_state: params.preserve_state,
                    ..ContractState::default()
                }),
                status: Cell::new(RuntimeStatus::Uninitialized),
                depth: Cell::new(0),
            }
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn deployer(&self) -> Address {
        self.deployer
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.status.get() == RuntimeStatus::Disposed
    }

    /// True while one of this contract's entrypoints is running.
    pub fn is_executing(&self) -> bool {
        self.depth.get() > 0
    }

    pub fn preserve_state(&self) -> bool {
        self.state.borrow().preserve_state
    }

    pub fn set_preserve_state(&self, preserve_state: bool) {
        self.state.borrow_mut().preserve_state = preserve_state;
    }

    pub fn storage(&self) -> Storage {
        self.state.borrow().storage.clone()
    }

    /// Value of `slot`, zero if never written.
    pub fn get_storage(&self, slot: &U256) -> U256 {
        self.state
            .borrow()
            .storage
            .get(slot)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    /// Seed a slot from the host side.
    pub fn set_storage(&self, slot: U256, value: U256) {
        self.state.borrow_mut().storage.insert(slot, value);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn call_stack(&self) -> Vec<Address> {
        self.state.borrow().call_stack.clone()
    }

    pub fn deployments(&self) -> Vec<Deployment> {
        self.state.borrow().deployments.clone()
    }

    /// Cumulative gas of the current (or last) instance.
    pub fn gas_used(&self) -> u64 {
        self.gas.value()
    }

    // ----- lifecycle -----

    /// Load the contract, re-arming it if it was disposed.
    pub fn init(&self) -> Result<(), VmError> {
        self.status.set(RuntimeStatus::Uninitialized);
        self.load_contract()
    }

    /// Start a fresh instance: storage is cleared unless preserved, the event
    /// log and call stack are reset, and the environment is pushed.
    pub fn load_contract(&self) -> Result<(), VmError> {
        let bytecode = self.services.bytecodes.get_bytecode(&self.address)?;
        {
            let mut state = self.state.borrow_mut();
            if !state.preserve_state {
                state.storage.clear();
            }
            state.events.clear();
            state.journal.clear();
            state.call_stack = vec![self.address];
        }

        self.bridge.dispose();
        self.gas.reset();
        self.bridge.instantiate(&bytecode, self.gas_limit)?;
        self.bridge.define_selectors()?;
        self.push_environment(None, None)?;
        self.status.set(RuntimeStatus::Loaded);
        Ok(())
    }

    /// Release the instance and freeze the gas counter.
    pub fn dispose(&self) {
        self.bridge.dispose();
        self.gas.freeze();
        self.status.set(RuntimeStatus::Disposed);
    }

    pub fn backup_states(&self) {
        let mut state = self.state.borrow_mut();
        state.backup = Some(state.storage.clone());
    }

    /// Restore the last backup. The backup is kept for later restores.
    pub fn restore_states(&self) {
        let mut state = self.state.borrow_mut();
        if let Some(backup) = state.backup.clone() {
            state.storage = backup;
        }
    }

    // ----- entrypoints -----

    pub fn read_method(&self, selector: Selector, calldata: &[u8]) -> Result<CallResponse, VmError> {
        self.invoke(Entry::Method { selector, calldata }, None, None)
    }

    /// `read_method` with an explicit sender and origin.
    pub fn read_method_from(
        &self,
        selector: Selector,
        calldata: &[u8],
        sender: Address,
        origin: Address,
    ) -> Result<CallResponse, VmError> {
        self.invoke(Entry::Method { selector, calldata }, Some(sender), Some(origin))
    }

    pub fn read_view(&self, selector: Selector) -> Result<CallResponse, VmError> {
        self.invoke(Entry::View { selector }, None, None)
    }

    pub fn read_view_from(
        &self,
        selector: Selector,
        sender: Address,
        origin: Address,
    ) -> Result<CallResponse, VmError> {
        self.invoke(Entry::View { selector }, Some(sender), Some(origin))
    }

    pub fn get_method_abi(&self) -> Result<Vec<u8>, VmError> {
        if self.is_disposed() {
            return Err(VmError::Disposed(self.address));
        }
        if !self.bridge.is_live() {
            self.load_contract()?;
        }
        self.bridge.get_method_abi()
    }

    /// Entry used when another contract calls this one.
    ///
    /// `data` is a selector followed by calldata; empty calldata is routed to
    /// the view entrypoint. Any failure is returned as an error. On success
    /// the response data is the gas used (u64) followed by the response bytes.
    pub fn on_call(
        &self,
        data: &[u8],
        sender: Address,
        origin: Address,
    ) -> Result<CrossCallResponse, VmError> {
        self.handle_call(data, sender, origin)
            .map(|(response, _)| response)
    }

    /// `on_call` that also hands back the callees this call touched, so the
    /// caller can unwind them if its own invocation fails later.
    fn handle_call(
        &self,
        data: &[u8],
        sender: Address,
        origin: Address,
    ) -> Result<(CrossCallResponse, Journal), VmError> {
        let mut reader = BinaryReader::new(data);
        let selector = reader.read_selector()?;
        let calldata = reader.read_remaining();
        let entry = if calldata.is_empty() {
            Entry::View { selector }
        } else {
            Entry::Method {
                selector,
                calldata: &calldata,
            }
        };

        let result = self.execute(entry, Some(sender), Some(origin));
        if !self.is_executing() {
            self.bridge.dispose();
        }

        let (response, journal) = result?;
        if let Some(error) = response.error {
            return Err(error);
        }

        let mut writer = BinaryWriter::with_capacity(8 + response.response.len());
        writer
            .write_u64(response.used_gas)
            .write_bytes(&response.response);
        let response = CrossCallResponse {
            data: writer.into_vec(),
            events: response.events,
            call_stack: response.call_stack,
            used_gas: response.used_gas,
        };
        Ok((response, journal))
    }

    fn invoke(
        &self,
        entry: Entry<'_>,
        sender: Option<Address>,
        origin: Option<Address>,
    ) -> Result<CallResponse, VmError> {
        self.execute(entry, sender, origin)
            .map(|(response, _)| response)
    }

    fn execute(
        &self,
        entry: Entry<'_>,
        sender: Option<Address>,
        origin: Option<Address>,
    ) -> Result<(CallResponse, Journal), VmError> {
        if self.is_executing() {
            let mut call_stack = self.call_stack();
            call_stack.push(self.address);
            return Err(VmError::Reentrancy {
                address: self.address,
                call_stack,
            });
        }
        if self.is_disposed() {
            return Err(VmError::Disposed(self.address));
        }

        self.load_contract()?;
        if sender.is_some() || origin.is_some() {
            self.push_environment(sender, origin)?;
        }

        let snapshot = self.storage();
        let gas_before = self.gas.current();
        let is_view = matches!(entry, Entry::View { .. });

        let outcome = {
            let _scope = CallScope::enter(&self.depth);
            match entry {
                Entry::Method { selector, calldata } => self.bridge.read_method(selector, calldata),
                Entry::View { selector } => self.bridge.read_view(selector),
            }
        };
        let used_gas = self.gas.delta_since(gas_before);
        if self.services.config.trace.gas {
            debug!(contract = %self.address.short(), used_gas, "entrypoint finished");
        }

        let outcome = outcome.and_then(|response| {
            if is_view && self.state.borrow().storage != snapshot {
                return Err(VmError::ReadonlyViolation(self.address));
            }
            let events = decode_events(&self.bridge.get_events()?)?;
            Ok((response, events))
        });

        match outcome {
            Ok((response, events)) => {
                let mut state = self.state.borrow_mut();
                state.events.extend(events);
                let response = CallResponse {
                    response,
                    error: None,
                    events: state.events.clone(),
                    call_stack: state.call_stack.clone(),
                    used_gas,
                };
                Ok((response, std::mem::take(&mut state.journal)))
            }
            Err(error) => {
                let journal = std::mem::take(&mut self.state.borrow_mut().journal);
                self.unwind(journal);
                let mut state = self.state.borrow_mut();
                state.storage = snapshot;
                state.events.clear();
                if error.is_fatal() {
                    return Err(error);
                }
                warn!(contract = %self.address.short(), error = %error, "entrypoint failed");
                let response = CallResponse {
                    response: Vec::new(),
                    error: Some(error),
                    events: Vec::new(),
                    call_stack: state.call_stack.clone(),
                    used_gas,
                };
                Ok((response, Journal::new()))
            }
        }
    }

    /// Put every journaled callee back to its pre-call storage.
    fn unwind(&self, journal: Journal) {
        for (callee, storage) in journal.into_iter().rev() {
            if self.services.config.trace.calls {
                debug!(from = %self.address.short(), to = %callee.address.short(), "rolling back callee");
            }
            callee.state.borrow_mut().storage = storage;
        }
    }

    fn resolver(&self) -> Result<Rc<dyn ContractResolver>, VmError> {
        self.services
            .resolver
            .upgrade()
            .ok_or_else(|| VmError::NotFound("registry".to_string()))
    }

    fn push_environment(&self, sender: Option<Address>, origin: Option<Address>) -> Result<(), VmError> {
        let context = self.resolver()?.context();
        let environment = Environment {
            sender: sender.unwrap_or(context.sender),
            origin: origin.unwrap_or(context.origin),
            block_number: context.block_number,
            owner: self.deployer,
            address: self.address,
            timestamp: context.timestamp,
            network: context.network,
        };
        self.bridge.set_environment(&environment.encode())?;
        self.state.borrow_mut().environment = environment;
        Ok(())
    }
}

impl HostCallbacks for ContractRuntime {
    fn load(&self, data: &[u8]) -> Result<Vec<u8>, VmError> {
        let slot = BinaryReader::new(data).read_u256()?;
        let value = self.get_storage(&slot);
        if self.services.config.trace.pointers {
            debug!(contract = %self.address.short(), %slot, %value, "load");
        }
        let mut writer = BinaryWriter::with_capacity(32);
        writer.write_u256(&value);
        Ok(writer.into_vec())
    }

    fn store(&self, data: &[u8]) -> Result<Vec<u8>, VmError> {
        let mut reader = BinaryReader::new(data);
        let slot = reader.read_u256()?;
        let value = reader.read_u256()?;
        if self.services.config.trace.pointers {
            debug!(contract = %self.address.short(), %slot, %value, "store");
        }
        self.set_storage(slot, value);
        let mut writer = BinaryWriter::with_capacity(1);
        writer.write_bool(true);
        Ok(writer.into_vec())
    }

    fn call(&self, data: &[u8]) -> Result<Vec<u8>, VmError> {
        let mut reader = BinaryReader::new(data);
        let target = reader.read_address()?;
        let calldata = reader.read_bytes_with_length()?;

        let callee = self.resolver()?.resolve(&target)?;
        let origin = self.state.borrow().environment.origin;
        if self.services.config.trace.calls {
            debug!(from = %self.address.short(), to = %target.short(), "cross-contract call");
        }

        let before = callee.storage();
        let (result, journal) = callee.handle_call(&calldata, self.address, origin)?;
        let call_stack = {
            let mut state = self.state.borrow_mut();
            state.journal.push((callee.clone(), before));
            state.journal.extend(journal);
            state.events.extend(result.events);
            state.call_stack.extend(result.call_stack);
            state.call_stack.clone()
        };
        self.services
            .config
            .reentrancy
            .check(&self.address, &call_stack)?;
        Ok(result.data)
    }

    fn deploy(&self, data: &[u8]) -> Result<Vec<u8>, VmError> {
        let mut reader = BinaryReader::new(data);
        let template = reader.read_address()?;
        let salt = reader.read_hash()?;

        if template == self.address {
            return Err(VmError::Deployment(format!(
                "{} cannot deploy a copy of itself",
                self.address
            )));
        }

        let resolver = self.resolver()?;
        let bytecode = self.services.bytecodes.get_bytecode(&template)?;
        let (virtual_address, address) = derive_contract_address(&self.address, &bytecode, &salt);
        if resolver.contains(&address) {
            return Err(VmError::AlreadyRegistered(address));
        }

        let stored = self.services.bytecodes.set_bytecode(address, bytecode);
        let params = ContractParams::new(address, self.address)
            .with_gas_limit(self.gas_limit)
            .with_preserve_state(true);
        let child = ContractRuntime::new(params, self.services.clone());
        if let Err(error) = child.init().and_then(|_| resolver.register(child.clone())) {
            child.dispose();
            if stored {
                self.services.bytecodes.remove(&address);
            }
            return Err(error);
        }

        self.state.borrow_mut().deployments.push(Deployment {
            template,
            virtual_address,
            address,
        });
        if self.services.config.trace.deployments {
            info!(
                deployer = %self.address.short(),
                template = %template.short(),
                contract = %address,
                "deployed contract"
            );
        }

        let mut writer = BinaryWriter::with_capacity(64);
        writer.write_hash(&virtual_address).write_address(&address);
        Ok(writer.into_vec())
    }

    fn log(&self, data: &[u8]) -> Result<(), VmError> {
        let message = BinaryReader::new(data).read_string_with_length()?;
        info!(contract = %self.address.short(), "{message}");
        Ok(())
    }
}
