//! Scripted in-process engine.
//!
//! "Modules" are Rust closures registered against a bytecode blob. Each
//! instance still has a real linear memory with a bump allocator laid out
//! like the managed heap, so every lift and lower runs against bytes.

use crate::binding::BindingTable;
use crate::engine::{
    exports, AbortData, EngineError, HostFunction, InstanceId, InstantiateRequest, VmEngine,
    ABORT_MESSAGE,
};
use crate::error::VmError;
use crate::gas_metering::GasSchedule;
use crate::layout::{
    self, TypedArrayHeader, ARRAY_BUFFER_ID, DEFAULT_UINT8_ARRAY_ID, RT_ID_OFFSET, RT_SIZE_OFFSET,
    STRING_ID,
};
use satsim_calldata::{encode_events, BinaryReader, BinaryWriter, Event, Selector};
use satsim_types::{Address, Hash, U256};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Heap objects start past this offset so that 0 stays the null pointer.
const HEAP_BASE: u32 = 64;
/// Space reserved in front of every object for the runtime header.
const OBJECT_HEADER_SIZE: u32 = 20;

/// What the host asked the module to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Method { selector: Selector, calldata: Vec<u8> },
    View { selector: Selector },
}

type Handler = dyn Fn(&mut ModuleContext, Invocation) -> Result<Vec<u8>, EngineError>;

/// A scripted contract module.
#[derive(Clone)]
pub struct MockModule {
    handler: Rc<Handler>,
    abi: Vec<u8>,
}

impl MockModule {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&mut ModuleContext, Invocation) -> Result<Vec<u8>, EngineError> + 'static,
    {
        Self {
            handler: Rc::new(handler),
            abi: Vec::new(),
        }
    }

    pub fn with_abi(mut self, abi: impl Into<Vec<u8>>) -> Self {
        self.abi = abi.into();
        self
    }
}

struct MockInstance {
    module: MockModule,
    memory: Vec<u8>,
    heap_top: u32,
    pins: HashMap<u32, u32>,
    gas_used: u64,
    max_gas: u64,
    environment: Vec<u8>,
    events: Vec<Event>,
    abort: Option<AbortData>,
    busy: bool,
}

impl MockInstance {
    fn new(module: MockModule, max_gas: u64) -> Self {
        Self {
            module,
            memory: vec![0; HEAP_BASE as usize],
            heap_top: HEAP_BASE,
            pins: HashMap::new(),
            gas_used: 0,
            max_gas,
            environment: Vec::new(),
            events: Vec::new(),
            abort: None,
            busy: false,
        }
    }

    fn charge(&mut self, amount: u64) -> Result<(), EngineError> {
        let next = self.gas_used.saturating_add(amount);
        if next > self.max_gas {
            self.gas_used = self.max_gas;
            return Err(EngineError::Trap("all fuel consumed by WebAssembly".to_string()));
        }
        self.gas_used = next;
        Ok(())
    }

    fn alloc(&mut self, size: u32, class_id: u32) -> Result<u32, EngineError> {
        let ptr = (self.heap_top + OBJECT_HEADER_SIZE + 15) & !15;
        let end = ptr
            .checked_add(size)
            .filter(|end| (*end as usize) <= crate::MAX_MEMORY_BYTES)
            .ok_or_else(|| EngineError::Trap("out of memory".to_string()))?;
        self.memory.resize(end as usize, 0);
        self.write(ptr - RT_ID_OFFSET, &class_id.to_le_bytes())?;
        self.write(ptr - RT_SIZE_OFFSET, &size.to_le_bytes())?;
        self.heap_top = end;
        Ok(ptr)
    }

    fn read(&self, offset: u32, len: usize) -> Result<Vec<u8>, EngineError> {
        let start = offset as usize;
        self.memory
            .get(start..start.saturating_add(len))
            .map(<[u8]>::to_vec)
            .ok_or(EngineError::MemoryOutOfBounds { offset, len })
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), EngineError> {
        let start = offset as usize;
        let len = data.len();
        self.memory
            .get_mut(start..start.saturating_add(len))
            .ok_or(EngineError::MemoryOutOfBounds { offset, len })?
            .copy_from_slice(data);
        Ok(())
    }

    fn lower(&mut self, class_id: u32, bytes: &[u8]) -> Result<u32, EngineError> {
        let buffer = self.alloc(bytes.len() as u32, ARRAY_BUFFER_ID)?;
        self.write(buffer, bytes)?;
        let header = self.alloc(layout::TYPED_ARRAY_HEADER_SIZE, class_id)?;
        self.write(header, &TypedArrayHeader::over(buffer, bytes.len() as u32).encode())?;
        Ok(header)
    }

    fn lift(&self, ptr: u32) -> Result<Vec<u8>, EngineError> {
        if ptr == 0 {
            return Err(EngineError::Trap("null typed array".to_string()));
        }
        let header = TypedArrayHeader::decode(&self.read(ptr, 12)?).map_err(EngineError::from)?;
        self.read(header.data_start, header.byte_length as usize)
    }

    fn lower_string(&mut self, text: &str) -> Result<u32, EngineError> {
        let units = layout::encode_utf16(text);
        let ptr = self.alloc(units.len() as u32, STRING_ID)?;
        self.write(ptr, &units)?;
        Ok(ptr)
    }
}

/// Handle given to a module closure while it runs.
///
/// Host imports go through the binding table exactly as they would from a
/// compiled module; request and response buffers travel through the
/// instance's memory. No engine state is borrowed while a host import runs.
pub struct ModuleContext {
    id: InstanceId,
    instance: Rc<RefCell<MockInstance>>,
    bindings: Rc<BindingTable>,
    schedule: GasSchedule,
    uint8_array_id: u32,
}

impl ModuleContext {
    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    /// Address of the contract this instance belongs to.
    pub fn address(&self) -> Option<Address> {
        self.bindings.owner(self.id)
    }

    /// Environment blob most recently pushed by the host.
    pub fn environment(&self) -> Vec<u8> {
        self.instance.borrow().environment.clone()
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), EngineError> {
        self.instance.borrow_mut().charge(amount)
    }

    pub fn emit(&mut self, event: Event) -> Result<(), EngineError> {
        let mut instance = self.instance.borrow_mut();
        instance.charge(self.schedule.event)?;
        instance.events.push(event);
        Ok(())
    }

    fn host(&mut self, function: HostFunction, request: &[u8]) -> Result<Vec<u8>, EngineError> {
        let request_ptr = self.instance.borrow_mut().lower(self.uint8_array_id, request)?;
        let request = self.instance.borrow().lift(request_ptr)?;
        let response = self.bindings.dispatch(self.id, function, &request)?;
        let mut instance = self.instance.borrow_mut();
        let response_ptr = instance.lower(self.uint8_array_id, &response)?;
        instance.lift(response_ptr)
    }

    pub fn load(&mut self, slot: &U256) -> Result<U256, EngineError> {
        self.charge(self.schedule.storage_read)?;
        let mut request = BinaryWriter::new();
        request.write_u256(slot);
        let response = self.host(HostFunction::Load, &request.into_vec())?;
        Ok(BinaryReader::new(&response)
            .read_u256()
            .map_err(VmError::from)?)
    }

    pub fn store(&mut self, slot: &U256, value: &U256) -> Result<(), EngineError> {
        self.charge(self.schedule.storage_write)?;
        let mut request = BinaryWriter::new();
        request.write_u256(slot).write_u256(value);
        let response = self.host(HostFunction::Store, &request.into_vec())?;
        let acknowledged = BinaryReader::new(&response)
            .read_bool()
            .map_err(VmError::from)?;
        if !acknowledged {
            return Err(EngineError::Trap("store was not acknowledged".to_string()));
        }
        Ok(())
    }

    /// Call another contract. Returns the callee's gas and response bytes.
    pub fn call(&mut self, target: &Address, calldata: &[u8]) -> Result<(u64, Vec<u8>), EngineError> {
        self.charge(self.schedule.call_base)?;
        let mut request = BinaryWriter::new();
        request.write_address(target);
        request.write_bytes_with_length(calldata).map_err(VmError::from)?;
        let response = self.host(HostFunction::Call, &request.into_vec())?;
        let mut reader = BinaryReader::new(&response);
        let gas_used = reader.read_u64().map_err(VmError::from)?;
        Ok((gas_used, reader.read_remaining()))
    }

    /// Deploy a copy of `template`. Returns the virtual and concrete address.
    pub fn deploy(&mut self, template: &Address, salt: &Hash) -> Result<(Hash, Address), EngineError> {
        self.charge(self.schedule.deploy)?;
        let mut request = BinaryWriter::new();
        request.write_address(template).write_hash(salt);
        let response = self.host(HostFunction::Deploy, &request.into_vec())?;
        let mut reader = BinaryReader::new(&response);
        let virtual_address = reader.read_hash().map_err(VmError::from)?;
        let address = reader.read_address().map_err(VmError::from)?;
        Ok((virtual_address, address))
    }

    pub fn log(&mut self, message: &str) -> Result<(), EngineError> {
        self.charge(self.schedule.log_cost(message.len()))?;
        let mut request = BinaryWriter::new();
        request
            .write_string_with_length(message)
            .map_err(VmError::from)?;
        self.host(HostFunction::Log, &request.into_vec())?;
        Ok(())
    }

    /// Raise `env.abort`: the strings are written into memory and the
    /// returned trap carries only the unstructured abort text.
    pub fn abort(&mut self, message: &str, file: &str, line: u32, column: u32) -> EngineError {
        let mut instance = self.instance.borrow_mut();
        let message_ptr = match instance.lower_string(message) {
            Ok(ptr) => ptr,
            Err(e) => return e,
        };
        let file_ptr = match instance.lower_string(file) {
            Ok(ptr) => ptr,
            Err(e) => return e,
        };
        instance.abort = Some(AbortData {
            message_ptr,
            file_ptr,
            line,
            column,
        });
        EngineError::Trap(ABORT_MESSAGE.to_string())
    }
}

/// Engine whose modules are closures. See the module docs.
pub struct MockEngine {
    bindings: Rc<BindingTable>,
    schedule: GasSchedule,
    uint8_array_id: u32,
    modules: RefCell<HashMap<Vec<u8>, MockModule>>,
    instances: RefCell<HashMap<InstanceId, Rc<RefCell<MockInstance>>>>,
    next_id: Cell<InstanceId>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_bindings(Rc::new(BindingTable::new()))
    }

    pub fn with_bindings(bindings: Rc<BindingTable>) -> Self {
        Self {
            bindings,
            schedule: GasSchedule::default(),
            uint8_array_id: DEFAULT_UINT8_ARRAY_ID,
            modules: RefCell::new(HashMap::new()),
            instances: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn with_schedule(mut self, schedule: GasSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_uint8_array_id(mut self, id: u32) -> Self {
        self.uint8_array_id = id;
        self
    }

    pub fn schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    /// Make `module` instantiable from `bytecode`.
    pub fn install(&self, bytecode: impl Into<Vec<u8>>, module: MockModule) {
        self.modules.borrow_mut().insert(bytecode.into(), module);
    }

    pub fn live_instances(&self) -> usize {
        self.instances.borrow().len()
    }

    /// Number of objects currently pinned in an instance.
    pub fn pinned(&self, id: InstanceId) -> usize {
        self.instances
            .borrow()
            .get(&id)
            .map(|i| i.borrow().pins.len())
            .unwrap_or(0)
    }

    pub fn environment(&self, id: InstanceId) -> Option<Vec<u8>> {
        self.instances
            .borrow()
            .get(&id)
            .map(|i| i.borrow().environment.clone())
    }

    fn instance(&self, id: InstanceId) -> Result<Rc<RefCell<MockInstance>>, EngineError> {
        self.instances
            .borrow()
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownInstance(id))
    }

    fn run_module(
        &self,
        id: InstanceId,
        instance: &Rc<RefCell<MockInstance>>,
        invocation: Invocation,
    ) -> Result<Option<i32>, EngineError> {
        let handler = {
            let mut state = instance.borrow_mut();
            if state.busy {
                return Err(EngineError::InstanceBusy(id));
            }
            state.charge(self.schedule.entrypoint)?;
            state.busy = true;
            state.module.handler.clone()
        };
        let mut ctx = ModuleContext {
            id,
            instance: instance.clone(),
            bindings: self.bindings.clone(),
            schedule: self.schedule,
            uint8_array_id: self.uint8_array_id,
        };
        let outcome = handler(&mut ctx, invocation);
        let mut state = instance.borrow_mut();
        state.busy = false;
        let output = outcome?;
        Ok(Some(state.lower(self.uint8_array_id, &output)? as i32))
    }
}

impl VmEngine for MockEngine {
    fn bindings(&self) -> Rc<BindingTable> {
        self.bindings.clone()
    }

    fn reserve_id(&self) -> InstanceId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn instantiate(&self, id: InstanceId, request: InstantiateRequest<'_>) -> Result<(), EngineError> {
        let module = self
            .modules
            .borrow()
            .get(request.bytecode)
            .cloned()
            .ok_or_else(|| EngineError::Compile(format!("no module installed for {}", request.address)))?;
        let mut instances = self.instances.borrow_mut();
        if instances.contains_key(&id) {
            return Err(EngineError::Instantiation(format!("instance {id} already exists")));
        }
        instances.insert(id, Rc::new(RefCell::new(MockInstance::new(module, request.max_gas))));
        Ok(())
    }

    fn call(&self, id: InstanceId, export: &str, args: &[i32]) -> Result<Option<i32>, EngineError> {
        let instance = self.instance(id)?;
        let arg = |index: usize| -> Result<i32, EngineError> {
            args.get(index)
                .copied()
                .ok_or_else(|| EngineError::Trap(format!("{export}: missing argument {index}")))
        };

        match export {
            exports::NEW => {
                let ptr = instance.borrow_mut().alloc(arg(0)? as u32, arg(1)? as u32)?;
                Ok(Some(ptr as i32))
            }
            exports::PIN => {
                let ptr = arg(0)? as u32;
                *instance.borrow_mut().pins.entry(ptr).or_insert(0) += 1;
                Ok(Some(ptr as i32))
            }
            exports::UNPIN => {
                let ptr = arg(0)? as u32;
                let mut state = instance.borrow_mut();
                match state.pins.get_mut(&ptr) {
                    Some(count) if *count > 1 => *count -= 1,
                    Some(_) => {
                        state.pins.remove(&ptr);
                    }
                    None => return Err(EngineError::Trap(format!("object {ptr:#x} is not pinned"))),
                }
                Ok(None)
            }
            exports::DEFINE_SELECTORS => Ok(None),
            exports::SET_ENVIRONMENT => {
                let mut state = instance.borrow_mut();
                state.environment = state.lift(arg(0)? as u32)?;
                Ok(None)
            }
            exports::READ_METHOD => {
                let selector = arg(0)? as u32;
                let calldata = instance.borrow().lift(arg(1)? as u32)?;
                state_abort_reset(&instance);
                self.run_module(id, &instance, Invocation::Method { selector, calldata })
            }
            exports::READ_VIEW => {
                let selector = arg(0)? as u32;
                state_abort_reset(&instance);
                self.run_module(id, &instance, Invocation::View { selector })
            }
            exports::GET_EVENTS => {
                let mut state = instance.borrow_mut();
                let events = std::mem::take(&mut state.events);
                let encoded = encode_events(&events).map_err(VmError::from)?;
                Ok(Some(state.lower(self.uint8_array_id, &encoded)? as i32))
            }
            exports::GET_METHOD_ABI => {
                let mut state = instance.borrow_mut();
                let abi = state.module.abi.clone();
                Ok(Some(state.lower(self.uint8_array_id, &abi)? as i32))
            }
            other => Err(EngineError::MissingExport(other.to_string())),
        }
    }

    fn read_memory(&self, id: InstanceId, offset: u32, len: usize) -> Result<Vec<u8>, EngineError> {
        self.instance(id)?.borrow().read(offset, len)
    }

    fn write_memory(&self, id: InstanceId, offset: u32, data: &[u8]) -> Result<(), EngineError> {
        self.instance(id)?.borrow_mut().write(offset, data)
    }

    fn used_gas(&self, id: InstanceId) -> Result<u64, EngineError> {
        Ok(self.instance(id)?.borrow().gas_used)
    }

    fn abort_data(&self, id: InstanceId) -> Option<AbortData> {
        self.instances
            .borrow()
            .get(&id)
            .and_then(|i| i.borrow().abort)
    }

    fn destroy(&self, id: InstanceId) -> Result<(), EngineError> {
        self.instances
            .borrow_mut()
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::UnknownInstance(id))
    }

    fn destroy_all(&self) {
        self.instances.borrow_mut().clear();
    }
}

fn state_abort_reset(instance: &Rc<RefCell<MockInstance>>) {
    instance.borrow_mut().abort = None;
}
