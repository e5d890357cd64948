//! WASM Runtime for the SATSIM harness
//!
//! wasmtime-backed `VmEngine`. Fuel is gas. Host imports in the `env`
//! namespace are routed by instance id through the binding table.

use crate::binding::BindingTable;
use crate::engine::{
    exports, AbortData, EngineError, HostFunction, InstanceId, InstantiateRequest, VmEngine,
    ABORT_MESSAGE,
};
use crate::error::VmError;
use crate::layout::{self, TypedArrayHeader, ARRAY_BUFFER_ID, DEFAULT_UINT8_ARRAY_ID};
use anyhow::anyhow;
use satsim_types::Hash;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;
use wasmtime::{
    Caller, Config, Engine, Extern, Instance, Linker, Memory, Module, Store, StoreLimits,
    StoreLimitsBuilder, TypedFunc, Val, WasmParams, WasmResults,
};

/// WASM Runtime configuration
#[derive(Debug, Clone)]
pub struct WasmRuntimeConfig {
    pub max_memory_pages: u32,
    pub uint8_array_id: u32,
    pub debug_mode: bool,
}

impl Default for WasmRuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256,
            uint8_array_id: DEFAULT_UINT8_ARRAY_ID,
            debug_mode: false,
        }
    }
}

/// Host state for one WASM instance
pub struct HostState {
    pub id: InstanceId,
    pub bindings: Rc<BindingTable>,
    pub uint8_array_id: u32,
    pub abort: Option<AbortData>,
    limits: StoreLimits,
}

impl HostState {
    pub fn new(id: InstanceId, bindings: Rc<BindingTable>, config: &WasmRuntimeConfig) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_pages as usize * 65_536)
            .build();
        Self {
            id,
            bindings,
            uint8_array_id: config.uint8_array_id,
            abort: None,
            limits,
        }
    }
}

struct LiveInstance {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    max_gas: u64,
}

/// WASM Runtime
pub struct WasmRuntime {
    engine: Engine,
    linker: Linker<HostState>,
    bindings: Rc<BindingTable>,
    config: WasmRuntimeConfig,
    modules: RefCell<HashMap<Hash, Module>>,
    instances: RefCell<HashMap<InstanceId, Rc<RefCell<LiveInstance>>>>,
    next_id: Cell<InstanceId>,
}

impl WasmRuntime {
    pub fn new(config: WasmRuntimeConfig, bindings: Rc<BindingTable>) -> Result<Self, VmError> {
        let mut wasm_config = Config::new();
        wasm_config
            .consume_fuel(true)
            .wasm_bulk_memory(true)
            .wasm_multi_value(true)
            .cranelift_opt_level(wasmtime::OptLevel::Speed);

        let engine = Engine::new(&wasm_config)
            .map_err(|e| VmError::Execution(format!("Failed to create engine: {e}")))?;

        let mut linker = Linker::new(&engine);
        Self::register_host_functions(&mut linker)
            .map_err(|e| VmError::Execution(format!("Failed to register host functions: {e}")))?;

        Ok(Self {
            engine,
            linker,
            bindings,
            config,
            modules: RefCell::new(HashMap::new()),
            instances: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        })
    }

    fn register_host_functions(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
        for function in [
            HostFunction::Load,
            HostFunction::Store,
            HostFunction::Call,
            HostFunction::Deploy,
        ] {
            linker.func_wrap(
                "env",
                function.import_name(),
                move |caller: Caller<'_, HostState>, ptr: i32| host_roundtrip(caller, function, ptr),
            )?;
        }

        linker.func_wrap(
            "env",
            HostFunction::Log.import_name(),
            |mut caller: Caller<'_, HostState>, ptr: i32| -> anyhow::Result<()> {
                let memory = export_memory(&mut caller)?;
                let message = lift_from_caller(&caller, &memory, ptr as u32)?;
                let (id, bindings) = {
                    let state = caller.data();
                    (state.id, state.bindings.clone())
                };
                bindings
                    .dispatch(id, HostFunction::Log, &message)
                    .map_err(anyhow::Error::new)?;
                Ok(())
            },
        )?;

        linker.func_wrap(
            "env",
            "abort",
            |mut caller: Caller<'_, HostState>,
             message: i32,
             file: i32,
             line: i32,
             column: i32|
             -> anyhow::Result<()> {
                caller.data_mut().abort = Some(AbortData {
                    message_ptr: message as u32,
                    file_ptr: file as u32,
                    line: line as u32,
                    column: column as u32,
                });
                Err(anyhow!(ABORT_MESSAGE))
            },
        )?;

        Ok(())
    }

    fn module_for(&self, bytecode: &[u8]) -> Result<Module, EngineError> {
        let key = Hash::compute(bytecode);
        if let Some(module) = self.modules.borrow().get(&key) {
            return Ok(module.clone());
        }
        let module = Module::new(&self.engine, bytecode)
            .map_err(|e| EngineError::Compile(format!("{e:#}")))?;
        self.modules.borrow_mut().insert(key, module.clone());
        Ok(module)
    }

    fn live(&self, id: InstanceId) -> Result<Rc<RefCell<LiveInstance>>, EngineError> {
        self.instances
            .borrow()
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownInstance(id))
    }

    pub fn live_instances(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn cached_modules(&self) -> usize {
        self.modules.borrow().len()
    }
}

impl VmEngine for WasmRuntime {
    fn bindings(&self) -> Rc<BindingTable> {
        self.bindings.clone()
    }

    fn reserve_id(&self) -> InstanceId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn instantiate(&self, id: InstanceId, request: InstantiateRequest<'_>) -> Result<(), EngineError> {
        let module = self.module_for(request.bytecode)?;
        let mut store = Store::new(
            &self.engine,
            HostState::new(id, self.bindings.clone(), &self.config),
        );
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(request.max_gas)
            .map_err(|e| EngineError::Instantiation(format!("{e:#}")))?;

        let instance = self
            .linker
            .instantiate(&mut store, &module)
            .map_err(|e| EngineError::Instantiation(format!("{e:#}")))?;
        let memory = instance
            .get_memory(&mut store, exports::MEMORY)
            .ok_or_else(|| EngineError::MissingExport(exports::MEMORY.to_string()))?;

        if self.config.debug_mode {
            debug!(id, address = %request.address.short(), "wasm instance created");
        }

        self.instances.borrow_mut().insert(
            id,
            Rc::new(RefCell::new(LiveInstance {
                store,
                instance,
                memory,
                max_gas: request.max_gas,
            })),
        );
        Ok(())
    }

    fn call(&self, id: InstanceId, export: &str, args: &[i32]) -> Result<Option<i32>, EngineError> {
        let live = self.live(id)?;
        let mut guard = live
            .try_borrow_mut()
            .map_err(|_| EngineError::InstanceBusy(id))?;
        let LiveInstance { store, instance, .. } = &mut *guard;

        store.data_mut().abort = None;
        let func = instance
            .get_func(&mut *store, export)
            .ok_or_else(|| EngineError::MissingExport(export.to_string()))?;
        let params: Vec<Val> = args.iter().map(|arg| Val::I32(*arg)).collect();
        let mut results = vec![Val::I32(0); func.ty(&*store).results().len()];

        func.call(&mut *store, &params, &mut results)
            .map_err(classify_trap)?;
        Ok(results.first().and_then(Val::i32))
    }

    fn read_memory(&self, id: InstanceId, offset: u32, len: usize) -> Result<Vec<u8>, EngineError> {
        let live = self.live(id)?;
        let guard = live
            .try_borrow()
            .map_err(|_| EngineError::InstanceBusy(id))?;
        let start = offset as usize;
        guard
            .memory
            .data(&guard.store)
            .get(start..start.saturating_add(len))
            .map(<[u8]>::to_vec)
            .ok_or(EngineError::MemoryOutOfBounds { offset, len })
    }

    fn write_memory(&self, id: InstanceId, offset: u32, data: &[u8]) -> Result<(), EngineError> {
        let live = self.live(id)?;
        let mut guard = live
            .try_borrow_mut()
            .map_err(|_| EngineError::InstanceBusy(id))?;
        let LiveInstance { store, memory, .. } = &mut *guard;
        memory
            .write(&mut *store, offset as usize, data)
            .map_err(|_| EngineError::MemoryOutOfBounds {
                offset,
                len: data.len(),
            })
    }

    fn used_gas(&self, id: InstanceId) -> Result<u64, EngineError> {
        let live = self.live(id)?;
        let guard = live
            .try_borrow()
            .map_err(|_| EngineError::InstanceBusy(id))?;
        let remaining = guard
            .store
            .get_fuel()
            .map_err(|e| EngineError::Trap(format!("{e:#}")))?;
        Ok(guard.max_gas.saturating_sub(remaining))
    }

    fn abort_data(&self, id: InstanceId) -> Option<AbortData> {
        let live = self.live(id).ok()?;
        let guard = live.try_borrow().ok()?;
        guard.store.data().abort
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
        self.modules.borrow_mut().clear();
    }
}

/// Host errors keep their identity; everything else is a trap.
fn classify_trap(error: anyhow::Error) -> EngineError {
    match error.downcast::<VmError>() {
        Ok(host) => EngineError::Host(Box::new(host)),
        Err(other) => EngineError::Trap(format!("{other:#}")),
    }
}

fn export_memory(caller: &mut Caller<'_, HostState>) -> anyhow::Result<Memory> {
    caller
        .get_export(exports::MEMORY)
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow!("module does not export memory"))
}

fn typed_export<P: WasmParams, R: WasmResults>(
    caller: &mut Caller<'_, HostState>,
    name: &str,
) -> anyhow::Result<TypedFunc<P, R>> {
    caller
        .get_export(name)
        .and_then(Extern::into_func)
        .ok_or_else(|| anyhow!("module does not export {name}"))?
        .typed::<P, R>(&*caller)
}

fn lift_from_caller(
    caller: &Caller<'_, HostState>,
    memory: &Memory,
    ptr: u32,
) -> anyhow::Result<Vec<u8>> {
    if ptr == 0 {
        return Err(anyhow::Error::new(VmError::Protocol(
            "module passed a null typed array".to_string(),
        )));
    }
    let mut view = [0u8; 8];
    memory.read(caller, ptr as usize + 4, &mut view)?;
    let data_start = layout::read_u32_le(&view[0..4]);
    let byte_length = layout::read_u32_le(&view[4..8]);
    let mut data = vec![0u8; byte_length as usize];
    memory.read(caller, data_start as usize, &mut data)?;
    Ok(data)
}

fn lower_into_caller(
    caller: &mut Caller<'_, HostState>,
    memory: &Memory,
    bytes: &[u8],
) -> anyhow::Result<i32> {
    let class_id = caller.data().uint8_array_id as i32;
    let new = typed_export::<(i32, i32), i32>(caller, exports::NEW)?;
    let pin = typed_export::<i32, i32>(caller, exports::PIN)?;
    let unpin = typed_export::<i32, ()>(caller, exports::UNPIN)?;
    let byte_length = i32::try_from(bytes.len())?;

    let buffer = new.call(&mut *caller, (byte_length, ARRAY_BUFFER_ID as i32))?;
    pin.call(&mut *caller, buffer)?;
    let header = new.call(
        &mut *caller,
        (layout::TYPED_ARRAY_HEADER_SIZE as i32, class_id),
    )?;
    memory.write(&mut *caller, buffer as usize, bytes)?;
    memory.write(
        &mut *caller,
        header as usize,
        &TypedArrayHeader::over(buffer as u32, byte_length as u32).encode(),
    )?;
    unpin.call(&mut *caller, buffer)?;
    Ok(header)
}

fn host_roundtrip(
    mut caller: Caller<'_, HostState>,
    function: HostFunction,
    ptr: i32,
) -> anyhow::Result<i32> {
    let memory = export_memory(&mut caller)?;
    let request = lift_from_caller(&caller, &memory, ptr as u32)?;
    let (id, bindings) = {
        let state = caller.data();
        (state.id, state.bindings.clone())
    };
    let response = bindings
        .dispatch(id, function, &request)
        .map_err(anyhow::Error::new)?;
    lower_into_caller(&mut caller, &memory, &response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use satsim_types::Address;

    fn runtime() -> WasmRuntime {
        WasmRuntime::new(WasmRuntimeConfig::default(), Rc::new(BindingTable::new())).unwrap()
    }

    #[test]
    fn test_wasm_runtime_creation() {
        let runtime = runtime();
        assert_eq!(runtime.live_instances(), 0);
        assert_eq!(runtime.reserve_id(), 1);
        assert_eq!(runtime.reserve_id(), 2);
    }

    #[test]
    fn test_instantiate_invalid_bytecode() {
        let runtime = runtime();
        let id = runtime.reserve_id();
        let result = runtime.instantiate(
            id,
            InstantiateRequest {
                address: Address::ZERO,
                bytecode: &[1, 2, 3, 4],
                max_gas: 1_000,
            },
        );
        assert!(matches!(result, Err(EngineError::Compile(_))));
        assert_eq!(runtime.live_instances(), 0);
    }

    #[test]
    fn test_classify_host_error_keeps_identity() {
        let err = anyhow::Error::new(VmError::ReadonlyViolation(Address::ZERO))
            .context("wasm backtrace");
        assert_eq!(
            classify_trap(err),
            EngineError::Host(Box::new(VmError::ReadonlyViolation(Address::ZERO)))
        );
    }

    #[test]
    fn test_classify_abort_trap() {
        let err = anyhow!(ABORT_MESSAGE).context("error while executing at wasm backtrace");
        assert!(classify_trap(err).is_abort());
    }

    #[test]
    fn test_unknown_instance() {
        let runtime = runtime();
        assert_eq!(runtime.used_gas(9), Err(EngineError::UnknownInstance(9)));
        assert_eq!(runtime.abort_data(9), None);
        assert_eq!(runtime.destroy(9), Err(EngineError::UnknownInstance(9)));
    }
}
