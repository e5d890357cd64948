//! Host Bridge: owns one module instance and mediates every boundary crossing.

use crate::binding::{BindingTable, HostCallbacks};
use crate::engine::{exports, EngineError, InstanceId, InstantiateRequest, VmEngine};
use crate::error::VmError;
use crate::layout::{self, TypedArrayHeader, ARRAY_BUFFER_ID, DEFAULT_UINT8_ARRAY_ID};
use crate::pointer::{PinHandle, PointerTable};
use satsim_calldata::Selector;
use satsim_types::Address;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Receives the instance's cumulative gas counter after every crossing.
pub type GasObserver = Rc<dyn Fn(u64)>;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Class id the module assigns to `Uint8Array`.
    pub uint8_array_id: u32,
    /// UTF-16 code units read per memory access when lifting strings.
    pub string_chunk_units: usize,
    /// Trace every retain/release at debug level.
    pub trace_pointers: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            uint8_array_id: DEFAULT_UINT8_ARRAY_ID,
            string_chunk_units: 1024,
            trace_pointers: false,
        }
    }
}

pub struct HostBridge {
    engine: Rc<dyn VmEngine>,
    bindings: Rc<BindingTable>,
    owner: Address,
    callbacks: Weak<dyn HostCallbacks>,
    config: BridgeConfig,
    id: Cell<Option<InstanceId>>,
    live: Cell<bool>,
    pointers: RefCell<PointerTable>,
    gas_observer: Option<GasObserver>,
}

impl HostBridge {
    pub fn new(
        engine: Rc<dyn VmEngine>,
        owner: Address,
        callbacks: Weak<dyn HostCallbacks>,
        config: BridgeConfig,
    ) -> Self {
        let bindings = engine.bindings();
        Self {
            engine,
            bindings,
            owner,
            callbacks,
            config,
            id: Cell::new(None),
            live: Cell::new(false),
            pointers: RefCell::new(PointerTable::new()),
            gas_observer: None,
        }
    }

    pub fn with_gas_observer(mut self, observer: GasObserver) -> Self {
        self.gas_observer = Some(observer);
        self
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Instance id, reserved on first use. The binding to this bridge's
    /// callbacks is registered at the same time.
    pub fn instance_id(&self) -> Result<InstanceId, VmError> {
        if let Some(id) = self.id.get() {
            return Ok(id);
        }
        let id = self.engine.reserve_id();
        self.bindings.bind(id, self.owner, self.callbacks.clone())?;
        self.id.set(Some(id));
        Ok(id)
    }

    /// Id of the live instance, if there is one.
    pub fn current_id(&self) -> Option<InstanceId> {
        self.id.get().filter(|_| self.live.get())
    }

    pub fn is_live(&self) -> bool {
        self.live.get()
    }

    pub fn instantiate(&self, bytecode: &[u8], max_gas: u64) -> Result<(), VmError> {
        let id = self.instance_id()?;
        self.engine
            .instantiate(
                id,
                InstantiateRequest {
                    address: self.owner,
                    bytecode,
                    max_gas,
                },
            )
            .map_err(|e| self.classify(id, e))?;
        self.live.set(true);
        debug!(contract = %self.owner.short(), id, "instantiated module");
        Ok(())
    }

    fn live_id(&self) -> Result<InstanceId, VmError> {
        self.current_id()
            .ok_or_else(|| VmError::Protocol(format!("no live instance for {}", self.owner)))
    }

    // ----- entrypoints -----

    pub fn define_selectors(&self) -> Result<(), VmError> {
        self.invoke(exports::DEFINE_SELECTORS, &[]).map(|_| ())
    }

    pub fn read_method(&self, selector: Selector, calldata: &[u8]) -> Result<Vec<u8>, VmError> {
        let ptr = self.lower_bytes(calldata)?;
        let _guard = self.pin_scope(ptr)?;
        let result = self.invoke(exports::READ_METHOD, &[selector as i32, ptr as i32])?;
        self.lift_result(exports::READ_METHOD, result)
    }

    pub fn read_view(&self, selector: Selector) -> Result<Vec<u8>, VmError> {
        let result = self.invoke(exports::READ_VIEW, &[selector as i32])?;
        self.lift_result(exports::READ_VIEW, result)
    }

    /// Encoded event list accumulated by the module.
    pub fn get_events(&self) -> Result<Vec<u8>, VmError> {
        let result = self.invoke(exports::GET_EVENTS, &[])?;
        self.lift_result(exports::GET_EVENTS, result)
    }

    pub fn get_method_abi(&self) -> Result<Vec<u8>, VmError> {
        let result = self.invoke(exports::GET_METHOD_ABI, &[])?;
        self.lift_result(exports::GET_METHOD_ABI, result)
    }

    pub fn set_environment(&self, environment: &[u8]) -> Result<(), VmError> {
        let ptr = self.lower_bytes(environment)?;
        let _guard = self.pin_scope(ptr)?;
        self.invoke(exports::SET_ENVIRONMENT, &[ptr as i32]).map(|_| ())
    }

    fn lift_result(&self, export: &str, result: Option<i32>) -> Result<Vec<u8>, VmError> {
        let ptr = result
            .ok_or_else(|| VmError::Protocol(format!("{export} returned no pointer")))?;
        self.lift_typed_array(ptr as u32)
    }

    /// Call an export, report gas, and classify failures.
    fn invoke(&self, export: &str, args: &[i32]) -> Result<Option<i32>, VmError> {
        let id = self.live_id()?;
        let result = self.engine.call(id, export, args);
        self.report_gas(id);
        result.map_err(|e| self.classify(id, e))
    }

    fn report_gas(&self, id: InstanceId) {
        if let Some(observer) = &self.gas_observer {
            match self.engine.used_gas(id) {
                Ok(gas) => observer(gas),
                Err(e) => debug!(id, error = %e, "gas counter unavailable"),
            }
        }
    }

    fn classify(&self, id: InstanceId, error: EngineError) -> VmError {
        match error {
            EngineError::Host(inner) => *inner,
            e if e.is_abort() => match self.abort_error(id) {
                Ok(aborted) => aborted,
                Err(lift_error) => {
                    warn!(id, error = %lift_error, "abort metadata could not be read");
                    VmError::Execution(e.to_string())
                }
            },
            other => VmError::Execution(other.to_string()),
        }
    }

    fn abort_error(&self, id: InstanceId) -> Result<VmError, VmError> {
        let data = self
            .engine
            .abort_data(id)
            .ok_or_else(|| VmError::Protocol("abort raised without metadata".to_string()))?;
        Ok(VmError::ExecutionAborted {
            message: self.lift_string(data.message_ptr)?,
            file: self.lift_string(data.file_ptr)?,
            line: data.line,
            column: data.column,
        })
    }

    // ----- reference counting -----

    /// Retain `ptr`, pinning it in the module on the first reference.
    pub fn retain(&self, ptr: u32) -> Result<(), VmError> {
        self.retain_handle(ptr).map(|_| ())
    }

    fn retain_handle(&self, ptr: u32) -> Result<PinHandle, VmError> {
        let id = self.live_id()?;
        let (handle, first) = self.pointers.borrow_mut().retain(ptr);
        if first {
            if let Err(e) = self.engine.call(id, exports::PIN, &[ptr as i32]) {
                self.pointers.borrow_mut().release_handle(handle)?;
                return Err(self.classify(id, e));
            }
        }
        if self.config.trace_pointers {
            debug!(ptr, count = self.pointers.borrow().count(ptr), "retain");
        }
        Ok(handle)
    }

    /// Release `ptr`, unpinning it when the last reference goes away.
    pub fn release(&self, ptr: u32) -> Result<(), VmError> {
        let unpin = self.pointers.borrow_mut().release(ptr)?;
        self.finish_release(ptr, unpin)
    }

    /// Release through a handle. A handle that outlived its instance is
    /// rejected instead of dropping a newer reference to the same address.
    fn release_pin(&self, handle: PinHandle) -> Result<(), VmError> {
        let (ptr, unpin) = self.pointers.borrow_mut().release_handle(handle)?;
        self.finish_release(ptr, unpin)
    }

    fn finish_release(&self, ptr: u32, unpin: bool) -> Result<(), VmError> {
        if self.config.trace_pointers {
            debug!(ptr, count = self.pointers.borrow().count(ptr), "release");
        }
        if unpin {
            if let Some(id) = self.current_id() {
                self.engine
                    .call(id, exports::UNPIN, &[ptr as i32])
                    .map_err(|e| self.classify(id, e))?;
            }
        }
        Ok(())
    }

    /// Retain `ptr` for the lifetime of the returned guard.
    pub fn pin_scope(&self, ptr: u32) -> Result<PinGuard<'_>, VmError> {
        let handle = self.retain_handle(ptr)?;
        Ok(PinGuard {
            bridge: self,
            ptr,
            handle,
        })
    }

    pub fn retain_count(&self, ptr: u32) -> u32 {
        self.pointers.borrow().count(ptr)
    }

    pub fn tracked_pointers(&self) -> usize {
        self.pointers.borrow().len()
    }

    // ----- lift / lower -----

    fn alloc(&self, size: u32, class_id: u32) -> Result<u32, VmError> {
        let id = self.live_id()?;
        let ptr = self
            .engine
            .call(id, exports::NEW, &[size as i32, class_id as i32])
            .map_err(|e| self.classify(id, e))?
            .ok_or_else(|| VmError::Protocol("allocator returned no pointer".to_string()))?;
        Ok(ptr as u32)
    }

    fn read(&self, offset: u32, len: usize) -> Result<Vec<u8>, VmError> {
        let id = self.live_id()?;
        self.engine
            .read_memory(id, offset, len)
            .map_err(|e| self.classify(id, e))
    }

    fn write(&self, offset: u32, data: &[u8]) -> Result<(), VmError> {
        let id = self.live_id()?;
        self.engine
            .write_memory(id, offset, data)
            .map_err(|e| self.classify(id, e))
    }

    /// Copy `bytes` into a new typed array in module memory and return the
    /// view pointer. The backing buffer is pinned while the view is allocated.
    pub fn lower_typed_array(&self, class_id: u32, align: u32, bytes: &[u8]) -> Result<u32, VmError> {
        let byte_length = u32::try_from(bytes.len())
            .ok()
            .and_then(|len| len.checked_shl(align))
            .ok_or_else(|| VmError::Protocol(format!("{} bytes do not fit module memory", bytes.len())))?;

        let buffer = self.alloc(byte_length, ARRAY_BUFFER_ID)?;
        let _buffer_guard = self.pin_scope(buffer)?;
        let header = self.alloc(layout::TYPED_ARRAY_HEADER_SIZE, class_id)?;

        self.write(header, &TypedArrayHeader::over(buffer, byte_length).encode())?;
        self.write(buffer, bytes)?;
        Ok(header)
    }

    pub fn lower_bytes(&self, bytes: &[u8]) -> Result<u32, VmError> {
        self.lower_typed_array(self.config.uint8_array_id, 0, bytes)
    }

    /// Copy a typed array out of module memory.
    pub fn lift_typed_array(&self, ptr: u32) -> Result<Vec<u8>, VmError> {
        if ptr == 0 {
            return Err(VmError::Protocol("lift of null typed array".to_string()));
        }
        let view_at = ptr
            .checked_add(4)
            .ok_or_else(|| VmError::Protocol(format!("typed array pointer {ptr:#x} out of range")))?;
        let view = self.read(view_at, 8)?;
        let data_start = layout::read_u32_le(&view[0..4]);
        let byte_length = layout::read_u32_le(&view[4..8]);
        self.read(data_start, byte_length as usize)
    }

    /// Decode a managed string. The byte length sits in the object header.
    pub fn lift_string(&self, ptr: u32) -> Result<String, VmError> {
        if ptr == 0 {
            return Err(VmError::Protocol("lift of null string".to_string()));
        }
        let size_at = ptr
            .checked_sub(layout::RT_SIZE_OFFSET)
            .ok_or_else(|| VmError::Protocol(format!("string pointer {ptr:#x} has no header")))?;
        let byte_length = layout::read_u32_le(&self.read(size_at, 4)?) as usize;

        let chunk_bytes = self.config.string_chunk_units.max(1) * 2;
        let mut raw = Vec::with_capacity(byte_length);
        let mut offset = 0usize;
        while offset < byte_length {
            let len = chunk_bytes.min(byte_length - offset);
            let at = u32::try_from(offset)
                .ok()
                .and_then(|offset| ptr.checked_add(offset))
                .ok_or_else(|| VmError::Protocol(format!("string at {ptr:#x} runs past module memory")))?;
            raw.extend(self.read(at, len)?);
            offset += len;
        }
        Ok(layout::decode_utf16(&raw))
    }

    // ----- teardown -----

    /// Release the instance. Best-effort and idempotent; failures are logged.
    pub fn dispose(&self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if self.live.replace(false) {
            self.report_gas(id);
            if let Err(e) = self.engine.destroy(id) {
                debug!(id, error = %e, "instance already released");
            }
        }
        self.bindings.unbind(id);
        let leaked = self.pointers.borrow_mut().clear();
        if !leaked.is_empty() {
            debug!(id, count = leaked.len(), "dropped pins with instance");
        }
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Keeps a module object pinned until dropped, on every exit path.
pub struct PinGuard<'a> {
    bridge: &'a HostBridge,
    ptr: u32,
    handle: PinHandle,
}

impl PinGuard<'_> {
    pub fn ptr(&self) -> u32 {
        self.ptr
    }
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.bridge.release_pin(self.handle) {
            warn!(ptr = self.ptr, error = %e, "failed to release pinned object");
        }
    }
}
