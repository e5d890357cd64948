//! The narrow interface between the host bridge and a module engine.
//!
//! Engines only know numeric instance ids. Host imports raised by a module
//! are routed back to their owner through the engine's [`BindingTable`].

use crate::binding::BindingTable;
use crate::error::VmError;
use satsim_types::Address;
use std::rc::Rc;
use thiserror::Error;

/// Opaque handle to one live module instance.
pub type InstanceId = u64;

/// Trap text raised by the `env.abort` import.
pub const ABORT_MESSAGE: &str = "execution aborted";

/// Export names a module must provide.
pub mod exports {
    pub const MEMORY: &str = "memory";
    pub const NEW: &str = "__new";
    pub const PIN: &str = "__pin";
    pub const UNPIN: &str = "__unpin";
    pub const DEFINE_SELECTORS: &str = "defineSelectors";
    pub const READ_METHOD: &str = "readMethod";
    pub const READ_VIEW: &str = "readView";
    pub const GET_EVENTS: &str = "getEvents";
    pub const GET_METHOD_ABI: &str = "getMethodABI";
    pub const SET_ENVIRONMENT: &str = "setEnvironment";
}

/// Host functions a module may import from `env`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFunction {
    Load,
    Store,
    Call,
    Deploy,
    Log,
}

impl HostFunction {
    pub const fn import_name(&self) -> &'static str {
        match self {
            HostFunction::Load => "load",
            HostFunction::Store => "store",
            HostFunction::Call => "call",
            HostFunction::Deploy => "deployFromAddress",
            HostFunction::Log => "log",
        }
    }
}

/// Parameters for creating a module instance.
#[derive(Debug, Clone, Copy)]
pub struct InstantiateRequest<'a> {
    pub address: Address,
    pub bytecode: &'a [u8],
    pub max_gas: u64,
}

/// Structured metadata recorded by `env.abort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortData {
    pub message_ptr: u32,
    pub file_ptr: u32,
    pub line: u32,
    pub column: u32,
}

/// Failures reported by an engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown instance: {0}")]
    UnknownInstance(InstanceId),

    #[error("Instance {0} is already executing")]
    InstanceBusy(InstanceId),

    #[error("Missing export: {0}")]
    MissingExport(String),

    #[error("Compilation error: {0}")]
    Compile(String),

    #[error("Instantiation error: {0}")]
    Instantiation(String),

    #[error("Memory access out of bounds: offset {offset}, length {len}")]
    MemoryOutOfBounds { offset: u32, len: usize },

    #[error("Trap: {0}")]
    Trap(String),

    #[error("Host error: {0}")]
    Host(Box<VmError>),
}

impl EngineError {
    /// Whether this failure is the unstructured abort trap.
    pub fn is_abort(&self) -> bool {
        matches!(self, EngineError::Trap(message) if message.contains(ABORT_MESSAGE))
    }
}

impl From<VmError> for EngineError {
    fn from(e: VmError) -> Self {
        EngineError::Host(Box::new(e))
    }
}

/// A module engine. Single-threaded: implementations use interior
/// mutability and must tolerate re-entry from host imports for *other*
/// instance ids while one call is in flight.
pub trait VmEngine {
    /// Binding table consulted when a module raises a host import.
    fn bindings(&self) -> Rc<BindingTable>;

    /// Reserve a fresh instance id. No instance exists until `instantiate`.
    fn reserve_id(&self) -> InstanceId;

    fn instantiate(&self, id: InstanceId, request: InstantiateRequest<'_>) -> Result<(), EngineError>;

    /// Invoke an export with i32 arguments, returning its first result if any.
    fn call(&self, id: InstanceId, export: &str, args: &[i32]) -> Result<Option<i32>, EngineError>;

    fn read_memory(&self, id: InstanceId, offset: u32, len: usize) -> Result<Vec<u8>, EngineError>;

    fn write_memory(&self, id: InstanceId, offset: u32, data: &[u8]) -> Result<(), EngineError>;

    /// Cumulative gas consumed by the instance since instantiation.
    fn used_gas(&self, id: InstanceId) -> Result<u64, EngineError>;

    /// Abort metadata from the most recent failed call, if the module aborted.
    fn abort_data(&self, id: InstanceId) -> Option<AbortData>;

    fn destroy(&self, id: InstanceId) -> Result<(), EngineError>;

    /// Release every instance and cached module.
    fn destroy_all(&self);
}
