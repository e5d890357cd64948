//! Satsim VM - the boundary between host and contract module.
//!
//! This crate provides:
//! - The `VmEngine` interface consumed by the host (instantiate, call, memory access)
//! - `WasmRuntime`, a wasmtime-backed engine with fuel metering
//! - `HostBridge`, which owns one module instance and marshals every crossing
//! - The pointer retain table and typed-array/string lift and lower
//! - The id-keyed binding table routing host imports back to their owner
//! - `MockEngine` (feature `testing`), a scripted engine for tests

pub mod binding;
pub mod bridge;
pub mod engine;
pub mod error;
pub mod gas_metering;
pub mod layout;
pub mod pointer;
pub mod wasm_runtime;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use binding::{BindingTable, HostCallbacks};
pub use bridge::{BridgeConfig, GasObserver, HostBridge, PinGuard};
pub use engine::{AbortData, EngineError, HostFunction, InstanceId, InstantiateRequest, VmEngine};
pub use error::VmError;
pub use gas_metering::{GasCounter, GasSchedule};
pub use pointer::{PinHandle, PointerTable};
pub use wasm_runtime::{HostState, WasmRuntime, WasmRuntimeConfig};

#[cfg(any(test, feature = "testing"))]
pub use mock::{Invocation, MockEngine, MockModule, ModuleContext};

/// Maximum linear memory per instance (16 MB)
pub const MAX_MEMORY_BYTES: usize = 16 * 1024 * 1024;

/// Default gas (fuel) limit for a freshly instantiated module
pub const DEFAULT_MAX_GAS: u64 = 100_000_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_constants() {
        assert_eq!(MAX_MEMORY_BYTES, 16 * 1024 * 1024);
        assert!(DEFAULT_MAX_GAS > GasSchedule::default().entrypoint);
    }
}
