//! Satsim Runtime - contract registry and per-contract execution state.
//!
//! This crate provides:
//! - `Registry`, the explicit context holding live contracts, the bytecode
//!   store and the current block/sender/origin
//! - `ContractRuntime`, one contract's storage, events, call stack, gas and
//!   the host callbacks its module invokes
//! - Reentrancy policy and call-depth scoping
//! - Harness configuration and telemetry setup

pub mod address;
pub mod bytecode;
pub mod config;
pub mod contract;
pub mod environment;
pub mod reentrancy;
pub mod registry;
pub mod response;
pub mod telemetry;

pub use address::derive_contract_address;
pub use bytecode::BytecodeStore;
pub use config::HarnessConfig;
pub use contract::{ContractParams, ContractRuntime, Deployment, RuntimeStatus, Storage};
pub use environment::Environment;
pub use reentrancy::{CallScope, ReentrancyPolicy};
pub use registry::{BlockContext, ContractResolver, Registry};
pub use response::{CallResponse, CrossCallResponse};

pub use satsim_vm::VmError;

/// Seconds added to the block timestamp by `Registry::mine_block`.
pub const BLOCK_INTERVAL_SECS: u64 = 600;
