//! Reentrancy policy and call-depth scoping.

use satsim_types::Address;
use satsim_vm::VmError;
use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Which repeated entries in a merged call stack are treated as reentrancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReentrancyPolicy {
    /// Only the calling contract appearing more than once
    #[default]
    SelfOnly,
    /// Any address appearing more than once
    AnyRepeat,
}

impl ReentrancyPolicy {
    /// Check `call_stack` as seen by `current` after merging a callee's stack.
    pub fn check(&self, current: &Address, call_stack: &[Address]) -> Result<(), VmError> {
        let repeated = match self {
            ReentrancyPolicy::SelfOnly => {
                (call_stack.iter().filter(|a| *a == current).count() > 1).then_some(*current)
            }
            ReentrancyPolicy::AnyRepeat => call_stack
                .iter()
                .enumerate()
                .find(|(i, a)| call_stack[..*i].contains(a))
                .map(|(_, a)| *a),
        };

        match repeated {
            Some(address) => Err(VmError::Reentrancy {
                address,
                call_stack: call_stack.to_vec(),
            }),
            None => Ok(()),
        }
    }
}

/// Marks a contract as executing for as long as it lives.
pub struct CallScope<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> CallScope<'a> {
    pub fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}
