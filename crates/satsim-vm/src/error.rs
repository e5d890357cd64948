use satsim_calldata::CalldataError;
use satsim_types::Address;
use thiserror::Error;

/// Errors surfaced by the host bridge and contract runtimes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Contract already registered at {0}")]
    AlreadyRegistered(Address),

    #[error("Reentrancy detected at {address}: call stack {call_stack:?}")]
    Reentrancy {
        address: Address,
        call_stack: Vec<Address>,
    },

    #[error("Readonly violation: view call mutated storage of {0}")]
    ReadonlyViolation(Address),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Execution aborted: {message} at {file}:{line}:{column}")]
    ExecutionAborted {
        message: String,
        file: String,
        line: u32,
        column: u32,
    },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Malformed calldata: {0}")]
    Calldata(#[from] CalldataError),

    #[error("Contract {0} is disposed")]
    Disposed(Address),

    #[error("Deployment failed: {0}")]
    Deployment(String),
}

impl VmError {
    /// Fatal errors are always raised to the caller, never folded into a
    /// call response.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::Reentrancy { .. } | VmError::ReadonlyViolation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VmError::ExecutionAborted {
            message: "boom".into(),
            file: "index.ts".into(),
            line: 4,
            column: 9,
        };
        assert_eq!(err.to_string(), "Execution aborted: boom at index.ts:4:9");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(VmError::ReadonlyViolation(Address::ZERO).is_fatal());
        assert!(VmError::Reentrancy {
            address: Address::ZERO,
            call_stack: vec![Address::ZERO, Address::ZERO],
        }
        .is_fatal());
        assert!(!VmError::Execution("trap".into()).is_fatal());
        assert!(!VmError::Protocol("double release".into()).is_fatal());
    }

    #[test]
    fn test_calldata_error_converts() {
        let err: VmError = CalldataError::InvalidBool(3).into();
        assert!(matches!(err, VmError::Calldata(CalldataError::InvalidBool(3))));
    }
}
