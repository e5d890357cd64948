use satsim_calldata::Event;
use satsim_types::Address;
use satsim_vm::VmError;

/// Outcome of a top-level entrypoint invocation.
///
/// Non-fatal failures are carried in `error` with an empty `response`;
/// fatal ones are returned as `Err` by the runtime instead.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
    pub response: Vec<u8>,
    pub error: Option<VmError>,
    pub events: Vec<Event>,
    pub call_stack: Vec<Address>,
    pub used_gas: u64,
}

impl CallResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<u8>, VmError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.response),
        }
    }
}

/// What a callee hands back to the contract that called it.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossCallResponse {
    /// Callee gas (u64) followed by its response bytes
    pub data: Vec<u8>,
    pub events: Vec<Event>,
    pub call_stack: Vec<Address>,
    pub used_gas: u64,
}
