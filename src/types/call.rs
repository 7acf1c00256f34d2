use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Address, TokenAmount};

/// A single synchronous invocation delivered by the host. `gas_provided`
/// is informational; metering happens through the host gas meter.
#[derive(Clone, Debug)]
pub struct ContractCall {
    pub function: String,
    pub caller: Address,
    pub recipient: Address,
    pub call_value: TokenAmount,
    pub arguments: Vec<Vec<u8>>,
    pub gas_provided: u64,
}

impl ContractCall {
    pub fn is_degenerate(&self) -> bool {
        self.function.is_empty() || self.caller.is_empty()
    }
}

/// Caller-visible outcome of a contract invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    Ok,
    UserError,
    OutOfGas,
    OutOfFunds,
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReturnCode::Ok => "ok",
            ReturnCode::UserError => "user error",
            ReturnCode::OutOfGas => "out of gas",
            ReturnCode::OutOfFunds => "out of funds",
        };
        write!(f, "{text}")
    }
}

/// Result of a nested call into a sibling contract.
#[derive(Clone, Debug)]
pub struct VmOutput {
    pub return_code: ReturnCode,
    pub return_data: Vec<Vec<u8>>,
}

impl VmOutput {
    pub fn ok() -> Self {
        Self {
            return_code: ReturnCode::Ok,
            return_data: Vec::new(),
        }
    }

    pub fn with_data(data: Vec<Vec<u8>>) -> Self {
        Self {
            return_code: ReturnCode::Ok,
            return_data: data,
        }
    }
}

/// Single-byte per-key result codes appended to the finish stream by the
/// batch handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyResultCode {
    Accepted = 0,
    InvalidKey = 1,
    Failed = 2,
    Waiting = 3,
}

impl KeyResultCode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}
