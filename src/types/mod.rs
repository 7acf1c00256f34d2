mod call;
mod registration;
mod token;

pub use call::{ContractCall, KeyResultCode, ReturnCode, VmOutput};
pub use registration::{StakedData, UnstakedValue, ValidatorData};
pub use token::TokenAmount;

/// Raw account address bytes. Wallet addresses share one fixed length per
/// deployment (the validator contract's own address length).
pub type Address = Vec<u8>;

/// Number of leading zero bytes reserved for contract accounts.
const CONTRACT_ADDRESS_PREFIX_LEN: usize = 8;

/// Contract accounts live in an address range with a reserved zero prefix.
pub fn is_contract_address(address: &[u8]) -> bool {
    address.len() > CONTRACT_ADDRESS_PREFIX_LEN
        && address[..CONTRACT_ADDRESS_PREFIX_LEN]
            .iter()
            .all(|byte| *byte == 0)
}

/// Big-endian decode keeping the low 64 bits, matching unsigned truncation
/// of oversized caller-supplied counters.
pub fn u64_from_be_bytes(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}
