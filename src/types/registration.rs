use serde::{Deserialize, Serialize};

use super::{Address, TokenAmount};

/// One pending-unbond entry, stamped with the nonce at which the tokens
/// left the active stake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakedValue {
    pub unstaked_nonce: u64,
    pub unstaked_value: TokenAmount,
}

/// Per-owner financial record persisted under the owner's address key.
///
/// `locked_stake` tracks `node_price * num_registered` collateral backing
/// currently-registered node keys, `total_stake_value` the funds bonded but
/// not yet moved to pending unbond, and `unstaked_info` the pending-unbond
/// queue in nonce order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorData {
    pub reward_address: Address,
    pub registered_epoch: u32,
    pub total_stake_value: TokenAmount,
    pub locked_stake: TokenAmount,
    pub max_stake_per_node: TokenAmount,
    pub total_unstaked: TokenAmount,
    pub num_registered: u32,
    pub bls_pub_keys: Vec<Vec<u8>>,
    pub unstaked_info: Vec<UnstakedValue>,
}

impl ValidatorData {
    pub fn is_registered(&self) -> bool {
        !self.reward_address.is_empty()
    }

    pub fn holds_key(&self, bls_key: &[u8]) -> bool {
        self.bls_pub_keys.iter().any(|key| key == bls_key)
    }

    /// Drained records are deleted from storage rather than persisted.
    pub fn is_drained(&self) -> bool {
        self.total_stake_value.is_zero()
            && self.locked_stake.is_zero()
            && self.total_unstaked.is_zero()
    }
}

/// The slice of the Staking Registry's per-key record this contract
/// consumes, carried as the first return datum of a `get@bls` probe.
/// An empty datum means the key is not registered anywhere.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedData {
    pub staked: bool,
    pub waiting: bool,
    pub unstaked_nonce: u64,
}
