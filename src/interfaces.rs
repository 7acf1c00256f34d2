use std::sync::Arc;

use crate::config::ValidatorConfig;
use crate::errors::{RegistryError, RegistryResult};
use crate::types::{StakedData, TokenAmount, ValidatorData, VmOutput};

/// Host virtual-machine environment consumed by the contract.
///
/// Storage is scoped to this contract; keys are arbitrary byte strings.
/// Every operation is synchronous and returns before the handler continues.
pub trait HostEnv: Send + Sync {
    /// Returns the stored bytes for `key`, empty if absent.
    fn get_storage(&self, key: &[u8]) -> Vec<u8>;
    /// Stores `value` under `key`. An empty value deletes the entry.
    fn set_storage(&self, key: &[u8], value: &[u8]);
    /// Executes a nested call against `dest` on behalf of `sender`.
    fn execute_on_dest_context(
        &self,
        dest: &[u8],
        sender: &[u8],
        value: &TokenAmount,
        data: &[u8],
    ) -> RegistryResult<VmOutput>;
    /// Moves `value` from `from` to `to`.
    fn transfer(&self, to: &[u8], from: &[u8], value: &TokenAmount) -> RegistryResult<()>;
    fn current_nonce(&self) -> u64;
    fn current_epoch(&self) -> u32;
    /// Appends a datum to the finish stream returned to the caller.
    fn finish(&self, data: &[u8]);
    /// Appends diagnostic text to the return message.
    fn add_return_message(&self, message: &str);
    /// Charges gas; fails with [`RegistryError::OutOfGas`] on exhaustion.
    fn use_gas(&self, amount: u64) -> RegistryResult<()>;
}

/// Verifies that `signature` over `message` was produced by `public_key`.
/// The concrete scheme (BLS for node keys) lives outside this crate.
pub trait MessageVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> RegistryResult<()>;
}

/// On-wire codec for persisted records.
pub trait Marshaler: Send + Sync {
    fn marshal_registration(&self, data: &ValidatorData) -> RegistryResult<Vec<u8>>;
    fn unmarshal_registration(&self, bytes: &[u8]) -> RegistryResult<ValidatorData>;
    fn marshal_config(&self, config: &ValidatorConfig) -> RegistryResult<Vec<u8>>;
    fn unmarshal_config(&self, bytes: &[u8]) -> RegistryResult<ValidatorConfig>;
    fn marshal_staked_data(&self, data: &StakedData) -> RegistryResult<Vec<u8>>;
    fn unmarshal_staked_data(&self, bytes: &[u8]) -> RegistryResult<StakedData>;
}

/// Default marshaler backed by bincode.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeMarshaler;

impl Marshaler for BincodeMarshaler {
    fn marshal_registration(&self, data: &ValidatorData) -> RegistryResult<Vec<u8>> {
        bincode::serialize(data).map_err(|err| RegistryError::Serialization(err.to_string()))
    }

    fn unmarshal_registration(&self, bytes: &[u8]) -> RegistryResult<ValidatorData> {
        bincode::deserialize(bytes).map_err(|err| RegistryError::Serialization(err.to_string()))
    }

    fn marshal_config(&self, config: &ValidatorConfig) -> RegistryResult<Vec<u8>> {
        bincode::serialize(config).map_err(|err| RegistryError::Serialization(err.to_string()))
    }

    fn unmarshal_config(&self, bytes: &[u8]) -> RegistryResult<ValidatorConfig> {
        bincode::deserialize(bytes).map_err(|err| RegistryError::Serialization(err.to_string()))
    }

    fn marshal_staked_data(&self, data: &StakedData) -> RegistryResult<Vec<u8>> {
        bincode::serialize(data).map_err(|err| RegistryError::Serialization(err.to_string()))
    }

    fn unmarshal_staked_data(&self, bytes: &[u8]) -> RegistryResult<StakedData> {
        bincode::deserialize(bytes).map_err(|err| RegistryError::Serialization(err.to_string()))
    }
}

/// Receives host epoch notifications.
pub trait EpochSubscriber: Send + Sync {
    fn epoch_confirmed(&self, epoch: u32);
}

/// Host-side registry of epoch subscribers. The contract registers itself
/// at construction.
pub trait EpochNotifier: Send + Sync {
    fn register_handler(&self, subscriber: Arc<dyn EpochSubscriber>);
}
