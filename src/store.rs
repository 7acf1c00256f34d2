use std::sync::Arc;

use crate::config::ValidatorConfig;
use crate::errors::RegistryResult;
use crate::interfaces::{HostEnv, Marshaler};
use crate::types::{TokenAmount, ValidatorData};

/// Well-known singleton storage keys.
pub const OWNER_KEY: &[u8] = b"owner";
pub const UNJAIL_FUNDS_KEY: &[u8] = b"unJailFunds";
pub const UNSTAKE_UNBOND_PAUSE_KEY: &[u8] = b"unStakeUnBondPause";
const CONFIG_KEY_PREFIX: &str = "config_";

fn config_key(epoch: u32) -> Vec<u8> {
    format!("{CONFIG_KEY_PREFIX}{epoch}").into_bytes()
}

/// Persistence layer for per-owner registration records and the contract
/// singletons, addressed through host storage.
pub struct RegistrationStore {
    host: Arc<dyn HostEnv>,
    marshaler: Arc<dyn Marshaler>,
}

impl RegistrationStore {
    pub fn new(host: Arc<dyn HostEnv>, marshaler: Arc<dyn Marshaler>) -> Self {
        Self { host, marshaler }
    }

    /// Loads the record stored under `owner`, or a zeroed record when the
    /// owner has never been touched.
    pub fn load_or_default(&self, owner: &[u8]) -> RegistryResult<ValidatorData> {
        let bytes = self.host.get_storage(owner);
        if bytes.is_empty() {
            return Ok(ValidatorData::default());
        }
        self.marshaler.unmarshal_registration(&bytes)
    }

    pub fn save(&self, owner: &[u8], data: &ValidatorData) -> RegistryResult<()> {
        let bytes = self.marshaler.marshal_registration(data)?;
        self.host.set_storage(owner, &bytes);
        Ok(())
    }

    pub fn delete(&self, owner: &[u8]) {
        self.host.set_storage(owner, &[]);
    }

    pub fn owner(&self) -> Vec<u8> {
        self.host.get_storage(OWNER_KEY)
    }

    pub fn set_owner(&self, owner: &[u8]) {
        self.host.set_storage(OWNER_KEY, owner);
    }

    pub fn is_unstake_unbond_paused(&self) -> bool {
        let stored = self.host.get_storage(UNSTAKE_UNBOND_PAUSE_KEY);
        stored.first() == Some(&1)
    }

    pub fn set_unstake_unbond_pause(&self, paused: bool) {
        let byte = if paused { 1u8 } else { 0u8 };
        self.host.set_storage(UNSTAKE_UNBOND_PAUSE_KEY, &[byte]);
    }

    /// Running sum of banked unjail fees.
    pub fn add_to_unjail_funds(&self, value: &TokenAmount) {
        let mut current = TokenAmount::from_be_bytes(&self.host.get_storage(UNJAIL_FUNDS_KEY));
        current.add_assign(value);
        self.host
            .set_storage(UNJAIL_FUNDS_KEY, &current.to_be_bytes());
    }

    pub fn unjail_funds(&self) -> TokenAmount {
        TokenAmount::from_be_bytes(&self.host.get_storage(UNJAIL_FUNDS_KEY))
    }

    pub fn save_config(&self, epoch: u32, config: &ValidatorConfig) -> RegistryResult<()> {
        let bytes = self.marshaler.marshal_config(config)?;
        self.host.set_storage(&config_key(epoch), &bytes);
        Ok(())
    }

    /// Returns the governance override stored for `epoch`, if any.
    pub fn load_config(&self, epoch: u32) -> RegistryResult<Option<ValidatorConfig>> {
        let bytes = self.host.get_storage(&config_key(epoch));
        if bytes.is_empty() {
            return Ok(None);
        }
        self.marshaler.unmarshal_config(&bytes).map(Some)
    }
}
