use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{RegistryError, RegistryResult};
use crate::types::TokenAmount;

/// Scalars governing the validator economy. All five are strictly positive
/// once the contract is constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub total_supply: TokenAmount,
    pub min_stake_value: TokenAmount,
    pub node_price: TokenAmount,
    pub min_step: TokenAmount,
    pub un_jail_price: TokenAmount,
}

impl ValidatorConfig {
    /// Strict positivity check used at construction, on `setConfig` and on
    /// every stored-config load.
    pub fn verify(&self) -> RegistryResult<()> {
        if self.min_stake_value.is_zero() {
            return Err(RegistryError::InvalidConfig(format!(
                "invalid min stake value, value is {}",
                self.min_stake_value
            )));
        }
        if self.total_supply.is_zero() {
            return Err(RegistryError::InvalidConfig(format!(
                "invalid genesis total supply, value is {}",
                self.total_supply
            )));
        }
        if self.min_step.is_zero() {
            return Err(RegistryError::InvalidConfig(format!(
                "invalid min step value, value is {}",
                self.min_step
            )));
        }
        if self.node_price.is_zero() {
            return Err(RegistryError::InvalidConfig(format!(
                "invalid node price, value is {}",
                self.node_price
            )));
        }
        if self.un_jail_price.is_zero() {
            return Err(RegistryError::InvalidConfig(format!(
                "invalid unjail cost, value is {}",
                self.un_jail_price
            )));
        }
        Ok(())
    }
}

/// Gas charged per operation, adjustable between calls through
/// `set_new_gas_costs`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GasCosts {
    pub stake: u64,
    pub un_stake: u64,
    pub un_bond: u64,
    pub claim: u64,
    pub get: u64,
    pub change_reward_address: u64,
    pub un_jail: u64,
    pub un_stake_tokens: u64,
    pub un_bond_tokens: u64,
}

impl Default for GasCosts {
    fn default() -> Self {
        Self {
            stake: 5_000_000,
            un_stake: 5_000_000,
            un_bond: 5_000_000,
            claim: 5_000_000,
            get: 5_000_000,
            change_reward_address: 5_000_000,
            un_jail: 5_000_000,
            un_stake_tokens: 5_000_000,
            un_bond_tokens: 5_000_000,
        }
    }
}

/// Deployment-time settings. Monetary fields are base-10 strings so that
/// genesis files can carry values beyond machine-word range.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractSettings {
    pub genesis_total_supply: String,
    pub un_jail_value: String,
    pub min_stake_value: String,
    pub genesis_node_price: String,
    pub min_step_value: String,
    pub min_unstake_tokens_value: String,
    pub unbond_period: u64,
    pub stake_enable_epoch: u32,
    pub staking_v2_epoch: u32,
    pub double_key_protection_enable_epoch: u32,
    #[serde(default)]
    pub gas_costs: GasCosts,
    pub staking_registry_address: String,
    pub validator_contract_address: String,
    pub end_of_epoch_address: String,
}

impl ContractSettings {
    pub fn load(path: &Path) -> RegistryResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|err| RegistryError::Config(format!("unable to read settings: {err}")))?;
        toml::from_str(&content)
            .map_err(|err| RegistryError::Config(format!("unable to parse settings: {err}")))
    }

    pub fn save(&self, path: &Path) -> RegistryResult<()> {
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| RegistryError::Config(format!("unable to encode settings: {err}")))?;
        fs::write(path, encoded)
            .map_err(|err| RegistryError::Config(format!("unable to write settings: {err}")))?;
        Ok(())
    }

    pub fn parse_amount(field: &str, value: &str) -> RegistryResult<TokenAmount> {
        let amount: TokenAmount = value
            .parse()
            .map_err(|_| RegistryError::InvalidConfig(format!("invalid {field}, value is {value}")))?;
        if amount.is_zero() {
            return Err(RegistryError::InvalidConfig(format!(
                "invalid {field}, value is {value}"
            )));
        }
        Ok(amount)
    }

    pub fn parse_address(field: &str, value: &str) -> RegistryResult<Vec<u8>> {
        let bytes = hex::decode(value)
            .map_err(|err| RegistryError::Config(format!("invalid {field}: {err}")))?;
        if bytes.is_empty() {
            return Err(RegistryError::Config(format!("invalid {field}: empty")));
        }
        Ok(bytes)
    }
}

impl Default for ContractSettings {
    fn default() -> Self {
        Self {
            genesis_total_supply: "20000000000000000000000000".to_string(),
            un_jail_value: "10".to_string(),
            min_stake_value: "2500".to_string(),
            genesis_node_price: "2500".to_string(),
            min_step_value: "1".to_string(),
            min_unstake_tokens_value: "1".to_string(),
            unbond_period: 50,
            stake_enable_epoch: 0,
            staking_v2_epoch: u32::MAX,
            double_key_protection_enable_epoch: u32::MAX,
            gas_costs: GasCosts::default(),
            staking_registry_address: hex::encode([1u8; 32]),
            validator_contract_address: hex::encode([2u8; 32]),
            end_of_epoch_address: hex::encode([3u8; 32]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ValidatorConfig {
        ValidatorConfig {
            total_supply: TokenAmount::from_u64(20_000_000),
            min_stake_value: TokenAmount::from_u64(2_500),
            node_price: TokenAmount::from_u64(2_500),
            min_step: TokenAmount::from_u64(1),
            un_jail_price: TokenAmount::from_u64(10),
        }
    }

    #[test]
    fn verify_accepts_positive_scalars() {
        assert!(sample_config().verify().is_ok());
    }

    #[test]
    fn verify_names_the_offending_field() {
        let mut config = sample_config();
        config.node_price = TokenAmount::zero();
        let err = config.verify().unwrap_err();
        assert!(err.to_string().contains("node price"));

        let mut config = sample_config();
        config.un_jail_price = TokenAmount::zero();
        let err = config.verify().unwrap_err();
        assert!(err.to_string().contains("unjail cost"));
    }

    #[test]
    fn parse_amount_rejects_zero_and_garbage() {
        assert!(ContractSettings::parse_amount("min stake value", "0").is_err());
        assert!(ContractSettings::parse_amount("min stake value", "abc").is_err());
        assert_eq!(
            ContractSettings::parse_amount("min stake value", "2500").unwrap(),
            TokenAmount::from_u64(2_500)
        );
    }

    #[test]
    fn settings_round_trip_through_toml() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("validator.toml");
        let settings = ContractSettings::default();
        settings.save(&path).expect("save settings");
        let loaded = ContractSettings::load(&path).expect("load settings");
        assert_eq!(loaded.genesis_node_price, settings.genesis_node_price);
        assert_eq!(loaded.unbond_period, settings.unbond_period);
        assert_eq!(loaded.gas_costs.stake, settings.gas_costs.stake);
    }
}
