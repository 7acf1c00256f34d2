use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::{ContractSettings, GasCosts, ValidatorConfig};
use crate::errors::{RegistryError, RegistryResult};
use crate::events::KeyEventSink;
use crate::flags::FeatureFlags;
use crate::interfaces::{EpochNotifier, EpochSubscriber, HostEnv, Marshaler, MessageVerifier};
use crate::store::RegistrationStore;
use crate::types::{
    is_contract_address, u64_from_be_bytes, ContractCall, KeyResultCode, ReturnCode, StakedData,
    TokenAmount, UnstakedValue, ValidatorData, VmOutput,
};

/// Function name the host routes to on deployment.
pub const INIT_FUNCTION_NAME: &str = "_init";

const PAUSED_MESSAGE: &str = "unStake/unBond is paused as not enough total staked in protocol";
const VALUE_MUST_BE_ZERO: &str = "transaction value must be zero";
const INSUFFICIENT_GAS: &str = "insufficient gas limit";
const INVALID_METHOD: &str = "invalid method to call";

/// Everything needed to wire the contract into a host.
pub struct ValidatorContractArgs {
    pub host: Arc<dyn HostEnv>,
    pub verifier: Arc<dyn MessageVerifier>,
    pub marshaler: Arc<dyn Marshaler>,
    pub epoch_notifier: Arc<dyn EpochNotifier>,
    pub settings: ContractSettings,
}

/// The validator registry system contract.
///
/// Owns the per-owner financial record (stake, locked stake, pending
/// unbonds, registered node keys, reward destination) and drives every
/// lifecycle transition against the sibling Staking Registry, reached
/// through synchronous sub-calls.
pub struct ValidatorContract {
    host: Arc<dyn HostEnv>,
    verifier: Arc<dyn MessageVerifier>,
    marshaler: Arc<dyn Marshaler>,
    store: RegistrationStore,
    events: KeyEventSink,
    flags: FeatureFlags,
    base_config: ValidatorConfig,
    min_unstake_tokens: TokenAmount,
    unbond_period: u64,
    staking_registry_address: Vec<u8>,
    validator_address: Vec<u8>,
    end_of_epoch_address: Vec<u8>,
    wallet_address_len: usize,
    gas_costs: RwLock<GasCosts>,
}

impl ValidatorContract {
    pub fn new(args: ValidatorContractArgs) -> RegistryResult<Arc<Self>> {
        let settings = args.settings;
        let base_config = ValidatorConfig {
            total_supply: ContractSettings::parse_amount(
                "genesis total supply",
                &settings.genesis_total_supply,
            )?,
            min_stake_value: ContractSettings::parse_amount(
                "min stake value",
                &settings.min_stake_value,
            )?,
            node_price: ContractSettings::parse_amount(
                "node price",
                &settings.genesis_node_price,
            )?,
            min_step: ContractSettings::parse_amount("min step value", &settings.min_step_value)?,
            un_jail_price: ContractSettings::parse_amount("unjail cost", &settings.un_jail_value)?,
        };
        base_config.verify()?;
        let min_unstake_tokens = ContractSettings::parse_amount(
            "min unstake tokens value",
            &settings.min_unstake_tokens_value,
        )?;

        let staking_registry_address = ContractSettings::parse_address(
            "staking registry address",
            &settings.staking_registry_address,
        )?;
        let validator_address = ContractSettings::parse_address(
            "validator contract address",
            &settings.validator_contract_address,
        )?;
        let end_of_epoch_address = ContractSettings::parse_address(
            "end of epoch address",
            &settings.end_of_epoch_address,
        )?;

        let wallet_address_len = validator_address.len();
        let contract = Arc::new(Self {
            store: RegistrationStore::new(args.host.clone(), args.marshaler.clone()),
            events: KeyEventSink::new(args.host.clone()),
            host: args.host,
            verifier: args.verifier,
            marshaler: args.marshaler,
            flags: FeatureFlags::new(
                settings.stake_enable_epoch,
                settings.staking_v2_epoch,
                settings.double_key_protection_enable_epoch,
            ),
            base_config,
            min_unstake_tokens,
            unbond_period: settings.unbond_period,
            staking_registry_address,
            validator_address,
            end_of_epoch_address,
            wallet_address_len,
            gas_costs: RwLock::new(settings.gas_costs),
        });
        args.epoch_notifier
            .register_handler(contract.clone() as Arc<dyn EpochSubscriber>);
        Ok(contract)
    }

    /// Resolves the function name and runs the matching handler. The
    /// gas-cost table is read-locked for the whole invocation so that
    /// [`ValidatorContract::set_new_gas_costs`] can only slot in between
    /// calls.
    pub fn execute(&self, call: &ContractCall) -> ReturnCode {
        let gas = self.gas_costs.read();
        if call.is_degenerate() {
            self.host
                .add_return_message("nil arguments: invalid contract call input");
            return ReturnCode::UserError;
        }

        match call.function.as_str() {
            INIT_FUNCTION_NAME => self.init(call),
            "stake" => self.stake(call, &gas),
            "unStake" => self.un_stake(call, &gas),
            "unStakeNodes" => self.un_stake_nodes(call, &gas),
            "unStakeTokens" => self.un_stake_tokens(call, &gas),
            "unBond" => self.un_bond(call, &gas),
            "unBondNodes" => self.un_bond_nodes(call, &gas),
            "unBondTokens" => self.un_bond_tokens(call, &gas),
            "claim" => self.claim(call, &gas),
            "get" => self.get(call, &gas),
            "setConfig" => self.set_config(call),
            "changeRewardAddress" => self.change_reward_address(call, &gas),
            "unJail" => self.un_jail(call, &gas),
            "getTotalStaked" => self.get_total_staked(call, &gas),
            "getTotalStakedTopUpBlsKeys" => self.get_total_staked_top_up_bls_keys(call, &gas),
            "getBlsKeysStatus" => self.get_bls_keys_status(call),
            "updateStakingV2" => self.update_staking_v2(call),
            "cleanRegisteredData" => self.clean_registered_data(call, &gas),
            "pauseUnStakeUnBond" => self.pause_unstake_unbond(call),
            "unPauseUnStakeUnBond" => self.unpause_unstake_unbond(call),
            _ => {
                self.host.add_return_message(INVALID_METHOD);
                ReturnCode::UserError
            }
        }
    }

    /// Swaps the gas-cost table between invocations.
    pub fn set_new_gas_costs(&self, gas_costs: GasCosts) {
        *self.gas_costs.write() = gas_costs;
    }

    fn init(&self, call: &ContractCall) -> ReturnCode {
        if !self.store.owner().is_empty() {
            self.host
                .add_return_message("smart contract was already initialized");
            return ReturnCode::UserError;
        }

        self.store.set_owner(&call.caller);
        ReturnCode::Ok
    }

    /// Returns the governance override stored for `epoch` when present and
    /// well formed, the base configuration otherwise.
    fn get_config(&self, epoch: u32) -> ValidatorConfig {
        match self.store.load_config(epoch) {
            Ok(Some(config)) => {
                if let Err(err) = config.verify() {
                    warn!(%err, epoch, "stored config is invalid, using base config");
                    return self.base_config.clone();
                }
                config
            }
            Ok(None) => self.base_config.clone(),
            Err(err) => {
                warn!(%err, epoch, "cannot decode stored config, using base config");
                self.base_config.clone()
            }
        }
    }

    fn set_config(&self, call: &ContractCall) -> ReturnCode {
        if call.caller != self.store.owner() {
            self.host
                .add_return_message("setConfig function was not called by the owner address");
            return ReturnCode::UserError;
        }
        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return ReturnCode::UserError;
        }
        if call.arguments.len() != 6 {
            self.host.add_return_message(&format!(
                "invalid number of arguments: expected exactly 6, got {}",
                call.arguments.len()
            ));
            return ReturnCode::UserError;
        }

        let config = ValidatorConfig {
            total_supply: TokenAmount::from_be_bytes(&call.arguments[0]),
            min_stake_value: TokenAmount::from_be_bytes(&call.arguments[1]),
            node_price: TokenAmount::from_be_bytes(&call.arguments[2]),
            min_step: TokenAmount::from_be_bytes(&call.arguments[3]),
            un_jail_price: TokenAmount::from_be_bytes(&call.arguments[4]),
        };
        if let Err(err) = config.verify() {
            self.host.add_return_message(&err.to_string());
            return ReturnCode::UserError;
        }

        let epoch = u64_from_be_bytes(&call.arguments[5]) as u32;
        if let Err(err) = self.store.save_config(epoch, &config) {
            self.host
                .add_return_message(&format!("cannot save configuration: error {err}"));
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    fn execute_on_staking_registry(&self, data: &[u8]) -> RegistryResult<VmOutput> {
        self.host.execute_on_dest_context(
            &self.staking_registry_address,
            &self.validator_address,
            &TokenAmount::zero(),
            data,
        )
    }

    /// Reads the sibling registry's record for `bls_key` through the
    /// `get@bls` probe.
    fn get_staked_data(&self, bls_key: &[u8]) -> RegistryResult<StakedData> {
        let output = self.execute_on_staking_registry(&get_command(bls_key))?;
        let datum = output
            .return_data
            .first()
            .filter(|datum| !datum.is_empty())
            .ok_or_else(|| RegistryError::Execution("bls key is not registered".to_string()))?;
        self.marshaler.unmarshal_staked_data(datum)
    }

    fn stake(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if self.host.use_gas(gas.stake).is_err() {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        let is_genesis = self.host.current_nonce() == 0;
        if !is_genesis && !self.flags.staking_enabled() {
            self.host.add_return_message("stake is not enabled");
            return ReturnCode::UserError;
        }

        let config = self.get_config(self.host.current_epoch());
        let mut registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return ReturnCode::UserError;
            }
        };

        registration.total_stake_value.add_assign(&call.call_value);
        if registration.total_stake_value < config.node_price && !is_contract_address(&call.caller)
        {
            self.host.add_return_message(&format!(
                "insufficient stake value: expected {}, got {}",
                config.node_price, registration.total_stake_value
            ));
            return ReturnCode::UserError;
        }

        let num_args = call.arguments.len();
        if num_args == 0 {
            return self.update_stake_value(&mut registration, &call.caller);
        }

        if !is_num_args_correct_to_stake(&call.arguments) {
            self.host
                .add_return_message("invalid number of arguments to call stake");
            return ReturnCode::UserError;
        }

        let max_nodes_to_run = u64_from_be_bytes(&call.arguments[0]);
        if max_nodes_to_run == 0 {
            self.host
                .add_return_message("number of nodes argument must be greater than zero");
            return ReturnCode::UserError;
        }

        if self
            .host
            .use_gas((max_nodes_to_run - 1).saturating_mul(gas.stake))
            .is_err()
        {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        let is_already_registered = registration.is_registered();
        if !is_already_registered {
            registration.reward_address = call.caller.clone();
        }
        registration.max_stake_per_node = registration.total_stake_value.clone();
        registration.registered_epoch = self.host.current_epoch();

        let bls_keys = match self.register_bls_keys(&mut registration, &call.caller, &call.arguments)
        {
            Ok(keys) => keys,
            Err(err) => {
                self.host
                    .add_return_message(&format!("cannot register bls key: error {err}"));
                return ReturnCode::UserError;
            }
        };
        if self.flags.double_key_protection() && contains_double_keys(&bls_keys) {
            self.host
                .add_return_message("invalid arguments, found same bls key twice");
            return ReturnCode::UserError;
        }

        let num_qualified = registration
            .total_stake_value
            .div_floor(&config.node_price)
            .to_u64_truncating();
        if registration.bls_pub_keys.len() as u64 > num_qualified {
            self.host.add_return_message("insufficient funds");
            return ReturnCode::OutOfFunds;
        }

        let first_optional = (max_nodes_to_run as u128 * 2 + 1) as usize;
        if num_args > first_optional {
            for argument in &call.arguments[first_optional..] {
                if argument.len() == self.wallet_address_len {
                    if !is_already_registered {
                        registration.reward_address = argument.clone();
                    } else {
                        self.host.add_return_message(
                            "reward address after being registered can be changed only through changeRewardAddress",
                        );
                    }
                    continue;
                }

                registration.max_stake_per_node = TokenAmount::from_be_bytes(argument);
            }
        }

        let reward_address = registration.reward_address.clone();
        self.activate_staking_for(
            &bls_keys,
            num_qualified,
            &mut registration,
            &config.node_price,
            &reward_address,
            &call.caller,
        );

        if let Err(err) = self.store.save(&call.caller, &registration) {
            self.host
                .add_return_message(&format!("cannot save registration data: error {err}"));
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    /// Pure top-up path: no node keys supplied, the call value was already
    /// folded into the total stake.
    fn update_stake_value(&self, registration: &mut ValidatorData, caller: &[u8]) -> ReturnCode {
        if registration.bls_pub_keys.is_empty() && !is_contract_address(caller) {
            self.host.add_return_message("no bls keys has been provided");
            return ReturnCode::UserError;
        }

        if registration.reward_address.is_empty() {
            registration.reward_address = caller.to_vec();
        }

        if let Err(err) = self.store.save(caller, registration) {
            self.host
                .add_return_message(&format!("cannot save registration data error {err}"));
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    /// Signature-checks each `(blsKey, signature)` pair against the caller
    /// address. Invalid keys are soft-reported and dropped; the valid
    /// subset proceeds.
    fn verified_bls_keys_from_args(&self, caller: &[u8], args: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let max_nodes_to_run = u64_from_be_bytes(&args[0]);
        let mut bls_keys = Vec::new();
        let mut invalid_keys = Vec::new();
        for i in (1..(max_nodes_to_run as u128 * 2 + 1) as usize).step_by(2) {
            let bls_key = &args[i];
            let signature = &args[i + 1];
            if self.verifier.verify(caller, signature, bls_key).is_err() {
                invalid_keys.push(hex::encode(bls_key));
                self.events.emit(bls_key, KeyResultCode::InvalidKey);
                continue;
            }

            bls_keys.push(bls_key.clone());
        }
        if !invalid_keys.is_empty() {
            self.host
                .add_return_message(&format!("invalid BLS keys: {}", invalid_keys.join(", ")));
        }

        bls_keys
    }

    /// Filters out keys this owner already holds, then probes the sibling
    /// registry so a key bound to anyone else is rejected outright.
    fn new_valid_keys(
        &self,
        registered_keys: &[Vec<u8>],
        candidates: &[Vec<u8>],
    ) -> RegistryResult<Vec<Vec<u8>>> {
        let registered: HashSet<&[u8]> = registered_keys.iter().map(Vec::as_slice).collect();
        let new_keys: Vec<Vec<u8>> = candidates
            .iter()
            .filter(|key| !registered.contains(key.as_slice()))
            .cloned()
            .collect();

        for key in &new_keys {
            let already_bound = match self.execute_on_staking_registry(&get_command(key)) {
                Err(_) => true,
                Ok(output) => output
                    .return_data
                    .first()
                    .is_some_and(|datum| !datum.is_empty()),
            };
            if already_bound {
                return Err(RegistryError::KeyAlreadyRegistered);
            }
        }

        Ok(new_keys)
    }

    fn register_bls_keys(
        &self,
        registration: &mut ValidatorData,
        owner: &[u8],
        args: &[Vec<u8>],
    ) -> RegistryResult<Vec<Vec<u8>>> {
        let max_nodes_to_run = u64_from_be_bytes(&args[0]);
        if (args.len() as u128) < max_nodes_to_run as u128 + 1 {
            let message = format!(
                "not enough arguments to process stake function: expected min {}, got {}",
                max_nodes_to_run as u128 + 1,
                args.len()
            );
            self.host.add_return_message(&message);
            return Err(RegistryError::NotEnoughArguments(message));
        }

        let bls_keys = self.verified_bls_keys_from_args(owner, args);
        let new_keys = self.new_valid_keys(&registration.bls_pub_keys, &bls_keys)?;

        for bls_key in &new_keys {
            let command = register_command(bls_key, &registration.reward_address, owner);
            match self.execute_on_staking_registry(&command) {
                Err(err) => {
                    self.host
                        .add_return_message(&format!("cannot do register: {err}"));
                    self.events.emit(bls_key, KeyResultCode::Failed);
                    // Transport failure classified the same as a non-Ok
                    // sub-return; see DESIGN.md.
                    return Err(RegistryError::KeyAlreadyRegistered);
                }
                Ok(output) if output.return_code != ReturnCode::Ok => {
                    self.host
                        .add_return_message(&format!("cannot do register: {}", output.return_code));
                    self.events.emit(bls_key, KeyResultCode::Failed);
                    return Err(RegistryError::KeyAlreadyRegistered);
                }
                Ok(_) => {}
            }

            registration.bls_pub_keys.push(bls_key.clone());
        }

        Ok(bls_keys)
    }

    /// Activates validated keys until the qualified-node budget is spent.
    /// Per-key failures are reported and skipped; a key only counts toward
    /// `num_registered` the first time it is ever staked.
    fn activate_staking_for(
        &self,
        bls_keys: &[Vec<u8>],
        num_qualified: u64,
        registration: &mut ValidatorData,
        node_price: &TokenAmount,
        reward_address: &[u8],
        owner: &[u8],
    ) {
        let mut num_registered = u64::from(registration.num_registered);
        for bls_key in bls_keys {
            if num_registered >= num_qualified {
                break;
            }

            let staked_data = match self.get_staked_data(bls_key) {
                Ok(data) => data,
                Err(_) => continue,
            };
            if staked_data.staked || staked_data.waiting {
                continue;
            }

            match self.execute_on_staking_registry(&stake_command(bls_key, reward_address, owner)) {
                Err(err) => {
                    self.host.add_return_message(&format!(
                        "cannot do stake for key {}, error {err}",
                        hex::encode(bls_key)
                    ));
                    self.events.emit(bls_key, KeyResultCode::Failed);
                    continue;
                }
                Ok(output) if output.return_code != ReturnCode::Ok => {
                    self.host.add_return_message(&format!(
                        "cannot do stake for key {}, error {}",
                        hex::encode(bls_key),
                        output.return_code
                    ));
                    self.events.emit(bls_key, KeyResultCode::Failed);
                    continue;
                }
                Ok(output) => {
                    let queued = output
                        .return_data
                        .first()
                        .is_some_and(|datum| datum.as_slice() == [KeyResultCode::Waiting.as_byte()].as_slice());
                    if queued {
                        self.events.emit(bls_key, KeyResultCode::Waiting);
                    }
                }
            }

            if staked_data.unstaked_nonce == 0 {
                num_registered += 1;
            }
        }

        registration.num_registered = num_registered as u32;
        registration.locked_stake = node_price.mul_count(num_registered);
    }

    fn basic_checks_for_unstake_nodes(
        &self,
        call: &ContractCall,
        gas_per_key: u64,
    ) -> Result<ValidatorData, ReturnCode> {
        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return Err(ReturnCode::UserError);
        }
        if call.arguments.is_empty() {
            self.host
                .add_return_message("invalid number of arguments: expected min 1, got 0");
            return Err(ReturnCode::UserError);
        }
        if !self.flags.staking_enabled() {
            self.host.add_return_message("unStake is not enabled");
            return Err(ReturnCode::UserError);
        }

        let registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return Err(ReturnCode::UserError);
            }
        };

        if self
            .host
            .use_gas(gas_per_key.saturating_mul(call.arguments.len() as u64))
            .is_err()
        {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return Err(ReturnCode::OutOfGas);
        }

        if let Err(err) = verify_bls_public_keys(&registration, &call.arguments) {
            self.host.add_return_message(&format!(
                "cannot get all blsKeys from registration data: error {err}"
            ));
            return Err(ReturnCode::UserError);
        }

        Ok(registration)
    }

    fn unstake_nodes_from_staking_registry(
        &self,
        bls_keys: &[Vec<u8>],
        reward_address: &[u8],
    ) -> u64 {
        let mut num_success = 0u64;
        for bls_key in bls_keys {
            match self.execute_on_staking_registry(&unstake_command(bls_key, reward_address)) {
                Err(err) => {
                    self.host.add_return_message(&format!(
                        "cannot do unStake for key {}: {err}",
                        hex::encode(bls_key)
                    ));
                    self.events.emit(bls_key, KeyResultCode::Failed);
                }
                Ok(output) if output.return_code != ReturnCode::Ok => {
                    self.host.add_return_message(&format!(
                        "cannot do unStake for key {}: {}",
                        hex::encode(bls_key),
                        output.return_code
                    ));
                    self.events.emit(bls_key, KeyResultCode::Failed);
                }
                Ok(_) => num_success += 1,
            }
        }

        num_success
    }

    /// Full unstake: node-side unstake plus, in the top-up era, moving the
    /// freed collateral into the pending-unbond queue.
    fn un_stake(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if self.store.is_unstake_unbond_paused() {
            self.host.add_return_message(PAUSED_MESSAGE);
            return ReturnCode::UserError;
        }

        let mut registration = match self.basic_checks_for_unstake_nodes(call, gas.un_stake) {
            Ok(data) => data,
            Err(code) => return code,
        };

        let num_success =
            self.unstake_nodes_from_staking_registry(&call.arguments, &registration.reward_address);
        if !self.flags.top_up_enabled() {
            return ReturnCode::Ok;
        }

        let config = self.get_config(self.host.current_epoch());
        let mut unstake_from_nodes = config.node_price.mul_count(num_success);
        if unstake_from_nodes > registration.total_stake_value {
            unstake_from_nodes = registration.total_stake_value.clone();
        }

        let return_code = self.process_unstake_value(&mut registration, &unstake_from_nodes);
        if return_code != ReturnCode::Ok {
            return return_code;
        }

        if let Err(err) = self.store.save(&call.caller, &registration) {
            self.host
                .add_return_message(&format!("cannot save registration data: error {err}"));
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    fn un_stake_nodes(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if !self.flags.top_up_enabled() {
            self.host.add_return_message(INVALID_METHOD);
            return ReturnCode::UserError;
        }
        if self.store.is_unstake_unbond_paused() {
            self.host.add_return_message(PAUSED_MESSAGE);
            return ReturnCode::UserError;
        }

        let registration = match self.basic_checks_for_unstake_nodes(call, gas.un_stake) {
            Ok(data) => data,
            Err(code) => return code,
        };

        let _ =
            self.unstake_nodes_from_staking_registry(&call.arguments, &registration.reward_address);

        ReturnCode::Ok
    }

    fn un_stake_tokens(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        let mut registration = match self.basic_check_for_unstake_unbond(call) {
            Ok(data) => data,
            Err(code) => return code,
        };
        if self.store.is_unstake_unbond_paused() {
            self.host.add_return_message(PAUSED_MESSAGE);
            return ReturnCode::UserError;
        }

        if self.host.use_gas(gas.un_stake_tokens).is_err() {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }
        if call.arguments.len() != 1 {
            self.host
                .add_return_message("should have specified one argument containing the unstake value");
            return ReturnCode::UserError;
        }

        let unstake_value = TokenAmount::from_be_bytes(&call.arguments[0]);
        let return_code = self.process_unstake_value(&mut registration, &unstake_value);
        if return_code != ReturnCode::Ok {
            return return_code;
        }

        if let Err(err) = self.store.save(&call.caller, &registration) {
            self.host
                .add_return_message(&format!("cannot save registration data: error {err}"));
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    /// Moves `unstake_value` from the active stake into a fresh
    /// pending-unbond entry stamped with the current nonce.
    fn process_unstake_value(
        &self,
        registration: &mut ValidatorData,
        unstake_value: &TokenAmount,
    ) -> ReturnCode {
        let value_is_ok = *unstake_value >= self.min_unstake_tokens
            || *unstake_value == registration.total_stake_value;
        if !value_is_ok {
            self.host.add_return_message(
                "can not unstake the provided value either because is under the minimum threshold or \
                 is not the value left to be unStaked",
            );
            return ReturnCode::UserError;
        }
        if *unstake_value > registration.total_stake_value {
            self.host.add_return_message(&format!(
                "can not unstake a bigger value than the possible allowed value which is {}",
                registration.total_stake_value
            ));
            return ReturnCode::UserError;
        }

        let Some(remaining) = registration.total_stake_value.checked_sub(unstake_value) else {
            self.host
                .add_return_message("contract error on unStake function, total stake underflow");
            return ReturnCode::UserError;
        };
        registration.total_stake_value = remaining;
        registration.total_unstaked.add_assign(unstake_value);
        registration.unstaked_info.push(UnstakedValue {
            unstaked_nonce: self.host.current_nonce(),
            unstaked_value: unstake_value.clone(),
        });

        ReturnCode::Ok
    }

    fn basic_check_for_unstake_unbond(
        &self,
        call: &ContractCall,
    ) -> Result<ValidatorData, ReturnCode> {
        if !self.flags.top_up_enabled() {
            self.host.add_return_message(INVALID_METHOD);
            return Err(ReturnCode::UserError);
        }
        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return Err(ReturnCode::UserError);
        }

        let registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host
                    .add_return_message(&format!("cannot get registration data: error {err}"));
                return Err(ReturnCode::UserError);
            }
        };
        if !registration.is_registered() {
            self.host
                .add_return_message("key is not registered, validator operation is not possible");
            return Err(ReturnCode::UserError);
        }

        Ok(registration)
    }

    fn check_unbond_arguments(&self, call: &ContractCall, gas: &GasCosts) -> Result<ValidatorData, ReturnCode> {
        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return Err(ReturnCode::UserError);
        }
        if call.arguments.is_empty() {
            self.host
                .add_return_message("invalid number of arguments: expected min 1, got 0");
            return Err(ReturnCode::UserError);
        }
        if !self.flags.staking_enabled() {
            self.host.add_return_message("unBond is not enabled");
            return Err(ReturnCode::UserError);
        }

        let registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return Err(ReturnCode::UserError);
            }
        };

        if let Err(err) = verify_bls_public_keys(&registration, &call.arguments) {
            self.host.add_return_message(&format!(
                "cannot get all blsKeys from registration data: error {err}"
            ));
            return Err(ReturnCode::UserError);
        }

        if self
            .host
            .use_gas(gas.un_bond.saturating_mul(call.arguments.len() as u64))
            .is_err()
        {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return Err(ReturnCode::OutOfGas);
        }

        Ok(registration)
    }

    fn unbond_nodes_from_staking_registry(&self, bls_keys: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut unbonded_keys = Vec::new();
        for bls_key in bls_keys {
            let succeeded = match self.execute_on_staking_registry(&unbond_command(bls_key)) {
                Ok(output) => output.return_code == ReturnCode::Ok,
                Err(_) => false,
            };
            if !succeeded {
                self.host.add_return_message(&format!(
                    "cannot do unBond for key: {}",
                    hex::encode(bls_key)
                ));
                self.events.emit(bls_key, KeyResultCode::Failed);
                continue;
            }

            unbonded_keys.push(bls_key.clone());
        }

        unbonded_keys
    }

    /// Pre-top-up unbond: node collateral only, with strict conservation
    /// checks before any balance moves.
    fn un_bond_v1(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        let mut registration = match self.check_unbond_arguments(call, gas) {
            Ok(data) => data,
            Err(code) => return code,
        };

        let unbonded_keys = self.unbond_nodes_from_staking_registry(&call.arguments);
        let config = self.get_config(self.host.current_epoch());
        let total_unbond = config.node_price.mul_count(unbonded_keys.len() as u64);

        if registration.locked_stake < total_unbond {
            self.host
                .add_return_message("contract error on unBond function, lockedStake < totalUnBond");
            return ReturnCode::UserError;
        }
        if u64::from(registration.num_registered) < unbonded_keys.len() as u64 {
            self.host
                .add_return_message("contract error on unBond function, missing nodes");
            return ReturnCode::UserError;
        }

        registration.num_registered -= unbonded_keys.len() as u32;
        let Some(locked) = registration.locked_stake.checked_sub(&total_unbond) else {
            self.host
                .add_return_message("contract error on unBond function, lockedStake < totalUnBond");
            return ReturnCode::UserError;
        };
        registration.locked_stake = locked;
        let Some(total_stake) = registration.total_stake_value.checked_sub(&total_unbond) else {
            self.host
                .add_return_message("contract error on unBond function, total stake < 0");
            return ReturnCode::UserError;
        };
        registration.total_stake_value = total_stake;

        if registration.is_drained() {
            self.store.delete(&call.caller);
        } else {
            delete_unbonded_keys(&mut registration, &unbonded_keys);
            if let Err(err) = self.store.save(&call.caller, &registration) {
                self.host
                    .add_return_message(&format!("cannot save registration data: error {err}"));
                return ReturnCode::UserError;
            }
        }

        if self
            .host
            .transfer(&call.caller, &call.recipient, &total_unbond)
            .is_err()
        {
            self.host
                .add_return_message("transfer error on unBond function");
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    fn un_bond(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if !self.flags.top_up_enabled() {
            return self.un_bond_v1(call, gas);
        }

        if self.store.is_unstake_unbond_paused() {
            self.host.add_return_message(PAUSED_MESSAGE);
            return ReturnCode::UserError;
        }
        let mut registration = match self.check_unbond_arguments(call, gas) {
            Ok(data) => data,
            Err(code) => return code,
        };

        let unbonded_keys = self.unbond_nodes_from_staking_registry(&call.arguments);

        let config = self.get_config(self.host.current_epoch());
        let node_unbond = config.node_price.mul_count(unbonded_keys.len() as u64);
        let total_unbond =
            match self.unbond_tokens_from_registration_data(&mut registration, &node_unbond) {
                Ok(total) => total,
                Err(code) => return code,
            };

        let return_code =
            self.update_registration_data_after_unbond(&mut registration, &unbonded_keys, &call.caller);
        if return_code != ReturnCode::Ok {
            return return_code;
        }

        if self
            .host
            .transfer(&call.caller, &call.recipient, &total_unbond)
            .is_err()
        {
            self.host
                .add_return_message("transfer error on unBond function");
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    fn un_bond_nodes(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if !self.flags.top_up_enabled() {
            self.host.add_return_message(INVALID_METHOD);
            return ReturnCode::UserError;
        }
        if self.store.is_unstake_unbond_paused() {
            self.host.add_return_message(PAUSED_MESSAGE);
            return ReturnCode::UserError;
        }

        let mut registration = match self.check_unbond_arguments(call, gas) {
            Ok(data) => data,
            Err(code) => return code,
        };

        let unbonded_keys = self.unbond_nodes_from_staking_registry(&call.arguments);
        self.update_registration_data_after_unbond(&mut registration, &unbonded_keys, &call.caller)
    }

    fn update_registration_data_after_unbond(
        &self,
        registration: &mut ValidatorData,
        unbonded_keys: &[Vec<u8>],
        caller: &[u8],
    ) -> ReturnCode {
        if u64::from(registration.num_registered) < unbonded_keys.len() as u64 {
            self.host
                .add_return_message("contract error on unBond function, missing nodes");
            return ReturnCode::UserError;
        }

        let config = self.get_config(self.host.current_epoch());
        registration.num_registered -= unbonded_keys.len() as u32;
        registration.locked_stake = config
            .node_price
            .mul_count(u64::from(registration.num_registered));

        if registration.is_drained() {
            self.store.delete(caller);
        } else {
            delete_unbonded_keys(registration, unbonded_keys);
            if let Err(err) = self.store.save(caller, registration) {
                self.host
                    .add_return_message(&format!("cannot save registration data: error {err}"));
                return ReturnCode::UserError;
            }
        }

        ReturnCode::Ok
    }

    fn un_bond_tokens(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        let mut registration = match self.basic_check_for_unstake_unbond(call) {
            Ok(data) => data,
            Err(code) => return code,
        };
        if self.store.is_unstake_unbond_paused() {
            self.host.add_return_message(PAUSED_MESSAGE);
            return ReturnCode::UserError;
        }
        if self.host.use_gas(gas.un_bond_tokens).is_err() {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        if call.arguments.len() > 1 {
            self.host.add_return_message("too many arguments");
            return ReturnCode::UserError;
        }
        let mut value_to_unbond = TokenAmount::zero();
        if call.arguments.len() == 1 {
            value_to_unbond = TokenAmount::from_be_bytes(&call.arguments[0]);
            if value_to_unbond.is_zero() {
                self.host
                    .add_return_message("cannot unBond negative value or zero value");
                return ReturnCode::UserError;
            }
        }

        let total_unbond =
            match self.unbond_tokens_from_registration_data(&mut registration, &value_to_unbond) {
                Ok(total) => total,
                Err(code) => return code,
            };
        if total_unbond.is_zero() {
            self.host
                .add_return_message("no tokens that can be unbond at this time");
            return ReturnCode::Ok;
        }

        if self
            .host
            .transfer(&call.caller, &call.recipient, &total_unbond)
            .is_err()
        {
            self.host
                .add_return_message("transfer error on unBond function");
            return ReturnCode::UserError;
        }

        if registration.is_drained() {
            self.store.delete(&call.caller);
        } else if let Err(err) = self.store.save(&call.caller, &registration) {
            self.host
                .add_return_message(&format!("cannot save registration data: error {err}"));
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    /// Drains matured pending-unbond entries in nonce order. A non-zero
    /// `value_to_unbond` acts as a stop-at ceiling; the entry that crosses
    /// it is split, leaving the remainder in place under its original
    /// nonce.
    fn unbond_tokens_from_registration_data(
        &self,
        registration: &mut ValidatorData,
        value_to_unbond: &TokenAmount,
    ) -> Result<TokenAmount, ReturnCode> {
        let current_nonce = self.host.current_nonce();
        let stop_at_value = !value_to_unbond.is_zero();
        let mut total_unbond = TokenAmount::zero();
        let mut index = 0usize;
        let mut split_entry: Option<UnstakedValue> = None;

        for unstaked in &registration.unstaked_info {
            let matured =
                current_nonce.saturating_sub(unstaked.unstaked_nonce) >= self.unbond_period;
            if !matured {
                break;
            }

            total_unbond.add_assign(&unstaked.unstaked_value);
            index += 1;
            if stop_at_value && total_unbond >= *value_to_unbond {
                let remainder = total_unbond
                    .checked_sub(value_to_unbond)
                    .unwrap_or_else(TokenAmount::zero);
                if !remainder.is_zero() {
                    split_entry = Some(UnstakedValue {
                        unstaked_nonce: unstaked.unstaked_nonce,
                        unstaked_value: remainder,
                    });
                }
                total_unbond = value_to_unbond.clone();
                break;
            }
        }

        if let Some(entry) = split_entry {
            index -= 1;
            registration.unstaked_info[index] = entry;
        }
        registration.unstaked_info.drain(..index);

        match registration.total_unstaked.checked_sub(&total_unbond) {
            Some(remaining) => registration.total_unstaked = remaining,
            None => {
                self.host.add_return_message("too much requested to unBond");
                return Err(ReturnCode::UserError);
            }
        }

        Ok(total_unbond)
    }

    fn un_jail_v1(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if call.arguments.is_empty() {
            self.host
                .add_return_message("invalid number of arguments: expected min 1, got 0");
            return ReturnCode::UserError;
        }

        let config = self.get_config(self.host.current_epoch());
        let total_unjail_price = config.un_jail_price.mul_count(call.arguments.len() as u64);
        if total_unjail_price != call.call_value {
            self.host
                .add_return_message("insufficient funds sent for unJail");
            return ReturnCode::UserError;
        }

        if self
            .host
            .use_gas(gas.un_jail.saturating_mul(call.arguments.len() as u64))
            .is_err()
        {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        let registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return ReturnCode::UserError;
            }
        };

        if verify_bls_public_keys(&registration, &call.arguments).is_err() {
            self.host.add_return_message(&format!(
                "could not get all blsKeys from registration data: error {}",
                RegistryError::BlsKeyMismatch
            ));
            return ReturnCode::UserError;
        }

        for bls_key in &call.arguments {
            match self.execute_on_staking_registry(&unjail_command(bls_key)) {
                Err(err) => {
                    self.host.add_return_message(&err.to_string());
                    self.events.emit(bls_key, KeyResultCode::Failed);
                }
                Ok(output) if output.return_code != ReturnCode::Ok => {
                    self.events.emit(bls_key, KeyResultCode::Failed);
                }
                Ok(_) => {}
            }
        }

        ReturnCode::Ok
    }

    /// Top-up era unjail: failed keys are refunded, successful fees are
    /// banked into the unjail-funds accumulator.
    fn un_jail(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if !self.flags.staking_enabled() {
            return self.un_jail_v1(call, gas);
        }

        if call.arguments.is_empty() {
            self.host
                .add_return_message("invalid number of arguments: expected at least 1");
            return ReturnCode::UserError;
        }

        let num_bls_keys = call.arguments.len() as u64;
        let config = self.get_config(self.host.current_epoch());
        let total_unjail_price = config.un_jail_price.mul_count(num_bls_keys);
        if total_unjail_price != call.call_value {
            self.host
                .add_return_message("wanted exact unjail price * numNodes");
            return ReturnCode::UserError;
        }

        if self
            .host
            .use_gas(gas.un_jail.saturating_mul(num_bls_keys))
            .is_err()
        {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        let registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return ReturnCode::UserError;
            }
        };

        if let Err(err) = verify_bls_public_keys(&registration, &call.arguments) {
            self.host.add_return_message(&format!(
                "cannot get all blsKeys from registration data: error {err}"
            ));
            return ReturnCode::UserError;
        }

        let mut transfer_back = TokenAmount::zero();
        for bls_key in &call.arguments {
            let succeeded = match self.execute_on_staking_registry(&unjail_command(bls_key)) {
                Ok(output) => output.return_code == ReturnCode::Ok,
                Err(_) => false,
            };
            if !succeeded {
                transfer_back.add_assign(&config.un_jail_price);
                self.events.emit(bls_key, KeyResultCode::Failed);
            }
        }

        if !transfer_back.is_zero()
            && self
                .host
                .transfer(&call.caller, &call.recipient, &transfer_back)
                .is_err()
        {
            self.host
                .add_return_message("transfer error on unJail function");
            return ReturnCode::UserError;
        }

        let Some(banked) = call.call_value.checked_sub(&transfer_back) else {
            self.host
                .add_return_message("contract error on unJail function, refund exceeds paid value");
            return ReturnCode::UserError;
        };
        self.store.add_to_unjail_funds(&banked);

        ReturnCode::Ok
    }

    /// Pays out the top-up above the locked collateral. Disabled once the
    /// top-up era begins; token-level unstake supersedes it.
    fn claim(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if self.flags.top_up_enabled() {
            self.host.add_return_message("claim function is disabled");
            return ReturnCode::UserError;
        }

        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return ReturnCode::UserError;
        }

        let mut registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host
                    .add_return_message(&format!("cannot get registration data: error {err}"));
                return ReturnCode::UserError;
            }
        };
        if !registration.is_registered() {
            self.host
                .add_return_message("key is not registered, claim is not possible");
            return ReturnCode::UserError;
        }
        if self.host.use_gas(gas.claim).is_err() {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        let claimable = registration
            .total_stake_value
            .checked_sub(&registration.locked_stake)
            .unwrap_or_else(TokenAmount::zero);
        if claimable.is_zero() {
            return ReturnCode::Ok;
        }

        registration.total_stake_value = registration.locked_stake.clone();
        if let Err(err) = self.store.save(&call.caller, &registration) {
            self.host
                .add_return_message(&format!("cannot save registration data: error {err}"));
            return ReturnCode::UserError;
        }

        if let Err(err) = self.host.transfer(&call.caller, &call.recipient, &claimable) {
            self.host
                .add_return_message(&format!("transfer error on claim function: error {err}"));
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    fn change_reward_address(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return ReturnCode::UserError;
        }
        if call.arguments.is_empty() {
            self.host
                .add_return_message("invalid number of arguments: expected min 1, got 0");
            return ReturnCode::UserError;
        }
        if call.arguments[0].len() != self.wallet_address_len {
            self.host.add_return_message("wrong reward address");
            return ReturnCode::UserError;
        }

        let mut registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return ReturnCode::UserError;
            }
        };
        if !registration.is_registered() {
            self.host
                .add_return_message("cannot change reward address, key is not registered");
            return ReturnCode::UserError;
        }
        if registration.reward_address == call.arguments[0] {
            self.host
                .add_return_message("new reward address is equal with the old reward address");
            return ReturnCode::UserError;
        }

        if self
            .host
            .use_gas(
                gas.change_reward_address
                    .saturating_mul(registration.bls_pub_keys.len() as u64),
            )
            .is_err()
        {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        registration.reward_address = call.arguments[0].clone();
        if let Err(err) = self.store.save(&call.caller, &registration) {
            self.host
                .add_return_message(&format!("cannot save registration data: error {err}"));
            return ReturnCode::UserError;
        }

        let command =
            change_reward_address_command(&registration.reward_address, &registration.bls_pub_keys);
        match self.execute_on_staking_registry(&command) {
            Err(err) => {
                self.host
                    .add_return_message(&format!("cannot change reward address: error {err}"));
                ReturnCode::UserError
            }
            Ok(output) => output.return_code,
        }
    }

    /// Debug view: echoes the raw storage under the given key.
    fn get(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return ReturnCode::UserError;
        }
        if call.arguments.len() != 1 {
            self.host.add_return_message(&format!(
                "invalid number of arguments: expected exactly 1, got {}",
                call.arguments.len()
            ));
            return ReturnCode::UserError;
        }

        if self.host.use_gas(gas.get).is_err() {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        let value = self.host.get_storage(&call.arguments[0]);
        self.host.finish(&value);

        ReturnCode::Ok
    }

    fn get_total_staked(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return ReturnCode::UserError;
        }
        if self.host.use_gas(gas.get).is_err() {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        let registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return ReturnCode::UserError;
            }
        };

        if !registration.is_registered() {
            self.host
                .add_return_message("caller not registered in staking/validator sc");
            return ReturnCode::UserError;
        }

        self.host
            .finish(registration.total_stake_value.to_string().as_bytes());
        ReturnCode::Ok
    }

    fn get_total_staked_top_up_bls_keys(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if !self.flags.top_up_enabled() {
            self.host.add_return_message(INVALID_METHOD);
            return ReturnCode::UserError;
        }
        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return ReturnCode::UserError;
        }
        if self.host.use_gas(gas.get).is_err() {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }

        let registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return ReturnCode::UserError;
            }
        };

        if !registration.is_registered() {
            self.host
                .add_return_message("caller not registered in staking/validator sc");
            return ReturnCode::UserError;
        }

        let config = self.get_config(self.host.current_epoch());
        let stake_for_nodes = config
            .node_price
            .mul_count(u64::from(registration.num_registered));

        let Some(top_up) = registration.total_stake_value.checked_sub(&stake_for_nodes) else {
            self.host.add_return_message(
                "contract error on getTopUp function, total stake < locked stake value",
            );
            return ReturnCode::UserError;
        };

        self.host.finish(top_up.to_string().as_bytes());
        self.host
            .finish(registration.total_stake_value.to_string().as_bytes());
        for bls_key in &registration.bls_pub_keys {
            self.host.finish(bls_key);
        }

        ReturnCode::Ok
    }

    fn get_bls_keys_status(&self, call: &ContractCall) -> ReturnCode {
        if call.caller != self.validator_address {
            self.host.add_return_message("this is only a view function");
            return ReturnCode::UserError;
        }
        if call.arguments.len() != 1 {
            self.host
                .add_return_message("number of arguments must be equal to 1");
            return ReturnCode::UserError;
        }

        let registration = match self.store.load_or_default(&call.arguments[0]) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return ReturnCode::UserError;
            }
        };

        if registration.bls_pub_keys.is_empty() {
            self.host.add_return_message("no bls keys");
            return ReturnCode::Ok;
        }

        for bls_key in &registration.bls_pub_keys {
            let output = match self.execute_on_staking_registry(&bls_key_status_command(bls_key)) {
                Ok(output) => output,
                Err(err) => {
                    self.host.add_return_message(&format!(
                        "cannot get bls key status: bls key - {} error - {err}",
                        hex::encode(bls_key)
                    ));
                    continue;
                }
            };

            if output.return_code != ReturnCode::Ok {
                self.host.add_return_message(&format!(
                    "error in getting bls key status: bls key - {}",
                    hex::encode(bls_key)
                ));
                continue;
            }
            if output.return_data.len() != 1 {
                self.host.add_return_message(&format!(
                    "cannot get bls key status for key {}",
                    hex::encode(bls_key)
                ));
                continue;
            }

            self.host.finish(bls_key);
            self.host.finish(&output.return_data[0]);
        }

        ReturnCode::Ok
    }

    /// Re-binds the owner of every key in the given record through the
    /// sibling registry. Internal: only the contract itself may call it.
    fn update_staking_v2(&self, call: &ContractCall) -> ReturnCode {
        if !self.flags.top_up_enabled() {
            self.host.add_return_message(INVALID_METHOD);
            return ReturnCode::UserError;
        }
        if call.caller != self.validator_address {
            self.host
                .add_return_message("this is a function that has to be called internally");
            return ReturnCode::UserError;
        }
        if call.arguments.len() != 1 {
            self.host
                .add_return_message("should have provided only one argument: the owner address");
            return ReturnCode::UserError;
        }
        if call.arguments[0].len() != self.wallet_address_len {
            self.host.add_return_message("wrong owner address");
            return ReturnCode::UserError;
        }
        if !call.call_value.is_zero() {
            self.host.add_return_message(VALUE_MUST_BE_ZERO);
            return ReturnCode::UserError;
        }

        let registration = match self.store.load_or_default(&call.arguments[0]) {
            Ok(data) => data,
            Err(err) => {
                self.host
                    .add_return_message(&format!("cannot get registration data: error {err}"));
                return ReturnCode::UserError;
            }
        };
        if !registration.is_registered() {
            self.host
                .add_return_message("key is not registered, updateStakingV2 is not possible");
            return ReturnCode::UserError;
        }

        for bls_key in &registration.bls_pub_keys {
            if !self.set_owner_of_bls_key(bls_key, &call.arguments[0]) {
                return ReturnCode::UserError;
            }
        }

        ReturnCode::Ok
    }

    fn set_owner_of_bls_key(&self, bls_key: &[u8], owner: &[u8]) -> bool {
        match self.execute_on_staking_registry(&set_owner_command(bls_key, owner)) {
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot set owner for key {}, error {err}",
                    hex::encode(bls_key)
                ));
                self.events.emit(bls_key, KeyResultCode::Failed);
                false
            }
            Ok(output) if output.return_code != ReturnCode::Ok => {
                self.host.add_return_message(&format!(
                    "cannot set owner for key {}, error {}",
                    hex::encode(bls_key),
                    output.return_code
                ));
                self.events.emit(bls_key, KeyResultCode::Failed);
                false
            }
            Ok(_) => true,
        }
    }

    /// Drops duplicate key entries accumulated before double-key
    /// protection, keeping each key's first occurrence.
    fn clean_registered_data(&self, call: &ContractCall, gas: &GasCosts) -> ReturnCode {
        if !self.flags.double_key_protection() {
            self.host.add_return_message(INVALID_METHOD);
            return ReturnCode::UserError;
        }

        if self.host.use_gas(gas.stake).is_err() {
            self.host.add_return_message(INSUFFICIENT_GAS);
            return ReturnCode::OutOfGas;
        }
        if !call.call_value.is_zero() {
            self.host.add_return_message("must be called with 0 value");
            return ReturnCode::UserError;
        }
        if !call.arguments.is_empty() {
            self.host
                .add_return_message("must be called with 0 arguments");
            return ReturnCode::UserError;
        }

        let mut registration = match self.store.load_or_default(&call.caller) {
            Ok(data) => data,
            Err(err) => {
                self.host.add_return_message(&format!(
                    "cannot get or create registration data: error {err}"
                ));
                return ReturnCode::UserError;
            }
        };

        if registration.bls_pub_keys.len() <= 1 {
            return ReturnCode::Ok;
        }

        let (deduped, changed) = dedupe_keys(&registration.bls_pub_keys);
        if !changed {
            return ReturnCode::Ok;
        }

        registration.bls_pub_keys = deduped;
        if let Err(err) = self.store.save(&call.caller, &registration) {
            self.host
                .add_return_message(&format!("cannot save registration data: error {err}"));
            return ReturnCode::UserError;
        }

        ReturnCode::Ok
    }

    fn pause_unstake_unbond(&self, call: &ContractCall) -> ReturnCode {
        if !self.flags.top_up_enabled() {
            self.host.add_return_message(INVALID_METHOD);
            return ReturnCode::UserError;
        }
        if call.caller != self.end_of_epoch_address {
            self.host
                .add_return_message("only end of epoch address can call");
            return ReturnCode::UserError;
        }

        self.store.set_unstake_unbond_pause(true);
        debug!("unStake/unBond paused");
        ReturnCode::Ok
    }

    fn unpause_unstake_unbond(&self, call: &ContractCall) -> ReturnCode {
        if !self.flags.top_up_enabled() {
            self.host.add_return_message(INVALID_METHOD);
            return ReturnCode::UserError;
        }
        if call.caller != self.end_of_epoch_address {
            self.host
                .add_return_message("only end of epoch address can call");
            return ReturnCode::UserError;
        }

        self.store.set_unstake_unbond_pause(false);
        debug!("unStake/unBond unpaused");
        ReturnCode::Ok
    }
}

impl EpochSubscriber for ValidatorContract {
    fn epoch_confirmed(&self, epoch: u32) {
        self.flags.epoch_confirmed(epoch);
    }
}

fn verify_bls_public_keys(
    registration: &ValidatorData,
    bls_keys: &[Vec<u8>],
) -> RegistryResult<()> {
    for bls_key in bls_keys {
        if !registration.holds_key(bls_key) {
            return Err(RegistryError::BlsKeyMismatch);
        }
    }
    Ok(())
}

fn is_num_args_correct_to_stake(args: &[Vec<u8>]) -> bool {
    let max_nodes_to_run = u64_from_be_bytes(&args[0]) as u128;
    args.len() as u128 >= 2 * max_nodes_to_run + 1
}

fn contains_double_keys(bls_keys: &[Vec<u8>]) -> bool {
    let mut seen = HashSet::new();
    for bls_key in bls_keys {
        if !seen.insert(bls_key.as_slice()) {
            return true;
        }
    }
    false
}

fn dedupe_keys(bls_keys: &[Vec<u8>]) -> (Vec<Vec<u8>>, bool) {
    let mut seen = HashSet::new();
    let mut deduped = Vec::with_capacity(bls_keys.len());
    let mut changed = false;
    for bls_key in bls_keys {
        if !seen.insert(bls_key.as_slice()) {
            changed = true;
            continue;
        }
        deduped.push(bls_key.clone());
    }
    (deduped, changed)
}

fn delete_unbonded_keys(registration: &mut ValidatorData, unbonded_keys: &[Vec<u8>]) {
    for unbonded in unbonded_keys {
        if let Some(position) = registration
            .bls_pub_keys
            .iter()
            .position(|key| key == unbonded)
        {
            registration.bls_pub_keys.swap_remove(position);
        }
    }
}

fn register_command(bls_key: &[u8], reward_address: &[u8], owner: &[u8]) -> Vec<u8> {
    format!(
        "register@{}@{}@{}@",
        hex::encode(bls_key),
        hex::encode(reward_address),
        hex::encode(owner)
    )
    .into_bytes()
}

fn stake_command(bls_key: &[u8], reward_address: &[u8], owner: &[u8]) -> Vec<u8> {
    format!(
        "stake@{}@{}@{}",
        hex::encode(bls_key),
        hex::encode(reward_address),
        hex::encode(owner)
    )
    .into_bytes()
}

fn unstake_command(bls_key: &[u8], reward_address: &[u8]) -> Vec<u8> {
    format!(
        "unStake@{}@{}",
        hex::encode(bls_key),
        hex::encode(reward_address)
    )
    .into_bytes()
}

fn unbond_command(bls_key: &[u8]) -> Vec<u8> {
    format!("unBond@{}", hex::encode(bls_key)).into_bytes()
}

fn unjail_command(bls_key: &[u8]) -> Vec<u8> {
    format!("unJail@{}", hex::encode(bls_key)).into_bytes()
}

fn set_owner_command(bls_key: &[u8], owner: &[u8]) -> Vec<u8> {
    format!(
        "setOwner@{}@{}",
        hex::encode(bls_key),
        hex::encode(owner)
    )
    .into_bytes()
}

fn change_reward_address_command(reward_address: &[u8], bls_keys: &[Vec<u8>]) -> Vec<u8> {
    let mut command = format!("changeRewardAddress@{}", hex::encode(reward_address));
    for bls_key in bls_keys {
        command.push('@');
        command.push_str(&hex::encode(bls_key));
    }
    command.into_bytes()
}

fn get_command(bls_key: &[u8]) -> Vec<u8> {
    format!("get@{}", hex::encode(bls_key)).into_bytes()
}

fn bls_key_status_command(bls_key: &[u8]) -> Vec<u8> {
    format!("getBLSKeyStatus@{}", hex::encode(bls_key)).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_follow_the_wire_format() {
        let bls_key = [0xaa, 0xbb];
        let reward = [0x01, 0x02];
        let owner = [0x03];
        assert_eq!(
            register_command(&bls_key, &reward, &owner),
            b"register@aabb@0102@03@".to_vec()
        );
        assert_eq!(
            stake_command(&bls_key, &reward, &owner),
            b"stake@aabb@0102@03".to_vec()
        );
        assert_eq!(
            unstake_command(&bls_key, &reward),
            b"unStake@aabb@0102".to_vec()
        );
        assert_eq!(unbond_command(&bls_key), b"unBond@aabb".to_vec());
        assert_eq!(unjail_command(&bls_key), b"unJail@aabb".to_vec());
        assert_eq!(
            set_owner_command(&bls_key, &owner),
            b"setOwner@aabb@03".to_vec()
        );
        assert_eq!(get_command(&bls_key), b"get@aabb".to_vec());
        assert_eq!(
            bls_key_status_command(&bls_key),
            b"getBLSKeyStatus@aabb".to_vec()
        );
        assert_eq!(
            change_reward_address_command(&reward, &[bls_key.to_vec(), vec![0xcc]]),
            b"changeRewardAddress@0102@aabb@cc".to_vec()
        );
    }

    #[test]
    fn stake_arity_check() {
        let two_nodes = vec![vec![2u8]];
        assert!(!is_num_args_correct_to_stake(&two_nodes));

        let args = vec![vec![2u8], vec![1], vec![2], vec![3], vec![4]];
        assert!(is_num_args_correct_to_stake(&args));

        let short = vec![vec![2u8], vec![1], vec![2], vec![3]];
        assert!(!is_num_args_correct_to_stake(&short));
    }

    #[test]
    fn double_key_detection() {
        let unique = vec![vec![1u8], vec![2u8]];
        assert!(!contains_double_keys(&unique));
        let doubled = vec![vec![1u8], vec![2u8], vec![1u8]];
        assert!(contains_double_keys(&doubled));
    }

    #[test]
    fn dedupe_preserves_first_occurrence() {
        let keys = vec![vec![1u8], vec![2u8], vec![1u8], vec![3u8], vec![2u8]];
        let (deduped, changed) = dedupe_keys(&keys);
        assert!(changed);
        assert_eq!(deduped, vec![vec![1u8], vec![2u8], vec![3u8]]);

        let (fixed_point, changed_again) = dedupe_keys(&deduped);
        assert!(!changed_again);
        assert_eq!(fixed_point, deduped);
    }

    #[test]
    fn unbonded_keys_are_swap_removed() {
        let mut registration = ValidatorData {
            bls_pub_keys: vec![vec![1u8], vec![2u8], vec![3u8]],
            ..ValidatorData::default()
        };
        delete_unbonded_keys(&mut registration, &[vec![1u8]]);
        assert_eq!(registration.bls_pub_keys, vec![vec![3u8], vec![2u8]]);
        delete_unbonded_keys(&mut registration, &[vec![9u8]]);
        assert_eq!(registration.bls_pub_keys.len(), 2);
    }

    #[test]
    fn missing_keys_fail_ownership_check() {
        let registration = ValidatorData {
            bls_pub_keys: vec![vec![1u8], vec![2u8]],
            ..ValidatorData::default()
        };
        assert!(verify_bls_public_keys(&registration, &[vec![1u8], vec![2u8]]).is_ok());
        assert!(verify_bls_public_keys(&registration, &[vec![1u8], vec![7u8]]).is_err());
    }
}
