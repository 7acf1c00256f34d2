#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use validator_registry::config::ContractSettings;
use validator_registry::contract::{ValidatorContract, ValidatorContractArgs, INIT_FUNCTION_NAME};
use validator_registry::errors::{RegistryError, RegistryResult};
use validator_registry::interfaces::{
    BincodeMarshaler, EpochNotifier, EpochSubscriber, HostEnv, Marshaler, MessageVerifier,
};
use validator_registry::types::{ContractCall, ReturnCode, StakedData, TokenAmount, VmOutput};

pub const STAKING_ADDRESS: [u8; 32] = [1u8; 32];
pub const VALIDATOR_ADDRESS: [u8; 32] = [2u8; 32];
pub const END_OF_EPOCH_ADDRESS: [u8; 32] = [3u8; 32];

pub const NODE_PRICE: u64 = 2_500;
pub const UNJAIL_PRICE: u64 = 10;
pub const UNBOND_PERIOD: u64 = 50;
pub const TOP_UP_EPOCH: u32 = 10;
pub const DOUBLE_KEY_EPOCH: u32 = 20;

/// Per-key record held by the scripted staking registry.
#[derive(Clone, Debug, Default)]
pub struct NodeRecord {
    pub staked: bool,
    pub waiting: bool,
    pub unstaked_nonce: u64,
    pub owner: Vec<u8>,
    pub reward_address: Vec<u8>,
}

#[derive(Default)]
struct StakingRegistryState {
    nodes: HashMap<Vec<u8>, NodeRecord>,
    failing: HashSet<(String, Vec<u8>)>,
    queued: HashSet<Vec<u8>>,
    commands: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub to: Vec<u8>,
    pub from: Vec<u8>,
    pub value: TokenAmount,
}

/// In-memory host: contract-scoped storage, gas meter, finish stream,
/// transfer log, and the scripted sibling staking registry behind
/// `execute_on_dest_context`.
pub struct MockHost {
    storage: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    nonce: AtomicU64,
    epoch: AtomicU32,
    gas_used: AtomicU64,
    gas_limit: AtomicU64,
    finish_data: Mutex<Vec<Vec<u8>>>,
    messages: Mutex<Vec<String>>,
    transfers: Mutex<Vec<Transfer>>,
    registry: Mutex<StakingRegistryState>,
    marshaler: BincodeMarshaler,
}

impl Default for MockHost {
    fn default() -> Self {
        Self {
            storage: Mutex::new(HashMap::new()),
            nonce: AtomicU64::new(0),
            epoch: AtomicU32::new(0),
            gas_used: AtomicU64::new(0),
            gas_limit: AtomicU64::new(u64::MAX),
            finish_data: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            registry: Mutex::new(StakingRegistryState::default()),
            marshaler: BincodeMarshaler,
        }
    }
}

impl MockHost {
    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::Relaxed);
    }

    pub fn set_epoch(&self, epoch: u32) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    pub fn set_gas_limit(&self, limit: u64) {
        self.gas_limit.store(limit, Ordering::Relaxed);
        self.gas_used.store(0, Ordering::Relaxed);
    }

    pub fn drain_finish(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.finish_data.lock())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.transfers.lock().clone()
    }

    pub fn raw_storage(&self, key: &[u8]) -> Vec<u8> {
        self.get_storage(key)
    }

    /// Marks `operation` (`register`, `stake`, `unStake`, `unBond`,
    /// `unJail`, `setOwner`, `changeRewardAddress`, `getBLSKeyStatus`) as
    /// failing whenever it targets `bls_key`.
    pub fn fail_on(&self, operation: &str, bls_key: &[u8]) {
        self.registry
            .lock()
            .failing
            .insert((operation.to_string(), bls_key.to_vec()));
    }

    /// Marks `bls_key` so its next `stake` lands in the waiting queue.
    pub fn queue_on_stake(&self, bls_key: &[u8]) {
        self.registry.lock().queued.insert(bls_key.to_vec());
    }

    pub fn registry_commands(&self) -> Vec<String> {
        self.registry.lock().commands.clone()
    }

    pub fn node_record(&self, bls_key: &[u8]) -> Option<NodeRecord> {
        self.registry.lock().nodes.get(bls_key).cloned()
    }

    /// Seeds a key as already registered to `owner`, as if another
    /// validator had bound it earlier.
    pub fn seed_foreign_key(&self, bls_key: &[u8], owner: &[u8]) {
        self.registry.lock().nodes.insert(
            bls_key.to_vec(),
            NodeRecord {
                staked: true,
                owner: owner.to_vec(),
                reward_address: owner.to_vec(),
                ..NodeRecord::default()
            },
        );
    }

    fn user_error() -> VmOutput {
        VmOutput {
            return_code: ReturnCode::UserError,
            return_data: Vec::new(),
        }
    }

    fn handle_registry_command(&self, data: &[u8]) -> RegistryResult<VmOutput> {
        let text = String::from_utf8(data.to_vec())
            .map_err(|err| RegistryError::Execution(err.to_string()))?;
        let mut registry = self.registry.lock();
        registry.commands.push(text.clone());

        let mut parts = text.split('@');
        let name = parts.next().unwrap_or_default().to_string();
        let fields: Vec<Vec<u8>> = parts
            .map(|part| hex::decode(part).unwrap_or_default())
            .collect();
        let bls_key = fields.first().cloned().unwrap_or_default();

        if registry.failing.contains(&(name.clone(), bls_key.clone())) {
            return Ok(Self::user_error());
        }

        match name.as_str() {
            "register" => {
                let record = NodeRecord {
                    reward_address: fields.get(1).cloned().unwrap_or_default(),
                    owner: fields.get(2).cloned().unwrap_or_default(),
                    ..NodeRecord::default()
                };
                registry.nodes.insert(bls_key, record);
                Ok(VmOutput::ok())
            }
            "stake" => {
                let queued = registry.queued.contains(&bls_key);
                let Some(record) = registry.nodes.get_mut(&bls_key) else {
                    return Ok(Self::user_error());
                };
                if queued {
                    record.waiting = true;
                    return Ok(VmOutput::with_data(vec![vec![3u8]]));
                }
                record.staked = true;
                Ok(VmOutput::ok())
            }
            "unStake" => {
                let nonce = self.nonce.load(Ordering::Relaxed);
                let Some(record) = registry.nodes.get_mut(&bls_key) else {
                    return Ok(Self::user_error());
                };
                if !record.staked && !record.waiting {
                    return Ok(Self::user_error());
                }
                record.staked = false;
                record.waiting = false;
                record.unstaked_nonce = nonce;
                Ok(VmOutput::ok())
            }
            "unBond" => {
                if registry.nodes.remove(&bls_key).is_none() {
                    return Ok(Self::user_error());
                }
                Ok(VmOutput::ok())
            }
            "unJail" => {
                if registry.nodes.contains_key(&bls_key) {
                    Ok(VmOutput::ok())
                } else {
                    Ok(Self::user_error())
                }
            }
            "setOwner" => {
                let Some(record) = registry.nodes.get_mut(&bls_key) else {
                    return Ok(Self::user_error());
                };
                record.owner = fields.get(1).cloned().unwrap_or_default();
                Ok(VmOutput::ok())
            }
            "changeRewardAddress" => {
                let reward_address = bls_key;
                for key in fields.get(1..).unwrap_or(&[]) {
                    if let Some(record) = registry.nodes.get_mut(key) {
                        record.reward_address = reward_address.clone();
                    }
                }
                Ok(VmOutput::ok())
            }
            "get" => match registry.nodes.get(&bls_key) {
                Some(record) => {
                    let staked_data = StakedData {
                        staked: record.staked,
                        waiting: record.waiting,
                        unstaked_nonce: record.unstaked_nonce,
                    };
                    let bytes = self.marshaler.marshal_staked_data(&staked_data)?;
                    Ok(VmOutput::with_data(vec![bytes]))
                }
                None => Ok(VmOutput::with_data(vec![Vec::new()])),
            },
            "getBLSKeyStatus" => match registry.nodes.get(&bls_key) {
                Some(record) => {
                    let status: &[u8] = if record.staked {
                        b"staked"
                    } else if record.waiting {
                        b"queued"
                    } else {
                        b"unStaked"
                    };
                    Ok(VmOutput::with_data(vec![status.to_vec()]))
                }
                None => Ok(Self::user_error()),
            },
            _ => Err(RegistryError::Execution(format!(
                "unknown staking registry command {name}"
            ))),
        }
    }
}

impl HostEnv for MockHost {
    fn get_storage(&self, key: &[u8]) -> Vec<u8> {
        self.storage.lock().get(key).cloned().unwrap_or_default()
    }

    fn set_storage(&self, key: &[u8], value: &[u8]) {
        let mut storage = self.storage.lock();
        if value.is_empty() {
            storage.remove(key);
        } else {
            storage.insert(key.to_vec(), value.to_vec());
        }
    }

    fn execute_on_dest_context(
        &self,
        dest: &[u8],
        _sender: &[u8],
        _value: &TokenAmount,
        data: &[u8],
    ) -> RegistryResult<VmOutput> {
        if dest != STAKING_ADDRESS.as_slice() {
            return Err(RegistryError::Execution("unknown destination".to_string()));
        }
        self.handle_registry_command(data)
    }

    fn transfer(&self, to: &[u8], from: &[u8], value: &TokenAmount) -> RegistryResult<()> {
        self.transfers.lock().push(Transfer {
            to: to.to_vec(),
            from: from.to_vec(),
            value: value.clone(),
        });
        Ok(())
    }

    fn current_nonce(&self) -> u64 {
        self.nonce.load(Ordering::Relaxed)
    }

    fn current_epoch(&self) -> u32 {
        self.epoch.load(Ordering::Relaxed)
    }

    fn finish(&self, data: &[u8]) {
        self.finish_data.lock().push(data.to_vec());
    }

    fn add_return_message(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    fn use_gas(&self, amount: u64) -> RegistryResult<()> {
        let used = self.gas_used.fetch_add(amount, Ordering::Relaxed) + amount;
        if used > self.gas_limit.load(Ordering::Relaxed) {
            return Err(RegistryError::OutOfGas);
        }
        Ok(())
    }
}

/// Accepts every signature except those over public keys listed as bad.
#[derive(Default)]
pub struct ScriptedVerifier {
    invalid_keys: Mutex<HashSet<Vec<u8>>>,
}

impl ScriptedVerifier {
    pub fn reject(&self, public_key: &[u8]) {
        self.invalid_keys.lock().insert(public_key.to_vec());
    }
}

impl MessageVerifier for ScriptedVerifier {
    fn verify(&self, _message: &[u8], _signature: &[u8], public_key: &[u8]) -> RegistryResult<()> {
        if self.invalid_keys.lock().contains(public_key) {
            return Err(RegistryError::Execution("invalid signature".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockEpochNotifier {
    subscribers: Mutex<Vec<Arc<dyn EpochSubscriber>>>,
}

impl MockEpochNotifier {
    pub fn confirm(&self, epoch: u32) {
        for subscriber in self.subscribers.lock().iter() {
            subscriber.epoch_confirmed(epoch);
        }
    }
}

impl EpochNotifier for MockEpochNotifier {
    fn register_handler(&self, subscriber: Arc<dyn EpochSubscriber>) {
        self.subscribers.lock().push(subscriber);
    }
}

pub fn test_settings() -> ContractSettings {
    ContractSettings {
        genesis_total_supply: "20000000".to_string(),
        un_jail_value: UNJAIL_PRICE.to_string(),
        min_stake_value: NODE_PRICE.to_string(),
        genesis_node_price: NODE_PRICE.to_string(),
        min_step_value: "1".to_string(),
        min_unstake_tokens_value: "1".to_string(),
        unbond_period: UNBOND_PERIOD,
        stake_enable_epoch: 0,
        staking_v2_epoch: TOP_UP_EPOCH,
        double_key_protection_enable_epoch: DOUBLE_KEY_EPOCH,
        gas_costs: Default::default(),
        staking_registry_address: hex::encode(STAKING_ADDRESS),
        validator_contract_address: hex::encode(VALIDATOR_ADDRESS),
        end_of_epoch_address: hex::encode(END_OF_EPOCH_ADDRESS),
    }
}

pub struct Fixture {
    pub host: Arc<MockHost>,
    pub verifier: Arc<ScriptedVerifier>,
    pub notifier: Arc<MockEpochNotifier>,
    pub contract: Arc<ValidatorContract>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: ContractSettings) -> Self {
        let host = Arc::new(MockHost::default());
        let verifier = Arc::new(ScriptedVerifier::default());
        let notifier = Arc::new(MockEpochNotifier::default());
        let contract = ValidatorContract::new(ValidatorContractArgs {
            host: host.clone(),
            verifier: verifier.clone(),
            marshaler: Arc::new(BincodeMarshaler),
            epoch_notifier: notifier.clone(),
            settings,
        })
        .expect("construct contract");

        let fixture = Self {
            host,
            verifier,
            notifier,
            contract,
        };
        let deploy = fixture.call(INIT_FUNCTION_NAME, &[9u8; 32], 0, vec![]);
        assert_eq!(deploy, ReturnCode::Ok);
        fixture
    }

    /// Enters the staking-enabled era at a post-genesis nonce.
    pub fn enable_staking(&self) {
        self.notifier.confirm(1);
        self.host.set_epoch(1);
        self.host.set_nonce(1);
    }

    /// Enters the top-up (staking V2) era.
    pub fn enable_top_up(&self) {
        self.notifier.confirm(TOP_UP_EPOCH);
        self.host.set_epoch(TOP_UP_EPOCH);
        if self.host.current_nonce() == 0 {
            self.host.set_nonce(1);
        }
    }

    /// Enters the double-key-protection era.
    pub fn enable_double_key_protection(&self) {
        self.notifier.confirm(DOUBLE_KEY_EPOCH);
        self.host.set_epoch(DOUBLE_KEY_EPOCH);
        if self.host.current_nonce() == 0 {
            self.host.set_nonce(1);
        }
    }

    pub fn call(
        &self,
        function: &str,
        caller: &[u8],
        value: u64,
        arguments: Vec<Vec<u8>>,
    ) -> ReturnCode {
        let call = ContractCall {
            function: function.to_string(),
            caller: caller.to_vec(),
            recipient: VALIDATOR_ADDRESS.to_vec(),
            call_value: TokenAmount::from_u64(value),
            arguments,
            gas_provided: u64::MAX,
        };
        self.contract.execute(&call)
    }

    /// `stake` with `(key, signature)` pairs; signatures are dummies, the
    /// scripted verifier decides validity by key.
    pub fn stake(&self, caller: &[u8], value: u64, bls_keys: &[&[u8]]) -> ReturnCode {
        let mut arguments = vec![vec![bls_keys.len() as u8]];
        for bls_key in bls_keys {
            arguments.push(bls_key.to_vec());
            arguments.push(b"signature".to_vec());
        }
        self.call("stake", caller, value, arguments)
    }

    pub fn registration(&self, owner: &[u8]) -> validator_registry::types::ValidatorData {
        let bytes = self.host.raw_storage(owner);
        assert!(!bytes.is_empty(), "no registration stored for owner");
        BincodeMarshaler
            .unmarshal_registration(&bytes)
            .expect("decode registration")
    }

    pub fn registration_exists(&self, owner: &[u8]) -> bool {
        !self.host.raw_storage(owner).is_empty()
    }

    pub fn total_transferred_to(&self, address: &[u8]) -> TokenAmount {
        let mut total = TokenAmount::zero();
        for transfer in self.host.transfers() {
            if transfer.to == address {
                total.add_assign(&transfer.value);
            }
        }
        total
    }

    /// Finish stream decoded as `(key, code)` pairs.
    pub fn key_results(&self) -> Vec<(Vec<u8>, u8)> {
        let data = self.host.drain_finish();
        data.chunks(2)
            .filter(|chunk| chunk.len() == 2 && chunk[1].len() == 1)
            .map(|chunk| (chunk[0].clone(), chunk[1][0]))
            .collect()
    }
}

pub fn wallet(tag: u8) -> Vec<u8> {
    vec![tag; 32]
}

pub fn bls_key(tag: u8) -> Vec<u8> {
    vec![tag; 96]
}
