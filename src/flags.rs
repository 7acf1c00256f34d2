use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Epoch-gated feature flags. Each flag tracks whether the current epoch
/// has reached its activation threshold; re-confirming the same epoch is
/// idempotent.
#[derive(Debug)]
pub struct FeatureFlags {
    stake_enable_epoch: u32,
    staking_v2_epoch: u32,
    double_key_epoch: u32,
    staking_enabled: AtomicBool,
    top_up_enabled: AtomicBool,
    double_key_protection: AtomicBool,
}

impl FeatureFlags {
    pub fn new(stake_enable_epoch: u32, staking_v2_epoch: u32, double_key_epoch: u32) -> Self {
        Self {
            stake_enable_epoch,
            staking_v2_epoch,
            double_key_epoch,
            staking_enabled: AtomicBool::new(false),
            top_up_enabled: AtomicBool::new(false),
            double_key_protection: AtomicBool::new(false),
        }
    }

    pub fn epoch_confirmed(&self, epoch: u32) {
        self.staking_enabled
            .store(epoch >= self.stake_enable_epoch, Ordering::Relaxed);
        debug!(enabled = self.staking_enabled(), "stake/unstake/unbond");

        self.top_up_enabled
            .store(epoch >= self.staking_v2_epoch, Ordering::Relaxed);
        debug!(enabled = self.top_up_enabled(), "top up mechanism");

        self.double_key_protection
            .store(epoch >= self.double_key_epoch, Ordering::Relaxed);
        debug!(enabled = self.double_key_protection(), "double key protection");
    }

    pub fn staking_enabled(&self) -> bool {
        self.staking_enabled.load(Ordering::Relaxed)
    }

    pub fn top_up_enabled(&self) -> bool {
        self.top_up_enabled.load(Ordering::Relaxed)
    }

    pub fn double_key_protection(&self) -> bool {
        self.double_key_protection.load(Ordering::Relaxed)
    }
}
