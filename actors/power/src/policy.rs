// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_actors_runtime::runtime::Policy;
use fvm_shared::sector::StoragePower;
use lazy_static::lazy_static;

lazy_static! {
    /// Position of the smoothed network QA power estimate before the first observation.
    pub static ref INITIAL_QA_POWER_ESTIMATE_POSITION: StoragePower =
        StoragePower::from(750_000) * (1 << 30);
    /// Velocity of the smoothed network QA power estimate before the first observation.
    pub static ref INITIAL_QA_POWER_ESTIMATE_VELOCITY: StoragePower =
        StoragePower::from(3_840) * (1 << 30);
}

/// Number of miners to challenge in one epoch, so that each miner expects a surprise challenge
/// once per `surprise_challenge_period` epochs.
pub fn surprise_challenge_count(policy: &Policy, miner_count: u64) -> u64 {
    if policy.surprise_challenge_period == 0 {
        return miner_count;
    }
    (miner_count + policy.surprise_challenge_period - 1) / policy.surprise_challenge_period
}
