// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::clock::ChainEpoch;
use fvm_shared::sector::RegisteredSealProof;

pub trait RuntimePolicy {
    fn policy(&self) -> &Policy;
}

/// The policy itself
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Policy {
    // --- proving geometry ---
    /// The period over which all a miner's active sectors will be challenged.
    pub wpost_proving_period: ChainEpoch,
    /// The duration of a deadline's challenge window, the period before a deadline when the challenge is available.
    pub wpost_challenge_window: ChainEpoch,
    /// The number of non-overlapping PoSt deadlines in each proving period.
    pub wpost_period_deadlines: u64,
    /// Lookback from the deadline's challenge window opening from which to sample chain randomness for the challenge seed.
    pub wpost_challenge_lookback: ChainEpoch,
    /// Minimum period before a deadline's challenge window opens that a fault must be declared for that deadline.
    pub fault_declaration_cutoff: ChainEpoch,
    /// The maximum age of a fault before the sector is terminated.
    pub fault_max_age: ChainEpoch,
    /// Staging period for a miner worker key change.
    pub worker_key_change_delay: ChainEpoch,
    /// Maximum number of partitions that may be proven in a single PoSt message.
    pub wpost_message_partitions_max: u64,
    /// Maximum number of sectors that may be proven-committed within one proving period.
    pub new_sectors_per_period_max: u64,
    /// Number of consecutive proving periods with missed PoSts after which power deregisters a miner.
    pub wpost_max_consecutive_failures: i64,

    // --- sealing ---
    /// Epochs after which chain state is final with overwhelming probability.
    pub chain_finality: ChainEpoch,
    /// Number of epochs between publishing the precommit and when the challenge for interactive PoRep is drawn.
    pub pre_commit_challenge_delay: ChainEpoch,
    /// Maximum duration to allow for the sealing process, per seal algorithm.
    pub max_seal_duration: SealDurations,

    // --- economics ---
    /// Number of epochs of expected reward used to size a precommit deposit.
    pub precommit_deposit_projection_period: ChainEpoch,
    /// Number of epochs of expected reward used as the base of the initial pledge.
    pub initial_pledge_projection_period: ChainEpoch,
    /// Share of the circulating supply the network targets to be locked as pledge.
    pub initial_pledge_lock_target_num: u64,
    pub initial_pledge_lock_target_denom: u64,
    /// Number of epochs of expected reward charged per proving period for a declared fault.
    pub declared_fault_projection_period: ChainEpoch,
    /// Number of epochs of expected reward charged for a fault detected by a missed PoSt.
    pub undeclared_fault_projection_period: ChainEpoch,
    /// Number of days of sector age that count towards the termination penalty.
    pub termination_lifetime_cap: ChainEpoch,
    /// Number of days of expected reward charged as the base of a termination fee.
    pub termination_reward_days: ChainEpoch,
    /// Multiple of the epoch reward slashed for a consensus fault.
    pub consensus_fault_factor: u64,
    /// Vesting schedule of initial pledge.
    pub pledge_vesting: VestSpec,
    /// Vesting schedule of block rewards.
    pub reward_vesting: VestSpec,

    // --- sector quality ---
    /// Quality multiplier for committed capacity.
    pub quality_base_multiplier: i64,
    /// Quality multiplier for unverified deals.
    pub deal_weight_multiplier: i64,
    /// Quality multiplier for verified deals.
    pub verified_deal_weight_multiplier: i64,
    /// Precision used for making quality adjustments.
    pub sector_quality_precision: i64,

    // --- consensus fault reporting ---
    /// Share of the slashed amount paid to a reporter at the fault epoch.
    pub consensus_fault_reporter_initial_share_num: u64,
    pub consensus_fault_reporter_initial_share_denom: u64,
    /// Per-epoch growth of the reporter's share.
    pub consensus_fault_reporter_share_growth_rate_num: u64,
    pub consensus_fault_reporter_share_growth_rate_denom: u64,
    /// Ceiling on the reporter's share.
    pub consensus_fault_reporter_max_share_num: u64,
    pub consensus_fault_reporter_max_share_denom: u64,

    // --- power ---
    /// Expected number of epochs between surprise challenges of any one miner.
    pub surprise_challenge_period: u64,
}

impl Default for Policy {
    fn default() -> Policy {
        Policy {
            wpost_proving_period: policy_constants::WPOST_PROVING_PERIOD,
            wpost_challenge_window: policy_constants::WPOST_CHALLENGE_WINDOW,
            wpost_period_deadlines: policy_constants::WPOST_PERIOD_DEADLINES,
            wpost_challenge_lookback: policy_constants::WPOST_CHALLENGE_LOOKBACK,
            fault_declaration_cutoff: policy_constants::FAULT_DECLARATION_CUTOFF,
            fault_max_age: policy_constants::FAULT_MAX_AGE,
            worker_key_change_delay: policy_constants::WORKER_KEY_CHANGE_DELAY,
            wpost_message_partitions_max: policy_constants::WPOST_MESSAGE_PARTITIONS_MAX,
            new_sectors_per_period_max: policy_constants::NEW_SECTORS_PER_PERIOD_MAX,
            wpost_max_consecutive_failures: policy_constants::WPOST_MAX_CONSECUTIVE_FAILURES,
            chain_finality: policy_constants::CHAIN_FINALITY,
            pre_commit_challenge_delay: policy_constants::PRE_COMMIT_CHALLENGE_DELAY,
            max_seal_duration: SealDurations::default_seal_durations(),
            precommit_deposit_projection_period:
                policy_constants::PRECOMMIT_DEPOSIT_PROJECTION_PERIOD,
            initial_pledge_projection_period: policy_constants::INITIAL_PLEDGE_PROJECTION_PERIOD,
            initial_pledge_lock_target_num: policy_constants::INITIAL_PLEDGE_LOCK_TARGET_NUM,
            initial_pledge_lock_target_denom: policy_constants::INITIAL_PLEDGE_LOCK_TARGET_DENOM,
            declared_fault_projection_period: policy_constants::DECLARED_FAULT_PROJECTION_PERIOD,
            undeclared_fault_projection_period:
                policy_constants::UNDECLARED_FAULT_PROJECTION_PERIOD,
            termination_lifetime_cap: policy_constants::TERMINATION_LIFETIME_CAP,
            termination_reward_days: policy_constants::TERMINATION_REWARD_DAYS,
            consensus_fault_factor: policy_constants::CONSENSUS_FAULT_FACTOR,
            pledge_vesting: policy_constants::PLEDGE_VESTING,
            reward_vesting: policy_constants::REWARD_VESTING,
            quality_base_multiplier: policy_constants::QUALITY_BASE_MULTIPLIER,
            deal_weight_multiplier: policy_constants::DEAL_WEIGHT_MULTIPLIER,
            verified_deal_weight_multiplier: policy_constants::VERIFIED_DEAL_WEIGHT_MULTIPLIER,
            sector_quality_precision: policy_constants::SECTOR_QUALITY_PRECISION,
            consensus_fault_reporter_initial_share_num:
                policy_constants::CONSENSUS_FAULT_REPORTER_INITIAL_SHARE_NUM,
            consensus_fault_reporter_initial_share_denom:
                policy_constants::CONSENSUS_FAULT_REPORTER_INITIAL_SHARE_DENOM,
            consensus_fault_reporter_share_growth_rate_num:
                policy_constants::CONSENSUS_FAULT_REPORTER_SHARE_GROWTH_RATE_NUM,
            consensus_fault_reporter_share_growth_rate_denom:
                policy_constants::CONSENSUS_FAULT_REPORTER_SHARE_GROWTH_RATE_DENOM,
            consensus_fault_reporter_max_share_num:
                policy_constants::CONSENSUS_FAULT_REPORTER_MAX_SHARE_NUM,
            consensus_fault_reporter_max_share_denom:
                policy_constants::CONSENSUS_FAULT_REPORTER_MAX_SHARE_DENOM,
            surprise_challenge_period: policy_constants::SURPRISE_CHALLENGE_PERIOD,
        }
    }
}

/// Specification for a linear vesting schedule.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct VestSpec {
    /// Delay before any amount starts vesting.
    pub initial_delay: ChainEpoch,
    /// Period over which the total should vest, after the initial delay.
    pub vest_period: ChainEpoch,
    /// Duration between successive incremental vests (independent of vesting period).
    pub step_duration: ChainEpoch,
    /// Maximum precision of vesting table (limits cardinality of table).
    pub quantization: ChainEpoch,
}

/// Maximum seal durations indexed by the numeric seal proof type.
/// A proof type with no entry is not accepted for sealing.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct SealDurations(Vec<Option<ChainEpoch>>);

impl SealDurations {
    /// Seal durations for the V1 and V1_1 stacked DRG proofs of every sector size.
    pub fn default_seal_durations() -> Self {
        use RegisteredSealProof::*;
        let mut durations = SealDurations::default();
        for proof in [
            StackedDRG2KiBV1,
            StackedDRG8MiBV1,
            StackedDRG512MiBV1,
            StackedDRG32GiBV1,
            StackedDRG64GiBV1,
            StackedDRG2KiBV1P1,
            StackedDRG8MiBV1P1,
            StackedDRG512MiBV1P1,
            StackedDRG32GiBV1P1,
            StackedDRG64GiBV1P1,
        ] {
            durations.insert(proof, policy_constants::MAX_SEAL_DURATION);
        }
        durations
    }

    /// The maximum seal duration of a proof type, if the type is supported.
    pub fn get(&self, proof: RegisteredSealProof) -> Option<ChainEpoch> {
        let index = usize::try_from(i64::from(proof)).ok()?;
        self.0.get(index).copied().flatten()
    }

    pub fn insert(&mut self, proof: RegisteredSealProof, duration: ChainEpoch) {
        let Ok(index) = usize::try_from(i64::from(proof)) else {
            return;
        };
        if index >= self.0.len() {
            self.0.resize(index + 1, None);
        }
        self.0[index] = Some(duration);
    }

    pub fn remove(&mut self, proof: RegisteredSealProof) {
        if let Some(entry) =
            usize::try_from(i64::from(proof)).ok().and_then(|index| self.0.get_mut(index))
        {
            *entry = None;
        }
    }
}

pub mod policy_constants {
    use fvm_shared::clock::ChainEpoch;

    use super::VestSpec;
    use crate::builtin::*;

    pub const WPOST_PROVING_PERIOD: ChainEpoch = EPOCHS_IN_DAY;

    pub const WPOST_CHALLENGE_WINDOW: ChainEpoch = 30 * 60 / EPOCH_DURATION_SECONDS;

    pub const WPOST_PERIOD_DEADLINES: u64 = 48;

    pub const WPOST_CHALLENGE_LOOKBACK: ChainEpoch = 20;

    pub const FAULT_DECLARATION_CUTOFF: ChainEpoch = WPOST_CHALLENGE_LOOKBACK + 50;

    pub const FAULT_MAX_AGE: ChainEpoch = WPOST_PROVING_PERIOD * 14 - 1;

    pub const WORKER_KEY_CHANGE_DELAY: ChainEpoch = 2;

    pub const WPOST_MESSAGE_PARTITIONS_MAX: u64 = 3000;

    pub const NEW_SECTORS_PER_PERIOD_MAX: u64 = 128 << 10;

    pub const WPOST_MAX_CONSECUTIVE_FAILURES: i64 = 3;

    pub const CHAIN_FINALITY: ChainEpoch = 500;

    pub const PRE_COMMIT_CHALLENGE_DELAY: ChainEpoch = 10;

    pub const MAX_SEAL_DURATION: ChainEpoch = 10000;

    pub const PRECOMMIT_DEPOSIT_PROJECTION_PERIOD: ChainEpoch = 20 * EPOCHS_IN_DAY;

    pub const INITIAL_PLEDGE_PROJECTION_PERIOD: ChainEpoch = 20 * EPOCHS_IN_DAY;

    pub const INITIAL_PLEDGE_LOCK_TARGET_NUM: u64 = 3;
    pub const INITIAL_PLEDGE_LOCK_TARGET_DENOM: u64 = 10;

    /// 2.14 days of expected reward.
    pub const DECLARED_FAULT_PROJECTION_PERIOD: ChainEpoch = (EPOCHS_IN_DAY * 214) / 100;

    pub const UNDECLARED_FAULT_PROJECTION_PERIOD: ChainEpoch = 5 * EPOCHS_IN_DAY;

    pub const TERMINATION_LIFETIME_CAP: ChainEpoch = 70;

    pub const TERMINATION_REWARD_DAYS: ChainEpoch = 20;

    pub const CONSENSUS_FAULT_FACTOR: u64 = 5;

    pub const PLEDGE_VESTING: VestSpec = VestSpec {
        initial_delay: 180 * EPOCHS_IN_DAY,
        vest_period: 180 * EPOCHS_IN_DAY,
        step_duration: EPOCHS_IN_DAY,
        quantization: 12 * EPOCHS_IN_HOUR,
    };

    pub const REWARD_VESTING: VestSpec = VestSpec {
        initial_delay: 20 * EPOCHS_IN_DAY,
        vest_period: 180 * EPOCHS_IN_DAY,
        step_duration: EPOCHS_IN_DAY,
        quantization: 12 * EPOCHS_IN_HOUR,
    };

    pub const QUALITY_BASE_MULTIPLIER: i64 = 10;

    pub const DEAL_WEIGHT_MULTIPLIER: i64 = 10;

    pub const VERIFIED_DEAL_WEIGHT_MULTIPLIER: i64 = 100;

    pub const SECTOR_QUALITY_PRECISION: i64 = 20;

    pub const CONSENSUS_FAULT_REPORTER_INITIAL_SHARE_NUM: u64 = 1;
    pub const CONSENSUS_FAULT_REPORTER_INITIAL_SHARE_DENOM: u64 = 1000;

    /// Approximately doubles every 30 epochs.
    pub const CONSENSUS_FAULT_REPORTER_SHARE_GROWTH_RATE_NUM: u64 = 101101;
    pub const CONSENSUS_FAULT_REPORTER_SHARE_GROWTH_RATE_DENOM: u64 = 100000;

    pub const CONSENSUS_FAULT_REPORTER_MAX_SHARE_NUM: u64 = 1;
    pub const CONSENSUS_FAULT_REPORTER_MAX_SHARE_DENOM: u64 = 2;

    pub const SURPRISE_CHALLENGE_PERIOD: u64 = 2880;
}
