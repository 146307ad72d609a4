// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp;

use fil_actors_runtime::network::EPOCHS_IN_DAY;
use fil_actors_runtime::reward::math::PRECISION;
use fil_actors_runtime::reward::{smooth, FilterEstimate};
use fil_actors_runtime::runtime::Policy;
use fil_actors_runtime::EXPECTED_LEADERS_PER_EPOCH;
use fvm_shared::bigint::Integer;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::StoragePower;
use num_traits::Zero;

/// The projected block reward a sector would earn over some period.
/// Also known as "BR(t)".
/// BR(t) = ProjectedRewardFraction(t) * SectorQualityAdjustedPower
/// ProjectedRewardFraction(t) is the sum of estimated reward over estimated total power
/// over all epochs in the projection period [t t+projectionDuration]
pub fn expected_reward_for_power(
    reward_estimate: &FilterEstimate,
    network_qa_power_estimate: &FilterEstimate,
    qa_sector_power: &StoragePower,
    projection_duration: ChainEpoch,
) -> TokenAmount {
    let network_qa_power_smoothed = network_qa_power_estimate.estimate();

    if network_qa_power_smoothed.is_zero() {
        return TokenAmount::from_atto(reward_estimate.estimate());
    }

    let expected_reward_for_proving_period = smooth::extrapolated_cum_sum_of_ratio(
        projection_duration,
        0,
        reward_estimate,
        network_qa_power_estimate,
    );
    let br128 = qa_sector_power * expected_reward_for_proving_period; // Q.0 * Q.128 => Q.128
    TokenAmount::from_atto(cmp::max(br128 >> PRECISION, Default::default()))
}

// BR but zero values are clamped at 1 attofil
// Some uses of BR (PCD, IP) require a strictly positive value for BR derived values so
// accounting variables can be used as succinct indicators of miner activity.
pub fn expected_reward_for_power_clamped_at_atto_fil(
    reward_estimate: &FilterEstimate,
    network_qa_power_estimate: &FilterEstimate,
    qa_sector_power: &StoragePower,
    projection_duration: ChainEpoch,
) -> TokenAmount {
    let br = expected_reward_for_power(
        reward_estimate,
        network_qa_power_estimate,
        qa_sector_power,
        projection_duration,
    );
    if br.le(&TokenAmount::zero()) {
        TokenAmount::from_atto(1)
    } else {
        br
    }
}

/// The FF(t) penalty for a sector expected to be in the fault state, either because the fault
/// was declared or because it was detected by the network in an earlier proving period.
/// FF(t) = BR(t, DeclaredFaultProjectionPeriod)
pub fn pledge_penalty_for_declared_fault(
    policy: &Policy,
    reward_estimate: &FilterEstimate,
    network_qa_power_estimate: &FilterEstimate,
    qa_sector_power: &StoragePower,
) -> TokenAmount {
    expected_reward_for_power(
        reward_estimate,
        network_qa_power_estimate,
        qa_sector_power,
        policy.declared_fault_projection_period,
    )
}

/// The SP(t) penalty for a newly faulty sector that has not been declared.
/// SP(t) = BR(t, UndeclaredFaultProjectionPeriod)
pub fn pledge_penalty_for_undeclared_fault(
    policy: &Policy,
    reward_estimate: &FilterEstimate,
    network_qa_power_estimate: &FilterEstimate,
    qa_sector_power: &StoragePower,
) -> TokenAmount {
    expected_reward_for_power(
        reward_estimate,
        network_qa_power_estimate,
        qa_sector_power,
        policy.undeclared_fault_projection_period,
    )
}

/// Penalty to locked pledge collateral for the termination of a sector before scheduled expiry.
/// max(SP(t), BR(StartEpoch, TerminationRewardDays) + BR(StartEpoch, 1d) * min(SectorAgeInDays, TerminationLifetimeCap))
pub fn pledge_penalty_for_termination(
    policy: &Policy,
    day_reward: &TokenAmount,
    sector_age: ChainEpoch,
    termination_reward: &TokenAmount,
    network_qa_power_estimate: &FilterEstimate,
    qa_sector_power: &StoragePower,
    reward_estimate: &FilterEstimate,
) -> TokenAmount {
    let lifetime_cap = policy.termination_lifetime_cap * EPOCHS_IN_DAY;
    let capped_sector_age = cmp::max(cmp::min(sector_age, lifetime_cap), 0);
    // epochs * attoFIL / day
    let expected_reward = day_reward * capped_sector_age;

    cmp::max(
        pledge_penalty_for_undeclared_fault(
            policy,
            reward_estimate,
            network_qa_power_estimate,
            qa_sector_power,
        ),
        termination_reward.clone() + expected_reward.div_floor(EPOCHS_IN_DAY),
    )
}

/// Computes the PreCommit deposit given sector qa weight and current network conditions.
/// PreCommit Deposit = BR(PreCommitDepositProjectionPeriod)
pub fn pre_commit_deposit_for_power(
    policy: &Policy,
    reward_estimate: &FilterEstimate,
    network_qa_power_estimate: &FilterEstimate,
    qa_sector_power: &StoragePower,
) -> TokenAmount {
    expected_reward_for_power_clamped_at_atto_fil(
        reward_estimate,
        network_qa_power_estimate,
        qa_sector_power,
        policy.precommit_deposit_projection_period,
    )
}

/// Computes the pledge requirement for committing new quality-adjusted power to the network, given
/// the current network total and baseline power, per-epoch reward, and circulating token supply.
///
/// IP = IPBase(t) + AdditionalIP(t)
/// IPBase(t) = BR(t, InitialPledgeProjectionPeriod)
/// AdditionalIP(t) = LockTarget(t)*PledgeShare(t)
/// LockTarget = (LockTargetFactorNum / LockTargetFactorDenom) * FILCirculatingSupply(t)
/// PledgeShare(t) = sectorQAPower / max(BaselinePower(t), NetworkQAPower(t))
pub fn initial_pledge_for_power(
    policy: &Policy,
    qa_power: &StoragePower,
    baseline_power: &StoragePower,
    reward_estimate: &FilterEstimate,
    network_qa_power_estimate: &FilterEstimate,
    circulating_supply: &TokenAmount,
) -> TokenAmount {
    let ip_base = expected_reward_for_power_clamped_at_atto_fil(
        reward_estimate,
        network_qa_power_estimate,
        qa_power,
        policy.initial_pledge_projection_period,
    );

    let lock_target_num = circulating_supply.atto() * policy.initial_pledge_lock_target_num;
    let lock_target_denom = policy.initial_pledge_lock_target_denom;
    let pledge_share_num = qa_power;
    let network_qa_power = network_qa_power_estimate.estimate();
    // use qa_power in case others are 0
    let pledge_share_denom = cmp::max(cmp::max(&network_qa_power, baseline_power), qa_power);
    let additional_ip_num = lock_target_num * pledge_share_num;
    let additional_ip_denom = pledge_share_denom * lock_target_denom;
    if additional_ip_denom.is_zero() {
        return ip_base;
    }
    let additional_ip = additional_ip_num.div_floor(&additional_ip_denom);

    ip_base + TokenAmount::from_atto(additional_ip)
}

/// Penalty for a consensus fault: a multiple of the expected per-winner reward.
pub fn consensus_fault_penalty(policy: &Policy, this_epoch_reward: TokenAmount) -> TokenAmount {
    (this_epoch_reward * policy.consensus_fault_factor).div_floor(EXPECTED_LEADERS_PER_EPOCH)
}
