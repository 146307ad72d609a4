// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_actors_runtime::network::*;
use fil_actors_runtime::runtime::Policy;
pub use fil_actors_runtime::runtime::VestSpec;
use fil_actors_runtime::DealWeight;
use fvm_shared::bigint::{BigInt, Integer};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{SectorQuality, SectorSize, StoragePower};
use num_traits::Signed;

use super::types::{PowerPair, SectorOnChainInfo, SectorStorageWeightDesc};

/// DealWeight and VerifiedDealWeight are spacetime occupied by regular deals and verified deals in a sector.
/// Sum of DealWeight and VerifiedDealWeight should be less than or equal to total SpaceTime of a sector.
/// Sectors full of VerifiedDeals will have a SectorQuality of VerifiedDealWeightMultiplier/QualityBaseMultiplier.
/// Sectors full of Deals will have a SectorQuality of DealWeightMultiplier/QualityBaseMultiplier.
/// Sectors with neither will have a SectorQuality of QualityBaseMultiplier/QualityBaseMultiplier.
/// SectorQuality of a sector is a weighted average of multipliers based on their proportions.
pub fn quality_for_weight(
    policy: &Policy,
    size: SectorSize,
    duration: ChainEpoch,
    deal_weight: &DealWeight,
    verified_weight: &DealWeight,
) -> SectorQuality {
    let sector_space_time = BigInt::from(size as u64) * BigInt::from(duration);
    if !sector_space_time.is_positive() {
        // A sector with no lifetime carries base quality.
        return BigInt::from(1) << policy.sector_quality_precision;
    }
    let total_deal_space_time = deal_weight + verified_weight;

    let base_multiplier = BigInt::from(policy.quality_base_multiplier);
    let weighted_base_space_time = (&sector_space_time - total_deal_space_time) * &base_multiplier;
    let weighted_deal_space_time = deal_weight * BigInt::from(policy.deal_weight_multiplier);
    let weighted_verified_space_time =
        verified_weight * BigInt::from(policy.verified_deal_weight_multiplier);
    let weighted_sum_space_time =
        weighted_base_space_time + weighted_deal_space_time + weighted_verified_space_time;
    let scaled_up_weighted_sum_space_time: SectorQuality =
        weighted_sum_space_time << policy.sector_quality_precision;

    scaled_up_weighted_sum_space_time.div_floor(&sector_space_time).div_floor(&base_multiplier)
}

/// Returns the quality-adjusted power for a sector size and weight.
pub fn qa_power_for_weight(
    policy: &Policy,
    size: SectorSize,
    duration: ChainEpoch,
    deal_weight: &DealWeight,
    verified_weight: &DealWeight,
) -> StoragePower {
    let quality = quality_for_weight(policy, size, duration, deal_weight, verified_weight);
    (BigInt::from(size as u64) * quality) >> policy.sector_quality_precision
}

/// Returns the raw and quality-adjusted power described by a weight.
pub fn power_for_weight(policy: &Policy, weight: &SectorStorageWeightDesc) -> PowerPair {
    PowerPair {
        raw: BigInt::from(weight.sector_size as u64),
        qa: qa_power_for_weight(
            policy,
            weight.sector_size,
            weight.duration,
            &weight.deal_weight,
            &weight.verified_deal_weight,
        ),
    }
}

/// Sums the power of many weights.
pub fn power_for_weights(policy: &Policy, weights: &[SectorStorageWeightDesc]) -> PowerPair {
    weights.iter().fold(PowerPair::zero(), |mut acc, w| {
        acc += &power_for_weight(policy, w);
        acc
    })
}

/// Describes a proven sector's weight, from activation to expiration.
pub fn weight_for_sector(sector_size: SectorSize, sector: &SectorOnChainInfo) -> SectorStorageWeightDesc {
    SectorStorageWeightDesc {
        sector_size,
        duration: sector.info.expiration - sector.activation_epoch,
        deal_weight: sector.deal_weight.clone(),
        verified_deal_weight: sector.verified_deal_weight.clone(),
    }
}

/// Share of a slashed miner's balance paid to the reporter of its consensus fault.
///
/// The share starts at the initial fraction at the fault epoch and grows geometrically with
/// every elapsed epoch until it reaches the maximum share. The growth is computed one epoch at a
/// time in exact rational arithmetic and stops as soon as the cap is hit.
pub fn reward_for_consensus_slash_report(
    policy: &Policy,
    elapsed_epoch: ChainEpoch,
    collateral: &TokenAmount,
) -> TokenAmount {
    let max_num = BigInt::from(policy.consensus_fault_reporter_max_share_num);
    let max_denom = BigInt::from(policy.consensus_fault_reporter_max_share_denom);
    let growth_num = BigInt::from(policy.consensus_fault_reporter_share_growth_rate_num);
    let growth_denom = BigInt::from(policy.consensus_fault_reporter_share_growth_rate_denom);

    let mut share_num = BigInt::from(policy.consensus_fault_reporter_initial_share_num);
    let mut share_denom = BigInt::from(policy.consensus_fault_reporter_initial_share_denom);
    let mut capped = &share_num * &max_denom >= &max_num * &share_denom;
    let mut epoch = 0;
    while epoch < elapsed_epoch && !capped {
        share_num *= &growth_num;
        share_denom *= &growth_denom;
        capped = &share_num * &max_denom >= &max_num * &share_denom;
        epoch += 1;
    }

    let collateral = collateral.atto();
    let max_reward = (collateral * &max_num).div_floor(&max_denom);
    if capped {
        return TokenAmount::from_atto(max_reward);
    }
    let reward = (collateral * share_num).div_floor(&share_denom);
    TokenAmount::from_atto(std::cmp::min(reward, max_reward))
}
