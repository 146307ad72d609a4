// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::iter;

use fvm_ipld_encoding::tuple::*;
use fvm_shared::clock::{ChainEpoch, QuantSpec};
use fvm_shared::econ::TokenAmount;
use itertools::{EitherOrBoth, Itertools, PeekingNext};
use num_traits::Zero;

use super::VestSpec;

// Represents miner funds that will vest at the given epoch.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct VestingFund {
    pub epoch: ChainEpoch,
    pub amount: TokenAmount,
}

/// Represents the vesting table state for the miner.
/// It is a slice of (VestingEpoch, VestingAmount).
/// The slice will always be sorted by the VestingEpoch.
#[derive(Serialize_tuple, Deserialize_tuple, Default, Debug, Clone, PartialEq, Eq)]
pub struct VestingFunds {
    pub funds: Vec<VestingFund>,
}

/// Take vested funds from the passed iterator. This assumes the iterator returns `VestingFund`s in
/// epoch order.
fn take_vested(
    iter: &mut impl PeekingNext<Item = VestingFund>,
    current_epoch: ChainEpoch,
) -> TokenAmount {
    iter.peeking_take_while(|fund| fund.epoch < current_epoch).map(|f| f.amount).sum()
}

impl VestingFunds {
    pub fn new() -> Self {
        Default::default()
    }

    /// Removes every entry that has vested by the current epoch and returns the sum.
    pub fn unlock_vested_funds(&mut self, current_epoch: ChainEpoch) -> TokenAmount {
        let mut funds = std::mem::take(&mut self.funds).into_iter().peekable();
        let unlocked = take_vested(&mut funds, current_epoch);
        self.funds = funds.collect();
        unlocked
    }

    /// Adds locked funds according to a vesting schedule, and unlocks everything that has
    /// already vested.
    pub fn add_locked_funds(
        &mut self,
        current_epoch: ChainEpoch,
        vesting_sum: &TokenAmount,
        proving_period_start: ChainEpoch,
        spec: &VestSpec,
    ) -> TokenAmount {
        // Nothing unlocks here, this is just the start of the clock.
        let vest_begin = current_epoch + spec.initial_delay;
        let quant = QuantSpec { unit: spec.quantization, offset: proving_period_start };

        let mut vested_so_far = TokenAmount::zero();
        let mut epoch = vest_begin;

        // Create an iterator for the vesting schedule we're going to "join" with the current
        // vesting schedule.
        let new_funds = iter::from_fn(|| {
            if vested_so_far >= *vesting_sum {
                return None;
            }

            epoch += spec.step_duration;

            let vest_epoch = quant.quantize_up(epoch);

            let elapsed = vest_epoch - vest_begin;
            let target_vest = if elapsed < spec.vest_period {
                // Linear vesting
                (vesting_sum * elapsed).div_floor(spec.vest_period)
            } else {
                vesting_sum.clone()
            };

            let vest_this_time = &target_vest - &vested_so_far;
            vested_so_far = target_vest;

            Some(VestingFund { epoch: vest_epoch, amount: vest_this_time })
        });

        let old_funds = std::mem::take(&mut self.funds);

        // Fill back in the funds array, merging existing and new schedule.
        let mut combined_funds = old_funds
            .into_iter()
            .merge_join_by(new_funds, |a, b| a.epoch.cmp(&b.epoch))
            .map(|item| match item {
                EitherOrBoth::Left(a) => a,
                EitherOrBoth::Right(b) => b,
                EitherOrBoth::Both(a, b) => {
                    VestingFund { epoch: a.epoch, amount: a.amount + b.amount }
                }
            })
            .peekable();

        // Take any unlocked funds.
        let unlocked = take_vested(&mut combined_funds, current_epoch);
        self.funds = combined_funds.filter(|f| f.amount.is_positive()).collect();

        unlocked
    }

    /// Unlocks unvested funds, earliest first, up to at most the target amount.
    /// Funds that have already vested are left in place for the next vesting pass.
    /// Returns the amount unlocked.
    pub fn unlock_unvested_funds(
        &mut self,
        current_epoch: ChainEpoch,
        target: &TokenAmount,
    ) -> TokenAmount {
        let mut amount_unlocked = TokenAmount::zero();
        let mut remaining = Vec::with_capacity(self.funds.len());

        for mut vf in std::mem::take(&mut self.funds) {
            if amount_unlocked >= *target || vf.epoch < current_epoch {
                remaining.push(vf);
                continue;
            }

            let limit = target - &amount_unlocked;
            if vf.amount <= limit {
                amount_unlocked += &vf.amount;
            } else {
                vf.amount -= &limit;
                amount_unlocked += limit;
                remaining.push(vf);
            }
        }

        self.funds = remaining;
        amount_unlocked
    }

    /// Sum of every fund still scheduled.
    pub fn total(&self) -> TokenAmount {
        self.funds.iter().map(|f| &f.amount).sum()
    }
}
