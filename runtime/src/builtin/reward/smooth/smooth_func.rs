// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::bigint::{BigInt, Integer};
use fvm_shared::clock::ChainEpoch;
use lazy_static::lazy_static;
use num_traits::{Signed, Zero};

use super::FilterEstimate;
use crate::reward::math::PRECISION;

lazy_static! {
    /// Q.128 alpha of the alpha-beta filter (9.25e-4).
    pub static ref DEFAULT_ALPHA: BigInt = BigInt::from(314_760u64) * BigInt::from(10u64).pow(30);
    /// Q.128 beta of the alpha-beta filter (2.84e-7).
    pub static ref DEFAULT_BETA: BigInt = BigInt::from(966_401u64) * BigInt::from(10u64).pow(26);
    /// Q.128 ln(2).
    pub static ref LN_2: BigInt = BigInt::from(235_865_763_225_513_294_137_944_142_764_154_484_399u128);
    /// Q.128 2^-50. Velocities whose square is below this are treated as constant.
    pub static ref EPSILON: BigInt = BigInt::from(1u8) << 78;
}

/// Natural logarithm of a positive Q.128 value, returned in Q.128.
/// Non-positive inputs have no logarithm and yield zero.
pub fn ln(z: &BigInt) -> BigInt {
    if !z.is_positive() {
        return BigInt::zero();
    }
    let k: i64 = z.bits() as i64 - 1 - PRECISION as i64;
    let x: BigInt = if k > 0 { z >> k } else { z << k.unsigned_abs() };

    (BigInt::from(k) * &*LN_2) + ln_between_one_and_two(&x)
}

// ln(x) = 2 * atanh((x - 1) / (x + 1)), summed until the Q.128 terms vanish.
fn ln_between_one_and_two(x: &BigInt) -> BigInt {
    let one = BigInt::from(1u8) << PRECISION;
    let y = ((x - &one) << PRECISION).div_floor(&(x + &one));
    let y_squared = (&y * &y) >> PRECISION;

    let mut sum = BigInt::zero();
    let mut power = y;
    let mut n = 1u64;
    while !power.is_zero() {
        sum += power.div_floor(&BigInt::from(n));
        power = (power * &y_squared) >> PRECISION;
        n += 2;
    }
    sum << 1
}

/// Extrapolated cumulative sum of the ratio of two filter estimates over `delta` epochs
/// starting `relative_start` epochs after the estimates were taken. Returns Q.128.
pub fn extrapolated_cum_sum_of_ratio(
    delta: ChainEpoch,
    relative_start: ChainEpoch,
    estimate_num: &FilterEstimate,
    estimate_denom: &FilterEstimate,
) -> BigInt {
    let delta_t = BigInt::from(delta) << PRECISION;
    let t0 = BigInt::from(relative_start) << PRECISION;

    let pos_1 = &estimate_num.position;
    let velo_1 = &estimate_num.velocity;
    let pos_2 = &estimate_denom.position;
    let velo_2 = &estimate_denom.velocity;

    let squared_velo_2 = (velo_2 * velo_2) >> PRECISION;

    if squared_velo_2 > *EPSILON {
        let mut x2a = ((&t0 * velo_2) >> PRECISION) + pos_2;
        let mut x2b = ((&delta_t * velo_2) >> PRECISION) + &x2a;
        x2a = ln(&x2a);
        x2b = ln(&x2b);

        let m1 = ((&x2b - &x2a) * pos_1 * velo_2) >> PRECISION;

        let m2_l = (&x2a - &x2b) * pos_2;
        let m2_r = velo_2 * &delta_t;
        let m2: BigInt = ((m2_l + m2_r) * velo_1) >> PRECISION;

        return (m2 + m1).div_floor(&squared_velo_2);
    }

    let half_delta = &delta_t >> 1;
    let mut x1m: BigInt = velo_1 * (t0 + half_delta);
    x1m = (x1m >> PRECISION) + pos_1;

    (x1m * delta_t).div_floor(pos_2)
}
