// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::tuple::*;
use fvm_shared::bigint::{bigint_ser, BigInt, Integer};
use fvm_shared::clock::ChainEpoch;

use crate::reward::math::PRECISION;

#[derive(Default, Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct FilterEstimate {
    #[serde(with = "bigint_ser")]
    pub position: BigInt,
    #[serde(with = "bigint_ser")]
    pub velocity: BigInt,
}

impl FilterEstimate {
    /// Create a new filter estimate given two Q.0 format ints.
    pub fn new(position: BigInt, velocity: BigInt) -> Self {
        FilterEstimate { position: position << PRECISION, velocity: velocity << PRECISION }
    }

    /// Returns the Q.0 position estimate of the filter
    pub fn estimate(&self) -> BigInt {
        &self.position >> PRECISION
    }

    /// Extrapolate filter "position" delta epochs in the future.
    pub fn extrapolate(&self, delta: ChainEpoch) -> BigInt {
        let delta_t = BigInt::from(delta) << PRECISION;
        let position = &self.position << PRECISION;
        (&self.velocity * delta_t) + position
    }
}

pub struct AlphaBetaFilter<'a, 'b, 'f> {
    alpha: &'a BigInt,
    beta: &'b BigInt,
    prev_est: &'f FilterEstimate,
}

impl<'a, 'b, 'f> AlphaBetaFilter<'a, 'b, 'f> {
    pub fn load(prev_est: &'f FilterEstimate, alpha: &'a BigInt, beta: &'b BigInt) -> Self {
        Self { alpha, beta, prev_est }
    }

    pub fn next_estimate(&self, obs: &BigInt, epoch_delta: ChainEpoch) -> FilterEstimate {
        let delta_t = BigInt::from(epoch_delta) << PRECISION;
        let delta_x = (&delta_t * &self.prev_est.velocity) >> PRECISION;
        let mut position = delta_x + &self.prev_est.position;

        let obs = obs << PRECISION;
        let residual = obs - &position;
        let revision_x = (self.alpha * &residual) >> PRECISION;
        position += &revision_x;

        let revision_v = residual * self.beta;
        let revision_v = revision_v.div_floor(&delta_t);
        let velocity = revision_v + &self.prev_est.velocity;
        FilterEstimate { position, velocity }
    }
}

#[cfg(test)]
#[cfg(test)]
mod tests {
    use fvm_shared::sector::StoragePower;
    use num_traits::Signed;

    use crate::EPOCHS_IN_DAY;

    use super::super::smooth_func::{
        extrapolated_cum_sum_of_ratio as ecsor, ln, DEFAULT_ALPHA, DEFAULT_BETA, LN_2,
    };
    use super::*;

    // Trapezoidal sum of num/denom over [t0, t0+delta), in Q.128.
    fn summed_ratio(
        num: &FilterEstimate,
        denom: &FilterEstimate,
        t0: ChainEpoch,
        delta: ChainEpoch,
    ) -> BigInt {
        let mut sum = BigInt::from(0u8);
        for i in 0..delta {
            let n = num.extrapolate(t0 + i);
            let d = denom.extrapolate(t0 + i) >> PRECISION;
            let term = n.div_floor(&d);
            sum += if i == 0 || i == delta - 1 { term } else { term * 2 };
        }
        sum.div_floor(&BigInt::from(2))
    }

    // |a - b| / a in parts per million.
    fn ppm_error(a: &BigInt, b: &BigInt) -> BigInt {
        let ratio = ((a - b) << PRECISION).div_floor(a);
        (ratio * (BigInt::from(1_000_000) << PRECISION)).abs() >> (2 * PRECISION)
    }

    fn assert_close_to_sum(num: &FilterEstimate, denom: &FilterEstimate, delta: ChainEpoch) {
        let analytic = ecsor(delta, 0, num, denom);
        let summed = summed_ratio(num, denom, 0, delta);
        let err = ppm_error(&analytic, &summed);
        assert!(err < BigInt::from(350), "error of {} ppm", err);
    }

    fn parse(values: &[&str]) -> Vec<BigInt> {
        values.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn natural_log() {
        // Q.128 inputs: 1, e, 100e18, 2e22, 0.0006, 1e-10
        let inputs = parse(&[
            "340282366920938463463374607431768211456",
            "924990000000000000000000000000000000000",
            "34028236692093846346337460743176821145600000000000000000000",
            "6805647338418769269267492148635364229120000000000000000000000",
            "204169000000000000000000000000000000",
            "34028236692093846346337460743",
        ]);
        let expected = parse(&[
            "0",
            "340282366920938463463374607431768211456",
            "15670582109617661336106769654068947397831",
            "17473506083804940763855390762239996622013",
            "-2524410000000000000000000000000000000000",
            "-7835291054808830668053384827034473698915",
        ]);
        for (z, want) in inputs.iter().zip(expected.iter()) {
            assert_eq!(want >> PRECISION, ln(z) >> PRECISION);
        }
    }

    #[test]
    fn natural_log_of_two_is_the_constant() {
        let two = BigInt::from(2u8) << PRECISION;
        let diff = (ln(&two) - &*LN_2).abs();
        assert!(diff < (BigInt::from(1u8) << 28), "ln(2) off by {}", diff);
        assert_eq!(BigInt::from(0u8), ln(&BigInt::from(0u8)));
    }

    #[test]
    fn constant_ratio_accumulates_linearly() {
        let reward = FilterEstimate::new(BigInt::from(4_000_000), BigInt::from(0u8));
        let power = FilterEstimate::new(BigInt::from(1), BigInt::from(0u8));
        let sum = ecsor(1000, 0, &reward, &power) >> PRECISION;
        assert_eq!(BigInt::from(4_000_000_000i64), sum);
        // a flat estimate does not depend on where the window starts
        assert_eq!(sum, ecsor(1000, 1_000_000, &reward, &power) >> PRECISION);

        let reward = FilterEstimate::new(BigInt::from(1_000_000_000_000i64), BigInt::from(0u8));
        let power = FilterEstimate::new(BigInt::from(200_000_000_000_000i64), BigInt::from(0u8));
        let half = ecsor(100, 0, &reward, &power);
        assert_eq!(BigInt::from(0u8), &half >> PRECISION);
        assert_eq!(
            BigInt::from(5000),
            (half * (BigInt::from(10_000) << PRECISION)) >> (2 * PRECISION)
        );
    }

    #[test]
    fn moving_estimates_match_summation() {
        let reward = FilterEstimate::new(BigInt::from(111), BigInt::from(12));
        let power = FilterEstimate::new(BigInt::from(3456), BigInt::from(8));
        assert_close_to_sum(&reward, &power, 10_000);

        let reward = FilterEstimate::new(BigInt::from(1_000_000), BigInt::from(-100));
        let power = FilterEstimate::new(BigInt::from(70_000), BigInt::from(1000));
        assert_close_to_sum(&reward, &power, 100_000);

        // tens of FIL per epoch against exabytes of growing power over a day
        let reward =
            FilterEstimate::new(BigInt::from(50) * BigInt::from(10u64.pow(18)), BigInt::from(25));
        let power = FilterEstimate::new(
            StoragePower::from(10_i128.pow(19)),
            BigInt::from(2_i128.pow(60)) / BigInt::from(EPOCHS_IN_DAY),
        );
        assert_close_to_sum(&reward, &power, EPOCHS_IN_DAY);
    }

    #[test]
    fn next_estimate_follows_observation() {
        let prev = FilterEstimate::new(BigInt::from(1000), BigInt::from(0u8));
        let filter = AlphaBetaFilter::load(&prev, &DEFAULT_ALPHA, &DEFAULT_BETA);

        let same = filter.next_estimate(&BigInt::from(1000), 1);
        assert_eq!(prev, same);

        let up = filter.next_estimate(&BigInt::from(1_000_000), 1);
        assert!(up.estimate() > BigInt::from(1000));
        assert!(up.estimate() < BigInt::from(1_000_000));
        assert!(up.velocity.is_positive());
    }
}
