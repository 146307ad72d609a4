// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::bigint::{BigInt, ParseBigIntError};

/// Number of fractional bits in the Q-format fixed point numbers used by the smoothing math.
pub const PRECISION: u64 = 128;

/// Parses decimal strings into Q.128 values.
pub fn poly_parse(coefs: &[&str]) -> Result<Vec<BigInt>, ParseBigIntError> {
    coefs.iter().map(|c| c.parse()).collect()
}

/// Evaluates a polynomial with Q.128 coefficients (highest order first) at a Q.128 point.
pub fn poly_val(poly: &[BigInt], x: &BigInt) -> BigInt {
    let mut res = BigInt::default();
    for coeff in poly {
        res = ((res * x) >> PRECISION) + coeff;
    }
    res
}
