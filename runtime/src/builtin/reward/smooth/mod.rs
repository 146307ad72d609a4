// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod alpha_beta_filter;
mod smooth_func;

pub use alpha_beta_filter::*;
pub use smooth_func::*;
