// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::bigint::BigInt;
pub use {fvm_ipld_amt, fvm_ipld_hamt};

pub use self::actor_error::*;
pub use self::builtin::*;
pub use self::dispatch::*;
pub use self::util::*;

pub mod actor_error;
pub mod builtin;
mod dispatch;
pub mod runtime;
pub mod util;

#[cfg(feature = "test_utils")]
pub mod test_utils;

/// The hash function used to address HAMT keys.
type Hasher = fvm_ipld_hamt::Sha256;

/// Deal weight
pub type DealWeight = BigInt;
