// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::clock::ChainEpoch;
use fvm_shared::randomness::RANDOMNESS_LENGTH;
use num_derive::FromPrimitive;
use serde_repr::*;

/// Specifies a domain for randomness generation.
#[derive(
    PartialEq, Eq, Copy, Clone, FromPrimitive, Debug, Hash, Serialize_repr, Deserialize_repr,
)]
#[repr(i64)]
pub enum DomainSeparationTag {
    TicketProduction = 1,
    ElectionProofProduction = 2,
    WinningPoStChallengeSeed = 3,
    WindowedPoStChallengeSeed = 4,
    SealRandomness = 5,
    InteractiveSealChallengeSeed = 6,
    WindowPoStDeadlineAssignment = 7,
    MarketDealCronSeed = 8,
    PoStChainCommit = 9,
    SurprisePoStSelectMiners = 10,
}

/// Derives the randomness an actor observes from a chain randomness base.
/// The preimage is `tag || base || round || entropy` with big-endian integers.
pub fn draw_randomness(
    hasher: impl FnOnce(&[u8]) -> [u8; 32],
    rbase: &[u8; RANDOMNESS_LENGTH],
    pers: DomainSeparationTag,
    round: ChainEpoch,
    entropy: &[u8],
) -> [u8; RANDOMNESS_LENGTH] {
    let mut preimage = Vec::with_capacity(8 + RANDOMNESS_LENGTH + 8 + entropy.len());
    preimage.extend_from_slice(&(pers as i64).to_be_bytes());
    preimage.extend_from_slice(rbase);
    preimage.extend_from_slice(&round.to_be_bytes());
    preimage.extend_from_slice(entropy);
    hasher(&preimage)
}
