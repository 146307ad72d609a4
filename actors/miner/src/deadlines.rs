// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use byteorder::{BigEndian, ByteOrder};
use fil_actors_runtime::runtime::Policy;
use fil_actors_runtime::{actor_error, ActorError, AsActorError};
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::error::ExitCode;
use fvm_shared::randomness::RANDOMNESS_LENGTH;

/// Deadline calculations with respect to a current epoch.
/// "Deadline" refers to the window during which proofs may be submitted.
/// Windows are non-overlapping ranges [Open, Close), but the challenge epoch for a window occurs before
/// the window opens.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct DeadlineInfo {
    /// Epoch at which this info was calculated.
    pub current_epoch: ChainEpoch,
    /// First epoch of the proving period (<= CurrentEpoch).
    pub period_start: ChainEpoch,
    /// Current deadline index, in [0..WPoStProvingPeriodDeadlines).
    pub index: u64,
    /// First epoch from which a proof may be submitted (>= CurrentEpoch).
    pub open: ChainEpoch,
    /// First epoch from which a proof may no longer be submitted (>= Open).
    pub close: ChainEpoch,
    /// Epoch at which to sample the chain for challenge (< Open).
    pub challenge: ChainEpoch,
    /// First epoch at which a fault declaration is rejected (< Open).
    pub fault_cutoff: ChainEpoch,

    // Protocol parameters
    w_post_period_deadlines: u64,
    w_post_proving_period: ChainEpoch,
}

impl DeadlineInfo {
    pub fn new(
        policy: &Policy,
        period_start: ChainEpoch,
        deadline_idx: u64,
        current_epoch: ChainEpoch,
    ) -> Self {
        if deadline_idx < policy.wpost_period_deadlines {
            let deadline_open = period_start + (deadline_idx as i64 * policy.wpost_challenge_window);
            Self {
                current_epoch,
                period_start,
                index: deadline_idx,
                open: deadline_open,
                close: deadline_open + policy.wpost_challenge_window,
                challenge: deadline_open - policy.wpost_challenge_lookback,
                fault_cutoff: deadline_open - policy.fault_declaration_cutoff,
                w_post_period_deadlines: policy.wpost_period_deadlines,
                w_post_proving_period: policy.wpost_proving_period,
            }
        } else {
            let after_last_deadline = period_start + policy.wpost_proving_period;
            Self {
                current_epoch,
                period_start,
                index: deadline_idx,
                open: after_last_deadline,
                close: after_last_deadline,
                challenge: after_last_deadline,
                fault_cutoff: 0,
                w_post_period_deadlines: policy.wpost_period_deadlines,
                w_post_proving_period: policy.wpost_proving_period,
            }
        }
    }

    /// Computes the deadline in progress at the current epoch for a proving period.
    /// Before the period starts this is deadline zero; after it ends the index is out of range.
    pub fn for_current_epoch(
        policy: &Policy,
        period_start: ChainEpoch,
        current_epoch: ChainEpoch,
    ) -> Self {
        let progress = current_epoch - period_start;
        let idx = if progress < 0 {
            0
        } else if progress >= policy.wpost_proving_period {
            policy.wpost_period_deadlines
        } else {
            (progress / policy.wpost_challenge_window) as u64
        };
        Self::new(policy, period_start, idx, current_epoch)
    }

    /// Whether the proving period has begun.
    pub fn period_started(&self) -> bool {
        self.current_epoch >= self.period_start
    }

    /// The first epoch in the next proving period.
    pub fn next_period_start(&self) -> ChainEpoch {
        self.period_start + self.w_post_proving_period
    }

    /// Whether the current deadline is currently open.
    pub fn is_open(&self) -> bool {
        self.current_epoch >= self.open && self.current_epoch < self.close
    }

    /// Whether the current deadline has already closed.
    pub fn has_elapsed(&self) -> bool {
        self.current_epoch >= self.close
    }

    /// Whether the deadline's fault cutoff has passed.
    pub fn fault_cutoff_passed(&self) -> bool {
        self.current_epoch >= self.fault_cutoff
    }

    /// Returns the same deadline in the earliest proving period in which it has not yet closed.
    pub fn next_not_elapsed(self) -> Self {
        if !self.has_elapsed() {
            return self;
        }

        // has elapsed, advance by some multiples of w_post_proving_period
        let gap = self.current_epoch - self.close;
        let delta = (1 + gap / self.w_post_proving_period) * self.w_post_proving_period;
        Self {
            period_start: self.period_start + delta,
            open: self.open + delta,
            close: self.close + delta,
            challenge: self.challenge + delta,
            fault_cutoff: self.fault_cutoff + delta,
            ..self
        }
    }
}

/// The sectors due at each deadline of a proving period.
/// Partitions are consecutive runs of sectors within a deadline, numbered across all deadlines
/// so that every partition of deadline i+1 has a greater index than those of deadline i.
#[derive(Debug, Clone, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct Deadlines {
    pub due: Vec<BitField>,
}

impl Deadlines {
    pub fn new(policy: &Policy) -> Self {
        Self { due: vec![BitField::new(); policy.wpost_period_deadlines as usize] }
    }

    fn deadline(&self, deadline_idx: u64) -> Result<&BitField, ActorError> {
        self.due.get(deadline_idx as usize).ok_or_else(|| {
            actor_error!(illegal_argument, "invalid deadline {}, must be < {}", deadline_idx, self.due.len())
        })
    }

    pub fn sectors_at(&self, deadline_idx: u64) -> Result<&BitField, ActorError> {
        self.deadline(deadline_idx)
    }

    /// Adds sector numbers to a deadline.
    pub fn add_to_deadline(
        &mut self,
        deadline_idx: u64,
        sectors: impl IntoIterator<Item = u64>,
    ) -> Result<(), ActorError> {
        let due = self.due.get_mut(deadline_idx as usize).ok_or_else(|| {
            actor_error!(illegal_argument, "invalid deadline {}", deadline_idx)
        })?;
        for sector in sectors {
            due.set(sector);
        }
        Ok(())
    }

    /// Removes sector numbers from every deadline.
    pub fn remove_from_all_deadlines(&mut self, sectors: &BitField) {
        for due in self.due.iter_mut() {
            *due -= sectors;
        }
    }

    /// Union of the sectors due at every deadline.
    pub fn all_sectors(&self) -> BitField {
        BitField::union(self.due.iter())
    }

    /// Returns the number of partitions and sectors at a deadline.
    pub fn deadline_count(
        &self,
        partition_size: u64,
        deadline_idx: u64,
    ) -> Result<(u64, u64), ActorError> {
        let sector_count = self.deadline(deadline_idx)?.len();
        Ok(((sector_count + partition_size - 1) / partition_size, sector_count))
    }

    /// Returns the global index of the first partition at a deadline, and the partition count there.
    pub fn partitions_for_deadline(
        &self,
        partition_size: u64,
        deadline_idx: u64,
    ) -> Result<(u64, u64), ActorError> {
        let mut first_partition = 0;
        for i in 0..deadline_idx {
            let (partitions, _) = self.deadline_count(partition_size, i)?;
            first_partition += partitions;
        }
        let (count, _) = self.deadline_count(partition_size, deadline_idx)?;
        Ok((first_partition, count))
    }

    /// Returns the sectors in one partition of a deadline, by index local to the deadline.
    pub fn partition_sectors(
        &self,
        partition_size: u64,
        deadline_idx: u64,
        local_idx: u64,
    ) -> Result<BitField, ActorError> {
        let (count, sector_count) = self.deadline_count(partition_size, deadline_idx)?;
        if local_idx >= count {
            return Err(actor_error!(
                illegal_argument,
                "invalid partition {} at deadline {} with {} partitions",
                local_idx,
                deadline_idx,
                count
            ));
        }
        let first_sector = local_idx * partition_size;
        let len = std::cmp::min(partition_size, sector_count - first_sector);
        self.deadline(deadline_idx)?.slice(first_sector, len).with_context_code(
            ExitCode::USR_ILLEGAL_STATE,
            || format!("failed to slice deadline {} partition {}", deadline_idx, local_idx),
        )
    }

    /// Computes the sectors in each of a set of partitions, given by global index, at a deadline.
    pub fn compute_partitions_sectors(
        &self,
        partition_size: u64,
        deadline_idx: u64,
        partitions: &[u64],
    ) -> Result<Vec<BitField>, ActorError> {
        let (first_partition, count) = self.partitions_for_deadline(partition_size, deadline_idx)?;
        partitions
            .iter()
            .map(|&p| {
                if p < first_partition || p >= first_partition + count {
                    return Err(actor_error!(
                        illegal_argument,
                        "invalid partition {} at deadline {} with first {}, count {}",
                        p,
                        deadline_idx,
                        first_partition,
                        count
                    ));
                }
                self.partition_sectors(partition_size, deadline_idx, p - first_partition)
            })
            .collect()
    }
}

/// Assigns new sectors to deadlines. Deadline zero is never assigned, so that a sector proven at the
/// end of one period is not challenged at the very start of the next.
///
/// Partially filled partitions are topped up first, in deadline order. Remaining sectors fill whole new
/// partitions, each going to a deadline with the fewest partitions. Ties are broken by scanning from a
/// starting deadline drawn from the seed.
pub fn assign_new_sectors(
    deadlines: &mut Deadlines,
    partition_size: u64,
    new_sectors: &[u64],
    seed: &[u8; RANDOMNESS_LENGTH],
) -> Result<(), ActorError> {
    if partition_size == 0 {
        return Err(actor_error!(illegal_state, "zero partition size"));
    }
    let deadline_count = deadlines.due.len() as u64;
    if deadline_count < 2 {
        return Err(actor_error!(illegal_state, "too few deadlines to assign sectors: {}", deadline_count));
    }

    let mut remaining = new_sectors;
    let mut take = |count: u64| -> Vec<u64> {
        let n = std::cmp::min(count as usize, remaining.len());
        let (head, tail) = remaining.split_at(n);
        remaining = tail;
        head.to_vec()
    };

    let mut partition_counts = vec![0u64; deadline_count as usize];
    for idx in 1..deadline_count {
        let (partitions, sectors) = deadlines.deadline_count(partition_size, idx)?;
        partition_counts[idx as usize] = partitions;
        let gap = partition_size - (sectors % partition_size);
        if gap != partition_size {
            deadlines.add_to_deadline(idx, take(gap))?;
        }
    }

    let mut next = BigEndian::read_u64(&seed[..8]) % (deadline_count - 1) + 1;
    loop {
        let batch = take(partition_size);
        if batch.is_empty() {
            break;
        }

        let mut target = next;
        for step in 0..deadline_count - 1 {
            let candidate = (next - 1 + step) % (deadline_count - 1) + 1;
            if partition_counts[candidate as usize] < partition_counts[target as usize] {
                target = candidate;
            }
        }

        deadlines.add_to_deadline(target, batch)?;
        partition_counts[target as usize] += 1;
        next = target % (deadline_count - 1) + 1;
    }

    Ok(())
}
