// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_actors_runtime::runtime::Policy;
use fil_actors_runtime::MessageAccumulator;
use fvm_ipld_bitfield::BitField;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::clock::NO_QUANTIZATION;
use fvm_shared::econ::TokenAmount;
use num_traits::Zero;

use crate::{
    power_for_weight, weight_for_sector, BitFieldQueue, PowerPair, PreCommitMap, Sectors, State,
    PRECOMMIT_CONFIG,
};

pub struct StateSummary {
    pub live_power: PowerPair,
    pub active_power: PowerPair,
    pub faulty_power: PowerPair,
    pub sector_count: u64,
}

/// Checks internal invariants of miner state
pub fn check_state_invariants<BS: Blockstore>(
    policy: &Policy,
    state: &State,
    store: &BS,
    balance: &TokenAmount,
) -> (StateSummary, MessageAccumulator) {
    let acc = MessageAccumulator::default();
    let mut summary = StateSummary {
        live_power: PowerPair::zero(),
        active_power: PowerPair::zero(),
        faulty_power: PowerPair::zero(),
        sector_count: 0,
    };

    acc.require(
        !state.pre_commit_deposits.is_negative(),
        format!("pre-commit deposits are negative {}", state.pre_commit_deposits),
    );
    acc.require(
        !state.locked_funds.is_negative(),
        format!("locked funds are negative {}", state.locked_funds),
    );
    acc.require(
        balance >= &(&state.pre_commit_deposits + &state.locked_funds),
        format!(
            "balance {} below pre-commit deposits {} plus locked funds {}",
            balance, state.pre_commit_deposits, state.locked_funds
        ),
    );

    let info = match state.get_info(store) {
        Ok(info) => info,
        Err(e) => {
            acc.add(format!("error loading miner info: {}", e));
            return (summary, acc);
        }
    };

    match state.load_vesting_funds(store) {
        Ok(funds) => acc.require(
            funds.total() == state.locked_funds,
            format!("vesting total {} != locked funds {}", funds.total(), state.locked_funds),
        ),
        Err(e) => acc.add(format!("error loading vesting funds: {}", e)),
    }

    check_precommits(state, store, &acc);

    // Sectors
    let mut all_sectors = BitField::new();
    match Sectors::load(store, &state.sectors, "sectors") {
        Ok(sectors) => {
            let ret = sectors.for_each(|sector_number, sector| {
                all_sectors.set(sector_number);
                let power = power_for_weight(policy, &weight_for_sector(info.sector_size, sector));
                summary.live_power += &power;
                let faulty = state.faults.get(sector_number);
                acc.require(
                    sector.is_faulty() == faulty,
                    format!(
                        "sector {} declared fault epoch {:?} disagrees with fault set",
                        sector_number, sector.declared_fault_epoch
                    ),
                );
                if faulty {
                    summary.faulty_power += &power;
                } else {
                    summary.active_power += &power;
                }
                acc.require(
                    sector.info.expiration > sector.activation_epoch,
                    format!("sector {} expires before activation", sector_number),
                );
                Ok(())
            });
            acc.require_no_error(ret, "error iterating sectors");
        }
        Err(e) => acc.add(format!("error loading sectors: {}", e)),
    }
    summary.sector_count = all_sectors.len();

    acc.require(
        all_sectors.contains_all(&state.faults),
        "faults are not a subset of sectors",
    );
    acc.require(
        state.faults.contains_all(&state.recoveries),
        "recoveries are not a subset of faults",
    );
    acc.require(
        all_sectors.contains_all(&state.new_sectors),
        "new sectors are not a subset of sectors",
    );

    // Every proven sector is either due at exactly one deadline or awaiting assignment.
    match state.load_deadlines(store) {
        Ok(deadlines) => {
            let mut assigned = BitField::new();
            for (idx, due) in deadlines.due.iter().enumerate() {
                acc.require(
                    !assigned.contains_any(due),
                    format!("deadline {} shares sectors with an earlier deadline", idx),
                );
                assigned |= due;
            }
            acc.require(
                !assigned.contains_any(&state.new_sectors),
                "new sectors are already assigned to a deadline",
            );
            acc.require(
                &assigned | &state.new_sectors == all_sectors,
                "assigned and new sectors do not cover all sectors",
            );
        }
        Err(e) => acc.add(format!("error loading deadlines: {}", e)),
    }

    match BitFieldQueue::new(store, &state.sector_expirations, state.expiration_quant(policy))
        .and_then(|q| q.all_values())
    {
        Ok(expiring) => acc.require(
            expiring == all_sectors,
            "expiration queue does not match sectors",
        ),
        Err(e) => acc.add(format!("error loading expiration queue: {}", e)),
    }

    match BitFieldQueue::new(store, &state.fault_epochs, NO_QUANTIZATION)
        .and_then(|q| q.all_values())
    {
        Ok(fault_epochs) => acc.require(
            state.faults.contains_all(&fault_epochs),
            "fault epoch queue holds sectors that are not faulty",
        ),
        Err(e) => acc.add(format!("error loading fault epochs: {}", e)),
    }

    acc.require(
        state.post_state.num_consecutive_failures >= 0,
        format!(
            "negative consecutive PoSt failures {}",
            state.post_state.num_consecutive_failures
        ),
    );

    (summary, acc)
}

fn check_precommits<BS: Blockstore>(state: &State, store: &BS, acc: &MessageAccumulator) {
    let precommits =
        match PreCommitMap::load(store, &state.pre_committed_sectors, PRECOMMIT_CONFIG, "precommits")
        {
            Ok(precommits) => precommits,
            Err(e) => {
                acc.add(format!("error loading precommits: {}", e));
                return;
            }
        };

    let mut total_deposit = TokenAmount::zero();
    let ret = precommits.for_each(|sector_number, precommit| {
        acc.require(
            sector_number == precommit.info.sector_number,
            format!(
                "precommit key {} does not match sector number {}",
                sector_number, precommit.info.sector_number
            ),
        );
        total_deposit += &precommit.pre_commit_deposit;
        Ok(())
    });
    acc.require_no_error(ret, "error iterating precommits");

    acc.require(
        total_deposit == state.pre_commit_deposits,
        format!(
            "sum of precommit deposits {} != recorded deposits {}",
            total_deposit, state.pre_commit_deposits
        ),
    );
}
