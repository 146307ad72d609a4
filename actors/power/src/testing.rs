// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::HashMap;

use fil_actors_runtime::MessageAccumulator;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::sector::StoragePower;
use num_traits::{Signed, Zero};

use crate::{
    Claim, ClaimsMap, CronEvent, CronEventQueue, FaultMinerSet, State, CLAIMS_CONFIG,
    CRON_QUEUE_AMT_BITWIDTH, CRON_QUEUE_CONFIG, FAULT_MINERS_CONFIG,
};

pub struct MinerCronEvent {
    pub epoch: ChainEpoch,
    pub payload: RawBytes,
}

type CronEventsByAddress = HashMap<Address, Vec<MinerCronEvent>>;
type ClaimsByAddress = HashMap<Address, Claim>;

pub struct StateSummary {
    pub crons: CronEventsByAddress,
    pub claims: ClaimsByAddress,
    pub fault_miners: Vec<Address>,
}

/// Checks internal invariants of power state
pub fn check_state_invariants<BS: Blockstore>(
    state: &State,
    store: &BS,
) -> (StateSummary, MessageAccumulator) {
    let acc = MessageAccumulator::default();

    acc.require(
        !state.total_raw_byte_power.is_negative(),
        format!("total raw power is negative {}", state.total_raw_byte_power),
    );
    acc.require(
        !state.total_quality_adj_power.is_negative(),
        format!("total qa power is negative {}", state.total_quality_adj_power),
    );
    acc.require(
        !state.total_pledge_collateral.is_negative(),
        format!("total pledge is negative {}", state.total_pledge_collateral),
    );

    let claims = check_claims(state, store, &acc);
    let crons = check_cron_events(state, store, &acc);
    let fault_miners = check_fault_miners(state, store, &claims, &acc);

    (StateSummary { crons, claims, fault_miners }, acc)
}

fn check_fault_miners<BS: Blockstore>(
    state: &State,
    store: &BS,
    claims: &ClaimsByAddress,
    acc: &MessageAccumulator,
) -> Vec<Address> {
    let faults = match FaultMinerSet::load(
        store,
        &state.post_detected_fault_miners,
        FAULT_MINERS_CONFIG,
        "fault miners",
    ) {
        Ok(faults) => faults,
        Err(e) => {
            acc.add(format!("error loading fault miners: {}", e));
            return Vec::new();
        }
    };
    let miners = match faults.collect_keys() {
        Ok(miners) => miners,
        Err(e) => {
            acc.add(format!("error iterating fault miners: {}", e));
            return Vec::new();
        }
    };
    for miner in &miners {
        acc.require(claims.contains_key(miner), format!("fault miner {} has no claim", miner));
    }
    miners
}

fn check_claims<BS: Blockstore>(
    state: &State,
    store: &BS,
    acc: &MessageAccumulator,
) -> ClaimsByAddress {
    let mut by_address = ClaimsByAddress::new();
    let mut raw_power = StoragePower::zero();
    let mut qa_power = StoragePower::zero();

    let claims = match ClaimsMap::load(store, &state.claims, CLAIMS_CONFIG, "claims") {
        Ok(claims) => claims,
        Err(e) => {
            acc.add(format!("error loading claims: {}", e));
            return by_address;
        }
    };
    let ret = claims.for_each(|address, claim| {
        acc.require(
            address.id().is_ok(),
            format!("claim address {} is not an ID address", address),
        );
        acc.require(
            !claim.raw_byte_power.is_negative() && !claim.quality_adj_power.is_negative(),
            format!("claim of {} has negative power {:?}", address, claim.power()),
        );
        raw_power += &claim.raw_byte_power;
        qa_power += &claim.quality_adj_power;
        by_address.insert(address, claim.clone());
        Ok(())
    });
    acc.require_no_error(ret, "error iterating claims");

    acc.require(
        by_address.len() as i64 == state.miner_count,
        format!("miner count {} does not match {} claims", state.miner_count, by_address.len()),
    );
    acc.require(
        raw_power == state.total_raw_byte_power,
        format!(
            "sum of claimed raw power {} != total raw power {}",
            raw_power, state.total_raw_byte_power
        ),
    );
    acc.require(
        qa_power == state.total_quality_adj_power,
        format!(
            "sum of claimed qa power {} != total qa power {}",
            qa_power, state.total_quality_adj_power
        ),
    );
    by_address
}

fn check_cron_events<BS: Blockstore>(
    state: &State,
    store: &BS,
    acc: &MessageAccumulator,
) -> CronEventsByAddress {
    let mut by_address = CronEventsByAddress::new();
    let queue = match CronEventQueue::load(
        store,
        &state.cron_event_queue,
        CRON_QUEUE_CONFIG,
        CRON_QUEUE_AMT_BITWIDTH,
        "cron events",
    ) {
        Ok(queue) => queue,
        Err(e) => {
            acc.add(format!("error loading cron event queue: {}", e));
            return by_address;
        }
    };
    let epochs = match queue.keys() {
        Ok(epochs) => epochs,
        Err(e) => {
            acc.add(format!("error listing cron epochs: {}", e));
            return by_address;
        }
    };

    for epoch in epochs {
        acc.require(
            epoch > state.last_processed_cron_epoch,
            format!(
                "cron event at epoch {} already processed through {}",
                epoch, state.last_processed_cron_epoch
            ),
        );
        let ret = queue.for_each(&epoch, |_, event: &CronEvent| {
            by_address.entry(event.miner_addr).or_default().push(MinerCronEvent {
                epoch,
                payload: event.callback_payload.clone(),
            });
            Ok(())
        });
        acc.require_no_error(ret, format!("error iterating cron events at epoch {}", epoch));
    }
    by_address
}
