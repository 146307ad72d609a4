// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fil_actor_miner::PowerPair;
use fil_actors_runtime::reward::smooth::{AlphaBetaFilter, DEFAULT_ALPHA, DEFAULT_BETA};
use fil_actors_runtime::reward::FilterEstimate;
use fil_actors_runtime::{actor_error, ActorError, Config, Map, Multimap, Set, DEFAULT_HAMT_CONFIG};
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::bigint::bigint_ser;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::StoragePower;
use num_traits::{Signed, Zero};

use crate::{
    CRON_QUEUE_AMT_BITWIDTH, INITIAL_QA_POWER_ESTIMATE_POSITION,
    INITIAL_QA_POWER_ESTIMATE_VELOCITY,
};

pub type ClaimsMap<BS> = Map<BS, Address, Claim>;
pub const CLAIMS_CONFIG: Config = DEFAULT_HAMT_CONFIG;

pub type CronEventQueue<BS> = Multimap<BS, ChainEpoch>;
pub const CRON_QUEUE_CONFIG: Config = DEFAULT_HAMT_CONFIG;

pub type FaultMinerSet<BS> = Set<BS, Address>;
pub const FAULT_MINERS_CONFIG: Config = DEFAULT_HAMT_CONFIG;

/// Storage power actor state
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct State {
    #[serde(with = "bigint_ser")]
    pub total_raw_byte_power: StoragePower,
    #[serde(with = "bigint_ser")]
    pub total_quality_adj_power: StoragePower,
    pub total_pledge_collateral: TokenAmount,

    pub this_epoch_qa_power_smoothed: FilterEstimate,
    /// Cached from the reward actor at the end of every epoch.
    pub this_epoch_reward_smoothed: FilterEstimate,
    #[serde(with = "bigint_ser")]
    pub this_epoch_baseline_power: StoragePower,

    pub miner_count: i64,

    /// Last epoch whose cron events were dispatched.
    pub last_processed_cron_epoch: ChainEpoch,
    pub cron_event_queue: Cid, // Multimap, (HAMT[ChainEpoch]AMT[CronEvent])

    /// Miners that failed their last windowed PoSt.
    pub post_detected_fault_miners: Cid, // Set, HAMT[Address]
    pub claims: Cid, // Map, HAMT[Address]Claim
}

impl State {
    pub fn new<BS: Blockstore>(store: &BS, current_epoch: ChainEpoch) -> Result<State, ActorError> {
        let empty_claims = ClaimsMap::flush_empty(store, CLAIMS_CONFIG)?;
        let empty_cron_queue =
            CronEventQueue::empty(store, CRON_QUEUE_CONFIG, CRON_QUEUE_AMT_BITWIDTH, "cron events")
                .flush()?;
        let empty_fault_miners =
            FaultMinerSet::empty(store, FAULT_MINERS_CONFIG, "fault miners").flush()?;

        Ok(State {
            total_raw_byte_power: StoragePower::zero(),
            total_quality_adj_power: StoragePower::zero(),
            total_pledge_collateral: TokenAmount::zero(),
            this_epoch_qa_power_smoothed: FilterEstimate::new(
                INITIAL_QA_POWER_ESTIMATE_POSITION.clone(),
                INITIAL_QA_POWER_ESTIMATE_VELOCITY.clone(),
            ),
            this_epoch_reward_smoothed: FilterEstimate::default(),
            this_epoch_baseline_power: StoragePower::zero(),
            miner_count: 0,
            last_processed_cron_epoch: current_epoch - 1,
            cron_event_queue: empty_cron_queue,
            post_detected_fault_miners: empty_fault_miners,
            claims: empty_claims,
        })
    }

    pub fn current_total_power(&self) -> PowerPair {
        PowerPair::new(self.total_raw_byte_power.clone(), self.total_quality_adj_power.clone())
    }

    pub fn get_claim<BS: Blockstore>(
        &self,
        store: &BS,
        miner: &Address,
    ) -> Result<Option<Claim>, ActorError> {
        let claims = ClaimsMap::load(store, &self.claims, CLAIMS_CONFIG, "claims")?;
        Ok(claims.get(miner)?.cloned())
    }

    /// Registers a new miner with an empty claim.
    pub fn create_claim<BS: Blockstore>(
        &mut self,
        store: &BS,
        miner: &Address,
    ) -> Result<(), ActorError> {
        let mut claims = ClaimsMap::load(store, &self.claims, CLAIMS_CONFIG, "claims")?;
        if !claims.set_if_absent(miner, Claim::default())? {
            return Err(actor_error!(illegal_state, "miner {} already has a claim", miner));
        }
        self.claims = claims.flush()?;
        self.miner_count += 1;
        Ok(())
    }

    /// Adds (or with a negative delta, removes) power from a miner's claim and the network
    /// totals.
    pub fn add_to_claim<BS: Blockstore>(
        &mut self,
        store: &BS,
        miner: &Address,
        delta: &PowerPair,
    ) -> Result<(), ActorError> {
        let mut claims = ClaimsMap::load(store, &self.claims, CLAIMS_CONFIG, "claims")?;
        let mut claim = claims
            .get(miner)?
            .cloned()
            .ok_or_else(|| actor_error!(not_found, "no claim for miner {}", miner))?;

        claim.raw_byte_power += &delta.raw;
        claim.quality_adj_power += &delta.qa;
        if claim.raw_byte_power.is_negative() || claim.quality_adj_power.is_negative() {
            return Err(actor_error!(
                illegal_state,
                "negative claimed power for miner {}: raw {}, qa {}",
                miner,
                claim.raw_byte_power,
                claim.quality_adj_power
            ));
        }
        claims.set(miner, claim)?;
        self.claims = claims.flush()?;

        self.total_raw_byte_power += &delta.raw;
        self.total_quality_adj_power += &delta.qa;
        if self.total_raw_byte_power.is_negative() || self.total_quality_adj_power.is_negative() {
            return Err(actor_error!(
                illegal_state,
                "negative total power: raw {}, qa {}",
                self.total_raw_byte_power,
                self.total_quality_adj_power
            ));
        }
        Ok(())
    }

    /// Removes a miner's claim and its power from the totals. Returns the removed claim, if any.
    pub fn delete_claim<BS: Blockstore>(
        &mut self,
        store: &BS,
        miner: &Address,
    ) -> Result<Option<Claim>, ActorError> {
        let mut claims = ClaimsMap::load(store, &self.claims, CLAIMS_CONFIG, "claims")?;
        let removed = match claims.delete(miner)? {
            Some(claim) => claim,
            None => return Ok(None),
        };
        self.claims = claims.flush()?;

        self.total_raw_byte_power -= &removed.raw_byte_power;
        self.total_quality_adj_power -= &removed.quality_adj_power;
        self.miner_count -= 1;
        if self.miner_count < 0 {
            return Err(actor_error!(illegal_state, "negative miner count {}", self.miner_count));
        }

        self.delete_fault_miner(store, miner)?;
        Ok(Some(removed))
    }

    pub fn add_pledge_total(&mut self, amount: &TokenAmount) -> Result<(), ActorError> {
        self.total_pledge_collateral += amount;
        if self.total_pledge_collateral.is_negative() {
            return Err(actor_error!(
                illegal_state,
                "negative total pledge collateral {}",
                self.total_pledge_collateral
            ));
        }
        Ok(())
    }

    pub fn append_cron_event<BS: Blockstore>(
        &mut self,
        store: &BS,
        epoch: ChainEpoch,
        event: CronEvent,
    ) -> Result<(), ActorError> {
        let mut queue = CronEventQueue::load(
            store,
            &self.cron_event_queue,
            CRON_QUEUE_CONFIG,
            CRON_QUEUE_AMT_BITWIDTH,
            "cron events",
        )?;
        queue.add(&epoch, event)?;
        self.cron_event_queue = queue.flush()?;
        Ok(())
    }

    /// Epochs in `(last_processed_cron_epoch, up_to]` that hold enrolled events, in order.
    pub fn pending_cron_epochs<BS: Blockstore>(
        &self,
        store: &BS,
        up_to: ChainEpoch,
    ) -> Result<Vec<ChainEpoch>, ActorError> {
        let queue = CronEventQueue::load(
            store,
            &self.cron_event_queue,
            CRON_QUEUE_CONFIG,
            CRON_QUEUE_AMT_BITWIDTH,
            "cron events",
        )?;
        let mut epochs: Vec<ChainEpoch> = queue
            .keys()?
            .into_iter()
            .filter(|e| *e > self.last_processed_cron_epoch && *e <= up_to)
            .collect();
        epochs.sort_unstable();
        Ok(epochs)
    }

    /// Removes and returns the events enrolled at an epoch, in enrollment order.
    pub fn take_cron_events<BS: Blockstore>(
        &mut self,
        store: &BS,
        epoch: ChainEpoch,
    ) -> Result<Vec<CronEvent>, ActorError> {
        let mut queue = CronEventQueue::load(
            store,
            &self.cron_event_queue,
            CRON_QUEUE_CONFIG,
            CRON_QUEUE_AMT_BITWIDTH,
            "cron events",
        )?;
        let mut events = Vec::new();
        queue.for_each(&epoch, |_, event: &CronEvent| {
            events.push(event.clone());
            Ok(())
        })?;
        if !events.is_empty() {
            queue.remove_all(&epoch)?;
            self.cron_event_queue = queue.flush()?;
        }
        Ok(events)
    }

    pub fn put_fault_miner<BS: Blockstore>(
        &mut self,
        store: &BS,
        miner: &Address,
    ) -> Result<(), ActorError> {
        let mut faults = FaultMinerSet::load(
            store,
            &self.post_detected_fault_miners,
            FAULT_MINERS_CONFIG,
            "fault miners",
        )?;
        faults.put(miner)?;
        self.post_detected_fault_miners = faults.flush()?;
        Ok(())
    }

    pub fn delete_fault_miner<BS: Blockstore>(
        &mut self,
        store: &BS,
        miner: &Address,
    ) -> Result<(), ActorError> {
        let mut faults = FaultMinerSet::load(
            store,
            &self.post_detected_fault_miners,
            FAULT_MINERS_CONFIG,
            "fault miners",
        )?;
        if faults.delete(miner)?.is_some() {
            self.post_detected_fault_miners = faults.flush()?;
        }
        Ok(())
    }

    /// Miners with positive quality-adjusted power, ordered by actor ID.
    pub fn miners_with_power<BS: Blockstore>(&self, store: &BS) -> Result<Vec<Address>, ActorError> {
        let claims = ClaimsMap::load(store, &self.claims, CLAIMS_CONFIG, "claims")?;
        let mut miners = Vec::new();
        claims.for_each(|miner, claim| {
            if claim.quality_adj_power.is_positive() {
                miners.push(miner);
            }
            Ok(())
        })?;
        miners.sort_by_key(|a| a.id().unwrap_or(u64::MAX));
        Ok(miners)
    }

    pub(super) fn update_smoothed_estimate(&mut self, delta: ChainEpoch) {
        let filter_qa_power = AlphaBetaFilter::load(
            &self.this_epoch_qa_power_smoothed,
            &DEFAULT_ALPHA,
            &DEFAULT_BETA,
        );
        self.this_epoch_qa_power_smoothed =
            filter_qa_power.next_estimate(&self.total_quality_adj_power, delta);
    }
}

#[derive(Debug, Serialize_tuple, Deserialize_tuple, Clone, PartialEq, Eq)]
pub struct CronEvent {
    pub miner_addr: Address,
    pub callback_payload: RawBytes,
}

#[derive(Debug, Serialize_tuple, Deserialize_tuple, Clone, PartialEq, Eq, Default)]
pub struct Claim {
    /// Sum of raw byte power for a miner's sectors.
    #[serde(with = "bigint_ser")]
    pub raw_byte_power: StoragePower,
    /// Sum of quality adjusted power for a miner's sectors.
    #[serde(with = "bigint_ser")]
    pub quality_adj_power: StoragePower,
}

impl Claim {
    pub fn power(&self) -> PowerPair {
        PowerPair::new(self.raw_byte_power.clone(), self.quality_adj_power.clone())
    }

    pub fn is_zero(&self) -> bool {
        self.raw_byte_power.is_zero() && self.quality_adj_power.is_zero()
    }
}
