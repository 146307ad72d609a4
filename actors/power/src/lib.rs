// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp;
use std::iter;

use byteorder::{BigEndian, ByteOrder};
use fil_actor_miner::{
    consensus_fault_penalty, expected_reward_for_power, initial_pledge_for_power,
    pledge_penalty_for_termination, power_for_weight, power_for_weights,
    reward_for_consensus_slash_report, SectorStorageWeightDesc,
};
use fil_actors_runtime::network::EPOCHS_IN_DAY;
use fil_actors_runtime::reward::{ThisEpochRewardReturn, THIS_EPOCH_REWARD_METHOD};
use fil_actors_runtime::runtime::builtins::{Type, CALLER_TYPES_SIGNABLE};
use fil_actors_runtime::runtime::{ActorCode, DomainSeparationTag, Policy, Runtime};
use fil_actors_runtime::{
    actor_dispatch, actor_error, deserialize_block, extract_send_result, ActorContext, ActorError,
    AsActorError, CRON_ACTOR_ADDR, INIT_ACTOR_ADDR, REWARD_ACTOR_ADDR, SYSTEM_ACTOR_ADDR,
};
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::{RawBytes, DAG_CBOR};
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::METHOD_CONSTRUCTOR;
use log::{error, info, warn};
use num_derive::FromPrimitive;
use num_traits::Zero;

pub use self::policy::*;
pub use self::state::*;
pub use self::types::*;

#[doc(hidden)]
pub mod ext;
mod policy;
mod state;
pub mod testing;
mod types;

/// Storage power actor methods available.
/// Methods 2 and 3 are reserved: pledge is held by the miner actors themselves.
#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    CreateMiner = 4,
    DeleteMiner = 5,
    OnSectorProveCommit = 6,
    OnSectorTerminate = 7,
    OnFaultBegin = 8,
    OnFaultEnd = 9,
    OnSectorModifyWeightDesc = 10,
    OnMinerWindowedPoStSuccess = 11,
    OnMinerWindowedPoStFailure = 12,
    EnrollCronEvent = 13,
    ReportConsensusFault = 14,
    OnEpochTickEnd = 15,
    UpdatePledgeTotal = 16,
    CurrentTotalPower = 17,
}

/// Storage Power Actor
pub struct Actor;

impl Actor {
    /// Constructor for StoragePower actor
    fn constructor(rt: &impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(iter::once(&SYSTEM_ACTOR_ADDR))?;

        let st = State::new(rt.store(), rt.curr_epoch())?;
        rt.create(&st)?;
        Ok(())
    }

    fn create_miner(
        rt: &impl Runtime,
        params: CreateMinerParams,
    ) -> Result<CreateMinerReturn, ActorError> {
        rt.validate_immediate_caller_type(CALLER_TYPES_SIGNABLE)?;
        let value = rt.message().value_received();

        let constructor_params = RawBytes::serialize(ext::miner::MinerConstructorParams {
            owner: params.owner,
            worker: params.worker,
            seal_proof_type: params.seal_proof_type,
            peer_id: params.peer,
        })?;
        let miner_actor_code_cid = rt.get_code_cid_for_type(Type::Miner);
        let ext::init::ExecReturn { id_address, robust_address } = deserialize_block(
            extract_send_result(rt.send(
                &INIT_ACTOR_ADDR,
                ext::init::EXEC_METHOD,
                IpldBlock::serialize_cbor(&ext::init::ExecParams {
                    code_cid: miner_actor_code_cid,
                    constructor_params,
                })?,
                value,
            ))
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to init new actor")?,
        )?;

        rt.transaction(|st: &mut State, rt| st.create_claim(rt.store(), &id_address))?;
        Ok(CreateMinerReturn { id_address, robust_address })
    }

    /// Removes a miner without power. The miner burns its remaining balance as it goes.
    fn delete_miner(rt: &impl Runtime, params: DeleteMinerParams) -> Result<(), ActorError> {
        let miner = resolve_miner_address(rt, &params.miner)?;

        let st: State = rt.state()?;
        let claim = st
            .get_claim(rt.store(), &miner)?
            .ok_or_else(|| actor_error!(not_found, "unknown miner {}", params.miner))?;
        if !claim.is_zero() {
            return Err(actor_error!(
                forbidden,
                "deletion requested for miner {} with power {:?}",
                miner,
                claim.power()
            ));
        }

        let control: ext::miner::GetControlAddressesReturn = deserialize_block(
            extract_send_result(rt.send(
                &miner,
                ext::miner::CONTROL_ADDRESSES_METHOD,
                None,
                TokenAmount::zero(),
            ))
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to get miner control addresses")?,
        )?;
        rt.validate_immediate_caller_is([&control.owner, &control.worker])?;

        delete_miner_actor(rt, &miner, control.owner, TokenAmount::zero())
    }

    fn on_sector_prove_commit(
        rt: &impl Runtime,
        params: OnSectorProveCommitParams,
    ) -> Result<OnSectorProveCommitReturn, ActorError> {
        rt.validate_immediate_caller_type(iter::once(&Type::Miner))?;
        let miner = rt.message().caller();
        let power = power_for_weight(rt.policy(), &params.weight);
        let circulating_supply = rt.total_fil_circ_supply();

        let pledge = rt.transaction(|st: &mut State, rt| {
            let pledge = initial_pledge_for_power(
                rt.policy(),
                &power.qa,
                &st.this_epoch_baseline_power,
                &st.this_epoch_reward_smoothed,
                &st.this_epoch_qa_power_smoothed,
                &circulating_supply,
            );
            st.add_to_claim(rt.store(), &miner, &power)?;
            Ok(pledge)
        })?;
        Ok(OnSectorProveCommitReturn { pledge })
    }

    fn on_sector_terminate(
        rt: &impl Runtime,
        params: OnSectorTerminateParams,
    ) -> Result<OnSectorTerminateReturn, ActorError> {
        rt.validate_immediate_caller_type(iter::once(&Type::Miner))?;
        let miner = rt.message().caller();
        if !matches!(
            params.termination_type,
            SECTOR_TERMINATION_EXPIRED | SECTOR_TERMINATION_MANUAL | SECTOR_TERMINATION_FAULTY
        ) {
            return Err(actor_error!(
                illegal_argument,
                "invalid termination type {}",
                params.termination_type
            ));
        }
        if params.pledge.is_negative() {
            return Err(actor_error!(illegal_argument, "negative pledge {}", params.pledge));
        }
        if params.sector_ages.len() != params.weights.len() {
            return Err(actor_error!(
                illegal_argument,
                "{} sector ages for {} weights",
                params.sector_ages.len(),
                params.weights.len()
            ));
        }
        let power = power_for_weights(rt.policy(), &params.weights);

        let penalty = rt.transaction(|st: &mut State, rt| {
            st.add_to_claim(rt.store(), &miner, &-power)?;
            if params.termination_type == SECTOR_TERMINATION_EXPIRED {
                return Ok(TokenAmount::zero());
            }
            let total = params
                .weights
                .iter()
                .zip(&params.sector_ages)
                .fold(TokenAmount::zero(), |acc, (w, age)| {
                    acc + termination_penalty(rt.policy(), st, w, *age)
                });
            Ok(cmp::min(total, params.pledge.clone()))
        })?;
        Ok(OnSectorTerminateReturn { penalty })
    }

    fn on_fault_begin(rt: &impl Runtime, params: OnFaultBeginParams) -> Result<(), ActorError> {
        rt.validate_immediate_caller_type(iter::once(&Type::Miner))?;
        let miner = rt.message().caller();
        let power = power_for_weights(rt.policy(), &params.weights);
        rt.transaction(|st: &mut State, rt| st.add_to_claim(rt.store(), &miner, &-power))
    }

    fn on_fault_end(rt: &impl Runtime, params: OnFaultEndParams) -> Result<(), ActorError> {
        rt.validate_immediate_caller_type(iter::once(&Type::Miner))?;
        let miner = rt.message().caller();
        let power = power_for_weights(rt.policy(), &params.weights);
        rt.transaction(|st: &mut State, rt| st.add_to_claim(rt.store(), &miner, &power))
    }

    /// Replaces the power of a sector's previous weight with that of its new weight, returning
    /// the pledge the sector must now carry. The pledge never decreases.
    fn on_sector_modify_weight_desc(
        rt: &impl Runtime,
        params: OnSectorModifyWeightDescParams,
    ) -> Result<OnSectorModifyWeightDescReturn, ActorError> {
        rt.validate_immediate_caller_type(iter::once(&Type::Miner))?;
        let miner = rt.message().caller();
        let prev_power = power_for_weight(rt.policy(), &params.prev_weight);
        let new_power = power_for_weight(rt.policy(), &params.new_weight);
        let circulating_supply = rt.total_fil_circ_supply();

        let new_pledge = rt.transaction(|st: &mut State, rt| {
            st.add_to_claim(rt.store(), &miner, &(&new_power - &prev_power))?;
            let required = initial_pledge_for_power(
                rt.policy(),
                &new_power.qa,
                &st.this_epoch_baseline_power,
                &st.this_epoch_reward_smoothed,
                &st.this_epoch_qa_power_smoothed,
                &circulating_supply,
            );
            Ok(cmp::max(required, params.prev_pledge.clone()))
        })?;
        Ok(OnSectorModifyWeightDescReturn { new_pledge })
    }

    fn on_miner_windowed_post_success(rt: &impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_type(iter::once(&Type::Miner))?;
        let miner = rt.message().caller();
        rt.transaction(|st: &mut State, rt| st.delete_fault_miner(rt.store(), &miner))
    }

    /// Records a missed proving period. Too many in a row remove the miner from the power table.
    fn on_miner_windowed_post_failure(
        rt: &impl Runtime,
        params: OnMinerWindowedPoStFailureParams,
    ) -> Result<OnMinerWindowedPoStFailureReturn, ActorError> {
        rt.validate_immediate_caller_type(iter::once(&Type::Miner))?;
        let miner = rt.message().caller();
        let max_failures = rt.policy().wpost_max_consecutive_failures;

        let deregistered = rt.transaction(|st: &mut State, rt| {
            if st.get_claim(rt.store(), &miner)?.is_none() {
                return Err(actor_error!(not_found, "no claim for miner {}", miner));
            }
            st.put_fault_miner(rt.store(), &miner)?;
            if params.num_consecutive_failures > max_failures {
                st.delete_claim(rt.store(), &miner)?;
                return Ok(true);
            }
            Ok(false)
        })?;

        if deregistered {
            info!(
                "deregistered miner {} after {} consecutive PoSt failures",
                miner, params.num_consecutive_failures
            );
        }
        Ok(OnMinerWindowedPoStFailureReturn { deregistered })
    }

    fn enroll_cron_event(
        rt: &impl Runtime,
        params: EnrollCronEventParams,
    ) -> Result<(), ActorError> {
        rt.validate_immediate_caller_type(iter::once(&Type::Miner))?;
        let miner_addr = rt.message().caller();
        if params.event_epoch < 0 {
            return Err(actor_error!(
                illegal_argument,
                "cron event epoch {} cannot be less than zero",
                params.event_epoch
            ));
        }

        rt.transaction(|st: &mut State, rt| {
            // Events for epochs already dispatched run at the next tick.
            let epoch = cmp::max(params.event_epoch, st.last_processed_cron_epoch + 1);
            st.append_cron_event(
                rt.store(),
                epoch,
                CronEvent { miner_addr, callback_payload: params.payload },
            )
        })
    }

    /// Slashes a miner proven to have committed a consensus fault by a multiple of the expected
    /// epoch reward, pays the reporter a share of the slash and removes the miner from the
    /// network. The rest of the miner's balance is burnt along with the actor.
    fn report_consensus_fault(
        rt: &impl Runtime,
        params: ReportConsensusFaultParams,
    ) -> Result<(), ActorError> {
        rt.validate_immediate_caller_accept_any()?;
        let reporter = rt.message().caller();

        let fault = rt
            .verify_consensus_fault(&params.header1, &params.header2, &params.header_extra)
            .context_code(ExitCode::USR_ILLEGAL_ARGUMENT, "fault not verified")?
            .context_code(ExitCode::USR_ILLEGAL_ARGUMENT, "no consensus fault")?;

        let miner = resolve_miner_address(rt, &fault.target)
            .context_code(ExitCode::USR_ILLEGAL_ARGUMENT, "invalid fault target")?;
        let st: State = rt.state()?;
        if st.get_claim(rt.store(), &miner)?.is_none() {
            return Err(actor_error!(illegal_argument, "miner {} not registered", miner));
        }

        let elapsed = rt.curr_epoch() - fault.epoch;
        if elapsed <= 0 {
            return Err(actor_error!(
                illegal_argument,
                "fault epoch {} is not before current epoch {}",
                fault.epoch,
                rt.curr_epoch()
            ));
        }

        let miner_id = miner.id().context_code(ExitCode::USR_ILLEGAL_STATE, "miner not an ID")?;
        let balance = rt.actor_balance(miner_id).unwrap_or_default();
        let penalty = consensus_fault_penalty(
            rt.policy(),
            TokenAmount::from_atto(st.this_epoch_reward_smoothed.estimate()),
        );
        let slashed = cmp::min(penalty, balance);
        let reward = reward_for_consensus_slash_report(rt.policy(), elapsed, &slashed);

        delete_miner_actor(rt, &miner, reporter, reward.clone())?;
        info!(
            "deleted miner {} for {:?} consensus fault at epoch {}, slashed {}, reporter {} rewarded {}",
            miner, fault.fault_type, fault.epoch, slashed, reporter, reward
        );
        Ok(())
    }

    fn on_epoch_tick_end(rt: &impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(iter::once(&CRON_ACTOR_ADDR))?;

        let reward: ThisEpochRewardReturn = deserialize_block(
            extract_send_result(rt.send(
                &REWARD_ACTOR_ADDR,
                THIS_EPOCH_REWARD_METHOD,
                None,
                TokenAmount::zero(),
            ))
            .map_err(|e| e.wrap("failed to check epoch reward"))?,
        )?;
        let prev_processed = rt.transaction(|st: &mut State, _| {
            st.this_epoch_reward_smoothed = reward.this_epoch_reward_smoothed;
            st.this_epoch_baseline_power = reward.this_epoch_baseline_power;
            Ok(st.last_processed_cron_epoch)
        })?;

        initiate_surprise_post_challenges(rt)?;
        process_deferred_cron_events(rt)?;

        let current_epoch = rt.curr_epoch();
        rt.transaction(|st: &mut State, _| {
            st.last_processed_cron_epoch = current_epoch;
            let delta = current_epoch - prev_processed;
            if delta > 0 {
                st.update_smoothed_estimate(delta);
            }
            Ok(())
        })
    }

    /// Adjusts the network's total pledge by a miner's change in locked funds.
    fn update_pledge_total(
        rt: &impl Runtime,
        params: UpdatePledgeTotalParams,
    ) -> Result<(), ActorError> {
        rt.validate_immediate_caller_type(iter::once(&Type::Miner))?;
        let miner = rt.message().caller();
        rt.transaction(|st: &mut State, rt| {
            // A deregistered miner still releases its pledge as it self-destructs.
            if params.pledge_delta.is_positive() && st.get_claim(rt.store(), &miner)?.is_none() {
                return Err(actor_error!(not_found, "no claim for miner {}", miner));
            }
            st.add_pledge_total(&params.pledge_delta)
        })
    }

    /// Returns the network totals and estimates that pledge and penalty calculations depend on.
    fn current_total_power(rt: &impl Runtime) -> Result<CurrentTotalPowerReturn, ActorError> {
        rt.validate_immediate_caller_accept_any()?;
        let st: State = rt.state()?;
        Ok(CurrentTotalPowerReturn {
            raw_byte_power: st.total_raw_byte_power,
            quality_adj_power: st.total_quality_adj_power,
            pledge_collateral: st.total_pledge_collateral,
            quality_adj_power_smoothed: st.this_epoch_qa_power_smoothed,
            this_epoch_reward_smoothed: st.this_epoch_reward_smoothed,
            this_epoch_baseline_power: st.this_epoch_baseline_power,
        })
    }
}

fn resolve_miner_address(rt: &impl Runtime, addr: &Address) -> Result<Address, ActorError> {
    let id = rt
        .resolve_address(addr)
        .ok_or_else(|| actor_error!(not_found, "failed to resolve address {}", addr))?;
    Ok(Address::new_id(id))
}

/// Tells the miner to pay `reward` to `beneficiary` and self-destruct, then removes its claim.
fn delete_miner_actor(
    rt: &impl Runtime,
    miner: &Address,
    beneficiary: Address,
    beneficiary_reward: TokenAmount,
) -> Result<(), ActorError> {
    extract_send_result(rt.send(
        miner,
        ext::miner::ON_DELETE_MINER_METHOD,
        IpldBlock::serialize_cbor(&ext::miner::OnDeleteMinerParams {
            beneficiary,
            beneficiary_reward,
        })?,
        TokenAmount::zero(),
    ))
    .with_context(|| format!("failed to delete miner {}", miner))?;

    rt.transaction(|st: &mut State, rt| {
        st.delete_claim(rt.store(), miner)?;
        Ok(())
    })
}

/// Penalty for terminating a sector of the given weight before its scheduled expiration.
fn termination_penalty(
    policy: &Policy,
    st: &State,
    weight: &SectorStorageWeightDesc,
    sector_age: ChainEpoch,
) -> TokenAmount {
    let qa = power_for_weight(policy, weight).qa;
    let day_reward = expected_reward_for_power(
        &st.this_epoch_reward_smoothed,
        &st.this_epoch_qa_power_smoothed,
        &qa,
        EPOCHS_IN_DAY,
    );
    let termination_reward = expected_reward_for_power(
        &st.this_epoch_reward_smoothed,
        &st.this_epoch_qa_power_smoothed,
        &qa,
        policy.termination_reward_days * EPOCHS_IN_DAY,
    );
    pledge_penalty_for_termination(
        policy,
        &day_reward,
        sector_age,
        &termination_reward,
        &st.this_epoch_qa_power_smoothed,
        &qa,
        &st.this_epoch_reward_smoothed,
    )
}

/// Picks `count` distinct miners from `candidates`, driven by `randomness`.
/// Each draw hashes the randomness with the draw index; collisions step to the next candidate.
pub fn select_miners_to_surprise(
    candidates: &[Address],
    count: u64,
    randomness: &[u8],
    blake2b: impl Fn(&[u8]) -> [u8; 32],
) -> Vec<Address> {
    let n = candidates.len();
    let count = cmp::min(count, n as u64);
    let mut taken = vec![false; n];
    let mut selected = Vec::with_capacity(count as usize);
    for draw in 0..count {
        let mut input = randomness.to_vec();
        input.extend_from_slice(&draw.to_be_bytes());
        let digest = blake2b(&input);
        let mut idx = (BigEndian::read_u64(&digest) % n as u64) as usize;
        while taken[idx] {
            idx = (idx + 1) % n;
        }
        taken[idx] = true;
        selected.push(candidates[idx]);
    }
    selected
}

fn initiate_surprise_post_challenges(rt: &impl Runtime) -> Result<(), ActorError> {
    let st: State = rt.state()?;
    let count = surprise_challenge_count(rt.policy(), cmp::max(st.miner_count, 0) as u64);
    if count == 0 {
        return Ok(());
    }
    let candidates = st.miners_with_power(rt.store())?;
    if candidates.is_empty() {
        return Ok(());
    }

    let randomness = rt.get_randomness_from_beacon(
        DomainSeparationTag::SurprisePoStSelectMiners,
        rt.curr_epoch(),
        &[],
    )?;
    let selected =
        select_miners_to_surprise(&candidates, count, &randomness, |b| rt.hash_blake2b(b));

    for miner in selected {
        if let Err(e) = extract_send_result(rt.send(
            &miner,
            ext::miner::ON_SURPRISE_POST_CHALLENGE_METHOD,
            None,
            TokenAmount::zero(),
        )) {
            warn!("failed to issue surprise PoSt challenge to miner {}: {}", miner, e);
        }
    }
    Ok(())
}

fn process_deferred_cron_events(rt: &impl Runtime) -> Result<(), ActorError> {
    let current_epoch = rt.curr_epoch();
    let st: State = rt.state()?;
    let epochs = st.pending_cron_epochs(rt.store(), current_epoch)?;

    for epoch in epochs {
        let events = rt.transaction(|st: &mut State, rt| {
            let events = st.take_cron_events(rt.store(), epoch)?;
            st.last_processed_cron_epoch = epoch;
            let mut live = Vec::with_capacity(events.len());
            for event in events {
                if st.get_claim(rt.store(), &event.miner_addr)?.is_some() {
                    live.push(event);
                } else {
                    warn!(
                        "dropping cron event at epoch {} for unregistered miner {}",
                        epoch, event.miner_addr
                    );
                }
            }
            Ok(live)
        })?;

        for event in events {
            let params = IpldBlock { codec: DAG_CBOR, data: event.callback_payload.to_vec() };
            if let Err(e) = extract_send_result(rt.send(
                &event.miner_addr,
                ext::miner::ON_DEFERRED_CRON_EVENT_METHOD,
                Some(params),
                TokenAmount::zero(),
            )) {
                error!(
                    "OnDeferredCronEvent failed for miner {} at epoch {}: {}",
                    event.miner_addr, epoch, e
                );
            }
        }
    }
    Ok(())
}

impl ActorCode for Actor {
    type Methods = Method;

    fn name() -> &'static str {
        "StoragePower"
    }

    actor_dispatch! {
        Constructor => constructor,
        CreateMiner => create_miner,
        DeleteMiner => delete_miner,
        OnSectorProveCommit => on_sector_prove_commit,
        OnSectorTerminate => on_sector_terminate,
        OnFaultBegin => on_fault_begin,
        OnFaultEnd => on_fault_end,
        OnSectorModifyWeightDesc => on_sector_modify_weight_desc,
        OnMinerWindowedPoStSuccess => on_miner_windowed_post_success,
        OnMinerWindowedPoStFailure => on_miner_windowed_post_failure,
        EnrollCronEvent => enroll_cron_event,
        ReportConsensusFault => report_consensus_fault,
        OnEpochTickEnd => on_epoch_tick_end,
        UpdatePledgeTotal => update_pledge_total,
        CurrentTotalPower => current_total_power,
    }
}
