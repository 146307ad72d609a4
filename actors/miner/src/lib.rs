// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp;
use std::iter;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use cid::multihash::Code::Blake2b256;
use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::{to_vec, CborStore, RawBytes};
use fvm_shared::address::{Address, Protocol};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::randomness::Randomness;
use fvm_shared::sector::{
    PoStProof, RegisteredSealProof, SealVerifyInfo, SectorID, SectorInfo, WindowPoStVerifyInfo,
};
use fvm_shared::{ActorID, METHOD_CONSTRUCTOR, METHOD_SEND};
use log::{debug, info, warn};
use num_derive::FromPrimitive;
use num_traits::Zero;

pub use bitfield_queue::*;
pub use deadlines::*;
use fil_actors_runtime::runtime::builtins::{Type, CALLER_TYPES_SIGNABLE};
use fil_actors_runtime::runtime::{ActorCode, DomainSeparationTag, Policy, Runtime};
use fil_actors_runtime::{
    actor_dispatch, actor_error, deserialize_block, extract_send_result, ActorContext, ActorError,
    AsActorError, BURNT_FUNDS_ACTOR_ADDR, INIT_ACTOR_ADDR, REWARD_ACTOR_ADDR,
    STORAGE_MARKET_ACTOR_ADDR, STORAGE_POWER_ACTOR_ADDR,
};
pub use monies::*;
pub use policy::*;
pub use state::*;
pub use types::*;
pub use vesting_state::*;

mod bitfield_queue;
mod deadlines;
#[doc(hidden)]
pub mod ext;
mod monies;
mod policy;
mod state;
pub mod testing;
mod types;
mod vesting_state;

/// Storage Miner actor methods available
#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    ControlAddresses = 2,
    ChangeWorkerAddress = 3,
    ChangePeerID = 4,
    SubmitWindowedPoSt = 5,
    PreCommitSector = 6,
    ProveCommitSector = 7,
    ExtendSectorExpiration = 8,
    TerminateSectors = 9,
    DeclareFaults = 10,
    DeclareFaultsRecovered = 11,
    OnDeferredCronEvent = 12,
    CheckSectorProven = 13,
    AwardReward = 14,
    ReportConsensusFault = 15,
    WithdrawBalance = 16,
    OnDeleteMiner = 17,
    OnSurprisePoStChallenge = 18,
}

/// Miner Actor
pub struct Actor;

impl Actor {
    pub fn constructor(
        rt: &impl Runtime,
        params: MinerConstructorParams,
    ) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(iter::once(&INIT_ACTOR_ADDR))?;

        let owner = resolve_owner_address(rt, params.owner)?;
        let worker = resolve_worker_address(rt, params.worker)?;

        let policy = rt.policy();
        let current_epoch = rt.curr_epoch();
        let blake2b = |b: &[u8]| rt.hash_blake2b(b);
        let offset =
            assign_proving_period_offset(policy, rt.message().receiver(), current_epoch, blake2b)?;
        let period_start = current_proving_period_start(policy, current_epoch, offset);
        if period_start > current_epoch {
            return Err(actor_error!(
                illegal_state,
                "computed proving period start {} after current epoch {}",
                period_start,
                current_epoch
            ));
        }

        let info = MinerInfo::new(
            Address::new_id(owner),
            Address::new_id(worker),
            params.peer_id,
            params.seal_proof_type,
        )?;
        let info_cid = rt
            .store()
            .put_cbor(&info, Blake2b256)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to construct miner info")?;

        let st = State::new(policy, rt.store(), info_cid, period_start)?;
        rt.create(&st)?;

        // The first proving period ends at the epoch before the next boundary.
        enroll_cron_event(
            rt,
            period_start + policy.wpost_proving_period - 1,
            CronEventPayload { event_type: CRON_EVENT_PROVING_PERIOD, sectors: None },
        )
    }

    /// Returns the owner and worker addresses.
    fn control_addresses(rt: &impl Runtime) -> Result<GetControlAddressesReturn, ActorError> {
        rt.validate_immediate_caller_accept_any()?;
        let state: State = rt.state()?;
        let info = state.get_info(rt.store())?;
        Ok(GetControlAddressesReturn { owner: info.owner, worker: info.worker })
    }

    /// Schedules a change of worker key, effective after a delay.
    fn change_worker_address(
        rt: &impl Runtime,
        params: ChangeWorkerAddressParams,
    ) -> Result<(), ActorError> {
        let new_worker = Address::new_id(resolve_worker_address(rt, params.new_worker)?);

        let effective_at = rt.transaction(|state: &mut State, rt| {
            let mut info = state.get_info(rt.store())?;

            // Only the Owner is allowed to change the worker.
            rt.validate_immediate_caller_is(iter::once(&info.owner))?;

            let effective_at = rt.curr_epoch() + rt.policy().worker_key_change_delay;
            info.pending_worker_key = Some(WorkerKeyChange { new_worker, effective_at });
            state.save_info(rt.store(), &info)?;
            Ok(effective_at)
        })?;

        enroll_cron_event(
            rt,
            effective_at,
            CronEventPayload { event_type: CRON_EVENT_WORKER_KEY_CHANGE, sectors: None },
        )
    }

    fn change_peer_id(rt: &impl Runtime, params: ChangePeerIDParams) -> Result<(), ActorError> {
        rt.transaction(|state: &mut State, rt| {
            let mut info = state.get_info(rt.store())?;
            rt.validate_immediate_caller_is(iter::once(&info.worker))?;

            info.peer_id = params.new_id;
            state.save_info(rt.store(), &info)
        })
    }

    /// Invoked by miner's worker address to submit their fallback post
    fn submit_windowed_post(
        rt: &impl Runtime,
        params: SubmitWindowedPoStParams,
    ) -> Result<(), ActorError> {
        let current_epoch = rt.curr_epoch();
        let policy = rt.policy();

        if params.partitions.len() as u64 > policy.wpost_message_partitions_max {
            return Err(actor_error!(
                illegal_argument,
                "too many partitions {}, limit {}",
                params.partitions.len(),
                policy.wpost_message_partitions_max
            ));
        }
        if params.partitions.len() != params.proofs.len() {
            return Err(actor_error!(
                illegal_argument,
                "proof count {} must match partition count {}",
                params.proofs.len(),
                params.partitions.len()
            ));
        }
        let submitted = BitField::try_from_bits(params.partitions.iter().copied())
            .context_code(ExitCode::USR_ILLEGAL_ARGUMENT, "invalid partition indices")?;
        if submitted.len() != params.partitions.len() as u64 {
            return Err(actor_error!(illegal_argument, "duplicate partitions in submission"));
        }

        let st: State = rt.state()?;
        let info = st.get_info(rt.store())?;
        rt.validate_immediate_caller_is(iter::once(&info.worker))?;

        let power_total = request_current_total_power(rt)?;

        let (missed, recovered_weights) = rt.transaction(|state: &mut State, rt| {
            let deadline = state.deadline_info(policy, current_epoch);
            if !deadline.period_started() {
                return Err(actor_error!(
                    illegal_state,
                    "proving period at {} not yet open at {}",
                    deadline.period_start,
                    current_epoch
                ));
            }
            // The period-end cron has not yet run.
            if !deadline.is_open() {
                return Err(actor_error!(
                    illegal_state,
                    "proving period at {} elapsed at {}",
                    deadline.period_start,
                    current_epoch
                ));
            }
            if params.deadline != deadline.index {
                return Err(actor_error!(
                    illegal_argument,
                    "invalid deadline {} at epoch {}, expected {}",
                    params.deadline,
                    current_epoch,
                    deadline.index
                ));
            }

            // Record the submission first, so a partition cannot be proven twice in a period.
            state.add_post_submissions(&submitted)?;

            // Detect and penalize missing proofs for the deadlines already closed.
            let missed = process_missed_posts(
                policy,
                rt.store(),
                state,
                &info,
                deadline.index,
                current_epoch,
                &rt.current_balance(),
                &power_total,
            )?;

            let deadlines = state.load_deadlines(rt.store())?;
            let partition_sectors = deadlines.compute_partitions_sectors(
                info.window_post_partition_sectors,
                deadline.index,
                &params.partitions,
            )?;
            let proven = BitField::union(partition_sectors.iter());

            // Faults declared and not recovering are skipped, recoveries are proven.
            let expected_faults = &state.faults - &state.recoveries;
            let recoveries = &proven & &state.recoveries;
            let sector_infos = state.load_sector_infos(rt.store(), &proven)?;
            let first_good = sector_infos
                .iter()
                .find(|s| !expected_faults.get(s.info.sector_number))
                .cloned()
                .ok_or_else(|| {
                    actor_error!(illegal_argument, "no active sectors in proven partitions")
                })?;
            let challenged: Vec<SectorOnChainInfo> = sector_infos
                .into_iter()
                .map(|s| {
                    if expected_faults.get(s.info.sector_number) {
                        first_good.clone()
                    } else {
                        s
                    }
                })
                .collect();

            verify_windowed_post(rt, deadline.challenge, &challenged, params.proofs)?;

            // Proven recoveries are no longer faulty.
            let mut recovered = state.load_sector_infos(rt.store(), &recoveries)?;
            for sector in recovered.iter_mut() {
                sector.declared_fault_epoch = None;
                sector.declared_fault_duration = None;
            }
            let recovered_weights =
                recovered.iter().map(|s| weight_for_sector(info.sector_size, s)).collect::<Vec<_>>();
            state.put_sectors(rt.store(), recovered)?;
            state.remove_faults(rt.store(), &recoveries)?;

            Ok((missed, recovered_weights))
        })?;

        apply_fault_penalty(rt, missed)?;
        request_end_faults(rt, recovered_weights)
    }

    /// Proposals must be posted on chain via sma.PublishStorageDeals before PreCommitSector.
    /// Optimization: PreCommitSector could contain a list of deals that are not published yet.
    fn pre_commit_sector(
        rt: &impl Runtime,
        params: SectorPreCommitInfo,
    ) -> Result<(), ActorError> {
        let current_epoch = rt.curr_epoch();
        let policy = rt.policy();

        let st: State = rt.state()?;
        let info = st.get_info(rt.store())?;
        rt.validate_immediate_caller_is(iter::once(&info.worker))?;

        if params.expiration <= current_epoch {
            return Err(actor_error!(
                illegal_argument,
                "sector expiration {} must be after now {}",
                params.expiration,
                current_epoch
            ));
        }
        if st.has_sector_number(rt.store(), params.sector_number)? {
            return Err(actor_error!(
                illegal_argument,
                "sector {} already committed",
                params.sector_number
            ));
        }
        if params.seal_proof != info.seal_proof_type {
            return Err(actor_error!(
                illegal_argument,
                "sector seal proof {:?} must match miner seal proof type {:?}",
                params.seal_proof,
                info.seal_proof_type
            ));
        }
        if params.seal_rand_epoch >= current_epoch {
            return Err(actor_error!(
                illegal_argument,
                "seal challenge epoch {} must be before now {}",
                params.seal_rand_epoch,
                current_epoch
            ));
        }
        let seal_duration = max_seal_duration(policy, params.seal_proof)?;
        let challenge_earliest = current_epoch - policy.chain_finality - seal_duration;
        if params.seal_rand_epoch < challenge_earliest {
            return Err(actor_error!(
                illegal_argument,
                "seal challenge epoch {} too old, must be after {}",
                params.seal_rand_epoch,
                challenge_earliest
            ));
        }
        validate_expiration_boundary(policy, &st, params.expiration)?;

        let power_total = request_current_total_power(rt)?;
        let duration = params.expiration - current_epoch;
        let qa = qa_power_for_weight(
            policy,
            info.sector_size,
            duration,
            &Zero::zero(),
            &Zero::zero(),
        );
        let deposit_req = pre_commit_deposit_for_power(
            policy,
            &power_total.this_epoch_reward_smoothed,
            &power_total.quality_adj_power_smoothed,
            &qa,
        );

        let sector_number = params.sector_number;
        let newly_vested = rt.transaction(|state: &mut State, rt| {
            let newly_vested = state.unlock_vested_funds(rt.store(), current_epoch)?;
            let available = state.get_available_balance(&rt.current_balance())?;
            if available < deposit_req {
                return Err(actor_error!(
                    insufficient_funds,
                    "insufficient funds for pre-commit deposit: {}, available: {}",
                    deposit_req,
                    available
                ));
            }

            state.add_pre_commit_deposit(&deposit_req)?;
            state.put_precommitted_sector(
                rt.store(),
                SectorPreCommitOnChainInfo {
                    info: params,
                    pre_commit_deposit: deposit_req.clone(),
                    pre_commit_epoch: current_epoch,
                },
            )?;
            state.assert_balance_invariants(&rt.current_balance())?;
            Ok(newly_vested)
        })?;

        notify_pledge_changed(rt, &-newly_vested)?;

        // Request deferred Cron check for PreCommit expiry check.
        let expiry_bound = current_epoch + seal_duration + 1;
        enroll_cron_event(
            rt,
            expiry_bound,
            CronEventPayload {
                event_type: CRON_EVENT_PRE_COMMIT_EXPIRY,
                sectors: Some(BitField::try_from_bits([sector_number]).context_code(
                    ExitCode::USR_ILLEGAL_ARGUMENT,
                    "invalid sector number",
                )?),
            },
        )
    }

    /// Checks state of the corresponding sector pre-commitment, verifies the proof, and activates
    /// the sector with its initial pledge.
    fn prove_commit_sector(
        rt: &impl Runtime,
        params: ProveCommitSectorParams,
    ) -> Result<(), ActorError> {
        rt.validate_immediate_caller_accept_any()?;

        let current_epoch = rt.curr_epoch();
        let policy = rt.policy();
        let sector_number = params.sector_number;

        let st: State = rt.state()?;
        let info = st.get_info(rt.store())?;
        let precommit = st
            .get_precommitted_sector(rt.store(), sector_number)?
            .ok_or_else(|| actor_error!(not_found, "no pre-committed sector {}", sector_number))?;

        let prove_commit_due =
            precommit.pre_commit_epoch + max_seal_duration(policy, precommit.info.seal_proof)?;
        if current_epoch > prove_commit_due {
            return Err(actor_error!(
                illegal_argument,
                "commitment proof for {} too late at {}, due {}",
                sector_number,
                current_epoch,
                prove_commit_due
            ));
        }
        let interactive_epoch = precommit.pre_commit_epoch + policy.pre_commit_challenge_delay;
        if current_epoch <= interactive_epoch {
            return Err(actor_error!(
                forbidden,
                "too early to prove sector {}, interactive randomness at {}",
                sector_number,
                interactive_epoch
            ));
        }

        verify_seal(rt, &precommit, interactive_epoch, params.proof.to_vec())?;

        let (deal_weight, verified_deal_weight) =
            request_deal_weights(rt, &precommit.info.deal_ids, precommit.info.expiration)?;

        let weight = SectorStorageWeightDesc {
            sector_size: info.sector_size,
            duration: precommit.info.expiration - current_epoch,
            deal_weight: deal_weight.clone(),
            verified_deal_weight: verified_deal_weight.clone(),
        };
        let pledge = request_prove_commit_power(rt, weight)?;

        let newly_vested = rt.transaction(|state: &mut State, rt| {
            state.add_pre_commit_deposit(&-precommit.pre_commit_deposit.clone())?;

            let available = state.get_available_balance(&rt.current_balance())?;
            if available < pledge {
                return Err(actor_error!(
                    insufficient_funds,
                    "insufficient funds for initial pledge requirement {}, available: {}",
                    pledge,
                    available
                ));
            }
            let newly_vested =
                state.add_locked_funds(rt.store(), current_epoch, &pledge, &policy.pledge_vesting)?;

            let expiration = precommit.info.expiration;
            state.put_sector(
                rt.store(),
                SectorOnChainInfo {
                    info: precommit.info,
                    activation_epoch: current_epoch,
                    deal_weight,
                    verified_deal_weight,
                    initial_pledge: pledge.clone(),
                    declared_fault_epoch: None,
                    declared_fault_duration: None,
                },
            )?;
            state.delete_precommitted_sectors(rt.store(), &[sector_number])?;
            state.add_sector_expirations(policy, rt.store(), expiration, &[sector_number])?;
            state.new_sectors.set(sector_number);

            state.assert_balance_invariants(&rt.current_balance())?;
            Ok(newly_vested)
        })?;

        notify_pledge_changed(rt, &(&pledge - &newly_vested))
    }

    fn check_sector_proven(
        rt: &impl Runtime,
        params: CheckSectorProvenParams,
    ) -> Result<(), ActorError> {
        rt.validate_immediate_caller_accept_any()?;
        let st: State = rt.state()?;
        st.get_sector(rt.store(), params.sector_number)?.ok_or_else(|| {
            actor_error!(not_found, "sector {} not proven", params.sector_number)
        })?;
        Ok(())
    }

    fn extend_sector_expiration(
        rt: &impl Runtime,
        params: ExtendSectorExpirationParams,
    ) -> Result<(), ActorError> {
        let current_epoch = rt.curr_epoch();
        let policy = rt.policy();

        let st: State = rt.state()?;
        let info = st.get_info(rt.store())?;
        rt.validate_immediate_caller_is(iter::once(&info.worker))?;

        let sector = st.get_sector(rt.store(), params.sector_number)?.ok_or_else(|| {
            actor_error!(not_found, "no such sector {}", params.sector_number)
        })?;
        if params.new_expiration < sector.info.expiration {
            return Err(actor_error!(
                illegal_argument,
                "cannot reduce sector expiration to {} from {}",
                params.new_expiration,
                sector.info.expiration
            ));
        }
        if sector.is_faulty() {
            return Err(actor_error!(
                illegal_argument,
                "cannot extend expiration of faulty sector {}",
                params.sector_number
            ));
        }
        validate_expiration_boundary(policy, &st, params.new_expiration)?;

        let prev_weight = weight_for_sector(info.sector_size, &sector);
        let mut new_sector = sector.clone();
        new_sector.info.expiration = params.new_expiration;
        let new_weight = weight_for_sector(info.sector_size, &new_sector);

        let new_pledge =
            request_modify_weight(rt, prev_weight, sector.initial_pledge.clone(), new_weight)?;
        let extra_pledge = cmp::max(&new_pledge - &sector.initial_pledge, TokenAmount::zero());

        let pledge_delta = rt.transaction(|state: &mut State, rt| {
            let available = state.get_available_balance(&rt.current_balance())?;
            if available < extra_pledge {
                return Err(actor_error!(
                    insufficient_funds,
                    "insufficient funds for extended pledge {}, available: {}",
                    extra_pledge,
                    available
                ));
            }
            let newly_vested = state.add_locked_funds(
                rt.store(),
                current_epoch,
                &extra_pledge,
                &policy.pledge_vesting,
            )?;

            new_sector.initial_pledge += &extra_pledge;
            let sector_number = new_sector.info.sector_number;
            state.put_sector(rt.store(), new_sector)?;
            state.remove_sector_expirations(
                policy,
                rt.store(),
                &BitField::try_from_bits([sector_number])
                    .context_code(ExitCode::USR_ILLEGAL_ARGUMENT, "invalid sector number")?,
            )?;
            state.add_sector_expirations(
                policy,
                rt.store(),
                params.new_expiration,
                &[sector_number],
            )?;
            Ok(&extra_pledge - newly_vested)
        })?;

        notify_pledge_changed(rt, &pledge_delta)
    }

    fn terminate_sectors(
        rt: &impl Runtime,
        params: TerminateSectorsParams,
    ) -> Result<(), ActorError> {
        let st: State = rt.state()?;
        let info = st.get_info(rt.store())?;
        rt.validate_immediate_caller_is(iter::once(&info.worker))?;

        terminate_sectors_internal(rt, &params.sectors, ext::power::SECTOR_TERMINATION_MANUAL)
    }

    fn declare_faults(rt: &impl Runtime, params: DeclareFaultsParams) -> Result<(), ActorError> {
        let current_epoch = rt.curr_epoch();
        let policy = rt.policy();

        let st: State = rt.state()?;
        let info = st.get_info(rt.store())?;
        rt.validate_immediate_caller_is(iter::once(&info.worker))?;

        let power_total = request_current_total_power(rt)?;

        let penalty = rt.transaction(|state: &mut State, rt| {
            let declared = validate_declarations(
                policy,
                rt.store(),
                state,
                current_epoch,
                params.faults.iter().map(|f| (f.deadline, &f.sectors)),
            )?;

            // Retracted recoveries remain faulty.
            let retracted = &declared & &state.recoveries;
            let already_faulty = &(&declared & &state.faults) - &retracted;
            if !already_faulty.is_empty() {
                return Err(actor_error!(
                    illegal_argument,
                    "sectors {:?} already faulty",
                    already_faulty.iter().collect::<Vec<_>>()
                ));
            }
            state.recoveries -= &retracted;

            let new_faults = &declared - &state.faults;
            let mut sectors = state.load_sector_infos(rt.store(), &new_faults)?;
            for sector in sectors.iter_mut() {
                sector.declared_fault_epoch = Some(current_epoch);
                sector.declared_fault_duration = Some(policy.fault_max_age);
            }
            let weights =
                sectors.iter().map(|s| weight_for_sector(info.sector_size, s)).collect::<Vec<_>>();
            state.put_sectors(rt.store(), sectors)?;
            let fault_epoch = state.post_state.proving_period_start;
            state.add_faults(rt.store(), &new_faults, fault_epoch)?;

            let qa = power_for_weights(policy, &weights).qa;
            let fee = pledge_penalty_for_declared_fault(
                policy,
                &power_total.this_epoch_reward_smoothed,
                &power_total.quality_adj_power_smoothed,
                &qa,
            );
            let (from_vesting, from_balance) = state.penalize_funds_in_priority_order(
                rt.store(),
                current_epoch,
                &fee,
                &rt.current_balance(),
            )?;

            Ok(FaultPenalty {
                new_fault_weights: weights,
                penalty: &from_vesting + from_balance,
                pledge_delta: -from_vesting,
            })
        })?;

        apply_fault_penalty(rt, penalty)
    }

    fn declare_faults_recovered(
        rt: &impl Runtime,
        params: DeclareFaultsRecoveredParams,
    ) -> Result<(), ActorError> {
        let current_epoch = rt.curr_epoch();
        let policy = rt.policy();

        rt.transaction(|state: &mut State, rt| {
            let info = state.get_info(rt.store())?;
            rt.validate_immediate_caller_is(iter::once(&info.worker))?;

            let declared = validate_declarations(
                policy,
                rt.store(),
                state,
                current_epoch,
                params.recoveries.iter().map(|r| (r.deadline, &r.sectors)),
            )?;

            if !state.faults.contains_all(&declared) {
                return Err(actor_error!(
                    illegal_argument,
                    "declared recoveries {:?} not currently faulty",
                    (&declared - &state.faults).iter().collect::<Vec<_>>()
                ));
            }
            if state.recoveries.contains_any(&declared) {
                return Err(actor_error!(
                    illegal_argument,
                    "sectors {:?} already declared recovered",
                    (&declared & &state.recoveries).iter().collect::<Vec<_>>()
                ));
            }

            // Power is restored only when the recovery is proven.
            state.recoveries |= &declared;
            Ok(())
        })
    }

    fn on_deferred_cron_event(
        rt: &impl Runtime,
        payload: CronEventPayload,
    ) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(iter::once(&STORAGE_POWER_ACTOR_ADDR))?;

        match payload.event_type {
            CRON_EVENT_WORKER_KEY_CHANGE => commit_worker_key_change(rt),
            CRON_EVENT_PRE_COMMIT_EXPIRY => match payload.sectors {
                Some(sectors) => check_precommit_expiry(rt, &sectors),
                None => Ok(()),
            },
            CRON_EVENT_PROVING_PERIOD => handle_proving_period(rt),
            other => Err(actor_error!(illegal_argument, "unhandled cron event type {}", other)),
        }
    }

    /// Locks a block reward under the reward vesting schedule.
    fn award_reward(rt: &impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(iter::once(&REWARD_ACTOR_ADDR))?;

        let amount = rt.message().value_received();
        if amount.is_negative() {
            return Err(actor_error!(illegal_argument, "cannot award negative reward {}", amount));
        }
        let current_epoch = rt.curr_epoch();

        let pledge_delta = rt.transaction(|state: &mut State, rt| {
            let newly_vested = state.add_locked_funds(
                rt.store(),
                current_epoch,
                &amount,
                &rt.policy().reward_vesting,
            )?;
            Ok(&amount - newly_vested)
        })?;

        notify_pledge_changed(rt, &pledge_delta)
    }

    fn report_consensus_fault(_rt: &impl Runtime) -> Result<(), ActorError> {
        Err(actor_error!(unhandled_message, "consensus faults are reported to the power actor"))
    }

    fn withdraw_balance(
        rt: &impl Runtime,
        params: WithdrawBalanceParams,
    ) -> Result<WithdrawBalanceReturn, ActorError> {
        if params.amount_requested.is_negative() {
            return Err(actor_error!(
                illegal_argument,
                "negative fund requested for withdrawal: {}",
                params.amount_requested
            ));
        }
        let current_epoch = rt.curr_epoch();

        let (owner, newly_vested, amount_withdrawn) = rt.transaction(|state: &mut State, rt| {
            let info = state.get_info(rt.store())?;

            // Only the owner is allowed to withdraw the balance as it belongs to/is controlled by the owner
            rt.validate_immediate_caller_is(iter::once(&info.owner))?;

            let newly_vested = state.unlock_vested_funds(rt.store(), current_epoch)?;
            let available = state.get_available_balance(&rt.current_balance())?;
            let amount_withdrawn = cmp::min(available, params.amount_requested);
            Ok((info.owner, newly_vested, amount_withdrawn))
        })?;

        if amount_withdrawn.is_positive() {
            extract_send_result(rt.send(&owner, METHOD_SEND, None, amount_withdrawn.clone()))?;
        }
        notify_pledge_changed(rt, &-newly_vested)?;

        let st: State = rt.state()?;
        st.assert_balance_invariants(&rt.current_balance())?;
        Ok(WithdrawBalanceReturn { amount_withdrawn })
    }

    /// Removes the miner from the network on the power actor's instruction, paying an optional
    /// reward to a beneficiary and burning the rest of the balance.
    fn on_delete_miner(rt: &impl Runtime, params: OnDeleteMinerParams) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(iter::once(&STORAGE_POWER_ACTOR_ADDR))?;
        if params.beneficiary_reward.is_negative() {
            return Err(actor_error!(
                illegal_argument,
                "negative beneficiary reward {}",
                params.beneficiary_reward
            ));
        }
        self_destruct(rt, Some((params.beneficiary, params.beneficiary_reward)))
    }

    /// Checks the deadlines already closed in the current period for missed proofs.
    fn on_surprise_post_challenge(rt: &impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(iter::once(&STORAGE_POWER_ACTOR_ADDR))?;
        let current_epoch = rt.curr_epoch();
        let policy = rt.policy();

        let st: State = rt.state()?;
        let deadline = st.deadline_info(policy, current_epoch);
        if !deadline.period_started() {
            return Ok(());
        }

        let power_total = request_current_total_power(rt)?;
        let penalty = rt.transaction(|state: &mut State, rt| {
            let info = state.get_info(rt.store())?;
            process_missed_posts(
                policy,
                rt.store(),
                state,
                &info,
                cmp::min(deadline.index, policy.wpost_period_deadlines),
                current_epoch,
                &rt.current_balance(),
                &power_total,
            )
        })?;

        apply_fault_penalty(rt, penalty)
    }
}

/// Power removed and funds drawn for newly faulty sectors, to be applied once the state
/// transaction has committed.
#[derive(Default)]
struct FaultPenalty {
    new_fault_weights: Vec<SectorStorageWeightDesc>,
    penalty: TokenAmount,
    pledge_delta: TokenAmount,
}

fn apply_fault_penalty(rt: &impl Runtime, fp: FaultPenalty) -> Result<(), ActorError> {
    request_begin_faults(rt, fp.new_fault_weights)?;
    burn_funds(rt, fp.penalty)?;
    notify_pledge_changed(rt, &fp.pledge_delta)
}

/// Detects sectors in partitions of the deadlines before `before_deadline` that have no PoSt this
/// period. Newly detected faults and failed recoveries pay the undeclared fault penalty.
#[allow(clippy::too_many_arguments)]
fn process_missed_posts<BS: Blockstore>(
    policy: &Policy,
    store: &BS,
    state: &mut State,
    info: &MinerInfo,
    before_deadline: u64,
    current_epoch: ChainEpoch,
    balance: &TokenAmount,
    power_total: &ext::power::CurrentTotalPowerReturn,
) -> Result<FaultPenalty, ActorError> {
    let deadlines = state.load_deadlines(store)?;
    let partition_size = info.window_post_partition_sectors;

    let mut detected = BitField::new();
    let mut failed_recoveries = BitField::new();
    for dl_idx in 0..before_deadline {
        let (first_partition, count) = deadlines.partitions_for_deadline(partition_size, dl_idx)?;
        for local_idx in 0..count {
            if state.post_submissions.get(first_partition + local_idx) {
                continue;
            }
            let sectors = deadlines.partition_sectors(partition_size, dl_idx, local_idx)?;
            detected |= &(&sectors - &state.faults);
            failed_recoveries |= &(&sectors & &state.recoveries);
        }
    }

    if detected.is_empty() && failed_recoveries.is_empty() {
        return Ok(FaultPenalty::default());
    }
    debug!(
        "detected {} missed-PoSt faults and {} failed recoveries before deadline {}",
        detected.len(),
        failed_recoveries.len(),
        before_deadline
    );
    state.post_state.missed_post_in_period = true;
    state.recoveries -= &failed_recoveries;

    let mut new_faults = state.load_sector_infos(store, &detected)?;
    for sector in new_faults.iter_mut() {
        sector.declared_fault_epoch = Some(current_epoch);
        sector.declared_fault_duration = Some(policy.fault_max_age);
    }
    let new_fault_weights =
        new_faults.iter().map(|s| weight_for_sector(info.sector_size, s)).collect::<Vec<_>>();
    state.put_sectors(store, new_faults)?;
    let fault_epoch = state.post_state.proving_period_start;
    state.add_faults(store, &detected, fault_epoch)?;

    let mut penalized_weights = new_fault_weights.clone();
    penalized_weights.extend(
        state
            .load_sector_infos(store, &failed_recoveries)?
            .iter()
            .map(|s| weight_for_sector(info.sector_size, s)),
    );
    let qa = power_for_weights(policy, &penalized_weights).qa;
    let target = pledge_penalty_for_undeclared_fault(
        policy,
        &power_total.this_epoch_reward_smoothed,
        &power_total.quality_adj_power_smoothed,
        &qa,
    );
    let (from_vesting, from_balance) =
        state.penalize_funds_in_priority_order(store, current_epoch, &target, balance)?;

    Ok(FaultPenalty {
        new_fault_weights,
        penalty: &from_vesting + from_balance,
        pledge_delta: -from_vesting,
    })
}

/// Validates fault or recovery declarations and returns the union of the declared sectors.
/// A declaration for a deadline that has already closed applies to the next proving period.
fn validate_declarations<'a, BS: Blockstore>(
    policy: &Policy,
    store: &BS,
    state: &State,
    current_epoch: ChainEpoch,
    declarations: impl Iterator<Item = (u64, &'a BitField)>,
) -> Result<BitField, ActorError> {
    let deadlines = state.load_deadlines(store)?;
    let mut declared = BitField::new();
    for (deadline_idx, sectors) in declarations {
        if deadline_idx >= policy.wpost_period_deadlines {
            return Err(actor_error!(
                illegal_argument,
                "invalid deadline {}, must be < {}",
                deadline_idx,
                policy.wpost_period_deadlines
            ));
        }
        let target = DeadlineInfo::new(
            policy,
            state.post_state.proving_period_start,
            deadline_idx,
            current_epoch,
        )
        .next_not_elapsed();
        if target.fault_cutoff_passed() {
            return Err(actor_error!(
                illegal_argument,
                "late declaration for deadline {} at {}, cutoff {}",
                deadline_idx,
                current_epoch,
                target.fault_cutoff
            ));
        }
        if !deadlines.sectors_at(deadline_idx)?.contains_all(sectors) {
            return Err(actor_error!(
                illegal_argument,
                "sectors not all due at deadline {}",
                deadline_idx
            ));
        }
        declared |= sectors;
    }
    Ok(declared)
}

fn validate_expiration_boundary(
    policy: &Policy,
    state: &State,
    expiration: ChainEpoch,
) -> Result<(), ActorError> {
    let boundary = state.proving_period_boundary(policy);
    if (expiration + 1).rem_euclid(policy.wpost_proving_period) != boundary {
        return Err(actor_error!(
            illegal_argument,
            "invalid expiration {}, must be immediately before proving period boundary {} mod {}",
            expiration,
            boundary,
            policy.wpost_proving_period
        ));
    }
    Ok(())
}

/// Removes sectors from every structure of the miner, ends their power and deals,
/// and releases their pledge. Sectors terminated early pay the penalty computed by power.
fn terminate_sectors_internal(
    rt: &impl Runtime,
    sectors: &BitField,
    termination_type: i64,
) -> Result<(), ActorError> {
    if sectors.is_empty() {
        return Ok(());
    }
    let current_epoch = rt.curr_epoch();
    let policy = rt.policy();

    let (infos, faulty, sector_size, pledge, unlocked) =
        rt.transaction(|state: &mut State, rt| {
            let info = state.get_info(rt.store())?;
            let infos = state.load_sector_infos(rt.store(), sectors)?;
            let faulty = sectors & &state.faults;

            state.delete_sectors(rt.store(), sectors)?;
            state.new_sectors -= sectors;
            let mut deadlines = state.load_deadlines(rt.store())?;
            deadlines.remove_from_all_deadlines(sectors);
            state.save_deadlines(rt.store(), &deadlines)?;
            state.remove_faults(rt.store(), &faulty)?;
            state.recoveries -= sectors;
            state.remove_sector_expirations(policy, rt.store(), sectors)?;

            let pledge: TokenAmount = infos.iter().map(|s| &s.initial_pledge).sum();
            let unlocked = state.unlock_unvested_funds(rt.store(), current_epoch, &pledge)?;
            Ok((infos, faulty, info.sector_size, pledge, unlocked))
        })?;

    let faulty_weights = infos
        .iter()
        .filter(|s| faulty.get(s.info.sector_number))
        .map(|s| weight_for_sector(sector_size, s))
        .collect::<Vec<_>>();
    let weights = infos.iter().map(|s| weight_for_sector(sector_size, s)).collect::<Vec<_>>();
    let sector_ages =
        infos.iter().map(|s| current_epoch - s.activation_epoch).collect::<Vec<_>>();
    let deal_ids = infos.iter().flat_map(|s| s.info.deal_ids.iter().copied()).collect::<Vec<_>>();

    // Faulty sectors regain power before termination so the full weight can be removed.
    request_end_faults(rt, faulty_weights)?;
    request_terminate_deals(rt, deal_ids)?;
    let penalty = request_terminate_power(rt, termination_type, weights, sector_ages, pledge)?;

    if termination_type != ext::power::SECTOR_TERMINATION_EXPIRED && penalty.is_positive() {
        let st: State = rt.state()?;
        let available = st.get_available_balance(&rt.current_balance())?;
        burn_funds(rt, cmp::min(penalty, available))?;
    }
    notify_pledge_changed(rt, &-unlocked)
}

fn commit_worker_key_change(rt: &impl Runtime) -> Result<(), ActorError> {
    rt.transaction(|state: &mut State, rt| {
        let mut info = state.get_info(rt.store())?;
        // A stale event for a change already committed is a no-op.
        let key = match info.pending_worker_key.clone() {
            Some(key) => key,
            None => return Ok(()),
        };
        if key.effective_at > rt.curr_epoch() {
            return Ok(());
        }

        info.worker = key.new_worker;
        info.pending_worker_key = None;
        state.save_info(rt.store(), &info)
    })
}

fn max_seal_duration(
    policy: &Policy,
    proof: RegisteredSealProof,
) -> Result<ChainEpoch, ActorError> {
    policy.max_seal_duration.get(proof).ok_or_else(|| {
        actor_error!(
            illegal_argument,
            "no max seal duration set for proof type: {}",
            i64::from(proof)
        )
    })
}

fn check_precommit_expiry(rt: &impl Runtime, sectors: &BitField) -> Result<(), ActorError> {
    let current_epoch = rt.curr_epoch();
    let policy = rt.policy();

    let deposit_to_burn = rt.transaction(|state: &mut State, rt| {
        let mut to_delete = Vec::new();
        let mut deposit_to_burn = TokenAmount::zero();
        for sector_number in sectors.iter() {
            let precommit = match state.get_precommitted_sector(rt.store(), sector_number)? {
                Some(precommit) => precommit,
                // Already proven.
                None => continue,
            };
            let seal_duration = max_seal_duration(policy, precommit.info.seal_proof)?;
            if current_epoch - precommit.pre_commit_epoch > seal_duration {
                to_delete.push(sector_number);
                deposit_to_burn += &precommit.pre_commit_deposit;
            }
        }

        state.delete_precommitted_sectors(rt.store(), &to_delete)?;
        state.add_pre_commit_deposit(&-deposit_to_burn.clone())?;
        Ok(deposit_to_burn)
    })?;

    burn_funds(rt, deposit_to_burn)
}

/// Runs at the last epoch of every proving period.
fn handle_proving_period(rt: &impl Runtime) -> Result<(), ActorError> {
    let current_epoch = rt.curr_epoch();
    let policy = rt.policy();

    // Vest locked funds.
    let newly_vested = rt.transaction(|state: &mut State, rt| {
        state.unlock_vested_funds(rt.store(), current_epoch)
    })?;
    notify_pledge_changed(rt, &-newly_vested)?;

    let st: State = rt.state()?;
    let deadline = st.deadline_info(policy, current_epoch);
    let power_total = request_current_total_power(rt)?;

    // Detect and penalize missing proofs, and report the period's outcome to power.
    if deadline.period_started() {
        let (penalty, failed, reset, failures) = rt.transaction(|state: &mut State, rt| {
            let info = state.get_info(rt.store())?;
            let penalty = process_missed_posts(
                policy,
                rt.store(),
                state,
                &info,
                policy.wpost_period_deadlines,
                current_epoch,
                &rt.current_balance(),
                &power_total,
            )?;

            let failed = state.post_state.missed_post_in_period;
            let reset = !failed && state.post_state.num_consecutive_failures > 0;
            if failed {
                state.post_state.num_consecutive_failures += 1;
            } else {
                state.post_state.num_consecutive_failures = 0;
            }
            Ok((penalty, failed, reset, state.post_state.num_consecutive_failures))
        })?;

        apply_fault_penalty(rt, penalty)?;

        if failed {
            if request_post_failure(rt, failures)? {
                info!("miner {} deregistered after {} missed periods", rt.message().receiver(), failures);
                return self_destruct(rt, None);
            }
        } else if reset {
            request_post_success(rt)?;
        }
    }

    // Expire sectors that are due.
    let expired = rt.transaction(|state: &mut State, rt| {
        state.pop_sector_expirations(policy, rt.store(), current_epoch)
    })?;
    terminate_sectors_internal(rt, &expired, ext::power::SECTOR_TERMINATION_EXPIRED)?;

    // Terminate sectors that have been faulty too long.
    let expired_faults = rt.transaction(|state: &mut State, rt| {
        state.pop_expired_faults(rt.store(), current_epoch - policy.fault_max_age)
    })?;
    terminate_sectors_internal(rt, &expired_faults, ext::power::SECTOR_TERMINATION_FAULTY)?;

    // Faults carried over from earlier periods pay the declared fault fee.
    let fee = rt.transaction(|state: &mut State, rt| {
        let ongoing = state.faults_started_before(rt.store(), deadline.period_start)?;
        if ongoing.is_empty() {
            return Ok(FaultPenalty::default());
        }
        let info = state.get_info(rt.store())?;
        let weights = state
            .load_sector_infos(rt.store(), &ongoing)?
            .iter()
            .map(|s| weight_for_sector(info.sector_size, s))
            .collect::<Vec<_>>();
        let target = pledge_penalty_for_declared_fault(
            policy,
            &power_total.this_epoch_reward_smoothed,
            &power_total.quality_adj_power_smoothed,
            &power_for_weights(policy, &weights).qa,
        );
        let (from_vesting, from_balance) = state.penalize_funds_in_priority_order(
            rt.store(),
            current_epoch,
            &target,
            &rt.current_balance(),
        )?;
        Ok(FaultPenalty {
            new_fault_weights: vec![],
            penalty: &from_vesting + from_balance,
            pledge_delta: -from_vesting,
        })
    })?;
    apply_fault_penalty(rt, fee)?;

    // Assign new sectors to deadlines for the next period.
    let st: State = rt.state()?;
    let seed = if st.new_sectors.is_empty() {
        None
    } else {
        let entropy = to_vec(&rt.message().receiver())?;
        Some(rt.get_randomness_from_tickets(
            DomainSeparationTag::WindowPoStDeadlineAssignment,
            current_epoch - 1,
            &entropy,
        )?)
    };

    let next_period_start = rt.transaction(|state: &mut State, rt| {
        if let Some(seed) = seed {
            let info = state.get_info(rt.store())?;
            let new_sectors = state.new_sectors.iter().collect::<Vec<_>>();
            let mut deadlines = state.load_deadlines(rt.store())?;
            assign_new_sectors(
                &mut deadlines,
                info.window_post_partition_sectors,
                &new_sectors,
                &seed,
            )?;
            state.save_deadlines(rt.store(), &deadlines)?;
        }
        state.new_sectors = BitField::new();
        state.post_submissions = BitField::new();
        state.post_state.missed_post_in_period = false;
        state.post_state.proving_period_start = deadline.next_period_start();
        Ok(state.post_state.proving_period_start)
    })?;

    enroll_cron_event(
        rt,
        next_period_start + policy.wpost_proving_period - 1,
        CronEventPayload { event_type: CRON_EVENT_PROVING_PERIOD, sectors: None },
    )
}

/// Terminates all deals, returns the locked pledge to power's accounting and deletes the actor.
/// An optional reward is paid out of the balance first, the remainder is burnt.
fn self_destruct(
    rt: &impl Runtime,
    reward: Option<(Address, TokenAmount)>,
) -> Result<(), ActorError> {
    let st: State = rt.state()?;

    let mut deal_ids = Vec::new();
    st.for_each_sector(rt.store(), |_, sector| {
        deal_ids.extend_from_slice(&sector.info.deal_ids);
        Ok(())
    })?;
    request_terminate_deals(rt, deal_ids)?;
    notify_pledge_changed(rt, &-st.locked_funds.clone())?;

    if let Some((beneficiary, amount)) = reward {
        let payout = cmp::min(amount, rt.current_balance());
        if payout.is_positive() {
            extract_send_result(rt.send(&beneficiary, METHOD_SEND, None, payout))
                .with_context(|| format!("failed to pay reward to {}", beneficiary))?;
        }
    }

    rt.delete_actor(&BURNT_FUNDS_ACTOR_ADDR)
}

fn enroll_cron_event(
    rt: &impl Runtime,
    event_epoch: ChainEpoch,
    cb: CronEventPayload,
) -> Result<(), ActorError> {
    let payload = RawBytes::serialize(&cb)?;
    let ser_params =
        IpldBlock::serialize_cbor(&ext::power::EnrollCronEventParams { event_epoch, payload })?;
    extract_send_result(rt.send(
        &STORAGE_POWER_ACTOR_ADDR,
        ext::power::ENROLL_CRON_EVENT_METHOD,
        ser_params,
        TokenAmount::zero(),
    ))?;

    Ok(())
}

fn request_begin_faults(
    rt: &impl Runtime,
    weights: Vec<SectorStorageWeightDesc>,
) -> Result<(), ActorError> {
    if weights.is_empty() {
        return Ok(());
    }
    extract_send_result(rt.send(
        &STORAGE_POWER_ACTOR_ADDR,
        ext::power::ON_FAULT_BEGIN_METHOD,
        IpldBlock::serialize_cbor(&ext::power::OnFaultBeginParams { weights })?,
        TokenAmount::zero(),
    ))
    .map_err(|e| e.wrap("failed to remove power for faults"))?;
    Ok(())
}

fn request_end_faults(
    rt: &impl Runtime,
    weights: Vec<SectorStorageWeightDesc>,
) -> Result<(), ActorError> {
    if weights.is_empty() {
        return Ok(());
    }
    extract_send_result(rt.send(
        &STORAGE_POWER_ACTOR_ADDR,
        ext::power::ON_FAULT_END_METHOD,
        IpldBlock::serialize_cbor(&ext::power::OnFaultEndParams { weights })?,
        TokenAmount::zero(),
    ))
    .map_err(|e| e.wrap("failed to restore power for recovered faults"))?;
    Ok(())
}

fn request_prove_commit_power(
    rt: &impl Runtime,
    weight: SectorStorageWeightDesc,
) -> Result<TokenAmount, ActorError> {
    let ret: ext::power::OnSectorProveCommitReturn = deserialize_block(
        extract_send_result(rt.send(
            &STORAGE_POWER_ACTOR_ADDR,
            ext::power::ON_SECTOR_PROVE_COMMIT_METHOD,
            IpldBlock::serialize_cbor(&ext::power::OnSectorProveCommitParams { weight })?,
            TokenAmount::zero(),
        ))
        .map_err(|e| e.wrap("failed to notify power of proven sector"))?,
    )?;
    Ok(ret.pledge)
}

fn request_terminate_power(
    rt: &impl Runtime,
    termination_type: i64,
    weights: Vec<SectorStorageWeightDesc>,
    sector_ages: Vec<ChainEpoch>,
    pledge: TokenAmount,
) -> Result<TokenAmount, ActorError> {
    let ret: ext::power::OnSectorTerminateReturn = deserialize_block(
        extract_send_result(rt.send(
            &STORAGE_POWER_ACTOR_ADDR,
            ext::power::ON_SECTOR_TERMINATE_METHOD,
            IpldBlock::serialize_cbor(&ext::power::OnSectorTerminateParams {
                termination_type,
                weights,
                sector_ages,
                pledge,
            })?,
            TokenAmount::zero(),
        ))
        .map_err(|e| e.wrap("failed to notify power of terminated sectors"))?,
    )?;
    Ok(ret.penalty)
}

fn request_modify_weight(
    rt: &impl Runtime,
    prev_weight: SectorStorageWeightDesc,
    prev_pledge: TokenAmount,
    new_weight: SectorStorageWeightDesc,
) -> Result<TokenAmount, ActorError> {
    let ret: ext::power::OnSectorModifyWeightDescReturn = deserialize_block(
        extract_send_result(rt.send(
            &STORAGE_POWER_ACTOR_ADDR,
            ext::power::ON_SECTOR_MODIFY_WEIGHT_DESC_METHOD,
            IpldBlock::serialize_cbor(&ext::power::OnSectorModifyWeightDescParams {
                prev_weight,
                prev_pledge,
                new_weight,
            })?,
            TokenAmount::zero(),
        ))
        .map_err(|e| e.wrap("failed to modify sector weight"))?,
    )?;
    Ok(ret.new_pledge)
}

fn request_post_success(rt: &impl Runtime) -> Result<(), ActorError> {
    extract_send_result(rt.send(
        &STORAGE_POWER_ACTOR_ADDR,
        ext::power::ON_MINER_WINDOWED_POST_SUCCESS_METHOD,
        None,
        TokenAmount::zero(),
    ))?;
    Ok(())
}

/// Reports a failed proving period. Returns whether power deregistered the miner.
fn request_post_failure(rt: &impl Runtime, num_consecutive_failures: i64) -> Result<bool, ActorError> {
    let ret: ext::power::OnMinerWindowedPoStFailureReturn = deserialize_block(
        extract_send_result(rt.send(
            &STORAGE_POWER_ACTOR_ADDR,
            ext::power::ON_MINER_WINDOWED_POST_FAILURE_METHOD,
            IpldBlock::serialize_cbor(&ext::power::OnMinerWindowedPoStFailureParams {
                num_consecutive_failures,
            })?,
            TokenAmount::zero(),
        ))
        .map_err(|e| e.wrap("failed to report PoSt failure"))?,
    )?;
    Ok(ret.deregistered)
}

fn request_current_total_power(
    rt: &impl Runtime,
) -> Result<ext::power::CurrentTotalPowerReturn, ActorError> {
    deserialize_block(
        extract_send_result(rt.send(
            &STORAGE_POWER_ACTOR_ADDR,
            ext::power::CURRENT_TOTAL_POWER_METHOD,
            Default::default(),
            TokenAmount::zero(),
        ))
        .map_err(|e| e.wrap("failed to check current power"))?,
    )
}

fn request_deal_weights(
    rt: &impl Runtime,
    deal_ids: &[DealID],
    sector_expiry: ChainEpoch,
) -> Result<(fil_actors_runtime::DealWeight, fil_actors_runtime::DealWeight), ActorError> {
    if deal_ids.is_empty() {
        return Ok((Zero::zero(), Zero::zero()));
    }
    let ret: ext::market::VerifyDealsOnSectorProveCommitReturn = deserialize_block(
        extract_send_result(rt.send(
            &STORAGE_MARKET_ACTOR_ADDR,
            ext::market::VERIFY_DEALS_ON_SECTOR_PROVE_COMMIT_METHOD,
            IpldBlock::serialize_cbor(&ext::market::VerifyDealsOnSectorProveCommitParams {
                deal_ids: deal_ids.to_vec(),
                sector_expiry,
            })?,
            TokenAmount::zero(),
        ))
        .map_err(|e| e.wrap("failed to verify deals and get deal weight"))?,
    )?;
    Ok((ret.deal_weight, ret.verified_deal_weight))
}

fn request_unsealed_sector_cid(
    rt: &impl Runtime,
    sector_type: RegisteredSealProof,
    deal_ids: &[DealID],
) -> Result<Cid, ActorError> {
    let ret: ext::market::ComputeDataCommitmentReturn = deserialize_block(
        extract_send_result(rt.send(
            &STORAGE_MARKET_ACTOR_ADDR,
            ext::market::COMPUTE_DATA_COMMITMENT_METHOD,
            IpldBlock::serialize_cbor(&ext::market::ComputeDataCommitmentParams {
                deal_ids: deal_ids.to_vec(),
                sector_type,
            })?,
            TokenAmount::zero(),
        ))
        .map_err(|e| e.wrap("failed to compute unsealed sector CID"))?,
    )?;
    Ok(ret.commd)
}

fn request_terminate_deals(rt: &impl Runtime, deal_ids: Vec<DealID>) -> Result<(), ActorError> {
    if deal_ids.is_empty() {
        return Ok(());
    }
    let res = extract_send_result(rt.send(
        &STORAGE_MARKET_ACTOR_ADDR,
        ext::market::ON_MINER_SECTORS_TERMINATE_METHOD,
        IpldBlock::serialize_cbor(&ext::market::OnMinerSectorsTerminateParams { deal_ids })?,
        TokenAmount::zero(),
    ));
    // A failing market must not stall the miner's cron.
    if let Err(e) = res {
        warn!("failed to terminate deals at market: {}", e);
    }
    Ok(())
}

fn verify_seal(
    rt: &impl Runtime,
    precommit: &SectorPreCommitOnChainInfo,
    interactive_epoch: ChainEpoch,
    proof: Vec<u8>,
) -> Result<(), ActorError> {
    let receiver = rt.message().receiver();
    let miner_actor_id = receiver
        .id()
        .context_code(ExitCode::USR_ILLEGAL_STATE, "runtime provided non-ID receiver address")?;

    let unsealed_cid =
        request_unsealed_sector_cid(rt, precommit.info.seal_proof, &precommit.info.deal_ids)?;

    let entropy = to_vec(&receiver)?;
    let randomness = rt.get_randomness_from_tickets(
        DomainSeparationTag::SealRandomness,
        precommit.info.seal_rand_epoch,
        &entropy,
    )?;
    let interactive_randomness = rt.get_randomness_from_tickets(
        DomainSeparationTag::InteractiveSealChallengeSeed,
        interactive_epoch,
        &entropy,
    )?;

    let svi = SealVerifyInfo {
        registered_proof: precommit.info.seal_proof,
        sector_id: SectorID { miner: miner_actor_id, number: precommit.info.sector_number },
        deal_ids: precommit.info.deal_ids.clone(),
        randomness: Randomness(randomness.into()),
        interactive_randomness: Randomness(interactive_randomness.into()),
        proof,
        sealed_cid: precommit.info.sealed_cid,
        unsealed_cid,
    };
    rt.verify_seal(&svi).map_err(|e| {
        actor_error!(
            illegal_argument,
            "invalid seal proof for sector {}: {}",
            precommit.info.sector_number,
            e
        )
    })
}

fn verify_windowed_post(
    rt: &impl Runtime,
    challenge_epoch: ChainEpoch,
    sectors: &[SectorOnChainInfo],
    proofs: Vec<PoStProof>,
) -> Result<(), ActorError> {
    let receiver = rt.message().receiver();
    let miner_actor_id = receiver
        .id()
        .context_code(ExitCode::USR_ILLEGAL_STATE, "runtime provided non-ID receiver address")?;

    // Regenerate challenge randomness, which must match that generated for the proof.
    let entropy = to_vec(&receiver)?;
    let randomness = rt.get_randomness_from_beacon(
        DomainSeparationTag::WindowedPoStChallengeSeed,
        challenge_epoch,
        &entropy,
    )?;

    let challenged_sectors = sectors
        .iter()
        .map(|s| SectorInfo {
            proof: s.info.seal_proof,
            sector_number: s.info.sector_number,
            sealed_cid: s.info.sealed_cid,
        })
        .collect();

    let pv_info = WindowPoStVerifyInfo {
        randomness: Randomness(randomness.into()),
        proofs,
        challenged_sectors,
        prover: miner_actor_id,
    };

    rt.verify_post(&pv_info)
        .map_err(|e| actor_error!(illegal_argument, "invalid PoSt: {}", e))
}

/// Resolves an address to an ID address and verifies that it is address of a principal actor.
fn resolve_owner_address(rt: &impl Runtime, raw: Address) -> Result<ActorID, ActorError> {
    let resolved = rt
        .resolve_address(&raw)
        .ok_or_else(|| actor_error!(illegal_argument, "unable to resolve address: {}", raw))?;

    let owner_code = rt
        .get_actor_code_cid(&resolved)
        .ok_or_else(|| actor_error!(illegal_argument, "no code for address: {}", resolved))?;
    let is_principal = rt
        .resolve_builtin_actor_type(&owner_code)
        .map(|t| CALLER_TYPES_SIGNABLE.contains(&t))
        .unwrap_or(false);
    if !is_principal {
        return Err(actor_error!(
            illegal_argument,
            "owner actor type must be a principal, was {}",
            owner_code
        ));
    }
    Ok(resolved)
}

/// Resolves an address to an ID address and verifies that it is address of an account actor with an associated BLS key.
/// The worker must be BLS since the worker key will be used alongside a BLS-VRF.
fn resolve_worker_address(rt: &impl Runtime, raw: Address) -> Result<ActorID, ActorError> {
    let resolved = rt
        .resolve_address(&raw)
        .ok_or_else(|| actor_error!(illegal_argument, "unable to resolve address: {}", raw))?;

    let worker_code = rt
        .get_actor_code_cid(&resolved)
        .ok_or_else(|| actor_error!(illegal_argument, "no code for address: {}", resolved))?;
    if rt.resolve_builtin_actor_type(&worker_code) != Some(Type::Account) {
        return Err(actor_error!(
            illegal_argument,
            "worker actor type must be an account, was {}",
            worker_code
        ));
    }

    if raw.protocol() != Protocol::BLS {
        let pub_key: Address = deserialize_block(extract_send_result(rt.send(
            &Address::new_id(resolved),
            ext::account::PUBKEY_ADDRESS_METHOD,
            None,
            TokenAmount::zero(),
        ))?)?;
        if pub_key.protocol() != Protocol::BLS {
            return Err(actor_error!(
                illegal_argument,
                "worker account {} must have BLS pubkey, was {:?}",
                resolved,
                pub_key.protocol()
            ));
        }
    }
    Ok(resolved)
}

fn burn_funds(rt: &impl Runtime, amount: TokenAmount) -> Result<(), ActorError> {
    debug!("storage provider {} burning {}", rt.message().receiver(), amount);
    if amount.is_positive() {
        extract_send_result(rt.send(&BURNT_FUNDS_ACTOR_ADDR, METHOD_SEND, None, amount))?;
    }
    Ok(())
}

fn notify_pledge_changed(rt: &impl Runtime, pledge_delta: &TokenAmount) -> Result<(), ActorError> {
    if !pledge_delta.is_zero() {
        extract_send_result(rt.send(
            &STORAGE_POWER_ACTOR_ADDR,
            ext::power::UPDATE_PLEDGE_TOTAL_METHOD,
            IpldBlock::serialize_cbor(pledge_delta)?,
            TokenAmount::zero(),
        ))?;
    }
    Ok(())
}

/// Assigns proving period offset randomly in the range [0, WPoStProvingPeriod) by hashing
/// the actor's address and current epoch.
pub fn assign_proving_period_offset(
    policy: &Policy,
    addr: Address,
    current_epoch: ChainEpoch,
    blake2b: impl FnOnce(&[u8]) -> [u8; 32],
) -> Result<ChainEpoch, ActorError> {
    let mut my_addr = to_vec(&addr)?;
    my_addr
        .write_i64::<BigEndian>(current_epoch)
        .context_code(ExitCode::USR_SERIALIZATION, "failed to write epoch")?;

    let digest = blake2b(&my_addr);

    let mut offset: u64 = BigEndian::read_u64(&digest);
    offset %= policy.wpost_proving_period as u64;

    // Conversion from i64 to u64 is safe because it's % WPOST_PROVING_PERIOD which is i64
    Ok(offset as ChainEpoch)
}

/// Computes the epoch at which the proving period containing the current epoch started, given the
/// miner's offset from an exact multiple of WPoStProvingPeriod.
pub fn current_proving_period_start(
    policy: &Policy,
    current_epoch: ChainEpoch,
    offset: ChainEpoch,
) -> ChainEpoch {
    let curr_modulus = current_epoch.rem_euclid(policy.wpost_proving_period);

    let period_progress = if curr_modulus >= offset {
        curr_modulus - offset
    } else {
        policy.wpost_proving_period - (offset - curr_modulus)
    };

    current_epoch - period_progress
}

impl ActorCode for Actor {
    type Methods = Method;

    fn name() -> &'static str {
        "StorageMiner"
    }

    actor_dispatch! {
        Constructor => constructor,
        ControlAddresses => control_addresses,
        ChangeWorkerAddress => change_worker_address,
        ChangePeerID => change_peer_id,
        SubmitWindowedPoSt => submit_windowed_post,
        PreCommitSector => pre_commit_sector,
        ProveCommitSector => prove_commit_sector,
        ExtendSectorExpiration => extend_sector_expiration,
        TerminateSectors => terminate_sectors,
        DeclareFaults => declare_faults,
        DeclareFaultsRecovered => declare_faults_recovered,
        OnDeferredCronEvent => on_deferred_cron_event,
        CheckSectorProven => check_sector_proven,
        AwardReward => award_reward,
        ReportConsensusFault => report_consensus_fault,
        WithdrawBalance => withdraw_balance,
        OnDeleteMiner => on_delete_miner,
        OnSurprisePoStChallenge => on_surprise_post_challenge,
    }
}
