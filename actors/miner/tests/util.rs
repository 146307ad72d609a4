#![allow(dead_code)]

use fil_actor_miner::ext::market::{ComputeDataCommitmentParams, ComputeDataCommitmentReturn};
use fil_actor_miner::ext::power::{
    CurrentTotalPowerReturn, EnrollCronEventParams, OnFaultBeginParams, OnFaultEndParams,
    OnMinerWindowedPoStFailureParams, OnMinerWindowedPoStFailureReturn, OnSectorProveCommitParams,
    OnSectorProveCommitReturn, OnSectorTerminateParams, OnSectorTerminateReturn,
};
use fil_actor_miner::testing::check_state_invariants;
use fil_actor_miner::{
    ext, pre_commit_deposit_for_power, qa_power_for_weight, weight_for_sector, Actor,
    CronEventPayload, DeadlineInfo, Deadlines, Method, MinerConstructorParams,
    ProveCommitSectorParams, SectorOnChainInfo, SectorPreCommitInfo, SectorPreCommitOnChainInfo,
    SectorStorageWeightDesc, State, SubmitWindowedPoStParams, CRON_EVENT_PRE_COMMIT_EXPIRY,
    CRON_EVENT_PROVING_PERIOD,
};
use fil_actors_runtime::reward::FilterEstimate;
use fil_actors_runtime::runtime::{DomainSeparationTag, Policy};
use fil_actors_runtime::test_utils::*;
use fil_actors_runtime::{
    BURNT_FUNDS_ACTOR_ADDR, INIT_ACTOR_ADDR, STORAGE_MARKET_ACTOR_ADDR, STORAGE_POWER_ACTOR_ADDR,
};
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::{to_vec, RawBytes};
use fvm_shared::address::Address;
use fvm_shared::bigint::BigInt;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::randomness::Randomness;
use fvm_shared::sector::{
    PoStProof, RegisteredPoStProof, RegisteredSealProof, SealVerifyInfo, SectorID, SectorInfo,
    SectorNumber, SectorSize, StoragePower, WindowPoStVerifyInfo,
};
use fvm_shared::METHOD_SEND;
use num_traits::Zero;

pub const RECEIVER_ID: u64 = 1000;

pub struct ActorHarness {
    pub receiver: Address,
    pub owner: Address,
    pub worker: Address,
    pub worker_key: Address,

    pub seal_proof_type: RegisteredSealProof,
    pub post_proof_type: RegisteredPoStProof,
    pub sector_size: SectorSize,
    pub partition_size: u64,
    pub period_offset: ChainEpoch,

    pub network_raw_power: StoragePower,
    pub network_qa_power: StoragePower,
    pub epoch_reward_smooth: FilterEstimate,
    pub epoch_qa_power_smooth: FilterEstimate,
}

impl ActorHarness {
    pub fn new(period_offset: ChainEpoch) -> ActorHarness {
        let proof_type = RegisteredSealProof::StackedDRG2KiBV1;
        let reward = TokenAmount::from_whole(10);
        let power = StoragePower::from(1i128 << 50);

        ActorHarness {
            receiver: Address::new_id(RECEIVER_ID),
            owner: Address::new_id(100),
            worker: Address::new_id(101),
            worker_key: new_bls_addr(0),

            seal_proof_type: proof_type,
            post_proof_type: RegisteredPoStProof::StackedDRGWindow2KiBV1,
            sector_size: proof_type.sector_size().unwrap(),
            partition_size: proof_type.window_post_partitions_sector().unwrap(),
            period_offset,

            network_raw_power: power.clone(),
            network_qa_power: power.clone(),
            epoch_reward_smooth: FilterEstimate::new(reward.atto().clone(), BigInt::zero()),
            epoch_qa_power_smooth: FilterEstimate::new(power, BigInt::zero()),
        }
    }

    pub fn new_runtime(&self) -> MockRuntime {
        let mut rt = MockRuntime { receiver: self.receiver, ..Default::default() };
        rt.hash_func = fixed_hasher(self.period_offset);
        rt.set_address_actor_type(self.owner, *ACCOUNT_ACTOR_CODE_ID);
        rt.set_address_actor_type(self.worker, *ACCOUNT_ACTOR_CODE_ID);
        rt.set_balance(TokenAmount::from_whole(10_000));
        rt
    }

    pub fn policy<'a>(&self, rt: &'a MockRuntime) -> &'a Policy {
        &rt.policy
    }

    pub fn get_state(&self, rt: &MockRuntime) -> State {
        rt.get_state::<State>()
    }

    pub fn construct_and_verify(&self, rt: &MockRuntime) {
        let params = MinerConstructorParams {
            owner: self.owner,
            worker: self.worker,
            seal_proof_type: self.seal_proof_type,
            peer_id: b"peer".to_vec(),
        };

        rt.set_caller(*INIT_ACTOR_CODE_ID, INIT_ACTOR_ADDR);
        rt.expect_validate_caller_addr(vec![INIT_ACTOR_ADDR]);
        self.expect_worker_key_lookup(rt, self.worker, self.worker_key);

        let period_start = self.period_start_at(rt, *rt.epoch.borrow());
        self.expect_enroll_proving_period(rt, period_start + rt.policy.wpost_proving_period - 1);

        let ret = rt
            .call::<Actor>(
                Method::Constructor as u64,
                IpldBlock::serialize_cbor(&params).unwrap(),
            )
            .unwrap();
        expect_empty(ret);
        rt.verify();
    }

    pub fn expect_worker_key_lookup(&self, rt: &MockRuntime, worker: Address, key: Address) {
        rt.expect_send(
            worker,
            ext::account::PUBKEY_ADDRESS_METHOD,
            None,
            TokenAmount::zero(),
            IpldBlock::serialize_cbor(&key).unwrap(),
            ExitCode::OK,
        );
    }

    /// Start of the proving period containing an epoch, for this harness's offset.
    pub fn period_start_at(&self, rt: &MockRuntime, epoch: ChainEpoch) -> ChainEpoch {
        fil_actor_miner::current_proving_period_start(&rt.policy, epoch, self.period_offset)
    }

    pub fn deadline(&self, rt: &MockRuntime) -> DeadlineInfo {
        self.get_state(rt).deadline_info(&rt.policy, *rt.epoch.borrow())
    }

    pub fn power_total(&self) -> CurrentTotalPowerReturn {
        CurrentTotalPowerReturn {
            raw_byte_power: self.network_raw_power.clone(),
            quality_adj_power: self.network_qa_power.clone(),
            pledge_collateral: TokenAmount::zero(),
            quality_adj_power_smoothed: self.epoch_qa_power_smooth.clone(),
            this_epoch_reward_smoothed: self.epoch_reward_smooth.clone(),
            this_epoch_baseline_power: self.network_raw_power.clone(),
        }
    }

    pub fn expect_query_power(&self, rt: &MockRuntime) {
        rt.expect_send(
            STORAGE_POWER_ACTOR_ADDR,
            ext::power::CURRENT_TOTAL_POWER_METHOD,
            None,
            TokenAmount::zero(),
            IpldBlock::serialize_cbor(&self.power_total()).unwrap(),
            ExitCode::OK,
        );
    }

    pub fn expect_enroll_cron(&self, rt: &MockRuntime, epoch: ChainEpoch, payload: CronEventPayload) {
        let params = EnrollCronEventParams {
            event_epoch: epoch,
            payload: RawBytes::serialize(&payload).unwrap(),
        };
        rt.expect_send(
            STORAGE_POWER_ACTOR_ADDR,
            ext::power::ENROLL_CRON_EVENT_METHOD,
            IpldBlock::serialize_cbor(&params).unwrap(),
            TokenAmount::zero(),
            None,
            ExitCode::OK,
        );
    }

    pub fn expect_enroll_proving_period(&self, rt: &MockRuntime, epoch: ChainEpoch) {
        self.expect_enroll_cron(
            rt,
            epoch,
            CronEventPayload { event_type: CRON_EVENT_PROVING_PERIOD, sectors: None },
        );
    }

    pub fn expect_pledge_update(&self, rt: &MockRuntime, delta: &TokenAmount) {
        if delta.is_zero() {
            return;
        }
        rt.expect_send(
            STORAGE_POWER_ACTOR_ADDR,
            ext::power::UPDATE_PLEDGE_TOTAL_METHOD,
            IpldBlock::serialize_cbor(delta).unwrap(),
            TokenAmount::zero(),
            None,
            ExitCode::OK,
        );
    }

    pub fn expect_burn(&self, rt: &MockRuntime, amount: &TokenAmount) {
        if !amount.is_positive() {
            return;
        }
        rt.expect_send(
            BURNT_FUNDS_ACTOR_ADDR,
            METHOD_SEND,
            None,
            amount.clone(),
            None,
            ExitCode::OK,
        );
    }

    pub fn expect_fault_begin(&self, rt: &MockRuntime, weights: Vec<SectorStorageWeightDesc>) {
        rt.expect_send(
            STORAGE_POWER_ACTOR_ADDR,
            ext::power::ON_FAULT_BEGIN_METHOD,
            IpldBlock::serialize_cbor(&OnFaultBeginParams { weights }).unwrap(),
            TokenAmount::zero(),
            None,
            ExitCode::OK,
        );
    }

    pub fn expect_fault_end(&self, rt: &MockRuntime, weights: Vec<SectorStorageWeightDesc>) {
        rt.expect_send(
            STORAGE_POWER_ACTOR_ADDR,
            ext::power::ON_FAULT_END_METHOD,
            IpldBlock::serialize_cbor(&OnFaultEndParams { weights }).unwrap(),
            TokenAmount::zero(),
            None,
            ExitCode::OK,
        );
    }

    pub fn expect_post_failure(&self, rt: &MockRuntime, failures: i64, deregistered: bool) {
        rt.expect_send(
            STORAGE_POWER_ACTOR_ADDR,
            ext::power::ON_MINER_WINDOWED_POST_FAILURE_METHOD,
            IpldBlock::serialize_cbor(&OnMinerWindowedPoStFailureParams {
                num_consecutive_failures: failures,
            })
            .unwrap(),
            TokenAmount::zero(),
            IpldBlock::serialize_cbor(&OnMinerWindowedPoStFailureReturn { deregistered })
                .unwrap(),
            ExitCode::OK,
        );
    }

    pub fn expect_terminate_power(
        &self,
        rt: &MockRuntime,
        termination_type: i64,
        weights: Vec<SectorStorageWeightDesc>,
        sector_ages: Vec<ChainEpoch>,
        pledge: TokenAmount,
        penalty: TokenAmount,
    ) {
        rt.expect_send(
            STORAGE_POWER_ACTOR_ADDR,
            ext::power::ON_SECTOR_TERMINATE_METHOD,
            IpldBlock::serialize_cbor(&OnSectorTerminateParams {
                termination_type,
                weights,
                sector_ages,
                pledge,
            })
            .unwrap(),
            TokenAmount::zero(),
            IpldBlock::serialize_cbor(&OnSectorTerminateReturn { penalty }).unwrap(),
            ExitCode::OK,
        );
    }

    pub fn make_pre_commit_params(
        &self,
        sector_number: SectorNumber,
        seal_rand_epoch: ChainEpoch,
        expiration: ChainEpoch,
    ) -> SectorPreCommitInfo {
        SectorPreCommitInfo {
            seal_proof: self.seal_proof_type,
            sector_number,
            sealed_cid: make_sealed_cid(format!("commr-{}", sector_number).as_bytes()),
            seal_rand_epoch,
            deal_ids: vec![],
            expiration,
        }
    }

    /// Epoch one before a proving period boundary, at least `min_periods` periods from now.
    pub fn valid_expiration(&self, rt: &MockRuntime, min_periods: i64) -> ChainEpoch {
        let st = self.get_state(rt);
        st.post_state.proving_period_start + min_periods * rt.policy.wpost_proving_period - 1
    }

    pub fn max_seal_duration(&self, rt: &MockRuntime) -> ChainEpoch {
        rt.policy.max_seal_duration.get(self.seal_proof_type).unwrap()
    }

    pub fn expected_deposit(&self, rt: &MockRuntime, expiration: ChainEpoch) -> TokenAmount {
        let qa = qa_power_for_weight(
            &rt.policy,
            self.sector_size,
            expiration - *rt.epoch.borrow(),
            &BigInt::zero(),
            &BigInt::zero(),
        );
        pre_commit_deposit_for_power(
            &rt.policy,
            &self.epoch_reward_smooth,
            &self.epoch_qa_power_smooth,
            &qa,
        )
    }

    pub fn pre_commit_sector(
        &self,
        rt: &MockRuntime,
        params: SectorPreCommitInfo,
    ) -> SectorPreCommitOnChainInfo {
        rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, self.worker);
        rt.expect_validate_caller_addr(vec![self.worker]);
        self.expect_query_power(rt);

        let expiry = *rt.epoch.borrow() + self.max_seal_duration(rt) + 1;
        self.expect_enroll_cron(
            rt,
            expiry,
            CronEventPayload {
                event_type: CRON_EVENT_PRE_COMMIT_EXPIRY,
                sectors: Some(BitField::try_from_bits([params.sector_number]).unwrap()),
            },
        );

        let sector_number = params.sector_number;
        let ret = rt
            .call::<Actor>(
                Method::PreCommitSector as u64,
                IpldBlock::serialize_cbor(&params).unwrap(),
            )
            .unwrap();
        expect_empty(ret);
        rt.verify();

        self.get_state(rt).get_precommitted_sector(&rt.store, sector_number).unwrap().unwrap()
    }

    pub fn expect_seal_verification(
        &self,
        rt: &MockRuntime,
        precommit: &SectorPreCommitOnChainInfo,
        proof: Vec<u8>,
    ) {
        let unsealed_cid = make_piece_cid(b"commd");
        rt.expect_send(
            STORAGE_MARKET_ACTOR_ADDR,
            ext::market::COMPUTE_DATA_COMMITMENT_METHOD,
            IpldBlock::serialize_cbor(&ComputeDataCommitmentParams {
                deal_ids: precommit.info.deal_ids.clone(),
                sector_type: precommit.info.seal_proof,
            })
            .unwrap(),
            TokenAmount::zero(),
            IpldBlock::serialize_cbor(&ComputeDataCommitmentReturn { commd: unsealed_cid })
                .unwrap(),
            ExitCode::OK,
        );

        let entropy = to_vec(&self.receiver).unwrap();
        let seal_rand = [1u8; 32];
        let seal_int_rand = [2u8; 32];
        let interactive_epoch = precommit.pre_commit_epoch + rt.policy.pre_commit_challenge_delay;
        rt.expect_get_randomness_from_tickets(
            DomainSeparationTag::SealRandomness,
            precommit.info.seal_rand_epoch,
            entropy.clone(),
            seal_rand,
        );
        rt.expect_get_randomness_from_tickets(
            DomainSeparationTag::InteractiveSealChallengeSeed,
            interactive_epoch,
            entropy,
            seal_int_rand,
        );

        rt.expect_verify_seal(
            SealVerifyInfo {
                registered_proof: precommit.info.seal_proof,
                sector_id: SectorID { miner: RECEIVER_ID, number: precommit.info.sector_number },
                deal_ids: precommit.info.deal_ids.clone(),
                randomness: Randomness(seal_rand.into()),
                interactive_randomness: Randomness(seal_int_rand.into()),
                proof,
                sealed_cid: precommit.info.sealed_cid,
                unsealed_cid,
            },
            ExitCode::OK,
        );
    }

    /// Proves a pre-committed sector with no deals, the power actor requiring `pledge`.
    pub fn prove_commit_sector(
        &self,
        rt: &MockRuntime,
        precommit: &SectorPreCommitOnChainInfo,
        pledge: &TokenAmount,
    ) -> SectorOnChainInfo {
        let proof = vec![0u8; 192];
        rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, self.worker);
        rt.expect_validate_caller_any();
        self.expect_seal_verification(rt, precommit, proof.clone());

        let weight = SectorStorageWeightDesc {
            sector_size: self.sector_size,
            duration: precommit.info.expiration - *rt.epoch.borrow(),
            deal_weight: BigInt::zero(),
            verified_deal_weight: BigInt::zero(),
        };
        rt.expect_send(
            STORAGE_POWER_ACTOR_ADDR,
            ext::power::ON_SECTOR_PROVE_COMMIT_METHOD,
            IpldBlock::serialize_cbor(&OnSectorProveCommitParams { weight }).unwrap(),
            TokenAmount::zero(),
            IpldBlock::serialize_cbor(&OnSectorProveCommitReturn { pledge: pledge.clone() })
                .unwrap(),
            ExitCode::OK,
        );
        self.expect_pledge_update(rt, pledge);

        let params = ProveCommitSectorParams {
            sector_number: precommit.info.sector_number,
            proof: RawBytes::new(proof),
        };
        let ret = rt
            .call::<Actor>(
                Method::ProveCommitSector as u64,
                IpldBlock::serialize_cbor(&params).unwrap(),
            )
            .unwrap();
        expect_empty(ret);
        rt.verify();

        self.get_state(rt).get_sector(&rt.store, precommit.info.sector_number).unwrap().unwrap()
    }

    /// Pre-commits and proves a sector, returning its on-chain info.
    pub fn commit_and_prove_sector(
        &self,
        rt: &MockRuntime,
        sector_number: SectorNumber,
        expiration_periods: i64,
        pledge: &TokenAmount,
    ) -> SectorOnChainInfo {
        let epoch = *rt.epoch.borrow();
        let expiration = self.valid_expiration(rt, expiration_periods);
        let precommit = self.pre_commit_sector(
            rt,
            self.make_pre_commit_params(sector_number, epoch - 1, expiration),
        );
        rt.set_epoch(epoch + rt.policy.pre_commit_challenge_delay + 1);
        self.prove_commit_sector(rt, &precommit, pledge)
    }

    /// Runs the proving period cron for a miner with nothing to penalize.
    /// New sectors are assigned with an all-zero seed, which places the first partition at
    /// deadline 1.
    pub fn on_proving_period(&self, rt: &MockRuntime) {
        self.on_proving_period_with(rt, |_| {})
    }

    /// Runs the proving period cron, with `expect` setting up the sends expected between the
    /// power query and the enrollment of the next period's event.
    pub fn on_proving_period_with(&self, rt: &MockRuntime, expect: impl FnOnce(&MockRuntime)) {
        let st = self.get_state(rt);
        let period_end = st.post_state.proving_period_start + rt.policy.wpost_proving_period - 1;
        rt.set_epoch(period_end);

        rt.set_caller(*POWER_ACTOR_CODE_ID, STORAGE_POWER_ACTOR_ADDR);
        rt.expect_validate_caller_addr(vec![STORAGE_POWER_ACTOR_ADDR]);
        self.expect_query_power(rt);
        expect(rt);
        if !st.new_sectors.is_empty() {
            rt.expect_get_randomness_from_tickets(
                DomainSeparationTag::WindowPoStDeadlineAssignment,
                period_end - 1,
                to_vec(&self.receiver).unwrap(),
                [0u8; 32],
            );
        }
        self.expect_enroll_proving_period(rt, period_end + rt.policy.wpost_proving_period);

        self.on_cron(rt, CronEventPayload { event_type: CRON_EVENT_PROVING_PERIOD, sectors: None })
            .unwrap();
        rt.verify();
    }

    pub fn on_cron(
        &self,
        rt: &MockRuntime,
        payload: CronEventPayload,
    ) -> Result<Option<IpldBlock>, fil_actors_runtime::ActorError> {
        rt.set_caller(*POWER_ACTOR_CODE_ID, STORAGE_POWER_ACTOR_ADDR);
        rt.call::<Actor>(
            Method::OnDeferredCronEvent as u64,
            IpldBlock::serialize_cbor(&payload).unwrap(),
        )
    }

    pub fn post_params(&self, deadline: u64, partitions: Vec<u64>) -> SubmitWindowedPoStParams {
        let proofs = partitions
            .iter()
            .map(|_| PoStProof { post_proof: self.post_proof_type, proof_bytes: b"proof".to_vec() })
            .collect();
        SubmitWindowedPoStParams { deadline, partitions, proofs }
    }

    /// Submits a PoSt for the current deadline, expecting `challenged` to be verified.
    pub fn submit_window_post(
        &self,
        rt: &MockRuntime,
        params: SubmitWindowedPoStParams,
        challenged: &[SectorOnChainInfo],
        recovered: Vec<SectorStorageWeightDesc>,
    ) {
        let deadline = self.deadline(rt);
        rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, self.worker);
        rt.expect_validate_caller_addr(vec![self.worker]);
        self.expect_query_power(rt);

        let randomness = [3u8; 32];
        rt.expect_get_randomness_from_beacon(
            DomainSeparationTag::WindowedPoStChallengeSeed,
            deadline.challenge,
            to_vec(&self.receiver).unwrap(),
            randomness,
        );
        rt.expect_verify_post(
            WindowPoStVerifyInfo {
                randomness: Randomness(randomness.into()),
                proofs: params.proofs.clone(),
                challenged_sectors: challenged
                    .iter()
                    .map(|s| SectorInfo {
                        proof: s.info.seal_proof,
                        sector_number: s.info.sector_number,
                        sealed_cid: s.info.sealed_cid,
                    })
                    .collect(),
                prover: RECEIVER_ID,
            },
            ExitCode::OK,
        );
        if !recovered.is_empty() {
            self.expect_fault_end(rt, recovered);
        }

        let ret = rt
            .call::<Actor>(
                Method::SubmitWindowedPoSt as u64,
                IpldBlock::serialize_cbor(&params).unwrap(),
            )
            .unwrap();
        expect_empty(ret);
    }

    pub fn load_deadlines(&self, rt: &MockRuntime) -> Deadlines {
        self.get_state(rt).load_deadlines(&rt.store).unwrap()
    }

    /// Index of the deadline a sector is due at, if assigned.
    pub fn deadline_of(&self, rt: &MockRuntime, sector_number: SectorNumber) -> Option<u64> {
        self.load_deadlines(rt).due.iter().position(|due| due.get(sector_number)).map(|i| i as u64)
    }

    /// Moves to the first epoch of a deadline's challenge window in the current proving period.
    pub fn advance_to_deadline(&self, rt: &MockRuntime, deadline_idx: u64) -> DeadlineInfo {
        let st = self.get_state(rt);
        let info = DeadlineInfo::new(
            &rt.policy,
            st.post_state.proving_period_start,
            deadline_idx,
            *rt.epoch.borrow(),
        );
        rt.set_epoch(info.open);
        self.deadline(rt)
    }

    pub fn weight(&self, sector: &SectorOnChainInfo) -> SectorStorageWeightDesc {
        weight_for_sector(self.sector_size, sector)
    }

    pub fn check_state(&self, rt: &MockRuntime) {
        let (_, acc) =
            check_state_invariants(&rt.policy, &self.get_state(rt), &rt.store, &rt.get_balance());
        acc.assert_empty();
    }
}

// Returns a fake hashing function whose digest starts with the big-endian encoding of a target
// offset, so the proving period offset assigned at construction is predictable.
pub fn fixed_hasher(offset: ChainEpoch) -> Box<dyn Fn(&[u8]) -> [u8; 32]> {
    Box::new(move |_: &[u8]| {
        let mut result = [0u8; 32];
        result[..8].copy_from_slice(&(offset as u64).to_be_bytes());
        result
    })
}

pub fn bitfield(bits: &[u64]) -> BitField {
    BitField::try_from_bits(bits.iter().copied()).unwrap()
}
