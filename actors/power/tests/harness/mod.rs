#![allow(dead_code)]

use fil_actor_miner::{initial_pledge_for_power, power_for_weight, SectorStorageWeightDesc};
use fil_actor_power::ext::init::{ExecParams, ExecReturn};
use fil_actor_power::ext::miner::{MinerConstructorParams, ON_DEFERRED_CRON_EVENT_METHOD};
use fil_actor_power::testing::check_state_invariants;
use fil_actor_power::{
    ext, Actor as PowerActor, Claim, CreateMinerParams, CreateMinerReturn,
    CurrentTotalPowerReturn, EnrollCronEventParams, Method, OnFaultBeginParams, OnFaultEndParams,
    OnMinerWindowedPoStFailureParams, OnMinerWindowedPoStFailureReturn,
    OnSectorProveCommitParams, OnSectorProveCommitReturn, OnSectorTerminateParams,
    OnSectorTerminateReturn, State, UpdatePledgeTotalParams, CRON_QUEUE_AMT_BITWIDTH,
    CRON_QUEUE_CONFIG,
};
use fil_actors_runtime::reward::{FilterEstimate, ThisEpochRewardReturn, THIS_EPOCH_REWARD_METHOD};
use fil_actors_runtime::runtime::builtins::Type;
use fil_actors_runtime::runtime::Runtime;
use fil_actors_runtime::test_utils::*;
use fil_actors_runtime::{
    ActorError, Map, Multimap, CRON_ACTOR_ADDR, DEFAULT_HAMT_CONFIG, INIT_ACTOR_ADDR,
    REWARD_ACTOR_ADDR, STORAGE_POWER_ACTOR_ADDR, SYSTEM_ACTOR_ADDR,
};
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::{RawBytes, DAG_CBOR};
use fvm_shared::address::Address;
use fvm_shared::bigint::BigInt;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::sector::{RegisteredSealProof, SectorSize, StoragePower};
use lazy_static::lazy_static;
use num_traits::Zero;

lazy_static! {
    pub static ref OWNER: Address = Address::new_id(101);
    pub static ref WORKER: Address = Address::new_id(102);
    pub static ref MINER: Address = Address::new_id(201);
    pub static ref ACTOR: Address = Address::new_actor("actor".as_bytes());
}

pub fn new_runtime() -> MockRuntime {
    let rt = MockRuntime { receiver: STORAGE_POWER_ACTOR_ADDR, ..Default::default() };
    rt.set_caller(*SYSTEM_ACTOR_CODE_ID, SYSTEM_ACTOR_ADDR);
    rt
}

pub fn new_harness() -> Harness {
    Harness {
        miner_seq: 0,
        seal_proof: RegisteredSealProof::StackedDRG32GiBV1P1,
        this_epoch_baseline_power: StoragePower::from(1i64 << 50),
        this_epoch_reward_smoothed: FilterEstimate::new(
            TokenAmount::from_whole(10).atto().clone(),
            BigInt::zero(),
        ),
    }
}

pub fn setup() -> (Harness, MockRuntime) {
    let rt = new_runtime();
    let h = new_harness();
    h.construct_and_verify(&rt);
    (h, rt)
}

pub struct Harness {
    miner_seq: i64,
    pub seal_proof: RegisteredSealProof,
    pub this_epoch_baseline_power: StoragePower,
    pub this_epoch_reward_smoothed: FilterEstimate,
}

impl Harness {
    pub fn construct_and_verify(&self, rt: &MockRuntime) {
        rt.expect_validate_caller_addr(vec![SYSTEM_ACTOR_ADDR]);
        let ret = rt.call::<PowerActor>(Method::Constructor as u64, None).unwrap();
        expect_empty(ret);
        rt.verify();

        let st: State = rt.get_state();
        assert_eq!(StoragePower::zero(), st.total_raw_byte_power);
        assert_eq!(StoragePower::zero(), st.total_quality_adj_power);
        assert_eq!(TokenAmount::zero(), st.total_pledge_collateral);
        assert_eq!(0, st.miner_count);
        assert_eq!(*rt.epoch.borrow() - 1, st.last_processed_cron_epoch);

        verify_empty_map(rt, st.claims);
        verify_empty_map(rt, st.cron_event_queue);
        verify_empty_map(rt, st.post_detected_fault_miners);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_miner(
        &self,
        rt: &MockRuntime,
        owner: &Address,
        worker: &Address,
        miner: &Address,
        robust: &Address,
        peer: Vec<u8>,
        value: &TokenAmount,
    ) -> Result<CreateMinerReturn, ActorError> {
        rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, *owner);
        rt.set_received(value.clone());
        rt.set_balance(value.clone());
        rt.expect_validate_caller_type(vec![Type::Account, Type::Multisig]);

        let miner_ctor_params = MinerConstructorParams {
            owner: *owner,
            worker: *worker,
            seal_proof_type: self.seal_proof,
            peer_id: peer.clone(),
        };
        let expected_init_params = ExecParams {
            code_cid: *MINER_ACTOR_CODE_ID,
            constructor_params: RawBytes::serialize(miner_ctor_params).unwrap(),
        };
        let exec_ret = ExecReturn { id_address: *miner, robust_address: *robust };
        rt.expect_send(
            INIT_ACTOR_ADDR,
            ext::init::EXEC_METHOD,
            IpldBlock::serialize_cbor(&expected_init_params).unwrap(),
            value.clone(),
            IpldBlock::serialize_cbor(&exec_ret).unwrap(),
            ExitCode::OK,
        );
        let params =
            CreateMinerParams { owner: *owner, worker: *worker, seal_proof_type: self.seal_proof, peer };
        let ret = rt
            .call::<PowerActor>(
                Method::CreateMiner as u64,
                IpldBlock::serialize_cbor(&params).unwrap(),
            )?
            .unwrap()
            .deserialize::<CreateMinerReturn>()
            .unwrap();
        rt.verify();
        Ok(ret)
    }

    pub fn create_miner_basic(
        &mut self,
        rt: &MockRuntime,
        owner: Address,
        worker: Address,
        miner: Address,
    ) -> Result<CreateMinerReturn, ActorError> {
        let label = format!("{}", self.miner_seq);
        let robust = Address::new_actor(label.as_bytes());
        self.miner_seq += 1;
        self.create_miner(rt, &owner, &worker, &miner, &robust, label.into_bytes(), &TokenAmount::zero())
    }

    pub fn get_claim(&self, rt: &MockRuntime, miner: &Address) -> Option<Claim> {
        let st: State = rt.get_state();
        st.get_claim(rt.store(), miner).unwrap()
    }

    pub fn prove_commit(
        &self,
        rt: &MockRuntime,
        miner: &Address,
        weight: &SectorStorageWeightDesc,
    ) -> Result<TokenAmount, ActorError> {
        rt.set_caller(*MINER_ACTOR_CODE_ID, *miner);
        rt.expect_validate_caller_type(vec![Type::Miner]);
        let params = OnSectorProveCommitParams { weight: weight.clone() };
        let ret = rt.call::<PowerActor>(
            Method::OnSectorProveCommit as u64,
            IpldBlock::serialize_cbor(&params).unwrap(),
        )?;
        rt.verify();
        Ok(ret.unwrap().deserialize::<OnSectorProveCommitReturn>().unwrap().pledge)
    }

    /// Pledge the actor is expected to require for a weight, at the current network estimates.
    pub fn expected_pledge(&self, rt: &MockRuntime, weight: &SectorStorageWeightDesc) -> TokenAmount {
        let st: State = rt.get_state();
        let power = power_for_weight(&rt.policy, weight);
        initial_pledge_for_power(
            &rt.policy,
            &power.qa,
            &st.this_epoch_baseline_power,
            &st.this_epoch_reward_smoothed,
            &st.this_epoch_qa_power_smoothed,
            &rt.circulating_supply.borrow(),
        )
    }

    /// Terminates freshly activated sectors.
    pub fn terminate(
        &self,
        rt: &MockRuntime,
        miner: &Address,
        termination_type: i64,
        weights: Vec<SectorStorageWeightDesc>,
        pledge: TokenAmount,
    ) -> Result<TokenAmount, ActorError> {
        let sector_ages = vec![0; weights.len()];
        self.terminate_aged(rt, miner, termination_type, weights, sector_ages, pledge)
    }

    pub fn terminate_aged(
        &self,
        rt: &MockRuntime,
        miner: &Address,
        termination_type: i64,
        weights: Vec<SectorStorageWeightDesc>,
        sector_ages: Vec<ChainEpoch>,
        pledge: TokenAmount,
    ) -> Result<TokenAmount, ActorError> {
        rt.set_caller(*MINER_ACTOR_CODE_ID, *miner);
        rt.expect_validate_caller_type(vec![Type::Miner]);
        let params = OnSectorTerminateParams { termination_type, weights, sector_ages, pledge };
        let ret = rt.call::<PowerActor>(
            Method::OnSectorTerminate as u64,
            IpldBlock::serialize_cbor(&params).unwrap(),
        )?;
        rt.verify();
        Ok(ret.unwrap().deserialize::<OnSectorTerminateReturn>().unwrap().penalty)
    }

    pub fn fault_begin(
        &self,
        rt: &MockRuntime,
        miner: &Address,
        weights: Vec<SectorStorageWeightDesc>,
    ) -> Result<(), ActorError> {
        rt.set_caller(*MINER_ACTOR_CODE_ID, *miner);
        rt.expect_validate_caller_type(vec![Type::Miner]);
        let ret = rt.call::<PowerActor>(
            Method::OnFaultBegin as u64,
            IpldBlock::serialize_cbor(&OnFaultBeginParams { weights }).unwrap(),
        )?;
        expect_empty(ret);
        rt.verify();
        Ok(())
    }

    pub fn fault_end(
        &self,
        rt: &MockRuntime,
        miner: &Address,
        weights: Vec<SectorStorageWeightDesc>,
    ) -> Result<(), ActorError> {
        rt.set_caller(*MINER_ACTOR_CODE_ID, *miner);
        rt.expect_validate_caller_type(vec![Type::Miner]);
        let ret = rt.call::<PowerActor>(
            Method::OnFaultEnd as u64,
            IpldBlock::serialize_cbor(&OnFaultEndParams { weights }).unwrap(),
        )?;
        expect_empty(ret);
        rt.verify();
        Ok(())
    }

    pub fn post_success(&self, rt: &MockRuntime, miner: &Address) {
        rt.set_caller(*MINER_ACTOR_CODE_ID, *miner);
        rt.expect_validate_caller_type(vec![Type::Miner]);
        let ret =
            rt.call::<PowerActor>(Method::OnMinerWindowedPoStSuccess as u64, None).unwrap();
        expect_empty(ret);
        rt.verify();
    }

    pub fn post_failure(
        &self,
        rt: &MockRuntime,
        miner: &Address,
        num_consecutive_failures: i64,
    ) -> Result<bool, ActorError> {
        rt.set_caller(*MINER_ACTOR_CODE_ID, *miner);
        rt.expect_validate_caller_type(vec![Type::Miner]);
        let params = OnMinerWindowedPoStFailureParams { num_consecutive_failures };
        let ret = rt.call::<PowerActor>(
            Method::OnMinerWindowedPoStFailure as u64,
            IpldBlock::serialize_cbor(&params).unwrap(),
        )?;
        rt.verify();
        Ok(ret.unwrap().deserialize::<OnMinerWindowedPoStFailureReturn>().unwrap().deregistered)
    }

    pub fn enroll_cron_event(
        &self,
        rt: &MockRuntime,
        miner: &Address,
        epoch: ChainEpoch,
        payload: &RawBytes,
    ) -> Result<(), ActorError> {
        rt.set_caller(*MINER_ACTOR_CODE_ID, *miner);
        rt.expect_validate_caller_type(vec![Type::Miner]);
        let params = EnrollCronEventParams { event_epoch: epoch, payload: payload.clone() };
        let ret = rt.call::<PowerActor>(
            Method::EnrollCronEvent as u64,
            IpldBlock::serialize_cbor(&params).unwrap(),
        )?;
        expect_empty(ret);
        rt.verify();
        Ok(())
    }

    /// Epochs holding enrolled cron events, in order.
    pub fn get_enrolled_cron_epochs(&self, rt: &MockRuntime) -> Vec<ChainEpoch> {
        let st: State = rt.get_state();
        let queue = Multimap::<_, ChainEpoch>::load(
            rt.store(),
            &st.cron_event_queue,
            CRON_QUEUE_CONFIG,
            CRON_QUEUE_AMT_BITWIDTH,
            "cron events",
        )
        .unwrap();
        let mut epochs = queue.keys().unwrap();
        epochs.sort_unstable();
        epochs
    }

    pub fn update_pledge_total(
        &self,
        rt: &MockRuntime,
        miner: &Address,
        delta: &TokenAmount,
    ) -> Result<(), ActorError> {
        rt.set_caller(*MINER_ACTOR_CODE_ID, *miner);
        rt.expect_validate_caller_type(vec![Type::Miner]);
        let ret = rt.call::<PowerActor>(
            Method::UpdatePledgeTotal as u64,
            IpldBlock::serialize_cbor(&UpdatePledgeTotalParams { pledge_delta: delta.clone() })
                .unwrap(),
        )?;
        expect_empty(ret);
        rt.verify();
        Ok(())
    }

    pub fn current_power_total(&self, rt: &MockRuntime) -> CurrentTotalPowerReturn {
        rt.expect_validate_caller_any();
        let ret = rt.call::<PowerActor>(Method::CurrentTotalPower as u64, None).unwrap();
        rt.verify();
        ret.unwrap().deserialize().unwrap()
    }

    pub fn expect_query_network_info(&self, rt: &MockRuntime) {
        let reward = ThisEpochRewardReturn {
            this_epoch_reward_smoothed: self.this_epoch_reward_smoothed.clone(),
            this_epoch_baseline_power: self.this_epoch_baseline_power.clone(),
        };
        rt.expect_send(
            REWARD_ACTOR_ADDR,
            THIS_EPOCH_REWARD_METHOD,
            None,
            TokenAmount::zero(),
            IpldBlock::serialize_cbor(&reward).unwrap(),
            ExitCode::OK,
        );
    }

    pub fn expect_deferred_cron_event(
        &self,
        rt: &MockRuntime,
        miner: &Address,
        payload: &RawBytes,
        exit_code: ExitCode,
    ) {
        rt.expect_send(
            *miner,
            ON_DEFERRED_CRON_EVENT_METHOD,
            Some(IpldBlock { codec: DAG_CBOR, data: payload.to_vec() }),
            TokenAmount::zero(),
            None,
            exit_code,
        );
    }

    /// Runs the end-of-epoch tick, with any other expected sends registered by the caller.
    pub fn on_epoch_tick_end(&self, rt: &MockRuntime) {
        rt.set_caller(*CRON_ACTOR_CODE_ID, CRON_ACTOR_ADDR);
        rt.expect_validate_caller_addr(vec![CRON_ACTOR_ADDR]);
        let ret = rt.call::<PowerActor>(Method::OnEpochTickEnd as u64, None).unwrap();
        expect_empty(ret);
        rt.verify();
    }

    pub fn fault_miners(&self, rt: &MockRuntime) -> Vec<Address> {
        let st: State = rt.get_state();
        let (summary, acc) = check_state_invariants(&st, rt.store());
        acc.assert_empty();
        summary.fault_miners
    }

    pub fn check_state(&self, rt: &MockRuntime) {
        let st: State = rt.get_state();
        let (_, acc) = check_state_invariants(&st, rt.store());
        acc.assert_empty();
    }
}

/// A committed-capacity weight for a sector of the given size and lifetime.
pub fn cc_weight(sector_size: SectorSize, duration: ChainEpoch) -> SectorStorageWeightDesc {
    SectorStorageWeightDesc {
        sector_size,
        duration,
        deal_weight: BigInt::zero(),
        verified_deal_weight: BigInt::zero(),
    }
}

pub fn verify_empty_map(rt: &MockRuntime, key: cid::Cid) {
    let map = Map::<_, u64, RawBytes>::load(rt.store(), &key, DEFAULT_HAMT_CONFIG, "empty").unwrap();
    map.for_each(|_, _| panic!("expected no keys")).unwrap();
}
