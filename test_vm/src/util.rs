use std::cmp::max;

use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::sector::{PoStProof, RegisteredSealProof, SectorNumber};
use fvm_shared::{MethodNum, METHOD_SEND};
use num_traits::Zero;
use serde::de::DeserializeOwned;
use serde::Serialize;

use fil_actor_cron::Method as CronMethod;
use fil_actor_miner::{
    Method as MinerMethod, ProveCommitSectorParams, SectorOnChainInfo, SectorPreCommitInfo,
    State as MinerState, SubmitWindowedPoStParams,
};
use fil_actor_power::{
    Claim, CreateMinerParams, CreateMinerReturn, Method as PowerMethod, State as PowerState,
};
use fil_actors_runtime::test_utils::{make_sealed_cid, new_bls_addr};
use fil_actors_runtime::{CRON_ACTOR_ADDR, STORAGE_POWER_ACTOR_ADDR, SYSTEM_ACTOR_ADDR};

use crate::{TestVM, TEST_FAUCET_ADDR};

const ACCOUNT_SEED: u8 = 16;

/// Funds `count` new BLS accounts from the faucet and returns their ID addresses.
pub fn create_accounts(v: &TestVM, count: u8, balance: &TokenAmount) -> Vec<Address> {
    create_accounts_seeded(v, count, balance, ACCOUNT_SEED)
}

pub fn create_accounts_seeded(
    v: &TestVM,
    count: u8,
    balance: &TokenAmount,
    seed: u8,
) -> Vec<Address> {
    let pk_addrs: Vec<Address> = (0..count).map(|i| new_bls_addr(seed.wrapping_add(i))).collect();
    // Sending to a key address creates its account actor.
    for pk_addr in &pk_addrs {
        apply_ok(v, &TEST_FAUCET_ADDR, pk_addr, balance, METHOD_SEND, None::<RawBytes>);
    }
    pk_addrs.iter().map(|a| v.resolve_id_address(a).unwrap()).collect()
}

pub fn apply_ok<S: Serialize>(
    v: &TestVM,
    from: &Address,
    to: &Address,
    value: &TokenAmount,
    method: MethodNum,
    params: Option<S>,
) -> Option<IpldBlock> {
    apply_code(v, from, to, value, method, params, ExitCode::OK)
}

pub fn apply_code<S: Serialize>(
    v: &TestVM,
    from: &Address,
    to: &Address,
    value: &TokenAmount,
    method: MethodNum,
    params: Option<S>,
    code: ExitCode,
) -> Option<IpldBlock> {
    let params = params.map(|p| IpldBlock::serialize_cbor(&p).unwrap().unwrap());
    let res = v.execute_message(from, to, value, method, params);
    assert_eq!(code, res.code, "unexpected exit code, message: {}", res.message);
    res.ret
}

/// Deserializes a message's return value.
pub fn ret_as<T: DeserializeOwned>(ret: Option<IpldBlock>) -> T {
    ret.unwrap().deserialize().unwrap()
}

/// Runs the cron actor's tick at the current epoch.
pub fn cron_tick(v: &TestVM) {
    apply_ok(
        v,
        &SYSTEM_ACTOR_ADDR,
        &CRON_ACTOR_ADDR,
        &TokenAmount::zero(),
        CronMethod::EpochTick as u64,
        None::<RawBytes>,
    );
}

/// Ticks cron at every epoch before `target` that has deferred events enrolled with power,
/// then moves the VM to `target`.
/// Events enrolled for an epoch already passed are run at the current epoch.
pub fn advance_by_cron_to_epoch(v: &TestVM, target: ChainEpoch) {
    // Each tick may enroll further events, so the queue is re-read every time.
    while let Some(&epoch) =
        power_state(v).pending_cron_epochs(&*v.store, target - 1).unwrap().first()
    {
        v.set_epoch(max(epoch, v.epoch()));
        cron_tick(v);
    }
    v.set_epoch(max(target, v.epoch()));
}

/// Advances to the last epoch of the miner's current proving period and runs its cron.
/// Returns the epoch at which the period was closed.
pub fn advance_to_proving_period_end(v: &TestVM, miner: &Address) -> ChainEpoch {
    let st = miner_state(v, miner);
    let end = st.post_state.proving_period_start + v.policy.wpost_proving_period - 1;
    advance_by_cron_to_epoch(v, end);
    cron_tick(v);
    v.epoch()
}

pub fn create_miner(
    v: &TestVM,
    owner: &Address,
    worker: &Address,
    seal_proof_type: RegisteredSealProof,
    balance: &TokenAmount,
) -> (Address, Address) {
    let params = CreateMinerParams {
        owner: *owner,
        worker: *worker,
        seal_proof_type,
        peer: b"miner".to_vec(),
    };
    let ret: CreateMinerReturn = ret_as(apply_ok(
        v,
        owner,
        &STORAGE_POWER_ACTOR_ADDR,
        balance,
        PowerMethod::CreateMiner as u64,
        Some(params),
    ));
    (ret.id_address, ret.robust_address)
}

/// An expiration satisfying the miner's proving period boundary, `periods` periods from its current one.
pub fn sector_expiration(v: &TestVM, miner: &Address, periods: i64) -> ChainEpoch {
    let st = miner_state(v, miner);
    st.post_state.proving_period_start + periods * v.policy.wpost_proving_period - 1
}

/// Pre-commits a committed capacity sector, with seal randomness from the previous epoch.
pub fn precommit_sector(
    v: &TestVM,
    worker: &Address,
    miner: &Address,
    seal_proof: RegisteredSealProof,
    sector_number: SectorNumber,
    expiration: ChainEpoch,
) {
    let params = SectorPreCommitInfo {
        seal_proof,
        sector_number,
        sealed_cid: make_sealed_cid(format!("sn: {}", sector_number).as_bytes()),
        seal_rand_epoch: v.epoch() - 1,
        deal_ids: vec![],
        expiration,
    };
    apply_ok(
        v,
        worker,
        miner,
        &TokenAmount::zero(),
        MinerMethod::PreCommitSector as u64,
        Some(params),
    );
}

/// Moves past the interactive challenge delay and proves a pre-committed sector.
pub fn prove_commit_sector(
    v: &TestVM,
    worker: &Address,
    miner: &Address,
    sector_number: SectorNumber,
) {
    let precommit = miner_state(v, miner)
        .get_precommitted_sector(&*v.store, sector_number)
        .unwrap()
        .unwrap();
    let prove_epoch = precommit.pre_commit_epoch + v.policy.pre_commit_challenge_delay + 1;
    advance_by_cron_to_epoch(v, prove_epoch);
    let params = ProveCommitSectorParams { sector_number, proof: RawBytes::new(vec![]) };
    apply_ok(
        v,
        worker,
        miner,
        &TokenAmount::zero(),
        MinerMethod::ProveCommitSector as u64,
        Some(params),
    );
}

/// Returns the deadline a sector is due at, once it has been assigned.
pub fn sector_deadline(v: &TestVM, miner: &Address, sector_number: SectorNumber) -> Option<u64> {
    let deadlines = miner_state(v, miner).load_deadlines(&*v.store).unwrap();
    (0..v.policy.wpost_period_deadlines)
        .find(|&d| deadlines.sectors_at(d).unwrap().get(sector_number))
}

/// Opens a deadline in the miner's current proving period and proves all its partitions.
pub fn submit_windowed_post(v: &TestVM, worker: &Address, miner: &Address, deadline: u64) {
    let st = miner_state(v, miner);
    let info = st.get_info(&*v.store).unwrap();
    let open = st.post_state.proving_period_start
        + deadline as ChainEpoch * v.policy.wpost_challenge_window;
    advance_by_cron_to_epoch(v, open);

    let (first, count) = st
        .load_deadlines(&*v.store)
        .unwrap()
        .partitions_for_deadline(info.window_post_partition_sectors, deadline)
        .unwrap();
    let post_proof = info.seal_proof_type.registered_window_post_proof().unwrap();
    let params = SubmitWindowedPoStParams {
        deadline,
        partitions: (first..first + count).collect(),
        proofs: (0..count).map(|_| PoStProof { post_proof, proof_bytes: vec![] }).collect(),
    };
    apply_ok(
        v,
        worker,
        miner,
        &TokenAmount::zero(),
        MinerMethod::SubmitWindowedPoSt as u64,
        Some(params),
    );
}

pub fn miner_state(v: &TestVM, miner: &Address) -> MinerState {
    v.get_state(miner).unwrap()
}

pub fn power_state(v: &TestVM) -> PowerState {
    v.get_state(&STORAGE_POWER_ACTOR_ADDR).unwrap()
}

pub fn sector_info(v: &TestVM, miner: &Address, sector_number: SectorNumber) -> SectorOnChainInfo {
    miner_state(v, miner).get_sector(&*v.store, sector_number).unwrap().unwrap()
}

pub fn miner_claim(v: &TestVM, miner: &Address) -> Option<Claim> {
    let id = v.resolve_id_address(miner)?;
    power_state(v).get_claim(&*v.store, &id).unwrap()
}
