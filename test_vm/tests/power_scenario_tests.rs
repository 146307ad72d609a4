use std::rc::Rc;

use fil_actor_cron::Method as CronMethod;
use fil_actor_power::{CreateMinerParams, CreateMinerReturn, Method as PowerMethod};
use fil_actors_runtime::{
    CRON_ACTOR_ADDR, CRON_ACTOR_ID, STORAGE_POWER_ACTOR_ADDR, STORAGE_POWER_ACTOR_ID,
    SYSTEM_ACTOR_ID,
};
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::sector::RegisteredSealProof;
use num_traits::Zero;
use test_vm::expects::Expect;
use test_vm::util::{apply_code, create_accounts, create_miner, cron_tick, power_state};
use test_vm::{ExpectInvocation, TestVM, FIRST_TEST_USER_ADDR};

#[test]
fn create_miner_test() {
    let store = Rc::new(MemoryBlockstore::new());
    let v = TestVM::new_with_singletons(store);

    let owner = create_accounts(&v, 1, &TokenAmount::from_whole(10_000))[0];
    let params = CreateMinerParams {
        owner,
        worker: owner,
        seal_proof_type: RegisteredSealProof::StackedDRG32GiBV1P1,
        peer: b"miner".to_vec(),
    };
    let value = TokenAmount::from_atto(1000u32);

    v.take_invocations();
    let res = v.execute_message(
        &owner,
        &STORAGE_POWER_ACTOR_ADDR,
        &value,
        PowerMethod::CreateMiner as u64,
        IpldBlock::serialize_cbor(&params).unwrap(),
    );
    assert_eq!(ExitCode::OK, res.code);
    let ret: CreateMinerReturn = res.ret.clone().unwrap().deserialize().unwrap();
    let miner_id = FIRST_TEST_USER_ADDR + 1;
    assert_eq!(Address::new_id(miner_id), ret.id_address);

    ExpectInvocation {
        from: owner.id().unwrap(),
        to: STORAGE_POWER_ACTOR_ADDR,
        method: PowerMethod::CreateMiner as u64,
        params: Some(IpldBlock::serialize_cbor(&params).unwrap()),
        return_value: Some(res.ret),
        subinvocs: Some(vec![Expect::init_exec(
            STORAGE_POWER_ACTOR_ID,
            vec![Expect::miner_constructor(
                ret.id_address,
                value.clone(),
                vec![
                    // the worker is given by ID, so its key is looked up
                    Expect::account_pubkey(miner_id, owner),
                    Expect::power_enroll_cron(miner_id),
                ],
            )],
        )]),
        ..Default::default()
    }
    .matches(v.take_invocations().last().unwrap());

    assert_eq!(value, v.balance(&ret.id_address));
    assert_eq!(Some(ret.id_address), v.resolve_id_address(&ret.robust_address));
    v.assert_state_invariants();
}

#[test]
fn test_cron_tick() {
    let store = Rc::new(MemoryBlockstore::new());
    let v = TestVM::new_with_singletons(store);
    v.set_epoch(1);

    let addrs = create_accounts(&v, 1, &TokenAmount::from_whole(10_000));
    let (id_addr, _) = create_miner(
        &v,
        &addrs[0],
        &addrs[0],
        RegisteredSealProof::StackedDRG32GiBV1P1,
        &TokenAmount::from_whole(10_000),
    );

    // the miner's first proving period cron is the only event enrolled
    let cron_epoch =
        *power_state(&v).pending_cron_epochs(&*v.store, i64::MAX).unwrap().first().unwrap();

    let tick_expectation = |power_subinvocs: Vec<ExpectInvocation>| ExpectInvocation {
        from: SYSTEM_ACTOR_ID,
        to: CRON_ACTOR_ADDR,
        method: CronMethod::EpochTick as u64,
        subinvocs: Some(vec![ExpectInvocation {
            from: CRON_ACTOR_ID,
            to: STORAGE_POWER_ACTOR_ADDR,
            method: PowerMethod::OnEpochTickEnd as u64,
            subinvocs: Some(power_subinvocs),
            ..Default::default()
        }]),
        ..Default::default()
    };

    if cron_epoch > v.epoch() {
        // a tick before the enrolled epoch only refreshes the reward estimate
        v.take_invocations();
        v.set_epoch(cron_epoch - 1);
        cron_tick(&v);
        tick_expectation(vec![Expect::reward_this_epoch()])
            .matches(v.take_invocations().last().unwrap());
    }

    v.set_epoch(cron_epoch);
    cron_tick(&v);
    let mut miner_call = Expect::miner_cron(id_addr);
    miner_call.value = Some(TokenAmount::zero());
    tick_expectation(vec![Expect::reward_this_epoch(), miner_call])
        .matches(v.take_invocations().last().unwrap());

    assert_eq!(cron_epoch, power_state(&v).last_processed_cron_epoch);
    v.assert_state_invariants();
}

#[test]
fn only_principals_create_miners() {
    let store = Rc::new(MemoryBlockstore::new());
    let v = TestVM::new_with_singletons(store);

    let addrs = create_accounts(&v, 1, &TokenAmount::from_whole(10_000));
    let (miner, _) = create_miner(
        &v,
        &addrs[0],
        &addrs[0],
        RegisteredSealProof::StackedDRG32GiBV1P1,
        &TokenAmount::from_whole(100),
    );

    // a miner is not a signable actor
    let params = CreateMinerParams {
        owner: addrs[0],
        worker: addrs[0],
        seal_proof_type: RegisteredSealProof::StackedDRG32GiBV1P1,
        peer: vec![],
    };
    apply_code(
        &v,
        &miner,
        &STORAGE_POWER_ACTOR_ADDR,
        &TokenAmount::zero(),
        PowerMethod::CreateMiner as u64,
        Some(params),
        ExitCode::USR_FORBIDDEN,
    );

    // nor may an account adjust the network's pledge
    apply_code(
        &v,
        &addrs[0],
        &STORAGE_POWER_ACTOR_ADDR,
        &TokenAmount::zero(),
        PowerMethod::UpdatePledgeTotal as u64,
        Some(TokenAmount::from_whole(1)),
        ExitCode::USR_FORBIDDEN,
    );
    assert!(power_state(&v).total_pledge_collateral.is_zero());
    v.assert_state_invariants();
}
