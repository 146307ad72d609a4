use fil_actor_miner::{
    Actor, ChangePeerIDParams, ChangeWorkerAddressParams, CronEventPayload,
    GetControlAddressesReturn, Method, MinerConstructorParams, WorkerKeyChange,
    CRON_EVENT_WORKER_KEY_CHANGE,
};
use fil_actors_runtime::test_utils::*;
use fil_actors_runtime::INIT_ACTOR_ADDR;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::address::Address;
use fvm_shared::error::ExitCode;
use num_traits::Zero;

mod util;
use util::*;

#[test]
fn simple_construction() {
    let h = ActorHarness::new(100);
    let rt = h.new_runtime();
    h.construct_and_verify(&rt);

    let st = h.get_state(&rt);
    let info = st.get_info(&rt.store).unwrap();
    assert_eq!(h.owner, info.owner);
    assert_eq!(h.worker, info.worker);
    assert_eq!(None, info.pending_worker_key);
    assert_eq!(b"peer".to_vec(), info.peer_id);
    assert_eq!(h.sector_size, info.sector_size);
    assert_eq!(2, info.window_post_partition_sectors);

    // The period containing epoch zero started at offset 100 of the previous period.
    assert_eq!(100 - rt.policy.wpost_proving_period, st.post_state.proving_period_start);
    assert_eq!(0, st.post_state.num_consecutive_failures);
    assert!(st.pre_commit_deposits.is_zero());
    assert!(st.locked_funds.is_zero());
    assert!(st.faults.is_empty());
    assert!(st.new_sectors.is_empty());
    h.check_state(&rt);
}

#[test]
fn construction_later_in_chain() {
    let h = ActorHarness::new(100);
    let rt = h.new_runtime();
    rt.set_epoch(3 * rt.policy.wpost_proving_period + 150);
    h.construct_and_verify(&rt);

    let st = h.get_state(&rt);
    assert_eq!(3 * rt.policy.wpost_proving_period + 100, st.post_state.proving_period_start);
}

#[test]
fn owner_must_be_principal() {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();
    rt.set_address_actor_type(h.owner, *MINER_ACTOR_CODE_ID);

    let params = MinerConstructorParams {
        owner: h.owner,
        worker: h.worker,
        seal_proof_type: h.seal_proof_type,
        peer_id: vec![],
    };
    rt.set_caller(*INIT_ACTOR_CODE_ID, INIT_ACTOR_ADDR);
    rt.expect_validate_caller_addr(vec![INIT_ACTOR_ADDR]);
    expect_abort(
        ExitCode::USR_ILLEGAL_ARGUMENT,
        rt.call::<Actor>(Method::Constructor as u64, IpldBlock::serialize_cbor(&params).unwrap()),
    );
    rt.verify();
}

#[test]
fn worker_must_have_bls_key() {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();

    let params = MinerConstructorParams {
        owner: h.owner,
        worker: h.worker,
        seal_proof_type: h.seal_proof_type,
        peer_id: vec![],
    };
    rt.set_caller(*INIT_ACTOR_CODE_ID, INIT_ACTOR_ADDR);
    rt.expect_validate_caller_addr(vec![INIT_ACTOR_ADDR]);
    h.expect_worker_key_lookup(&rt, h.worker, Address::new_secp256k1(&[1u8; 65]).unwrap());
    expect_abort_contains_message(
        ExitCode::USR_ILLEGAL_ARGUMENT,
        "must have BLS pubkey",
        rt.call::<Actor>(Method::Constructor as u64, IpldBlock::serialize_cbor(&params).unwrap()),
    );
    rt.verify();
}

#[test]
fn only_init_constructs() {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();

    let params = MinerConstructorParams {
        owner: h.owner,
        worker: h.worker,
        seal_proof_type: h.seal_proof_type,
        peer_id: vec![],
    };
    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.owner);
    rt.expect_validate_caller_addr(vec![INIT_ACTOR_ADDR]);
    expect_abort(
        ExitCode::USR_FORBIDDEN,
        rt.call::<Actor>(Method::Constructor as u64, IpldBlock::serialize_cbor(&params).unwrap()),
    );
}

#[test]
fn control_addresses() {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();
    h.construct_and_verify(&rt);

    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, Address::new_id(5000));
    rt.expect_validate_caller_any();
    let ret: GetControlAddressesReturn = rt
        .call::<Actor>(Method::ControlAddresses as u64, None)
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    rt.verify();
    assert_eq!(GetControlAddressesReturn { owner: h.owner, worker: h.worker }, ret);
}

#[test]
fn change_peer_id() {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();
    h.construct_and_verify(&rt);

    let params = ChangePeerIDParams { new_id: b"new-peer".to_vec() };
    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.worker);
    rt.expect_validate_caller_addr(vec![h.worker]);
    rt.call::<Actor>(Method::ChangePeerID as u64, IpldBlock::serialize_cbor(&params).unwrap())
        .unwrap();
    rt.verify();
    assert_eq!(b"new-peer".to_vec(), h.get_state(&rt).get_info(&rt.store).unwrap().peer_id);

    // Only the worker may change the peer ID.
    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.owner);
    rt.expect_validate_caller_addr(vec![h.worker]);
    expect_abort(
        ExitCode::USR_FORBIDDEN,
        rt.call::<Actor>(Method::ChangePeerID as u64, IpldBlock::serialize_cbor(&params).unwrap()),
    );
}

#[test]
fn worker_key_change_takes_effect_after_delay() {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();
    h.construct_and_verify(&rt);

    let new_worker = Address::new_id(102);
    rt.set_address_actor_type(new_worker, *ACCOUNT_ACTOR_CODE_ID);
    rt.set_epoch(10);
    let effective_at = 10 + rt.policy.worker_key_change_delay;

    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.owner);
    rt.expect_validate_caller_addr(vec![h.owner]);
    h.expect_worker_key_lookup(&rt, new_worker, new_bls_addr(1));
    h.expect_enroll_cron(
        &rt,
        effective_at,
        CronEventPayload { event_type: CRON_EVENT_WORKER_KEY_CHANGE, sectors: None },
    );
    rt.call::<Actor>(
        Method::ChangeWorkerAddress as u64,
        IpldBlock::serialize_cbor(&ChangeWorkerAddressParams { new_worker }).unwrap(),
    )
    .unwrap();
    rt.verify();

    let info = h.get_state(&rt).get_info(&rt.store).unwrap();
    assert_eq!(h.worker, info.worker);
    assert_eq!(Some(WorkerKeyChange { new_worker, effective_at }), info.pending_worker_key);

    // A cron event before the effective epoch leaves the key pending.
    rt.set_epoch(effective_at - 1);
    rt.expect_validate_caller_addr(vec![fil_actors_runtime::STORAGE_POWER_ACTOR_ADDR]);
    h.on_cron(&rt, CronEventPayload { event_type: CRON_EVENT_WORKER_KEY_CHANGE, sectors: None })
        .unwrap();
    rt.verify();
    assert_eq!(h.worker, h.get_state(&rt).get_info(&rt.store).unwrap().worker);

    rt.set_epoch(effective_at);
    rt.expect_validate_caller_addr(vec![fil_actors_runtime::STORAGE_POWER_ACTOR_ADDR]);
    h.on_cron(&rt, CronEventPayload { event_type: CRON_EVENT_WORKER_KEY_CHANGE, sectors: None })
        .unwrap();
    rt.verify();

    let info = h.get_state(&rt).get_info(&rt.store).unwrap();
    assert_eq!(new_worker, info.worker);
    assert_eq!(None, info.pending_worker_key);
}

#[test]
fn stale_worker_key_change_event_is_ignored() {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();
    h.construct_and_verify(&rt);
    let before = h.get_state(&rt).get_info(&rt.store).unwrap();
    assert_eq!(None, before.pending_worker_key);

    // A key change event left over after the change was committed.
    rt.set_epoch(50);
    rt.expect_validate_caller_addr(vec![fil_actors_runtime::STORAGE_POWER_ACTOR_ADDR]);
    h.on_cron(&rt, CronEventPayload { event_type: CRON_EVENT_WORKER_KEY_CHANGE, sectors: None })
        .unwrap();
    rt.verify();

    assert_eq!(before, h.get_state(&rt).get_info(&rt.store).unwrap());
}

#[test]
fn only_owner_changes_worker() {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();
    h.construct_and_verify(&rt);

    let new_worker = Address::new_id(102);
    rt.set_address_actor_type(new_worker, *ACCOUNT_ACTOR_CODE_ID);
    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.worker);
    rt.expect_validate_caller_addr(vec![h.owner]);
    h.expect_worker_key_lookup(&rt, new_worker, new_bls_addr(1));
    expect_abort(
        ExitCode::USR_FORBIDDEN,
        rt.call::<Actor>(
            Method::ChangeWorkerAddress as u64,
            IpldBlock::serialize_cbor(&ChangeWorkerAddressParams { new_worker }).unwrap(),
        ),
    );
}

#[test]
fn unknown_cron_event_is_rejected() {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();
    h.construct_and_verify(&rt);

    rt.expect_validate_caller_addr(vec![fil_actors_runtime::STORAGE_POWER_ACTOR_ADDR]);
    expect_abort(
        ExitCode::USR_ILLEGAL_ARGUMENT,
        h.on_cron(&rt, CronEventPayload { event_type: 99, sectors: None }),
    );
    assert!(h.get_state(&rt).pre_commit_deposits.is_zero());
}
