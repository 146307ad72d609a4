use fil_actor_miner::ext::power::{OnSectorProveCommitParams, OnSectorProveCommitReturn};
use fil_actor_miner::{
    ext, Actor, CheckSectorProvenParams, CronEventPayload, Method, ProveCommitSectorParams,
    SectorStorageWeightDesc, CRON_EVENT_PRE_COMMIT_EXPIRY,
};
use fil_actors_runtime::test_utils::*;
use fil_actors_runtime::STORAGE_POWER_ACTOR_ADDR;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::bigint::BigInt;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::sector::RegisteredSealProof;
use num_traits::Zero;

mod util;
use util::*;

const PRECOMMIT_EPOCH: i64 = 100;

fn setup() -> (ActorHarness, MockRuntime) {
    let h = ActorHarness::new(0);
    let rt = h.new_runtime();
    h.construct_and_verify(&rt);
    rt.set_epoch(PRECOMMIT_EPOCH);
    (h, rt)
}

fn pre_commit_expecting_abort(
    h: &ActorHarness,
    rt: &MockRuntime,
    params: fil_actor_miner::SectorPreCommitInfo,
    code: ExitCode,
) {
    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.worker);
    rt.expect_validate_caller_addr(vec![h.worker]);
    expect_abort(
        code,
        rt.call::<Actor>(Method::PreCommitSector as u64, IpldBlock::serialize_cbor(&params).unwrap()),
    );
    rt.reset();
}

#[test]
fn pre_commit_records_deposit() {
    let (h, rt) = setup();
    let expiration = h.valid_expiration(&rt, 10);
    let expected_deposit = h.expected_deposit(&rt, expiration);
    assert!(expected_deposit.is_positive());

    let precommit =
        h.pre_commit_sector(&rt, h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration));

    assert_eq!(PRECOMMIT_EPOCH, precommit.pre_commit_epoch);
    assert_eq!(expected_deposit, precommit.pre_commit_deposit);
    let st = h.get_state(&rt);
    assert_eq!(expected_deposit, st.pre_commit_deposits);
    assert!(st.has_sector_number(&rt.store, 1).unwrap());
    h.check_state(&rt);
}

#[test]
fn pre_commit_rejects_invalid_params() {
    let (h, rt) = setup();
    let expiration = h.valid_expiration(&rt, 10);

    // Expiration must fall immediately before a proving period boundary.
    pre_commit_expecting_abort(
        &h,
        &rt,
        h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration + 1),
        ExitCode::USR_ILLEGAL_ARGUMENT,
    );

    // Expiration in the past.
    pre_commit_expecting_abort(
        &h,
        &rt,
        h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 2, PRECOMMIT_EPOCH - 1),
        ExitCode::USR_ILLEGAL_ARGUMENT,
    );

    // Seal randomness from the future.
    pre_commit_expecting_abort(
        &h,
        &rt,
        h.make_pre_commit_params(1, PRECOMMIT_EPOCH, expiration),
        ExitCode::USR_ILLEGAL_ARGUMENT,
    );

    // Wrong seal proof type.
    let mut params = h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration);
    params.seal_proof = RegisteredSealProof::StackedDRG32GiBV1;
    pre_commit_expecting_abort(&h, &rt, params, ExitCode::USR_ILLEGAL_ARGUMENT);

    assert!(h.get_state(&rt).pre_commit_deposits.is_zero());
}

#[test]
fn pre_commit_rejects_stale_seal_randomness() {
    let (h, rt) = setup();
    let epoch = 20_000;
    rt.set_epoch(epoch);
    let expiration = h.valid_expiration(&rt, 20);
    let oldest = epoch - rt.policy.chain_finality - h.max_seal_duration(&rt);

    pre_commit_expecting_abort(
        &h,
        &rt,
        h.make_pre_commit_params(1, oldest - 1, expiration),
        ExitCode::USR_ILLEGAL_ARGUMENT,
    );
    h.pre_commit_sector(&rt, h.make_pre_commit_params(1, oldest, expiration));
}

#[test]
fn pre_commit_rejects_proof_without_seal_duration() {
    let (h, mut rt) = setup();
    rt.policy.max_seal_duration.remove(h.seal_proof_type);
    let expiration = h.valid_expiration(&rt, 10);

    pre_commit_expecting_abort(
        &h,
        &rt,
        h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration),
        ExitCode::USR_ILLEGAL_ARGUMENT,
    );
    assert!(!h.get_state(&rt).has_sector_number(&rt.store, 1).unwrap());
}

#[test]
fn pre_commit_rejects_sector_number_in_use() {
    let (h, rt) = setup();
    let expiration = h.valid_expiration(&rt, 10);
    h.pre_commit_sector(&rt, h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration));

    pre_commit_expecting_abort(
        &h,
        &rt,
        h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration),
        ExitCode::USR_ILLEGAL_ARGUMENT,
    );
}

#[test]
fn pre_commit_requires_available_balance() {
    let (h, rt) = setup();
    rt.set_balance(TokenAmount::from_atto(1));
    let expiration = h.valid_expiration(&rt, 10);

    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.worker);
    rt.expect_validate_caller_addr(vec![h.worker]);
    h.expect_query_power(&rt);
    let params = h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration);
    expect_abort(
        ExitCode::USR_INSUFFICIENT_FUNDS,
        rt.call::<Actor>(Method::PreCommitSector as u64, IpldBlock::serialize_cbor(&params).unwrap()),
    );
    rt.verify();
}

#[test]
fn prove_commit_activates_sector() {
    let (h, rt) = setup();
    let pledge = TokenAmount::from_whole(1);
    let expiration = h.valid_expiration(&rt, 10);
    let precommit =
        h.pre_commit_sector(&rt, h.make_pre_commit_params(7, PRECOMMIT_EPOCH - 1, expiration));

    let prove_epoch = PRECOMMIT_EPOCH + rt.policy.pre_commit_challenge_delay + 1;
    rt.set_epoch(prove_epoch);
    let sector = h.prove_commit_sector(&rt, &precommit, &pledge);

    assert_eq!(precommit.info, sector.info);
    assert_eq!(prove_epoch, sector.activation_epoch);
    assert_eq!(pledge, sector.initial_pledge);
    assert!(!sector.is_faulty());

    let st = h.get_state(&rt);
    assert!(st.get_precommitted_sector(&rt.store, 7).unwrap().is_none());
    assert!(st.pre_commit_deposits.is_zero());
    assert_eq!(pledge, st.locked_funds);
    assert_eq!(vec![7], st.new_sectors.iter().collect::<Vec<_>>());
    h.check_state(&rt);

    // The sector is now reported as proven.
    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.owner);
    rt.expect_validate_caller_any();
    rt.call::<Actor>(
        Method::CheckSectorProven as u64,
        IpldBlock::serialize_cbor(&CheckSectorProvenParams { sector_number: 7 }).unwrap(),
    )
    .unwrap();
    rt.verify();
}

#[test]
fn check_sector_proven_fails_for_unknown_sector() {
    let (h, rt) = setup();
    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.owner);
    rt.expect_validate_caller_any();
    expect_abort(
        ExitCode::USR_NOT_FOUND,
        rt.call::<Actor>(
            Method::CheckSectorProven as u64,
            IpldBlock::serialize_cbor(&CheckSectorProvenParams { sector_number: 3 }).unwrap(),
        ),
    );
}

#[test]
fn prove_commit_timing_is_enforced() {
    let (h, rt) = setup();
    let expiration = h.valid_expiration(&rt, 10);
    let precommit =
        h.pre_commit_sector(&rt, h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration));
    let params = ProveCommitSectorParams { sector_number: 1, proof: RawBytes::new(vec![0; 192]) };

    // Interactive randomness is not yet available.
    rt.set_epoch(precommit.pre_commit_epoch + rt.policy.pre_commit_challenge_delay);
    rt.expect_validate_caller_any();
    expect_abort(
        ExitCode::USR_FORBIDDEN,
        rt.call::<Actor>(
            Method::ProveCommitSector as u64,
            IpldBlock::serialize_cbor(&params).unwrap(),
        ),
    );

    // Too late.
    rt.set_epoch(precommit.pre_commit_epoch + h.max_seal_duration(&rt) + 1);
    rt.expect_validate_caller_any();
    expect_abort(
        ExitCode::USR_ILLEGAL_ARGUMENT,
        rt.call::<Actor>(
            Method::ProveCommitSector as u64,
            IpldBlock::serialize_cbor(&params).unwrap(),
        ),
    );

    // No such pre-commitment.
    let params = ProveCommitSectorParams { sector_number: 2, proof: RawBytes::new(vec![0; 192]) };
    rt.expect_validate_caller_any();
    expect_abort(
        ExitCode::USR_NOT_FOUND,
        rt.call::<Actor>(
            Method::ProveCommitSector as u64,
            IpldBlock::serialize_cbor(&params).unwrap(),
        ),
    );
}

#[test]
fn prove_commit_requires_funds_for_pledge() {
    let (h, rt) = setup();
    let expiration = h.valid_expiration(&rt, 10);
    let precommit =
        h.pre_commit_sector(&rt, h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration));
    rt.set_balance(precommit.pre_commit_deposit.clone());

    let prove_epoch = PRECOMMIT_EPOCH + rt.policy.pre_commit_challenge_delay + 1;
    rt.set_epoch(prove_epoch);
    let proof = vec![0u8; 192];
    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, h.worker);
    rt.expect_validate_caller_any();
    h.expect_seal_verification(&rt, &precommit, proof.clone());

    let weight = SectorStorageWeightDesc {
        sector_size: h.sector_size,
        duration: expiration - prove_epoch,
        deal_weight: BigInt::zero(),
        verified_deal_weight: BigInt::zero(),
    };
    rt.expect_send(
        STORAGE_POWER_ACTOR_ADDR,
        ext::power::ON_SECTOR_PROVE_COMMIT_METHOD,
        IpldBlock::serialize_cbor(&OnSectorProveCommitParams { weight }).unwrap(),
        TokenAmount::zero(),
        IpldBlock::serialize_cbor(&OnSectorProveCommitReturn {
            pledge: &precommit.pre_commit_deposit + TokenAmount::from_atto(1),
        })
        .unwrap(),
        ExitCode::OK,
    );

    let params = ProveCommitSectorParams { sector_number: 1, proof: RawBytes::new(proof) };
    expect_abort(
        ExitCode::USR_INSUFFICIENT_FUNDS,
        rt.call::<Actor>(
            Method::ProveCommitSector as u64,
            IpldBlock::serialize_cbor(&params).unwrap(),
        ),
    );
    rt.verify();

    // The pre-commitment survives the failed proof.
    let st = h.get_state(&rt);
    assert!(st.get_precommitted_sector(&rt.store, 1).unwrap().is_some());
}

#[test]
fn expired_pre_commit_deposit_is_burnt() {
    let (h, rt) = setup();
    let expiration = h.valid_expiration(&rt, 10);
    let precommit =
        h.pre_commit_sector(&rt, h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration));

    rt.set_epoch(PRECOMMIT_EPOCH + h.max_seal_duration(&rt) + 1);
    rt.expect_validate_caller_addr(vec![STORAGE_POWER_ACTOR_ADDR]);
    h.expect_burn(&rt, &precommit.pre_commit_deposit);
    h.on_cron(
        &rt,
        CronEventPayload {
            event_type: CRON_EVENT_PRE_COMMIT_EXPIRY,
            sectors: Some(bitfield(&[1])),
        },
    )
    .unwrap();
    rt.verify();

    let st = h.get_state(&rt);
    assert!(st.get_precommitted_sector(&rt.store, 1).unwrap().is_none());
    assert!(st.pre_commit_deposits.is_zero());
    h.check_state(&rt);
}

#[test]
fn expiry_of_proven_sector_is_a_no_op() {
    let (h, rt) = setup();
    h.commit_and_prove_sector(&rt, 1, 10, &TokenAmount::from_whole(1));

    rt.set_epoch(PRECOMMIT_EPOCH + h.max_seal_duration(&rt) + 1);
    rt.expect_validate_caller_addr(vec![STORAGE_POWER_ACTOR_ADDR]);
    h.on_cron(
        &rt,
        CronEventPayload {
            event_type: CRON_EVENT_PRE_COMMIT_EXPIRY,
            sectors: Some(bitfield(&[1])),
        },
    )
    .unwrap();
    rt.verify();
    assert!(h.get_state(&rt).get_sector(&rt.store, 1).unwrap().is_some());
}

#[test]
fn prove_commit_deadline_follows_proof_seal_duration() {
    let (h, mut rt) = setup();
    rt.policy.max_seal_duration.insert(h.seal_proof_type, 200);
    let expiration = h.valid_expiration(&rt, 10);
    let precommit =
        h.pre_commit_sector(&rt, h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration));

    // Still within the seal duration: the expiry check leaves the pre-commitment alone.
    rt.set_epoch(PRECOMMIT_EPOCH + 200);
    rt.expect_validate_caller_addr(vec![STORAGE_POWER_ACTOR_ADDR]);
    h.on_cron(
        &rt,
        CronEventPayload {
            event_type: CRON_EVENT_PRE_COMMIT_EXPIRY,
            sectors: Some(bitfield(&[1])),
        },
    )
    .unwrap();
    rt.verify();
    assert!(h.get_state(&rt).get_precommitted_sector(&rt.store, 1).unwrap().is_some());

    // One epoch later the proof is too late, well before the default seal duration.
    rt.set_epoch(PRECOMMIT_EPOCH + 201);
    let params = ProveCommitSectorParams { sector_number: 1, proof: RawBytes::new(vec![0; 192]) };
    rt.expect_validate_caller_any();
    expect_abort(
        ExitCode::USR_ILLEGAL_ARGUMENT,
        rt.call::<Actor>(
            Method::ProveCommitSector as u64,
            IpldBlock::serialize_cbor(&params).unwrap(),
        ),
    );
    rt.reset();

    rt.expect_validate_caller_addr(vec![STORAGE_POWER_ACTOR_ADDR]);
    h.expect_burn(&rt, &precommit.pre_commit_deposit);
    h.on_cron(
        &rt,
        CronEventPayload {
            event_type: CRON_EVENT_PRE_COMMIT_EXPIRY,
            sectors: Some(bitfield(&[1])),
        },
    )
    .unwrap();
    rt.verify();
    assert!(h.get_state(&rt).get_precommitted_sector(&rt.store, 1).unwrap().is_none());
}

#[test]
fn expiry_check_rejects_proof_without_seal_duration() {
    let (h, mut rt) = setup();
    let expiration = h.valid_expiration(&rt, 10);
    h.pre_commit_sector(&rt, h.make_pre_commit_params(1, PRECOMMIT_EPOCH - 1, expiration));

    rt.policy.max_seal_duration.remove(h.seal_proof_type);
    rt.set_epoch(PRECOMMIT_EPOCH + 20_000);
    rt.expect_validate_caller_addr(vec![STORAGE_POWER_ACTOR_ADDR]);
    expect_abort(
        ExitCode::USR_ILLEGAL_ARGUMENT,
        h.on_cron(
            &rt,
            CronEventPayload {
                event_type: CRON_EVENT_PRE_COMMIT_EXPIRY,
                sectors: Some(bitfield(&[1])),
            },
        ),
    );
}
