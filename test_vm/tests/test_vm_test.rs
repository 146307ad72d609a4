use std::rc::Rc;

use fil_actors_runtime::test_utils::{make_builtin, ACCOUNT_ACTOR_CODE_ID, MULTISIG_ACTOR_CODE_ID};
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::METHOD_SEND;
use num_traits::Zero;
use test_vm::{actor, AccountState, TestVM, FIRST_TEST_USER_ADDR, TEST_FAUCET_ADDR};

#[test]
fn state_control() {
    let store = Rc::new(MemoryBlockstore::new());
    let v = TestVM::new(store);
    let addr1 = Address::new_id(1000);
    let addr2 = Address::new_id(2222);

    let a1 =
        actor(*ACCOUNT_ACTOR_CODE_ID, make_builtin(b"a1-head"), 42, TokenAmount::from_atto(10u8));
    v.set_actor(&addr1, a1.clone());
    assert_eq!(v.actor(&addr1).unwrap(), a1);
    let check = v.checkpoint();

    let a2 =
        actor(*MULTISIG_ACTOR_CODE_ID, make_builtin(b"a2-head"), 88, TokenAmount::from_atto(1u8));
    v.set_actor(&addr2, a2.clone());
    assert_eq!(v.actor(&addr2).unwrap(), a2);
    // rollback removes a2 but not a1
    v.rollback(check);

    assert_eq!(None, v.actor(&addr2));
    assert_eq!(v.actor(&addr1).unwrap(), a1);

    // actors with code the VM knows nothing of fail the invariant check
    v.set_actor(
        &addr2,
        actor(make_builtin(b"unknown"), make_builtin(b"a2-head"), 0, TokenAmount::zero()),
    );
    let invariants_check = v.check_state_invariants();
    assert!(invariants_check.is_err());
    assert!(invariants_check.unwrap_err().to_string().contains("unexpected actor code CID"));
}

fn assert_account_actor(
    exp_call_seq: u64,
    exp_bal: TokenAmount,
    exp_pk_addr: Address,
    v: &TestVM,
    addr: Address,
) {
    let act = v.actor(&addr).unwrap();
    let st: AccountState = v.get_state(&addr).unwrap();
    assert_eq!(exp_call_seq, act.call_seq);
    assert_eq!(*ACCOUNT_ACTOR_CODE_ID, act.code);
    assert_eq!(exp_bal, act.balance);
    assert_eq!(exp_pk_addr, st.address);
}

#[test]
fn test_sent() {
    let store = Rc::new(MemoryBlockstore::new());
    let v = TestVM::new_with_singletons(store);

    // send to uninitialized account actor
    let addr1 = Address::new_bls(&[1; fvm_shared::address::BLS_PUB_LEN]).unwrap();
    let res =
        v.execute_message(&TEST_FAUCET_ADDR, &addr1, &TokenAmount::from_atto(42u8), METHOD_SEND, None);
    assert_eq!(ExitCode::OK, res.code);
    let expect_id_addr1 = Address::new_id(FIRST_TEST_USER_ADDR);
    assert_account_actor(0, TokenAmount::from_atto(42u8), addr1, &v, expect_id_addr1);

    // send from this account actor to another uninit account actor
    let addr2 = Address::new_bls(&[2; fvm_shared::address::BLS_PUB_LEN]).unwrap();
    let res = v.execute_message(&addr1, &addr2, &TokenAmount::from_atto(41u8), METHOD_SEND, None);
    assert_eq!(ExitCode::OK, res.code);
    let expect_id_addr2 = Address::new_id(FIRST_TEST_USER_ADDR + 1);
    assert_account_actor(0, TokenAmount::from_atto(41u8), addr2, &v, expect_id_addr2);

    // send between two initialized account actors
    let res = v.execute_message(&addr2, &addr1, &TokenAmount::from_atto(41u8), METHOD_SEND, None);
    assert_eq!(ExitCode::OK, res.code);
    assert_account_actor(1, TokenAmount::from_atto(42u8), addr1, &v, expect_id_addr1);
    assert_account_actor(1, TokenAmount::zero(), addr2, &v, expect_id_addr2);

    // self send is noop
    let res = v.execute_message(&addr1, &addr1, &TokenAmount::from_atto(1u8), METHOD_SEND, None);
    assert_eq!(ExitCode::OK, res.code);
    assert_account_actor(2, TokenAmount::from_atto(42u8), addr1, &v, expect_id_addr1);

    // fail with insufficient funds
    let res = v.execute_message(&addr2, &addr1, &TokenAmount::from_atto(1u8), METHOD_SEND, None);
    assert_eq!(ExitCode::SYS_INSUFFICIENT_FUNDS, res.code);
    assert_account_actor(2, TokenAmount::from_atto(42u8), addr1, &v, expect_id_addr1);
    assert_account_actor(2, TokenAmount::zero(), addr2, &v, expect_id_addr2);

    // fail to send to non existent id actor (vm doesn't create those on send)
    let res = v.execute_message(
        &addr1,
        &Address::new_id(88),
        &TokenAmount::from_atto(1u8),
        METHOD_SEND,
        None,
    );
    assert_eq!(ExitCode::SYS_INVALID_RECEIVER, res.code);
    assert_account_actor(3, TokenAmount::from_atto(42u8), addr1, &v, expect_id_addr1);
    assert_account_actor(2, TokenAmount::zero(), addr2, &v, expect_id_addr2);
    v.assert_state_invariants();
}

#[test]
fn unknown_sender_is_rejected() {
    let store = Rc::new(MemoryBlockstore::new());
    let v = TestVM::new_with_singletons(store);

    let stranger = Address::new_bls(&[7; fvm_shared::address::BLS_PUB_LEN]).unwrap();
    let res = v.execute_message(
        &stranger,
        &TEST_FAUCET_ADDR,
        &TokenAmount::from_atto(1u8),
        METHOD_SEND,
        None,
    );
    assert_eq!(ExitCode::SYS_SENDER_INVALID, res.code);
    assert_eq!(None, v.resolve_id_address(&stranger));
}

#[test]
fn failed_message_rolls_back_nested_transfers() {
    let store = Rc::new(MemoryBlockstore::new());
    let v = TestVM::new_with_singletons(store);
    let faucet_balance = v.balance(&TEST_FAUCET_ADDR);

    // a key address of a protocol accounts cannot hold is not created
    let actor_addr = Address::new_actor(b"not an account");
    let res = v.execute_message(
        &TEST_FAUCET_ADDR,
        &actor_addr,
        &TokenAmount::from_atto(5u8),
        METHOD_SEND,
        None,
    );
    assert_eq!(ExitCode::SYS_INVALID_RECEIVER, res.code);
    assert_eq!(faucet_balance, v.balance(&TEST_FAUCET_ADDR));
    assert_eq!(None, v.actor(&actor_addr));
    assert_eq!(1, v.actor(&TEST_FAUCET_ADDR).unwrap().call_seq);
}
