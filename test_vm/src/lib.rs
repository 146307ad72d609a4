use std::cell::RefCell;
use std::rc::Rc;

use cid::Cid;
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::CborStore;
use fvm_shared::address::{Address, Protocol};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::{ActorID, MethodNum, METHOD_CONSTRUCTOR};
use multihash::Code;
use num_traits::Zero;
use serde::de::DeserializeOwned;
use serde::Serialize;

use fil_actor_cron::{
    ConstructorParams as CronConstructorParams, Entry as CronEntry, Method as CronMethod,
};
use fil_actor_power::Method as PowerMethod;
use fil_actors_runtime::reward::{FilterEstimate, ThisEpochRewardReturn};
use fil_actors_runtime::runtime::{Policy, EMPTY_ARR_CID};
use fil_actors_runtime::test_utils::*;
use fil_actors_runtime::{
    Map, MessageAccumulator, BURNT_FUNDS_ACTOR_ADDR, CRON_ACTOR_ADDR, DEFAULT_HAMT_CONFIG,
    INIT_ACTOR_ADDR, REWARD_ACTOR_ADDR, STORAGE_MARKET_ACTOR_ADDR, STORAGE_POWER_ACTOR_ADDR,
    SYSTEM_ACTOR_ADDR,
};

pub use check::check_state_invariants;
pub use constants::*;
pub use fakes::{AccountState, FakeBlockHeader, FakePrimitives, InitState};
use messaging::{InternalMessage, InvocationCtx, TopCtx};
pub use trace::{ExpectInvocation, InvocationTrace};
pub use vm::{actor, ActorState, MessageResult};

mod check;
mod constants;
pub mod expects;
pub mod fakes;
pub mod messaging;
pub mod trace;
pub mod util;
mod vm;

/// An in-memory rendering of the chain state in which the power, miner and cron actors run
/// against fake system actors.
/// Each top-level message is applied atomically: it either succeeds or leaves no trace in state.
pub struct TestVM {
    pub store: Rc<MemoryBlockstore>,
    pub primitives: FakePrimitives,
    pub policy: Policy,
    epoch: RefCell<ChainEpoch>,
    circulating_supply: RefCell<TokenAmount>,
    actors: RefCell<Map<Rc<MemoryBlockstore>, Address, ActorState>>,
    invocations: RefCell<Vec<InvocationTrace>>,
}

impl TestVM {
    pub fn new(store: Rc<MemoryBlockstore>) -> TestVM {
        let actors = Map::empty(store.clone(), DEFAULT_HAMT_CONFIG, "actors");
        TestVM {
            store,
            primitives: FakePrimitives::default(),
            policy: Policy::default(),
            epoch: RefCell::new(0),
            circulating_supply: RefCell::new(TokenAmount::zero()),
            actors: RefCell::new(actors),
            invocations: RefCell::new(vec![]),
        }
    }

    /// Creates a VM at genesis with the system singletons, a burnt funds account and a faucet.
    pub fn new_with_singletons(store: Rc<MemoryBlockstore>) -> TestVM {
        let v = TestVM::new(store);
        let reward_total = TokenAmount::from_whole(TEST_EPOCH_REWARD_FIL);

        // system
        v.set_actor(
            &SYSTEM_ACTOR_ADDR,
            actor(*SYSTEM_ACTOR_CODE_ID, *EMPTY_ARR_CID, 0, TokenAmount::zero()),
        );

        // init
        let init_state = InitState::new(&v.store).unwrap();
        let init_head = v.put_state(&init_state);
        v.set_actor(&INIT_ACTOR_ADDR, actor(*INIT_ACTOR_CODE_ID, init_head, 0, TokenAmount::zero()));

        // reward
        let reward_state = ThisEpochRewardReturn {
            this_epoch_reward_smoothed: FilterEstimate::new(reward_total.atto().clone(), Zero::zero()),
            this_epoch_baseline_power: TEST_BASELINE_POWER.into(),
        };
        let reward_head = v.put_state(&reward_state);
        v.set_actor(
            &REWARD_ACTOR_ADDR,
            actor(*REWARD_ACTOR_CODE_ID, reward_head, 0, TokenAmount::from_whole(1_000_000_000)),
        );

        // market
        v.set_actor(
            &STORAGE_MARKET_ACTOR_ADDR,
            actor(*MARKET_ACTOR_CODE_ID, *EMPTY_ARR_CID, 0, TokenAmount::zero()),
        );

        // cron and power, constructed through their own constructors
        v.set_actor(&CRON_ACTOR_ADDR, actor(*CRON_ACTOR_CODE_ID, *EMPTY_ARR_CID, 0, TokenAmount::zero()));
        v.set_actor(
            &STORAGE_POWER_ACTOR_ADDR,
            actor(*POWER_ACTOR_CODE_ID, *EMPTY_ARR_CID, 0, TokenAmount::zero()),
        );
        let cron_params = CronConstructorParams {
            entries: vec![CronEntry {
                receiver: STORAGE_POWER_ACTOR_ADDR,
                method_num: PowerMethod::OnEpochTickEnd as u64,
            }],
        };
        v.construct_singleton(&CRON_ACTOR_ADDR, IpldBlock::serialize_cbor(&cron_params).unwrap());
        v.construct_singleton(&STORAGE_POWER_ACTOR_ADDR, None);

        // burnt funds
        let burnt_head = v.put_state(&AccountState { address: BURNT_FUNDS_ACTOR_ADDR });
        v.set_actor(
            &BURNT_FUNDS_ACTOR_ADDR,
            actor(*ACCOUNT_ACTOR_CODE_ID, burnt_head, 0, TokenAmount::zero()),
        );

        // faucet
        let faucet_key = Address::new_bls(FAUCET_ROOT_KEY).unwrap();
        let faucet_id = v.map_address_to_new_id(&faucet_key);
        assert_eq!(TEST_FAUCET_ADDR, Address::new_id(faucet_id));
        let faucet_head = v.put_state(&AccountState { address: faucet_key });
        v.set_actor(
            &TEST_FAUCET_ADDR,
            actor(
                *ACCOUNT_ACTOR_CODE_ID,
                faucet_head,
                0,
                TokenAmount::from_whole(FAUCET_BALANCE_FIL),
            ),
        );

        v.set_circulating_supply(TokenAmount::from_whole(TEST_CIRCULATING_SUPPLY_FIL));
        v.checkpoint();

        // Power learns the reward estimate at its first tick.
        let res = v.execute_message(
            &SYSTEM_ACTOR_ADDR,
            &CRON_ACTOR_ADDR,
            &TokenAmount::zero(),
            CronMethod::EpochTick as u64,
            None,
        );
        assert_eq!(ExitCode::OK, res.code, "genesis cron tick failed: {}", res.message);
        v.take_invocations();
        v
    }

    fn construct_singleton(&self, addr: &Address, params: Option<IpldBlock>) {
        let res = self.execute_message(&SYSTEM_ACTOR_ADDR, addr, &TokenAmount::zero(), METHOD_CONSTRUCTOR, params);
        assert_eq!(ExitCode::OK, res.code, "failed to construct {}: {}", addr, res.message);
    }

    fn put_state<S: Serialize>(&self, state: &S) -> Cid {
        self.store.put_cbor(state, Code::Blake2b256).unwrap()
    }

    pub fn primitives(&self) -> &FakePrimitives {
        &self.primitives
    }

    pub fn epoch(&self) -> ChainEpoch {
        *self.epoch.borrow()
    }

    pub fn set_epoch(&self, epoch: ChainEpoch) {
        self.epoch.replace(epoch);
    }

    pub fn circulating_supply(&self) -> TokenAmount {
        self.circulating_supply.borrow().clone()
    }

    pub fn set_circulating_supply(&self, supply: TokenAmount) {
        self.circulating_supply.replace(supply);
    }

    pub fn actor(&self, addr: &Address) -> Option<ActorState> {
        // Actors are keyed by ID address only.
        let id_addr = self.resolve_id_address(addr)?;
        self.actors.borrow().get(&id_addr).unwrap().cloned()
    }

    /// Blindly overwrites the actor at this address whether it previously existed or not.
    pub fn set_actor(&self, key: &Address, a: ActorState) {
        self.actors.borrow_mut().set(key, a).unwrap();
    }

    pub fn delete_actor(&self, key: &Address) {
        self.actors.borrow_mut().delete(key).unwrap();
    }

    pub fn checkpoint(&self) -> Cid {
        self.actors.borrow_mut().flush().unwrap()
    }

    pub fn rollback(&self, root: Cid) {
        let actors =
            Map::load(self.store.clone(), &root, DEFAULT_HAMT_CONFIG, "actors").unwrap();
        self.actors.replace(actors);
    }

    /// Resolves an address to its ID form through the init actor's table.
    pub fn resolve_id_address(&self, address: &Address) -> Option<Address> {
        if address.protocol() == Protocol::ID {
            return Some(*address);
        }
        let st: InitState = self.get_state(&INIT_ACTOR_ADDR)?;
        st.resolve_address(&self.store, address).unwrap().map(Address::new_id)
    }

    /// Assigns a new ID to an address in the init actor's table.
    pub fn map_address_to_new_id(&self, address: &Address) -> ActorID {
        let mut init_actor = self.actor(&INIT_ACTOR_ADDR).unwrap();
        let mut st: InitState = self.store.get_cbor(&init_actor.state).unwrap().unwrap();
        let id = st.map_address_to_new_id(&self.store, address).unwrap();
        init_actor.state = self.put_state(&st);
        self.set_actor(&INIT_ACTOR_ADDR, init_actor);
        id
    }

    pub fn balance(&self, addr: &Address) -> TokenAmount {
        self.actor(addr).map_or_else(TokenAmount::zero, |a| a.balance)
    }

    pub fn get_state<T: DeserializeOwned>(&self, addr: &Address) -> Option<T> {
        let act = self.actor(addr)?;
        self.store.get_cbor(&act.state).unwrap()
    }

    /// Applies a top-level message from an account.
    /// Failure at any depth rolls back all state changes other than the sender's call sequence.
    pub fn execute_message(
        &self,
        from: &Address,
        to: &Address,
        value: &TokenAmount,
        method: MethodNum,
        params: Option<IpldBlock>,
    ) -> MessageResult {
        let from_id = match self.resolve_id_address(from) {
            Some(addr) => addr,
            None => return sender_invalid(from),
        };
        let mut a = match self.actor(&from_id) {
            Some(a) => a,
            None => return sender_invalid(from),
        };
        let call_seq = a.call_seq;
        a.call_seq = call_seq + 1;
        self.set_actor(&from_id, a);

        let prior_root = self.checkpoint();

        let top = TopCtx {
            originator_stable_addr: *from,
            originator_call_seq: call_seq,
            new_actor_addr_count: RefCell::new(0),
            circ_supply: self.circulating_supply(),
        };
        let msg = InternalMessage {
            from: from_id.id().unwrap(),
            to: *to,
            value: value.clone(),
            method,
            params,
        };
        let mut new_ctx = InvocationCtx::new(self, top, msg, &self.policy);
        let res = new_ctx.invoke();

        let invoc = new_ctx.gather_trace(res.clone());
        self.invocations.borrow_mut().push(invoc);
        match res {
            Err(ae) => {
                log::debug!("message {} -> {} method {} rolled back: {}", from, to, method, ae);
                self.rollback(prior_root);
                MessageResult { code: ae.exit_code(), message: ae.msg().to_string(), ret: None }
            }
            Ok(ret) => {
                self.checkpoint();
                MessageResult { code: ExitCode::OK, message: "OK".to_string(), ret }
            }
        }
    }

    /// Drains the traces of all messages applied since the last call.
    pub fn take_invocations(&self) -> Vec<InvocationTrace> {
        self.invocations.take()
    }

    pub fn check_state_invariants(&self) -> anyhow::Result<MessageAccumulator> {
        check_state_invariants(self)
    }

    pub fn assert_state_invariants(&self) {
        self.check_state_invariants().unwrap().assert_empty()
    }

    pub fn expect_state_invariants(&self, expected_patterns: &[regex::Regex]) {
        self.check_state_invariants().unwrap().assert_expected(expected_patterns)
    }

    /// IDs of all actors in the state tree.
    pub fn actor_ids(&self) -> Vec<ActorID> {
        let mut ids = vec![];
        self.actors
            .borrow()
            .for_each(|addr, _| {
                ids.push(addr.id().unwrap());
                Ok(())
            })
            .unwrap();
        ids.sort_unstable();
        ids
    }
}

fn sender_invalid(from: &Address) -> MessageResult {
    MessageResult {
        code: ExitCode::SYS_SENDER_INVALID,
        message: format!("sender {} does not exist", from),
        ret: None,
    }
}
