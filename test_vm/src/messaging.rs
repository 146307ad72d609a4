use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use cid::Cid;
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::CborStore;
use fvm_shared::address::{Address, Payload};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::consensus::ConsensusFault;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::randomness::RANDOMNESS_LENGTH;
use fvm_shared::sector::{SealVerifyInfo, WindowPoStVerifyInfo};
use fvm_shared::{ActorID, MethodNum, Response, METHOD_CONSTRUCTOR, METHOD_SEND};
use multihash::Code;
use num_traits::{Signed, Zero};
use serde::de::DeserializeOwned;
use serde::Serialize;

use fil_actor_cron::Actor as CronActor;
use fil_actor_miner::Actor as MinerActor;
use fil_actor_power::Actor as PowerActor;
use fil_actors_runtime::runtime::builtins::Type;
use fil_actors_runtime::runtime::{
    draw_randomness, ActorCode, DomainSeparationTag, MessageInfo, Policy, Primitives, Runtime,
    RuntimePolicy, Verifier, EMPTY_ARR_CID,
};
use fil_actors_runtime::test_utils::{
    blake2b_256, ACCOUNT_ACTOR_CODE_ID, ACTOR_CODES, ACTOR_TYPES,
};
use fil_actors_runtime::{actor_error, ActorError, SendError, SYSTEM_ACTOR_ID};

use crate::fakes::{invoke_account, invoke_init, invoke_market, invoke_reward};
use crate::trace::InvocationTrace;
use crate::{actor, ActorState, TestVM, TEST_VM_RAND_ARRAY};

/// Context shared by every invocation made on behalf of one top-level message.
#[derive(Clone)]
pub struct TopCtx {
    pub originator_stable_addr: Address,
    pub originator_call_seq: u64,
    pub new_actor_addr_count: RefCell<u64>,
    pub circ_supply: TokenAmount,
}

#[derive(Clone, Debug)]
pub struct InternalMessage {
    pub from: ActorID,
    pub to: Address,
    pub value: TokenAmount,
    pub method: MethodNum,
    pub params: Option<IpldBlock>,
}

pub struct InvocationCtx<'invocation> {
    pub v: &'invocation TestVM,
    pub top: TopCtx,
    pub msg: InternalMessage,
    pub allow_side_effects: RefCell<bool>,
    pub caller_validated: RefCell<bool>,
    pub policy: &'invocation Policy,
    pub subinvocations: RefCell<Vec<InvocationTrace>>,
}

impl<'invocation> InvocationCtx<'invocation> {
    pub fn new(
        v: &'invocation TestVM,
        top: TopCtx,
        msg: InternalMessage,
        policy: &'invocation Policy,
    ) -> Self {
        InvocationCtx {
            v,
            top,
            msg,
            allow_side_effects: RefCell::new(true),
            caller_validated: RefCell::new(false),
            policy,
            subinvocations: RefCell::new(vec![]),
        }
    }

    /// Finds the actor at a target address.
    /// A public key address with no actor behind it gets a fresh account actor.
    fn resolve_target(&self, target: &Address) -> Result<(ActorState, Address), ActorError> {
        if let Some(a) = self.v.resolve_id_address(target) {
            if let Some(act) = self.v.actor(&a) {
                return Ok((act, a));
            }
        }

        match target.payload() {
            Payload::Secp256k1(_) | Payload::BLS(_) => {}
            _ => {
                return Err(ActorError::unchecked(
                    ExitCode::SYS_INVALID_RECEIVER,
                    format!("cannot create account for address {} type {}", target, target.protocol()),
                ));
            }
        }

        let target_id = self.v.map_address_to_new_id(target);
        let target_id_addr = Address::new_id(target_id);
        self.v.set_actor(
            &target_id_addr,
            actor(*ACCOUNT_ACTOR_CODE_ID, *EMPTY_ARR_CID, 0, TokenAmount::zero()),
        );

        let new_actor_msg = InternalMessage {
            from: SYSTEM_ACTOR_ID,
            to: target_id_addr,
            value: TokenAmount::zero(),
            method: METHOD_CONSTRUCTOR,
            params: IpldBlock::serialize_cbor(target).unwrap(),
        };
        let mut new_ctx = InvocationCtx::new(self.v, self.top.clone(), new_actor_msg, self.policy);
        let res = new_ctx.invoke();
        let invoc = new_ctx.gather_trace(res);
        RefMut::map(self.subinvocations.borrow_mut(), |subinvocs| {
            subinvocs.push(invoc);
            subinvocs
        });

        Ok((self.v.actor(&target_id_addr).unwrap(), target_id_addr))
    }

    pub fn gather_trace(
        &mut self,
        invoke_result: Result<Option<IpldBlock>, ActorError>,
    ) -> InvocationTrace {
        let (ret, code) = match invoke_result {
            Ok(rb) => (rb, ExitCode::OK),
            Err(ae) => (None, ae.exit_code()),
        };
        let msg = self.msg.clone();
        InvocationTrace {
            from: msg.from,
            // use the normalized address when the target resolves
            to: self.v.resolve_id_address(&msg.to).unwrap_or(msg.to),
            value: msg.value,
            method: msg.method,
            params: msg.params,
            exit_code: code,
            return_value: ret,
            subinvocations: self.subinvocations.take(),
        }
    }

    fn to(&self) -> Address {
        self.msg.to
    }

    /// Address for an actor created by this message.
    /// Unique per originator, call sequence and creation count.
    pub fn new_actor_address(&self) -> Address {
        let mut b = self.top.originator_stable_addr.to_bytes();
        b.extend_from_slice(&self.top.originator_call_seq.to_be_bytes());
        b.extend_from_slice(&self.top.new_actor_addr_count.borrow().to_be_bytes());
        self.top.new_actor_addr_count.replace_with(|old| *old + 1);
        Address::new_actor(&b)
    }

    pub fn invoke(&mut self) -> Result<Option<IpldBlock>, ActorError> {
        let prior_root = self.v.checkpoint();
        let res = self.transfer_and_dispatch();
        if res.is_err() {
            self.v.rollback(prior_root)
        }
        res
    }

    fn transfer_and_dispatch(&mut self) -> Result<Option<IpldBlock>, ActorError> {
        let from_addr = Address::new_id(self.msg.from);
        let mut from_actor = self.v.actor(&from_addr).ok_or_else(|| {
            ActorError::unchecked(
                ExitCode::SYS_SENDER_INVALID,
                format!("sender {} does not exist", from_addr),
            )
        })?;
        if self.msg.value.is_negative() {
            return Err(ActorError::unchecked(
                ExitCode::SYS_ASSERTION_FAILED,
                "attempt to transfer negative value".to_string(),
            ));
        }
        if from_actor.balance < self.msg.value {
            return Err(ActorError::unchecked(
                ExitCode::SYS_INSUFFICIENT_FUNDS,
                "insufficient balance to transfer".to_string(),
            ));
        }

        // Deduct from the sender before loading the receiver to handle a self-send.
        from_actor.balance -= &self.msg.value;
        self.v.set_actor(&from_addr, from_actor);

        let (mut to_actor, to_addr) = self.resolve_target(&self.msg.to)?;
        to_actor.balance += &self.msg.value;
        self.v.set_actor(&to_addr, to_actor.clone());

        self.msg.to = to_addr;
        if self.msg.method == METHOD_SEND {
            return Ok(None);
        }

        let method = self.msg.method;
        let params = self.msg.params.clone();
        let res = match ACTOR_TYPES.get(&to_actor.code) {
            Some(Type::Cron) => CronActor::invoke_method(&*self, method, params),
            Some(Type::Power) => PowerActor::invoke_method(&*self, method, params),
            Some(Type::Miner) => MinerActor::invoke_method(&*self, method, params),
            Some(Type::Init) => invoke_init(self, method, params),
            Some(Type::Reward) => invoke_reward(&*self, method, params),
            Some(Type::Market) => invoke_market(&*self, method, params),
            Some(Type::Account) => invoke_account(&*self, method, params),
            _ => Err(actor_error!(unhandled_message;
                "actor {} with code {} handles no methods", to_addr, to_actor.code)),
        };
        if res.is_ok() && !*self.caller_validated.borrow() {
            return Err(actor_error!(assertion_failed; "failed to validate caller"));
        }
        res
    }

    fn validate_once(&self) -> Result<(), ActorError> {
        if self.caller_validated.replace(true) {
            return Err(ActorError::unchecked(
                ExitCode::SYS_ASSERTION_FAILED,
                "caller double validated".to_string(),
            ));
        }
        Ok(())
    }
}

impl MessageInfo for InvocationCtx<'_> {
    fn caller(&self) -> Address {
        Address::new_id(self.msg.from)
    }
    fn receiver(&self) -> Address {
        self.to()
    }
    fn value_received(&self) -> TokenAmount {
        self.msg.value.clone()
    }
}

impl<'invocation> Runtime for InvocationCtx<'invocation> {
    type Blockstore = Rc<MemoryBlockstore>;

    fn message(&self) -> &dyn MessageInfo {
        self
    }

    fn curr_epoch(&self) -> ChainEpoch {
        self.v.epoch()
    }

    fn validate_immediate_caller_accept_any(&self) -> Result<(), ActorError> {
        self.validate_once()
    }

    fn validate_immediate_caller_is<'a, I>(&self, addresses: I) -> Result<(), ActorError>
    where
        I: IntoIterator<Item = &'a Address>,
    {
        self.validate_once()?;
        let caller = Address::new_id(self.msg.from);
        if addresses.into_iter().any(|a| *a == caller) {
            return Ok(());
        }
        Err(ActorError::unchecked(
            ExitCode::USR_FORBIDDEN,
            format!("immediate caller {} address forbidden", caller),
        ))
    }

    fn validate_immediate_caller_type<'a, I>(&self, types: I) -> Result<(), ActorError>
    where
        I: IntoIterator<Item = &'a Type>,
    {
        self.validate_once()?;
        let caller_type = self
            .v
            .actor(&Address::new_id(self.msg.from))
            .and_then(|act| ACTOR_TYPES.get(&act.code).copied());
        if let Some(caller_type) = caller_type {
            if types.into_iter().any(|t| *t == caller_type) {
                return Ok(());
            }
        }
        Err(ActorError::unchecked(
            ExitCode::USR_FORBIDDEN,
            format!("immediate caller {} actor type forbidden", self.msg.from),
        ))
    }

    fn current_balance(&self) -> TokenAmount {
        self.v.actor(&self.to()).unwrap().balance
    }

    fn actor_balance(&self, id: ActorID) -> Option<TokenAmount> {
        self.v.actor(&Address::new_id(id)).map(|act| act.balance)
    }

    fn resolve_address(&self, addr: &Address) -> Option<ActorID> {
        self.v.resolve_id_address(addr).and_then(|a| a.id().ok())
    }

    fn get_actor_code_cid(&self, id: &ActorID) -> Option<Cid> {
        self.v.actor(&Address::new_id(*id)).map(|act| act.code)
    }

    fn get_randomness_from_tickets(
        &self,
        personalization: DomainSeparationTag,
        rand_epoch: ChainEpoch,
        entropy: &[u8],
    ) -> Result<[u8; RANDOMNESS_LENGTH], ActorError> {
        Ok(draw_randomness(blake2b_256, &TEST_VM_RAND_ARRAY, personalization, rand_epoch, entropy))
    }

    // The test chain has a single randomness source for tickets and beacon.
    fn get_randomness_from_beacon(
        &self,
        personalization: DomainSeparationTag,
        rand_epoch: ChainEpoch,
        entropy: &[u8],
    ) -> Result<[u8; RANDOMNESS_LENGTH], ActorError> {
        self.get_randomness_from_tickets(personalization, rand_epoch, entropy)
    }

    fn get_state_root(&self) -> Result<Cid, ActorError> {
        Ok(self.v.actor(&self.to()).unwrap().state)
    }

    fn set_state_root(&self, root: &Cid) -> Result<(), ActorError> {
        match self.v.actor(&self.to()) {
            None => Err(ActorError::unchecked(
                ExitCode::SYS_ASSERTION_FAILED,
                "actor does not exist".to_string(),
            )),
            Some(mut act) => {
                act.state = *root;
                self.v.set_actor(&self.to(), act);
                Ok(())
            }
        }
    }

    fn transaction<S, RT, F>(&self, f: F) -> Result<RT, ActorError>
    where
        S: Serialize + DeserializeOwned,
        F: FnOnce(&mut S, &Self) -> Result<RT, ActorError>,
    {
        let mut st = self.state::<S>()?;
        self.allow_side_effects.replace(false);
        let result = f(&mut st, self);
        self.allow_side_effects.replace(true);
        let ret = result?;
        let mut act = self.v.actor(&self.to()).unwrap();
        act.state = self.v.store.put_cbor(&st, Code::Blake2b256).unwrap();
        self.v.set_actor(&self.to(), act);
        Ok(ret)
    }

    fn store(&self) -> &Rc<MemoryBlockstore> {
        &self.v.store
    }

    fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: Option<IpldBlock>,
        value: TokenAmount,
    ) -> Result<Response, SendError> {
        if !*self.allow_side_effects.borrow() {
            return Ok(Response { exit_code: ExitCode::SYS_ASSERTION_FAILED, return_data: None });
        }

        let from_id = self.to().id().unwrap();
        let new_actor_msg = InternalMessage { from: from_id, to: *to, value, method, params };
        let mut new_ctx = InvocationCtx::new(self.v, self.top.clone(), new_actor_msg, self.policy);
        let res = new_ctx.invoke();
        let invoc = new_ctx.gather_trace(res.clone());
        RefMut::map(self.subinvocations.borrow_mut(), |subinvocs| {
            subinvocs.push(invoc);
            subinvocs
        });

        Ok(match res {
            Ok(return_data) => Response { exit_code: ExitCode::OK, return_data },
            Err(e) => Response { exit_code: e.exit_code(), return_data: None },
        })
    }

    fn delete_actor(&self, beneficiary: &Address) -> Result<(), ActorError> {
        if !*self.allow_side_effects.borrow() {
            return Err(actor_error!(assertion_failed; "cannot delete actor inside a transaction"));
        }
        let receiver = self.to();
        let beneficiary_id = self
            .v
            .resolve_id_address(beneficiary)
            .filter(|a| self.v.actor(a).is_some())
            .ok_or_else(|| actor_error!(not_found; "beneficiary {} not found", beneficiary))?;
        if beneficiary_id == receiver {
            return Err(actor_error!(forbidden; "actor {} cannot be its own beneficiary", receiver));
        }

        let balance = self.current_balance();
        if !balance.is_zero() {
            let mut to_actor = self.v.actor(&beneficiary_id).unwrap();
            to_actor.balance += balance;
            self.v.set_actor(&beneficiary_id, to_actor);
        }
        self.v.delete_actor(&receiver);
        Ok(())
    }

    fn resolve_builtin_actor_type(&self, code_id: &Cid) -> Option<Type> {
        ACTOR_TYPES.get(code_id).cloned()
    }

    fn get_code_cid_for_type(&self, typ: Type) -> Cid {
        ACTOR_CODES.get(&typ).cloned().unwrap()
    }

    fn total_fil_circ_supply(&self) -> TokenAmount {
        self.top.circ_supply.clone()
    }
}

impl Primitives for InvocationCtx<'_> {
    fn hash_blake2b(&self, data: &[u8]) -> [u8; 32] {
        self.v.primitives().hash_blake2b(data)
    }
}

impl Verifier for InvocationCtx<'_> {
    fn verify_seal(&self, vi: &SealVerifyInfo) -> Result<(), anyhow::Error> {
        self.v.primitives().verify_seal(vi)
    }

    fn verify_post(&self, verify_info: &WindowPoStVerifyInfo) -> Result<(), anyhow::Error> {
        self.v.primitives().verify_post(verify_info)
    }

    fn verify_consensus_fault(
        &self,
        h1: &[u8],
        h2: &[u8],
        extra: &[u8],
    ) -> Result<Option<ConsensusFault>, anyhow::Error> {
        self.v.primitives().verify_consensus_fault(h1, h2, extra)
    }
}

impl RuntimePolicy for InvocationCtx<'_> {
    fn policy(&self) -> &Policy {
        self.policy
    }
}
