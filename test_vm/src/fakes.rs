use anyhow::{anyhow, Error};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{strict_bytes, RawBytes, DAG_CBOR};
use fvm_shared::address::{Address, Protocol};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::consensus::{ConsensusFault, ConsensusFaultType};
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{SealVerifyInfo, WindowPoStVerifyInfo};
use fvm_shared::{ActorID, MethodNum, METHOD_CONSTRUCTOR};
use num_traits::Zero;

use fil_actor_miner::ext::{account, market};
use fil_actor_power::ext::init::{ExecParams, ExecReturn, EXEC_METHOD};
use fil_actors_runtime::reward::{ThisEpochRewardReturn, THIS_EPOCH_REWARD_METHOD};
use fil_actors_runtime::runtime::builtins::Type;
use fil_actors_runtime::runtime::{Primitives, Runtime, Verifier, EMPTY_ARR_CID};
use fil_actors_runtime::test_utils::{make_piece_cid, ACTOR_TYPES};
use fil_actors_runtime::{
    actor_error, deserialize_block, extract_send_result, ActorError, Map, DEFAULT_HAMT_CONFIG,
    FIRST_NON_SINGLETON_ADDR, SYSTEM_ACTOR_ADDR,
};

use crate::messaging::InvocationCtx;
use crate::{actor, TEST_VM_INVALID_POST};

/// Fake implementation of runtime primitives.
/// Each primitive may be overridden, otherwise a permissive default applies.
#[derive(Default, Clone)]
#[allow(clippy::type_complexity)]
pub struct FakePrimitives {
    pub hash_blake2b: Option<fn(&[u8]) -> [u8; 32]>,
    pub verify_seal: Option<fn(&SealVerifyInfo) -> Result<(), Error>>,
    pub verify_post: Option<fn(&WindowPoStVerifyInfo) -> Result<(), Error>>,
    pub verify_consensus_fault:
        Option<fn(&[u8], &[u8], &[u8]) -> Result<Option<ConsensusFault>, Error>>,
}

impl Primitives for FakePrimitives {
    fn hash_blake2b(&self, data: &[u8]) -> [u8; 32] {
        if let Some(override_fn) = self.hash_blake2b {
            override_fn(data)
        } else {
            blake2b_simd::Params::new()
                .hash_length(32)
                .to_state()
                .update(data)
                .finalize()
                .as_bytes()
                .try_into()
                .unwrap()
        }
    }
}

impl Verifier for FakePrimitives {
    fn verify_seal(&self, vi: &SealVerifyInfo) -> Result<(), Error> {
        if let Some(override_fn) = self.verify_seal {
            override_fn(vi)
        } else {
            Ok(())
        }
    }

    fn verify_post(&self, verify_info: &WindowPoStVerifyInfo) -> Result<(), Error> {
        if let Some(override_fn) = self.verify_post {
            return override_fn(verify_info);
        }
        if verify_info.proofs.iter().any(|p| p.proof_bytes == TEST_VM_INVALID_POST.as_bytes()) {
            return Err(anyhow!("invalid proof"));
        }
        Ok(())
    }

    fn verify_consensus_fault(
        &self,
        h1: &[u8],
        h2: &[u8],
        extra: &[u8],
    ) -> Result<Option<ConsensusFault>, Error> {
        if let Some(override_fn) = self.verify_consensus_fault {
            override_fn(h1, h2, extra)
        } else {
            FakeBlockHeader::double_fork_mining(h1, h2)
        }
    }
}

/// Stand-in for a block header in consensus fault reports.
/// Two headers from the same miner at the same epoch with different tickets prove a fault.
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct FakeBlockHeader {
    pub miner: Address,
    pub epoch: ChainEpoch,
    #[serde(with = "strict_bytes")]
    pub ticket: Vec<u8>,
}

impl FakeBlockHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        fvm_ipld_encoding::to_vec(self).unwrap()
    }

    fn double_fork_mining(h1: &[u8], h2: &[u8]) -> Result<Option<ConsensusFault>, Error> {
        let b1: FakeBlockHeader = fvm_ipld_encoding::from_slice(h1)?;
        let b2: FakeBlockHeader = fvm_ipld_encoding::from_slice(h2)?;
        if b1.miner != b2.miner || b1.epoch != b2.epoch || b1.ticket == b2.ticket {
            return Ok(None);
        }
        Ok(Some(ConsensusFault {
            target: b1.miner,
            epoch: b1.epoch,
            fault_type: ConsensusFaultType::DoubleForkMining,
        }))
    }
}

/// State of the fake init actor: the table of non-ID addresses and the next ID to assign.
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct InitState {
    pub address_map: Cid,
    pub next_id: ActorID,
}

impl InitState {
    pub fn new<BS: Blockstore>(store: &BS) -> Result<Self, ActorError> {
        let address_map =
            Map::<_, Address, ActorID>::flush_empty(store, DEFAULT_HAMT_CONFIG)?;
        Ok(Self { address_map, next_id: FIRST_NON_SINGLETON_ADDR })
    }

    pub fn resolve_address<BS: Blockstore>(
        &self,
        store: &BS,
        addr: &Address,
    ) -> Result<Option<ActorID>, ActorError> {
        let map = Map::<_, Address, ActorID>::load(
            store,
            &self.address_map,
            DEFAULT_HAMT_CONFIG,
            "addresses",
        )?;
        Ok(map.get(addr)?.copied())
    }

    /// Assigns the next ID to an address.
    pub fn map_address_to_new_id<BS: Blockstore>(
        &mut self,
        store: &BS,
        addr: &Address,
    ) -> Result<ActorID, ActorError> {
        let id = self.next_id;
        self.next_id += 1;
        let mut map = Map::<_, Address, ActorID>::load(
            store,
            &self.address_map,
            DEFAULT_HAMT_CONFIG,
            "addresses",
        )?;
        map.set(addr, id)?;
        self.address_map = map.flush()?;
        Ok(id)
    }
}

/// State of a fake account actor.
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct AccountState {
    pub address: Address,
}

/// Init only supports `Exec`, which creates an actor and forwards the value to its constructor.
pub fn invoke_init(
    rt: &InvocationCtx,
    method: MethodNum,
    params: Option<IpldBlock>,
) -> Result<Option<IpldBlock>, ActorError> {
    if method != EXEC_METHOD {
        return Err(actor_error!(unhandled_message; "init: invalid method {}", method));
    }
    rt.validate_immediate_caller_accept_any()?;
    let params: ExecParams = deserialize_block(params)?;
    match ACTOR_TYPES.get(&params.code_cid) {
        Some(Type::Miner) => {}
        _ => {
            return Err(actor_error!(forbidden; "init: cannot exec actor with code {}", params.code_cid))
        }
    }

    let robust_address = rt.new_actor_address();
    let id = rt.transaction(|st: &mut InitState, rt| {
        st.map_address_to_new_id(rt.store(), &robust_address)
    })?;
    let id_address = Address::new_id(id);
    rt.v.set_actor(&id_address, actor(params.code_cid, *EMPTY_ARR_CID, 0, TokenAmount::zero()));

    let constructor_params =
        Some(IpldBlock { codec: DAG_CBOR, data: params.constructor_params.to_vec() });
    extract_send_result(rt.send(
        &id_address,
        METHOD_CONSTRUCTOR,
        constructor_params,
        rt.message().value_received(),
    ))?;

    Ok(IpldBlock::serialize_cbor(&ExecReturn { id_address, robust_address })?)
}

/// Reward reports a fixed estimate, held as its state.
pub fn invoke_reward(
    rt: &impl Runtime,
    method: MethodNum,
    _params: Option<IpldBlock>,
) -> Result<Option<IpldBlock>, ActorError> {
    if method != THIS_EPOCH_REWARD_METHOD {
        return Err(actor_error!(unhandled_message; "reward: invalid method {}", method));
    }
    rt.validate_immediate_caller_accept_any()?;
    let st: ThisEpochRewardReturn = rt.state()?;
    Ok(IpldBlock::serialize_cbor(&st)?)
}

/// Market answers the miner's deal queries as though every sector were committed capacity.
pub fn invoke_market(
    rt: &impl Runtime,
    method: MethodNum,
    params: Option<IpldBlock>,
) -> Result<Option<IpldBlock>, ActorError> {
    rt.validate_immediate_caller_type(std::iter::once(&Type::Miner))?;
    match method {
        market::VERIFY_DEALS_ON_SECTOR_PROVE_COMMIT_METHOD => {
            let _: market::VerifyDealsOnSectorProveCommitParams = deserialize_block(params)?;
            Ok(IpldBlock::serialize_cbor(&market::VerifyDealsOnSectorProveCommitReturn {
                deal_weight: Zero::zero(),
                verified_deal_weight: Zero::zero(),
            })?)
        }
        market::ON_MINER_SECTORS_TERMINATE_METHOD => {
            let _: market::OnMinerSectorsTerminateParams = deserialize_block(params)?;
            Ok(None)
        }
        market::COMPUTE_DATA_COMMITMENT_METHOD => {
            let params: market::ComputeDataCommitmentParams = deserialize_block(params)?;
            let seed = RawBytes::serialize(&params.deal_ids)?;
            Ok(IpldBlock::serialize_cbor(&market::ComputeDataCommitmentReturn {
                commd: make_piece_cid(seed.bytes()),
            })?)
        }
        _ => Err(actor_error!(unhandled_message; "market: invalid method {}", method)),
    }
}

/// Accounts record their public key address and report it on request.
pub fn invoke_account(
    rt: &impl Runtime,
    method: MethodNum,
    params: Option<IpldBlock>,
) -> Result<Option<IpldBlock>, ActorError> {
    match method {
        METHOD_CONSTRUCTOR => {
            rt.validate_immediate_caller_is(std::iter::once(&SYSTEM_ACTOR_ADDR))?;
            let address: Address = deserialize_block(params)?;
            match address.protocol() {
                Protocol::BLS | Protocol::Secp256k1 => {}
                protocol => {
                    return Err(actor_error!(illegal_argument;
                        "address must use BLS or SECP protocol, got {}", protocol))
                }
            }
            rt.create(&AccountState { address })?;
            Ok(None)
        }
        account::PUBKEY_ADDRESS_METHOD => {
            rt.validate_immediate_caller_accept_any()?;
            let st: AccountState = rt.state()?;
            Ok(IpldBlock::serialize_cbor(&st.address)?)
        }
        _ => Err(actor_error!(unhandled_message; "account: invalid method {}", method)),
    }
}
