use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::{ActorID, METHOD_CONSTRUCTOR, METHOD_SEND};
use num_traits::Zero;

use fil_actor_miner::ext::{account, market};
use fil_actor_miner::{Method as MinerMethod, OnDeleteMinerParams};
use fil_actor_power::ext::init::EXEC_METHOD;
use fil_actor_power::{Method as PowerMethod, UpdatePledgeTotalParams};
use fil_actors_runtime::reward::THIS_EPOCH_REWARD_METHOD;
use fil_actors_runtime::{
    BURNT_FUNDS_ACTOR_ADDR, INIT_ACTOR_ADDR, INIT_ACTOR_ID, REWARD_ACTOR_ADDR,
    STORAGE_MARKET_ACTOR_ADDR, STORAGE_POWER_ACTOR_ADDR, STORAGE_POWER_ACTOR_ID,
};

use crate::trace::ExpectInvocation;

/// Static helper functions for creating invocation expectations.
pub struct Expect {}

impl Expect {
    pub fn send(from: ActorID, to: Address, v: Option<TokenAmount>) -> ExpectInvocation {
        ExpectInvocation { from, to, method: METHOD_SEND, value: v, ..Default::default() }
    }
    pub fn burn(from: ActorID, v: Option<TokenAmount>) -> ExpectInvocation {
        Self::send(from, BURNT_FUNDS_ACTOR_ADDR, v)
    }
    pub fn init_exec(from: ActorID, subinvocs: Vec<ExpectInvocation>) -> ExpectInvocation {
        ExpectInvocation {
            from,
            to: INIT_ACTOR_ADDR,
            method: EXEC_METHOD,
            subinvocs: Some(subinvocs),
            ..Default::default()
        }
    }
    pub fn miner_constructor(
        miner: Address,
        value: TokenAmount,
        subinvocs: Vec<ExpectInvocation>,
    ) -> ExpectInvocation {
        ExpectInvocation {
            from: INIT_ACTOR_ID,
            to: miner,
            method: METHOD_CONSTRUCTOR,
            value: Some(value),
            subinvocs: Some(subinvocs),
            ..Default::default()
        }
    }
    pub fn account_pubkey(from: ActorID, account: Address) -> ExpectInvocation {
        ExpectInvocation {
            from,
            to: account,
            method: account::PUBKEY_ADDRESS_METHOD,
            subinvocs: Some(vec![]),
            ..Default::default()
        }
    }
    pub fn market_compute_commd(from: ActorID) -> ExpectInvocation {
        ExpectInvocation {
            from,
            to: STORAGE_MARKET_ACTOR_ADDR,
            method: market::COMPUTE_DATA_COMMITMENT_METHOD,
            subinvocs: Some(vec![]),
            ..Default::default()
        }
    }
    pub fn miner_cron(to: Address) -> ExpectInvocation {
        ExpectInvocation {
            from: STORAGE_POWER_ACTOR_ID,
            to,
            method: MinerMethod::OnDeferredCronEvent as u64,
            ..Default::default()
        }
    }
    pub fn miner_delete(to: Address, beneficiary: Address, reward: TokenAmount) -> ExpectInvocation {
        let params = IpldBlock::serialize_cbor(&OnDeleteMinerParams {
            beneficiary,
            beneficiary_reward: reward,
        })
        .unwrap();
        ExpectInvocation {
            from: STORAGE_POWER_ACTOR_ID,
            to,
            method: MinerMethod::OnDeleteMiner as u64,
            params: Some(params),
            value: Some(TokenAmount::zero()),
            ..Default::default()
        }
    }
    pub fn power_current_total(from: ActorID) -> ExpectInvocation {
        ExpectInvocation {
            from,
            to: STORAGE_POWER_ACTOR_ADDR,
            method: PowerMethod::CurrentTotalPower as u64,
            subinvocs: Some(vec![]),
            ..Default::default()
        }
    }
    pub fn power_enroll_cron(from: ActorID) -> ExpectInvocation {
        ExpectInvocation {
            from,
            to: STORAGE_POWER_ACTOR_ADDR,
            method: PowerMethod::EnrollCronEvent as u64,
            subinvocs: Some(vec![]),
            ..Default::default()
        }
    }
    pub fn power_prove_commit(from: ActorID) -> ExpectInvocation {
        ExpectInvocation {
            from,
            to: STORAGE_POWER_ACTOR_ADDR,
            method: PowerMethod::OnSectorProveCommit as u64,
            subinvocs: Some(vec![]),
            ..Default::default()
        }
    }
    pub fn power_update_pledge(from: ActorID, amount: Option<TokenAmount>) -> ExpectInvocation {
        let params = amount.map(|a| {
            IpldBlock::serialize_cbor(&UpdatePledgeTotalParams { pledge_delta: a }).unwrap()
        });
        ExpectInvocation {
            from,
            to: STORAGE_POWER_ACTOR_ADDR,
            method: PowerMethod::UpdatePledgeTotal as u64,
            params,
            subinvocs: Some(vec![]),
            ..Default::default()
        }
    }
    pub fn reward_this_epoch() -> ExpectInvocation {
        ExpectInvocation {
            from: STORAGE_POWER_ACTOR_ID,
            to: REWARD_ACTOR_ADDR,
            method: THIS_EPOCH_REWARD_METHOD,
            subinvocs: Some(vec![]),
            ..Default::default()
        }
    }
}
