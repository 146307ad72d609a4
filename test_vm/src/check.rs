use std::collections::HashMap;

use anyhow::anyhow;
use fvm_ipld_encoding::{from_slice, CborStore};
use fvm_shared::address::{Address, Protocol};
use fvm_shared::econ::TokenAmount;
use num_traits::Zero;

use fil_actor_cron::State as CronState;
use fil_actor_miner::testing as miner;
use fil_actor_miner::{CronEventPayload, State as MinerState, CRON_EVENT_PROVING_PERIOD};
use fil_actor_power::testing as power;
use fil_actor_power::testing::MinerCronEvent;
use fil_actor_power::State as PowerState;
use fil_actors_runtime::runtime::builtins::Type;
use fil_actors_runtime::test_utils::ACTOR_TYPES;
use fil_actors_runtime::{MessageAccumulator, STORAGE_POWER_ACTOR_ADDR};

use crate::TestVM;

macro_rules! get_state {
    ($store:expr, $actor:ident, $state:ty) => {
        $store
            .get_cbor::<$state>(&$actor.state)?
            .ok_or_else(|| anyhow!("{} is empty", stringify!($state)))?
    };
}

/// Checks the invariants of every power and miner actor in the VM,
/// then checks the miners against the power actor's view of them.
pub fn check_state_invariants(v: &TestVM) -> anyhow::Result<MessageAccumulator> {
    let acc = MessageAccumulator::default();
    let store = &v.store;

    let mut power_summary: Option<power::StateSummary> = None;
    let mut miner_summaries = HashMap::<Address, miner::StateSummary>::new();
    let mut miner_locked = TokenAmount::zero();
    let mut power_total_pledge: Option<TokenAmount> = None;

    for id in v.actor_ids() {
        let key = Address::new_id(id);
        let actor = v.actor(&key).ok_or_else(|| anyhow!("actor {} vanished", key))?;
        let acc = acc.with_prefix(format!("{key} "));
        if key.protocol() != Protocol::ID {
            acc.add(format!("unexpected address protocol in state tree root: {key}"));
        }

        match ACTOR_TYPES.get(&actor.code) {
            Some(Type::Cron) => {
                let state = get_state!(store, actor, CronState);
                acc.require(
                    state.entries.iter().any(|e| e.receiver == STORAGE_POWER_ACTOR_ADDR),
                    "cron: power actor is not registered for epoch ticks",
                );
            }
            Some(Type::Power) => {
                let state = get_state!(store, actor, PowerState);
                let (summary, msgs) = power::check_state_invariants(&state, store);
                acc.with_prefix("power: ").add_all(&msgs);
                power_total_pledge = Some(state.total_pledge_collateral);
                power_summary = Some(summary);
            }
            Some(Type::Miner) => {
                let state = get_state!(store, actor, MinerState);
                let (summary, msgs) =
                    miner::check_state_invariants(&v.policy, &state, store, &actor.balance);
                acc.with_prefix("miner: ").add_all(&msgs);
                miner_locked += &state.locked_funds;
                miner_summaries.insert(key, summary);
            }
            Some(_) => {}
            None => {
                return Err(anyhow!("unexpected actor code CID {} for address {}", actor.code, key));
            }
        }
    }

    if let Some(power_summary) = power_summary {
        check_miners_against_power(&acc, &miner_summaries, &power_summary);
    }
    if let Some(total_pledge) = power_total_pledge {
        acc.require(
            total_pledge >= miner_locked,
            format!(
                "total pledge {} is less than pledge locked by miners {}",
                total_pledge, miner_locked
            ),
        );
    }

    Ok(acc)
}

fn check_miners_against_power(
    acc: &MessageAccumulator,
    miner_summaries: &HashMap<Address, miner::StateSummary>,
    power_summary: &power::StateSummary,
) {
    for (address, miner_summary) in miner_summaries {
        if let Some(claim) = power_summary.claims.get(address) {
            let claim_power = claim.power();
            acc.require(
                miner_summary.active_power == claim_power,
                format!(
                    "miner {address} computed active power {:?} does not match claim {claim_power:?}",
                    miner_summary.active_power
                ),
            );
        } else {
            acc.add(format!("miner {address} has no power claim"));
        }

        let mut proving_period_cron: Option<&MinerCronEvent> = None;
        for event in power_summary.crons.get(address).into_iter().flatten() {
            match from_slice::<CronEventPayload>(event.payload.bytes()) {
                Ok(payload) => {
                    if payload.event_type == CRON_EVENT_PROVING_PERIOD {
                        if let Some(prior) = proving_period_cron {
                            acc.add(format!(
                                "miner {address} has duplicate proving period crons at epoch {} and {}",
                                prior.epoch, event.epoch
                            ));
                        }
                        proving_period_cron = Some(event);
                    }
                }
                Err(e) => acc.add(format!(
                    "miner {address} registered cron at epoch {} with wrong or corrupt payload: {e}",
                    event.epoch
                )),
            }
        }
        acc.require(
            proving_period_cron.is_some(),
            format!("miner {address} has no proving period cron"),
        );
    }

    for address in power_summary.claims.keys() {
        acc.require(
            miner_summaries.contains_key(address),
            format!("claim for {address} has no miner actor"),
        );
    }
}
