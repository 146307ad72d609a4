// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp;

use cid::multihash::Code::Blake2b256;
use cid::Cid;
use fil_actors_runtime::runtime::Policy;
use fil_actors_runtime::{
    actor_error, ActorContext, ActorError, Array, AsActorError, Config, Map, DEFAULT_HAMT_CONFIG,
};
use fvm_ipld_bitfield::BitField;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{strict_bytes, CborStore};
use fvm_shared::address::Address;
use fvm_shared::clock::{ChainEpoch, QuantSpec, NO_QUANTIZATION};
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::sector::{RegisteredSealProof, SectorNumber, SectorSize};
use num_traits::Zero;

use super::{
    BitFieldQueue, DeadlineInfo, Deadlines, SectorOnChainInfo, SectorPreCommitOnChainInfo,
    VestSpec, VestingFunds, WorkerKeyChange, QUEUE_AMT_BIT_WIDTH,
};

pub const SECTORS_AMT_BITWIDTH: u32 = 5;

pub type PreCommitMap<BS> = Map<BS, SectorNumber, SectorPreCommitOnChainInfo>;
pub const PRECOMMIT_CONFIG: Config = DEFAULT_HAMT_CONFIG;

pub type Sectors<BS> = Array<BS, SectorOnChainInfo>;

/// Static information about a miner, stored in its own block.
#[derive(Debug, PartialEq, Eq, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct MinerInfo {
    /// Account that owns this miner.
    /// - Income and returned collateral are paid to this address.
    /// - This address is also allowed to change the worker address for the miner.
    pub owner: Address, // Must be an ID-address.

    /// Worker account for this miner.
    /// The associated pubkey-type address is used to sign blocks and messages on behalf of this miner.
    pub worker: Address, // Must be an ID-address.

    pub pending_worker_key: Option<WorkerKeyChange>,

    /// Libp2p identity that should be used when connecting to this miner.
    #[serde(with = "strict_bytes")]
    pub peer_id: Vec<u8>,

    /// The proof type used for Proof of Replication.
    pub seal_proof_type: RegisteredSealProof,

    /// Amount of space in each sector committed by this miner.
    pub sector_size: SectorSize,

    /// The number of sectors in each Window PoSt partition (proof).
    pub window_post_partition_sectors: u64,
}

impl MinerInfo {
    pub fn new(
        owner: Address,
        worker: Address,
        peer_id: Vec<u8>,
        seal_proof_type: RegisteredSealProof,
    ) -> Result<Self, ActorError> {
        let sector_size = seal_proof_type
            .sector_size()
            .map_err(|e| actor_error!(illegal_argument, "invalid sector size: {}", e))?;
        let window_post_partition_sectors = seal_proof_type
            .window_post_partitions_sector()
            .map_err(|e| actor_error!(illegal_argument, "invalid partition sectors: {}", e))?;

        Ok(Self {
            owner,
            worker,
            pending_worker_key: None,
            peer_id,
            seal_proof_type,
            sector_size,
            window_post_partition_sectors,
        })
    }
}

/// Window PoSt progress of a miner.
#[derive(Debug, Default, PartialEq, Eq, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct PoStState {
    /// Epoch at which the current proving period began.
    pub proving_period_start: ChainEpoch,
    /// Number of proving periods in a row which ended with a missed PoSt.
    pub num_consecutive_failures: i64,
    /// Whether a missed PoSt has already been detected during the current period.
    pub missed_post_in_period: bool,
}

/// Balance of Miner Actor should be greater than or equal to
/// the sum of PreCommitDeposits and LockedFunds.
/// It is possible for balance to fall below the sum of PCD, LF and
/// InitialPledgeRequirements, and this is a bad state (IP Debt)
/// that limits a miner actor's behavior (i.e. no balance withdrawals)
/// Excess balance as computed by st.GetAvailableBalance will be
/// withdrawable or usable for pre-commit deposit or pledge lock-up.
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq)]
pub struct State {
    /// Contains static info about this miner
    pub info: Cid,

    /// Total funds locked as pre_commit_deposit
    pub pre_commit_deposits: TokenAmount,

    /// Total rewards and added funds locked in vesting table
    pub locked_funds: TokenAmount,

    /// VestingFunds (Vesting Funds schedule for the miner).
    pub vesting_funds: Cid,

    /// Sectors that have been pre-committed but not yet proven.
    /// Map, HAMT<SectorNumber, SectorPreCommitOnChainInfo>
    pub pre_committed_sectors: Cid,

    /// Information for all proven and not-yet-expired sectors.
    /// Array, AMT<SectorNumber, SectorOnChainInfo>
    pub sectors: Cid,

    pub post_state: PoStState,

    /// Sectors proven since the last proving period began, not yet assigned to a deadline.
    pub new_sectors: BitField,

    /// Sector numbers due to expire at each epoch, quantized to the last epoch of a proving period.
    /// Array, AMT<ChainEpoch, BitField>
    pub sector_expirations: Cid,

    /// The sector numbers due for PoSt at each deadline in the current proving period, frozen at
    /// period start.
    pub deadlines: Cid,

    /// All currently known faulty sectors.
    pub faults: BitField,

    /// Faulty sector numbers indexed by the start epoch of the proving period in which the fault
    /// was detected or declared.
    /// Array, AMT<ChainEpoch, BitField>
    pub fault_epochs: Cid,

    /// Faulty sectors that will recover when next included in a valid PoSt.
    pub recoveries: BitField,

    /// Partitions for which a PoSt has been submitted in the current proving period.
    pub post_submissions: BitField,
}

impl State {
    pub fn new<BS: Blockstore>(
        policy: &Policy,
        store: &BS,
        info_cid: Cid,
        period_start: ChainEpoch,
    ) -> Result<Self, ActorError> {
        let empty_precommit_map =
            PreCommitMap::empty(store, PRECOMMIT_CONFIG, "precommits").flush()?;
        let empty_sectors_array =
            Sectors::empty(store, SECTORS_AMT_BITWIDTH, "sectors").flush()?;
        let empty_queue =
            Array::<_, BitField>::empty(store, QUEUE_AMT_BIT_WIDTH, "bitfield queue").flush()?;
        let empty_deadlines = store
            .put_cbor(&Deadlines::new(policy), Blake2b256)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to construct empty deadlines")?;
        let empty_vesting_funds = store
            .put_cbor(&VestingFunds::new(), Blake2b256)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to construct vesting funds")?;

        Ok(Self {
            info: info_cid,
            pre_commit_deposits: TokenAmount::zero(),
            locked_funds: TokenAmount::zero(),
            vesting_funds: empty_vesting_funds,
            pre_committed_sectors: empty_precommit_map,
            sectors: empty_sectors_array,
            post_state: PoStState {
                proving_period_start: period_start,
                num_consecutive_failures: 0,
                missed_post_in_period: false,
            },
            new_sectors: BitField::new(),
            sector_expirations: empty_queue,
            deadlines: empty_deadlines,
            faults: BitField::new(),
            fault_epochs: empty_queue,
            recoveries: BitField::new(),
            post_submissions: BitField::new(),
        })
    }

    pub fn get_info<BS: Blockstore>(&self, store: &BS) -> Result<MinerInfo, ActorError> {
        store
            .get_cbor(&self.info)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to load miner info")?
            .context_code(ExitCode::USR_ILLEGAL_STATE, "miner info not found")
    }

    pub fn save_info<BS: Blockstore>(
        &mut self,
        store: &BS,
        info: &MinerInfo,
    ) -> Result<(), ActorError> {
        self.info = store
            .put_cbor(info, Blake2b256)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to save miner info")?;
        Ok(())
    }

    /// Returns deadline calculations for the current proving period.
    pub fn deadline_info(&self, policy: &Policy, current_epoch: ChainEpoch) -> DeadlineInfo {
        DeadlineInfo::for_current_epoch(policy, self.post_state.proving_period_start, current_epoch)
    }

    /// The miner's proving-period boundary, in [0, wpost_proving_period).
    pub fn proving_period_boundary(&self, policy: &Policy) -> ChainEpoch {
        self.post_state.proving_period_start.rem_euclid(policy.wpost_proving_period)
    }

    /// Sector expirations are quantized to the last epoch of a proving period.
    pub fn expiration_quant(&self, policy: &Policy) -> QuantSpec {
        QuantSpec {
            unit: policy.wpost_proving_period,
            offset: self.post_state.proving_period_start - 1,
        }
    }

    //
    // Pre-committed sectors
    //

    pub fn put_precommitted_sector<BS: Blockstore>(
        &mut self,
        store: &BS,
        info: SectorPreCommitOnChainInfo,
    ) -> Result<(), ActorError> {
        let mut precommitted =
            PreCommitMap::load(store, &self.pre_committed_sectors, PRECOMMIT_CONFIG, "precommits")?;
        let sector_number = info.info.sector_number;
        if !precommitted.set_if_absent(&sector_number, info)? {
            return Err(actor_error!(illegal_argument, "sector {} already pre-committed", sector_number));
        }
        self.pre_committed_sectors = precommitted.flush()?;
        Ok(())
    }

    pub fn get_precommitted_sector<BS: Blockstore>(
        &self,
        store: &BS,
        sector_number: SectorNumber,
    ) -> Result<Option<SectorPreCommitOnChainInfo>, ActorError> {
        let precommitted =
            PreCommitMap::load(store, &self.pre_committed_sectors, PRECOMMIT_CONFIG, "precommits")?;
        Ok(precommitted.get(&sector_number)?.cloned())
    }

    pub fn delete_precommitted_sectors<BS: Blockstore>(
        &mut self,
        store: &BS,
        sector_numbers: &[SectorNumber],
    ) -> Result<(), ActorError> {
        let mut precommitted =
            PreCommitMap::load(store, &self.pre_committed_sectors, PRECOMMIT_CONFIG, "precommits")?;
        for &sector_number in sector_numbers {
            precommitted
                .delete(&sector_number)?
                .with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
                    format!("can't delete missing pre-commit {}", sector_number)
                })?;
        }
        self.pre_committed_sectors = precommitted.flush()?;
        Ok(())
    }

    /// Whether a sector number is in use, either pre-committed or proven.
    pub fn has_sector_number<BS: Blockstore>(
        &self,
        store: &BS,
        sector_number: SectorNumber,
    ) -> Result<bool, ActorError> {
        if self.get_precommitted_sector(store, sector_number)?.is_some() {
            return Ok(true);
        }
        Ok(self.get_sector(store, sector_number)?.is_some())
    }

    //
    // Proven sectors
    //

    pub fn put_sector<BS: Blockstore>(
        &mut self,
        store: &BS,
        sector: SectorOnChainInfo,
    ) -> Result<(), ActorError> {
        let mut sectors = Sectors::load(store, &self.sectors, "sectors")?;
        sectors.set(sector.info.sector_number, sector)?;
        self.sectors = sectors.flush()?;
        Ok(())
    }

    pub fn put_sectors<BS: Blockstore>(
        &mut self,
        store: &BS,
        new_sectors: Vec<SectorOnChainInfo>,
    ) -> Result<(), ActorError> {
        let mut sectors = Sectors::load(store, &self.sectors, "sectors")?;
        for sector in new_sectors {
            sectors.set(sector.info.sector_number, sector)?;
        }
        self.sectors = sectors.flush()?;
        Ok(())
    }

    pub fn get_sector<BS: Blockstore>(
        &self,
        store: &BS,
        sector_number: SectorNumber,
    ) -> Result<Option<SectorOnChainInfo>, ActorError> {
        let sectors = Sectors::load(store, &self.sectors, "sectors")?;
        Ok(sectors.get(sector_number)?.cloned())
    }

    pub fn delete_sectors<BS: Blockstore>(
        &mut self,
        store: &BS,
        sector_numbers: &BitField,
    ) -> Result<(), ActorError> {
        let mut sectors = Sectors::load(store, &self.sectors, "sectors")?;
        sectors.batch_delete(sector_numbers.iter(), true)?;
        self.sectors = sectors.flush()?;
        Ok(())
    }

    /// Loads the on-chain info for a set of sectors, failing with NotFound if any is missing.
    pub fn load_sector_infos<BS: Blockstore>(
        &self,
        store: &BS,
        sector_numbers: &BitField,
    ) -> Result<Vec<SectorOnChainInfo>, ActorError> {
        let sectors = Sectors::load(store, &self.sectors, "sectors")?;
        sector_numbers
            .iter()
            .map(|n| {
                sectors
                    .get(n)?
                    .cloned()
                    .ok_or_else(|| actor_error!(not_found, "sector {} not found", n))
            })
            .collect()
    }

    pub fn for_each_sector<BS: Blockstore, F>(&self, store: &BS, f: F) -> Result<(), ActorError>
    where
        F: FnMut(u64, &SectorOnChainInfo) -> Result<(), ActorError>,
    {
        Sectors::load(store, &self.sectors, "sectors")?.for_each(f)
    }

    //
    // Deadlines and queues
    //

    pub fn load_deadlines<BS: Blockstore>(&self, store: &BS) -> Result<Deadlines, ActorError> {
        store
            .get_cbor::<Deadlines>(&self.deadlines)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to load deadlines")?
            .context_code(ExitCode::USR_ILLEGAL_STATE, "deadlines not found")
    }

    pub fn save_deadlines<BS: Blockstore>(
        &mut self,
        store: &BS,
        deadlines: &Deadlines,
    ) -> Result<(), ActorError> {
        self.deadlines = store
            .put_cbor(deadlines, Blake2b256)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to save deadlines")?;
        Ok(())
    }

    pub fn add_sector_expirations<BS: Blockstore>(
        &mut self,
        policy: &Policy,
        store: &BS,
        expiration: ChainEpoch,
        sectors: &[SectorNumber],
    ) -> Result<(), ActorError> {
        let mut queue =
            BitFieldQueue::new(store, &self.sector_expirations, self.expiration_quant(policy))?;
        queue.add_to_queue_values(expiration, sectors.iter().copied())?;
        self.sector_expirations = queue.flush()?;
        Ok(())
    }

    pub fn remove_sector_expirations<BS: Blockstore>(
        &mut self,
        policy: &Policy,
        store: &BS,
        sectors: &BitField,
    ) -> Result<(), ActorError> {
        let mut queue =
            BitFieldQueue::new(store, &self.sector_expirations, self.expiration_quant(policy))?;
        queue.remove_values(sectors)?;
        self.sector_expirations = queue.flush()?;
        Ok(())
    }

    /// Removes and returns every sector due to expire at or before an epoch.
    pub fn pop_sector_expirations<BS: Blockstore>(
        &mut self,
        policy: &Policy,
        store: &BS,
        until: ChainEpoch,
    ) -> Result<BitField, ActorError> {
        let mut queue =
            BitFieldQueue::new(store, &self.sector_expirations, self.expiration_quant(policy))?;
        let (expired, modified) = queue.pop_until(until)?;
        if modified {
            self.sector_expirations = queue.flush()?;
        }
        Ok(expired)
    }

    /// Marks sectors faulty as of an epoch.
    pub fn add_faults<BS: Blockstore>(
        &mut self,
        store: &BS,
        sectors: &BitField,
        fault_epoch: ChainEpoch,
    ) -> Result<(), ActorError> {
        if sectors.is_empty() {
            return Ok(());
        }
        self.faults |= sectors;

        let mut queue = BitFieldQueue::new(store, &self.fault_epochs, NO_QUANTIZATION)?;
        queue.add_to_queue(fault_epoch, sectors).context("failed to add fault epochs")?;
        self.fault_epochs = queue.flush()?;
        Ok(())
    }

    /// Clears faults, and any pending recovery, for the given sectors.
    pub fn remove_faults<BS: Blockstore>(
        &mut self,
        store: &BS,
        sectors: &BitField,
    ) -> Result<(), ActorError> {
        if sectors.is_empty() {
            return Ok(());
        }
        self.faults -= sectors;
        self.recoveries -= sectors;

        let mut queue = BitFieldQueue::new(store, &self.fault_epochs, NO_QUANTIZATION)?;
        queue.remove_values(sectors).context("failed to remove fault epochs")?;
        self.fault_epochs = queue.flush()?;
        Ok(())
    }

    /// Returns faults that began at or before the given epoch.
    /// The expired faults are removed from the epoch queue but remain in the fault set.
    pub fn pop_expired_faults<BS: Blockstore>(
        &mut self,
        store: &BS,
        latest_termination: ChainEpoch,
    ) -> Result<BitField, ActorError> {
        let mut queue = BitFieldQueue::new(store, &self.fault_epochs, NO_QUANTIZATION)?;
        let (expired, modified) = queue.pop_until(latest_termination)?;
        if modified {
            self.fault_epochs = queue.flush()?;
        }
        Ok(expired)
    }

    /// Returns the faults that began strictly before an epoch.
    pub fn faults_started_before<BS: Blockstore>(
        &self,
        store: &BS,
        epoch: ChainEpoch,
    ) -> Result<BitField, ActorError> {
        let queue = BitFieldQueue::new(store, &self.fault_epochs, NO_QUANTIZATION)?;
        let mut faults = BitField::new();
        queue.amt.for_each_while(|fault_epoch, sectors| {
            if fault_epoch as ChainEpoch >= epoch {
                return Ok(false);
            }
            faults |= sectors;
            Ok(true)
        })?;
        Ok(faults)
    }

    /// Records PoSt submissions for partitions, rejecting any partition already proven this period.
    pub fn add_post_submissions(&mut self, partitions: &BitField) -> Result<(), ActorError> {
        if self.post_submissions.contains_any(partitions) {
            return Err(actor_error!(illegal_argument, "duplicate PoSt partition"));
        }
        self.post_submissions |= partitions;
        Ok(())
    }

    //
    // Funds and vesting
    //

    pub fn load_vesting_funds<BS: Blockstore>(
        &self,
        store: &BS,
    ) -> Result<VestingFunds, ActorError> {
        store
            .get_cbor(&self.vesting_funds)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to load vesting funds")?
            .context_code(ExitCode::USR_ILLEGAL_STATE, "vesting funds not found")
    }

    pub fn save_vesting_funds<BS: Blockstore>(
        &mut self,
        store: &BS,
        funds: &VestingFunds,
    ) -> Result<(), ActorError> {
        self.vesting_funds = store
            .put_cbor(funds, Blake2b256)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to save vesting funds")?;
        Ok(())
    }

    pub fn add_pre_commit_deposit(&mut self, amount: &TokenAmount) -> Result<(), ActorError> {
        let new_total = &self.pre_commit_deposits + amount;
        if new_total.is_negative() {
            return Err(actor_error!(
                illegal_state,
                "negative pre-commit deposit {} after adding {} to prior {}",
                new_total,
                amount,
                self.pre_commit_deposits
            ));
        }
        self.pre_commit_deposits = new_total;
        Ok(())
    }

    /// Locks funds under a vesting schedule, returning the amount of previously locked funds
    /// that vested in the process.
    pub fn add_locked_funds<BS: Blockstore>(
        &mut self,
        store: &BS,
        current_epoch: ChainEpoch,
        vesting_sum: &TokenAmount,
        spec: &VestSpec,
    ) -> Result<TokenAmount, ActorError> {
        if vesting_sum.is_negative() {
            return Err(actor_error!(illegal_state, "negative vesting sum {}", vesting_sum));
        }

        let mut vesting_funds = self.load_vesting_funds(store)?;
        let amount_unlocked = vesting_funds.add_locked_funds(
            current_epoch,
            vesting_sum,
            self.post_state.proving_period_start,
            spec,
        );
        self.locked_funds -= &amount_unlocked;
        self.locked_funds += vesting_sum;
        if self.locked_funds.is_negative() {
            return Err(actor_error!(illegal_state, "negative locked funds {}", self.locked_funds));
        }
        self.save_vesting_funds(store, &vesting_funds)?;
        Ok(amount_unlocked)
    }

    /// Unlocks every vested fund, returning the amount unlocked.
    pub fn unlock_vested_funds<BS: Blockstore>(
        &mut self,
        store: &BS,
        current_epoch: ChainEpoch,
    ) -> Result<TokenAmount, ActorError> {
        let mut vesting_funds = self.load_vesting_funds(store)?;
        let amount_unlocked = vesting_funds.unlock_vested_funds(current_epoch);
        if amount_unlocked.is_zero() {
            return Ok(amount_unlocked);
        }
        self.locked_funds -= &amount_unlocked;
        if self.locked_funds.is_negative() {
            return Err(actor_error!(illegal_state, "negative locked funds {}", self.locked_funds));
        }
        self.save_vesting_funds(store, &vesting_funds)?;
        Ok(amount_unlocked)
    }

    /// Unlocks up to a target amount of funds that have not yet vested, earliest first.
    pub fn unlock_unvested_funds<BS: Blockstore>(
        &mut self,
        store: &BS,
        current_epoch: ChainEpoch,
        target: &TokenAmount,
    ) -> Result<TokenAmount, ActorError> {
        if target.is_zero() || self.locked_funds.is_zero() {
            return Ok(TokenAmount::zero());
        }
        let mut vesting_funds = self.load_vesting_funds(store)?;
        let amount_unlocked = vesting_funds.unlock_unvested_funds(current_epoch, target);
        self.locked_funds -= &amount_unlocked;
        if self.locked_funds.is_negative() {
            return Err(actor_error!(illegal_state, "negative locked funds {}", self.locked_funds));
        }
        self.save_vesting_funds(store, &vesting_funds)?;
        Ok(amount_unlocked)
    }

    /// Draws a penalty first from unvested funds, then from the available balance.
    /// Returns the amounts taken from each. The sum may be less than the target if funds run out.
    pub fn penalize_funds_in_priority_order<BS: Blockstore>(
        &mut self,
        store: &BS,
        current_epoch: ChainEpoch,
        target: &TokenAmount,
        actor_balance: &TokenAmount,
    ) -> Result<(TokenAmount, TokenAmount), ActorError> {
        let from_vesting = self.unlock_unvested_funds(store, current_epoch, target)?;
        if &from_vesting == target {
            return Ok((from_vesting, TokenAmount::zero()));
        }

        // The unlocked funds are now part of the available balance.
        let remaining = target - &from_vesting;
        let available = self.get_available_balance(actor_balance)?;
        let from_balance = cmp::max(cmp::min(available, remaining), TokenAmount::zero());
        Ok((from_vesting, from_balance))
    }

    /// Balance that is neither locked nor held as pre-commit deposit.
    pub fn get_available_balance(
        &self,
        actor_balance: &TokenAmount,
    ) -> Result<TokenAmount, ActorError> {
        let available = actor_balance - &self.locked_funds - &self.pre_commit_deposits;
        if available.is_negative() {
            return Err(actor_error!(
                illegal_state,
                "negative available balance {} (balance {}, locked {}, deposits {})",
                available,
                actor_balance,
                self.locked_funds,
                self.pre_commit_deposits
            ));
        }
        Ok(available)
    }

    pub fn assert_balance_invariants(&self, balance: &TokenAmount) -> Result<(), ActorError> {
        if self.pre_commit_deposits.is_negative() {
            return Err(actor_error!(
                illegal_state,
                "pre-commit deposit is negative: {}",
                self.pre_commit_deposits
            ));
        }
        if self.locked_funds.is_negative() {
            return Err(actor_error!(illegal_state, "locked funds is negative: {}", self.locked_funds));
        }
        if balance < &(&self.pre_commit_deposits + &self.locked_funds) {
            return Err(actor_error!(
                illegal_state,
                "balance {} below required {}",
                balance,
                &self.pre_commit_deposits + &self.locked_funds
            ));
        }
        Ok(())
    }
}
