// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use cid::Cid;
use fil_actors_runtime::DealWeight;
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{strict_bytes, RawBytes};
use fvm_shared::address::Address;
use fvm_shared::bigint::bigint_ser;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{PoStProof, RegisteredSealProof, SectorNumber, SectorSize, StoragePower};
use num_traits::Zero;

pub type CronEvent = i64;

pub const CRON_EVENT_WORKER_KEY_CHANGE: CronEvent = 0;
pub const CRON_EVENT_PRE_COMMIT_EXPIRY: CronEvent = 1;
pub const CRON_EVENT_PROVING_PERIOD: CronEvent = 2;

/// Storage miner actor constructor params are defined here so the power actor can send them to the init actor
/// to instantiate miners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct MinerConstructorParams {
    pub owner: Address,
    pub worker: Address,
    pub seal_proof_type: RegisteredSealProof,
    #[serde(with = "strict_bytes")]
    pub peer_id: Vec<u8>,
}

/// Payload carried through the power actor's cron queue and handed back on `OnDeferredCronEvent`.
#[derive(Clone, Debug, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct CronEventPayload {
    pub event_type: CronEvent,
    pub sectors: Option<BitField>,
}

#[derive(Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct GetControlAddressesReturn {
    pub owner: Address,
    pub worker: Address,
}

#[derive(Serialize_tuple, Deserialize_tuple)]
pub struct ChangeWorkerAddressParams {
    pub new_worker: Address,
}

#[derive(Serialize_tuple, Deserialize_tuple)]
pub struct ChangePeerIDParams {
    #[serde(with = "strict_bytes")]
    pub new_id: Vec<u8>,
}

/// Information submitted by a miner to provide a Window PoSt.
#[derive(Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct SubmitWindowedPoStParams {
    /// The deadline index which the submission targets.
    pub deadline: u64,
    /// The partitions being proven, numbered across all deadlines.
    pub partitions: Vec<u64>,
    /// Array of proofs, one per partition.
    pub proofs: Vec<PoStProof>,
}

#[derive(Serialize_tuple, Deserialize_tuple)]
pub struct ProveCommitSectorParams {
    pub sector_number: SectorNumber,
    pub proof: RawBytes,
}

#[derive(Serialize_tuple, Deserialize_tuple)]
pub struct CheckSectorProvenParams {
    pub sector_number: SectorNumber,
}

#[derive(Serialize_tuple, Deserialize_tuple)]
pub struct ExtendSectorExpirationParams {
    pub sector_number: SectorNumber,
    pub new_expiration: ChainEpoch,
}

#[derive(Serialize_tuple, Deserialize_tuple)]
pub struct TerminateSectorsParams {
    pub sectors: BitField,
}

#[derive(Clone, Serialize_tuple, Deserialize_tuple)]
pub struct DeclareFaultsParams {
    pub faults: Vec<FaultDeclaration>,
}

#[derive(Clone, Serialize_tuple, Deserialize_tuple)]
pub struct FaultDeclaration {
    /// The deadline to which the faulty sectors are assigned, in range [0..WPoStPeriodDeadlines)
    pub deadline: u64,
    /// Sectors due at the deadline being declared faulty.
    pub sectors: BitField,
}

#[derive(Clone, Serialize_tuple, Deserialize_tuple)]
pub struct DeclareFaultsRecoveredParams {
    pub recoveries: Vec<RecoveryDeclaration>,
}

#[derive(Clone, Serialize_tuple, Deserialize_tuple)]
pub struct RecoveryDeclaration {
    /// The deadline to which the recovered sectors are assigned, in range [0..WPoStPeriodDeadlines)
    pub deadline: u64,
    /// Sectors due at the deadline being declared recovered.
    pub sectors: BitField,
}

#[derive(Clone, Serialize_tuple, Deserialize_tuple)]
pub struct WithdrawBalanceParams {
    pub amount_requested: TokenAmount,
}

#[derive(Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct WithdrawBalanceReturn {
    pub amount_withdrawn: TokenAmount,
}

/// Sent by the power actor when the miner is removed from the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct OnDeleteMinerParams {
    pub beneficiary: Address,
    pub beneficiary_reward: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct WorkerKeyChange {
    /// Must be an ID address
    pub new_worker: Address,
    pub effective_at: ChainEpoch,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct SectorPreCommitInfo {
    pub seal_proof: RegisteredSealProof,
    pub sector_number: SectorNumber,
    /// CommR
    pub sealed_cid: Cid,
    pub seal_rand_epoch: ChainEpoch,
    pub deal_ids: Vec<DealID>,
    pub expiration: ChainEpoch,
}

/// Information stored on-chain for a pre-committed sector.
#[derive(Debug, PartialEq, Eq, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct SectorPreCommitOnChainInfo {
    pub info: SectorPreCommitInfo,
    pub pre_commit_deposit: TokenAmount,
    pub pre_commit_epoch: ChainEpoch,
}

/// Information stored on-chain for a proven sector.
#[derive(Debug, PartialEq, Eq, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct SectorOnChainInfo {
    pub info: SectorPreCommitInfo,
    /// Epoch during which the sector proof was accepted
    pub activation_epoch: ChainEpoch,
    /// Integral of active deals over sector lifetime
    #[serde(with = "bigint_ser")]
    pub deal_weight: DealWeight,
    /// Integral of active verified deals over sector lifetime
    #[serde(with = "bigint_ser")]
    pub verified_deal_weight: DealWeight,
    /// Pledge collected to commit this sector
    pub initial_pledge: TokenAmount,
    /// Epoch at which the current fault began, if the sector is faulty.
    pub declared_fault_epoch: Option<ChainEpoch>,
    /// Number of epochs the current fault may last before the sector is terminated.
    pub declared_fault_duration: Option<ChainEpoch>,
}

impl SectorOnChainInfo {
    pub fn is_faulty(&self) -> bool {
        self.declared_fault_epoch.is_some()
    }
}

/// Describes the power-relevant attributes of a sector, from which the power actor
/// derives raw and quality-adjusted power.
#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct SectorStorageWeightDesc {
    pub sector_size: SectorSize,
    pub duration: ChainEpoch,
    #[serde(with = "bigint_ser")]
    pub deal_weight: DealWeight,
    #[serde(with = "bigint_ser")]
    pub verified_deal_weight: DealWeight,
}

/// A pair of raw and quality-adjusted power.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PowerPair {
    #[serde(with = "bigint_ser")]
    pub raw: StoragePower,
    #[serde(with = "bigint_ser")]
    pub qa: StoragePower,
}

impl PowerPair {
    pub fn new(raw: StoragePower, qa: StoragePower) -> Self {
        Self { raw, qa }
    }

    pub fn zero() -> Self {
        Default::default()
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero() && self.qa.is_zero()
    }
}

impl<'a, 'b> Add<&'b PowerPair> for &'a PowerPair {
    type Output = PowerPair;

    fn add(self, other: &'b PowerPair) -> PowerPair {
        PowerPair { raw: &self.raw + &other.raw, qa: &self.qa + &other.qa }
    }
}

impl Add for PowerPair {
    type Output = PowerPair;

    fn add(self, other: PowerPair) -> PowerPair {
        &self + &other
    }
}

impl<'a> AddAssign<&'a PowerPair> for PowerPair {
    fn add_assign(&mut self, other: &'a PowerPair) {
        self.raw += &other.raw;
        self.qa += &other.qa;
    }
}

impl<'a, 'b> Sub<&'b PowerPair> for &'a PowerPair {
    type Output = PowerPair;

    fn sub(self, other: &'b PowerPair) -> PowerPair {
        PowerPair { raw: &self.raw - &other.raw, qa: &self.qa - &other.qa }
    }
}

impl Sub for PowerPair {
    type Output = PowerPair;

    fn sub(self, other: PowerPair) -> PowerPair {
        &self - &other
    }
}

impl<'a> SubAssign<&'a PowerPair> for PowerPair {
    fn sub_assign(&mut self, other: &'a PowerPair) {
        self.raw -= &other.raw;
        self.qa -= &other.qa;
    }
}

impl Neg for PowerPair {
    type Output = PowerPair;

    fn neg(self) -> PowerPair {
        PowerPair { raw: -self.raw, qa: -self.qa }
    }
}

impl<'a> Neg for &'a PowerPair {
    type Output = PowerPair;

    fn neg(self) -> PowerPair {
        PowerPair { raw: -&self.raw, qa: -&self.qa }
    }
}
