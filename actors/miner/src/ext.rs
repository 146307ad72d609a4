use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::bigint::bigint_ser;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{RegisteredSealProof, StoragePower};

use fil_actors_runtime::reward::FilterEstimate;
use fil_actors_runtime::DealWeight;

pub mod account {
    pub const PUBKEY_ADDRESS_METHOD: u64 = 2;
}

pub mod market {
    use super::*;

    pub const VERIFY_DEALS_ON_SECTOR_PROVE_COMMIT_METHOD: u64 = 6;
    pub const ON_MINER_SECTORS_TERMINATE_METHOD: u64 = 7;
    pub const COMPUTE_DATA_COMMITMENT_METHOD: u64 = 8;

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct ComputeDataCommitmentParams {
        pub deal_ids: Vec<DealID>,
        pub sector_type: RegisteredSealProof,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct ComputeDataCommitmentReturn {
        pub commd: Cid,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct VerifyDealsOnSectorProveCommitParams {
        pub deal_ids: Vec<DealID>,
        pub sector_expiry: ChainEpoch,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct VerifyDealsOnSectorProveCommitReturn {
        #[serde(with = "bigint_ser")]
        pub deal_weight: DealWeight,
        #[serde(with = "bigint_ser")]
        pub verified_deal_weight: DealWeight,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnMinerSectorsTerminateParams {
        pub deal_ids: Vec<DealID>,
    }
}

pub mod power {
    use super::*;
    use crate::SectorStorageWeightDesc;
    use fvm_ipld_encoding::RawBytes;

    pub const ON_SECTOR_PROVE_COMMIT_METHOD: u64 = 6;
    pub const ON_SECTOR_TERMINATE_METHOD: u64 = 7;
    pub const ON_FAULT_BEGIN_METHOD: u64 = 8;
    pub const ON_FAULT_END_METHOD: u64 = 9;
    pub const ON_SECTOR_MODIFY_WEIGHT_DESC_METHOD: u64 = 10;
    pub const ON_MINER_WINDOWED_POST_SUCCESS_METHOD: u64 = 11;
    pub const ON_MINER_WINDOWED_POST_FAILURE_METHOD: u64 = 12;
    pub const ENROLL_CRON_EVENT_METHOD: u64 = 13;
    pub const UPDATE_PLEDGE_TOTAL_METHOD: u64 = 16;
    pub const CURRENT_TOTAL_POWER_METHOD: u64 = 17;

    pub const SECTOR_TERMINATION_EXPIRED: i64 = 0;
    pub const SECTOR_TERMINATION_MANUAL: i64 = 1;
    pub const SECTOR_TERMINATION_FAULTY: i64 = 3;

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct EnrollCronEventParams {
        pub event_epoch: ChainEpoch,
        pub payload: RawBytes,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnSectorProveCommitParams {
        pub weight: SectorStorageWeightDesc,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnSectorProveCommitReturn {
        pub pledge: TokenAmount,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnSectorTerminateParams {
        pub termination_type: i64,
        pub weights: Vec<SectorStorageWeightDesc>,
        pub sector_ages: Vec<ChainEpoch>,
        pub pledge: TokenAmount,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnSectorTerminateReturn {
        pub penalty: TokenAmount,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnFaultBeginParams {
        pub weights: Vec<SectorStorageWeightDesc>,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnFaultEndParams {
        pub weights: Vec<SectorStorageWeightDesc>,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnSectorModifyWeightDescParams {
        pub prev_weight: SectorStorageWeightDesc,
        pub prev_pledge: TokenAmount,
        pub new_weight: SectorStorageWeightDesc,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnSectorModifyWeightDescReturn {
        pub new_pledge: TokenAmount,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnMinerWindowedPoStFailureParams {
        pub num_consecutive_failures: i64,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct OnMinerWindowedPoStFailureReturn {
        pub deregistered: bool,
    }

    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct CurrentTotalPowerReturn {
        #[serde(with = "bigint_ser")]
        pub raw_byte_power: StoragePower,
        #[serde(with = "bigint_ser")]
        pub quality_adj_power: StoragePower,
        pub pledge_collateral: TokenAmount,
        pub quality_adj_power_smoothed: FilterEstimate,
        pub this_epoch_reward_smoothed: FilterEstimate,
        #[serde(with = "bigint_ser")]
        pub this_epoch_baseline_power: StoragePower,
    }
}
