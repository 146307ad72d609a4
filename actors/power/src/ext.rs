use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;

pub mod init {
    use super::*;
    use fvm_ipld_encoding::RawBytes;

    pub const EXEC_METHOD: u64 = 2;

    /// Init actor Exec Params
    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct ExecParams {
        pub code_cid: Cid,
        pub constructor_params: RawBytes,
    }

    /// Init actor Exec Return value
    #[derive(Serialize_tuple, Deserialize_tuple)]
    pub struct ExecReturn {
        /// ID based address for created actor
        pub id_address: Address,
        /// Reorg safe address for actor
        pub robust_address: Address,
    }
}

pub mod miner {
    pub const CONTROL_ADDRESSES_METHOD: u64 = 2;
    pub const ON_DEFERRED_CRON_EVENT_METHOD: u64 = 12;
    pub const ON_DELETE_MINER_METHOD: u64 = 17;
    pub const ON_SURPRISE_POST_CHALLENGE_METHOD: u64 = 18;

    pub use fil_actor_miner::{
        GetControlAddressesReturn, MinerConstructorParams, OnDeleteMinerParams,
    };
}
