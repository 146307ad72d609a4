use cid::Cid;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;

/// An entry in the VM's actor tree.
#[derive(Serialize_tuple, Deserialize_tuple, Clone, PartialEq, Eq, Debug)]
pub struct ActorState {
    pub code: Cid,
    /// Root of the actor's state.
    pub state: Cid,
    pub call_seq: u64,
    pub balance: TokenAmount,
}

pub fn actor(code: Cid, state: Cid, call_seq: u64, balance: TokenAmount) -> ActorState {
    ActorState { code, state, call_seq, balance }
}

/// The outcome of a top-level message.
#[derive(Clone, Debug)]
pub struct MessageResult {
    pub code: ExitCode,
    pub message: String,
    pub ret: Option<IpldBlock>,
}
