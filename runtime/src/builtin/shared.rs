// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::address::Address;
use fvm_shared::error::{ErrorNumber, ExitCode};
use fvm_shared::METHOD_SEND;
use fvm_shared::{ActorID, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::runtime::Runtime;
use crate::{actor_error, ActorContext, ActorError, AsActorError};

pub const HAMT_BIT_WIDTH: u32 = 5;

/// A send failed at the system level, before the callee ran or produced an exit code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("send failed with error number {0}")]
pub struct SendError(pub ErrorNumber);

impl From<SendError> for ActorError {
    fn from(s: SendError) -> Self {
        match s.0 {
            ErrorNumber::InsufficientFunds => {
                actor_error!(insufficient_funds; "not enough funds to send: {}", s)
            }
            ErrorNumber::NotFound => actor_error!(not_found; "send target not found: {}", s),
            _ => actor_error!(illegal_state; "{}", s),
        }
    }
}

/// Converts the outcome of a send into the callee's return block,
/// turning a non-zero exit code into an error carrying that code.
pub fn extract_send_result(
    res: Result<Response, SendError>,
) -> Result<Option<IpldBlock>, ActorError> {
    let ret = res?;
    if ret.exit_code.is_success() {
        Ok(ret.return_data)
    } else {
        Err(ActorError::unchecked(
            ret.exit_code,
            format!("send aborted with code {}", ret.exit_code),
        ))
    }
}

/// Decodes a method return that must be present.
pub fn deserialize_block<T>(ret: Option<IpldBlock>) -> Result<T, ActorError>
where
    T: DeserializeOwned,
{
    ret.context_code(ExitCode::USR_ASSERTION_FAILED, "return expected".to_string())?
        .deserialize()
        .exit_code(ExitCode::USR_SERIALIZATION)
}

/// ResolveToActorID resolves the given address to its actor ID.
/// If an actor ID for the given address doesn't exist yet, it tries to create one by sending
/// a zero balance to the given address.
pub fn resolve_to_actor_id(rt: &impl Runtime, address: &Address) -> Result<ActorID, ActorError> {
    // if we are able to resolve it to an ID address, return the resolved address
    if let Some(id) = rt.resolve_address(address) {
        return Ok(id);
    }

    // send 0 balance to the account so an ID address for it is created and then try to resolve
    extract_send_result(rt.send(address, METHOD_SEND, None, Default::default()))
        .with_context(|| format!("failed to send zero balance to address {}", address))?;

    if let Some(id) = rt.resolve_address(address) {
        return Ok(id);
    }

    Err(actor_error!(illegal_argument, "failed to resolve or initialize address {}", address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fvm_shared::error::ExitCode;

    #[test]
    fn non_zero_exit_codes_become_errors() {
        let ok = Response { exit_code: ExitCode::OK, return_data: None };
        assert_eq!(None, extract_send_result(Ok(ok)).unwrap());

        let aborted = Response { exit_code: ExitCode::USR_FORBIDDEN, return_data: None };
        let err = extract_send_result(Ok(aborted)).unwrap_err();
        assert_eq!(ExitCode::USR_FORBIDDEN, err.exit_code());

        let err = extract_send_result(Err(SendError(ErrorNumber::InsufficientFunds))).unwrap_err();
        assert_eq!(ExitCode::USR_INSUFFICIENT_FUNDS, err.exit_code());
    }

    #[test]
    fn missing_return_is_an_assertion_failure() {
        let err = deserialize_block::<u64>(None).unwrap_err();
        assert_eq!(ExitCode::USR_ASSERTION_FAILED, err.exit_code());

        let block = IpldBlock::serialize_cbor(&7u64).unwrap();
        assert_eq!(7, deserialize_block::<u64>(block).unwrap());
    }
}
