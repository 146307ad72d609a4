// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::marker::PhantomData;

use castaway::cast;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use serde::{Deserialize, Serialize};

use crate::ActorError;

/// Generates `invoke_method` for an [`ActorCode`](crate::runtime::ActorCode) implementation,
/// routing each method number to an associated function of the actor.
///
/// ```ignore
/// impl ActorCode for Actor {
///     type Methods = Method;
///     actor_dispatch! {
///         Constructor => constructor,
///         EpochTick => epoch_tick,
///     }
/// }
/// ```
///
/// Numbers with no matching variant are rejected as unhandled messages.
#[macro_export]
macro_rules! actor_dispatch {
    ($($method:ident => $func:ident,)*) => {
        fn invoke_method<RT>(
            rt: &RT,
            method: fvm_shared::MethodNum,
            args: Option<fvm_ipld_encoding::ipld_block::IpldBlock>,
        ) -> Result<Option<fvm_ipld_encoding::ipld_block::IpldBlock>, $crate::ActorError>
        where
            RT: $crate::runtime::Runtime,
            RT::Blockstore: Clone,
        {
            match <Self::Methods as num_traits::FromPrimitive>::from_u64(method) {
                $(Some(Self::Methods::$method) => $crate::dispatch(rt, Self::$func, &args),)*
                None => Err($crate::actor_error!(unhandled_message; "invalid method: {}", method)),
            }
        }
    };
}

/// An actor method taking either no parameters or a single deserializable parameter.
pub trait MethodHandler<'de, RT> {
    fn handle(self, rt: &RT, args: &'de Option<IpldBlock>)
        -> Result<Option<IpldBlock>, ActorError>;
}

/// Wraps a method so its arity can be selected by the `A` marker.
pub struct Handler<F, A> {
    func: F,
    _arity: PhantomData<fn(A)>,
}

/// Decodes `args` for `func`, invokes it and encodes its return.
/// A unit return is sent back as no data.
#[doc(hidden)]
pub fn dispatch<'de, F, A, RT>(
    rt: &RT,
    func: F,
    args: &'de Option<IpldBlock>,
) -> Result<Option<IpldBlock>, ActorError>
where
    Handler<F, A>: MethodHandler<'de, RT>,
{
    Handler { func, _arity: PhantomData }.handle(rt, args)
}

fn encode_return<T: Serialize>(ret: T) -> Result<Option<IpldBlock>, ActorError> {
    if cast!(&ret, &()).is_ok() {
        return Ok(None);
    }
    Ok(IpldBlock::serialize_cbor(&ret)?)
}

impl<'de, F, R, RT> MethodHandler<'de, RT> for Handler<F, ()>
where
    F: FnOnce(&RT) -> Result<R, ActorError>,
    R: Serialize,
{
    fn handle(
        self,
        rt: &RT,
        args: &'de Option<IpldBlock>,
    ) -> Result<Option<IpldBlock>, ActorError> {
        if args.is_some() {
            return Err(ActorError::illegal_argument("method expects no arguments".into()));
        }
        encode_return((self.func)(rt)?)
    }
}

impl<'de, F, A, R, RT> MethodHandler<'de, RT> for Handler<F, (A,)>
where
    F: FnOnce(&RT, A) -> Result<R, ActorError>,
    A: Deserialize<'de>,
    R: Serialize,
{
    fn handle(
        self,
        rt: &RT,
        args: &'de Option<IpldBlock>,
    ) -> Result<Option<IpldBlock>, ActorError> {
        let block = args
            .as_ref()
            .ok_or_else(|| ActorError::illegal_argument("method expects arguments".into()))?;
        encode_return((self.func)(rt, block.deserialize()?)?)
    }
}
