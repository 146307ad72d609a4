// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::builtin::HAMT_BIT_WIDTH;
use crate::{ActorError, AsActorError, Hasher};
use anyhow::anyhow;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_hamt as hamt;
use fvm_shared::address::Address;
use fvm_shared::error::ExitCode;
use integer_encoding::VarInt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;

/// A HAMT keyed by a typed [`MapKey`].
/// Store failures surface as illegal state, and undecodable keys as failed assertions.
/// `name` only labels error messages.
pub struct Map<BS, K, V>
where
    BS: Blockstore,
    K: MapKey,
    V: DeserializeOwned + Serialize,
{
    hamt: hamt::Hamt<BS, V, hamt::BytesKey, Hasher>,
    name: &'static str,
    key_type: PhantomData<K>,
}

/// A key with a canonical byte encoding in the HAMT.
pub trait MapKey: Sized + Debug {
    fn from_bytes(b: &[u8]) -> Result<Self, String>;
    fn to_bytes(&self) -> Result<Vec<u8>, String>;
}

pub type Config = hamt::Config;

pub const DEFAULT_HAMT_CONFIG: Config =
    Config { bit_width: HAMT_BIT_WIDTH, min_data_depth: 0, max_array_width: 3 };

impl<BS, K, V> Map<BS, K, V>
where
    BS: Blockstore,
    K: MapKey,
    V: DeserializeOwned + Serialize,
{
    /// Creates a new, empty map.
    pub fn empty(store: BS, config: Config, name: &'static str) -> Self {
        Self {
            hamt: hamt::Hamt::new_with_config(store, config),
            name,
            key_type: Default::default(),
        }
    }

    /// Writes an empty map and returns its root.
    pub fn flush_empty(store: BS, config: Config) -> Result<Cid, ActorError> {
        Self::empty(store, config, "empty").flush()
    }

    /// Loads a map written with the same `config`.
    pub fn load(
        store: BS,
        root: &Cid,
        config: Config,
        name: &'static str,
    ) -> Result<Self, ActorError> {
        Ok(Self {
            hamt: hamt::Hamt::load_with_config(root, store, config)
                .with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
                    format!("failed to load HAMT '{}'", name)
                })?,
            name,
            key_type: Default::default(),
        })
    }

    /// Writes pending changes and returns the new root.
    pub fn flush(&mut self) -> Result<Cid, ActorError> {
        self.hamt.flush().with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("failed to flush HAMT '{}'", self.name)
        })
    }

    fn key_bytes(key: &K) -> Result<Vec<u8>, ActorError> {
        key.to_bytes()
            .with_context_code(ExitCode::USR_ASSERTION_FAILED, || format!("invalid key {key:?}"))
    }

    fn state_error(&self, op: &str, key: &K) -> String {
        format!("failed to {op} key {key:?} in HAMT '{}'", self.name)
    }

    pub(crate) fn store(&self) -> &BS {
        self.hamt.store()
    }

    /// Returns whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.hamt.is_empty()
    }

    /// Returns a reference to the value associated with a key, if present.
    pub fn get(&self, key: &K) -> Result<Option<&V>, ActorError> {
        let k = Self::key_bytes(key)?;
        self.hamt
            .get(&k)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || self.state_error("get", key))
    }

    pub fn contains_key(&self, key: &K) -> Result<bool, ActorError> {
        let k = Self::key_bytes(key)?;
        self.hamt
            .contains_key(&k)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || self.state_error("check", key))
    }

    /// Inserts a key-value pair into the map.
    /// Returns any value previously associated with the key.
    pub fn set(&mut self, key: &K, value: V) -> Result<Option<V>, ActorError>
    where
        V: PartialEq,
    {
        let k = Self::key_bytes(key)?;
        self.hamt
            .set(k.into(), value)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || self.state_error("set", key))
    }

    /// Inserts a value only for an absent key, returning whether it was inserted.
    pub fn set_if_absent(&mut self, key: &K, value: V) -> Result<bool, ActorError>
    where
        V: PartialEq,
    {
        let k = Self::key_bytes(key)?;
        self.hamt
            .set_if_absent(k.into(), value)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || self.state_error("set", key))
    }

    pub fn delete(&mut self, key: &K) -> Result<Option<V>, ActorError> {
        let k = Self::key_bytes(key)?;
        self.hamt
            .delete(&k)
            .map(|deleted| deleted.map(|(_, v)| v))
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || self.state_error("delete", key))
    }

    /// Visits every entry. An error from `f` aborts the traversal and is returned as is.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), ActorError>
    where
        F: FnMut(K, &V) -> Result<(), ActorError>,
    {
        self.hamt
            .for_each(|k, v| {
                let key =
                    K::from_bytes(k).context_code(ExitCode::USR_ILLEGAL_STATE, "invalid key")?;
                f(key, v).map_err(|e| anyhow!(e))
            })
            .map_err(|hamt_err| match hamt_err {
                hamt::Error::Dynamic(e) => match e.downcast::<ActorError>() {
                    Ok(ae) => ae,
                    Err(e) => ActorError::illegal_state(format!(
                        "error in callback traversing HAMT {}: {}",
                        self.name, e
                    )),
                },
                e => {
                    ActorError::illegal_state(format!("error traversing HAMT {}: {}", self.name, e))
                }
            })
    }

    /// Collects every key in the map, in traversal order.
    pub fn keys(&self) -> Result<Vec<K>, ActorError> {
        let mut keys = Vec::new();
        self.for_each(|k, _| {
            keys.push(k);
            Ok(())
        })?;
        Ok(keys)
    }
}

macro_rules! varint_map_key {
    ($($t:ty),*) => {$(
        impl MapKey for $t {
            fn from_bytes(b: &[u8]) -> Result<Self, String> {
                match VarInt::decode_var(b) {
                    Some((n, size)) if size == b.len() => Ok(n),
                    Some(_) => Err(format!("trailing bytes after varint in {:?}", b)),
                    None => Err(format!("failed to decode varint in {:?}", b)),
                }
            }

            fn to_bytes(&self) -> Result<Vec<u8>, String> {
                Ok(self.encode_var_vec())
            }
        }
    )*};
}

// Sector numbers and epochs.
varint_map_key!(u64, i64);

impl MapKey for Address {
    fn from_bytes(b: &[u8]) -> Result<Self, String> {
        Address::from_bytes(b).map_err(|e| e.to_string())
    }

    fn to_bytes(&self) -> Result<Vec<u8>, String> {
        Ok(Address::to_bytes(*self))
    }
}
