// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{ActorError, Array, Config, Map, MapKey};

/// Multimap stores multiple values per key in a HAMT of AMTs.
/// The order of insertion of values for each key is retained.
pub struct Multimap<BS, K>
where
    BS: Blockstore,
    K: MapKey,
{
    outer: Map<BS, K, Cid>,
    inner_bit_width: u32,
}

impl<BS, K> Multimap<BS, K>
where
    BS: Blockstore + Clone,
    K: MapKey,
{
    /// Initializes a new empty multimap.
    /// The outer config shapes the HAMT and the inner bit width the AMTs inside of it.
    pub fn empty(bs: BS, outer: Config, inner_bit_width: u32, name: &'static str) -> Self {
        Self { outer: Map::empty(bs, outer, name), inner_bit_width }
    }

    /// Initializes a multimap from a root Cid
    pub fn load(
        bs: BS,
        root: &Cid,
        outer: Config,
        inner_bit_width: u32,
        name: &'static str,
    ) -> Result<Self, ActorError> {
        Ok(Self { outer: Map::load(bs, root, outer, name)?, inner_bit_width })
    }

    /// Retrieve root from the multimap.
    #[inline]
    pub fn flush(&mut self) -> Result<Cid, ActorError> {
        self.outer.flush()
    }

    /// Adds a value for a key.
    pub fn add<V>(&mut self, key: &K, value: V) -> Result<(), ActorError>
    where
        V: Serialize + DeserializeOwned,
    {
        let mut arr = self.get::<V>(key)?.unwrap_or_else(|| {
            Array::empty(self.outer.store().clone(), self.inner_bit_width, "multimap inner")
        });
        arr.push(value)?;
        let new_root = arr.flush()?;
        self.outer.set(key, new_root)?;
        Ok(())
    }

    /// Gets the Array of value type `V` stored at a key.
    #[inline]
    pub fn get<V>(&self, key: &K) -> Result<Option<Array<BS, V>>, ActorError>
    where
        V: DeserializeOwned + Serialize,
    {
        match self.outer.get(key)? {
            Some(cid) => Ok(Some(Array::load(self.outer.store().clone(), cid, "multimap inner")?)),
            None => Ok(None),
        }
    }

    /// Removes all values for a key.
    #[inline]
    pub fn remove_all(&mut self, key: &K) -> Result<(), ActorError> {
        self.outer.delete(key)?;
        Ok(())
    }

    /// Iterates through all values in the array at a given key.
    pub fn for_each<F, V>(&self, key: &K, f: F) -> Result<(), ActorError>
    where
        V: Serialize + DeserializeOwned,
        F: FnMut(u64, &V) -> Result<(), ActorError>,
    {
        if let Some(arr) = self.get::<V>(key)? {
            arr.for_each(f)?;
        }
        Ok(())
    }

    /// Collects every key that currently holds values.
    pub fn keys(&self) -> Result<Vec<K>, ActorError> {
        self.outer.keys()
    }
}
