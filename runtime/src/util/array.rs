// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::anyhow;
use cid::Cid;
use fvm_ipld_amt as amt;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::error::ExitCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{ActorError, AsActorError};

/// Wraps an AMT to provide a convenient array API.
/// Errors carry the illegal state exit code and are adorned with the array's name.
pub struct Array<BS, V>
where
    BS: Blockstore,
    V: DeserializeOwned + Serialize,
{
    amt: amt::Amt<V, BS>,
    name: &'static str,
}

impl<BS, V> Array<BS, V>
where
    BS: Blockstore,
    V: DeserializeOwned + Serialize,
{
    pub fn empty(store: BS, bit_width: u32, name: &'static str) -> Self {
        Self { amt: amt::Amt::new_with_bit_width(store, bit_width), name }
    }

    pub fn load(store: BS, root: &Cid, name: &'static str) -> Result<Self, ActorError> {
        Ok(Self {
            amt: amt::Amt::load(root, store).with_context_code(
                ExitCode::USR_ILLEGAL_STATE,
                || format!("failed to load AMT '{}'", name),
            )?,
            name,
        })
    }

    pub fn flush(&mut self) -> Result<Cid, ActorError> {
        self.amt.flush().with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("failed to flush AMT '{}'", self.name)
        })
    }

    /// Number of values held.
    pub fn count(&self) -> u64 {
        self.amt.count()
    }

    pub fn get(&self, index: u64) -> Result<Option<&V>, ActorError> {
        self.amt.get(index).with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("failed to get index {} from AMT '{}'", index, self.name)
        })
    }

    pub fn set(&mut self, index: u64, value: V) -> Result<(), ActorError> {
        self.amt.set(index, value).with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("failed to set index {} in AMT '{}'", index, self.name)
        })
    }

    /// Appends a value after the current last index.
    pub fn push(&mut self, value: V) -> Result<(), ActorError> {
        self.set(self.count(), value)
    }

    pub fn delete(&mut self, index: u64) -> Result<Option<V>, ActorError> {
        self.amt.delete(index).with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("failed to delete index {} from AMT '{}'", index, self.name)
        })
    }

    /// Deletes many indices at once. When `strict` is set every index must be present.
    pub fn batch_delete(
        &mut self,
        indices: impl IntoIterator<Item = u64>,
        strict: bool,
    ) -> Result<bool, ActorError> {
        self.amt.batch_delete(indices, strict).with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("failed to batch delete from AMT '{}'", self.name)
        })
    }

    /// Visits values in index order until the callback returns false.
    pub fn for_each_while<F>(&self, mut f: F) -> Result<(), ActorError>
    where
        F: FnMut(u64, &V) -> Result<bool, ActorError>,
    {
        self.amt
            .for_each_while(|i, v| f(i, v).map_err(|e| anyhow!(e)))
            .map_err(|amt_err| self.traversal_error(amt_err))
    }

    pub fn for_each<F>(&self, mut f: F) -> Result<(), ActorError>
    where
        F: FnMut(u64, &V) -> Result<(), ActorError>,
    {
        self.for_each_while(|i, v| f(i, v).map(|_| true))
    }

    fn traversal_error(&self, err: amt::Error) -> ActorError {
        match err {
            amt::Error::Dynamic(e) => match e.downcast::<ActorError>() {
                Ok(ae) => ae,
                Err(e) => ActorError::illegal_state(format!(
                    "error in callback traversing AMT {}: {}",
                    self.name, e
                )),
            },
            e => ActorError::illegal_state(format!("error traversing AMT {}: {}", self.name, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fvm_ipld_blockstore::MemoryBlockstore;

    #[test]
    fn push_and_iterate_in_order() {
        let bs = MemoryBlockstore::new();
        let mut arr = Array::<_, String>::empty(&bs, 5, "events");
        arr.push("a".to_string()).unwrap();
        arr.push("b".to_string()).unwrap();
        arr.push("c".to_string()).unwrap();
        let root = arr.flush().unwrap();

        let arr = Array::<_, String>::load(&bs, &root, "events").unwrap();
        let mut seen = Vec::new();
        arr.for_each_while(|i, v| {
            seen.push((i, v.clone()));
            Ok(i < 1)
        })
        .unwrap();
        assert_eq!(vec![(0, "a".to_string()), (1, "b".to_string())], seen);
        assert_eq!(3, arr.count());
    }

    #[test]
    fn callback_error_propagates() {
        let bs = MemoryBlockstore::new();
        let mut arr = Array::<_, u64>::empty(&bs, 5, "values");
        arr.push(1).unwrap();
        let err = arr.for_each(|_, _| Err(ActorError::not_found("gone".into()))).unwrap_err();
        assert_eq!(ActorError::not_found("gone".into()), err);
    }
}
