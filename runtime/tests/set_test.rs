// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_actors_runtime::{Set, DEFAULT_HAMT_CONFIG};
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_shared::address::Address;

#[test]
fn reload_from_root() {
    let store = MemoryBlockstore::new();
    let mut set = Set::<_, Address>::empty(&store, DEFAULT_HAMT_CONFIG, "miners");
    set.put(&Address::new_id(101)).unwrap();
    set.put(&Address::new_id(102)).unwrap();
    let root = set.flush().unwrap();

    let set = Set::<_, Address>::load(&store, &root, DEFAULT_HAMT_CONFIG, "miners").unwrap();
    assert!(set.has(&Address::new_id(101)).unwrap());
    assert!(!set.has(&Address::new_id(103)).unwrap());
    assert_eq!(2, set.collect_keys().unwrap().len());
}

#[test]
fn for_each_visits_every_key() {
    let store = MemoryBlockstore::new();
    let mut set = Set::<_, u64>::empty(&store, DEFAULT_HAMT_CONFIG, "epochs");
    for k in [3u64, 1, 2] {
        set.put(&k).unwrap();
    }

    let mut seen = Vec::new();
    set.for_each(|k| {
        seen.push(k);
        Ok(())
    })
    .unwrap();
    seen.sort_unstable();
    assert_eq!(vec![1, 2, 3], seen);
}

#[test]
fn delete_missing_key_is_noop() {
    let store = MemoryBlockstore::new();
    let mut set = Set::<_, u64>::empty(&store, DEFAULT_HAMT_CONFIG, "epochs");
    assert_eq!(None, set.delete(&7).unwrap());
    set.put(&7).unwrap();
    assert_eq!(Some(()), set.delete(&7).unwrap());
    assert!(!set.has(&7).unwrap());
}
