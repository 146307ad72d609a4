use fil_actors_runtime::FIRST_NON_SINGLETON_ADDR;
use fvm_shared::address::Address;
use fvm_shared::ActorID;

// account actor seeding funds created by new_with_singletons
pub const FAUCET_ROOT_KEY: &[u8] = &[153; fvm_shared::address::BLS_PUB_LEN];
pub const TEST_FAUCET_ADDR: Address = Address::new_id(FIRST_NON_SINGLETON_ADDR);
pub const FIRST_TEST_USER_ADDR: ActorID = FIRST_NON_SINGLETON_ADDR + 1;

// static values for predictable testing
pub const TEST_VM_RAND_ARRAY: [u8; 32] = [
    1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30, 31, 32,
];
pub const TEST_VM_INVALID_POST: &str = "i_am_invalid_post";

/// Per-epoch reward reported by the reward actor of a VM built with singletons, in whole FIL.
pub const TEST_EPOCH_REWARD_FIL: u64 = 100;
/// Baseline power reported by the reward actor of a VM built with singletons.
pub const TEST_BASELINE_POWER: u64 = 1 << 50;
/// Circulating supply seen by actors in a VM built with singletons, in whole FIL.
pub const TEST_CIRCULATING_SUPPLY_FIL: u64 = 1_000_000;
pub const FAUCET_BALANCE_FIL: u64 = 1_000_000_000;
