// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub use self::array::Array;
pub use self::map::*;
pub use self::message_accumulator::MessageAccumulator;
pub use self::multimap::Multimap;
pub use self::set::Set;

mod array;
mod map;
mod message_accumulator;
mod multimap;
mod set;
