// Thin re-export module: the block model, ledger transitions, validation and
// difficulty rules live under `blockchain/core`. The stateful engine that ties
// them to a store is `crate::consensus`.

pub mod core;
pub use core::*;
