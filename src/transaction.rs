//! Transactions: wire types and stateless validation

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::is_valid_transaction;
