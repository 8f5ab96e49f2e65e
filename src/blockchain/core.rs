// Block and ledger primitives, split by responsibility.
pub mod chain;
pub mod difficulty;
pub mod state;
pub mod validation;

pub use chain::*;
pub use difficulty::*;
pub use state::*;
pub use validation::*;
