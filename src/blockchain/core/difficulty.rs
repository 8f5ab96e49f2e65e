//! Difficulty retargeting and the block reward heuristic.

use crate::blockchain::core::chain::{Block, Work};
use crate::params::NetworkParams;
use crate::token::Token;

/// True when a block at `index` closes a retarget interval.
pub fn is_retarget_height(index: u64, params: &NetworkParams) -> bool {
    index > 0 && index % params.difficulty_adjustment_interval == 0
}

/// Difficulty required of the child of `tip`.
///
/// `interval_start` is the ancestor `difficulty_adjustment_interval` blocks
/// below `tip`; it is only consulted at retarget heights.
pub fn next_difficulty(tip: &Block, interval_start: Option<&Block>, params: &NetworkParams) -> u32 {
    if !is_retarget_height(tip.index, params) {
        return tip.difficulty;
    }
    let Some(start) = interval_start else {
        return tip.difficulty;
    };

    let expected = params.block_generation_interval * params.difficulty_adjustment_interval as i64;
    let actual = tip.timestamp - start.timestamp;

    if actual * 2 < expected {
        (tip.difficulty + 1).min(Work::MAX_DIFFICULTY)
    } else if actual > expected * 2 {
        tip.difficulty.saturating_sub(1).max(params.min_difficulty)
    } else {
        tip.difficulty
    }
}

/// `max(1, floor(log10(addresses)))` whole tokens.
pub fn reward_for(unique_addresses: usize) -> Token {
    let exponent = unique_addresses.checked_ilog10().unwrap_or(0).max(1);
    Token::from_tokens(exponent as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;
    use crate::params::Network;
    use proptest::prelude::*;

    fn block_at(index: u64, timestamp: i64, difficulty: u32) -> Block {
        Block::new(Network::Tkhn, index, Hash::ZERO, timestamp, Vec::new(), difficulty)
    }

    #[test]
    fn test_inherits_between_retargets() {
        let params = Network::Tkhn.params();
        let tip = block_at(3, 1_000, 7);
        assert_eq!(next_difficulty(&tip, None, params), 7);
    }

    #[test]
    fn test_fast_interval_raises() {
        let params = Network::Tkhn.params();
        // expected = 600 * 5 = 3000s
        let start = block_at(0, 0, 4);
        let tip = block_at(5, 1_000, 4);
        assert_eq!(next_difficulty(&tip, Some(&start), params), 5);
    }

    #[test]
    fn test_slow_interval_lowers() {
        let params = Network::Tkhn.params();
        let start = block_at(5, 0, 4);
        let tip = block_at(10, 7_000, 4);
        assert_eq!(next_difficulty(&tip, Some(&start), params), 3);
    }

    #[test]
    fn test_on_target_interval_keeps() {
        let params = Network::Tkhn.params();
        let start = block_at(5, 0, 4);
        let tip = block_at(10, 3_000, 4);
        assert_eq!(next_difficulty(&tip, Some(&start), params), 4);
    }

    #[test]
    fn test_never_below_minimum() {
        let params = Network::Tkhn.params();
        let start = block_at(5, 0, 1);
        let tip = block_at(10, 100_000, 1);
        assert_eq!(next_difficulty(&tip, Some(&start), params), 1);
    }

    #[test]
    fn test_reward_heuristic() {
        assert_eq!(reward_for(0), Token::ONE);
        assert_eq!(reward_for(9), Token::ONE);
        assert_eq!(reward_for(99), Token::ONE);
        assert_eq!(reward_for(100), Token::from_tokens(2));
        assert_eq!(reward_for(12_345), Token::from_tokens(4));
    }

    proptest! {
        #[test]
        fn prop_retarget_moves_at_most_one(
            index in 1u64..10_000,
            difficulty in 1u32..200,
            elapsed in 0i64..100_000,
        ) {
            let params = Network::Tkhn.params();
            let start = block_at(index.saturating_sub(5), 0, difficulty);
            let tip = block_at(index, elapsed, difficulty);
            let next = next_difficulty(&tip, Some(&start), params);
            prop_assert!(next.abs_diff(difficulty) <= 1);
            if !is_retarget_height(index, params) {
                prop_assert_eq!(next, difficulty);
            }
        }
    }
}
