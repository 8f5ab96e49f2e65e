use crate::blockchain::core::chain::Block;
use crate::blockchain::core::state::UtxoView;
use crate::error::ChainError;
use crate::params::NetworkParams;
use crate::script::ScriptEngine;
use std::collections::HashMap;

pub fn validate_no_double_spend(block: &Block) -> Result<(), ChainError> {
    let mut seen_inputs = HashMap::new();
    for tx in &block.transactions {
        for txi in &tx.inputs {
            let utxo_id = txi.utxo_id(block.network);
            if let Some(conflicting_tx) = seen_inputs.insert(utxo_id, tx.id) {
                return Err(ChainError::InvalidTransaction(format!(
                    "Double spend detected in block. UTXO {} is spent by both {} and {}",
                    utxo_id, conflicting_tx, tx.id
                )));
            }
        }
    }
    Ok(())
}

/// Reward-shaped transactions must be minted for the block carrying them.
pub fn validate_payouts(block: &Block) -> Result<(), ChainError> {
    for tx in block.transactions.iter().filter(|tx| tx.is_reward_shaped()) {
        if tx.block_index != Some(block.index) {
            return Err(ChainError::InvalidBlock(format!(
                "Reward {} is bound to block {:?}, not {}",
                tx.id, tx.block_index, block.index
            )));
        }
    }
    Ok(())
}

/// Checks `candidate` as the child of `parent`, resolving inputs through `view`
/// (the UTXO set as of `parent`).
pub fn validate_block<V: UtxoView + ?Sized>(
    candidate: &Block,
    parent: &Block,
    view: &V,
    params: &NetworkParams,
    scripts: &dyn ScriptEngine,
    now: i64,
) -> Result<(), ChainError> {
    if candidate.network != parent.network {
        return Err(ChainError::InvalidBlock(format!(
            "Block network {} does not match parent network {}",
            candidate.network, parent.network
        )));
    }

    if candidate.index != parent.index + 1 {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid block index. Expected {}, but got {}.",
            parent.index + 1,
            candidate.index
        )));
    }

    if candidate.previous_hash != parent.hash {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid previous block hash. Expected {}, but got {}.",
            parent.hash, candidate.previous_hash
        )));
    }

    let earliest = parent.timestamp - params.valid_drift;
    let latest = now + params.valid_drift;
    if candidate.timestamp < earliest || candidate.timestamp > latest {
        return Err(ChainError::InvalidBlock(format!(
            "Timestamp {} outside accepted window [{}, {}]",
            candidate.timestamp, earliest, latest
        )));
    }

    let expected_hash = candidate.compute_hash();
    if expected_hash != candidate.hash {
        return Err(ChainError::InvalidBlock(format!(
            "Hash mismatch. Expected {}, but got {}.",
            expected_hash, candidate.hash
        )));
    }

    if !candidate.hash.matches_difficulty(candidate.difficulty) {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid Proof-of-Work: hash {} has {} leading zero bits, difficulty is {}",
            candidate.hash,
            candidate.hash.leading_zero_bits(),
            candidate.difficulty
        )));
    }

    validate_no_double_spend(candidate)?;
    validate_payouts(candidate)?;

    for tx in &candidate.transactions {
        tx.validate(view, params, scripts)?;
    }

    Ok(())
}

/// Boolean form of [`validate_block`]; the reason is logged at debug level.
pub fn is_valid_block<V: UtxoView + ?Sized>(
    candidate: &Block,
    parent: &Block,
    view: &V,
    params: &NetworkParams,
    scripts: &dyn ScriptEngine,
    now: i64,
) -> bool {
    match validate_block(candidate, parent, view, params, scripts, now) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Rejected block {} at index {}: {}", candidate.hash, candidate.index, e);
            false
        }
    }
}
