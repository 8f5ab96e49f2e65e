//! UTXO state transitions: applying and revoking a block's ledger effect.
//!
//! All mutation goes through [`UtxoOverlay`], a write buffer over a read-only
//! [`UtxoView`]. Callers commit the overlay's changes to the store in one atomic
//! batch, so a failed application or reorg never leaves a partial ledger behind.

use crate::blockchain::core::chain::{Block, LocalBlock};
use crate::error::{ChainError, Result};
use crate::hash::Hash;
use crate::persistence::UtxoStore;
use crate::token::Token;
use crate::transaction::{Transaction, Utxo};
use std::collections::HashMap;

/// Read access to a UTXO set.
pub trait UtxoView {
    fn utxo(&self, id: &Hash) -> Result<Option<Utxo>>;
}

impl<T: UtxoStore + ?Sized> UtxoView for T {
    fn utxo(&self, id: &Hash) -> Result<Option<Utxo>> {
        self.get_utxo(id)
    }
}

pub struct UtxoOverlay<'a, V: UtxoView + ?Sized> {
    base: &'a V,
    changes: HashMap<Hash, Option<Utxo>>,
}

impl<'a, V: UtxoView + ?Sized> UtxoOverlay<'a, V> {
    pub fn new(base: &'a V) -> Self {
        UtxoOverlay {
            base,
            changes: HashMap::new(),
        }
    }

    pub fn put(&mut self, utxo: Utxo) {
        self.changes.insert(utxo.id, Some(utxo));
    }

    pub fn remove(&mut self, id: &Hash) {
        self.changes.insert(*id, None);
    }

    /// Final state of every touched id: `Some` to write, `None` to delete.
    pub fn into_changes(self) -> HashMap<Hash, Option<Utxo>> {
        self.changes
    }
}

impl<'a, V: UtxoView + ?Sized> UtxoView for UtxoOverlay<'a, V> {
    fn utxo(&self, id: &Hash) -> Result<Option<Utxo>> {
        match self.changes.get(id) {
            Some(change) => Ok(change.clone()),
            None => self.base.utxo(id),
        }
    }
}

/// Ledger effect of one applied block, stored with its LocalBlock for rollback.
#[derive(Debug, Clone, Default)]
pub struct BlockEffects {
    pub spent: Vec<Utxo>,
    pub surplus_redirect: Option<Transaction>,
}

/// Applies every transaction of `block` to `overlay`.
///
/// Reward-shaped transactions mint their single output. Other transactions
/// consume their inputs' UTXOs and create their outputs. If the block consumed
/// more than it produced, the surplus is paid to the network's charity address
/// through a synthetic payout transaction. A block that produces more than it
/// consumed, or that would overwrite an output still unspent, is rejected with
/// `InvalidBlock`.
pub fn process_block<V: UtxoView + ?Sized>(
    block: &Block,
    overlay: &mut UtxoOverlay<'_, V>,
) -> Result<BlockEffects> {
    let network = block.network;
    let mut spent = Vec::new();
    let mut consumed: u128 = 0;
    let mut produced: u128 = 0;

    for tx in &block.transactions {
        if tx.is_reward_shaped() {
            create_outputs(block, tx, overlay)?;
            continue;
        }

        for txi in &tx.inputs {
            let id = txi.utxo_id(network);
            if let Some(utxo) = overlay.utxo(&id)? {
                consumed += utxo.amount.units() as u128;
                overlay.remove(&id);
                spent.push(utxo);
            }
        }
        produced += create_outputs(block, tx, overlay)?;
    }

    if produced > consumed {
        return Err(ChainError::InvalidBlock(format!(
            "Block {} produces {} units but consumes only {}",
            block.hash, produced, consumed
        )));
    }

    let surplus = consumed - produced;
    let surplus_redirect = if surplus > 0 {
        let amount = u64::try_from(surplus).map_err(|_| {
            ChainError::InvalidBlock(format!("Block {} surplus overflows", block.hash))
        })?;
        let tx = Transaction::surplus(
            network.charity_address(),
            Token::from_units(amount),
            block.timestamp,
            block.index,
        );
        create_outputs(block, &tx, overlay)?;
        Some(tx)
    } else {
        None
    };

    Ok(BlockEffects {
        spent,
        surplus_redirect,
    })
}

/// Writes the outputs of `tx` and returns their total.
fn create_outputs<V: UtxoView + ?Sized>(
    block: &Block,
    tx: &Transaction,
    overlay: &mut UtxoOverlay<'_, V>,
) -> Result<u128> {
    let mut total = 0;
    for utxo in tx.created_utxos(block.network) {
        if overlay.utxo(&utxo.id)?.is_some() {
            return Err(ChainError::InvalidBlock(format!(
                "Block {} recreates unspent output {} of transaction {}",
                block.hash, utxo.id, tx.id
            )));
        }
        total += utxo.amount.units() as u128;
        overlay.put(utxo);
    }
    Ok(total)
}

/// Replays a block already linked into history, using its recorded undo data.
pub fn reapply_block<V: UtxoView + ?Sized>(local: &LocalBlock, overlay: &mut UtxoOverlay<'_, V>) {
    for utxo in &local.spent {
        overlay.remove(&utxo.id);
    }
    let network = local.block.network;
    for tx in local.block.transactions.iter().chain(local.surplus_redirect.iter()) {
        for utxo in tx.created_utxos(network) {
            overlay.put(utxo);
        }
    }
}

/// Undoes the ledger effect recorded in `local`.
pub fn revoke_block<V: UtxoView + ?Sized>(local: &LocalBlock, overlay: &mut UtxoOverlay<'_, V>) {
    for id in local.created_utxo_ids() {
        overlay.remove(&id);
    }
    for utxo in &local.spent {
        overlay.put(utxo.clone());
    }
}
