/// Validation logic for transactions separated from type definitions
use crate::blockchain::UtxoView;
use crate::crypto::{verify_signature, Address};
use crate::error::ChainError;
use crate::params::NetworkParams;
use crate::script::ScriptEngine;
use crate::transaction::types::{Transaction, Txi, Utxo};

impl Transaction {
    /// Validates this transaction against a UTXO view.
    ///
    /// Reward-shaped transactions only need a correct id. Every other
    /// transaction must not create more than its inputs resolve to, each input
    /// must be signed by the owner of the output it spends, and every input
    /// script and spent-output script must hold.
    pub fn validate<V: UtxoView + ?Sized>(
        &self,
        view: &V,
        params: &NetworkParams,
        scripts: &dyn ScriptEngine,
    ) -> Result<(), ChainError> {
        self.validate_size()?;

        let expected_id = self.compute_id();
        if expected_id != self.id {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction id mismatch. Expected {}, but got {}.",
                expected_id, self.id
            )));
        }

        if self.is_reward_shaped() {
            return Ok(());
        }

        // Missing UTXOs count as zero so the balance check below rejects them.
        let mut resolved = Vec::with_capacity(self.inputs.len());
        let mut input_total: u128 = 0;
        for txi in &self.inputs {
            let utxo = view.utxo(&txi.utxo_id(params.network))?;
            if let Some(u) = &utxo {
                input_total += u.amount.units() as u128;
            }
            resolved.push(utxo);
        }

        let output_total = self.output_total();
        if output_total > input_total {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} spends {} units but its inputs hold {}",
                self.id, output_total, input_total
            )));
        }

        for (txi, utxo) in self.inputs.iter().zip(&resolved) {
            self.validate_input(txi, utxo.as_ref(), params, scripts)?;
        }

        Ok(())
    }

    fn validate_input(
        &self,
        txi: &Txi,
        utxo: Option<&Utxo>,
        params: &NetworkParams,
        scripts: &dyn ScriptEngine,
    ) -> Result<(), ChainError> {
        let utxo = utxo.ok_or_else(|| {
            ChainError::InvalidTransaction(format!(
                "Input {}:{} does not reference an unspent output",
                txi.source_tx_id, txi.source_txo_index
            ))
        })?;

        let signature = txi.signature.as_ref().ok_or_else(|| {
            ChainError::InvalidTransaction(format!(
                "Input {}:{} is not signed",
                txi.source_tx_id, txi.source_txo_index
            ))
        })?;
        verify_signature(&signature.public_key, &self.signable_message(), &signature.signature)?;

        let signer = Address::from_public_key(&signature.public_key, params.network);
        if signer != utxo.address {
            return Err(ChainError::InvalidTransaction(format!(
                "Signer {} does not own output {} (owned by {})",
                signer, utxo.id, utxo.address
            )));
        }

        for script in txi.script.iter().chain(utxo.script.iter()) {
            match scripts.evaluate(script, self, &params.script_limits) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(ChainError::ScriptError(format!(
                        "Script rejected spend of {}",
                        utxo.id
                    )))
                }
                Err(e) => return Err(ChainError::ScriptError(e.to_string())),
            }
        }

        Ok(())
    }
}

/// Boolean form of [`Transaction::validate`]; the reason is logged at debug level.
pub fn is_valid_transaction<V: UtxoView + ?Sized>(
    tx: &Transaction,
    view: &V,
    params: &NetworkParams,
    scripts: &dyn ScriptEngine,
) -> bool {
    match tx.validate(view, params, scripts) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Rejected transaction {}: {}", tx.id, e);
            false
        }
    }
}
