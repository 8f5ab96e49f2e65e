/// Transaction, input, output and UTXO types
use crate::crypto::{Address, KeyPair};
use crate::error::ChainError;
use crate::hash::{Hash, Hasher};
use crate::params::Network;
use crate::token::Token;
use serde::{Deserialize, Serialize};
use sha2::Digest;

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Regular,
    Fee,
    Reward,
}

impl TransactionType {
    fn tag(&self) -> u8 {
        match self {
            TransactionType::Regular => 0,
            TransactionType::Fee => 1,
            TransactionType::Reward => 2,
        }
    }
}

/// Proof that the spender controls the key behind the output being spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSignature {
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// A spend reference to an earlier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txi {
    pub source_tx_id: Hash,
    pub source_txo_index: u32,
    pub script: Option<String>,
    pub signature: Option<InputSignature>,
}

impl Txi {
    pub fn new(source_tx_id: Hash, source_txo_index: u32) -> Self {
        Txi {
            source_tx_id,
            source_txo_index,
            script: None,
            signature: None,
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Id of the UTXO this input consumes.
    pub fn utxo_id(&self, network: Network) -> Hash {
        Utxo::id_for(network, &self.source_tx_id, self.source_txo_index)
    }
}

/// A new output created by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txo {
    pub address: Address,
    pub amount: Token,
    pub script: Option<String>,
}

impl Txo {
    pub fn new(address: Address, amount: Token) -> Self {
        Txo {
            address,
            amount,
            script: None,
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash,
    pub timestamp: i64,
    pub tx_type: TransactionType,
    /// Index of the block a reward or surplus payout is minted in. Committed
    /// into the id so equal payouts in different blocks stay distinct outputs.
    #[serde(default)]
    pub block_index: Option<u64>,
    pub inputs: Vec<Txi>,
    pub outputs: Vec<Txo>,
}

fn update_optional_str(hasher: &mut Hasher, value: &Option<String>) {
    match value {
        Some(s) => {
            hasher.update([1u8]);
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}

impl Transaction {
    pub fn new(timestamp: i64, tx_type: TransactionType, inputs: Vec<Txi>, outputs: Vec<Txo>) -> Self {
        let mut tx = Transaction {
            id: Hash::ZERO,
            timestamp,
            tx_type,
            block_index: None,
            inputs,
            outputs,
        };
        tx.id = tx.compute_id();
        tx
    }

    fn payout(tx_type: TransactionType, address: Address, amount: Token, timestamp: i64, block_index: u64) -> Self {
        let mut tx = Transaction {
            id: Hash::ZERO,
            timestamp,
            tx_type,
            block_index: Some(block_index),
            inputs: Vec::new(),
            outputs: vec![Txo::new(address, amount)],
        };
        tx.id = tx.compute_id();
        tx
    }

    /// The block reward minted in block `block_index`: a single-output,
    /// input-free transaction paying `amount` to `address`.
    pub fn reward(address: Address, amount: Token, timestamp: i64, block_index: u64) -> Self {
        Transaction::payout(TransactionType::Reward, address, amount, timestamp, block_index)
    }

    /// Payout of the inputs a block consumed but did not spend.
    pub fn surplus(address: Address, amount: Token, timestamp: i64, block_index: u64) -> Self {
        Transaction::payout(TransactionType::Fee, address, amount, timestamp, block_index)
    }

    /// Content hash over timestamp, type, block index, inputs and outputs.
    /// Signatures are excluded so that signing an input leaves the id unchanged.
    pub fn compute_id(&self) -> Hash {
        let mut hasher = Hasher::new();
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update([self.tx_type.tag()]);
        match self.block_index {
            Some(index) => {
                hasher.update([1u8]);
                hasher.update(index.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update((self.inputs.len() as u64).to_le_bytes());
        for txi in &self.inputs {
            hasher.update(txi.source_tx_id.as_bytes());
            hasher.update(txi.source_txo_index.to_le_bytes());
            update_optional_str(&mut hasher, &txi.script);
        }
        hasher.update((self.outputs.len() as u64).to_le_bytes());
        for txo in &self.outputs {
            hasher.update(txo.address.as_bytes());
            hasher.update(txo.amount.units().to_le_bytes());
            update_optional_str(&mut hasher, &txo.script);
        }
        Hash::from_hasher(hasher)
    }

    /// Zero inputs and exactly one output: a coinbase-style reward.
    pub fn is_reward_shaped(&self) -> bool {
        self.inputs.is_empty() && self.outputs.len() == 1
    }

    pub fn output_total(&self) -> u128 {
        self.outputs.iter().map(|o| o.amount.units() as u128).sum()
    }

    /// Message every input signature commits to.
    pub fn signable_message(&self) -> [u8; 32] {
        *self.id.as_bytes()
    }

    /// Signs every input with `keypair`.
    pub fn sign_inputs(&mut self, keypair: &KeyPair) -> Result<(), ChainError> {
        let message = self.signable_message();
        let signature = keypair.sign(&message)?;
        let public_key = keypair.public_key_bytes().to_vec();
        for txi in &mut self.inputs {
            txi.signature = Some(InputSignature {
                public_key: public_key.clone(),
                signature: signature.to_vec(),
            });
        }
        Ok(())
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let serialized = bincode::serialize(self)
            .map_err(|e| ChainError::InvalidTransaction(format!("Serialization failed: {}", e)))?;

        if serialized.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                serialized.len(),
                MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }

    /// UTXOs this transaction creates once its block is applied.
    pub fn created_utxos(&self, network: Network) -> Vec<Utxo> {
        self.outputs
            .iter()
            .enumerate()
            .map(|(index, txo)| Utxo::from_output(network, self.id, index as u32, txo))
            .collect()
    }
}

/// A materialized unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub id: Hash,
    pub network: Network,
    pub source_tx_id: Hash,
    pub source_txo_index: u32,
    pub address: Address,
    pub amount: Token,
    pub script: Option<String>,
}

impl Utxo {
    pub fn id_for(network: Network, source_tx_id: &Hash, source_txo_index: u32) -> Hash {
        let mut hasher = Hasher::new();
        hasher.update([network.id()]);
        hasher.update(source_tx_id.as_bytes());
        hasher.update(source_txo_index.to_le_bytes());
        Hash::from_hasher(hasher)
    }

    pub fn from_output(network: Network, source_tx_id: Hash, source_txo_index: u32, txo: &Txo) -> Self {
        Utxo {
            id: Utxo::id_for(network, &source_tx_id, source_txo_index),
            network,
            source_tx_id,
            source_txo_index,
            address: txo.address,
            amount: txo.amount,
            script: txo.script.clone(),
        }
    }
}
