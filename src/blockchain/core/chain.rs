use crate::crypto::Address;
use crate::hash::{Hash, Hasher};
use crate::params::{Network, NetworkParams};
use crate::transaction::{Transaction, Utxo};
use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub network: Network,
    pub index: u64,
    pub hash: Hash,
    pub previous_hash: Hash,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub difficulty: u32,
    pub nonce: u64,
}

impl Block {
    /// Builds an unmined block; `hash` is computed for nonce 0.
    pub fn new(
        network: Network,
        index: u64,
        previous_hash: Hash,
        timestamp: i64,
        transactions: Vec<Transaction>,
        difficulty: u32,
    ) -> Self {
        let mut block = Block {
            network,
            index,
            hash: Hash::ZERO,
            previous_hash,
            timestamp,
            transactions,
            difficulty,
            nonce: 0,
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn genesis(params: &NetworkParams) -> Self {
        let reward = Transaction::reward(
            params.genesis_address(),
            params.genesis_reward,
            params.genesis_time,
            0,
        );
        Block::new(
            params.network,
            0,
            Hash::ZERO,
            params.genesis_time,
            vec![reward],
            params.genesis_difficulty,
        )
    }

    pub fn calculate_transactions_root(transactions: &[Transaction]) -> Hash {
        let mut hasher = Hasher::new();
        for tx in transactions {
            hasher.update(tx.id.as_bytes());
        }
        Hash::from_hasher(hasher)
    }

    /// Hasher primed with every field except the nonce. The miner clones it per attempt.
    pub fn header_hasher(&self) -> Hasher {
        let mut hasher = Hasher::new();
        hasher.update([self.network.id()]);
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(Block::calculate_transactions_root(&self.transactions).as_bytes());
        hasher.update(self.difficulty.to_le_bytes());
        hasher
    }

    pub fn hash_with_nonce(primed: &Hasher, nonce: u64) -> Hash {
        let mut hasher = primed.clone();
        hasher.update(nonce.to_le_bytes());
        Hash::from_hasher(hasher)
    }

    pub fn compute_hash(&self) -> Hash {
        Block::hash_with_nonce(&self.header_hasher(), self.nonce)
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self.hash = self.compute_hash();
        self
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.transactions
            .iter()
            .flat_map(|tx| tx.outputs.iter().map(|o| &o.address))
    }
}

/// Cumulative proof-of-work, Σ 2^difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Work(U256);

impl Work {
    pub const MAX_DIFFICULTY: u32 = 255;

    pub fn of_difficulty(difficulty: u32) -> Self {
        Work(U256::one() << difficulty.min(Self::MAX_DIFFICULTY) as usize)
    }

    pub fn saturating_add(self, other: Work) -> Self {
        Work(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Work {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Work {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut bytes = [0u8; 32];
        self.0.to_big_endian(&mut bytes);
        bytes.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Work {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        Ok(Work(U256::from_big_endian(&bytes)))
    }
}

/// A block linked into local history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBlock {
    pub block: Block,
    pub cumulative_work: Work,
    /// Every address that has appeared on this chain up to and including this block.
    pub addresses: BTreeSet<Address>,
    /// UTXOs consumed when the block was applied, kept for rollback.
    pub spent: Vec<Utxo>,
    /// Synthetic reward sending the block's surplus to the charity address.
    pub surplus_redirect: Option<Transaction>,
}

impl LocalBlock {
    pub fn genesis(block: Block, spent: Vec<Utxo>, surplus_redirect: Option<Transaction>) -> Self {
        let addresses = block.addresses().copied().collect();
        LocalBlock {
            cumulative_work: Work::of_difficulty(block.difficulty),
            block,
            addresses,
            spent,
            surplus_redirect,
        }
    }

    pub fn child(
        parent: &LocalBlock,
        block: Block,
        spent: Vec<Utxo>,
        surplus_redirect: Option<Transaction>,
    ) -> Self {
        let mut addresses = parent.addresses.clone();
        addresses.extend(block.addresses().copied());
        if let Some(tx) = &surplus_redirect {
            addresses.extend(tx.outputs.iter().map(|o| o.address));
        }
        LocalBlock {
            cumulative_work: parent
                .cumulative_work
                .saturating_add(Work::of_difficulty(block.difficulty)),
            block,
            addresses,
            spent,
            surplus_redirect,
        }
    }

    pub fn hash(&self) -> Hash {
        self.block.hash
    }

    pub fn index(&self) -> u64 {
        self.block.index
    }

    pub fn previous_hash(&self) -> Hash {
        self.block.previous_hash
    }

    /// Every UTXO id the block created, surplus redirect included.
    pub fn created_utxo_ids(&self) -> Vec<Hash> {
        let network = self.block.network;
        self.block
            .transactions
            .iter()
            .chain(self.surplus_redirect.iter())
            .flat_map(|tx| {
                (0..tx.outputs.len() as u32).map(move |i| Utxo::id_for(network, &tx.id, i))
            })
            .collect()
    }
}
