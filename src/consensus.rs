//! Fork choice and chain state for one network.
//!
//! [`Blockchain`] owns the canonical tip of a single network and is the only
//! writer of its store. Every block, mined locally or received from a peer,
//! enters through [`Blockchain::submit_block`] and is classified as accepted,
//! rejected or ignored. Adopting a heavier branch revokes the old segment and
//! replays the new one on a [`UtxoOverlay`], then commits the ledger changes and
//! the tip move as one [`LedgerBatch`].

use crate::blockchain::{
    is_retarget_height, next_difficulty, process_block, reapply_block, revoke_block, reward_for,
    validate_block, Block, LocalBlock, UtxoOverlay,
};
use crate::crypto::Address;
use crate::error::{ChainError, Result};
use crate::hash::Hash;
use crate::params::{Network, NetworkParams};
use crate::persistence::{BlockStore, ChainStore, LedgerBatch, UtxoStore};
use crate::script::ScriptEngine;
use crate::token::Token;
use crate::transaction::{Transaction, Utxo};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on blocks returned by one partial-chain query.
pub const MAX_PARTIAL_CHAIN: u64 = 500;
/// Orphans beyond this count are dropped instead of stored.
pub const MAX_ORPHANS: usize = 1024;

/// Outcome of submitting a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockDecision {
    /// The block is now the tip.
    Accepted,
    Rejected(Rejection),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Declared difficulty is below what the chain requires at that height.
    InsufficientDifficulty { required: u32 },
    Invalid(String),
    /// Valid and stored, but its branch carries no more work than the tip.
    Lighter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    Duplicate,
    Orphan { missing_parent: Hash },
}

impl BlockDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BlockDecision::Accepted)
    }

    /// True when the block now sits in the block store, adopted or not.
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            BlockDecision::Accepted | BlockDecision::Rejected(Rejection::Lighter)
        )
    }
}

/// Path between two blocks through their common ancestor.
#[derive(Debug, Clone)]
pub struct Branch {
    pub point: LocalBlock,
    /// Blocks above `point` on the old side, tip first.
    pub revoked: Vec<LocalBlock>,
    /// Blocks above `point` on the new side, lowest first.
    pub applied: Vec<LocalBlock>,
}

/// What a peer or miner needs to know about a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub network: Network,
    pub height: u64,
    pub latest_block: Block,
    pub difficulty: u32,
    pub reward: Token,
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Validation failures are verdicts on the block; anything else is a fault.
fn is_verdict(err: &ChainError) -> bool {
    matches!(
        err,
        ChainError::InvalidBlock(_)
            | ChainError::InvalidTransaction(_)
            | ChainError::ScriptError(_)
            | ChainError::CryptoError(_)
    )
}

pub struct Blockchain {
    params: &'static NetworkParams,
    store: Arc<dyn ChainStore>,
    scripts: Arc<dyn ScriptEngine>,
    tip: LocalBlock,
}

impl Blockchain {
    /// Loads the chain from `store`, writing the network's genesis block when
    /// the store is empty.
    pub fn open(
        network: Network,
        store: Arc<dyn ChainStore>,
        scripts: Arc<dyn ScriptEngine>,
    ) -> Result<Self> {
        let params = network.params();
        let tip = match store.latest_block()? {
            Some(tip) => tip,
            None => {
                let genesis = Block::genesis(params);
                let mut overlay = UtxoOverlay::new(&*store);
                let effects = process_block(&genesis, &mut overlay)?;
                let changes = overlay.into_changes();
                let local = LocalBlock::genesis(genesis, effects.spent, effects.surplus_redirect);
                store.commit(
                    &LedgerBatch::new(changes, vec![(0, local.hash())]).with_block(local.clone()),
                )?;
                info!("🌱 Initialised {} chain with genesis {}", network, local.hash());
                local
            }
        };

        if tip.block.network != network {
            return Err(ChainError::UnsupportedNetwork(format!(
                "store holds a {} chain, expected {}",
                tip.block.network, network
            )));
        }

        Ok(Blockchain {
            params,
            store,
            scripts,
            tip,
        })
    }

    pub fn network(&self) -> Network {
        self.params.network
    }

    pub fn params(&self) -> &'static NetworkParams {
        self.params
    }

    pub fn tip(&self) -> &LocalBlock {
        &self.tip
    }

    pub fn height(&self) -> u64 {
        self.tip.index()
    }

    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    /// Difficulty the next block on the canonical chain must declare.
    pub fn required_difficulty(&self) -> Result<u32> {
        self.required_difficulty_for(&self.tip)
    }

    /// Difficulty a child of `parent` must declare.
    pub fn required_difficulty_for(&self, parent: &LocalBlock) -> Result<u32> {
        if !is_retarget_height(parent.index(), self.params) {
            return Ok(parent.block.difficulty);
        }
        let start_height = parent.index() - self.params.difficulty_adjustment_interval;
        let start = self.ancestor_at(parent, start_height)?;
        Ok(next_difficulty(&parent.block, Some(&start.block), self.params))
    }

    /// Block reward for the next canonical block.
    pub fn current_reward(&self) -> Token {
        reward_for(self.tip.addresses.len())
    }

    pub fn snapshot(&self) -> Result<ChainSnapshot> {
        Ok(ChainSnapshot {
            network: self.network(),
            height: self.height(),
            latest_block: self.tip.block.clone(),
            difficulty: self.required_difficulty()?,
            reward: self.current_reward(),
        })
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        Ok(self.store.get_block(hash)?.map(|local| local.block))
    }

    pub fn utxos_for_address(&self, address: &Address) -> Result<Vec<Utxo>> {
        self.store.utxos_for_address(address)
    }

    /// Checks `tx` against the canonical UTXO set.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<()> {
        tx.validate(&*self.store, self.params, &*self.scripts)
    }

    /// Unmined block on top of the tip: a reward to `beneficiary` followed by
    /// `transactions`.
    pub fn block_template(
        &self,
        beneficiary: Address,
        transactions: Vec<Transaction>,
        now: i64,
    ) -> Result<Block> {
        let timestamp = now.max(self.tip.block.timestamp);
        let mut body = Vec::with_capacity(transactions.len() + 1);
        body.push(Transaction::reward(
            beneficiary,
            self.current_reward(),
            timestamp,
            self.height() + 1,
        ));
        body.extend(transactions);
        Ok(Block::new(
            self.network(),
            self.height() + 1,
            self.tip.hash(),
            timestamp,
            body,
            self.required_difficulty()?,
        ))
    }

    /// Canonical blocks `start..=end`.
    ///
    /// Fails with `RangeUnavailable` when the range is inverted, reaches past
    /// the local height, or exceeds [`MAX_PARTIAL_CHAIN`] blocks.
    pub fn get_partial_chain(&self, start: u64, end: u64) -> Result<Vec<Block>> {
        let height = self.height();
        if start > end || end > height || end - start >= MAX_PARTIAL_CHAIN {
            return Err(ChainError::RangeUnavailable { start, end, height });
        }

        let mut blocks = Vec::with_capacity((end - start + 1) as usize);
        for index in start..=end {
            let hash = self.store.main_chain_hash(index)?.ok_or_else(|| {
                ChainError::InvalidChain(format!("no main-chain entry at height {}", index))
            })?;
            let local = self.store.get_block(&hash)?.ok_or_else(|| {
                ChainError::InvalidChain(format!("main-chain block {} missing", hash))
            })?;
            blocks.push(local.block);
        }
        Ok(blocks)
    }

    /// Classifies `block` and, when it wins fork choice, makes it the tip.
    pub fn submit_block(&mut self, block: Block, now: i64) -> Result<BlockDecision> {
        if block.network != self.network() {
            return Ok(BlockDecision::Rejected(Rejection::Invalid(format!(
                "block belongs to {}",
                block.network
            ))));
        }

        if self.store.contains_block(&block.hash)? || self.store.get_orphan(&block.hash)?.is_some() {
            return Ok(BlockDecision::Ignored(IgnoreReason::Duplicate));
        }

        let parent = self.store.get_block(&block.previous_hash)?;
        let required = match &parent {
            Some(parent) => self.required_difficulty_for(parent)?,
            None => self.required_difficulty()?,
        };
        if block.difficulty < required {
            debug!(
                "Block {} declares difficulty {}, {} required",
                block.hash, block.difficulty, required
            );
            return Ok(BlockDecision::Rejected(Rejection::InsufficientDifficulty { required }));
        }

        let Some(parent) = parent else {
            return self.store_orphan(block);
        };

        self.connect(block, &parent, now)
    }

    /// Submits stored orphans descending from `parent`. Returns the blocks that
    /// became the tip along the way, in order.
    pub fn connect_orphans(&mut self, parent: &Hash, now: i64) -> Result<Vec<Block>> {
        let mut adopted = Vec::new();
        let mut pending = vec![*parent];
        while let Some(parent) = pending.pop() {
            for orphan in self.store.orphans_of(&parent)? {
                self.store.remove_orphan(&orphan.hash)?;
                let hash = orphan.hash;
                let copy = orphan.clone();
                let decision = self.submit_block(orphan, now)?;
                if decision.is_accepted() {
                    adopted.push(copy);
                }
                if decision.is_linked() {
                    pending.push(hash);
                } else {
                    debug!("Dropped orphan {}: {:?}", hash, decision);
                }
            }
        }
        Ok(adopted)
    }

    /// Walks back from `old` and `new` until they meet.
    ///
    /// Each step moves the side with the greater index. Fails with
    /// `InvalidChain` if either side runs off stored history.
    pub fn find_branch_point(&self, old: &LocalBlock, new: &LocalBlock) -> Result<Branch> {
        let mut a = old.clone();
        let mut b = new.clone();
        let mut revoked = Vec::new();
        let mut applied = Vec::new();

        while a.hash() != b.hash() {
            if a.index() >= b.index() {
                let parent = self.parent_of(&a)?;
                revoked.push(a);
                a = parent;
            } else {
                let parent = self.parent_of(&b)?;
                applied.push(b);
                b = parent;
            }
        }

        applied.reverse();
        Ok(Branch {
            point: a,
            revoked,
            applied,
        })
    }

    fn parent_of(&self, local: &LocalBlock) -> Result<LocalBlock> {
        if local.block.is_genesis() {
            return Err(ChainError::InvalidChain(format!(
                "walked past genesis from {}",
                local.hash()
            )));
        }
        self.store.get_block(&local.previous_hash())?.ok_or_else(|| {
            ChainError::InvalidChain(format!(
                "parent {} of block {} is not stored",
                local.previous_hash(),
                local.hash()
            ))
        })
    }

    fn ancestor_at(&self, from: &LocalBlock, height: u64) -> Result<LocalBlock> {
        if self.store.main_chain_hash(from.index())? == Some(from.hash()) {
            if let Some(hash) = self.store.main_chain_hash(height)? {
                if let Some(local) = self.store.get_block(&hash)? {
                    return Ok(local);
                }
            }
        }
        let mut cursor = from.clone();
        while cursor.index() > height {
            cursor = self.parent_of(&cursor)?;
        }
        Ok(cursor)
    }

    fn store_orphan(&self, block: Block) -> Result<BlockDecision> {
        let missing_parent = block.previous_hash;
        if self.store.orphan_count()? >= MAX_ORPHANS {
            warn!("Orphan pool full, dropping block {}", block.hash);
        } else {
            debug!("Stored orphan {} waiting on {}", block.hash, missing_parent);
            self.store.put_orphan(&block)?;
        }
        Ok(BlockDecision::Ignored(IgnoreReason::Orphan { missing_parent }))
    }

    fn connect(&mut self, block: Block, parent: &LocalBlock, now: i64) -> Result<BlockDecision> {
        let store = Arc::clone(&self.store);
        let mut overlay = UtxoOverlay::new(&*store);

        // Rewind the ledger to `parent` when it is not the tip.
        let branch = if parent.hash() == self.tip.hash() {
            None
        } else {
            let branch = self.find_branch_point(&self.tip, parent)?;
            for local in &branch.revoked {
                revoke_block(local, &mut overlay);
            }
            for local in &branch.applied {
                reapply_block(local, &mut overlay);
            }
            Some(branch)
        };

        let verdict = validate_block(
            &block,
            &parent.block,
            &overlay,
            self.params,
            &*self.scripts,
            now,
        )
        .and_then(|()| process_block(&block, &mut overlay));
        let effects = match verdict {
            Ok(effects) => effects,
            Err(e) if is_verdict(&e) => {
                debug!("Rejected block {}: {}", block.hash, e);
                return Ok(BlockDecision::Rejected(Rejection::Invalid(e.to_string())));
            }
            Err(e) => return Err(e),
        };

        let local = LocalBlock::child(parent, block, effects.spent, effects.surplus_redirect);

        if local.cumulative_work <= self.tip.cumulative_work {
            store.put_block(&local)?;
            debug!(
                "Stored side block {} at height {} (work {} vs tip {})",
                local.hash(),
                local.index(),
                local.cumulative_work,
                self.tip.cumulative_work
            );
            return Ok(BlockDecision::Rejected(Rejection::Lighter));
        }

        let mut main_chain = Vec::new();
        if let Some(branch) = &branch {
            main_chain.extend(branch.applied.iter().map(|b| (b.index(), b.hash())));
        }
        main_chain.push((local.index(), local.hash()));

        let changes = overlay.into_changes();
        store.commit(&LedgerBatch::new(changes, main_chain).with_block(local.clone()))?;

        match &branch {
            Some(branch) => info!(
                "🔀 Reorganised {} chain at {}: dropped {} block(s), new tip {} at height {}",
                self.network(),
                branch.point.hash(),
                branch.revoked.len(),
                local.hash(),
                local.index()
            ),
            None => info!(
                "✅ {} block {} accepted at height {}",
                self.network(),
                local.hash(),
                local.index()
            ),
        }

        self.tip = local;
        Ok(BlockDecision::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::miner::mine_block;
    use crate::persistence::InMemoryStore;
    use crate::script::PredicateEngine;

    const NOW: i64 = 1_514_764_800 + 3_600;

    fn chain() -> Blockchain {
        Blockchain::open(
            Network::Test,
            Arc::new(InMemoryStore::new()),
            Arc::new(PredicateEngine),
        )
        .unwrap()
    }

    fn child(parent: &Block, seconds: i64, miner: &KeyPair) -> Block {
        let timestamp = parent.timestamp + seconds;
        let reward = Transaction::reward(miner.address(Network::Test), Token::ONE, timestamp, parent.index + 1);
        let template = Block::new(
            Network::Test,
            parent.index + 1,
            parent.hash,
            timestamp,
            vec![reward],
            1,
        );
        mine_block(template).unwrap()
    }

    #[test]
    fn test_open_writes_genesis_once() {
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryStore::new());
        let first = Blockchain::open(Network::Test, store.clone(), Arc::new(PredicateEngine)).unwrap();
        assert_eq!(first.height(), 0);
        assert_eq!(first.tip().block, Block::genesis(Network::Test.params()));

        let again = Blockchain::open(Network::Test, store, Arc::new(PredicateEngine)).unwrap();
        assert_eq!(again.tip().hash(), first.tip().hash());
    }

    #[test]
    fn test_open_rejects_foreign_store() {
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryStore::new());
        Blockchain::open(Network::Test, store.clone(), Arc::new(PredicateEngine)).unwrap();
        let result = Blockchain::open(Network::Tkhn, store, Arc::new(PredicateEngine));
        assert!(matches!(result, Err(ChainError::UnsupportedNetwork(_))));
    }

    #[test]
    fn test_extend_then_duplicate() {
        let mut chain = chain();
        let miner = KeyPair::generate().unwrap();
        let block = child(&chain.tip().block, 10, &miner);

        assert_eq!(chain.submit_block(block.clone(), NOW).unwrap(), BlockDecision::Accepted);
        assert_eq!(chain.height(), 1);
        assert_eq!(
            chain.submit_block(block, NOW).unwrap(),
            BlockDecision::Ignored(IgnoreReason::Duplicate)
        );
    }

    #[test]
    fn test_low_difficulty_reports_requirement() {
        let mut chain = chain();
        let mut template = chain
            .block_template(KeyPair::generate().unwrap().address(Network::Test), Vec::new(), NOW)
            .unwrap();
        template.difficulty = 0;
        let block = template.with_nonce(0);
        assert_eq!(
            chain.submit_block(block, NOW).unwrap(),
            BlockDecision::Rejected(Rejection::InsufficientDifficulty { required: 1 })
        );
    }

    #[test]
    fn test_invalid_block_leaves_state_alone() {
        let mut chain = chain();
        let miner = KeyPair::generate().unwrap();
        let mut block = child(&chain.tip().block, 10, &miner);
        block.nonce = block.nonce.wrapping_add(1);

        let decision = chain.submit_block(block, NOW).unwrap();
        assert!(matches!(decision, BlockDecision::Rejected(Rejection::Invalid(_))));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_orphan_is_connected_after_parent() {
        let mut chain = chain();
        let miner = KeyPair::generate().unwrap();
        let b1 = child(&chain.tip().block, 10, &miner);
        let b2 = child(&b1, 10, &miner);

        assert_eq!(
            chain.submit_block(b2.clone(), NOW).unwrap(),
            BlockDecision::Ignored(IgnoreReason::Orphan { missing_parent: b1.hash })
        );
        assert_eq!(chain.store().orphan_count().unwrap(), 1);

        assert!(chain.submit_block(b1.clone(), NOW).unwrap().is_accepted());
        let adopted = chain.connect_orphans(&b1.hash, NOW).unwrap();
        assert_eq!(adopted, vec![b2.clone()]);
        assert_eq!(chain.tip().hash(), b2.hash);
        assert_eq!(chain.store().orphan_count().unwrap(), 0);
    }

    #[test]
    fn test_equal_work_fork_keeps_first() {
        let mut chain = chain();
        let genesis = chain.tip().block.clone();
        let a = child(&genesis, 10, &KeyPair::generate().unwrap());
        let b = child(&genesis, 20, &KeyPair::generate().unwrap());

        assert!(chain.submit_block(a.clone(), NOW).unwrap().is_accepted());
        assert_eq!(
            chain.submit_block(b.clone(), NOW).unwrap(),
            BlockDecision::Rejected(Rejection::Lighter)
        );
        assert_eq!(chain.tip().hash(), a.hash);
        assert!(chain.store().contains_block(&b.hash).unwrap());
    }

    #[test]
    fn test_heavier_branch_reorganises() {
        let mut chain = chain();
        let genesis = chain.tip().block.clone();
        let a_miner = KeyPair::generate().unwrap();
        let b_miner = KeyPair::generate().unwrap();
        let a1 = child(&genesis, 10, &a_miner);
        let b1 = child(&genesis, 20, &b_miner);
        let b2 = child(&b1, 10, &b_miner);

        chain.submit_block(a1.clone(), NOW).unwrap();
        chain.submit_block(b1, NOW).unwrap();
        assert!(chain.submit_block(b2.clone(), NOW).unwrap().is_accepted());
        assert_eq!(chain.tip().hash(), b2.hash);

        assert!(chain.utxos_for_address(&a_miner.address(Network::Test)).unwrap().is_empty());
        assert_eq!(chain.utxos_for_address(&b_miner.address(Network::Test)).unwrap().len(), 2);
        assert_eq!(chain.get_partial_chain(1, 2).unwrap()[1], b2);
    }

    #[test]
    fn test_find_branch_point_errors_on_missing_history() {
        let chain = chain();
        let genesis = chain.tip().clone();
        let stray = Block::new(Network::Test, 5, Hash::of(b"unknown"), NOW, Vec::new(), 1);
        let stray = LocalBlock::child(&genesis, stray, Vec::new(), None);

        let result = chain.find_branch_point(&genesis, &stray);
        assert!(matches!(result, Err(ChainError::InvalidChain(_))));
    }

    #[test]
    fn test_partial_chain_bounds() {
        let mut chain = chain();
        let miner = KeyPair::generate().unwrap();
        for _ in 0..3 {
            let next = child(&chain.tip().block, 10, &miner);
            chain.submit_block(next, NOW).unwrap();
        }

        let blocks = chain.get_partial_chain(0, 3).unwrap();
        assert_eq!(blocks.len(), 4);
        assert!(blocks.windows(2).all(|w| w[1].previous_hash == w[0].hash));

        assert!(matches!(
            chain.get_partial_chain(2, 4),
            Err(ChainError::RangeUnavailable { height: 3, .. })
        ));
        assert!(chain.get_partial_chain(3, 2).is_err());
    }

    /// Store whose next commit fails once when armed.
    #[derive(Default)]
    struct FailingStore {
        inner: InMemoryStore,
        fail_next: std::sync::atomic::AtomicBool,
    }

    impl BlockStore for FailingStore {
        fn put_block(&self, block: &LocalBlock) -> Result<()> {
            self.inner.put_block(block)
        }
        fn get_block(&self, hash: &Hash) -> Result<Option<LocalBlock>> {
            self.inner.get_block(hash)
        }
        fn contains_block(&self, hash: &Hash) -> Result<bool> {
            self.inner.contains_block(hash)
        }
        fn latest_block(&self) -> Result<Option<LocalBlock>> {
            self.inner.latest_block()
        }
        fn main_chain_hash(&self, height: u64) -> Result<Option<Hash>> {
            self.inner.main_chain_hash(height)
        }
        fn put_orphan(&self, block: &Block) -> Result<()> {
            self.inner.put_orphan(block)
        }
        fn get_orphan(&self, hash: &Hash) -> Result<Option<Block>> {
            self.inner.get_orphan(hash)
        }
        fn remove_orphan(&self, hash: &Hash) -> Result<()> {
            self.inner.remove_orphan(hash)
        }
        fn orphans_of(&self, parent: &Hash) -> Result<Vec<Block>> {
            self.inner.orphans_of(parent)
        }
        fn orphan_count(&self) -> Result<usize> {
            self.inner.orphan_count()
        }
    }

    impl UtxoStore for FailingStore {
        fn put_utxo(&self, utxo: &Utxo) -> Result<()> {
            self.inner.put_utxo(utxo)
        }
        fn get_utxo(&self, id: &Hash) -> Result<Option<Utxo>> {
            self.inner.get_utxo(id)
        }
        fn remove_utxo(&self, id: &Hash) -> Result<()> {
            self.inner.remove_utxo(id)
        }
        fn utxos(&self) -> Result<Vec<Utxo>> {
            self.inner.utxos()
        }
        fn utxos_for_address(&self, address: &Address) -> Result<Vec<Utxo>> {
            self.inner.utxos_for_address(address)
        }
    }

    impl ChainStore for FailingStore {
        fn commit(&self, batch: &LedgerBatch) -> Result<()> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(ChainError::DatabaseError("disk full".to_string()));
            }
            self.inner.commit(batch)
        }
    }

    #[test]
    fn test_failed_commit_allows_resubmit() {
        let store = Arc::new(FailingStore::default());
        let mut chain = Blockchain::open(Network::Test, store.clone(), Arc::new(PredicateEngine)).unwrap();
        let miner = KeyPair::generate().unwrap();
        let block = child(&chain.tip().block, 10, &miner);

        store.fail_next.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            chain.submit_block(block.clone(), NOW),
            Err(ChainError::DatabaseError(_))
        ));
        assert!(!store.contains_block(&block.hash).unwrap());
        assert_eq!(chain.height(), 0);
        assert!(chain.utxos_for_address(&miner.address(Network::Test)).unwrap().is_empty());

        assert_eq!(chain.submit_block(block.clone(), NOW).unwrap(), BlockDecision::Accepted);
        assert_eq!(chain.tip().hash(), block.hash);
        assert_eq!(chain.utxos_for_address(&miner.address(Network::Test)).unwrap().len(), 1);
    }

    #[test]
    fn test_reward_grows_with_addresses() {
        let chain = chain();
        assert_eq!(chain.current_reward(), Token::ONE);
        assert_eq!(chain.snapshot().unwrap().difficulty, 1);
    }
}
