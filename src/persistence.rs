//! Storage for blocks, orphans and the UTXO set.
//!
//! Two backends implement [`ChainStore`]: [`InMemoryStore`] for tests and
//! ephemeral runs, and [`Database`] on SQLite. Newly connected blocks, ledger
//! changes and main-chain moves are applied through [`ChainStore::commit`],
//! which is atomic.

use crate::blockchain::{Block, LocalBlock};
use crate::crypto::Address;
use crate::error::{ChainError, Result};
use crate::hash::Hash;
use crate::transaction::Utxo;
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

pub trait BlockStore: Send + Sync {
    fn put_block(&self, block: &LocalBlock) -> Result<()>;
    fn get_block(&self, hash: &Hash) -> Result<Option<LocalBlock>>;
    fn contains_block(&self, hash: &Hash) -> Result<bool>;
    /// Tip of the main chain, `None` before genesis is stored.
    fn latest_block(&self) -> Result<Option<LocalBlock>>;
    /// Hash of the main-chain block at `height`.
    fn main_chain_hash(&self, height: u64) -> Result<Option<Hash>>;

    fn put_orphan(&self, block: &Block) -> Result<()>;
    fn get_orphan(&self, hash: &Hash) -> Result<Option<Block>>;
    fn remove_orphan(&self, hash: &Hash) -> Result<()>;
    /// Orphans waiting on `parent`.
    fn orphans_of(&self, parent: &Hash) -> Result<Vec<Block>>;
    fn orphan_count(&self) -> Result<usize>;
}

pub trait UtxoStore: Send + Sync {
    fn put_utxo(&self, utxo: &Utxo) -> Result<()>;
    fn get_utxo(&self, id: &Hash) -> Result<Option<Utxo>>;
    fn remove_utxo(&self, id: &Hash) -> Result<()>;
    fn utxos(&self) -> Result<Vec<Utxo>>;
    fn utxos_for_address(&self, address: &Address) -> Result<Vec<Utxo>>;
}

/// One atomic ledger update.
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    /// Final state per UTXO id: `Some` to write, `None` to delete.
    pub utxos: HashMap<Hash, Option<Utxo>>,
    /// Main-chain entries from the branch point upward. When non-empty the last
    /// entry becomes the tip and every height above it is dropped.
    pub main_chain: Vec<(u64, Hash)>,
    /// Blocks stored together with the ledger change.
    pub blocks: Vec<LocalBlock>,
}

impl LedgerBatch {
    pub fn new(utxos: HashMap<Hash, Option<Utxo>>, main_chain: Vec<(u64, Hash)>) -> Self {
        LedgerBatch {
            utxos,
            main_chain,
            blocks: Vec::new(),
        }
    }

    pub fn with_block(mut self, block: LocalBlock) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn tip(&self) -> Option<Hash> {
        self.main_chain.last().map(|(_, hash)| *hash)
    }
}

pub trait ChainStore: BlockStore + UtxoStore {
    fn commit(&self, batch: &LedgerBatch) -> Result<()>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
struct MemoryState {
    blocks: HashMap<Hash, LocalBlock>,
    orphans: HashMap<Hash, Block>,
    utxos: HashMap<Hash, Utxo>,
    main_chain: Vec<Hash>,
}

/// Simple in-memory store useful for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for InMemoryStore {
    fn put_block(&self, block: &LocalBlock) -> Result<()> {
        self.state.write().blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    fn get_block(&self, hash: &Hash) -> Result<Option<LocalBlock>> {
        Ok(self.state.read().blocks.get(hash).cloned())
    }

    fn contains_block(&self, hash: &Hash) -> Result<bool> {
        Ok(self.state.read().blocks.contains_key(hash))
    }

    fn latest_block(&self) -> Result<Option<LocalBlock>> {
        let state = self.state.read();
        Ok(state
            .main_chain
            .last()
            .and_then(|hash| state.blocks.get(hash))
            .cloned())
    }

    fn main_chain_hash(&self, height: u64) -> Result<Option<Hash>> {
        let state = self.state.read();
        Ok(usize::try_from(height)
            .ok()
            .and_then(|h| state.main_chain.get(h))
            .copied())
    }

    fn put_orphan(&self, block: &Block) -> Result<()> {
        self.state.write().orphans.insert(block.hash, block.clone());
        Ok(())
    }

    fn get_orphan(&self, hash: &Hash) -> Result<Option<Block>> {
        Ok(self.state.read().orphans.get(hash).cloned())
    }

    fn remove_orphan(&self, hash: &Hash) -> Result<()> {
        self.state.write().orphans.remove(hash);
        Ok(())
    }

    fn orphans_of(&self, parent: &Hash) -> Result<Vec<Block>> {
        Ok(self
            .state
            .read()
            .orphans
            .values()
            .filter(|b| b.previous_hash == *parent)
            .cloned()
            .collect())
    }

    fn orphan_count(&self) -> Result<usize> {
        Ok(self.state.read().orphans.len())
    }
}

impl UtxoStore for InMemoryStore {
    fn put_utxo(&self, utxo: &Utxo) -> Result<()> {
        self.state.write().utxos.insert(utxo.id, utxo.clone());
        Ok(())
    }

    fn get_utxo(&self, id: &Hash) -> Result<Option<Utxo>> {
        Ok(self.state.read().utxos.get(id).cloned())
    }

    fn remove_utxo(&self, id: &Hash) -> Result<()> {
        self.state.write().utxos.remove(id);
        Ok(())
    }

    fn utxos(&self) -> Result<Vec<Utxo>> {
        Ok(self.state.read().utxos.values().cloned().collect())
    }

    fn utxos_for_address(&self, address: &Address) -> Result<Vec<Utxo>> {
        Ok(self
            .state
            .read()
            .utxos
            .values()
            .filter(|u| u.address == *address)
            .cloned()
            .collect())
    }
}

impl ChainStore for InMemoryStore {
    fn commit(&self, batch: &LedgerBatch) -> Result<()> {
        let mut state = self.state.write();

        let truncate_at = match batch.main_chain.first() {
            Some(&(first, _)) => {
                let first = usize::try_from(first)
                    .map_err(|_| ChainError::DatabaseError("Height out of range".to_string()))?;
                if first > state.main_chain.len() {
                    return Err(ChainError::DatabaseError(format!(
                        "Main chain gap: height {} above stored height {}",
                        first,
                        state.main_chain.len()
                    )));
                }
                Some(first)
            }
            None => None,
        };

        for block in &batch.blocks {
            state.blocks.insert(block.hash(), block.clone());
        }

        if let Some(first) = truncate_at {
            state.main_chain.truncate(first);
            state
                .main_chain
                .extend(batch.main_chain.iter().map(|(_, hash)| *hash));
        }

        for (id, change) in &batch.utxos {
            match change {
                Some(utxo) => {
                    state.utxos.insert(*id, utxo.clone());
                }
                None => {
                    state.utxos.remove(id);
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SQLite backend
// ============================================================================

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) the database at `path`. `":memory:"` gives a private
    /// in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash BLOB PRIMARY KEY,
                data BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS orphans (
                hash BLOB PRIMARY KEY,
                previous_hash BLOB NOT NULL,
                data BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS orphans_by_parent ON orphans (previous_hash);
            CREATE TABLE IF NOT EXISTS utxos (
                id BLOB PRIMARY KEY,
                address BLOB NOT NULL,
                data BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS utxos_by_address ON utxos (address);
            CREATE TABLE IF NOT EXISTS main_chain (
                height INTEGER PRIMARY KEY,
                hash BLOB NOT NULL
            );",
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create tables: {}", e)))?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }

    fn query_blobs(&self, sql: &str, param: &[u8]) -> Result<Vec<Vec<u8>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![param], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query: {}", e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?);
        }
        Ok(out)
    }

    fn query_one(&self, sql: &str, param: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        conn.query_row(sql, params![param], |row| row.get::<_, Vec<u8>>(0))
            .optional()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query: {}", e)))
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(blobs: Vec<Vec<u8>>) -> Result<Vec<T>> {
    blobs
        .iter()
        .map(|b| bincode::deserialize(b).map_err(ChainError::from))
        .collect()
}

fn decode_opt<T: serde::de::DeserializeOwned>(blob: Option<Vec<u8>>) -> Result<Option<T>> {
    blob.map(|b| bincode::deserialize(&b).map_err(ChainError::from))
        .transpose()
}

impl BlockStore for Database {
    fn put_block(&self, block: &LocalBlock) -> Result<()> {
        let data = bincode::serialize(block)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO blocks (hash, data) VALUES (?1, ?2)",
            params![block.hash().as_bytes().to_vec(), data],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;
        Ok(())
    }

    fn get_block(&self, hash: &Hash) -> Result<Option<LocalBlock>> {
        decode_opt(self.query_one("SELECT data FROM blocks WHERE hash = ?1", hash.as_bytes())?)
    }

    fn contains_block(&self, hash: &Hash) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM blocks WHERE hash = ?1",
                params![hash.as_bytes().to_vec()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn latest_block(&self) -> Result<Option<LocalBlock>> {
        let tip: Option<Vec<u8>> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT hash FROM main_chain ORDER BY height DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
        };
        match tip {
            Some(bytes) => self.get_block(&Hash::from_slice(&bytes)?),
            None => Ok(None),
        }
    }

    fn main_chain_hash(&self, height: u64) -> Result<Option<Hash>> {
        let height = i64::try_from(height)
            .map_err(|_| ChainError::DatabaseError("Height out of range".to_string()))?;
        let conn = self.lock()?;
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT hash FROM main_chain WHERE height = ?1",
                params![height],
                |row| row.get(0),
            )
            .optional()?;
        bytes.map(|b| Hash::from_slice(&b)).transpose()
    }

    fn put_orphan(&self, block: &Block) -> Result<()> {
        let data = bincode::serialize(block)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO orphans (hash, previous_hash, data) VALUES (?1, ?2, ?3)",
            params![
                block.hash.as_bytes().to_vec(),
                block.previous_hash.as_bytes().to_vec(),
                data
            ],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save orphan: {}", e)))?;
        Ok(())
    }

    fn get_orphan(&self, hash: &Hash) -> Result<Option<Block>> {
        decode_opt(self.query_one("SELECT data FROM orphans WHERE hash = ?1", hash.as_bytes())?)
    }

    fn remove_orphan(&self, hash: &Hash) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM orphans WHERE hash = ?1",
            params![hash.as_bytes().to_vec()],
        )?;
        Ok(())
    }

    fn orphans_of(&self, parent: &Hash) -> Result<Vec<Block>> {
        decode_all(self.query_blobs(
            "SELECT data FROM orphans WHERE previous_hash = ?1",
            parent.as_bytes(),
        )?)
    }

    fn orphan_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM orphans", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl UtxoStore for Database {
    fn put_utxo(&self, utxo: &Utxo) -> Result<()> {
        let data = bincode::serialize(utxo)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO utxos (id, address, data) VALUES (?1, ?2, ?3)",
            params![utxo.id.as_bytes().to_vec(), utxo.address.as_bytes().to_vec(), data],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save UTXO: {}", e)))?;
        Ok(())
    }

    fn get_utxo(&self, id: &Hash) -> Result<Option<Utxo>> {
        decode_opt(self.query_one("SELECT data FROM utxos WHERE id = ?1", id.as_bytes())?)
    }

    fn remove_utxo(&self, id: &Hash) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM utxos WHERE id = ?1", params![id.as_bytes().to_vec()])?;
        Ok(())
    }

    fn utxos(&self) -> Result<Vec<Utxo>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM utxos")
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut blobs = Vec::new();
        for row in rows {
            blobs.push(row?);
        }
        decode_all(blobs)
    }

    fn utxos_for_address(&self, address: &Address) -> Result<Vec<Utxo>> {
        decode_all(self.query_blobs(
            "SELECT data FROM utxos WHERE address = ?1",
            address.as_bytes(),
        )?)
    }
}

impl ChainStore for Database {
    fn commit(&self, batch: &LedgerBatch) -> Result<()> {
        let conn_guard = self.lock()?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        for block in &batch.blocks {
            let data = bincode::serialize(block)?;
            tx.execute(
                "INSERT OR REPLACE INTO blocks (hash, data) VALUES (?1, ?2)",
                params![block.hash().as_bytes().to_vec(), data],
            )?;
        }

        if let Some(&(first, _)) = batch.main_chain.first() {
            let first = i64::try_from(first)
                .map_err(|_| ChainError::DatabaseError("Height out of range".to_string()))?;
            tx.execute("DELETE FROM main_chain WHERE height >= ?1", params![first])?;
            for (height, hash) in &batch.main_chain {
                tx.execute(
                    "INSERT INTO main_chain (height, hash) VALUES (?1, ?2)",
                    params![*height as i64, hash.as_bytes().to_vec()],
                )?;
            }
        }

        for (id, change) in &batch.utxos {
            match change {
                Some(utxo) => {
                    let data = bincode::serialize(utxo)?;
                    tx.execute(
                        "INSERT OR REPLACE INTO utxos (id, address, data) VALUES (?1, ?2, ?3)",
                        params![id.as_bytes().to_vec(), utxo.address.as_bytes().to_vec(), data],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM utxos WHERE id = ?1", params![id.as_bytes().to_vec()])?;
                }
            }
        }

        // Commit all changes atomically
        tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }
}
