//! Proof-of-work search.
//!
//! Workers split the nonce space into disjoint strides (worker `w` of `n`
//! tries `w, w + n, w + 2n, ...`) and share one stop flag. The search ends on
//! the first hash meeting the block's difficulty or when the caller's
//! [`CancelToken`] fires.

pub mod client;

use crate::blockchain::Block;
use crate::error::{ChainError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Hashes a worker performs between checks of the shared flags.
const BATCH: u64 = 4096;

/// Cooperative cancellation shared between a search and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct MiningReport {
    pub block: Block,
    /// Nonces tried across all workers.
    pub hashes: u64,
    pub elapsed: Duration,
}

impl MiningReport {
    /// Hashes per second.
    pub fn hash_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.hashes as f64 / secs
        } else {
            self.hashes as f64
        }
    }
}

pub fn default_workers() -> usize {
    rayon::current_num_threads().max(1)
}

/// Searches for a nonce that makes `template` meet its own difficulty.
///
/// Returns `None` if `cancel` fires first or the nonce space is exhausted.
pub fn search(template: &Block, cancel: &CancelToken, workers: usize) -> Option<MiningReport> {
    let workers = workers.max(1) as u64;
    let primed = template.header_hasher();
    let difficulty = template.difficulty;
    let stop = AtomicBool::new(false);
    let hashes = AtomicU64::new(0);
    let found: Mutex<Option<u64>> = Mutex::new(None);
    let started = Instant::now();

    rayon::scope(|s| {
        for worker in 0..workers {
            let (primed, stop, hashes, found) = (&primed, &stop, &hashes, &found);
            s.spawn(move |_| {
                let mut nonce = worker;
                let mut tried = 0u64;
                loop {
                    if Block::hash_with_nonce(primed, nonce).matches_difficulty(difficulty) {
                        let mut slot = found.lock();
                        if slot.is_none() {
                            *slot = Some(nonce);
                        }
                        stop.store(true, Ordering::SeqCst);
                        tried += 1;
                        break;
                    }
                    tried += 1;
                    if tried % BATCH == 0
                        && (stop.load(Ordering::Relaxed) || cancel.is_cancelled())
                    {
                        break;
                    }
                    match nonce.checked_add(workers) {
                        Some(next) => nonce = next,
                        None => break,
                    }
                }
                hashes.fetch_add(tried, Ordering::Relaxed);
            });
        }
    });

    let nonce = found.into_inner()?;
    let block = template.clone().with_nonce(nonce);
    let report = MiningReport {
        block,
        hashes: hashes.into_inner(),
        elapsed: started.elapsed(),
    };
    debug!(
        "Found nonce {} for block {} after {} hashes ({:.0} H/s)",
        nonce,
        report.block.index,
        report.hashes,
        report.hash_rate()
    );
    Some(report)
}

/// Mines `template` to completion on the global rayon pool.
pub fn mine_block(template: Block) -> Result<Block> {
    search(&template, &CancelToken::new(), default_workers())
        .map(|report| report.block)
        .ok_or_else(|| {
            ChainError::InvalidBlock(format!(
                "nonce space exhausted at difficulty {}",
                template.difficulty
            ))
        })
}
