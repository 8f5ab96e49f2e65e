//! Mining client: connects to a relay node, follows the tip of every network
//! it is welcomed on and mines blocks paying its own address.
//!
//! A found block does not move the miner's tip. The network is paused until
//! the node either echoes the block back (accepted) or answers with a
//! Welcome or Difficulty (rejected); only then does mining resume there.

use crate::blockchain::Block;
use crate::consensus::unix_now;
use crate::crypto::KeyPair;
use crate::error::{ChainError, Result};
use crate::hash::Hash;
use crate::miner::{search, CancelToken, MiningReport};
use crate::network::message::{read_frame, write_message, Frame, Message, Payload};
use crate::params::Network;
use crate::token::Token;
use crate::transaction::Transaction;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Closed,
    Opening,
    /// Connected, no search running.
    Waiting,
    Running,
}

/// What the miner knows about one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Work {
    pub tip: Block,
    pub difficulty: u32,
    pub reward: Token,
    /// Block sent to the node and not yet answered.
    pub awaiting: Option<Block>,
}

/// Whether an inbound message invalidates the search in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Continue,
    Restart,
    Close,
}

pub struct MiningClient {
    keypair: KeyPair,
    workers: usize,
    state: MinerState,
    work: BTreeMap<Network, Work>,
    pending: BTreeMap<Network, Vec<Transaction>>,
}

impl MiningClient {
    pub fn new(keypair: KeyPair, workers: usize) -> Self {
        MiningClient {
            keypair,
            workers: workers.max(1),
            state: MinerState::Closed,
            work: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> MinerState {
        self.state
    }

    pub fn work(&self, network: Network) -> Option<&Work> {
        self.work.get(&network)
    }

    pub fn pending(&self, network: Network) -> &[Transaction] {
        self.pending.get(&network).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn on_message(&mut self, message: Message) -> Reaction {
        let network = message.network;
        match message.payload {
            Payload::Welcome(welcome) => {
                let refused = self
                    .work
                    .get(&network)
                    .and_then(|work| work.awaiting.as_ref())
                    .filter(|awaited| awaited.previous_hash == welcome.latest_block.hash)
                    .cloned();
                if let Some(refused) = refused {
                    // Tip did not move past our block: drop what it carried
                    info!(
                        "Node kept {} tip {}, block {} refused",
                        network, welcome.latest_block.hash, refused.hash
                    );
                    self.prune_pending(&refused);
                }
                self.work.insert(
                    network,
                    Work {
                        tip: welcome.latest_block,
                        difficulty: welcome.difficulty,
                        reward: welcome.reward,
                        awaiting: None,
                    },
                );
                if self.state == MinerState::Opening {
                    self.state = MinerState::Waiting;
                }
                Reaction::Restart
            }
            Payload::Difficulty(difficulty) => match self.work.get_mut(&network) {
                Some(work) if work.difficulty != difficulty || work.awaiting.is_some() => {
                    work.difficulty = difficulty;
                    work.awaiting = None;
                    Reaction::Restart
                }
                _ => Reaction::Continue,
            },
            Payload::Block(block) => {
                let Some(work) = self.work.get_mut(&network) else {
                    return Reaction::Continue;
                };
                let confirmed = work.awaiting.as_ref().is_some_and(|a| a.hash == block.hash);
                // Every relayed block is the node's new tip; only repeats of
                // what we already hold are stale.
                if !confirmed && (block.hash == work.tip.hash || block.hash == work.tip.previous_hash) {
                    return Reaction::Continue;
                }
                if confirmed {
                    debug!("Node accepted our {} block {}", network, block.hash);
                }
                work.awaiting = None;
                work.tip = block.clone();
                self.prune_pending(&block);
                Reaction::Restart
            }
            Payload::Transaction(tx) => {
                let pending = self.pending.entry(network).or_default();
                if !pending.iter().any(|p| p.id == tx.id) {
                    pending.push(tx);
                }
                Reaction::Continue
            }
            Payload::Exit => {
                self.state = MinerState::Closed;
                Reaction::Close
            }
            _ => Reaction::Continue,
        }
    }

    /// Network to mine next: one with pending transactions if any, otherwise
    /// the first network with known work. Networks waiting on an answer for a
    /// found block are skipped.
    pub fn pick_network(&self) -> Option<Network> {
        let ready = || {
            self.work
                .iter()
                .filter(|(_, work)| work.awaiting.is_none())
                .map(|(network, _)| *network)
        };
        ready()
            .find(|n| !self.pending(*n).is_empty())
            .or_else(|| ready().next())
    }

    /// Next block to mine; `None` before the first Welcome.
    pub fn next_template(&self, now: i64) -> Option<Block> {
        let network = self.pick_network()?;
        let work = self.work.get(&network)?;
        let timestamp = now.max(work.tip.timestamp);

        let mut transactions = vec![Transaction::reward(
            self.keypair.address(network),
            work.reward,
            timestamp,
            work.tip.index + 1,
        )];
        transactions.extend(self.pending(network).iter().cloned());

        Some(Block::new(
            network,
            work.tip.index + 1,
            work.tip.hash,
            timestamp,
            transactions,
            work.difficulty,
        ))
    }

    /// Records a block this client sent. The tip stays put until the node
    /// answers.
    pub fn on_found(&mut self, block: &Block) {
        if let Some(work) = self.work.get_mut(&block.network) {
            work.awaiting = Some(block.clone());
        }
    }

    fn prune_pending(&mut self, block: &Block) {
        let included: HashSet<Hash> = block.transactions.iter().map(|tx| tx.id).collect();
        if let Some(pending) = self.pending.get_mut(&block.network) {
            pending.retain(|tx| !included.contains(&tx.id));
        }
    }

    /// Connects to `addr` and mines until the node closes the connection.
    pub async fn run(&mut self, addr: &str, connect_timeout: Duration) -> Result<()> {
        self.state = MinerState::Opening;
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ChainError::NetworkError(format!("Connection to {} timed out", addr)))??;
        info!("⛏️  Miner connected to {}", addr);

        let (mut reader, mut writer) = stream.into_split();
        let (inbound_tx, mut inbound) = mpsc::channel::<Message>(256);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Frame::Message(message)) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(Frame::Undecodable(reason)) => warn!("Dropped undecodable frame: {}", reason),
                    Ok(Frame::Closed) | Err(_) => break,
                }
            }
        });

        let mut search_task: Option<(CancelToken, JoinHandle<Option<MiningReport>>)> = None;
        let result = loop {
            if search_task.is_none() && self.state != MinerState::Opening {
                if let Some(template) = self.next_template(unix_now()) {
                    debug!(
                        "Mining {} block {} at difficulty {}",
                        template.network, template.index, template.difficulty
                    );
                    let cancel = CancelToken::new();
                    let token = cancel.clone();
                    let workers = self.workers;
                    let handle =
                        tokio::task::spawn_blocking(move || search(&template, &token, workers));
                    search_task = Some((cancel, handle));
                    self.state = MinerState::Running;
                } else {
                    self.state = MinerState::Waiting;
                }
            }

            tokio::select! {
                inbound = inbound.recv() => {
                    let Some(message) = inbound else {
                        break Ok(());
                    };
                    match self.on_message(message) {
                        Reaction::Continue => {}
                        Reaction::Restart => stop_search(&mut search_task).await,
                        Reaction::Close => break Ok(()),
                    }
                }
                found = join_search(&mut search_task) => {
                    search_task = None;
                    self.state = MinerState::Waiting;
                    let Some(report) = found else {
                        continue;
                    };
                    info!(
                        "💎 Found {} block {} at height {} ({} hashes, {:.0} H/s)",
                        report.block.network,
                        report.block.hash,
                        report.block.index,
                        report.hashes,
                        report.hash_rate()
                    );
                    let message = Message::new(report.block.network, Payload::Block(report.block.clone()));
                    if let Err(e) = write_message(&mut writer, &message).await {
                        break Err(e);
                    }
                    self.on_found(&report.block);
                }
            }
        };

        stop_search(&mut search_task).await;
        reader_task.abort();
        self.state = MinerState::Closed;
        info!("Miner disconnected from {}", addr);
        result
    }
}

async fn stop_search(task: &mut Option<(CancelToken, JoinHandle<Option<MiningReport>>)>) {
    if let Some((cancel, handle)) = task.take() {
        cancel.cancel();
        let _ = handle.await;
    }
}

/// Resolves when the running search ends; pends forever when none is running.
async fn join_search(task: &mut Option<(CancelToken, JoinHandle<Option<MiningReport>>)>) -> Option<MiningReport> {
    match task {
        Some((_, handle)) => handle.await.ok().flatten(),
        None => std::future::pending().await,
    }
}
