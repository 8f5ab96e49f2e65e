//! The consensus task.
//!
//! A single blocking task owns every [`Blockchain`] the node serves and is the
//! only writer of chain state. Everything else (peer connections, the HTTP
//! API, miners) talks to it through a [`ChainHandle`], and learns about
//! accepted blocks and announced transactions from its event broadcast.

use crate::blockchain::Block;
use crate::consensus::{unix_now, BlockDecision, Blockchain, ChainSnapshot};
use crate::crypto::Address;
use crate::error::{ChainError, Result};
use crate::hash::Hash;
use crate::network::peer::PeerId;
use crate::params::Network;
use crate::transaction::{Transaction, Utxo};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_QUEUE: usize = 1024;
const EVENT_QUEUE: usize = 1024;

/// Where a block or transaction entered the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Local,
    Peer {
        id: PeerId,
        relay_hosts: Vec<String>,
    },
}

impl Origin {
    pub fn peer_id(&self) -> Option<PeerId> {
        match self {
            Origin::Local => None,
            Origin::Peer { id, .. } => Some(*id),
        }
    }

    pub fn relay_hosts(&self) -> &[String] {
        match self {
            Origin::Local => &[],
            Origin::Peer { relay_hosts, .. } => relay_hosts,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChainEvent {
    BlockAccepted {
        network: Network,
        block: Block,
        origin: Origin,
    },
    TransactionAnnounced {
        network: Network,
        transaction: Transaction,
        origin: Origin,
    },
}

impl ChainEvent {
    pub fn network(&self) -> Network {
        match self {
            ChainEvent::BlockAccepted { network, .. } => *network,
            ChainEvent::TransactionAnnounced { network, .. } => *network,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    SubmitBlock {
        network: Network,
        block: Block,
        origin: Origin,
        reply: Reply<BlockDecision>,
    },
    AnnounceTransaction {
        network: Network,
        transaction: Transaction,
        origin: Origin,
        reply: Reply<()>,
    },
    ForwardTransaction {
        network: Network,
        transaction: Transaction,
        origin: Origin,
        reply: Reply<()>,
    },
    Snapshot {
        network: Network,
        reply: Reply<ChainSnapshot>,
    },
    GetBlock {
        network: Network,
        hash: Hash,
        reply: Reply<Option<Block>>,
    },
    PartialChain {
        network: Network,
        start: u64,
        end: u64,
        reply: Reply<Vec<Block>>,
    },
    Utxos {
        network: Network,
        address: Address,
        reply: Reply<Vec<Utxo>>,
    },
    BlockTemplate {
        network: Network,
        beneficiary: Address,
        transactions: Vec<Transaction>,
        reply: Reply<Block>,
    },
}

pub struct ChainService {
    chains: HashMap<Network, Blockchain>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<ChainEvent>,
}

impl ChainService {
    /// Starts the consensus task on the blocking pool.
    pub fn spawn(chains: Vec<Blockchain>) -> (ChainHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);
        let mut networks: Vec<Network> = chains.iter().map(|c| c.network()).collect();
        networks.sort();

        let service = ChainService {
            chains: chains.into_iter().map(|c| (c.network(), c)).collect(),
            commands: command_rx,
            events: event_tx.clone(),
        };
        let task = tokio::task::spawn_blocking(move || service.run());

        let handle = ChainHandle {
            commands: command_tx,
            events: event_tx,
            networks,
        };
        (handle, task)
    }

    fn run(mut self) {
        info!("Consensus task serving {} network(s)", self.chains.len());
        while let Some(command) = self.commands.blocking_recv() {
            self.handle(command);
        }
        info!("Consensus task stopped");
    }

    fn chain(&self, network: Network) -> Result<&Blockchain> {
        self.chains
            .get(&network)
            .ok_or_else(|| ChainError::UnsupportedNetwork(network.to_string()))
    }

    fn chain_mut(&mut self, network: Network) -> Result<&mut Blockchain> {
        self.chains
            .get_mut(&network)
            .ok_or_else(|| ChainError::UnsupportedNetwork(network.to_string()))
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::SubmitBlock {
                network,
                block,
                origin,
                reply,
            } => {
                let result = self.submit_block(network, block, origin);
                let _ = reply.send(result);
            }
            Command::AnnounceTransaction {
                network,
                transaction,
                origin,
                reply,
            } => {
                let result = self.announce_transaction(network, transaction, origin);
                let _ = reply.send(result);
            }
            Command::ForwardTransaction {
                network,
                transaction,
                origin,
                reply,
            } => {
                let result = self.forward_transaction(network, transaction, origin);
                let _ = reply.send(result);
            }
            Command::Snapshot { network, reply } => {
                let _ = reply.send(self.chain(network).and_then(|c| c.snapshot()));
            }
            Command::GetBlock {
                network,
                hash,
                reply,
            } => {
                let _ = reply.send(self.chain(network).and_then(|c| c.get_block(&hash)));
            }
            Command::PartialChain {
                network,
                start,
                end,
                reply,
            } => {
                let _ = reply.send(
                    self.chain(network)
                        .and_then(|c| c.get_partial_chain(start, end)),
                );
            }
            Command::Utxos {
                network,
                address,
                reply,
            } => {
                let _ = reply.send(
                    self.chain(network)
                        .and_then(|c| c.utxos_for_address(&address)),
                );
            }
            Command::BlockTemplate {
                network,
                beneficiary,
                transactions,
                reply,
            } => {
                let _ = reply.send(
                    self.chain(network)
                        .and_then(|c| c.block_template(beneficiary, transactions, unix_now())),
                );
            }
        }
    }

    fn submit_block(&mut self, network: Network, block: Block, origin: Origin) -> Result<BlockDecision> {
        let now = unix_now();
        let chain = self.chain_mut(network)?;
        let hash = block.hash;
        let copy = block.clone();
        let decision = chain.submit_block(block, now)?;

        let adopted = if decision.is_linked() {
            chain.connect_orphans(&hash, now)?
        } else {
            Vec::new()
        };

        if decision.is_accepted() {
            self.emit(ChainEvent::BlockAccepted {
                network,
                block: copy,
                origin,
            });
        } else {
            debug!("{} block {} from {:?}: {:?}", network, hash, origin, decision);
        }
        for block in adopted {
            self.emit(ChainEvent::BlockAccepted {
                network,
                block,
                origin: Origin::Local,
            });
        }
        Ok(decision)
    }

    fn announce_transaction(
        &mut self,
        network: Network,
        transaction: Transaction,
        origin: Origin,
    ) -> Result<()> {
        self.chain(network)?.validate_transaction(&transaction)?;
        self.emit(ChainEvent::TransactionAnnounced {
            network,
            transaction,
            origin,
        });
        Ok(())
    }

    /// Publishes a peer's transaction whether or not it validates here. The
    /// local verdict only feeds the log.
    fn forward_transaction(
        &mut self,
        network: Network,
        transaction: Transaction,
        origin: Origin,
    ) -> Result<()> {
        if let Err(e) = self.chain(network)?.validate_transaction(&transaction) {
            debug!(
                "Forwarding {} transaction {} from {:?} that fails locally: {}",
                network, transaction.id, origin, e
            );
        }
        self.emit(ChainEvent::TransactionAnnounced {
            network,
            transaction,
            origin,
        });
        Ok(())
    }

    fn emit(&self, event: ChainEvent) {
        // No subscribers is not an error.
        if self.events.send(event).is_err() {
            debug!("Chain event dropped: no subscribers");
        }
    }
}

/// Cloneable access to the consensus task.
#[derive(Clone)]
pub struct ChainHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ChainEvent>,
    networks: Vec<Network>,
}

impl ChainHandle {
    /// Networks served by the consensus task, in table order.
    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(build(tx)).await.is_err() {
            warn!("Consensus task is gone");
            return Err(ChainError::ServiceUnavailable);
        }
        rx.await.map_err(|_| ChainError::ServiceUnavailable)?
    }

    pub async fn submit_block(&self, network: Network, block: Block, origin: Origin) -> Result<BlockDecision> {
        self.request(|reply| Command::SubmitBlock {
            network,
            block,
            origin,
            reply,
        })
        .await
    }

    /// Validates `transaction` against the canonical UTXO set and, if valid,
    /// publishes it to subscribers.
    pub async fn announce_transaction(
        &self,
        network: Network,
        transaction: Transaction,
        origin: Origin,
    ) -> Result<()> {
        self.request(|reply| Command::AnnounceTransaction {
            network,
            transaction,
            origin,
            reply,
        })
        .await
    }

    /// Publishes `transaction` for relay. Fails only when `network` is not
    /// served.
    pub async fn forward_transaction(
        &self,
        network: Network,
        transaction: Transaction,
        origin: Origin,
    ) -> Result<()> {
        self.request(|reply| Command::ForwardTransaction {
            network,
            transaction,
            origin,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self, network: Network) -> Result<ChainSnapshot> {
        self.request(|reply| Command::Snapshot { network, reply }).await
    }

    pub async fn block(&self, network: Network, hash: Hash) -> Result<Option<Block>> {
        self.request(|reply| Command::GetBlock {
            network,
            hash,
            reply,
        })
        .await
    }

    pub async fn partial_chain(&self, network: Network, start: u64, end: u64) -> Result<Vec<Block>> {
        self.request(|reply| Command::PartialChain {
            network,
            start,
            end,
            reply,
        })
        .await
    }

    pub async fn utxos_for(&self, network: Network, address: Address) -> Result<Vec<Utxo>> {
        self.request(|reply| Command::Utxos {
            network,
            address,
            reply,
        })
        .await
    }

    /// Unmined block on the current tip, rewarding `beneficiary`.
    pub async fn block_template(
        &self,
        network: Network,
        beneficiary: Address,
        transactions: Vec<Transaction>,
    ) -> Result<Block> {
        self.request(|reply| Command::BlockTemplate {
            network,
            beneficiary,
            transactions,
            reply,
        })
        .await
    }
}
