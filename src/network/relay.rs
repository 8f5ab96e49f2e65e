//! Message handling for a relay node.
//!
//! [`RelayProtocol::handle`] turns one inbound message into the messages the
//! connection layer should send. Blocks and transactions reach other peers
//! through the consensus task's event stream. Only accepted blocks are
//! relayed; peer transactions are relayed whatever their local verdict.
//!
//! The sender of a block always hears back. An accepted block is echoed to
//! it, and a rejected one is answered with a Welcome carrying the current
//! tip, so a miner never builds on a block the node did not take.

use crate::consensus::{unix_now, BlockDecision, ChainSnapshot, IgnoreReason, Rejection};
use crate::crypto::KeyPair;
use crate::error::{ChainError, Result};
use crate::miner::mine_block;
use crate::network::message::{Message, Payload, Welcome};
use crate::network::peer::{PeerId, PeerInfo};
use crate::params::Network;
use crate::service::{ChainHandle, Origin};
use crate::sync::SyncTracker;
use crate::transaction::Transaction;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the connection layer should do after handling a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send back to the peer that sent the message.
    Reply(Message),
    /// Send to a specific peer.
    To(PeerId, Message),
    /// Forward to every other eligible peer.
    Relay(Message),
    Disconnect,
}

pub struct RelayProtocol {
    chain: ChainHandle,
    sync: Arc<SyncTracker>,
    host: String,
    beneficiary: Option<KeyPair>,
}

impl RelayProtocol {
    /// `host` is this node's name in relay host lists. Self-mined blocks pay
    /// the `beneficiary` key's address, or the network's charity address when
    /// unset.
    pub fn new(
        chain: ChainHandle,
        sync: Arc<SyncTracker>,
        host: impl Into<String>,
        beneficiary: Option<KeyPair>,
    ) -> Self {
        RelayProtocol {
            chain,
            sync,
            host: host.into(),
            beneficiary,
        }
    }

    pub fn networks(&self) -> &[Network] {
        self.chain.networks()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn chain(&self) -> &ChainHandle {
        &self.chain
    }

    /// One Welcome per served network.
    pub async fn welcomes(&self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        for &network in self.networks() {
            let snapshot = self.chain.snapshot(network).await?;
            messages.push(welcome_message(&snapshot));
        }
        Ok(messages)
    }

    pub async fn handle(&self, peer: &PeerInfo, message: Message) -> Vec<Outbound> {
        if !message.is_supported(self.networks()) {
            warn!("Dropped unsupported {} from peer {}", message, peer.id);
            return Vec::new();
        }
        debug!("Peer {} -> {}", peer.id, message);

        match self.dispatch(peer, message).await {
            Ok(out) => out,
            Err(e) => {
                warn!("Failed handling message from peer {}: {}", peer.id, e);
                Vec::new()
            }
        }
    }

    async fn dispatch(&self, peer: &PeerInfo, message: Message) -> Result<Vec<Outbound>> {
        let network = message.network;
        let origin = Origin::Peer {
            id: peer.id,
            relay_hosts: message.relay_hosts.clone(),
        };

        match message.payload {
            Payload::Welcome(welcome) => self.on_welcome(peer, network, welcome).await,
            Payload::Block(block) => {
                let echo = block.clone();
                let decision = self.chain.submit_block(network, block, origin).await?;
                match decision {
                    BlockDecision::Accepted => {
                        Ok(vec![Outbound::Reply(Message::new(network, Payload::Block(echo)))])
                    }
                    BlockDecision::Rejected(Rejection::Invalid(_) | Rejection::Lighter) => {
                        let snapshot = self.chain.snapshot(network).await?;
                        Ok(vec![Outbound::Reply(welcome_message(&snapshot))])
                    }
                    other => Ok(decision_reply(network, &other).into_iter().collect()),
                }
            }
            Payload::Transaction(tx) => self.on_transaction(network, tx, origin).await,
            Payload::PartialChainRequest { start, end } => {
                match self.chain.partial_chain(network, start, end).await {
                    Ok(blocks) => Ok(vec![Outbound::Reply(Message::new(
                        network,
                        Payload::PartialChain(blocks),
                    ))]),
                    Err(ChainError::RangeUnavailable { .. }) => Ok(self
                        .forward(network, Payload::PartialChainRequest { start, end }, message.relay_hosts)
                        .into_iter()
                        .collect()),
                    Err(e) => Err(e),
                }
            }
            Payload::PartialChain(blocks) => self.on_partial_chain(peer, network, blocks).await,
            Payload::BlockRequest(hash) => match self.chain.block(network, hash).await? {
                Some(block) => Ok(vec![Outbound::Reply(Message::new(network, Payload::Block(block)))]),
                None => Ok(self
                    .forward(network, Payload::BlockRequest(hash), message.relay_hosts)
                    .into_iter()
                    .collect()),
            },
            Payload::UtxoRequest(address) => {
                let utxos = self.chain.utxos_for(network, address).await?;
                Ok(vec![Outbound::Reply(Message::new(network, Payload::Utxo(utxos)))])
            }
            Payload::Difficulty(theirs) => {
                let ours = self.chain.snapshot(network).await?.difficulty;
                if theirs < ours {
                    Ok(vec![Outbound::Reply(Message::new(network, Payload::Difficulty(ours)))])
                } else {
                    Ok(Vec::new())
                }
            }
            Payload::Utxo(_) | Payload::Ping => Ok(Vec::new()),
            Payload::Exit => {
                info!("Peer {} said goodbye", peer.id);
                Ok(vec![Outbound::Disconnect])
            }
        }
    }

    async fn on_welcome(&self, peer: &PeerInfo, network: Network, welcome: Welcome) -> Result<Vec<Outbound>> {
        let local = self.chain.snapshot(network).await?.height;
        let peer_height = welcome.latest_block.index;

        if peer_height == local + 1 {
            let origin = Origin::Peer {
                id: peer.id,
                relay_hosts: Vec::new(),
            };
            let decision = self
                .chain
                .submit_block(network, welcome.latest_block, origin)
                .await?;
            return Ok(decision_reply(network, &decision).into_iter().collect());
        }

        if peer_height > local + 1 {
            if let Some(request) = self.sync.next_request(network, peer.id, peer_height, local).await {
                return Ok(vec![Outbound::Reply(Message::new(
                    network,
                    Payload::PartialChainRequest {
                        start: request.start,
                        end: request.end,
                    },
                ))]);
            }
        } else {
            self.sync.observe_peer(network, peer.id, peer_height).await;
        }
        Ok(Vec::new())
    }

    async fn on_partial_chain(
        &self,
        peer: &PeerInfo,
        network: Network,
        blocks: Vec<crate::blockchain::Block>,
    ) -> Result<Vec<Outbound>> {
        let received = blocks.len();
        let mut accepted = 0usize;
        for block in blocks {
            let origin = Origin::Peer {
                id: peer.id,
                relay_hosts: Vec::new(),
            };
            match self.chain.submit_block(network, block, origin).await? {
                BlockDecision::Accepted => accepted += 1,
                BlockDecision::Ignored(IgnoreReason::Duplicate) => {}
                other => debug!("Partial chain block from peer {}: {:?}", peer.id, other),
            }
        }

        let local = self.chain.snapshot(network).await?.height;
        info!(
            "{} sync: {} of {} blocks accepted from peer {}, height {}",
            network, accepted, received, peer.id, local
        );

        let Some((ahead, height)) = self.sync.complete_request(network, local).await else {
            return Ok(Vec::new());
        };
        let Some(request) = self.sync.next_request(network, ahead, height, local).await else {
            return Ok(Vec::new());
        };
        let message = Message::new(
            network,
            Payload::PartialChainRequest {
                start: request.start,
                end: request.end,
            },
        );
        Ok(vec![if ahead == peer.id {
            Outbound::Reply(message)
        } else {
            Outbound::To(ahead, message)
        }])
    }

    async fn on_transaction(&self, network: Network, tx: Transaction, origin: Origin) -> Result<Vec<Outbound>> {
        let snapshot = self.chain.snapshot(network).await?;
        let threshold = network.params().max_internal_mine_difficulty;

        if snapshot.difficulty > threshold {
            self.chain.forward_transaction(network, tx, origin).await?;
            return Ok(Vec::new());
        }

        let beneficiary = self
            .beneficiary
            .as_ref()
            .map_or_else(|| network.charity_address(), |key| key.address(network));
        let tx_id = tx.id;
        let template = self.chain.block_template(network, beneficiary, vec![tx]).await?;
        let block = tokio::task::spawn_blocking(move || mine_block(template))
            .await
            .map_err(|e| ChainError::NetworkError(format!("mining task failed: {}", e)))??;
        let decision = self.chain.submit_block(network, block, Origin::Local).await?;
        info!("⛏️  Self-mined transaction {} on {}: {:?}", tx_id, network, decision);
        Ok(Vec::new())
    }

    /// Relay of a request this node cannot answer, unless it already passed here.
    fn forward(&self, network: Network, payload: Payload, relay_hosts: Vec<String>) -> Option<Outbound> {
        if relay_hosts.iter().any(|h| h == &self.host) {
            return None;
        }
        let mut message = Message::new(network, payload);
        message.relay_hosts = relay_hosts;
        message.add_relay_host(self.host.clone());
        Some(Outbound::Relay(message))
    }
}

pub fn welcome_message(snapshot: &ChainSnapshot) -> Message {
    Message::new(
        snapshot.network,
        Payload::Welcome(Welcome {
            timestamp: unix_now(),
            difficulty: snapshot.difficulty,
            reward: snapshot.reward,
            latest_block: snapshot.latest_block.clone(),
        }),
    )
}

/// Reply owed to the sender of a block.
fn decision_reply(network: Network, decision: &BlockDecision) -> Option<Outbound> {
    match decision {
        BlockDecision::Rejected(Rejection::InsufficientDifficulty { required }) => Some(
            Outbound::Reply(Message::new(network, Payload::Difficulty(*required))),
        ),
        BlockDecision::Ignored(IgnoreReason::Orphan { missing_parent }) => Some(Outbound::Reply(
            Message::new(network, Payload::BlockRequest(*missing_parent)),
        )),
        _ => None,
    }
}
