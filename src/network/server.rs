//! TCP transport for the relay protocol.
//!
//! Each connection gets a reader loop and a writer task fed by the peer's
//! outbound queue in the [`PeerRegistry`]. One task relays accepted blocks and
//! announced transactions from the consensus task; another sends heartbeats.

use crate::error::{ChainError, Result};
use crate::network::message::{read_frame, write_message, Frame, Message, Payload};
use crate::network::peer::{PeerInfo, PeerRegistry};
use crate::network::relay::{Outbound, RelayProtocol};
use crate::service::ChainEvent;
use crate::sync::SyncTracker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct NetworkServer {
    registry: Arc<PeerRegistry>,
    protocol: Arc<RelayProtocol>,
    sync: Arc<SyncTracker>,
    heartbeat: Duration,
    connect_timeout: Duration,
}

impl NetworkServer {
    pub fn new(
        registry: Arc<PeerRegistry>,
        protocol: Arc<RelayProtocol>,
        sync: Arc<SyncTracker>,
        heartbeat: Duration,
        connect_timeout: Duration,
    ) -> Self {
        NetworkServer {
            registry,
            protocol,
            sync,
            heartbeat,
            connect_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Accepts connections until the listener fails.
    pub async fn listen(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("🌐 Listening for peers on {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.serve(stream, addr).await;
            });
        }
    }

    /// Dials `addr` and serves the connection in the background.
    pub async fn connect(self: Arc<Self>, addr: &str) -> Result<JoinHandle<()>> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ChainError::NetworkError(format!("Connection to {} timed out", addr)))??;
        let peer_addr = stream.peer_addr()?;
        info!("Connected to peer {}", peer_addr);
        let server = Arc::clone(&self);
        Ok(tokio::spawn(async move {
            server.serve(stream, peer_addr).await;
        }))
    }

    /// Relays accepted blocks and announced transactions to peers.
    pub fn spawn_relay(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.protocol.chain().subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.relay_event(event),
                    Err(RecvError::Lagged(n)) => warn!("Relay fell behind by {} events", n),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn spawn_heartbeat(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.heartbeat);
            interval.tick().await;
            loop {
                interval.tick().await;
                for &network in self.protocol.networks() {
                    self.registry.broadcast(&Message::new(network, Payload::Ping));
                }
            }
        })
    }

    fn relay_event(&self, event: ChainEvent) {
        let (network, payload, origin) = match event {
            ChainEvent::BlockAccepted {
                network,
                block,
                origin,
            } => (network, Payload::Block(block), origin),
            ChainEvent::TransactionAnnounced {
                network,
                transaction,
                origin,
            } => (network, Payload::Transaction(transaction), origin),
        };

        let host = self.protocol.host();
        if origin.relay_hosts().iter().any(|h| h == host) {
            debug!("Not relaying {} message that already passed through {}", network, host);
            return;
        }
        let mut message = Message::new(network, payload);
        message.relay_hosts = origin.relay_hosts().to_vec();
        message.add_relay_host(host);
        let sent = self.registry.relay(&message, origin.peer_id());
        debug!("Relayed {} to {} peer(s)", message, sent);
    }

    async fn serve(self: Arc<Self>, mut stream: TcpStream, addr: SocketAddr) {
        let Some((peer, mut outbound)) = self.registry.try_register(addr) else {
            warn!("Peer limit reached, turning away {}", addr);
            if let Some(&network) = self.protocol.networks().first() {
                let _ = write_message(&mut stream, &Message::new(network, Payload::Exit)).await;
            }
            return;
        };
        info!("🤝 Peer {} connected from {}", peer.id, addr);

        let (mut reader, mut writer) = stream.into_split();
        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(e) = write_message(&mut writer, &message).await {
                    debug!("Write to {} failed: {}", addr, e);
                    break;
                }
            }
        });

        match self.protocol.welcomes().await {
            Ok(welcomes) => {
                for welcome in welcomes {
                    self.registry.send(peer.id, welcome);
                }
            }
            Err(e) => error!("Could not build welcome for peer {}: {}", peer.id, e),
        }

        loop {
            let message = match read_frame(&mut reader).await {
                Ok(Frame::Message(message)) => message,
                Ok(Frame::Undecodable(reason)) => {
                    warn!("Dropped undecodable frame from peer {}: {}", peer.id, reason);
                    continue;
                }
                Ok(Frame::Closed) => break,
                Err(e) => {
                    warn!("Evicting peer {}: {}", peer.id, e);
                    break;
                }
            };

            if !self.apply(&peer, self.protocol.handle(&peer, message).await) {
                break;
            }
        }

        self.registry.remove(peer.id);
        self.sync.remove_peer(peer.id).await;
        writer_task.abort();
        info!("Peer {} disconnected", peer.id);
    }

    /// Returns false when the connection should close.
    fn apply(&self, peer: &PeerInfo, outbound: Vec<Outbound>) -> bool {
        for out in outbound {
            match out {
                Outbound::Reply(message) => {
                    self.registry.send(peer.id, message);
                }
                Outbound::To(id, message) => {
                    self.registry.send(id, message);
                }
                Outbound::Relay(message) => {
                    self.registry.relay(&message, Some(peer.id));
                }
                Outbound::Disconnect => return false,
            }
        }
        true
    }
}
