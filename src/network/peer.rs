//! Registry of live peer connections owned by one node.

use crate::network::message::Message;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type PeerId = u64;

/// Outbound messages a peer's writer task may buffer before sends fail.
pub const OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    /// Host name as it appears in relay host lists.
    pub host: String,
    pub connected_at: Instant,
}

struct PeerEntry {
    info: PeerInfo,
    outbound: mpsc::Sender<Message>,
}

pub struct PeerRegistry {
    max_peers: usize,
    next_id: AtomicU64,
    peers: RwLock<HashMap<PeerId, PeerEntry>>,
}

impl PeerRegistry {
    pub fn new(max_peers: usize) -> Self {
        PeerRegistry {
            max_peers,
            next_id: AtomicU64::new(1),
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Admits a connection and hands back the receiving end of its outbound
    /// queue. Returns `None` when the registry is full.
    pub fn try_register(&self, addr: SocketAddr) -> Option<(PeerInfo, mpsc::Receiver<Message>)> {
        let mut peers = self.peers.write();
        if peers.len() >= self.max_peers {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = PeerInfo {
            id,
            addr,
            host: addr.ip().to_string(),
            connected_at: Instant::now(),
        };
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        peers.insert(
            id,
            PeerEntry {
                info: info.clone(),
                outbound: tx,
            },
        );
        debug!("Registered peer {} ({})", id, addr);
        Some((info, rx))
    }

    pub fn remove(&self, id: PeerId) -> Option<PeerInfo> {
        self.peers.write().remove(&id).map(|entry| entry.info)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: PeerId) -> Option<PeerInfo> {
        self.peers.read().get(&id).map(|entry| entry.info.clone())
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().values().map(|entry| entry.info.clone()).collect()
    }

    /// Queues `message` for one peer. Returns false if the peer is gone or its
    /// queue is full.
    pub fn send(&self, id: PeerId, message: Message) -> bool {
        let peers = self.peers.read();
        let Some(entry) = peers.get(&id) else {
            return false;
        };
        match entry.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(m)) => {
                warn!("Outbound queue full for peer {}, dropped {}", id, m.kind());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Sends `message` to every peer except `origin` and any peer whose host
    /// already appears in the message's relay hosts. Returns the number of
    /// peers it was queued for.
    pub fn relay(&self, message: &Message, origin: Option<PeerId>) -> usize {
        let targets: Vec<PeerId> = self
            .peers
            .read()
            .values()
            .filter(|entry| Some(entry.info.id) != origin)
            .filter(|entry| !message.has_relayed_through(&entry.info.host))
            .map(|entry| entry.info.id)
            .collect();

        targets
            .into_iter()
            .filter(|id| self.send(*id, message.clone()))
            .count()
    }

    pub fn broadcast(&self, message: &Message) -> usize {
        self.relay(message, None)
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::Payload;
    use crate::params::Network;

    fn addr(last: u8, port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, last], port))
    }

    #[test]
    fn test_registry_enforces_capacity() {
        let registry = PeerRegistry::new(2);
        let (a, _rx_a) = registry.try_register(addr(1, 1000)).unwrap();
        let _b = registry.try_register(addr(2, 1000)).unwrap();
        assert!(registry.try_register(addr(3, 1000)).is_none());

        registry.remove(a.id);
        assert!(registry.try_register(addr(3, 1000)).is_some());
    }

    #[test]
    fn test_relay_skips_origin_and_visited_hosts() {
        let registry = PeerRegistry::new(10);
        let (origin, mut rx_origin) = registry.try_register(addr(1, 1000)).unwrap();
        let (_visited, mut rx_visited) = registry.try_register(addr(2, 1000)).unwrap();
        let (_fresh, mut rx_fresh) = registry.try_register(addr(3, 1000)).unwrap();

        let mut msg = Message::new(Network::Test, Payload::Ping);
        msg.add_relay_host("127.0.0.2");

        assert_eq!(registry.relay(&msg, Some(origin.id)), 1);
        assert!(rx_origin.try_recv().is_err());
        assert!(rx_visited.try_recv().is_err());
        assert_eq!(rx_fresh.try_recv().unwrap(), msg);
    }

    #[test]
    fn test_send_to_departed_peer() {
        let registry = PeerRegistry::new(10);
        let (info, rx) = registry.try_register(addr(1, 1000)).unwrap();
        drop(rx);
        assert!(!registry.send(info.id, Message::new(Network::Test, Payload::Ping)));
        registry.remove(info.id);
        assert!(!registry.send(info.id, Message::new(Network::Test, Payload::Ping)));
    }
}
