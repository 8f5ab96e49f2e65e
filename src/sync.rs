//! Chain synchronisation bookkeeping.
//!
//! Tracks the heights peers advertise and the partial-chain request in flight
//! per network, so a node that learns it is behind asks for each missing range
//! exactly once.

use crate::network::peer::PeerId;
use crate::params::Network;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Largest range requested in one `PartialChainRequest`.
pub const MAX_SYNC_BATCH: u64 = 256;
/// An unanswered request older than this may be reissued.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Peer sync information
#[derive(Debug, Clone)]
pub struct PeerSyncInfo {
    pub height: u64,
    pub last_seen: Instant,
}

/// Sync state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub peer: PeerId,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone)]
struct Outstanding {
    request: RangeRequest,
    issued_at: Instant,
}

impl Outstanding {
    fn is_stale(&self) -> bool {
        self.issued_at.elapsed() > REQUEST_TIMEOUT
    }
}

#[derive(Default)]
pub struct SyncTracker {
    peers: RwLock<HashMap<(Network, PeerId), PeerSyncInfo>>,
    outstanding: RwLock<HashMap<Network, Outstanding>>,
    states: RwLock<HashMap<Network, SyncState>>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the height a peer advertised.
    pub async fn observe_peer(&self, network: Network, peer: PeerId, height: u64) {
        let mut peers = self.peers.write().await;
        let entry = peers.entry((network, peer)).or_insert(PeerSyncInfo {
            height,
            last_seen: Instant::now(),
        });
        entry.height = entry.height.max(height);
        entry.last_seen = Instant::now();
    }

    /// Highest height any peer advertised on `network`, with that peer.
    pub async fn best_peer(&self, network: Network) -> Option<(PeerId, u64)> {
        self.peers
            .read()
            .await
            .iter()
            .filter(|((n, _), _)| *n == network)
            .max_by_key(|(_, info)| info.height)
            .map(|((_, peer), info)| (*peer, info.height))
    }

    /// Range to request from `peer` when it is ahead of `local_height`.
    ///
    /// Returns `None` when the peer is not ahead or another request on this
    /// network is still in flight.
    pub async fn next_request(
        &self,
        network: Network,
        peer: PeerId,
        peer_height: u64,
        local_height: u64,
    ) -> Option<RangeRequest> {
        self.observe_peer(network, peer, peer_height).await;
        if peer_height <= local_height {
            return None;
        }

        let mut outstanding = self.outstanding.write().await;
        if let Some(current) = outstanding.get(&network) {
            if !current.is_stale() {
                debug!(
                    "{} sync: {}..={} already requested from peer {}",
                    network, current.request.start, current.request.end, current.request.peer
                );
                return None;
            }
        }

        let start = local_height + 1;
        let end = peer_height.min(local_height + MAX_SYNC_BATCH);
        let request = RangeRequest { peer, start, end };
        outstanding.insert(
            network,
            Outstanding {
                request,
                issued_at: Instant::now(),
            },
        );
        self.states.write().await.insert(network, SyncState::Syncing);
        info!("🔄 {} sync: requesting {}..={} from peer {}", network, start, end, peer);
        Some(request)
    }

    /// Clears the request in flight on `network` and returns the peer that is
    /// still ahead of `local_height`, if any.
    pub async fn complete_request(&self, network: Network, local_height: u64) -> Option<(PeerId, u64)> {
        self.outstanding.write().await.remove(&network);
        let ahead = self
            .best_peer(network)
            .await
            .filter(|(_, height)| *height > local_height);
        let state = if ahead.is_some() {
            SyncState::Syncing
        } else {
            SyncState::Synced
        };
        self.states.write().await.insert(network, state);
        ahead
    }

    pub async fn outstanding(&self, network: Network) -> Option<RangeRequest> {
        self.outstanding
            .read()
            .await
            .get(&network)
            .map(|o| o.request)
    }

    pub async fn state(&self, network: Network) -> SyncState {
        self.states
            .read()
            .await
            .get(&network)
            .copied()
            .unwrap_or(SyncState::Idle)
    }

    /// Forgets a departed peer and any request it owed us.
    pub async fn remove_peer(&self, peer: PeerId) {
        self.peers.write().await.retain(|(_, p), _| *p != peer);
        self.outstanding
            .write()
            .await
            .retain(|_, o| o.request.peer != peer);
    }
}
