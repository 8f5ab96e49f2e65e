//! Relay node orchestration: stores, consensus task, peer server and API.

use crate::config::Config;
use crate::consensus::Blockchain;
use crate::crypto::KeyPair;
use crate::error::{ChainError, Result};
use crate::network::{NetworkServer, PeerRegistry, RelayProtocol};
use crate::params::Network;
use crate::persistence::{ChainStore, Database, InMemoryStore};
use crate::script::PredicateEngine;
use crate::service::{ChainHandle, ChainService};
use crate::sync::{SyncState, SyncTracker};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Syncing,
    Ready,
    /// The consensus task has stopped.
    Degraded,
}

pub struct Node {
    pub config: Config,
    pub chain: ChainHandle,
    pub sync: Arc<SyncTracker>,
    pub server: Arc<NetworkServer>,
    pub state: Arc<RwLock<NodeState>>,
    consensus: JoinHandle<()>,
}

impl Node {
    /// Opens one store per enabled network and starts the consensus task.
    pub fn init(config: Config) -> Result<Self> {
        config.validate()?;
        let networks = config.network.enabled_networks()?;
        info!(
            "Starting tokhn node on {}",
            networks.iter().map(|n| n.name()).collect::<Vec<_>>().join(", ")
        );

        let mut chains = Vec::with_capacity(networks.len());
        for &network in &networks {
            let store = open_store(&config, network)?;
            chains.push(Blockchain::open(network, store, Arc::new(PredicateEngine))?);
        }
        let (chain, consensus) = ChainService::spawn(chains);

        let beneficiary = match &config.miner.beneficiary_key_file {
            Some(path) => Some(KeyPair::from_secret_hex(&fs::read_to_string(path)?)?),
            None => None,
        };

        let sync = Arc::new(SyncTracker::new());
        let registry = Arc::new(PeerRegistry::new(config.network.max_peers));
        let protocol = Arc::new(RelayProtocol::new(
            chain.clone(),
            Arc::clone(&sync),
            config.network.public_host.clone(),
            beneficiary,
        ));
        let server = Arc::new(NetworkServer::new(
            registry,
            protocol,
            Arc::clone(&sync),
            config.network.heartbeat(),
            config.network.connect_timeout(),
        ));

        Ok(Node {
            config,
            chain,
            sync,
            server,
            state: Arc::new(RwLock::new(NodeState::Booting)),
            consensus,
        })
    }

    /// Binds the peer port, dials configured peers and serves until the
    /// listener fails.
    pub async fn start(self) -> Result<()> {
        let Node {
            config,
            chain,
            sync,
            server,
            state,
            consensus,
        } = self;

        let listen = format!("0.0.0.0:{}", config.network.listen_port);
        let listener = TcpListener::bind(&listen)
            .await
            .map_err(|e| ChainError::NetworkError(format!("P2P port {} unavailable: {}", listen, e)))?;

        Arc::clone(&server).spawn_relay();
        Arc::clone(&server).spawn_heartbeat();

        for peer in &config.network.peers {
            match Arc::clone(&server).connect(peer).await {
                Ok(_) => info!("Bootstrapped from {}", peer),
                Err(e) => warn!("Could not reach peer {}: {}", peer, e),
            }
        }

        #[cfg(feature = "api")]
        {
            let api = crate::api::ApiState::with_node_state(chain.clone(), Arc::clone(&state));
            let port = config.network.api_port;
            tokio::spawn(async move {
                if let Err(e) = crate::api::run_api_server(api, port).await {
                    error!("API server failed: {}", e);
                }
            });
        }

        *state.write().await = NodeState::Syncing;
        spawn_state_monitor(
            chain.networks().to_vec(),
            sync,
            state,
            consensus,
            config.network.heartbeat(),
        );

        let result = server.listen(listener).await;
        if let Err(e) = &result {
            error!("P2P listener failed: {}", e);
        }
        result
    }
}

/// Derives the node state from the sync tracker and the consensus task.
fn spawn_state_monitor(
    networks: Vec<Network>,
    sync: Arc<SyncTracker>,
    state: Arc<RwLock<NodeState>>,
    consensus: JoinHandle<()>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let next = if consensus.is_finished() {
                NodeState::Degraded
            } else {
                overall_state(&sync, &networks).await
            };
            let mut current = state.write().await;
            if *current != next {
                info!("Node state {:?} -> {:?}", *current, next);
                *current = next;
            }
        }
    })
}

async fn overall_state(sync: &SyncTracker, networks: &[Network]) -> NodeState {
    for &network in networks {
        if sync.state(network).await == SyncState::Syncing {
            return NodeState::Syncing;
        }
    }
    NodeState::Ready
}

fn open_store(config: &Config, network: Network) -> Result<Arc<dyn ChainStore>> {
    if config.database.in_memory {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    fs::create_dir_all(&config.database.path).map_err(|e| {
        ChainError::ConfigError(format!(
            "Failed to create data dir {}: {}",
            config.database.path.display(),
            e
        ))
    })?;
    let path = config.database.database_file(network);
    let path = path
        .to_str()
        .ok_or_else(|| ChainError::ConfigError(format!("Non UTF-8 database path {}", path.display())))?;
    Ok(Arc::new(Database::open(path)?))
}
