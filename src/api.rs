//! HTTP and WebSocket front end for the consensus task.
//!
//! Every route goes through a [`ChainHandle`], so requests are served by the
//! same single writer as peer traffic. Chain-scoped routes live under
//! `/api/:network/...` and name the network as in the parameter table.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{self, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::blockchain::Block;
use crate::consensus::BlockDecision;
use crate::crypto::Address;
use crate::error::{ChainError, Result};
use crate::hash::Hash;
use crate::network::relay::welcome_message;
use crate::network::Message;
use crate::node::NodeState;
use crate::params::Network;
use crate::service::{ChainEvent, ChainHandle, Origin};
use crate::transaction::{Transaction, Utxo};

/// Shared state of the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub chain: ChainHandle,
    /// Lifecycle of the owning node, when there is one.
    pub state: Option<Arc<RwLock<NodeState>>>,
}

impl ApiState {
    pub fn new(chain: ChainHandle) -> Self {
        ApiState { chain, state: None }
    }

    pub fn with_node_state(chain: ChainHandle, state: Arc<RwLock<NodeState>>) -> Self {
        ApiState {
            chain,
            state: Some(state),
        }
    }

    fn network(&self, name: &str) -> std::result::Result<Network, ApiError> {
        let network: Network = name.parse()?;
        if !self.chain.networks().contains(&network) {
            return Err(ApiError::NotFound(format!("Network {} is not served here", network)));
        }
        Ok(network)
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BlockchainError(ChainError),
    InvalidInput(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BlockchainError(e) => {
                let status = match &e {
                    ChainError::BlockNotFound(_) | ChainError::UnsupportedNetwork(_) => StatusCode::NOT_FOUND,
                    ChainError::InvalidBlock(_)
                    | ChainError::InvalidTransaction(_)
                    | ChainError::ScriptError(_)
                    | ChainError::CryptoError(_)
                    | ChainError::RangeUnavailable { .. } => StatusCode::BAD_REQUEST,
                    ChainError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::BlockchainError(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerType {
    Node,
    Miner,
    Client,
}

#[derive(Deserialize)]
pub struct WelcomeQuery {
    #[serde(default = "default_peer_type")]
    pub peer_type: PeerType,
}

fn default_peer_type() -> PeerType {
    PeerType::Client
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBlockResponse {
    pub hash: Hash,
    pub accepted: bool,
    pub decision: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTransactionResponse {
    pub id: Hash,
}

fn describe(decision: &BlockDecision) -> String {
    format!("{:?}", decision)
}

// ============================================================================
// API Server
// ============================================================================

pub fn build_api_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(vec![http::header::CONTENT_TYPE]);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/welcome", get(get_welcome))
        .route("/:network/blocks", post(submit_block))
        .route("/:network/blocks/:hash", get(get_block))
        .route("/:network/chain", get(get_partial_chain))
        .route("/:network/utxos/:address", get(get_utxos))
        .route("/:network/transactions", post(submit_transaction))
        .route("/:network/stream/blocks", get(stream_blocks))
        .route("/:network/stream/transactions", get(stream_transactions))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn run_api_server(state: ApiState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 API server listening on http://{}", addr);
    axum::serve(listener, build_api_router(state)).await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(api): State<ApiState>) -> impl IntoResponse {
    let node_state = match &api.state {
        Some(state) => *state.read().await,
        None => NodeState::Ready,
    };
    let (status, label) = if node_state == NodeState::Ready {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    (
        status,
        Json(serde_json::json!({
            "status": label,
            "node_state": format!("{:?}", node_state),
            "networks": api.chain.networks().iter().map(|n| n.name()).collect::<Vec<_>>(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn get_welcome(
    State(api): State<ApiState>,
    Query(query): Query<WelcomeQuery>,
) -> std::result::Result<Json<Vec<Message>>, ApiError> {
    info!("A {:?} just joined over HTTP", query.peer_type);
    let mut welcomes = Vec::new();
    for &network in api.chain.networks() {
        welcomes.push(welcome_message(&api.chain.snapshot(network).await?));
    }
    Ok(Json(welcomes))
}

async fn get_block(
    State(api): State<ApiState>,
    Path((network, hash)): Path<(String, String)>,
) -> std::result::Result<Json<Block>, ApiError> {
    let network = api.network(&network)?;
    let hash: Hash = hash
        .parse()
        .map_err(|e: ChainError| ApiError::InvalidInput(e.to_string()))?;
    api.chain
        .block(network, hash)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Block {} not found", hash)))
}

async fn get_partial_chain(
    State(api): State<ApiState>,
    Path(network): Path<String>,
    Query(range): Query<RangeQuery>,
) -> std::result::Result<Json<Vec<Block>>, ApiError> {
    let network = api.network(&network)?;
    Ok(Json(api.chain.partial_chain(network, range.start, range.end).await?))
}

async fn get_utxos(
    State(api): State<ApiState>,
    Path((network, address)): Path<(String, String)>,
) -> std::result::Result<Json<Vec<Utxo>>, ApiError> {
    let network = api.network(&network)?;
    let address: Address = address
        .parse()
        .map_err(|e: ChainError| ApiError::InvalidInput(e.to_string()))?;
    Ok(Json(api.chain.utxos_for(network, address).await?))
}

async fn submit_block(
    State(api): State<ApiState>,
    Path(network): Path<String>,
    Json(block): Json<Block>,
) -> std::result::Result<Json<SubmitBlockResponse>, ApiError> {
    let network = api.network(&network)?;
    let hash = block.hash;
    let decision = api.chain.submit_block(network, block, Origin::Local).await?;
    Ok(Json(SubmitBlockResponse {
        hash,
        accepted: decision.is_accepted(),
        decision: describe(&decision),
    }))
}

async fn submit_transaction(
    State(api): State<ApiState>,
    Path(network): Path<String>,
    Json(tx): Json<Transaction>,
) -> std::result::Result<Json<SubmitTransactionResponse>, ApiError> {
    let network = api.network(&network)?;
    let id = tx.id;
    api.chain.announce_transaction(network, tx, Origin::Local).await?;
    Ok(Json(SubmitTransactionResponse { id }))
}

// ============================================================================
// Push feeds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Blocks,
    Transactions,
}

async fn stream_blocks(
    State(api): State<ApiState>,
    Path(network): Path<String>,
    ws: WebSocketUpgrade,
) -> std::result::Result<Response, ApiError> {
    let network = api.network(&network)?;
    Ok(ws.on_upgrade(move |socket| run_feed(socket, api.chain, network, Feed::Blocks)))
}

async fn stream_transactions(
    State(api): State<ApiState>,
    Path(network): Path<String>,
    ws: WebSocketUpgrade,
) -> std::result::Result<Response, ApiError> {
    let network = api.network(&network)?;
    Ok(ws.on_upgrade(move |socket| run_feed(socket, api.chain, network, Feed::Transactions)))
}

/// Pushes matching chain events as JSON text frames and submits every
/// inbound text frame as a block or transaction.
async fn run_feed(mut socket: WebSocket, chain: ChainHandle, network: Network, feed: Feed) {
    let mut events = chain.subscribe();
    debug!("{:?} feed opened on {}", feed, network);
    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let text = match inbound {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                if let Err(e) = submit_frame(&chain, network, feed, &text).await {
                    warn!("{:?} feed on {}: dropped inbound frame: {}", feed, network, e);
                }
            }
            event = events.recv() => {
                let json = match event {
                    Ok(event) => match feed_json(&event, network, feed) {
                        Some(Ok(json)) => json,
                        Some(Err(e)) => {
                            warn!("Could not encode feed item: {}", e);
                            continue;
                        }
                        None => continue,
                    },
                    Err(RecvError::Lagged(n)) => {
                        warn!("{:?} feed on {} fell behind by {} events", feed, network, n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if socket.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("{:?} feed closed on {}", feed, network);
}

fn feed_json(event: &ChainEvent, network: Network, feed: Feed) -> Option<serde_json::Result<String>> {
    if event.network() != network {
        return None;
    }
    match (event, feed) {
        (ChainEvent::BlockAccepted { block, .. }, Feed::Blocks) => Some(serde_json::to_string(block)),
        (ChainEvent::TransactionAnnounced { transaction, .. }, Feed::Transactions) => {
            Some(serde_json::to_string(transaction))
        }
        _ => None,
    }
}

async fn submit_frame(chain: &ChainHandle, network: Network, feed: Feed, text: &str) -> Result<()> {
    let malformed = |e: serde_json::Error| ChainError::NetworkError(format!("Malformed frame: {}", e));
    match feed {
        Feed::Blocks => {
            let block: Block = serde_json::from_str(text).map_err(malformed)?;
            let decision = chain.submit_block(network, block, Origin::Local).await?;
            debug!("Feed block: {}", describe(&decision));
        }
        Feed::Transactions => {
            let tx: Transaction = serde_json::from_str(text).map_err(malformed)?;
            chain.announce_transaction(network, tx, Origin::Local).await?;
        }
    }
    Ok(())
}
