//! Integration tests for the HTTP API
//!
//! Every route runs against a live consensus task over an in-memory store.

use axum_test::TestServer;
use serde_json::Value;
use std::sync::Arc;
use tokhn::api::{build_api_router, ApiState, SubmitBlockResponse, SubmitTransactionResponse};
use tokhn::blockchain::Block;
use tokhn::consensus::Blockchain;
use tokhn::crypto::KeyPair;
use tokhn::miner::mine_block;
use tokhn::network::message::{Message, Payload};
use tokhn::params::Network;
use tokhn::persistence::InMemoryStore;
use tokhn::script::PredicateEngine;
use tokhn::service::{ChainHandle, ChainService};
use tokhn::transaction::Utxo;
use tokhn::wallet::Wallet;

fn spawn_chain() -> ChainHandle {
    let chain = Blockchain::open(
        Network::Test,
        Arc::new(InMemoryStore::new()),
        Arc::new(PredicateEngine),
    )
    .unwrap();
    ChainService::spawn(vec![chain]).0
}

fn test_server(chain: ChainHandle) -> TestServer {
    TestServer::new(build_api_router(ApiState::new(chain))).expect("Failed to create test server")
}

async fn mine_next(chain: &ChainHandle, beneficiary: &KeyPair) -> Block {
    let template = chain
        .block_template(Network::Test, beneficiary.address(Network::Test), Vec::new())
        .await
        .unwrap();
    tokio::task::spawn_blocking(move || mine_block(template))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_health_and_welcome() {
    let server = test_server(spawn_chain());

    let response = server.get("/api/health").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["networks"][0], "test");

    let response = server.get("/api/welcome?peer_type=miner").await;
    assert_eq!(response.status_code(), 200);
    let welcomes: Vec<Message> = response.json();
    assert_eq!(welcomes.len(), 1);
    match &welcomes[0].payload {
        Payload::Welcome(welcome) => {
            assert_eq!(welcome.latest_block, Block::genesis(Network::Test.params()));
            assert_eq!(welcome.difficulty, 1);
        }
        other => panic!("expected a welcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_and_fetch_block() {
    let chain = spawn_chain();
    let server = test_server(chain.clone());
    let miner = KeyPair::generate().unwrap();
    let block = mine_next(&chain, &miner).await;

    let response = server.post("/api/test/blocks").json(&block).await;
    assert_eq!(response.status_code(), 200);
    let submitted: SubmitBlockResponse = response.json();
    assert!(submitted.accepted);
    assert_eq!(submitted.hash, block.hash);

    // Second submission is a duplicate, not an error
    let again: SubmitBlockResponse = server.post("/api/test/blocks").json(&block).await.json();
    assert!(!again.accepted);

    let fetched: Block = server.get(&format!("/api/test/blocks/{}", block.hash)).await.json();
    assert_eq!(fetched, block);

    let range: Vec<Block> = server.get("/api/test/chain?start=0&end=1").await.json();
    assert_eq!(range.len(), 2);
    assert_eq!(range[1], block);

    let utxos: Vec<Utxo> = server
        .get(&format!("/api/test/utxos/{}", miner.address(Network::Test)))
        .await
        .json();
    assert_eq!(utxos.len(), 1);
}

#[tokio::test]
async fn test_errors_map_to_status_codes() {
    let server = test_server(spawn_chain());

    // Range beyond the local height
    let response = server.get("/api/test/chain?start=0&end=5").await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert!(json["error"].is_string());

    // Network not served by this node
    assert_eq!(server.get("/api/tkhn/chain?start=0&end=0").await.status_code(), 404);
    assert_eq!(server.get("/api/mars/chain?start=0&end=0").await.status_code(), 404);

    // Unknown block and malformed hash
    let missing = tokhn::hash::Hash::of(b"missing");
    assert_eq!(
        server.get(&format!("/api/test/blocks/{}", missing)).await.status_code(),
        404
    );
    assert_eq!(server.get("/api/test/blocks/not-a-hash").await.status_code(), 400);
    assert_eq!(server.get("/api/test/utxos/not-an-address").await.status_code(), 400);
}

#[tokio::test]
async fn test_submit_transaction() {
    let chain = spawn_chain();
    let server = test_server(chain.clone());
    let wallet = Wallet::new(None).unwrap();
    let block = mine_next(&chain, &wallet.keypair().unwrap()).await;
    let submitted: SubmitBlockResponse = server.post("/api/test/blocks").json(&block).await.json();
    assert!(submitted.accepted);

    let utxos: Vec<Utxo> = server
        .get(&format!("/api/test/utxos/{}", wallet.address(Network::Test).unwrap()))
        .await
        .json();
    let to = KeyPair::generate().unwrap().address(Network::Test);
    let tx = wallet
        .build_transaction(Network::Test, &utxos, to, tokhn::token::Token::from_units(10), block.timestamp)
        .unwrap();

    let mut events = chain.subscribe();
    let response = server.post("/api/test/transactions").json(&tx).await;
    assert_eq!(response.status_code(), 200);
    let accepted: SubmitTransactionResponse = response.json();
    assert_eq!(accepted.id, tx.id);
    assert_eq!(events.recv().await.unwrap().network(), Network::Test);

    // Tampered outputs no longer match the signed transaction
    let mut forged = tx.clone();
    forged.outputs[0].amount = tokhn::token::Token::from_units(11);
    assert_eq!(
        server.post("/api/test/transactions").json(&forged).await.status_code(),
        400
    );
}
