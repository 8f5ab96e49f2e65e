//! Peer synchronisation through the relay protocol, at handler level and over TCP.

use std::sync::Arc;
use std::time::Duration;
use tokhn::blockchain::Block;
use tokhn::consensus::Blockchain;
use tokhn::crypto::KeyPair;
use tokhn::miner::mine_block;
use tokhn::network::message::{Message, Payload, Welcome};
use tokhn::network::{NetworkServer, Outbound, PeerRegistry, RelayProtocol};
use tokhn::params::Network;
use tokhn::persistence::InMemoryStore;
use tokhn::script::PredicateEngine;
use tokhn::service::{ChainEvent, ChainHandle, ChainService, Origin};
use tokhn::sync::{SyncState, SyncTracker};
use tokhn::token::Token;
use tokhn::transaction::{Transaction, TransactionType, Txi, Txo};
use tokio::net::TcpListener;

fn open_chain() -> Blockchain {
    Blockchain::open(
        Network::Test,
        Arc::new(InMemoryStore::new()),
        Arc::new(PredicateEngine),
    )
    .unwrap()
}

/// Genesis followed by `count` mined blocks.
fn mined_chain(count: usize) -> Vec<Block> {
    let miner = KeyPair::generate().unwrap();
    let mut blocks = vec![Block::genesis(Network::Test.params())];
    for _ in 0..count {
        let parent = blocks.last().unwrap();
        let timestamp = parent.timestamp + 5;
        let reward = Transaction::reward(miner.address(Network::Test), Token::ONE, timestamp, parent.index + 1);
        let template = Block::new(
            Network::Test,
            parent.index + 1,
            parent.hash,
            timestamp,
            vec![reward],
            1,
        );
        blocks.push(mine_block(template).unwrap());
    }
    blocks
}

async fn service_with(blocks: &[Block]) -> ChainHandle {
    let (handle, _task) = ChainService::spawn(vec![open_chain()]);
    for block in blocks.iter().skip(1) {
        let decision = handle
            .submit_block(Network::Test, block.clone(), Origin::Local)
            .await
            .unwrap();
        assert!(decision.is_accepted());
    }
    handle
}

async fn height(chain: &ChainHandle) -> u64 {
    chain.snapshot(Network::Test).await.unwrap().height
}

fn welcome(latest: &Block) -> Message {
    Message::new(
        Network::Test,
        Payload::Welcome(Welcome {
            timestamp: latest.timestamp,
            difficulty: 1,
            reward: Token::ONE,
            latest_block: latest.clone(),
        }),
    )
}

#[tokio::test]
async fn scenario_d_catches_up_with_one_range_request() {
    let remote = mined_chain(14);
    let chain = service_with(&remote[..=10]).await;
    let sync = Arc::new(SyncTracker::new());
    let protocol = RelayProtocol::new(chain.clone(), Arc::clone(&sync), "10.0.0.1", None);
    let registry = PeerRegistry::new(4);
    let (peer, _outbound) = registry.try_register("10.0.0.2:7000".parse().unwrap()).unwrap();

    let out = protocol.handle(&peer, welcome(&remote[14])).await;
    assert_eq!(
        out,
        vec![Outbound::Reply(Message::new(
            Network::Test,
            Payload::PartialChainRequest { start: 11, end: 14 }
        ))]
    );
    assert_eq!(sync.state(Network::Test).await, SyncState::Syncing);

    // A repeated welcome while the request is in flight asks for nothing new
    assert!(protocol.handle(&peer, welcome(&remote[14])).await.is_empty());

    let reply = Message::new(Network::Test, Payload::PartialChain(remote[11..=14].to_vec()));
    assert!(protocol.handle(&peer, reply).await.is_empty());
    assert_eq!(height(&chain).await, 14);
    assert_eq!(sync.state(Network::Test).await, SyncState::Synced);
    assert!(sync.outstanding(Network::Test).await.is_none());
}

#[tokio::test]
async fn next_block_in_welcome_is_submitted_directly() {
    let remote = mined_chain(3);
    let chain = service_with(&remote[..=2]).await;
    let protocol = RelayProtocol::new(chain.clone(), Arc::new(SyncTracker::new()), "10.0.0.1", None);
    let registry = PeerRegistry::new(4);
    let (peer, _outbound) = registry.try_register("10.0.0.2:7000".parse().unwrap()).unwrap();

    assert!(protocol.handle(&peer, welcome(&remote[3])).await.is_empty());
    assert_eq!(height(&chain).await, 3);
}

#[tokio::test]
async fn orphan_block_asks_for_its_parent() {
    let remote = mined_chain(3);
    let chain = service_with(&remote[..=1]).await;
    let protocol = RelayProtocol::new(chain.clone(), Arc::new(SyncTracker::new()), "10.0.0.1", None);
    let registry = PeerRegistry::new(4);
    let (peer, _outbound) = registry.try_register("10.0.0.2:7000".parse().unwrap()).unwrap();

    let out = protocol
        .handle(&peer, Message::new(Network::Test, Payload::Block(remote[3].clone())))
        .await;
    assert_eq!(
        out,
        vec![Outbound::Reply(Message::new(
            Network::Test,
            Payload::BlockRequest(remote[2].hash)
        ))]
    );

    // Parent arrives and is echoed; the stored orphan follows it onto the chain
    let out = protocol
        .handle(&peer, Message::new(Network::Test, Payload::Block(remote[2].clone())))
        .await;
    assert_eq!(
        out,
        vec![Outbound::Reply(Message::new(Network::Test, Payload::Block(remote[2].clone())))]
    );
    assert_eq!(height(&chain).await, 3);
}

#[tokio::test]
async fn losing_block_is_answered_with_the_current_tip() {
    let remote = mined_chain(2);
    let chain = service_with(&remote).await;
    let protocol = RelayProtocol::new(chain.clone(), Arc::new(SyncTracker::new()), "10.0.0.1", None);
    let registry = PeerRegistry::new(4);
    let (peer, _outbound) = registry.try_register("10.0.0.2:7000".parse().unwrap()).unwrap();

    // A sibling of remote[1] carries no more work than the tip
    let rival = mine_block(Block::new(
        Network::Test,
        1,
        remote[0].hash,
        remote[0].timestamp + 7,
        Vec::new(),
        1,
    ))
    .unwrap();
    let out = protocol
        .handle(&peer, Message::new(Network::Test, Payload::Block(rival)))
        .await;
    match out.as_slice() {
        [Outbound::Reply(Message {
            payload: Payload::Welcome(welcome),
            ..
        })] => assert_eq!(welcome.latest_block, remote[2]),
        other => panic!("unexpected reply {:?}", other),
    }

    // A tampered block is invalid and gets the same answer
    let mut forged = mine_block(Block::new(
        Network::Test,
        3,
        remote[2].hash,
        remote[2].timestamp + 5,
        Vec::new(),
        1,
    ))
    .unwrap();
    forged.timestamp += 1;
    let out = protocol
        .handle(&peer, Message::new(Network::Test, Payload::Block(forged)))
        .await;
    assert!(matches!(
        out.as_slice(),
        [Outbound::Reply(Message { payload: Payload::Welcome(_), .. })]
    ));
    assert_eq!(height(&chain).await, 2);
}

#[tokio::test]
async fn peer_transaction_is_relayed_without_local_funding() {
    // Tkhn never self-mines, so transactions go straight to relay
    let tkhn = Blockchain::open(
        Network::Tkhn,
        Arc::new(InMemoryStore::new()),
        Arc::new(PredicateEngine),
    )
    .unwrap();
    let (chain, _task) = ChainService::spawn(vec![tkhn]);
    let mut events = chain.subscribe();
    let protocol = RelayProtocol::new(chain.clone(), Arc::new(SyncTracker::new()), "10.0.0.1", None);
    let registry = PeerRegistry::new(4);
    let (peer, _outbound) = registry.try_register("10.0.0.2:7000".parse().unwrap()).unwrap();

    let owner = KeyPair::generate().unwrap();
    let mut tx = Transaction::new(
        7,
        TransactionType::Regular,
        vec![Txi::new(tokhn::hash::Hash::of(b"spent elsewhere"), 0)],
        vec![Txo::new(owner.address(Network::Tkhn), Token::ONE)],
    );
    tx.sign_inputs(&owner).unwrap();

    let out = protocol
        .handle(&peer, Message::new(Network::Tkhn, Payload::Transaction(tx.clone())))
        .await;
    assert!(out.is_empty());
    match tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap() {
        ChainEvent::TransactionAnnounced {
            transaction, origin, ..
        } => {
            assert_eq!(transaction, tx);
            assert_eq!(origin.peer_id(), Some(peer.id));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(chain.snapshot(Network::Tkhn).await.unwrap().height, 0);
}

#[tokio::test]
async fn unsupported_network_is_dropped() {
    let chain = service_with(&mined_chain(0)).await;
    let protocol = RelayProtocol::new(chain, Arc::new(SyncTracker::new()), "10.0.0.1", None);
    let registry = PeerRegistry::new(4);
    let (peer, _outbound) = registry.try_register("10.0.0.2:7000".parse().unwrap()).unwrap();

    let foreign = Message::new(Network::Tkhn, Payload::Ping);
    assert!(protocol.handle(&peer, foreign).await.is_empty());
    assert_eq!(
        protocol.handle(&peer, Message::new(Network::Test, Payload::Exit)).await,
        vec![Outbound::Disconnect]
    );
}

struct TestNode {
    chain: ChainHandle,
    server: Arc<NetworkServer>,
    addr: String,
}

async fn start_node(blocks: &[Block], host: &str) -> TestNode {
    let chain = service_with(blocks).await;
    let sync = Arc::new(SyncTracker::new());
    let protocol = Arc::new(RelayProtocol::new(chain.clone(), Arc::clone(&sync), host, None));
    let server = Arc::new(NetworkServer::new(
        Arc::new(PeerRegistry::new(8)),
        protocol,
        sync,
        Duration::from_secs(30),
        Duration::from_secs(5),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(Arc::clone(&server).listen(listener));
    Arc::clone(&server).spawn_relay();
    TestNode { chain, server, addr }
}

async fn wait_for_height(chain: &ChainHandle, target: u64) {
    tokio::time::timeout(Duration::from_secs(20), async {
        while height(chain).await < target {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("node did not reach the expected height");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tcp_peers_sync_and_relay_new_blocks() {
    let remote = mined_chain(6);
    let ahead = start_node(&remote[..=5], "node-a").await;
    let behind = start_node(&remote[..=0], "node-b").await;

    Arc::clone(&behind.server).connect(&ahead.addr).await.unwrap();
    wait_for_height(&behind.chain, 5).await;

    // A block accepted on one node reaches the other through the relay task
    let decision = ahead
        .chain
        .submit_block(Network::Test, remote[6].clone(), Origin::Local)
        .await
        .unwrap();
    assert!(decision.is_accepted());
    wait_for_height(&behind.chain, 6).await;

    let tip = behind.chain.snapshot(Network::Test).await.unwrap().latest_block;
    assert_eq!(tip, remote[6]);
    assert_eq!(ahead.server.registry().len(), 1);
}
