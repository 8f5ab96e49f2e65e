//! Peer wire messages and their framing.
//!
//! A frame is a 4-byte big-endian body length followed by a `bincode`
//! encoded [`Message`]. Oversized frames are fatal to the connection; frames
//! that fail to decode (unknown payload tags included) are reported as
//! [`Frame::Undecodable`] and the stream continues.

use crate::blockchain::Block;
use crate::crypto::Address;
use crate::error::{ChainError, Result};
use crate::hash::Hash;
use crate::params::{Network, Version};
use crate::token::Token;
use crate::transaction::{Transaction, Utxo};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub timestamp: i64,
    pub difficulty: u32,
    pub reward: Token,
    pub latest_block: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Welcome(Welcome),
    Ping,
    Difficulty(u32),
    Block(Block),
    BlockRequest(Hash),
    Transaction(Transaction),
    PartialChain(Vec<Block>),
    PartialChainRequest { start: u64, end: u64 },
    UtxoRequest(Address),
    Utxo(Vec<Utxo>),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub network: Network,
    pub version: Version,
    /// Hosts this message has passed through, oldest first.
    pub relay_hosts: Vec<String>,
    pub payload: Payload,
}

impl Message {
    pub fn new(network: Network, payload: Payload) -> Self {
        Message {
            network,
            version: network.params().version,
            relay_hosts: Vec::new(),
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.payload {
            Payload::Welcome(_) => "Welcome",
            Payload::Ping => "Ping",
            Payload::Difficulty(_) => "Difficulty",
            Payload::Block(_) => "Block",
            Payload::BlockRequest(_) => "BlockRequest",
            Payload::Transaction(_) => "Transaction",
            Payload::PartialChain(_) => "PartialChain",
            Payload::PartialChainRequest { .. } => "PartialChainRequest",
            Payload::UtxoRequest(_) => "UtxoRequest",
            Payload::Utxo(_) => "Utxo",
            Payload::Exit => "Exit",
        }
    }

    pub fn add_relay_host(&mut self, host: impl Into<String>) {
        self.relay_hosts.push(host.into());
    }

    pub fn has_relayed_through(&self, host: &str) -> bool {
        self.relay_hosts.iter().any(|h| h == host)
    }

    /// True when `network` is served locally and the version matches its table row.
    pub fn is_supported(&self, networks: &[Network]) -> bool {
        networks.contains(&self.network) && self.version == self.network.params().version
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (NET:{}", self.kind(), self.network)?;
        match &self.payload {
            Payload::Welcome(w) => write!(
                f,
                ", DIF:{}, RWD:{}, HGT:{}",
                w.difficulty, w.reward, w.latest_block.index
            )?,
            Payload::Difficulty(d) => write!(f, ", DIF:{}", d)?,
            Payload::Block(b) => write!(f, ", BCK:{}@{}", b.hash, b.index)?,
            Payload::BlockRequest(h) => write!(f, ", REQ:{}", h)?,
            Payload::Transaction(tx) => write!(f, ", TX:{}", tx.id)?,
            Payload::PartialChain(blocks) => write!(f, ", LEN:{}", blocks.len())?,
            Payload::PartialChainRequest { start, end } => write!(f, ", RNG:{}..={}", start, end)?,
            Payload::UtxoRequest(a) => write!(f, ", ADR:{}", a)?,
            Payload::Utxo(utxos) => write!(f, ", LEN:{}", utxos.len())?,
            Payload::Ping | Payload::Exit => {}
        }
        write!(f, ") [{}]", self.relay_hosts.join("->"))
    }
}

/// Result of reading one frame.
#[derive(Debug)]
pub enum Frame {
    Message(Message),
    /// Body did not decode; carries the decoder's complaint.
    Undecodable(String),
    /// Peer closed the stream at a frame boundary.
    Closed,
}

pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ChainError::NetworkError(format!(
            "Message of {} bytes exceeds frame limit",
            body.len()
        )));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ChainError::NetworkError(format!(
            "Frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(match bincode::deserialize::<Message>(&body) {
        Ok(message) => Frame::Message(message),
        Err(e) => Frame::Undecodable(e.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> Message {
        Message::new(Network::Test, Payload::Ping)
    }

    #[tokio::test]
    async fn test_frame_round_trip_over_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let mut msg = Message::new(Network::Test, Payload::PartialChainRequest { start: 11, end: 14 });
        msg.add_relay_host("alpha");
        write_message(&mut a, &msg).await.unwrap();
        match read_frame(&mut b).await.unwrap() {
            Frame::Message(got) => assert_eq!(got, msg),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_body_is_undecodable_and_stream_continues() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&3u32.to_be_bytes()).await.unwrap();
        a.write_all(&[0xFF, 0xFF, 0xFF]).await.unwrap();
        write_message(&mut a, &ping()).await.unwrap();

        assert!(matches!(read_frame(&mut b).await.unwrap(), Frame::Undecodable(_)));
        assert!(matches!(read_frame(&mut b).await.unwrap(), Frame::Message(m) if m == ping()));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes()).await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn test_clean_close() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(read_frame(&mut b).await.unwrap(), Frame::Closed));
    }

    #[test]
    fn test_support_gate() {
        let msg = ping();
        assert!(msg.is_supported(&[Network::Test]));
        assert!(!msg.is_supported(&[Network::Tkhn]));

        let mut stale = ping();
        stale.version = Version(99);
        assert!(!stale.is_supported(&[Network::Test]));
    }

    #[test]
    fn test_display_lists_relay_path() {
        let mut msg = ping();
        msg.add_relay_host("a");
        msg.add_relay_host("b");
        assert_eq!(msg.to_string(), "Ping (NET:test) [a->b]");
    }
}
