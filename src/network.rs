//! Peer-to-peer networking: wire messages, the peer registry, the relay
//! protocol and its TCP server.

pub mod message;
pub mod peer;
pub mod relay;
pub mod server;

pub use message::{Frame, Message, Payload, Welcome, MAX_FRAME_SIZE};
pub use peer::{PeerId, PeerInfo, PeerRegistry};
pub use relay::{Outbound, RelayProtocol};
pub use server::NetworkServer;

use std::time::Duration;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
