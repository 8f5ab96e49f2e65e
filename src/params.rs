//! Per-network consensus parameters.
//!
//! Every supported network is one row in [`NETWORK_TABLE`]. Adding a network
//! means adding a row and an enum variant; the engine only ever reads
//! `&'static NetworkParams`.

use crate::crypto::Address;
use crate::error::ChainError;
use crate::token::Token;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Compressed secp256k1 key whose address receives surplus value and, on
/// test networks, the genesis reward.
const CHARITY_PUBLIC_KEY: &str =
    "029d55e882e8d3fd310f8f673525bb89c696ba659f1851c068a8b7ef9f5335dff0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Network {
    Tkhn,
    Test,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Tkhn, Network::Test];

    pub fn id(&self) -> u8 {
        self.params().id
    }

    pub fn from_id(id: u8) -> Result<Self, ChainError> {
        Network::ALL
            .into_iter()
            .find(|n| n.id() == id)
            .ok_or_else(|| ChainError::UnsupportedNetwork(format!("unknown network id {:#04x}", id)))
    }

    pub fn params(&self) -> &'static NetworkParams {
        let row = match self {
            Network::Tkhn => 0,
            Network::Test => 1,
        };
        &NETWORK_TABLE[row]
    }

    pub fn name(&self) -> &'static str {
        self.params().name
    }

    pub fn charity_address(&self) -> Address {
        self.params().charity_address()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Network {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::ALL
            .into_iter()
            .find(|n| n.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ChainError::UnsupportedNetwork(s.to_string()))
    }
}

/// Protocol version a node speaks on a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(pub u16);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Resource ceilings handed to the script capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    pub max_cpu_time: Duration,
    pub max_memory: usize,
    pub max_statements: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        ScriptLimits {
            max_cpu_time: Duration::from_millis(5000),
            max_memory: 1_048_576,
            max_statements: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkParams {
    pub network: Network,
    pub name: &'static str,
    pub id: u8,
    pub version: Version,
    /// Target seconds between blocks.
    pub block_generation_interval: i64,
    /// Blocks between difficulty retargets.
    pub difficulty_adjustment_interval: u64,
    /// Accepted timestamp skew in seconds.
    pub valid_drift: i64,
    pub script_limits: ScriptLimits,
    pub genesis_time: i64,
    pub genesis_reward: Token,
    pub genesis_difficulty: u32,
    pub min_difficulty: u32,
    /// Relay nodes mine incoming transactions themselves at or below this difficulty.
    pub max_internal_mine_difficulty: u32,
    charity_public_key: &'static str,
}

impl NetworkParams {
    pub fn charity_address(&self) -> Address {
        // The key is a compile-time constant; decoding can only fail if it is edited badly.
        let key = hex::decode(self.charity_public_key).unwrap_or_default();
        Address::from_public_key(&key, self.network)
    }

    pub fn genesis_address(&self) -> Address {
        self.charity_address()
    }
}

pub static NETWORK_TABLE: Lazy<[NetworkParams; 2]> = Lazy::new(|| {
    [
        NetworkParams {
            network: Network::Tkhn,
            name: "tkhn",
            id: 0x00,
            version: Version(0),
            block_generation_interval: 600,
            difficulty_adjustment_interval: 5,
            valid_drift: 7200,
            script_limits: ScriptLimits::default(),
            genesis_time: 1_514_764_800,
            genesis_reward: Token::ONE,
            genesis_difficulty: 1,
            min_difficulty: 1,
            max_internal_mine_difficulty: 0,
            charity_public_key: CHARITY_PUBLIC_KEY,
        },
        NetworkParams {
            network: Network::Test,
            name: "test",
            id: 0xFF,
            version: Version(0),
            block_generation_interval: 1,
            difficulty_adjustment_interval: 1000,
            valid_drift: 7200,
            script_limits: ScriptLimits::default(),
            genesis_time: 1_514_764_800,
            genesis_reward: Token::ONE,
            genesis_difficulty: 1,
            min_difficulty: 1,
            max_internal_mine_difficulty: 2,
            charity_public_key: CHARITY_PUBLIC_KEY,
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rows_match_variants() {
        for network in Network::ALL {
            assert_eq!(network.params().network, network);
            assert_eq!(Network::from_id(network.id()).unwrap(), network);
            assert_eq!(network.name().parse::<Network>().unwrap(), network);
        }
    }

    #[test]
    fn test_charity_address_is_tagged_per_network() {
        let tkhn = Network::Tkhn.charity_address();
        let test = Network::Test.charity_address();
        assert_eq!(tkhn.network_id(), 0x00);
        assert_eq!(test.network_id(), 0xFF);
        assert_ne!(tkhn, test);
    }

    #[test]
    fn test_unknown_network() {
        assert!(Network::from_id(0x42).is_err());
        assert!("mainnet".parse::<Network>().is_err());
    }
}
