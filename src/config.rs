//! Configuration management for the tokhn node

use crate::error::{ChainError, Result};
use crate::params::Network;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Name this node adds to relay host lists.
    #[serde(default = "default_public_host")]
    pub public_host: String,
    /// `host:port` of relay nodes to dial at start-up.
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Network names as in the parameter table, e.g. `"tkhn"`.
    #[serde(default = "default_networks")]
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_data_dir")]
    pub path: PathBuf,
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// File holding the hex secret key of the beneficiary for self-mined blocks.
    #[serde(default)]
    pub beneficiary_key_file: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            api_port: default_api_port(),
            public_host: default_public_host(),
            peers: Vec::new(),
            max_peers: default_max_peers(),
            heartbeat_secs: default_heartbeat_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            networks: default_networks(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir(),
            in_memory: false,
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            beneficiary_key_file: None,
        }
    }
}

impl NetworkConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn enabled_networks(&self) -> Result<Vec<Network>> {
        let mut networks = self
            .networks
            .iter()
            .map(|name| name.parse::<Network>())
            .collect::<Result<Vec<_>>>()?;
        networks.sort();
        networks.dedup();
        Ok(networks)
    }
}

impl DatabaseConfig {
    /// SQLite file for one network.
    pub fn database_file(&self, network: Network) -> PathBuf {
        self.path.join(format!("{}.db", network.name()))
    }
}

impl Config {
    /// Parses `toml` text and checks critical values.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)
            .map_err(|e| ChainError::ConfigError(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.networks.is_empty() {
            return Err(ChainError::ConfigError(
                "network.networks must name at least one network".to_string(),
            ));
        }
        self.network.enabled_networks()?;
        if self.network.max_peers == 0 {
            return Err(ChainError::ConfigError("network.max_peers must be positive".to_string()));
        }
        if self.network.heartbeat_secs == 0 || self.network.connect_timeout_secs == 0 {
            return Err(ChainError::ConfigError(
                "network.heartbeat_secs and network.connect_timeout_secs must be positive".to_string(),
            ));
        }
        if !self.database.in_memory && self.database.path.as_os_str().is_empty() {
            return Err(ChainError::ConfigError("database.path must be set".to_string()));
        }
        Ok(())
    }
}

/// Loads `path`; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    match fs::read_to_string(path) {
        Ok(text) => Config::from_toml(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
        Err(e) => Err(e.into()),
    }
}

fn default_listen_port() -> u16 {
    5000
}

fn default_api_port() -> u16 {
    8080
}

fn default_public_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_peers() -> usize {
    10
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_networks() -> Vec<String> {
    vec![Network::Tkhn.name().to_string()]
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tokhn")
}

fn default_threads() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.network.max_peers, 10);
        assert_eq!(config.network.heartbeat(), Duration::from_secs(30));
        assert_eq!(config.network.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.network.enabled_networks().unwrap(), vec![Network::Tkhn]);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [network]
            listen_port = 6000
            networks = ["test", "TKHN", "test"]

            [database]
            in_memory = true
            "#,
        )
        .unwrap();
        assert_eq!(config.network.listen_port, 6000);
        assert_eq!(config.network.api_port, 8080);
        assert_eq!(
            config.network.enabled_networks().unwrap(),
            vec![Network::Tkhn, Network::Test]
        );
        assert!(config.database.in_memory);
        assert_eq!(config.miner.threads, 1);
    }

    #[test]
    fn test_unknown_network_rejected() {
        let err = Config::from_toml("[network]\nnetworks = [\"mars\"]").unwrap_err();
        assert!(matches!(err, ChainError::UnsupportedNetwork(_)));
    }

    #[test]
    fn test_zero_peers_rejected() {
        let err = Config::from_toml("[network]\nmax_peers = 0").unwrap_err();
        assert!(matches!(err, ChainError::ConfigError(_)));
    }

    #[test]
    fn test_database_file_per_network() {
        let db = DatabaseConfig {
            path: PathBuf::from("/var/tokhn"),
            in_memory: false,
        };
        assert_eq!(db.database_file(Network::Test), PathBuf::from("/var/tokhn/test.db"));
    }
}
