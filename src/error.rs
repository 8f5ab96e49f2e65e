//! Error types for the tokhn node

use std::fmt;

#[derive(Debug, Clone)]
pub enum ChainError {
    InvalidBlock(String),
    InvalidTransaction(String),
    /// A branch walk ran off known history. Indicates a damaged store.
    InvalidChain(String),
    BlockNotFound(String),
    RangeUnavailable { start: u64, end: u64, height: u64 },
    UnsupportedNetwork(String),
    DatabaseError(String),
    NetworkError(String),
    CryptoError(String),
    WalletError(String),
    ScriptError(String),
    ConfigError(String),
    ServiceUnavailable,
    IoError(String),
    BincodeError(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {}", msg),
            ChainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {}", msg),
            ChainError::InvalidChain(msg) => write!(f, "Invalid chain: {}", msg),
            ChainError::BlockNotFound(msg) => write!(f, "Block not found: {}", msg),
            ChainError::RangeUnavailable { start, end, height } => write!(
                f,
                "Requested range {}..={} is not available (local height {})",
                start, end, height
            ),
            ChainError::UnsupportedNetwork(msg) => write!(f, "Unsupported network: {}", msg),
            ChainError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ChainError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::WalletError(msg) => write!(f, "Wallet error: {}", msg),
            ChainError::ScriptError(msg) => write!(f, "Script error: {}", msg),
            ChainError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            ChainError::ServiceUnavailable => write!(f, "Consensus service is not running"),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
            ChainError::BincodeError(msg) => write!(f, "Bincode error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::BincodeError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
