//! Wallet keys, transaction building and the light client.

use crate::crypto::{Address, KeyPair};
use crate::error::{ChainError, Result};
use crate::network::message::{read_frame, write_message, Frame, Message, Payload};
use crate::params::Network;
use crate::token::Token;
use crate::transaction::{Transaction, TransactionType, Txi, Txo, Utxo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub name: Option<String>,
    pub secret_key_hex: String,
    /// RFC 3339 creation time.
    pub created: String,
}

impl Wallet {
    /// Generates a fresh key.
    pub fn new(name: Option<String>) -> Result<Self> {
        Ok(Self::from_keypair(name, &KeyPair::generate()?))
    }

    pub fn from_keypair(name: Option<String>, keypair: &KeyPair) -> Self {
        Wallet {
            name,
            secret_key_hex: keypair.secret_hex(),
            created: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn keypair(&self) -> Result<KeyPair> {
        KeyPair::from_secret_hex(&self.secret_key_hex)
    }

    pub fn address(&self, network: Network) -> Result<Address> {
        Ok(self.keypair()?.address(network))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ChainError::WalletError(format!("Failed to serialize wallet: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| ChainError::WalletError(format!("Failed to parse wallet {}: {}", path.display(), e)))
    }

    /// Pays `amount` to `to` from `utxos`, returning change to this wallet.
    ///
    /// UTXOs are taken largest first until the amount is covered. Every input
    /// is signed.
    pub fn build_transaction(
        &self,
        network: Network,
        utxos: &[Utxo],
        to: Address,
        amount: Token,
        timestamp: i64,
    ) -> Result<Transaction> {
        if amount.is_zero() {
            return Err(ChainError::WalletError("Amount must be positive".to_string()));
        }
        let keypair = self.keypair()?;
        let own = keypair.address(network);

        let mut candidates: Vec<&Utxo> = utxos
            .iter()
            .filter(|u| u.address == own && u.network == network)
            .collect();
        candidates.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut inputs = Vec::new();
        let mut gathered = Token::ZERO;
        for utxo in candidates {
            if gathered >= amount {
                break;
            }
            inputs.push(Txi::new(utxo.source_tx_id, utxo.source_txo_index));
            gathered = gathered
                .checked_add(utxo.amount)
                .ok_or_else(|| ChainError::WalletError("Balance overflow".to_string()))?;
        }

        if gathered < amount {
            return Err(ChainError::WalletError(format!(
                "Insufficient funds: have {}, need {}",
                gathered, amount
            )));
        }

        let mut outputs = vec![Txo::new(to, amount)];
        if let Some(change) = gathered.checked_sub(amount).filter(|c| !c.is_zero()) {
            outputs.push(Txo::new(own, change));
        }

        let mut tx = Transaction::new(timestamp, TransactionType::Regular, inputs, outputs);
        tx.sign_inputs(&keypair)?;
        Ok(tx)
    }
}

pub fn balance(utxos: &[Utxo]) -> Token {
    utxos.iter().map(|u| u.amount).sum()
}

/// Default wallet location under the user's data directory.
pub fn default_wallet_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tokhn")
        .join("wallet.json")
}

// ============================================================================
// Light client
// ============================================================================

async fn open(node: &str, timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect(node))
        .await
        .map_err(|_| ChainError::NetworkError(format!("Connection to {} timed out", node)))?
        .map_err(ChainError::from)
}

/// Asks a relay node for the UTXOs owned by `address`.
pub async fn request_utxos(node: &str, network: Network, address: Address, timeout: Duration) -> Result<Vec<Utxo>> {
    let mut stream = open(node, timeout).await?;
    write_message(&mut stream, &Message::new(network, Payload::UtxoRequest(address))).await?;

    let exchange = async {
        loop {
            match read_frame(&mut stream).await? {
                Frame::Message(Message {
                    network: n,
                    payload: Payload::Utxo(utxos),
                    ..
                }) if n == network => return Ok(utxos),
                Frame::Message(message) => debug!("Light client skipping {}", message),
                Frame::Undecodable(reason) => debug!("Light client dropped frame: {}", reason),
                Frame::Closed => {
                    return Err(ChainError::NetworkError(format!(
                        "{} closed before answering",
                        node
                    )))
                }
            }
        }
    };
    let utxos = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| ChainError::NetworkError(format!("{} did not answer in time", node)))??;

    let _ = write_message(&mut stream, &Message::new(network, Payload::Exit)).await;
    Ok(utxos)
}

/// Hands `tx` to a relay node.
pub async fn submit_transaction(node: &str, network: Network, tx: &Transaction, timeout: Duration) -> Result<()> {
    let mut stream = open(node, timeout).await?;
    write_message(&mut stream, &Message::new(network, Payload::Transaction(tx.clone()))).await?;
    write_message(&mut stream, &Message::new(network, Payload::Exit)).await?;
    info!("Submitted transaction {} to {}", tx.id, node);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(wallet: &Wallet, amounts: &[u64]) -> Vec<Utxo> {
        let address = wallet.address(Network::Test).unwrap();
        amounts
            .iter()
            .enumerate()
            .flat_map(|(i, units)| {
                Transaction::reward(address, Token::from_units(*units), i as i64, i as u64).created_utxos(Network::Test)
            })
            .collect()
    }

    #[test]
    fn test_wallet_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("wallet.json");
        let wallet = Wallet::new(Some("alice".to_string())).unwrap();
        wallet.save(&path).unwrap();
        assert_eq!(Wallet::load(&path).unwrap(), wallet);
    }

    #[test]
    fn test_build_with_change() {
        let wallet = Wallet::new(None).unwrap();
        let utxos = funded(&wallet, &[300_000, 1_000_000, 200_000]);
        let to = KeyPair::generate().unwrap().address(Network::Test);

        let tx = wallet
            .build_transaction(Network::Test, &utxos, to, Token::from_units(1_100_000), 10)
            .unwrap();
        // Largest first: 1.0 + 0.3 covers 1.1
        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.outputs[0], Txo::new(to, Token::from_units(1_100_000)));
        assert_eq!(tx.outputs[1].address, wallet.address(Network::Test).unwrap());
        assert_eq!(tx.outputs[1].amount, Token::from_units(200_000));
        assert!(tx.inputs.iter().all(|i| i.signature.is_some()));
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let wallet = Wallet::new(None).unwrap();
        let utxos = funded(&wallet, &[500_000]);
        let to = KeyPair::generate().unwrap().address(Network::Test);
        let tx = wallet
            .build_transaction(Network::Test, &utxos, to, Token::from_units(500_000), 10)
            .unwrap();
        assert_eq!(tx.outputs.len(), 1);
    }

    #[test]
    fn test_insufficient_funds() {
        let wallet = Wallet::new(None).unwrap();
        let utxos = funded(&wallet, &[100]);
        let to = KeyPair::generate().unwrap().address(Network::Test);
        let err = wallet
            .build_transaction(Network::Test, &utxos, to, Token::ONE, 10)
            .unwrap_err();
        assert!(matches!(err, ChainError::WalletError(_)));
    }

    #[test]
    fn test_balance_sums() {
        let wallet = Wallet::new(None).unwrap();
        assert_eq!(balance(&funded(&wallet, &[1, 2, 3])), Token::from_units(6));
    }
}
