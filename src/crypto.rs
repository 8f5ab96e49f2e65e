//! Cryptographic primitives: key pairs, signatures and network-tagged addresses

use crate::error::ChainError;
use crate::hash::Hash;
use crate::params::Network;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use ripemd::{Digest, Ripemd160};
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

pub const ADDRESS_SIZE: usize = 25;
const KEY_HASH_SIZE: usize = 20;
const CHECKSUM_SIZE: usize = 4;

/// Account identifier: network id, RIPEMD-160 of the public key digest, checksum.
///
/// ```text
/// byte 0      network id
/// bytes 1..21 RIPEMD160(H(public key))
/// bytes 21..  first 4 bytes of H(bytes 0..21)
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// Derives the address of a compressed public key on `network`.
    pub fn from_public_key(public_key: &[u8], network: Network) -> Self {
        let key_digest = Hash::of(public_key);
        let key_hash = Ripemd160::digest(key_digest.as_bytes());

        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[0] = network.id();
        bytes[1..1 + KEY_HASH_SIZE].copy_from_slice(&key_hash);
        let checksum = Self::checksum(&bytes[..1 + KEY_HASH_SIZE]);
        bytes[1 + KEY_HASH_SIZE..].copy_from_slice(&checksum);
        Address(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let arr: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| {
            ChainError::CryptoError(format!(
                "Address must be {} bytes, got {}",
                ADDRESS_SIZE,
                bytes.len()
            ))
        })?;
        let expected = Self::checksum(&arr[..1 + KEY_HASH_SIZE]);
        if arr[1 + KEY_HASH_SIZE..] != expected {
            return Err(ChainError::CryptoError("Address checksum mismatch".to_string()));
        }
        Network::from_id(arr[0])?;
        Ok(Address(arr))
    }

    fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
        let digest = Hash::of(payload);
        let mut out = [0u8; CHECKSUM_SIZE];
        out.copy_from_slice(&digest.as_bytes()[..CHECKSUM_SIZE]);
        out
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn network_id(&self) -> u8 {
        self.0[0]
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Address({})", self.to_base58())
    }
}

impl FromStr for Address {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| ChainError::CryptoError(format!("Invalid base58 address: {}", e)))?;
        Address::from_bytes(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base58())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <[u8; ADDRESS_SIZE]>::deserialize(deserializer)?;
            Address::from_bytes(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Result<Self, ChainError> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_hex(hex_str: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| ChainError::CryptoError(format!("Invalid secret key hex: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn address(&self, network: Network) -> Address {
        Address::from_public_key(&self.public_key_bytes(), network)
    }

    /// Returns the KeyPair's public key as a compressed byte array.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key.serialize()
    }

    /// Signs the digest of `message` and returns the compact signature bytes.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE], ChainError> {
        let digest = Hash::of(message);
        let message = Message::from_digest_slice(digest.as_bytes())
            .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;

        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact())
    }
}

/// Verifies an ECDSA signature given the raw public key bytes, message, and signature bytes.
pub fn verify_signature(
    public_key_bytes: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), ChainError> {
    if public_key_bytes.len() != PUBLIC_KEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            public_key_bytes.len()
        )));
    }
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let public_key = PublicKey::from_slice(public_key_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;

    let digest = Hash::of(message);
    let message = Message::from_digest_slice(digest.as_bytes())
        .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;

    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::CryptoError("Signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_layout() {
        let keypair = KeyPair::generate().unwrap();
        let address = keypair.address(Network::Test);
        assert_eq!(address.as_bytes().len(), ADDRESS_SIZE);
        assert_eq!(address.network_id(), Network::Test.id());

        // Same key, different network: different address
        assert_ne!(address, keypair.address(Network::Tkhn));
    }

    #[test]
    fn test_address_base58_roundtrip() {
        let keypair = KeyPair::generate().unwrap();
        let address = keypair.address(Network::Tkhn);
        let parsed: Address = address.to_base58().parse().unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_address_checksum_detects_corruption() {
        let keypair = KeyPair::generate().unwrap();
        let mut bytes = *keypair.address(Network::Tkhn).as_bytes();
        bytes[5] ^= 0x01;
        let result = Address::from_bytes(&bytes);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "Cryptographic error: Address checksum mismatch"
        );
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = KeyPair::generate().unwrap();
        let message = b"Hello, tokhn!";

        let signature = keypair.sign(message).unwrap();
        let pubkey_bytes = keypair.public_key_bytes();

        assert!(verify_signature(&pubkey_bytes, message, &signature).is_ok());
        assert_eq!(signature.len(), COMPACT_SIGNATURE_SIZE);
    }

    #[test]
    fn test_invalid_signature() {
        let keypair1 = KeyPair::generate().unwrap();
        let keypair2 = KeyPair::generate().unwrap();

        let message = b"Test message";
        let signature = keypair1.sign(message).unwrap();

        let result = verify_signature(&keypair2.public_key_bytes(), message, &signature);
        assert_eq!(
            result.unwrap_err().to_string(),
            "Cryptographic error: Signature verification failed"
        );
    }

    #[test]
    fn test_invalid_key_or_sig_length_check() {
        let keypair = KeyPair::generate().unwrap();
        let message = b"Test";
        let signature = keypair.sign(message).unwrap();
        let pubkey_bytes = keypair.public_key_bytes();

        let result = verify_signature(&pubkey_bytes[1..], message, &signature);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Public key must be exactly"));

        let result = verify_signature(&pubkey_bytes, message, &signature[1..]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Signature must be exactly"));
    }

    #[test]
    fn test_secret_hex_roundtrip() {
        let keypair = KeyPair::generate().unwrap();
        let restored = KeyPair::from_secret_hex(&keypair.secret_hex()).unwrap();
        assert_eq!(restored.public_key, keypair.public_key);
        assert!(KeyPair::from_secret_bytes(&[0u8; SECRET_KEY_SIZE - 1])
            .unwrap_err()
            .to_string()
            .contains("Secret key must be"));
    }
}
