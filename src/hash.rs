//! Fixed-width digest used for block hashes, transaction ids and UTXO ids.

use crate::error::ChainError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512_256};
use std::fmt;
use std::str::FromStr;

pub const HASH_SIZE: usize = 32;

/// Hasher used for every consensus digest.
pub type Hasher = Sha512_256;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub fn of(data: &[u8]) -> Self {
        Hash(Hasher::digest(data).into())
    }

    pub fn from_hasher(hasher: Hasher) -> Self {
        Hash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChainError> {
        let arr: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| {
            ChainError::CryptoError(format!(
                "Hash must be {} bytes, got {}",
                HASH_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Hash(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Number of leading zero bits, the proof-of-work metric.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut bits = 0;
        for byte in self.0 {
            if byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros();
                break;
            }
        }
        bits
    }

    pub fn matches_difficulty(&self, difficulty: u32) -> bool {
        hash_matches_difficulty(self, difficulty)
    }
}

pub fn hash_matches_difficulty(hash: &Hash, difficulty: u32) -> bool {
    hash.leading_zero_bits() >= difficulty
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| ChainError::CryptoError(format!("Invalid hex hash: {}", e)))?;
        Hash::from_slice(&bytes)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            Ok(Hash(<[u8; HASH_SIZE]>::deserialize(deserializer)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(Hash::ZERO.leading_zero_bits(), 256);

        let mut bytes = [0xFFu8; HASH_SIZE];
        assert_eq!(Hash::new(bytes).leading_zero_bits(), 0);

        bytes[0] = 0;
        bytes[1] = 0b0001_0000;
        assert_eq!(Hash::new(bytes).leading_zero_bits(), 11);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut low = [0u8; HASH_SIZE];
        let mut high = [0u8; HASH_SIZE];
        low[31] = 0xFF;
        high[0] = 0x01;
        assert!(Hash::new(low) < Hash::new(high));
    }

    #[test]
    fn test_hex_roundtrip_through_json() {
        let hash = Hash::of(b"tokhn");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_from_str_rejects_wrong_length() {
        assert!("abcd".parse::<Hash>().is_err());
    }

    proptest! {
        #[test]
        fn prop_difficulty_predicate_matches_zero_bits(bytes in any::<[u8; 32]>(), d in 0u32..=256) {
            let h = Hash::new(bytes);
            prop_assert_eq!(hash_matches_difficulty(&h, d), h.leading_zero_bits() >= d);
        }

        #[test]
        fn prop_difficulty_predicate_is_monotonic(bytes in any::<[u8; 32]>(), d in 0u32..256) {
            let h = Hash::new(bytes);
            if hash_matches_difficulty(&h, d + 1) {
                prop_assert!(hash_matches_difficulty(&h, d));
            }
        }
    }
}
