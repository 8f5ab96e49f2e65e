//! Tokhn - a proof-of-work UTXO ledger with cumulative-work fork choice
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Blocks, validation, ledger effects and difficulty
//! - [`transaction`] - Transactions, inputs, outputs and UTXOs
//! - [`consensus`] - Per-network fork choice and reorganisation
//! - [`service`] - The single consensus task and its async handle
//!
//! ## Primitives
//! - [`hash`] - SHA-512/256 digests
//! - [`token`] - Fixed-point token amounts
//! - [`params`] - Network parameter table
//! - [`script`] - Transaction script evaluation
//!
//! ## Mining
//! - [`miner`] - Parallel proof-of-work search and the mining client
//!
//! ## Cryptography
//! - [`crypto`] - secp256k1 keys, signatures and addresses
//!
//! ## State Management
//! - [`persistence`] - Block and UTXO stores (in-memory and SQLite)
//! - [`wallet`] - Wallet keys, transaction building and the light client
//!
//! ## Networking & Integration
//! - [`network`] - Peer wire protocol and relay server
//! - [`sync`] - Chain synchronisation tracking
//! - [`api`] - HTTP and WebSocket API
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`node`] - Relay node orchestration
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod consensus;
pub mod service;
pub mod transaction;

// ============================================================================
// Primitives
// ============================================================================
pub mod hash;
pub mod params;
pub mod script;
pub mod token;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;
pub mod wallet;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod sync;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod node;
