//! # hsync-chain
//!
//! Header chain primitives for the header synchronizer.
//!
//! This crate provides:
//! - The block header type and its Blake2b-256 identity
//! - Proof-of-work seal verification
//! - Header chain contiguity validation
//! - The `ChainStore` abstraction and an in-memory implementation
//!   with total-difficulty fork choice

mod error;
mod header;
mod pow;
mod store;
mod validation;

pub use error::{ChainError, ChainResult};
pub use header::{BlockHash, Header, HASH_SIZE};
pub use pow::{max_target, mine, seal_target, verify_seal};
pub use store::{ChainStore, MemoryChainStore};
pub use validation::validate_header_chain;

/// Total difficulty (chain weight) type.
pub type Weight = num_bigint::BigUint;
