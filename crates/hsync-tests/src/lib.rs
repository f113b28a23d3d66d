//! # hsync-tests
//!
//! Integration tests for the header synchronizer.
//!
//! This crate provides:
//! - Deterministic mined header chains and forks
//! - Simulated remote peers with honest and faulty behaviours
//! - End-to-end sync scenarios against the downloader and driver
//! - Network service tests over in-memory connections
//! - Property-based tests for ordering, contiguity and timeouts

pub mod generators;
pub mod harness;



#[cfg(test)]
mod property_tests;

pub use generators::*;
pub use harness::*;
