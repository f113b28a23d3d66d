//! Test data generators for integration tests.
//!
//! Chains are returned indexed by block number: element `i` is the header
//! at height `i`, starting with the shared genesis.

use hsync_chain::{mine, BlockHash, ChainStore, Header, MemoryChainStore, Weight};
use hsync_network::PeerId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

/// Difficulty of every generated header. Low enough to mine instantly.
pub const TEST_DIFFICULTY: u64 = 2;

/// Genesis header shared by every generated chain.
pub fn genesis() -> Header {
    mine(Header::new(BlockHash::ZERO, 0, 0, TEST_DIFFICULTY))
}

/// Mine `len` headers on top of `parent`. Different `salt` values give
/// different forks from the same parent.
pub fn extend(parent: &Header, len: u64, salt: u64) -> Vec<Header> {
    let mut headers = Vec::with_capacity(len as usize);
    let mut prev = parent.clone();
    for _ in 0..len {
        let number = prev.number + 1;
        let header = mine(Header::new(
            prev.hash(),
            number,
            number * 10 + salt,
            TEST_DIFFICULTY,
        ));
        prev = header.clone();
        headers.push(header);
    }
    headers
}

/// Genesis plus `len` headers.
pub fn chain(len: u64) -> Vec<Header> {
    let genesis = genesis();
    let mut headers = vec![genesis.clone()];
    headers.extend(extend(&genesis, len, 0));
    headers
}

/// `base` up to and including `at`, followed by `len` fork headers.
pub fn fork(base: &[Header], at: u64, len: u64, salt: u64) -> Vec<Header> {
    let mut headers = base[..=at as usize].to_vec();
    headers.extend(extend(&base[at as usize], len, salt));
    headers
}

/// Total difficulty at the tip of an indexed chain.
pub fn chain_td(chain: &[Header]) -> Weight {
    chain.iter().map(|h| Weight::from(h.difficulty)).sum()
}

/// In-memory store anchored at `chain[0]` holding the rest of `chain`.
pub fn store(chain: &[Header]) -> Arc<MemoryChainStore> {
    let store = MemoryChainStore::new(chain[0].clone());
    if chain.len() > 1 {
        store
            .insert_header_chain(&chain[1..], 1)
            .expect("generated chain must import");
    }
    Arc::new(store)
}

/// Deterministic peer id.
pub fn peer_id(seed: u8) -> PeerId {
    PeerId::from_bytes(vec![0xA0, seed])
}

/// Deterministic shuffle of `items`.
pub fn shuffled<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut out = items.to_vec();
    out.shuffle(&mut StdRng::seed_from_u64(seed));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsync_chain::{validate_header_chain, verify_seal};

    #[test]
    fn test_chain_is_valid_and_indexed() {
        let headers = chain(50);
        assert_eq!(headers.len(), 51);
        for (i, header) in headers.iter().enumerate() {
            assert_eq!(header.number, i as u64);
            assert!(verify_seal(header));
        }
        validate_header_chain(&headers, 1).unwrap();
        assert_eq!(chain_td(&headers), Weight::from(102u32));
    }

    #[test]
    fn test_fork_shares_prefix() {
        let base = chain(30);
        let forked = fork(&base, 10, 5, 7);
        assert_eq!(forked.len(), 16);
        assert_eq!(forked[..=10], base[..=10]);
        assert_ne!(forked[11], base[11]);
        validate_header_chain(&forked, 1).unwrap();
    }

    #[test]
    fn test_store_head() {
        let headers = chain(20);
        let store = store(&headers);
        assert_eq!(store.current_header(), headers[20]);
        assert_eq!(store.current_td(), chain_td(&headers));
    }

    #[test]
    fn test_shuffle_is_deterministic() {
        let items: Vec<u32> = (0..32).collect();
        assert_eq!(shuffled(&items, 3), shuffled(&items, 3));
        let mut sorted = shuffled(&items, 3);
        sorted.sort();
        assert_eq!(sorted, items);
    }
}
