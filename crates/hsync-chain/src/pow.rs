//! Proof-of-work seal.
//!
//! A header is sealed when `Blake2b256(seal_hash || nonce)`, read as a
//! big-endian integer, does not exceed `(2^256 - 1) / difficulty`.

use crate::header::BlockHash;
use crate::Header;
use bytes::{BufMut, BytesMut};
use num_bigint::BigUint;
use num_traits::Zero;

/// Largest 256-bit value.
pub fn max_target() -> BigUint {
    (BigUint::from(1u32) << 256) - BigUint::from(1u32)
}

/// Target a seal hit must not exceed for the given difficulty.
pub fn seal_target(difficulty: u64) -> BigUint {
    if difficulty == 0 {
        return BigUint::zero();
    }
    max_target() / BigUint::from(difficulty)
}

fn hit(seal_hash: &BlockHash, nonce: u64) -> BigUint {
    let mut buf = BytesMut::with_capacity(40);
    buf.put_slice(seal_hash.as_bytes());
    buf.put_u64(nonce);
    BigUint::from_bytes_be(BlockHash::digest(&buf).as_bytes())
}

/// Check the header's proof-of-work seal.
pub fn verify_seal(header: &Header) -> bool {
    if header.difficulty == 0 {
        return false;
    }
    hit(&header.seal_hash(), header.nonce) <= seal_target(header.difficulty)
}

/// Search for a nonce sealing the header. Expected work is `difficulty`
/// hash evaluations, so this is only practical for small difficulties.
pub fn mine(mut header: Header) -> Header {
    if header.difficulty == 0 {
        return header;
    }
    let seal_hash = header.seal_hash();
    let target = seal_target(header.difficulty);
    let mut nonce = 0u64;
    while hit(&seal_hash, nonce) > target {
        nonce = nonce.wrapping_add(1);
    }
    header.nonce = nonce;
    header
}
