//! Block header type.
//!
//! Encoding (all integers big-endian):
//!
//! ```text
//! +-------------+--------+-----------+------------+-----------+---------+-------+
//! | parent_hash | number | timestamp | difficulty | extra_len |  extra  | nonce |
//! |  32 bytes   |   8    |     8     |     8      |     2     | <= 32   |   8   |
//! +-------------+--------+-----------+------------+-----------+---------+-------+
//! ```
//!
//! The header hash is Blake2b-256 over the full encoding. The seal hash
//! covers everything except the nonce.

use crate::{ChainError, ChainResult};
use blake2::{Blake2b, Digest};
use bytes::{Buf, BufMut, BytesMut};

/// Size of a block hash in bytes.
pub const HASH_SIZE: usize = 32;

/// Maximum length of the extra-data field.
pub const MAX_EXTRA_SIZE: usize = 32;

/// Encoded size of a header without extra data.
const FIXED_SIZE: usize = HASH_SIZE + 8 + 8 + 8 + 2 + 8;

/// 32-byte block identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash(pub [u8; HASH_SIZE]);

impl BlockHash {
    /// The all-zero hash, used as the parent of a genesis header.
    pub const ZERO: BlockHash = BlockHash([0u8; HASH_SIZE]);

    /// Create from a byte slice, which must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> ChainResult<Self> {
        if bytes.len() != HASH_SIZE {
            return Err(ChainError::Decode(format!(
                "hash must be {} bytes, got {}",
                HASH_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> ChainResult<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Blake2b-256 digest of arbitrary data.
    pub fn digest(data: &[u8]) -> Self {
        let hash = Blake2b::<typenum::U32>::digest(data);
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(&hash);
        Self(arr)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Abbreviated form keeps structured logs readable
        write!(f, "{}..", hex::encode(&self.0[..6]))
    }
}

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Hash of the parent header.
    pub parent_hash: BlockHash,
    /// Block number (height).
    pub number: u64,
    /// Timestamp in seconds since the epoch.
    pub timestamp: u64,
    /// Proof-of-work difficulty of this block.
    pub difficulty: u64,
    /// Arbitrary miner data.
    pub extra: Vec<u8>,
    /// Seal nonce.
    pub nonce: u64,
}

impl Header {
    /// Create an unsealed header on top of `parent_hash`.
    pub fn new(parent_hash: BlockHash, number: u64, timestamp: u64, difficulty: u64) -> Self {
        Self {
            parent_hash,
            number,
            timestamp,
            difficulty,
            extra: Vec::new(),
            nonce: 0,
        }
    }

    /// Header identity: Blake2b-256 of the full encoding.
    pub fn hash(&self) -> BlockHash {
        BlockHash::digest(&self.encode())
    }

    /// Hash of the header without its nonce.
    pub fn seal_hash(&self) -> BlockHash {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_unsealed(&mut buf);
        BlockHash::digest(&buf)
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        FIXED_SIZE + self.extra.len()
    }

    fn encode_unsealed(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.parent_hash.0);
        buf.put_u64(self.number);
        buf.put_u64(self.timestamp);
        buf.put_u64(self.difficulty);
        buf.put_u16(self.extra.len() as u16);
        buf.put_slice(&self.extra);
    }

    /// Append the encoding to `buf`.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        self.encode_unsealed(buf);
        buf.put_u64(self.nonce);
    }

    /// Encode to a fresh buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf
    }

    /// Decode one header from the front of `buf`.
    pub fn decode<B: Buf>(buf: &mut B) -> ChainResult<Self> {
        if buf.remaining() < FIXED_SIZE {
            return Err(ChainError::Decode(format!(
                "header truncated: {} bytes remaining",
                buf.remaining()
            )));
        }
        let mut parent = [0u8; HASH_SIZE];
        buf.copy_to_slice(&mut parent);
        let number = buf.get_u64();
        let timestamp = buf.get_u64();
        let difficulty = buf.get_u64();
        let extra_len = buf.get_u16() as usize;
        if extra_len > MAX_EXTRA_SIZE {
            return Err(ChainError::Decode(format!(
                "extra data too long: {} > {}",
                extra_len, MAX_EXTRA_SIZE
            )));
        }
        if buf.remaining() < extra_len + 8 {
            return Err(ChainError::Decode("header extra data truncated".into()));
        }
        let mut extra = vec![0u8; extra_len];
        buf.copy_to_slice(&mut extra);
        let nonce = buf.get_u64();

        Ok(Self {
            parent_hash: BlockHash(parent),
            number,
            timestamp,
            difficulty,
            extra,
            nonce,
        })
    }
}
